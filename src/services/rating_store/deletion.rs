use super::RatingStore;
use crate::error::{RecError, RecResult};
use std::collections::BTreeMap;
use tracing::debug;

/// A pending bulk removal of items from a [`RatingStore`].
///
/// Ids are marked against the numbering in force when the session was opened;
/// nothing changes until [`commit`](DeletionSession::commit), which compacts
/// the id space in one pass. Dropping the session without committing discards
/// the marks.
pub struct DeletionSession<'a> {
    store: &'a mut RatingStore,
    doomed: Vec<bool>,
    marked: usize,
}

impl<'a> DeletionSession<'a> {
    pub(super) fn new(store: &'a mut RatingStore) -> Self {
        let doomed = vec![false; store.item_count()];
        Self {
            store,
            doomed,
            marked: 0,
        }
    }

    pub fn mark(&mut self, item: usize) -> RecResult<()> {
        let count = self.doomed.len();
        let slot = self
            .doomed
            .get_mut(item)
            .ok_or(RecError::InvalidIdentifier { id: item, count })?;
        if !*slot {
            *slot = true;
            self.marked += 1;
        }
        Ok(())
    }

    pub fn mark_external(&mut self, item: &str) -> RecResult<()> {
        let id = self.store.item_id(item)?;
        self.mark(id)
    }

    pub fn marked(&self) -> usize {
        self.marked
    }

    /// Removes every marked item and renumbers the survivors contiguously,
    /// keeping their relative order. Returns the number of items removed.
    pub fn commit(self) -> usize {
        if self.marked == 0 {
            return 0;
        }

        let keep: Vec<bool> = self.doomed.iter().map(|&d| !d).collect();
        let store = self.store;
        let remap = store.items.retain(&keep);

        for ratings in store.by_user.iter_mut() {
            let old = std::mem::take(ratings);
            *ratings = old
                .into_iter()
                .filter_map(|(item, value)| remap[item].map(|new_id| (new_id, value)))
                .collect::<BTreeMap<_, _>>();
        }

        let old_raters = std::mem::take(&mut store.raters);
        store.raters = old_raters
            .into_iter()
            .zip(&keep)
            .filter_map(|(raters, &kept)| kept.then_some(raters))
            .collect();

        store.invalidate_cache();

        debug!(
            "Removed {} items, {} remain",
            self.marked,
            store.item_count()
        );
        self.marked
    }
}
