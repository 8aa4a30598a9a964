use crate::error::{RecError, RecResult};
use indexmap::IndexSet;
use std::collections::BTreeMap;

/// Bidirectional map between external identifiers and dense ids `[0, len)`.
///
/// The dense id of a name is its position in the set, so both directions are
/// one structure and cannot drift apart.
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    names: IndexSet<String>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map whose dense ids follow the order of `names`.
    pub fn from_names<I, S>(names: I) -> RecResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = IdMap::new();
        for name in names {
            let name = name.into();
            if map.names.contains(&name) {
                return Err(RecError::InvalidInput(format!("Duplicate identifier: {}", name)));
            }
            map.names.insert(name);
        }
        Ok(map)
    }

    /// Builds a map from an `external -> dense id` index, which must be a
    /// bijection onto `[0, len)`.
    pub fn from_index(index: BTreeMap<String, usize>) -> RecResult<Self> {
        let len = index.len();
        let mut slots: Vec<Option<String>> = vec![None; len];

        for (name, id) in index {
            let slot = slots
                .get_mut(id)
                .ok_or(RecError::InvalidIdentifier { id, count: len })?;
            if let Some(other) = slot {
                return Err(RecError::InvalidInput(format!(
                    "Identifiers {} and {} share dense id {}",
                    other, name, id
                )));
            }
            *slot = Some(name);
        }

        // every slot is filled: len distinct ids all below len
        Self::from_names(slots.into_iter().flatten())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn id(&self, external: &str) -> Option<usize> {
        self.names.get_index_of(external)
    }

    pub fn external(&self, id: usize) -> Option<&str> {
        self.names.get_index(id).map(String::as_str)
    }

    pub fn contains(&self, external: &str) -> bool {
        self.names.contains(external)
    }

    /// Dense id of `external`, appending it at `len()` when unseen.
    pub fn get_or_insert(&mut self, external: &str) -> usize {
        match self.names.get_index_of(external) {
            Some(id) => id,
            None => self.names.insert_full(external.to_string()).0,
        }
    }

    /// Drops every id whose `keep` flag is false and renumbers the survivors
    /// contiguously in their original relative order.
    ///
    /// Returns the old-to-new remapping, `None` for dropped ids.
    pub fn retain(&mut self, keep: &[bool]) -> Vec<Option<usize>> {
        debug_assert_eq!(keep.len(), self.names.len());

        let mut next = 0;
        let remap = keep
            .iter()
            .map(|&kept| {
                kept.then(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect();

        let mut flags = keep.iter();
        self.names.retain(|_| flags.next().copied().unwrap_or(false));
        remap
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names().enumerate()
    }

    pub fn to_index(&self) -> BTreeMap<String, usize> {
        self.iter().map(|(id, name)| (name.to_string(), id)).collect()
    }
}

// `IndexSet` equality ignores order; dense ids do not.
impl PartialEq for IdMap {
    fn eq(&self, other: &Self) -> bool {
        self.names.iter().eq(other.names.iter())
    }
}

impl Eq for IdMap {}
