//! Sparse rating storage with dense, contiguous user and item ids.
//!
//! Ratings are held per user (`item id -> value`) and, for each item, the set
//! of users that rated it. Item removal goes through a [`DeletionSession`] so
//! that the item id space stays exactly `[0, item_count)`.

mod deletion;
mod id_map;

pub use deletion::DeletionSession;
pub use id_map::IdMap;

use crate::algorithms::ranking::rank_descending;
use crate::error::{RecError, RecResult};
use crate::models::RatingTuple;
use crate::utils::{mean, validation::validate_rating_value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Inclusive vote-count bounds an item must satisfy to survive a filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteBounds {
    pub min: Option<usize>,
    pub max: Option<usize>,
}

impl VoteBounds {
    pub fn new(min: Option<usize>, max: Option<usize>) -> Self {
        Self { min, max }
    }

    pub fn at_least(min: usize) -> Self {
        Self { min: Some(min), max: None }
    }

    pub fn contains(&self, votes: usize) -> bool {
        self.min.map_or(true, |min| votes >= min) && self.max.map_or(true, |max| votes <= max)
    }
}

/// On-disk corpus layout: names in dense-id order plus ratings keyed by id.
#[derive(Debug, Serialize, Deserialize)]
struct CorpusFile {
    users: Vec<String>,
    items: Vec<String>,
    ratings: BTreeMap<usize, BTreeMap<usize, f64>>,
}

#[derive(Debug, Clone, Default)]
pub struct RatingStore {
    users: IdMap,
    items: IdMap,
    by_user: Vec<BTreeMap<usize, f64>>,
    raters: Vec<BTreeSet<usize>>,
    global_mean: OnceLock<f64>,
}

impl RatingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests `(user, {item: rating})` pairs from a corpus.
    pub fn from_corpus<I, U, R, T>(corpus: I) -> RecResult<Self>
    where
        I: IntoIterator<Item = (U, R)>,
        U: AsRef<str>,
        R: IntoIterator<Item = (T, f64)>,
        T: AsRef<str>,
    {
        let mut store = RatingStore::new();
        for (user, ratings) in corpus {
            store.extend_user(user.as_ref(), ratings)?;
        }
        Ok(store)
    }

    pub fn from_json_reader<R: Read>(reader: R) -> RecResult<Self> {
        let corpus: CorpusFile = serde_json::from_reader(reader)?;

        let mut store = RatingStore {
            users: IdMap::from_names(corpus.users)?,
            items: IdMap::from_names(corpus.items)?,
            ..RatingStore::default()
        };
        store.by_user = vec![BTreeMap::new(); store.users.len()];
        store.raters = vec![BTreeSet::new(); store.items.len()];

        for (user, ratings) in corpus.ratings {
            if user >= store.users.len() {
                return Err(RecError::InvalidInput(format!(
                    "Corpus rating references unknown user id {}",
                    user
                )));
            }
            for (item, value) in ratings {
                store.check_item(item)?;
                store.insert(user, item, value)?;
            }
        }

        Ok(store)
    }

    pub fn load_json(path: impl AsRef<Path>) -> RecResult<Self> {
        let store = Self::from_json_reader(BufReader::new(File::open(path.as_ref())?))?;
        info!(
            "Loaded {} ratings from {} users on {} items",
            store.rating_count(),
            store.user_count(),
            store.item_count()
        );
        Ok(store)
    }

    pub fn write_json<W: Write>(&self, writer: W) -> RecResult<()> {
        let corpus = CorpusFile {
            users: self.users.names().map(str::to_string).collect(),
            items: self.items.names().map(str::to_string).collect(),
            ratings: self
                .by_user
                .iter()
                .enumerate()
                .filter(|(_, ratings)| !ratings.is_empty())
                .map(|(user, ratings)| (user, ratings.clone()))
                .collect(),
        };
        serde_json::to_writer(writer, &corpus)?;
        Ok(())
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> RecResult<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        self.write_json(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads `user<sep>item<sep>rating[<sep>...]` lines (MovieLens style).
    /// Users are named `user<id>` and items `movie<id>`.
    pub fn from_delimited<R: BufRead>(reader: R, separator: &str) -> RecResult<Self> {
        let mut store = RatingStore::new();

        for (line_idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split(separator).collect();
            if parts.len() < 3 {
                return Err(RecError::InvalidInput(format!(
                    "Line {}: expected at least 3 fields",
                    line_idx + 1
                )));
            }

            let value: f64 = parts[2].trim().parse().map_err(|_| {
                RecError::InvalidInput(format!("Line {}: invalid rating {:?}", line_idx + 1, parts[2]))
            })?;

            store.add_rating(
                &format!("user{}", parts[0].trim()),
                &format!("movie{}", parts[1].trim()),
                value,
            )?;
        }

        Ok(store)
    }

    /// Upserts one rating, allocating dense ids for unseen users and items.
    pub fn add_rating(&mut self, user: &str, item: &str, value: f64) -> RecResult<RatingTuple> {
        validate_rating_value(value)?;
        let user = self.register_user(user);
        let item = self.register_item(item);
        self.insert(user, item, value)?;
        Ok(RatingTuple::new(user, item, value))
    }

    /// Registers `user` (even with no ratings) and upserts all of `ratings`.
    /// Returns the user's dense id.
    ///
    /// The batch is validated before anything is registered, so a rejected
    /// batch leaves the store untouched.
    pub fn extend_user<R, T>(&mut self, user: &str, ratings: R) -> RecResult<usize>
    where
        R: IntoIterator<Item = (T, f64)>,
        T: AsRef<str>,
    {
        let ratings: Vec<(T, f64)> = ratings.into_iter().collect();
        for (_, value) in &ratings {
            validate_rating_value(*value)?;
        }

        let uid = self.register_user(user);
        for (item, value) in ratings {
            let mid = self.register_item(item.as_ref());
            self.insert(uid, mid, value)?;
        }
        Ok(uid)
    }

    fn register_user(&mut self, user: &str) -> usize {
        let uid = self.users.get_or_insert(user);
        if uid == self.by_user.len() {
            self.by_user.push(BTreeMap::new());
        }
        uid
    }

    fn register_item(&mut self, item: &str) -> usize {
        let mid = self.items.get_or_insert(item);
        if mid == self.raters.len() {
            self.raters.push(BTreeSet::new());
        }
        mid
    }

    fn insert(&mut self, user: usize, item: usize, value: f64) -> RecResult<()> {
        validate_rating_value(value)?;
        self.by_user[user].insert(item, value);
        self.raters[item].insert(user);
        self.invalidate_cache();
        Ok(())
    }

    fn invalidate_cache(&mut self) {
        self.global_mean.take();
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn rating_count(&self) -> usize {
        self.by_user.iter().map(BTreeMap::len).sum()
    }

    pub fn users(&self) -> &IdMap {
        &self.users
    }

    pub fn items(&self) -> &IdMap {
        &self.items
    }

    pub fn item_id(&self, item: &str) -> RecResult<usize> {
        self.items
            .id(item)
            .ok_or_else(|| RecError::NotFound(format!("item {}", item)))
    }

    pub fn user_id(&self, user: &str) -> RecResult<usize> {
        self.users
            .id(user)
            .ok_or_else(|| RecError::NotFound(format!("user {}", user)))
    }

    fn check_item(&self, item: usize) -> RecResult<()> {
        if item >= self.item_count() {
            return Err(RecError::InvalidIdentifier {
                id: item,
                count: self.item_count(),
            });
        }
        Ok(())
    }

    pub fn get(&self, user: &str, item: &str) -> Option<f64> {
        self.rating(self.users.id(user)?, self.items.id(item)?)
    }

    pub fn rating(&self, user: usize, item: usize) -> Option<f64> {
        self.by_user.get(user)?.get(&item).copied()
    }

    pub fn user_ratings(&self, user: usize) -> Option<&BTreeMap<usize, f64>> {
        self.by_user.get(user)
    }

    /// Every rating, users ascending then items ascending.
    pub fn tuples(&self) -> impl Iterator<Item = RatingTuple> + '_ {
        self.by_user.iter().enumerate().flat_map(|(user, ratings)| {
            ratings
                .iter()
                .map(move |(&item, &value)| RatingTuple::new(user, item, value))
        })
    }

    pub fn user_mean(&self, user: usize) -> RecResult<f64> {
        let ratings = self
            .user_ratings(user)
            .ok_or_else(|| RecError::NotFound(format!("user id {}", user)))?;
        mean(ratings.values().copied())
            .ok_or_else(|| RecError::EmptyDataset(format!("user {} has no ratings", user)))
    }

    pub fn raters(&self, item: usize) -> RecResult<&BTreeSet<usize>> {
        self.check_item(item)?;
        Ok(&self.raters[item])
    }

    pub fn item_ratings(&self, item: usize) -> RecResult<Vec<(usize, f64)>> {
        Ok(self
            .raters(item)?
            .iter()
            .filter_map(|&user| self.rating(user, item).map(|value| (user, value)))
            .collect())
    }

    pub fn item_mean(&self, item: usize) -> RecResult<f64> {
        mean(self.item_ratings(item)?.into_iter().map(|(_, value)| value))
            .ok_or_else(|| RecError::EmptyDataset(format!("item {} has no ratings", item)))
    }

    /// Shrinkage estimate `w * item_mean + (1 - w) * global_mean` with
    /// `w = votes / user_count`.
    pub fn item_global_rating(&self, item: usize) -> RecResult<f64> {
        let votes = self.votes_for(item)?;
        let global_mean = self.global_mean()?;
        if votes == 0 {
            return Ok(global_mean);
        }

        let w = votes as f64 / self.user_count() as f64;
        Ok(w * self.item_mean(item)? + (1.0 - w) * global_mean)
    }

    pub fn votes_for(&self, item: usize) -> RecResult<usize> {
        Ok(self.raters(item)?.len())
    }

    pub fn votes_for_external(&self, item: &str) -> RecResult<usize> {
        self.votes_for(self.item_id(item)?)
    }

    /// Vote count of every item, indexed by item id.
    pub fn votes(&self) -> Vec<usize> {
        self.raters.iter().map(BTreeSet::len).collect()
    }

    /// Mean of every rating in the store, cached until the next mutation.
    pub fn global_mean(&self) -> RecResult<f64> {
        if let Some(&cached) = self.global_mean.get() {
            return Ok(cached);
        }

        let value = mean(self.by_user.iter().flat_map(|ratings| ratings.values().copied()))
            .ok_or_else(|| RecError::EmptyDataset("global mean of an empty store".to_string()))?;
        Ok(*self.global_mean.get_or_init(|| value))
    }

    /// Observed pairs over all possible user/item pairs.
    pub fn sparsity(&self) -> RecResult<f64> {
        let cells = self.user_count() * self.item_count();
        if cells == 0 {
            return Err(RecError::EmptyDataset("store has no users or items".to_string()));
        }
        Ok(self.rating_count() as f64 / cells as f64)
    }

    /// Items ranked by shrunk global rating.
    pub fn top_items(&self, limit: usize) -> RecResult<Vec<(String, f64)>> {
        let scored = (0..self.item_count())
            .map(|item| self.item_global_rating(item).map(|score| (item, score)))
            .collect::<RecResult<Vec<_>>>()?;

        Ok(rank_descending(scored)
            .into_iter()
            .take(limit)
            .filter_map(|(item, score)| self.items.external(item).map(|name| (name.to_string(), score)))
            .collect())
    }

    pub fn begin_deletion(&mut self) -> DeletionSession<'_> {
        DeletionSession::new(self)
    }

    pub fn remove_item(&mut self, item: usize) -> RecResult<()> {
        let mut session = self.begin_deletion();
        session.mark(item)?;
        session.commit();
        Ok(())
    }

    pub fn remove_item_by_external(&mut self, item: &str) -> RecResult<()> {
        let id = self.item_id(item)?;
        self.remove_item(id)
    }

    /// Removes every item whose vote count lies outside `bounds`.
    /// Returns the number of items removed.
    pub fn filter_in_place(&mut self, bounds: VoteBounds) -> usize {
        let votes = self.votes();
        let mut session = self.begin_deletion();
        for (item, &count) in votes.iter().enumerate() {
            if !bounds.contains(count) {
                // ids come from the store's own range
                let _ = session.mark(item);
            }
        }
        let removed = session.commit();
        info!("Vote filter {:?} removed {} items", bounds, removed);
        removed
    }

    /// Deep copy of the store with the vote filter applied.
    pub fn filtered(&self, bounds: VoteBounds) -> RatingStore {
        let mut copy = self.clone();
        copy.filter_in_place(bounds);
        copy
    }

    /// Keeps only the `keep` most voted items (ties broken by lower id).
    pub fn retain_most_voted(&mut self, keep: usize) -> usize {
        let mut by_votes: Vec<(usize, usize)> = self.votes().into_iter().enumerate().collect();
        by_votes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let mut session = self.begin_deletion();
        for &(item, _) in by_votes.iter().skip(keep) {
            let _ = session.mark(item);
        }
        session.commit()
    }

    /// Removes every listed item known to the store; unknown names are skipped.
    pub fn remove_items_by_external<I, S>(&mut self, items: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut session = self.begin_deletion();
        for item in items {
            if session.mark_external(item.as_ref()).is_err() {
                warn!("Skipping unknown item {}", item.as_ref());
            }
        }
        session.commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_store() -> RatingStore {
        RatingStore::from_corpus(vec![
            ("ann", vec![("A", 8.0), ("B", 6.0), ("C", 9.0)]),
            ("bob", vec![("B", 4.0), ("C", 7.0)]),
            ("cid", vec![("C", 10.0)]),
        ])
        .unwrap()
    }

    fn assert_dense(store: &RatingStore) {
        for (id, name) in store.items().iter() {
            assert_eq!(store.items().id(name), Some(id));
        }
        assert_eq!(store.votes().len(), store.item_count());
        for tuple in store.tuples() {
            assert!(tuple.item < store.item_count());
            assert!(store.raters(tuple.item).unwrap().contains(&tuple.user));
        }
    }

    #[test]
    fn test_ids_are_allocated_densely() {
        let store = sample_store();
        assert_eq!(store.user_count(), 3);
        assert_eq!(store.item_count(), 3);
        assert_eq!(store.items().id("A"), Some(0));
        assert_eq!(store.items().id("C"), Some(2));
        assert_eq!(store.rating_count(), 6);
        assert_dense(&store);
    }

    #[test]
    fn test_read_after_write_overwrites() {
        let mut store = sample_store();
        store.add_rating("bob", "B", 9.5).unwrap();
        assert_eq!(store.get("bob", "B"), Some(9.5));
        assert_eq!(store.votes_for_external("B").unwrap(), 2);
        assert_eq!(store.rating_count(), 6);

        store.add_rating("dee", "Z", 3.0).unwrap();
        assert_eq!(store.get("dee", "Z"), Some(3.0));
        assert_eq!(store.items().id("Z"), Some(3));
        assert_eq!(store.users().id("dee"), Some(3));
    }

    #[test]
    fn test_rejects_non_finite_ratings() {
        let mut store = RatingStore::new();
        assert!(matches!(
            store.add_rating("ann", "A", f64::NAN),
            Err(RecError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_rejected_batch_leaves_store_unchanged() {
        let mut store = sample_store();
        let mean = store.global_mean().unwrap();

        let result = store.extend_user("dee", vec![("A", 8.0), ("Z", f64::NAN)]);
        assert!(matches!(result, Err(RecError::InvalidInput(_))));

        assert_eq!(store.user_count(), 3);
        assert_eq!(store.item_count(), 3);
        assert_eq!(store.rating_count(), 6);
        assert!(store.users().id("dee").is_none());
        assert!(store.items().id("Z").is_none());
        assert_eq!(store.global_mean().unwrap(), mean);
    }

    #[test]
    fn test_global_mean_is_invalidated_on_mutation() {
        let mut store = sample_store();
        let before = store.global_mean().unwrap();
        assert!((before - 44.0 / 6.0).abs() < 1e-12);

        store.add_rating("cid", "A", 2.0).unwrap();
        let after = store.global_mean().unwrap();
        assert!((after - 46.0 / 7.0).abs() < 1e-12);

        store.remove_item_by_external("A").unwrap();
        assert!((store.global_mean().unwrap() - 36.0 / 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_global_mean_of_empty_store() {
        let store = RatingStore::new();
        assert!(matches!(store.global_mean(), Err(RecError::EmptyDataset(_))));
    }

    #[test]
    fn test_votes() {
        let store = sample_store();
        assert_eq!(store.votes(), vec![1, 2, 3]);
        assert_eq!(store.votes_for(1).unwrap(), 2);
        assert!(matches!(store.votes_for(3), Err(RecError::InvalidIdentifier { id: 3, count: 3 })));
        assert!(matches!(store.votes_for_external("Q"), Err(RecError::NotFound(_))));
    }

    #[test]
    fn test_bulk_delete_compacts_ids() {
        let mut store = sample_store();
        let c_ratings = store.item_ratings(2).unwrap();

        let mut session = store.begin_deletion();
        session.mark(1).unwrap();
        assert_eq!(session.commit(), 1);

        assert_eq!(store.item_count(), 2);
        assert_eq!(store.items().id("A"), Some(0));
        assert_eq!(store.items().id("C"), Some(1));
        assert_eq!(store.items().id("B"), None);
        assert_eq!(store.item_ratings(1).unwrap(), c_ratings);
        assert_eq!(store.get("ann", "C"), Some(9.0));
        assert_eq!(store.get("bob", "C"), Some(7.0));
        assert_eq!(store.rating_count(), 4);
        assert_dense(&store);
    }

    #[test]
    fn test_bulk_delete_many() {
        let mut store = RatingStore::new();
        for i in 0..10 {
            store.add_rating("u", &format!("m{}", i), i as f64).unwrap();
        }

        let mut session = store.begin_deletion();
        for id in [0, 3, 4, 9] {
            session.mark(id).unwrap();
        }
        session.mark(3).unwrap();
        assert_eq!(session.marked(), 4);
        session.commit();

        let names: Vec<_> = store.items().names().collect();
        assert_eq!(names, vec!["m1", "m2", "m5", "m6", "m7", "m8"]);
        for (id, name) in store.items().iter() {
            let original: f64 = name[1..].parse().unwrap();
            assert_eq!(store.rating(0, id), Some(original));
        }
        assert_dense(&store);
    }

    #[test]
    fn test_mark_out_of_range() {
        let mut store = sample_store();
        let mut session = store.begin_deletion();
        assert!(matches!(session.mark(5), Err(RecError::InvalidIdentifier { id: 5, count: 3 })));
        assert!(matches!(session.mark_external("nope"), Err(RecError::NotFound(_))));
    }

    #[test]
    fn test_dropped_session_changes_nothing() {
        let mut store = sample_store();
        {
            let mut session = store.begin_deletion();
            session.mark(0).unwrap();
        }
        assert_eq!(store.item_count(), 3);
        assert_eq!(store.get("ann", "A"), Some(8.0));
    }

    #[test]
    fn test_filter_copy_and_in_place() {
        let mut store = sample_store();
        let copy = store.filtered(VoteBounds::at_least(2));
        assert_eq!(copy.item_count(), 2);
        assert_eq!(store.item_count(), 3);

        let removed = store.filter_in_place(VoteBounds::new(None, Some(2)));
        assert_eq!(removed, 1);
        assert_eq!(store.items().names().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_dense(&store);
        // the copy was deep
        assert_eq!(copy.get("cid", "C"), Some(10.0));
    }

    #[test]
    fn test_retain_most_voted() {
        let mut store = sample_store();
        assert_eq!(store.retain_most_voted(1), 2);
        assert_eq!(store.items().names().collect::<Vec<_>>(), vec!["C"]);
    }

    #[test]
    fn test_shrinkage_boundaries() {
        let mut store = sample_store();
        store.add_rating("dee", "Z", 1.0).unwrap();
        store.add_rating("dee", "C", 6.0).unwrap();
        let global_mean = store.global_mean().unwrap();

        // C is rated by every user: weight 1
        let c = store.items().id("C").unwrap();
        assert_eq!(store.item_global_rating(c).unwrap(), store.item_mean(c).unwrap());

        let mut session = store.begin_deletion();
        session.mark_external("Z").unwrap();
        session.commit();
        store.register_item("unrated");
        let unrated = store.items().id("unrated").unwrap();
        assert_eq!(store.votes_for(unrated).unwrap(), 0);
        assert_ne!(global_mean, store.global_mean().unwrap());
        assert_eq!(store.item_global_rating(unrated).unwrap(), store.global_mean().unwrap());
    }

    #[test]
    fn test_json_round_trip() {
        let store = sample_store();
        let mut buf = Vec::new();
        store.write_json(&mut buf).unwrap();
        let loaded = RatingStore::from_json_reader(buf.as_slice()).unwrap();

        assert_eq!(loaded.users(), store.users());
        assert_eq!(loaded.items(), store.items());
        assert_eq!(loaded.tuples().collect::<Vec<_>>(), store.tuples().collect::<Vec<_>>());
    }

    #[test]
    fn test_from_delimited() {
        let data = "1::10::5::978300760\n1::20::3::978302109\n2::10::4::978301968\n";
        let store = RatingStore::from_delimited(data.as_bytes(), "::").unwrap();
        assert_eq!(store.user_count(), 2);
        assert_eq!(store.item_count(), 2);
        assert_eq!(store.get("user2", "movie10"), Some(4.0));
        assert!(RatingStore::from_delimited("1::x\n".as_bytes(), "::").is_err());
    }

    #[test]
    fn test_sparsity_and_top_items() {
        let store = sample_store();
        assert!((store.sparsity().unwrap() - 6.0 / 9.0).abs() < 1e-12);
        let top = store.top_items(1).unwrap();
        assert_eq!(top[0].0, "C");
    }
}
