use crate::algorithms::initializer::{normal, normal_vector, rng_from_seed};
use crate::algorithms::{predict, user_metrics};
use crate::config::ColdStartConfig;
use crate::error::{RecError, RecResult};
use crate::models::{ItemRating, RecommendationItem, TrainingReport, UserFit};
use crate::services::rating_store::RatingStore;
use crate::services::snapshot::ModelSnapshot;
use crate::utils::metrics::ErrorMetrics;
use crate::utils::validation::{validate_distribution, validate_rating_value};
use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

const DEFAULT_INIT_STD_DEV: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColdStartParams {
    pub epochs: usize,
    pub init_mean: f64,
    pub init_std_dev: f64,
    pub shuffle: bool,
}

impl Default for ColdStartParams {
    fn default() -> Self {
        Self {
            epochs: 200,
            init_mean: 0.0,
            init_std_dev: DEFAULT_INIT_STD_DEV,
            shuffle: false,
        }
    }
}

impl From<&ColdStartConfig> for ColdStartParams {
    fn from(config: &ColdStartConfig) -> Self {
        Self {
            epochs: config.epochs,
            init_mean: config.init_mean,
            init_std_dev: config.init_std_dev,
            shuffle: config.shuffle,
        }
    }
}

/// One training rating next to what the fitted user model predicts for it.
#[derive(Debug, Clone, Serialize)]
pub struct FitResidual {
    pub item_id: String,
    pub actual: f64,
    pub predicted: f64,
    pub abs_error: f64,
}

/// A user's rating compared with the corpus consensus for the same item.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusEntry {
    pub item_id: String,
    pub rating: f64,
    pub item_mean: f64,
    /// `rating - item_mean`
    pub deviation: f64,
    pub global_rating: f64,
}

/// Fits bias and factors for a single user against a frozen snapshot.
///
/// Only the user's own parameters move during training; the snapshot is
/// borrowed immutably, so many estimators can fit against one snapshot at
/// the same time.
pub struct ColdStartEstimator<'a> {
    snapshot: &'a ModelSnapshot,
    observations: Vec<ItemRating>,
    dropped: usize,
    bias: f64,
    factors: Array1<f64>,
    initialized: bool,
    rng: StdRng,
}

impl<'a> ColdStartEstimator<'a> {
    /// Items the snapshot does not know are dropped.
    pub fn new<I, S>(snapshot: &'a ModelSnapshot, ratings: I, seed: Option<u64>) -> RecResult<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let (observations, dropped) = snapshot.known_ratings(ratings);
        if dropped > 0 {
            debug!("Dropped {} ratings of items unknown to the snapshot", dropped);
        }
        let mut estimator = Self::from_item_ratings(snapshot, observations, seed)?;
        estimator.dropped = dropped;
        Ok(estimator)
    }

    pub fn from_item_ratings(
        snapshot: &'a ModelSnapshot,
        observations: Vec<ItemRating>,
        seed: Option<u64>,
    ) -> RecResult<Self> {
        let count = snapshot.item_count();
        for rating in &observations {
            if rating.item >= count {
                return Err(RecError::InvalidIdentifier { id: rating.item, count });
            }
            validate_rating_value(rating.value)?;
        }

        Ok(Self {
            snapshot,
            observations,
            dropped: 0,
            bias: 0.0,
            factors: Array1::zeros(snapshot.factors()),
            initialized: false,
            rng: rng_from_seed(seed),
        })
    }

    pub fn observations(&self) -> &[ItemRating] {
        &self.observations
    }

    /// Ratings ignored at construction because their item is unknown.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn factors(&self) -> ArrayView1<'_, f64> {
        self.factors.view()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Draws the user bias and every factor from `N(mean, std_dev)`.
    pub fn initialize(&mut self, mean: f64, std_dev: f64) -> RecResult<()> {
        validate_distribution(mean, std_dev)?;
        self.bias = normal(&mut self.rng, mean, std_dev);
        self.factors = normal_vector(&mut self.rng, self.snapshot.factors(), mean, std_dev);
        self.initialized = true;
        Ok(())
    }

    /// Runs `epochs` passes of per-observation SGD over the user's ratings.
    pub fn train(&mut self, epochs: usize, shuffle: bool) -> RecResult<TrainingReport> {
        if !self.initialized {
            self.initialize(0.0, DEFAULT_INIT_STD_DEV)?;
        }

        let start = Instant::now();
        let snapshot = self.snapshot;
        let global_mean = snapshot.global_mean();
        let sgd = snapshot.sgd();
        let item_factors = snapshot.item_factors();
        let item_bias = snapshot.item_bias();

        for _ in 0..epochs {
            if shuffle {
                self.observations.shuffle(&mut self.rng);
            }
            for rating in &self.observations {
                let item_row = item_factors.row(rating.item);
                let err = rating.value
                    - predict(
                        global_mean,
                        self.bias,
                        item_bias[rating.item],
                        self.factors.view(),
                        item_row,
                    );
                sgd.user_step(err, &mut self.bias, self.factors.view_mut(), item_row);
            }
        }

        Ok(TrainingReport {
            epochs,
            observations: self.observations.len(),
            elapsed_secs: start.elapsed().as_secs_f64(),
        })
    }

    /// Re-initializes from `params` and trains.
    pub fn fit(&mut self, params: &ColdStartParams) -> RecResult<TrainingReport> {
        self.initialize(params.init_mean, params.init_std_dev)?;
        self.train(params.epochs, params.shuffle)
    }

    pub fn predict(&self, item: usize) -> RecResult<f64> {
        let count = self.snapshot.item_count();
        if item >= count {
            return Err(RecError::InvalidIdentifier { id: item, count });
        }
        Ok(predict(
            self.snapshot.global_mean(),
            self.bias,
            self.snapshot.item_bias()[item],
            self.factors.view(),
            self.snapshot.item_factors().row(item),
        ))
    }

    pub fn predict_external(&self, item: &str) -> RecResult<f64> {
        self.predict(self.snapshot.item_id(item)?)
    }

    /// Error of the current fit over the user's own ratings.
    pub fn validate(&self) -> RecResult<ErrorMetrics> {
        user_metrics(
            &self.observations,
            self.bias,
            self.factors.view(),
            self.snapshot.item_factors(),
            self.snapshot.item_bias(),
            self.snapshot.global_mean(),
        )
    }

    pub fn user_fit(&self) -> UserFit {
        UserFit {
            observations: self.observations.len(),
            bias: self.bias,
            factors: self.factors.to_vec(),
        }
    }

    /// Predictions for every rated item, best fitted first.
    pub fn fit_summary(&self) -> RecResult<Vec<FitResidual>> {
        let mut summary = self
            .observations
            .iter()
            .map(|rating| {
                let predicted = self.predict(rating.item)?;
                Ok(FitResidual {
                    item_id: self.item_name(rating.item)?,
                    actual: rating.value,
                    predicted,
                    abs_error: (rating.value - predicted).abs(),
                })
            })
            .collect::<RecResult<Vec<_>>>()?;

        summary.sort_by(|a, b| a.abs_error.total_cmp(&b.abs_error).then_with(|| a.item_id.cmp(&b.item_id)));
        Ok(summary)
    }

    /// The user's ratings set against each item's mean among corpus raters,
    /// ordered by absolute deviation (smallest first when `ascending`).
    /// Items the store does not know are skipped.
    pub fn consensus_compare(
        &self,
        store: &RatingStore,
        ascending: bool,
        limit: usize,
    ) -> RecResult<Vec<ConsensusEntry>> {
        let mut entries = Vec::with_capacity(self.observations.len());
        for rating in &self.observations {
            let item_id = self.item_name(rating.item)?;
            let Some(item) = store.items().id(&item_id) else {
                debug!("Item {} is not in the store, skipping", item_id);
                continue;
            };
            if store.votes_for(item)? == 0 {
                continue;
            }
            let item_mean = store.item_mean(item)?;
            entries.push(ConsensusEntry {
                rating: rating.value,
                item_mean,
                deviation: rating.value - item_mean,
                global_rating: store.item_global_rating(item)?,
                item_id,
            });
        }

        entries.sort_by(|a, b| {
            let order = a.deviation.abs().total_cmp(&b.deviation.abs());
            let order = if ascending { order } else { order.reverse() };
            order.then_with(|| a.item_id.cmp(&b.item_id))
        });
        entries.truncate(limit);
        Ok(entries)
    }

    /// Top `limit` snapshot recommendations for this user, excluding items
    /// the user already rated.
    pub fn recommendations(&self, limit: usize) -> RecResult<Vec<RecommendationItem>> {
        let rated = self
            .observations
            .iter()
            .map(|rating| self.item_name(rating.item))
            .collect::<RecResult<Vec<_>>>()?;

        let mut recs = self.snapshot.recommend(self.bias, self.factors.view(), &rated)?;
        recs.truncate(limit);
        Ok(recs)
    }

    fn item_name(&self, item: usize) -> RecResult<String> {
        self.snapshot
            .item_index()
            .external(item)
            .map(str::to_string)
            .ok_or(RecError::InvalidIdentifier {
                id: item,
                count: self.snapshot.item_count(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::Sgd;
    use crate::services::rating_store::IdMap;
    use ndarray::array;

    fn snapshot() -> ModelSnapshot {
        ModelSnapshot::new(
            IdMap::from_names(["alien", "heat", "brazil"]).unwrap(),
            array![[0.5, -0.2], [0.1, 0.3], [-0.4, 0.2]],
            array![0.3, -0.1, 0.2],
            Sgd::new(0.01, 0.02),
            6.5,
        )
        .unwrap()
    }

    #[test]
    fn test_training_leaves_snapshot_untouched() {
        let snap = snapshot();
        let before = snap.clone();

        let mut estimator = ColdStartEstimator::new(&snap, vec![("alien", 9.0), ("brazil", 4.0)], Some(5)).unwrap();
        estimator.train(200, true).unwrap();

        assert_eq!(snap.item_factors(), before.item_factors());
        assert_eq!(snap.item_bias(), before.item_bias());
        assert_eq!(snap.global_mean(), before.global_mean());
    }

    #[test]
    fn test_unknown_items_are_dropped() {
        let snap = snapshot();
        let estimator =
            ColdStartEstimator::new(&snap, vec![("alien", 9.0), ("solaris", 8.0), ("heat", 5.0)], None).unwrap();

        assert_eq!(estimator.dropped(), 1);
        let items: Vec<usize> = estimator.observations().iter().map(|r| r.item).collect();
        assert_eq!(items, vec![0, 1]);
    }

    #[test]
    fn test_single_step_matches_update_rule() {
        let snap = snapshot();
        let mut estimator = ColdStartEstimator::new(&snap, vec![("heat", 8.0)], Some(11)).unwrap();
        estimator.initialize(0.0, 0.1).unwrap();
        let (b0, p0) = (estimator.bias(), estimator.factors().to_owned());

        estimator.train(1, false).unwrap();

        let q = snap.item_factors().row(1);
        let err = 8.0 - (6.5 + b0 + -0.1 + (p0[0] * q[0] + p0[1] * q[1]));
        assert_eq!(estimator.bias(), b0 + 0.01 * (err - 0.02 * b0));
        assert_eq!(estimator.factors()[0], p0[0] + 0.01 * (err * q[0] - 0.02 * p0[0]));
        assert_eq!(estimator.factors()[1], p0[1] + 0.01 * (err * q[1] - 0.02 * p0[1]));
    }

    #[test]
    fn test_training_reduces_error() {
        let snap = snapshot();
        let ratings = vec![("alien", 9.0), ("heat", 5.0), ("brazil", 3.0)];
        let mut estimator = ColdStartEstimator::new(&snap, ratings, Some(2)).unwrap();
        estimator.initialize(0.0, 0.1).unwrap();
        let before = estimator.validate().unwrap();

        estimator.train(500, false).unwrap();
        let after = estimator.validate().unwrap();

        assert!(after.rmse < before.rmse);
        assert_eq!(after.count, 3);
    }

    #[test]
    fn test_predict_bounds_and_validate_empty() {
        let snap = snapshot();
        let estimator = ColdStartEstimator::new(&snap, Vec::<(&str, f64)>::new(), None).unwrap();

        assert!(matches!(
            estimator.predict(3),
            Err(RecError::InvalidIdentifier { id: 3, count: 3 })
        ));
        assert!(matches!(estimator.predict_external("solaris"), Err(RecError::NotFound(_))));
        assert!(matches!(estimator.validate(), Err(RecError::EmptyDataset(_))));
    }

    #[test]
    fn test_recommendations_exclude_rated() {
        let snap = snapshot();
        let mut estimator = ColdStartEstimator::new(&snap, vec![("heat", 7.0)], Some(1)).unwrap();
        estimator.train(10, false).unwrap();

        let recs = estimator.recommendations(10).unwrap();
        assert_eq!(recs.len(), 2);
        assert!(recs.iter().all(|r| r.item_id != "heat"));

        let fit = estimator.user_fit();
        assert_eq!(fit.observations, 1);
        assert_eq!(fit.factors.len(), 2);
    }

    #[test]
    fn test_consensus_compare_orders_by_deviation() {
        let snap = snapshot();
        let mut store = RatingStore::new();
        store.extend_user("ann", vec![("alien", 6.0), ("heat", 6.0), ("brazil", 6.0)]).unwrap();
        store.extend_user("bob", vec![("alien", 8.0)]).unwrap();

        let estimator =
            ColdStartEstimator::new(&snap, vec![("alien", 9.0), ("heat", 2.0), ("brazil", 7.0)], None).unwrap();

        let ascending = estimator.consensus_compare(&store, true, 10).unwrap();
        let order: Vec<&str> = ascending.iter().map(|e| e.item_id.as_str()).collect();
        assert_eq!(order, vec!["brazil", "alien", "heat"]);
        assert_eq!(ascending[1].item_mean, 7.0);
        assert_eq!(ascending[1].deviation, 2.0);
        assert_eq!(ascending[2].deviation, -4.0);

        let descending = estimator.consensus_compare(&store, false, 1).unwrap();
        assert_eq!(descending.len(), 1);
        assert_eq!(descending[0].item_id, "heat");
    }

    #[test]
    fn test_fit_summary() {
        let snap = snapshot();
        let mut estimator = ColdStartEstimator::new(&snap, vec![("brazil", 4.0)], Some(8)).unwrap();
        estimator.train(5, false).unwrap();

        let summary = estimator.fit_summary().unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].item_id, "brazil");
        assert_eq!(summary[0].predicted, estimator.predict(2).unwrap());
        assert_eq!(summary[0].abs_error, (4.0 - summary[0].predicted).abs());
    }
}
