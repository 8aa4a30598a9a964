use crate::algorithms::initializer::{normal_matrix, rng_from_seed};
use crate::algorithms::{model_metrics, predict, Sgd};
use crate::config::TrainingConfig;
use crate::error::{RecError, RecResult};
use crate::models::{RatingTuple, TrainingReport};
use crate::services::cold_start::{ColdStartEstimator, ColdStartParams};
use crate::services::rating_store::RatingStore;
use crate::services::snapshot::ModelSnapshot;
use crate::utils::metrics::{validation_metrics, ErrorAccumulator, ErrorMetrics};
use crate::utils::validation::{validate_distribution, validate_fraction, validate_hyperparameters};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::time::Instant;
use tracing::{debug, info};

const DEFAULT_INIT_STD_DEV: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainerParams {
    pub factors: usize,
    pub learning_rate: f64,
    pub regularization: f64,
    pub seed: Option<u64>,
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self {
            factors: 150,
            learning_rate: 0.001,
            regularization: 0.02,
            seed: None,
        }
    }
}

impl From<&TrainingConfig> for TrainerParams {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            factors: config.factors,
            learning_rate: config.learning_rate,
            regularization: config.regularization,
            seed: config.seed,
        }
    }
}

/// Outcome of fitting every held-out user against a snapshot of the
/// trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColdStartEvaluation {
    pub users: usize,
    pub training_ratings: usize,
    pub metrics: ErrorMetrics,
}

/// Biased matrix factorization trained with per-rating SGD.
///
/// The trainer owns its rating store, so the user and item id spaces cannot
/// change under the factor matrices. Users can be held out entirely (their
/// ratings never touch training) and a fraction of the remaining ratings can
/// be reserved as a test set.
pub struct Trainer {
    store: RatingStore,
    sgd: Sgd,
    user_factors: Array2<f64>,
    item_factors: Array2<f64>,
    user_bias: Array1<f64>,
    item_bias: Array1<f64>,
    initialized: bool,
    held_out: BTreeSet<usize>,
    test_pairs: BTreeSet<(usize, usize)>,
    rng: StdRng,
}

impl Trainer {
    pub fn new(store: RatingStore, params: TrainerParams) -> RecResult<Self> {
        validate_hyperparameters(params.factors, params.learning_rate, params.regularization)?;
        if store.rating_count() == 0 {
            return Err(RecError::EmptyDataset("cannot train on a store without ratings".to_string()));
        }

        let (users, items) = (store.user_count(), store.item_count());
        info!(
            "Trainer ready: {} users, {} items, {} ratings, {} factors",
            users,
            items,
            store.rating_count(),
            params.factors
        );

        Ok(Self {
            sgd: Sgd::new(params.learning_rate, params.regularization),
            user_factors: Array2::zeros((users, params.factors)),
            item_factors: Array2::zeros((items, params.factors)),
            user_bias: Array1::zeros(users),
            item_bias: Array1::zeros(items),
            initialized: false,
            held_out: BTreeSet::new(),
            test_pairs: BTreeSet::new(),
            rng: rng_from_seed(params.seed),
            store,
        })
    }

    pub fn store(&self) -> &RatingStore {
        &self.store
    }

    pub fn factors(&self) -> usize {
        self.user_factors.ncols()
    }

    pub fn sgd(&self) -> Sgd {
        self.sgd
    }

    pub fn user_factors(&self) -> &Array2<f64> {
        &self.user_factors
    }

    pub fn item_factors(&self) -> &Array2<f64> {
        &self.item_factors
    }

    pub fn user_bias(&self) -> &Array1<f64> {
        &self.user_bias
    }

    pub fn item_bias(&self) -> &Array1<f64> {
        &self.item_bias
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn held_out_users(&self) -> &BTreeSet<usize> {
        &self.held_out
    }

    pub fn test_pairs(&self) -> &BTreeSet<(usize, usize)> {
        &self.test_pairs
    }

    /// Withholds a random `fraction` of users from training entirely.
    ///
    /// Any test ratings belonging to those users are dropped from the test
    /// set. Returns the number of held-out users.
    pub fn hold_out_users(&mut self, fraction: f64) -> RecResult<usize> {
        validate_fraction("Held-out user fraction", fraction)?;
        let users = self.store.user_count();
        let amount = (fraction * users as f64) as usize;

        self.held_out = index::sample(&mut self.rng, users, amount).into_iter().collect();
        let held_out = &self.held_out;
        self.test_pairs.retain(|(user, _)| !held_out.contains(user));

        info!("Held out {} of {} users", self.held_out.len(), users);
        Ok(self.held_out.len())
    }

    /// Reserves a random `fraction` of the ratings of non-held-out users as
    /// the test set. Returns the test set size.
    pub fn sample_test_set(&mut self, fraction: f64) -> RecResult<usize> {
        validate_fraction("Test fraction", fraction)?;
        let candidates: Vec<(usize, usize)> = self
            .store
            .tuples()
            .filter(|t| !self.held_out.contains(&t.user))
            .map(|t| (t.user, t.item))
            .collect();
        let amount = (fraction * candidates.len() as f64) as usize;

        self.test_pairs = index::sample(&mut self.rng, candidates.len(), amount)
            .into_iter()
            .map(|i| candidates[i])
            .collect();

        info!(
            "Sampled {} test ratings out of {}",
            self.test_pairs.len(),
            candidates.len()
        );
        Ok(self.test_pairs.len())
    }

    /// Ratings used by `train`: everything outside held-out users and the
    /// test set, ordered by user then item id.
    pub fn training_tuples(&self) -> Vec<RatingTuple> {
        self.store
            .tuples()
            .filter(|t| !self.held_out.contains(&t.user) && !self.test_pairs.contains(&(t.user, t.item)))
            .collect()
    }

    pub fn test_tuples(&self) -> Vec<RatingTuple> {
        self.test_pairs
            .iter()
            .filter_map(|&(user, item)| {
                self.store
                    .rating(user, item)
                    .map(|value| RatingTuple::new(user, item, value))
            })
            .collect()
    }

    /// Draws both factor matrices from `N(mean, std_dev)` (users first, then
    /// items) and zeroes the biases.
    pub fn initialize(&mut self, mean: f64, std_dev: f64) -> RecResult<()> {
        validate_distribution(mean, std_dev)?;
        let k = self.factors();
        self.user_factors = normal_matrix(&mut self.rng, self.store.user_count(), k, mean, std_dev);
        self.item_factors = normal_matrix(&mut self.rng, self.store.item_count(), k, mean, std_dev);
        self.user_bias.fill(0.0);
        self.item_bias.fill(0.0);
        self.initialized = true;
        debug!("Initialized factors from N({}, {})", mean, std_dev);
        Ok(())
    }

    /// Runs `epochs` passes of SGD over the training ratings.
    ///
    /// Without `shuffle` every epoch visits ratings in store order, so two
    /// trainers with equal seeds produce bit-identical parameters.
    pub fn train(&mut self, epochs: usize, shuffle: bool) -> RecResult<TrainingReport> {
        let global_mean = self.store.global_mean()?;
        if !self.initialized {
            self.initialize(0.0, DEFAULT_INIT_STD_DEV)?;
        }

        let mut tuples = self.training_tuples();
        let sgd = self.sgd;
        let start = Instant::now();

        for epoch in 0..epochs {
            if shuffle {
                tuples.shuffle(&mut self.rng);
            }
            for t in &tuples {
                let err = t.value
                    - predict(
                        global_mean,
                        self.user_bias[t.user],
                        self.item_bias[t.item],
                        self.user_factors.row(t.user),
                        self.item_factors.row(t.item),
                    );
                sgd.step(
                    err,
                    &mut self.user_bias[t.user],
                    &mut self.item_bias[t.item],
                    self.user_factors.row_mut(t.user),
                    self.item_factors.row_mut(t.item),
                );
            }
            debug!("Epoch {}/{} complete", epoch + 1, epochs);
        }

        let report = TrainingReport {
            epochs,
            observations: tuples.len(),
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        info!(
            "Trained {} epochs over {} ratings in {:.2}s",
            report.epochs, report.observations, report.elapsed_secs
        );
        Ok(report)
    }

    pub fn predict(&self, user: usize, item: usize) -> RecResult<f64> {
        if item >= self.store.item_count() {
            return Err(RecError::InvalidIdentifier {
                id: item,
                count: self.store.item_count(),
            });
        }
        if user >= self.store.user_count() {
            return Err(RecError::NotFound(format!("user id {}", user)));
        }
        Ok(predict(
            self.store.global_mean()?,
            self.user_bias[user],
            self.item_bias[item],
            self.user_factors.row(user),
            self.item_factors.row(item),
        ))
    }

    /// Error of the model over the test set.
    pub fn validate(&self) -> RecResult<ErrorMetrics> {
        model_metrics(
            &self.test_tuples(),
            &self.user_factors,
            &self.item_factors,
            &self.user_bias,
            &self.item_bias,
            self.store.global_mean()?,
        )
    }

    /// Error of predicting the global mean for every test rating.
    pub fn baseline_metrics(&self) -> RecResult<ErrorMetrics> {
        let global_mean = self.store.global_mean()?;
        validation_metrics(self.test_tuples().into_iter().map(|t| (t.value, global_mean)))
    }

    /// Freezes the item side of the model.
    pub fn snapshot(&self) -> RecResult<ModelSnapshot> {
        ModelSnapshot::new(
            self.store.items().clone(),
            self.item_factors.clone(),
            self.item_bias.clone(),
            self.sgd,
            self.store.global_mean()?,
        )
    }

    /// Fits every held-out user from scratch against a snapshot and scores
    /// the fits on a random `test_fraction` of the held-out ratings.
    ///
    /// Users are fitted in parallel; each gets its own rng seeded from this
    /// trainer's rng, so a seeded trainer evaluates reproducibly.
    pub fn evaluate_cold_start(&mut self, params: &ColdStartParams, test_fraction: f64) -> RecResult<ColdStartEvaluation> {
        validate_fraction("Cold-start test fraction", test_fraction)?;
        if self.held_out.is_empty() {
            return Err(RecError::EmptyDataset("no held-out users to evaluate".to_string()));
        }
        let snapshot = self.snapshot()?;

        let observations: Vec<(usize, usize)> = self
            .held_out
            .iter()
            .filter_map(|&user| self.store.user_ratings(user).map(|ratings| (user, ratings)))
            .flat_map(|(user, ratings)| ratings.keys().map(move |&item| (user, item)))
            .collect();
        let amount = (test_fraction * observations.len() as f64) as usize;
        let test: HashSet<(usize, usize)> = index::sample(&mut self.rng, observations.len(), amount)
            .into_iter()
            .map(|i| observations[i])
            .collect();

        let base_seed: u64 = self.rng.gen();
        let store = &self.store;
        let users: Vec<usize> = self.held_out.iter().copied().collect();

        let per_user = users
            .par_iter()
            .map(|&user| -> RecResult<(usize, ErrorAccumulator)> {
                let mut train = Vec::new();
                let mut held = Vec::new();
                for (&item, &value) in store.user_ratings(user).into_iter().flatten() {
                    let name = store.items().external(item).unwrap_or_default();
                    if test.contains(&(user, item)) {
                        held.push((name, value));
                    } else {
                        train.push((name, value));
                    }
                }

                let seed = base_seed.wrapping_add(user as u64);
                let mut estimator = ColdStartEstimator::new(&snapshot, train, Some(seed))?;
                estimator.fit(params)?;

                let mut errors = ErrorAccumulator::new();
                for (item, actual) in held {
                    errors.push(actual, estimator.predict_external(item)?);
                }
                Ok((estimator.observations().len(), errors))
            })
            .collect::<RecResult<Vec<_>>>()?;

        let mut errors = ErrorAccumulator::new();
        let mut training_ratings = 0;
        for (trained, user_errors) in &per_user {
            training_ratings += trained;
            errors.merge(user_errors);
        }

        let evaluation = ColdStartEvaluation {
            users: users.len(),
            training_ratings,
            metrics: errors.finish()?,
        };
        info!(
            "Cold-start evaluation over {} users: rmse {:.4}, mae {:.4}",
            evaluation.users, evaluation.metrics.rmse, evaluation.metrics.mae
        );
        Ok(evaluation)
    }
}
