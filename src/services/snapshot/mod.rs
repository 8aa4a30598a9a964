use crate::algorithms::cross_validation::CrossValidationReport;
use crate::algorithms::ranking::{column_extremes, most_similar_rows, rank_descending};
use crate::algorithms::{k_fold, predict, Sgd};
use crate::error::{RecError, RecResult};
use crate::models::{ItemRating, RecommendationItem, UserFit};
use crate::services::cold_start::{ColdStartEstimator, ColdStartParams};
use crate::services::rating_store::IdMap;
use crate::utils::clip;
use crate::utils::metrics::ErrorAccumulator;
use crate::utils::validation::validate_factor_count;
use chrono::{DateTime, Utc};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Inclusive range recommendation scores are clipped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBounds {
    pub lower: f64,
    pub upper: f64,
}

impl ScoreBounds {
    pub fn new(lower: f64, upper: f64) -> RecResult<Self> {
        if !(lower.is_finite() && upper.is_finite()) || lower > upper {
            return Err(RecError::InvalidInput(format!(
                "Invalid score bounds [{}, {}]",
                lower, upper
            )));
        }
        Ok(Self { lower, upper })
    }
}

impl Default for ScoreBounds {
    fn default() -> Self {
        Self {
            lower: 1.0,
            upper: 10.0,
        }
    }
}

/// On-disk layout of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub item_index: BTreeMap<String, usize>,
    pub item_factor_matrix: Vec<Vec<f64>>,
    pub item_bias: Vec<f64>,
    pub learning_rate: f64,
    pub regularization: f64,
    pub global_mean: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// Items ranked highest and lowest along one latent factor.
#[derive(Debug, Clone, Serialize)]
pub struct FactorExtremes {
    pub factor: usize,
    pub top: Vec<RecommendationItem>,
    pub bottom: Vec<RecommendationItem>,
}

/// Frozen item side of a trained model.
///
/// Immutable once built: cold-start fits borrow it and only ever read the
/// item factors and biases.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSnapshot {
    item_index: IdMap,
    item_factors: Array2<f64>,
    item_bias: Array1<f64>,
    sgd: Sgd,
    global_mean: f64,
    created_at: DateTime<Utc>,
}

impl ModelSnapshot {
    pub fn new(
        item_index: IdMap,
        item_factors: Array2<f64>,
        item_bias: Array1<f64>,
        sgd: Sgd,
        global_mean: f64,
    ) -> RecResult<Self> {
        let snapshot = Self {
            item_index,
            item_factors,
            item_bias,
            sgd,
            global_mean,
            created_at: Utc::now(),
        };
        snapshot.check_consistency()?;
        Ok(snapshot)
    }

    fn check_consistency(&self) -> RecResult<()> {
        let items = self.item_index.len();
        if items == 0 {
            return Err(RecError::InvalidSnapshot("snapshot has no items".to_string()));
        }
        if self.item_factors.nrows() != items || self.item_bias.len() != items {
            return Err(RecError::InvalidSnapshot(format!(
                "{} items but {} factor rows and {} biases",
                items,
                self.item_factors.nrows(),
                self.item_bias.len()
            )));
        }
        if self.item_factors.ncols() == 0 {
            return Err(RecError::InvalidSnapshot("item factors have no columns".to_string()));
        }
        // JSON has no encoding for NaN or infinity, so such a snapshot could
        // be written but never read back
        if let Some(item) = self
            .item_factors
            .rows()
            .into_iter()
            .zip(self.item_bias.iter())
            .position(|(row, bias)| !bias.is_finite() || row.iter().any(|v| !v.is_finite()))
        {
            return Err(RecError::InvalidSnapshot(format!(
                "item {} has non-finite parameters",
                self.item_index.external(item).unwrap_or("?")
            )));
        }
        if !self.global_mean.is_finite() {
            return Err(RecError::InvalidSnapshot(format!(
                "global mean {} is not finite",
                self.global_mean
            )));
        }
        Ok(())
    }

    pub fn from_record(record: SnapshotRecord) -> RecResult<Self> {
        let item_index = IdMap::from_index(record.item_index)
            .map_err(|e| RecError::InvalidSnapshot(format!("item index: {}", e)))?;

        let rows = record.item_factor_matrix.len();
        let cols = record.item_factor_matrix.first().map_or(0, Vec::len);
        if let Some(row) = record.item_factor_matrix.iter().find(|row| row.len() != cols) {
            return Err(RecError::InvalidSnapshot(format!(
                "ragged factor matrix: rows of {} and {} columns",
                cols,
                row.len()
            )));
        }
        let flat: Vec<f64> = record.item_factor_matrix.into_iter().flatten().collect();
        let item_factors = Array2::from_shape_vec((rows, cols), flat)
            .map_err(|e| RecError::InvalidSnapshot(e.to_string()))?;

        let snapshot = Self {
            item_index,
            item_factors,
            item_bias: Array1::from(record.item_bias),
            sgd: Sgd::new(record.learning_rate, record.regularization),
            global_mean: record.global_mean,
            created_at: record.created_at,
        };
        snapshot.check_consistency()?;
        Ok(snapshot)
    }

    pub fn to_record(&self) -> SnapshotRecord {
        SnapshotRecord {
            item_index: self.item_index.to_index(),
            item_factor_matrix: self.item_factors.outer_iter().map(|row| row.to_vec()).collect(),
            item_bias: self.item_bias.to_vec(),
            learning_rate: self.sgd.learning_rate,
            regularization: self.sgd.regularization,
            global_mean: self.global_mean,
            created_at: self.created_at,
        }
    }

    pub fn read_from<R: Read>(reader: R) -> RecResult<Self> {
        let record: SnapshotRecord = serde_json::from_reader(reader)?;
        Self::from_record(record)
    }

    pub fn write_to<W: Write>(&self, writer: W) -> RecResult<()> {
        serde_json::to_writer(writer, &self.to_record())?;
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> RecResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        info!(
            "Saved snapshot with {} items and {} factors to {}",
            self.item_count(),
            self.factors(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> RecResult<Self> {
        let path = path.as_ref();
        let snapshot = Self::read_from(BufReader::new(File::open(path)?))?;
        info!(
            "Loaded snapshot with {} items and {} factors from {}",
            snapshot.item_count(),
            snapshot.factors(),
            path.display()
        );
        Ok(snapshot)
    }

    /// Loads a snapshot and checks it was trained with `expected` factors.
    pub fn load_with_factors(path: impl AsRef<Path>, expected: usize) -> RecResult<Self> {
        let snapshot = Self::load(path)?;
        validate_factor_count(expected, snapshot.factors())?;
        Ok(snapshot)
    }

    pub fn factors(&self) -> usize {
        self.item_factors.ncols()
    }

    pub fn item_count(&self) -> usize {
        self.item_index.len()
    }

    pub fn item_index(&self) -> &IdMap {
        &self.item_index
    }

    pub fn item_factors(&self) -> &Array2<f64> {
        &self.item_factors
    }

    pub fn item_bias(&self) -> &Array1<f64> {
        &self.item_bias
    }

    pub fn sgd(&self) -> Sgd {
        self.sgd
    }

    pub fn learning_rate(&self) -> f64 {
        self.sgd.learning_rate
    }

    pub fn regularization(&self) -> f64 {
        self.sgd.regularization
    }

    pub fn global_mean(&self) -> f64 {
        self.global_mean
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn item_id(&self, item: &str) -> RecResult<usize> {
        self.item_index
            .id(item)
            .ok_or_else(|| RecError::NotFound(format!("item {}", item)))
    }

    /// Maps raw ratings onto dense ids in the order given, dropping unknown
    /// items. Returns the mapped ratings and the number dropped.
    pub fn known_ratings<I, S>(&self, ratings: I) -> (Vec<ItemRating>, usize)
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut known = Vec::new();
        let mut dropped = 0;
        for (item, value) in ratings {
            match self.item_index.id(item.as_ref()) {
                Some(id) => known.push(ItemRating::new(id, value)),
                None => dropped += 1,
            }
        }
        (known, dropped)
    }

    /// Every item not in `exclude`, scored for the given user parameters and
    /// ranked best first.
    pub fn recommend<S: AsRef<str>>(
        &self,
        user_bias: f64,
        user_factors: ArrayView1<f64>,
        exclude: &[S],
    ) -> RecResult<Vec<RecommendationItem>> {
        self.recommend_within(user_bias, user_factors, exclude, ScoreBounds::default())
    }

    pub fn recommend_within<S: AsRef<str>>(
        &self,
        user_bias: f64,
        user_factors: ArrayView1<f64>,
        exclude: &[S],
        bounds: ScoreBounds,
    ) -> RecResult<Vec<RecommendationItem>> {
        validate_factor_count(self.factors(), user_factors.len())?;
        let excluded: HashSet<&str> = exclude.iter().map(AsRef::as_ref).collect();

        let scored = self
            .item_index
            .iter()
            .filter(|(_, name)| !excluded.contains(name))
            .map(|(id, _)| {
                let raw = predict(
                    self.global_mean,
                    user_bias,
                    self.item_bias[id],
                    user_factors,
                    self.item_factors.row(id),
                );
                (id, clip(raw, bounds.lower, bounds.upper))
            })
            .collect();

        Ok(self.named(rank_descending(scored)))
    }

    /// Fits a fresh user against this snapshot and returns the fitted
    /// parameters together with how many ratings matched a known item.
    pub fn train<I, S>(&self, ratings: I, params: &ColdStartParams, seed: Option<u64>) -> RecResult<UserFit>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut estimator = ColdStartEstimator::new(self, ratings, seed)?;
        estimator.fit(params)?;
        Ok(estimator.user_fit())
    }

    /// K-fold cross-validation of cold-start fits over one user's ratings.
    ///
    /// Ratings are split into contiguous folds in the order given, with no
    /// shuffling. Each fold trains a fresh estimator on the other folds and is
    /// scored on its own ratings; errors are pooled over all test ratings.
    pub fn cross_validate<I, S>(
        &self,
        ratings: I,
        folds: usize,
        params: &ColdStartParams,
        seed: Option<u64>,
    ) -> RecResult<CrossValidationReport>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let (known, dropped) = self.known_ratings(ratings);
        if dropped > 0 {
            debug!("Cross-validation ignoring {} ratings of unknown items", dropped);
        }

        let mut fold = 0u64;
        let report = k_fold(&known, folds, |train, test| {
            let fold_seed = seed.map(|s| s.wrapping_add(fold));
            fold += 1;

            let mut estimator = ColdStartEstimator::from_item_ratings(self, train.to_vec(), fold_seed)?;
            estimator.fit(params)?;

            let mut errors = ErrorAccumulator::new();
            for rating in test {
                errors.push(rating.value, estimator.predict(rating.item)?);
            }
            Ok(errors)
        })?;

        debug!(
            "Cross-validated {} ratings over {} folds: rmse {:.4}, mae {:.4}",
            known.len(),
            folds,
            report.overall.rmse,
            report.overall.mae
        );
        Ok(report)
    }

    /// Items whose factor vectors are most cosine-similar to `item`.
    pub fn similar_items(&self, item: &str, limit: usize) -> RecResult<Vec<RecommendationItem>> {
        let id = self.item_id(item)?;
        Ok(self.named(most_similar_rows(&self.item_factors, id, limit)))
    }

    pub fn inspect_factor(&self, factor: usize, limit: usize) -> RecResult<FactorExtremes> {
        if factor >= self.factors() {
            return Err(RecError::InvalidInput(format!(
                "factor {} outside [0, {})",
                factor,
                self.factors()
            )));
        }
        let (top, bottom) = column_extremes(&self.item_factors, factor, limit);
        Ok(FactorExtremes {
            factor,
            top: self.named(top),
            bottom: self.named(bottom),
        })
    }

    fn named(&self, scored: Vec<(usize, f64)>) -> Vec<RecommendationItem> {
        scored
            .into_iter()
            .filter_map(|(id, score)| {
                self.item_index.external(id).map(|name| RecommendationItem {
                    item_id: name.to_string(),
                    score,
                })
            })
            .collect()
    }
}
