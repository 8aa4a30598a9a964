use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One observed rating addressed by dense ids.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingTuple {
    pub user: usize,
    pub item: usize,
    pub value: f64,
}

impl RatingTuple {
    pub fn new(user: usize, item: usize, value: f64) -> Self {
        Self { user, item, value }
    }
}

/// A single user's rating of a dense item id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ItemRating {
    pub item: usize,
    pub value: f64,
}

impl ItemRating {
    pub fn new(item: usize, value: f64) -> Self {
        Self { item, value }
    }
}

/// Raw ratings of one user keyed by external item id.
///
/// A second write to the same item overwrites the value in place; otherwise
/// entries keep first-insertion order, which cross-validation relies on.
/// Serialized as a JSON object in that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRatings(IndexMap<String, f64>);

impl UserRatings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, item: impl Into<String>, value: f64) -> Option<f64> {
        self.0.insert(item.into(), value)
    }

    pub fn get(&self, item: &str) -> Option<f64> {
        self.0.get(item).copied()
    }

    pub fn contains(&self, item: &str) -> bool {
        self.0.contains_key(item)
    }

    pub fn remove(&mut self, item: &str) -> Option<f64> {
        self.0.shift_remove(item)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(item, value)| (item.as_str(), *value))
    }

    pub fn items(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for UserRatings {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(item, value)| (item.into(), value)).collect())
    }
}

/// Fitted per-user parameters produced by a cold-start fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserFit {
    /// Ratings that matched a known item and took part in the fit.
    pub observations: usize,
    pub bias: f64,
    pub factors: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub epochs: usize,
    pub observations: usize,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub username: String,
    pub num_recommendations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub item_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationSummary {
    pub folds: usize,
    pub rmse: f64,
    pub mae: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub username: String,
    pub rated_items: usize,
    pub known_items: usize,
    pub recommendations: Vec<RecommendationItem>,
    pub cross_validation: Option<CrossValidationSummary>,
    pub generated_at: DateTime<Utc>,
}
