//! Numeric kernel shared by training, cold-start fitting and inference.
//!
//! Everything here is stateless and works on dense `f64` rows. Biased matrix
//! factorization predicts
//! `global_mean + user_bias + item_bias + dot(user_row, item_row)`.

pub mod cross_validation;
pub mod initializer;
pub mod optimizer;
pub mod ranking;

use crate::error::RecResult;
use crate::models::{ItemRating, RatingTuple};
use crate::utils::metrics::{validation_metrics, ErrorMetrics};
use ndarray::{Array1, Array2, ArrayView1};

pub use cross_validation::k_fold;
pub use optimizer::Sgd;

/// Sequential dot product, summed in factor order.
///
/// Summation order is fixed so that training and inference agree to the bit.
#[inline]
pub fn dot(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).fold(0.0, |acc, (x, y)| acc + x * y)
}

#[inline]
pub fn predict(
    global_mean: f64,
    user_bias: f64,
    item_bias: f64,
    user_row: ArrayView1<f64>,
    item_row: ArrayView1<f64>,
) -> f64 {
    global_mean + user_bias + item_bias + dot(user_row, item_row)
}

/// Metrics of the full model over `(user, item, rating)` tuples.
pub fn model_metrics(
    tuples: &[RatingTuple],
    user_factors: &Array2<f64>,
    item_factors: &Array2<f64>,
    user_bias: &Array1<f64>,
    item_bias: &Array1<f64>,
    global_mean: f64,
) -> RecResult<ErrorMetrics> {
    validation_metrics(tuples.iter().map(|t| {
        let predicted = predict(
            global_mean,
            user_bias[t.user],
            item_bias[t.item],
            user_factors.row(t.user),
            item_factors.row(t.item),
        );
        (t.value, predicted)
    }))
}

/// Metrics of a single user's fit over that user's `(item, rating)` pairs.
pub fn user_metrics(
    ratings: &[ItemRating],
    user_bias: f64,
    user_row: ArrayView1<f64>,
    item_factors: &Array2<f64>,
    item_bias: &Array1<f64>,
    global_mean: f64,
) -> RecResult<ErrorMetrics> {
    validation_metrics(ratings.iter().map(|r| {
        let predicted = predict(
            global_mean,
            user_bias,
            item_bias[r.item],
            user_row,
            item_factors.row(r.item),
        );
        (r.value, predicted)
    }))
}
