use crate::error::{RecError, RecResult};
use serde::{Deserialize, Serialize};

/// Error statistics of predictions against known ratings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub mse: f64,
    pub count: usize,
}

/// Running sums of squared and absolute prediction errors.
///
/// Accumulators can be merged, so per-fold or per-user partial sums pool into
/// one figure without keeping every residual around.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorAccumulator {
    squared: f64,
    absolute: f64,
    count: usize,
}

impl ErrorAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, actual: f64, predicted: f64) {
        let err = actual - predicted;
        self.squared += err * err;
        self.absolute += err.abs();
        self.count += 1;
    }

    pub fn merge(&mut self, other: &ErrorAccumulator) {
        self.squared += other.squared;
        self.absolute += other.absolute;
        self.count += other.count;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn finish(&self) -> RecResult<ErrorMetrics> {
        if self.count == 0 {
            return Err(RecError::EmptyDataset(
                "cannot compute error metrics over zero observations".to_string(),
            ));
        }

        let n = self.count as f64;
        let mse = self.squared / n;
        Ok(ErrorMetrics {
            rmse: mse.sqrt(),
            mae: self.absolute / n,
            mse,
            count: self.count,
        })
    }
}

impl Extend<(f64, f64)> for ErrorAccumulator {
    fn extend<I: IntoIterator<Item = (f64, f64)>>(&mut self, iter: I) {
        for (actual, predicted) in iter {
            self.push(actual, predicted);
        }
    }
}

/// RMSE, MAE and MSE over `(actual, predicted)` pairs.
pub fn validation_metrics<I>(pairs: I) -> RecResult<ErrorMetrics>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut acc = ErrorAccumulator::new();
    acc.extend(pairs);
    acc.finish()
}
