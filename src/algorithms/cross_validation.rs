//! k-fold cross-validation over one user's ratings.
//!
//! Folds are contiguous blocks of `len / folds` ratings taken in the order the
//! ratings were supplied; the ratings are not shuffled first. A remainder that
//! does not fill a whole fold is only ever used for training.

use crate::error::{RecError, RecResult};
use crate::models::ItemRating;
use crate::utils::metrics::{ErrorAccumulator, ErrorMetrics};
use serde::{Deserialize, Serialize};
use std::ops::Range;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationReport {
    pub folds: usize,
    pub per_fold: Vec<ErrorMetrics>,
    /// Pooled over every held-out rating of every fold.
    pub overall: ErrorMetrics,
}

/// Held-out index range of each fold.
pub fn fold_ranges(len: usize, folds: usize) -> RecResult<Vec<Range<usize>>> {
    if folds < 2 {
        return Err(RecError::InvalidInput(format!(
            "Cross-validation needs at least 2 folds, got {}",
            folds
        )));
    }

    let fold_size = len / folds;
    if fold_size == 0 {
        return Err(RecError::EmptyDataset(format!(
            "{} ratings cannot fill {} folds",
            len, folds
        )));
    }

    Ok((0..folds)
        .map(|i| i * fold_size..(i + 1) * fold_size)
        .collect())
}

/// Runs `fit_and_score(train, test)` once per fold and pools the errors.
pub fn k_fold<F>(ratings: &[ItemRating], folds: usize, mut fit_and_score: F) -> RecResult<CrossValidationReport>
where
    F: FnMut(&[ItemRating], &[ItemRating]) -> RecResult<ErrorAccumulator>,
{
    let ranges = fold_ranges(ratings.len(), folds)?;
    let mut overall = ErrorAccumulator::new();
    let mut per_fold = Vec::with_capacity(folds);
    let mut train = Vec::with_capacity(ratings.len());

    for range in ranges {
        train.clear();
        train.extend_from_slice(&ratings[..range.start]);
        train.extend_from_slice(&ratings[range.end..]);

        let fold = fit_and_score(&train, &ratings[range])?;
        per_fold.push(fold.finish()?);
        overall.merge(&fold);
    }

    Ok(CrossValidationReport {
        folds,
        per_fold,
        overall: overall.finish()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratings(values: &[f64]) -> Vec<ItemRating> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| ItemRating::new(i, v))
            .collect()
    }

    #[test]
    fn test_fold_ranges() {
        assert_eq!(fold_ranges(10, 3).unwrap(), vec![0..3, 3..6, 6..9]);
        assert!(matches!(fold_ranges(3, 1), Err(RecError::InvalidInput(_))));
        assert!(matches!(fold_ranges(3, 4), Err(RecError::EmptyDataset(_))));
    }

    #[test]
    fn test_folds_are_contiguous_in_given_order() {
        let data = ratings(&[8.0, 6.0, 9.0, 5.0]);
        let mut seen = Vec::new();

        k_fold(&data, 2, |train, test| {
            seen.push((
                train.iter().map(|r| r.item).collect::<Vec<_>>(),
                test.iter().map(|r| r.item).collect::<Vec<_>>(),
            ));
            let mut acc = ErrorAccumulator::new();
            for r in test {
                acc.push(r.value, r.value);
            }
            Ok(acc)
        })
        .unwrap();

        assert_eq!(seen, vec![(vec![2, 3], vec![0, 1]), (vec![0, 1], vec![2, 3])]);
    }

    #[test]
    fn test_remainder_only_trains() {
        let data = ratings(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut tested = 0;

        let report = k_fold(&data, 2, |train, test| {
            assert!(train.iter().any(|r| r.item == 4));
            tested += test.len();
            let mut acc = ErrorAccumulator::new();
            for r in test {
                acc.push(r.value, 0.0);
            }
            Ok(acc)
        })
        .unwrap();

        assert_eq!(tested, 4);
        assert_eq!(report.overall.count, 4);
        assert!((report.overall.mae - 2.5).abs() < 1e-12);
    }
}
