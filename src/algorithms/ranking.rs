use crate::utils::cosine_similarity;
use ndarray::Array2;
use std::cmp::Ordering;

/// Orders by score descending; equal scores fall back to ascending id.
pub fn compare_scored(a: &(usize, f64), b: &(usize, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

pub fn rank_descending(mut scored: Vec<(usize, f64)>) -> Vec<(usize, f64)> {
    scored.sort_by(compare_scored);
    scored
}

/// The `k` rows most cosine-similar to `row`, excluding `row` itself.
pub fn most_similar_rows(matrix: &Array2<f64>, row: usize, k: usize) -> Vec<(usize, f64)> {
    let query = matrix.row(row);
    let scored = matrix
        .outer_iter()
        .enumerate()
        .filter(|(other, _)| *other != row)
        .map(|(other, candidate)| (other, cosine_similarity(query, candidate)))
        .collect();

    let mut ranked = rank_descending(scored);
    ranked.truncate(k);
    ranked
}

/// Rows with the largest and the smallest values in column `col`.
pub fn column_extremes(matrix: &Array2<f64>, col: usize, k: usize) -> (Vec<(usize, f64)>, Vec<(usize, f64)>) {
    let column: Vec<(usize, f64)> = matrix.column(col).iter().copied().enumerate().collect();
    let ranked = rank_descending(column);

    let top = ranked.iter().take(k).copied().collect();
    let bottom = ranked.iter().rev().take(k).copied().collect();
    (top, bottom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_rank_descending_breaks_ties_by_id() {
        let ranked = rank_descending(vec![(3, 0.5), (1, 0.9), (0, 0.5), (2, 0.1)]);
        assert_eq!(ranked, vec![(1, 0.9), (0, 0.5), (3, 0.5), (2, 0.1)]);
    }

    #[test]
    fn test_most_similar_rows() {
        let m = array![[1.0, 0.0], [0.9, 0.1], [0.0, 1.0], [-1.0, 0.0]];
        let similar = most_similar_rows(&m, 0, 2);
        assert_eq!(similar.len(), 2);
        assert_eq!(similar[0].0, 1);
        assert_eq!(similar[1].0, 2);
    }

    #[test]
    fn test_column_extremes() {
        let m = array![[0.3, 1.0], [-0.7, 2.0], [0.9, 3.0]];
        let (top, bottom) = column_extremes(&m, 0, 1);
        assert_eq!(top, vec![(2, 0.9)]);
        assert_eq!(bottom, vec![(1, -0.7)]);
    }
}
