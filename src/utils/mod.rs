use ndarray::ArrayView1;

pub mod metrics;
pub mod validation;

pub fn clip(value: f64, lower: f64, upper: f64) -> f64 {
    value.max(lower).min(upper)
}

pub fn cosine_similarity(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product = crate::algorithms::dot(a, b);
    let norm_a = crate::algorithms::dot(a, a).sqrt();
    let norm_b = crate::algorithms::dot(b, b).sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));

    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
