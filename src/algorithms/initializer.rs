use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// Seeded generator when a seed is given, entropy-seeded otherwise.
pub fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// One draw from N(mean, std_dev) via the Box-Muller transform.
pub fn normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    // u1 in (0, 1] keeps ln finite
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    let z0 = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    z0 * std_dev + mean
}

pub fn normal_vector<R: Rng + ?Sized>(rng: &mut R, size: usize, mean: f64, std_dev: f64) -> Array1<f64> {
    Array1::from_shape_fn(size, |_| normal(&mut *rng, mean, std_dev))
}

pub fn normal_matrix<R: Rng + ?Sized>(
    rng: &mut R,
    rows: usize,
    cols: usize,
    mean: f64,
    std_dev: f64,
) -> Array2<f64> {
    Array2::from_shape_fn((rows, cols), |_| normal(&mut *rng, mean, std_dev))
}
