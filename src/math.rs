//! Numeric primitives shared by every model.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::distributions::Distribution;
use rand::Rng;

/// The logistic function `1 / (1 + e^-x)`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Evaluates the derivative of the sigmoid at `x = sigmoid^{-1}(y)`.
///
/// Note that this function takes in the *output* of the sigmoid, rather than
/// the input. This means we don't have to store the pre-activation sums
/// during the forward pass.
#[inline]
pub fn sigmoid_prime(y: f64) -> f64 {
    y * (1.0 - y)
}

/// Returns a `rows x cols` matrix of independent draws from `distribution`.
pub fn random_matrix<D, R>(
    distribution: D,
    rows: usize,
    cols: usize,
    rng: &mut R,
) -> Array2<f64>
where
    D: Distribution<f64>,
    R: Rng + ?Sized,
{
    Array2::from_shape_fn((rows, cols), |_| distribution.sample(rng))
}

/// Returns `sum_k (a_k - b_k)^2`.
pub fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Returns the index of the largest element. Ties resolve to the first
/// occurrence; an empty vector yields 0.
pub fn argmax(values: ArrayView1<f64>) -> usize {
    let mut best = 0;
    let mut max = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > max {
            best = i;
            max = v;
        }
    }
    best
}

/// Draws `num_samples` rows of `data` uniformly with replacement.
///
/// The subset is capped at the number of rows in `data`.
pub fn random_subset<R>(
    data: ArrayView2<f64>,
    num_samples: usize,
    rng: &mut R,
) -> Array2<f64>
where
    R: Rng + ?Sized,
{
    let rows = data.nrows();
    let num_samples = num_samples.min(rows);
    let indices: Vec<usize> =
        (0..num_samples).map(|_| rng.gen_range(0..rows)).collect();
    data.select(Axis(0), &indices)
}

/// Returns a copy of the binary vector `x` with `bit` set to `1 - x[bit]`.
pub fn flip(x: ArrayView1<f64>, bit: usize) -> ndarray::Array1<f64> {
    let mut y = x.to_owned();
    y[bit] = 1.0 - x[bit];
    y
}
