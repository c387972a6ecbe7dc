//! Orthogonal initialization for linear layers.
//!
//! # Theory
//!
//! An orthogonal weight matrix has all singular values equal to one, so it
//! preserves the norm of its input and its gradient. Scaling by a gain `g`
//! compensates for the contraction of the following activation:
//!
//! - `√2` for hidden layers followed by ELU / ReLU
//! - `0.01` for the policy mean head (near-zero initial actions)
//! - `1.0` for value heads
//!
//! Biases start at zero.

use burn::module::Param;
use burn::nn::{Linear, LinearConfig};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Tensor, TensorData};

/// Gain for hidden layers followed by a rectifying activation.
pub const HIDDEN_GAIN: f64 = std::f64::consts::SQRT_2;
/// Gain for the policy mean head.
pub const POLICY_HEAD_GAIN: f64 = 0.01;
/// Gain for value heads.
pub const VALUE_HEAD_GAIN: f64 = 1.0;

const NORM_FLOOR: f32 = 1e-10;

/// A `[rows, cols]` matrix whose shorter side is orthonormal, times `gain`.
///
/// Tall matrices get orthonormal columns, wide matrices orthonormal rows.
pub fn orthogonal_matrix<B: Backend>(
    rows: usize,
    cols: usize,
    gain: f64,
    device: &B::Device,
) -> Tensor<B, 2> {
    // Orthonormalize `k` vectors of length `n`, then lay them out.
    let (k, n) = (rows.min(cols), rows.max(cols));
    let mut vectors = random_vectors::<B>(k, n, device);
    modified_gram_schmidt(&mut vectors, n);

    let gain = gain as f32;
    let mut data = vec![0.0f32; rows * cols];
    for (i, v) in vectors.chunks_exact(n).enumerate() {
        for (j, &x) in v.iter().enumerate() {
            let (r, c) = if rows >= cols { (j, i) } else { (i, j) };
            data[r * cols + c] = x * gain;
        }
    }

    Tensor::from_data(TensorData::new(data, [rows, cols]), device)
}

fn random_vectors<B: Backend>(k: usize, n: usize, device: &B::Device) -> Vec<f32> {
    Tensor::<B, 2>::random([k, n], Distribution::Normal(0.0, 1.0), device)
        .into_data()
        .iter::<f32>()
        .collect()
}

/// In-place orthonormalization of the rows of a row-major `[k, n]` buffer.
fn modified_gram_schmidt(vectors: &mut [f32], n: usize) {
    let k = vectors.len() / n;
    for i in 0..k {
        let (done, rest) = vectors.split_at_mut(i * n);
        let current = &mut rest[..n];

        for basis in done.chunks_exact(n) {
            let projection: f32 = current.iter().zip(basis).map(|(a, b)| a * b).sum();
            for (a, b) in current.iter_mut().zip(basis) {
                *a -= projection * b;
            }
        }

        let norm = current.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > NORM_FLOOR {
            current.iter_mut().for_each(|x| *x /= norm);
        } else {
            // Degenerate draw: fall back to the first unused axis.
            current.iter_mut().for_each(|x| *x = 0.0);
            current[i % n] = 1.0;
        }
    }
}

/// A burn [`Linear`] with orthogonal weights scaled by `gain` and zero bias.
pub fn orthogonal_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    gain: f64,
    device: &B::Device,
) -> Linear<B> {
    let mut linear = LinearConfig::new(d_input, d_output).init(device);
    // Linear stores its weight as [d_input, d_output].
    linear.weight = Param::from_tensor(orthogonal_matrix(d_input, d_output, gain, device));
    linear.bias = Some(Param::from_tensor(Tensor::zeros([d_output], device)));
    linear
}
