//! Weight initialization helpers

use aprender::autograd::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Initialize a weight tensor from a normal distribution
///
/// Uses the Box-Muller transform over `StdRng` so that a provided seed makes
/// initialization fully reproducible.
///
/// # Arguments
/// * `rows` - First dimension of the weight
/// * `cols` - Second dimension of the weight
/// * `std` - Standard deviation of the distribution
/// * `seed` - Optional random seed (None = non-deterministic)
///
/// # Returns
/// Weight tensor with shape [rows, cols]
pub fn init_normal(rows: usize, cols: usize, std: f32, seed: Option<u64>) -> Tensor {
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let data: Vec<f32> = (0..rows * cols)
        .map(|_| {
            let u1: f32 = rng.gen_range(0.0001_f32..1.0_f32);
            let u2: f32 = rng.gen_range(0.0_f32..1.0_f32);
            let z = (-2.0_f32 * u1.ln()).sqrt() * (2.0_f32 * std::f32::consts::PI * u2).cos();
            std * z
        })
        .collect();

    Tensor::new(&data, &[rows, cols])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_normal_shape() {
        let weight = init_normal(20, 10, 0.02, Some(42));
        assert_eq!(weight.shape(), &[20, 10]);
    }

    #[test]
    fn test_init_normal_reproducible() {
        let a = init_normal(20, 10, 0.02, Some(123));
        let b = init_normal(20, 10, 0.02, Some(123));
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_init_normal_std() {
        let std = 0.02;
        let weight = init_normal(200, 100, std, Some(42));

        let data = weight.data();
        let mean: f32 = data.iter().sum::<f32>() / data.len() as f32;
        let variance: f32 =
            data.iter().map(|&x| (x - mean).powi(2)).sum::<f32>() / data.len() as f32;

        // 20% tolerance for statistical variation
        assert!((variance.sqrt() - std).abs() < std * 0.2);
    }
}
