//! Low-rank adapter layer

use crate::config::LoraConfig;
use afinar_model::init::init_normal;
use aprender::autograd::Tensor;
use aprender::nn::Dropout;

/// Multiply rows of `x` by `w` transposed: [n, in] @ [out, in]^T -> [n, out]
///
/// `x` may carry leading batch dimensions; only the last dimension must
/// match `w`'s input width.
fn matmul_t(x: &Tensor, w: &Tensor) -> Tensor {
    let x_shape = x.shape();
    let in_features = *x_shape.last().expect("input tensor must not be 0-dimensional");
    let out_features = w.shape()[0];
    let rows = x.data().len() / in_features;

    let x_data = x.data();
    let w_data = w.data();
    let mut out = vec![0.0; rows * out_features];

    for i in 0..rows {
        for o in 0..out_features {
            let mut sum = 0.0;
            for j in 0..in_features {
                sum += x_data[i * in_features + j] * w_data[o * in_features + j];
            }
            out[i * out_features + o] = sum;
        }
    }

    let mut out_shape = x_shape.to_vec();
    *out_shape.last_mut().unwrap() = out_features;
    Tensor::new(&out, &out_shape)
}

/// One pair of low-rank matrices adapting a single projection
///
/// The delta applied on top of the frozen base projection is
/// `(alpha / r) * B(A(dropout(x)))`, with A initialized from a small normal
/// distribution and B initialized to zero so the wrapped model starts out
/// identical to the base model.
pub struct LoraLayer {
    /// Down projection A: [r, in_features]
    a: Tensor,
    /// Up projection B: [out_features, r], zero-initialized
    b: Tensor,
    scaling: f32,
    dropout: Option<Dropout>,
    training: bool,
}

impl LoraLayer {
    /// Create an adapter pair for a projection of the given dimensions
    ///
    /// # Arguments
    /// * `in_features` - Projection input width
    /// * `out_features` - Projection output width
    /// * `config` - Adapter configuration (rank, alpha, dropout)
    /// * `seed` - Optional seed for A's initialization
    pub fn new(
        in_features: usize,
        out_features: usize,
        config: &LoraConfig,
        seed: Option<u64>,
    ) -> Self {
        let a = init_normal(config.r, in_features, 1.0 / (in_features as f32).sqrt(), seed);
        let b = Tensor::zeros(&[out_features, config.r]);

        let dropout = match (config.lora_dropout, seed) {
            (p, Some(s)) if p > 0.0 => Some(Dropout::with_seed(p, s)),
            (p, None) if p > 0.0 => Some(Dropout::new(p)),
            _ => None,
        };

        Self {
            a,
            b,
            scaling: config.scaling(),
            dropout,
            training: true,
        }
    }

    /// Compute the adapter delta for a projection input
    ///
    /// # Arguments
    /// * `x` - Projection input [..., in_features]
    ///
    /// # Returns
    /// Delta tensor [..., out_features]
    pub fn delta(&self, x: &Tensor) -> Tensor {
        let x = match (&self.dropout, self.training) {
            (Some(dropout), true) => dropout.forward(x),
            _ => x.clone(),
        };

        let hidden = matmul_t(&x, &self.a);
        let up = matmul_t(&hidden, &self.b);

        let data: Vec<f32> = up.data().iter().map(|&v| v * self.scaling).collect();
        Tensor::new(&data, up.shape())
    }

    /// Set training mode (governs adapter dropout)
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
        if let Some(ref mut dropout) = self.dropout {
            if training {
                dropout.train();
            } else {
                dropout.eval();
            }
        }
    }

    /// Trainable tensors (A and B)
    pub fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.a, &self.b]
    }

    /// Mutable trainable tensors (for the optimizer)
    pub fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.a, &mut self.b]
    }

    /// Number of trainable values in this adapter pair
    pub fn num_parameters(&self) -> usize {
        self.a.data().len() + self.b.data().len()
    }
}
