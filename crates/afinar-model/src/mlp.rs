//! SwiGLU MLP with named projections

use crate::config::ModelConfig;
use crate::delta::{apply_delta, ProjectionDelta};
use anyhow::Result;
use aprender::autograd::Tensor;
use aprender::nn::{Linear, Module};

/// SiLU activation: x * sigmoid(x)
fn silu(x: &Tensor) -> Tensor {
    let data: Vec<f32> = x.data().iter().map(|&v| v / (1.0 + (-v).exp())).collect();
    Tensor::new(&data, x.shape())
}

/// Elementwise product of two same-shape tensors
fn hadamard(a: &Tensor, b: &Tensor) -> Tensor {
    let data: Vec<f32> = a
        .data()
        .iter()
        .zip(b.data().iter())
        .map(|(&x, &y)| x * y)
        .collect();
    Tensor::new(&data, a.shape())
}

/// Gated MLP
///
/// Projections are named `gate_proj`, `up_proj`, `down_proj`; each output
/// passes through the adapter delta hook before use:
/// `down(silu(gate(x)) * up(x))`.
pub struct Mlp {
    /// Gate projection: n_embd -> intermediate_size
    gate_proj: Linear,
    /// Up projection: n_embd -> intermediate_size
    up_proj: Linear,
    /// Down projection: intermediate_size -> n_embd
    down_proj: Linear,
}

impl Mlp {
    /// Create a new MLP from the model configuration
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            gate_proj: Linear::new(config.n_embd, config.intermediate_size),
            up_proj: Linear::new(config.n_embd, config.intermediate_size),
            down_proj: Linear::new(config.intermediate_size, config.n_embd),
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `x` - Input tensor [batch, seq_len, n_embd]
    /// * `layer_idx` - Layer index for the delta hook
    /// * `hook` - Optional adapter delta hook
    ///
    /// # Returns
    /// Output tensor [batch, seq_len, n_embd]
    pub fn forward(
        &self,
        x: &Tensor,
        layer_idx: usize,
        hook: Option<&dyn ProjectionDelta>,
    ) -> Result<Tensor> {
        let gate = apply_delta(hook, layer_idx, "gate_proj", x, self.gate_proj.forward(x));
        let up = apply_delta(hook, layer_idx, "up_proj", x, self.up_proj.forward(x));

        let hidden = hadamard(&silu(&gate), &up);

        Ok(apply_delta(
            hook,
            layer_idx,
            "down_proj",
            &hidden,
            self.down_proj.forward(&hidden),
        ))
    }
}

impl Module for Mlp {
    fn forward(&self, input: &Tensor) -> Tensor {
        self.forward(input, 0, None).expect("MLP forward failed")
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = Vec::new();
        params.extend(self.gate_proj.parameters());
        params.extend(self.up_proj.parameters());
        params.extend(self.down_proj.parameters());
        params
    }

    fn parameters_mut(&mut self) -> Vec<&mut Tensor> {
        let mut params = Vec::new();
        params.extend(self.gate_proj.parameters_mut());
        params.extend(self.up_proj.parameters_mut());
        params.extend(self.down_proj.parameters_mut());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silu_values() {
        let x = Tensor::new(&[0.0, 1.0, -1.0], &[3]);
        let y = silu(&x);
        let data = y.data();
        assert!((data[0] - 0.0).abs() < 1e-6);
        assert!((data[1] - 0.731_058_6).abs() < 1e-4);
        assert!((data[2] + 0.268_941_4).abs() < 1e-4);
    }

    #[test]
    fn test_mlp_forward_shape() {
        let config = ModelConfig {
            n_embd: 16,
            intermediate_size: 32,
            ..Default::default()
        };
        let mlp = Mlp::new(&config);
        let x = Tensor::ones(&[1, 4, 16]);

        let out = mlp.forward(&x, 0, None).unwrap();
        assert_eq!(out.shape(), &[1, 4, 16]);
    }

    #[test]
    fn test_mlp_output_finite() {
        let config = ModelConfig {
            n_embd: 8,
            intermediate_size: 16,
            ..Default::default()
        };
        let mlp = Mlp::new(&config);
        let x = Tensor::new(&[-2.0; 8], &[1, 1, 8]);

        let out = mlp.forward(&x, 0, None).unwrap();
        assert!(!out.data().iter().any(|v| v.is_nan() || v.is_infinite()));
    }
}
