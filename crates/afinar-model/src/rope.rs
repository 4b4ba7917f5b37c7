//! Rotary Position Embeddings (RoPE)

use anyhow::Result;
use aprender::autograd::Tensor;

/// Precompute rotary cos/sin frequencies
///
/// # Arguments
/// * `seq_len` - Maximum sequence length to precompute
/// * `head_dim` - Dimension of each attention head (must be even)
/// * `base` - Base frequency (`rope_theta` from the model configuration)
///
/// # Returns
/// Tuple of (cos, sin) tensors with shape [1, seq_len, 1, head_dim/2]
pub fn precompute_rotary_embeddings(
    seq_len: usize,
    head_dim: usize,
    base: f32,
) -> Result<(Tensor, Tensor)> {
    if !head_dim.is_multiple_of(2) {
        anyhow::bail!("head_dim must be even for RoPE, got {}", head_dim);
    }

    let half_dim = head_dim / 2;
    let inv_freq: Vec<f32> = (0..half_dim)
        .map(|i| 1.0 / base.powf(2.0 * i as f32 / head_dim as f32))
        .collect();

    let mut cos_data = Vec::with_capacity(seq_len * half_dim);
    let mut sin_data = Vec::with_capacity(seq_len * half_dim);

    for pos in 0..seq_len {
        for &freq in &inv_freq {
            let angle = pos as f32 * freq;
            cos_data.push(angle.cos());
            sin_data.push(angle.sin());
        }
    }

    let cos = Tensor::new(&cos_data, &[1, seq_len, 1, half_dim]);
    let sin = Tensor::new(&sin_data, &[1, seq_len, 1, half_dim]);

    Ok((cos, sin))
}

/// Apply rotary embeddings to queries or keys
///
/// Splits the last dimension into halves and rotates pairs:
/// `y1 = x1 * cos + x2 * sin`, `y2 = -x1 * sin + x2 * cos`.
///
/// # Arguments
/// * `x` - Input tensor of shape [batch, n_heads, seq_len, head_dim]
/// * `cos` - Cosine frequencies [1, seq_len, 1, head_dim/2]
/// * `sin` - Sine frequencies [1, seq_len, 1, head_dim/2]
///
/// # Returns
/// Tensor with rotary embeddings applied, same shape as the input
pub fn apply_rotary_emb(x: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
    let shape = x.shape();
    if shape.len() != 4 {
        anyhow::bail!("Expected 4D tensor for RoPE, got shape {:?}", shape);
    }

    let (batch, heads, seq_len, head_dim) = (shape[0], shape[1], shape[2], shape[3]);
    let half_dim = head_dim / 2;

    let cos_len = cos.shape()[1];
    if seq_len > cos_len {
        anyhow::bail!(
            "Sequence length {} exceeds precomputed RoPE length {}",
            seq_len,
            cos_len
        );
    }

    let x_data = x.data();
    let cos_data = cos.data();
    let sin_data = sin.data();
    let mut output = vec![0.0; x_data.len()];

    for b in 0..batch {
        for h in 0..heads {
            for s in 0..seq_len {
                let base = b * heads * seq_len * head_dim + h * seq_len * head_dim + s * head_dim;
                for d in 0..half_dim {
                    let c = cos_data[s * half_dim + d];
                    let sn = sin_data[s * half_dim + d];
                    let x1 = x_data[base + d];
                    let x2 = x_data[base + half_dim + d];
                    output[base + d] = x1 * c + x2 * sn;
                    output[base + half_dim + d] = -x1 * sn + x2 * c;
                }
            }
        }
    }

    Ok(Tensor::new(&output, shape))
}
