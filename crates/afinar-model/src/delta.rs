//! Hook seam for adapter deltas on named projection layers

use aprender::autograd::Tensor;

/// Additive adjustment applied to the output of a named projection layer
///
/// The transformer calls this hook after every named projection
/// (`q_proj`, `k_proj`, `v_proj`, `o_proj`, `gate_proj`, `up_proj`,
/// `down_proj`) with the projection's input and layer index. Implementors
/// return the delta to add, or `None` when the projection carries no
/// adapter.
pub trait ProjectionDelta {
    /// Compute the delta for `name` in layer `layer_idx` given the
    /// projection input, or `None` when this projection is not adapted.
    fn delta(&self, layer_idx: usize, name: &str, input: &Tensor) -> Option<Tensor>;
}

/// Apply an optional delta hook to a projection output
pub fn apply_delta(
    hook: Option<&dyn ProjectionDelta>,
    layer_idx: usize,
    name: &str,
    input: &Tensor,
    output: Tensor,
) -> Tensor {
    match hook.and_then(|h| h.delta(layer_idx, name, input)) {
        Some(delta) => output.add(&delta),
        None => output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Shift(f32);

    impl ProjectionDelta for Shift {
        fn delta(&self, _layer_idx: usize, name: &str, input: &Tensor) -> Option<Tensor> {
            if name != "q_proj" {
                return None;
            }
            let data: Vec<f32> = input.data().iter().map(|_| self.0).collect();
            Some(Tensor::new(&data, input.shape()))
        }
    }

    #[test]
    fn test_apply_delta_none_hook() {
        let x = Tensor::ones(&[2, 2]);
        let out = apply_delta(None, 0, "q_proj", &x, x.clone());
        assert_eq!(out.data(), x.data());
    }

    #[test]
    fn test_apply_delta_unadapted_name() {
        let hook = Shift(1.0);
        let x = Tensor::ones(&[2, 2]);
        let out = apply_delta(Some(&hook), 0, "k_proj", &x, x.clone());
        assert_eq!(out.data(), x.data());
    }

    #[test]
    fn test_apply_delta_adds() {
        let hook = Shift(1.0);
        let x = Tensor::ones(&[2, 2]);
        let out = apply_delta(Some(&hook), 0, "q_proj", &x, x.clone());
        for &v in out.data().iter() {
            assert!((v - 2.0).abs() < 1e-6);
        }
    }
}
