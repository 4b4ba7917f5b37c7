//! Integration tests for the model forward paths

use afinar_model::{CausalLM, KVCache, ModelConfig};
use aprender::autograd::Tensor;

fn tiny_config() -> ModelConfig {
    ModelConfig {
        sequence_len: 32,
        vocab_size: 128,
        n_layer: 2,
        n_head: 4,
        n_kv_head: 2,
        n_embd: 16,
        intermediate_size: 32,
        rope_theta: 10000.0,
        dropout: Some(0.0),
        seed: Some(42),
    }
}

fn token_tensor(ids: &[u32]) -> Tensor {
    let data: Vec<f32> = ids.iter().map(|&id| id as f32).collect();
    Tensor::new(&data, &[1, ids.len()])
}

#[test]
fn test_logits_shape_matches_vocab() {
    let model = CausalLM::new(tiny_config()).unwrap();
    let ids = token_tensor(&[1, 2, 3, 4, 5]);

    let logits = model.forward(&ids, None, None).unwrap();
    assert_eq!(logits.shape(), &[1, 5, 128]);
}

#[test]
fn test_batch_forward() {
    let model = CausalLM::new(tiny_config()).unwrap();
    let ids = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);

    let logits = model.forward(&ids, None, None).unwrap();
    assert_eq!(logits.shape(), &[2, 3, 128]);
}

#[test]
fn test_forward_is_deterministic_without_dropout() {
    let mut model = CausalLM::new(tiny_config()).unwrap();
    model.set_training(false);
    let ids = token_tensor(&[7, 8, 9]);

    let logits_a = model.forward(&ids, None, None).unwrap();
    let logits_b = model.forward(&ids, None, None).unwrap();
    assert_eq!(logits_a.data(), logits_b.data());
}

#[test]
fn test_cached_decoding_matches_full_forward() {
    let mut model = CausalLM::new(tiny_config()).unwrap();
    model.set_training(false);

    // Full forward over the whole sequence
    let full = model.forward(&token_tensor(&[3, 1, 4, 1]), None, None).unwrap();
    let vocab = full.shape()[2];
    let full_last = &full.data()[3 * vocab..4 * vocab];

    // Prefill three tokens, then decode the fourth through the cache
    let mut cache = KVCache::new();
    model
        .forward_cache(&token_tensor(&[3, 1, 4]), Some(&mut cache), None)
        .unwrap();
    let step = model
        .forward_cache(&token_tensor(&[1]), Some(&mut cache), None)
        .unwrap();
    let step_last = &step.data()[..vocab];

    for (a, b) in full_last.iter().zip(step_last.iter()) {
        assert!((a - b).abs() < 1e-3, "cached logits diverge: {} vs {}", a, b);
    }
}

#[test]
fn test_training_loss_is_positive_scalar() {
    let model = CausalLM::new(tiny_config()).unwrap();
    let ids = token_tensor(&[1, 2, 3, 4]);
    let targets = token_tensor(&[2, 3, 4, 5]);

    let loss = model.forward_training(&ids, &targets, None).unwrap();
    assert!(loss.item().is_finite());
    assert!(loss.item() > 0.0);
}

#[test]
fn test_sequence_longer_than_rope_fails() {
    let config = ModelConfig {
        sequence_len: 4,
        ..tiny_config()
    };
    let model = CausalLM::new(config).unwrap();
    let ids = token_tensor(&[1, 2, 3, 4, 5, 6]);

    assert!(model.forward(&ids, None, None).is_err());
}
