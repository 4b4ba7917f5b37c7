//! Post-training inference helper

use afinar_lora::LoraModel;
use afinar_model::KVCache;
use afinar_tokenizer::{Message, Tokenizer};
use anyhow::{Context, Result};
use aprender::autograd::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Sampling parameters for generation
#[derive(Debug, Clone)]
pub struct SamplingParams {
    /// Maximum tokens to generate
    pub max_new_tokens: usize,
    /// Softmax temperature (higher = more variance)
    pub temperature: f32,
    /// Nucleus sampling probability mass
    pub top_p: f32,
    /// Optional RNG seed (None = non-deterministic sampling)
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 128,
            temperature: 1.5,
            top_p: 0.9,
            seed: None,
        }
    }
}

fn token_tensor(ids: &[u32]) -> Tensor {
    let data: Vec<f32> = ids.iter().map(|&id| id as f32).collect();
    Tensor::new(&data, &[1, ids.len()])
}

/// Sample a token from the last position's logits with temperature and top-p
fn sample_top_p(logits: &[f32], temperature: f32, top_p: f32, rng: &mut StdRng) -> u32 {
    // Temperature-scaled softmax
    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let mut probs: Vec<(usize, f32)> = logits
        .iter()
        .enumerate()
        .map(|(idx, &l)| (idx, ((l - max_logit) / temperature).exp()))
        .collect();
    let sum: f32 = probs.iter().map(|(_, p)| p).sum();
    for (_, p) in probs.iter_mut() {
        *p /= sum;
    }

    // Keep the smallest set of tokens whose mass reaches top_p
    probs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut cumulative = 0.0;
    let mut cutoff = probs.len();
    for (i, (_, p)) in probs.iter().enumerate() {
        cumulative += p;
        if cumulative >= top_p {
            cutoff = i + 1;
            break;
        }
    }
    probs.truncate(cutoff);

    let mass: f32 = probs.iter().map(|(_, p)| p).sum();
    let mut draw = rng.gen_range(0.0..1.0) * mass;
    for (idx, p) in &probs {
        draw -= p;
        if draw <= 0.0 {
            return *idx as u32;
        }
    }
    probs.last().map(|(idx, _)| *idx as u32).unwrap_or(0)
}

/// Generate a sampled continuation for one free-text prompt
///
/// Builds a single-turn chat history, applies the chat template with a
/// generation prompt, and samples through the KV cache. The model must be
/// in evaluation mode. The decoded output includes the echoed prompt.
pub fn run_inference(
    model: &LoraModel,
    tokenizer: &Tokenizer,
    prompt: &str,
    params: &SamplingParams,
) -> Result<String> {
    let messages = [Message::user(prompt)];
    let prompt_ids = tokenizer
        .apply_chat_template(&messages, true)
        .context("Failed to encode prompt")?;
    if prompt_ids.is_empty() {
        return Ok(String::new());
    }

    let mut rng = match params.seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };

    let mut ids = prompt_ids;
    let mut cache = KVCache::new();

    // Prefill the cache with the whole prompt
    let mut logits = model
        .forward_cache(&token_tensor(&ids), Some(&mut cache))
        .context("Prompt prefill failed")?;

    for _ in 0..params.max_new_tokens {
        let shape = logits.shape().to_vec();
        let vocab = shape[2];
        let data = logits.data();
        let last = &data[(shape[1] - 1) * vocab..shape[1] * vocab];

        let next = sample_top_p(last, params.temperature, params.top_p, &mut rng);
        ids.push(next);

        logits = model
            .forward_cache(&token_tensor(&[next]), Some(&mut cache))
            .context("Generation step failed")?;
    }

    tokenizer.decode(&ids).context("Failed to decode generated tokens")
}
