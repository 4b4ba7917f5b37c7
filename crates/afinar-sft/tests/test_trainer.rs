//! End-to-end trainer tests over a tiny model and a one-record dataset

use afinar_lora::{LoraConfig, LoraModel, ModelStage};
use afinar_model::{checkpoint, CausalLM, ModelConfig};
use afinar_sft::{load_dataset, SftConfig, SftTrainer, TrainStats, TrainingArguments};
use afinar_tokenizer::Tokenizer;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const RECORD: &str = r#"{"conversations": [{"from": "system", "value": "Respond briefly"}, {"from": "human", "value": "Name a color"}, {"from": "gpt", "value": "Blue"}]}"#;

fn tiny_config() -> ModelConfig {
    ModelConfig {
        sequence_len: 64,
        vocab_size: 512,
        n_layer: 1,
        n_head: 2,
        n_kv_head: 2,
        n_embd: 8,
        intermediate_size: 16,
        rope_theta: 10000.0,
        dropout: Some(0.0),
        seed: Some(3407),
    }
}

/// Tokenizer whose vocabulary covers the rendered template text
fn build_tokenizer(texts: &[String]) -> Tokenizer {
    let mut corpus: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
    for _ in 0..4 {
        corpus.extend(texts.iter().map(|s| s.as_str()));
    }
    Tokenizer::train_from_iterator(corpus.iter(), 500)
        .expect("Failed to train test tokenizer")
        .with_max_length(32)
}

fn write_dataset(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("data.jsonl");
    fs::write(&path, RECORD).unwrap();
    path
}

fn train_once(base_dir: &Path, texts: &[String], tokenizer: &Tokenizer, output_dir: &Path) -> (TrainStats, LoraModel) {
    let base = checkpoint::from_pretrained(base_dir).unwrap();
    let model = LoraModel::wrap(base, LoraConfig { r: 2, ..Default::default() }).unwrap();

    let args = TrainingArguments {
        output_dir: output_dir.to_path_buf(),
        per_device_train_batch_size: 2,
        gradient_accumulation_steps: 2,
        warmup_steps: 1,
        num_train_epochs: 2,
        ..Default::default()
    };
    let config = SftConfig::new(32, false).merge(&args);

    let mut trainer = SftTrainer::new(model, texts, tokenizer, config).unwrap();
    let stats = trainer.train().unwrap();
    (stats, trainer.into_model())
}

#[test]
fn test_training_runs_and_records_stats() {
    let dir = TempDir::new().unwrap();
    let base_dir = dir.path().join("base");
    checkpoint::save_pretrained(&CausalLM::new(tiny_config()).unwrap(), &base_dir).unwrap();

    let data_path = write_dataset(dir.path());
    let texts = load_dataset(&data_path).unwrap();
    let tokenizer = build_tokenizer(&texts);

    let output_dir = dir.path().join("outputs");
    let (stats, model) = train_once(&base_dir, &texts, &tokenizer, &output_dir);

    assert!(stats.train_steps > 0);
    assert!(stats.final_loss.is_finite());
    assert!(stats.train_runtime >= 0.0);
    assert!(output_dir.join("trainer_state.json").exists());
    assert_eq!(model.stage(), ModelStage::Trained);
}

#[test]
fn test_same_seed_reaches_close_loss() {
    let dir = TempDir::new().unwrap();
    let base_dir = dir.path().join("base");
    checkpoint::save_pretrained(&CausalLM::new(tiny_config()).unwrap(), &base_dir).unwrap();

    let data_path = write_dataset(dir.path());
    let texts = load_dataset(&data_path).unwrap();
    let tokenizer = build_tokenizer(&texts);

    let (stats_a, _) = train_once(&base_dir, &texts, &tokenizer, &dir.path().join("out_a"));
    let (stats_b, _) = train_once(&base_dir, &texts, &tokenizer, &dir.path().join("out_b"));

    // Identical seed and hyperparameters over the same base weights: the two
    // runs must land numerically close, if not bit-identical.
    assert!(
        (stats_a.final_loss - stats_b.final_loss).abs() < 1e-3,
        "losses diverged: {} vs {}",
        stats_a.final_loss,
        stats_b.final_loss
    );
}

#[test]
fn test_persist_after_training_produces_full_artifact_directory() {
    let dir = TempDir::new().unwrap();
    let base_dir = dir.path().join("base");
    checkpoint::save_pretrained(&CausalLM::new(tiny_config()).unwrap(), &base_dir).unwrap();

    let data_path = write_dataset(dir.path());
    let texts = load_dataset(&data_path).unwrap();
    let tokenizer = build_tokenizer(&texts);

    let (_, mut model) = train_once(&base_dir, &texts, &tokenizer, &dir.path().join("outputs"));
    model.eval();

    // The artifact directory does not exist beforehand
    let model_dir = dir.path().join("model");
    model.save_pretrained(&model_dir).unwrap();
    tokenizer.save(&model_dir).unwrap();

    assert!(model_dir.join("adapter_model.safetensors").exists());
    assert!(model_dir.join("adapter_config.json").exists());
    assert!(model_dir.join("tokenizer.json").exists());
    assert!(model_dir.join("tokenizer_config.json").exists());
}

#[test]
fn test_packing_is_rejected() {
    let dir = TempDir::new().unwrap();
    let base_dir = dir.path().join("base");
    checkpoint::save_pretrained(&CausalLM::new(tiny_config()).unwrap(), &base_dir).unwrap();

    let texts = vec!["some text".to_string()];
    let tokenizer = build_tokenizer(&texts);

    let base = checkpoint::from_pretrained(&base_dir).unwrap();
    let model = LoraModel::wrap(base, LoraConfig::default()).unwrap();
    let config = SftConfig::new(32, true);

    assert!(SftTrainer::new(model, &texts, &tokenizer, config).is_err());
}
