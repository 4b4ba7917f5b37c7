//! BPE tokenizer for afinar
//!
//! Wraps `aprender::text::tokenize::BpeTokenizer` with the pieces the
//! fine-tuning pipeline needs: loading from a pretrained model directory,
//! a configured maximum sequence length and padding side, chat templating,
//! and directory save of both vocabulary and configuration.
//!
//! # Example
//!
//! ```no_run
//! use afinar_tokenizer::Tokenizer;
//!
//! let corpus = ["hello world", "hello rust"];
//! let tokenizer = Tokenizer::train_from_iterator(corpus.iter(), 500)?;
//!
//! let ids = tokenizer.encode("hello world")?;
//! let text = tokenizer.decode(&ids)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod chat;

pub use chat::{apply_chat_template, render_example, Message};

// Re-export the underlying BPE implementation
pub use aprender::text::tokenize::BpeTokenizer;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Vocabulary file name inside a model directory
const TOKENIZER_FILE: &str = "tokenizer.json";
/// Configuration file name inside a model directory
const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Which side of a sequence padding is added to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingSide {
    /// Pad at the start of the sequence
    Left,
    /// Pad at the end of the sequence (training default)
    Right,
}

/// Serialized vocabulary and merge rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerData {
    /// Token to ID mapping
    pub vocabulary: std::collections::HashMap<String, u32>,
    /// BPE merge rules
    pub merges: Vec<(String, String)>,
}

/// Serialized tokenizer configuration
///
/// Kept separate from the vocabulary the same way model weights are kept
/// separate from the model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenizerConfig {
    /// Maximum sequence length
    pub model_max_length: usize,
    /// Padding side
    pub padding_side: PaddingSide,
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            model_max_length: 2048,
            padding_side: PaddingSide::Right,
        }
    }
}

/// Tokenizer combining BPE, length limit, and padding behavior
#[derive(Debug, Clone)]
pub struct Tokenizer {
    bpe: BpeTokenizer,
    config: TokenizerConfig,
}

impl Tokenizer {
    /// Train a new tokenizer from an iterator of text
    ///
    /// # Arguments
    /// * `text_iterator` - Iterator over training text
    /// * `vocab_size` - Target vocabulary size
    pub fn train_from_iterator<I, S>(text_iterator: I, vocab_size: usize) -> Result<Self>
    where
        I: Iterator<Item = S>,
        S: AsRef<str>,
    {
        let corpus_owned: Vec<String> = text_iterator.map(|s| s.as_ref().to_string()).collect();
        let corpus: Vec<&str> = corpus_owned.iter().map(|s| s.as_str()).collect();

        let bpe = BpeTokenizer::train(&corpus, vocab_size)
            .map_err(|e| anyhow::anyhow!("Failed to train BPE tokenizer: {}", e))?;

        Ok(Self {
            bpe,
            config: TokenizerConfig::default(),
        })
    }

    /// Load a tokenizer from a pretrained model directory
    ///
    /// Reads `tokenizer.json`; `tokenizer_config.json` is optional and falls
    /// back to defaults (max length 2048, right padding).
    pub fn from_pretrained<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let tokenizer_file = dir.join(TOKENIZER_FILE);

        let content = fs::read_to_string(&tokenizer_file).with_context(|| {
            format!("Failed to read tokenizer file: {}", tokenizer_file.display())
        })?;
        let data: TokenizerData =
            serde_json::from_str(&content).context("Failed to parse tokenizer JSON")?;

        let bpe = BpeTokenizer::from_vocab(data.vocabulary, data.merges);

        let config_file = dir.join(TOKENIZER_CONFIG_FILE);
        let config = if config_file.exists() {
            let content = fs::read_to_string(&config_file).with_context(|| {
                format!("Failed to read tokenizer config: {}", config_file.display())
            })?;
            serde_json::from_str(&content).context("Failed to parse tokenizer config JSON")?
        } else {
            TokenizerConfig::default()
        };

        Ok(Self { bpe, config })
    }

    /// Set the maximum sequence length
    pub fn with_max_length(mut self, model_max_length: usize) -> Self {
        self.config.model_max_length = model_max_length;
        self
    }

    /// Set the padding side
    pub fn with_padding_side(mut self, padding_side: PaddingSide) -> Self {
        self.config.padding_side = padding_side;
        self
    }

    /// Maximum sequence length
    pub fn max_length(&self) -> usize {
        self.config.model_max_length
    }

    /// Padding side
    pub fn padding_side(&self) -> PaddingSide {
        self.config.padding_side
    }

    /// Encode text to token IDs
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        self.bpe
            .encode(text)
            .map_err(|e| anyhow::anyhow!("Encoding failed: {}", e))
    }

    /// Decode token IDs to text
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.bpe
            .decode(ids)
            .map_err(|e| anyhow::anyhow!("Decoding failed: {}", e))
    }

    /// Render a chat history and encode it
    ///
    /// # Arguments
    /// * `messages` - Chat turns
    /// * `add_generation_prompt` - End with an open assistant header
    pub fn apply_chat_template(
        &self,
        messages: &[Message],
        add_generation_prompt: bool,
    ) -> Result<Vec<u32>> {
        let text = chat::apply_chat_template(messages, add_generation_prompt);
        self.encode(&text)
    }

    /// ID used for padding
    ///
    /// The vocabulary's pad token if present, otherwise token 0.
    pub fn pad_id(&self) -> u32 {
        self.bpe.token_to_id("<|pad|>").unwrap_or(0)
    }

    /// Truncate or pad a sequence to exactly `len` tokens
    ///
    /// Padding lands on the configured side; truncation always drops the
    /// tail so the head of the rendered example survives.
    pub fn pad_to(&self, ids: &[u32], len: usize) -> Vec<u32> {
        if ids.len() >= len {
            return ids[..len].to_vec();
        }

        let pad = self.pad_id();
        let mut out = Vec::with_capacity(len);
        match self.config.padding_side {
            PaddingSide::Right => {
                out.extend_from_slice(ids);
                out.resize(len, pad);
            }
            PaddingSide::Left => {
                out.resize(len - ids.len(), pad);
                out.extend_from_slice(ids);
            }
        }
        out
    }

    /// Vocabulary size
    pub fn vocab_size(&self) -> usize {
        self.bpe.vocab_size()
    }

    /// Save vocabulary and configuration to a directory
    ///
    /// Writes `tokenizer.json` and `tokenizer_config.json`, creating the
    /// directory if absent.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let data = TokenizerData {
            vocabulary: self.bpe.vocab().clone(),
            merges: self.bpe.merges().to_vec(),
        };
        let content = serde_json::to_string(&data).context("Failed to serialize tokenizer")?;
        let tokenizer_file = dir.join(TOKENIZER_FILE);
        fs::write(&tokenizer_file, content).with_context(|| {
            format!("Failed to write tokenizer file: {}", tokenizer_file.display())
        })?;

        let config_content = serde_json::to_string_pretty(&self.config)
            .context("Failed to serialize tokenizer config")?;
        let config_file = dir.join(TOKENIZER_CONFIG_FILE);
        fs::write(&config_file, config_content).with_context(|| {
            format!("Failed to write tokenizer config: {}", config_file.display())
        })?;

        Ok(())
    }
}
