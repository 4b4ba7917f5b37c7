//! Conversation dataset loading, formatting, and batching

use afinar_tokenizer::{render_example, Tokenizer};
use anyhow::{Context, Result};
use aprender::autograd::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One conversation turn from the JSONL input
#[derive(Debug, Clone, Deserialize)]
pub struct Turn {
    /// Speaker tag, unused by formatting (turns are positional)
    #[serde(default)]
    pub from: Option<String>,
    /// Turn text
    pub value: String,
}

/// One dataset record: a `conversations` array of turns
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationRecord {
    /// Ordered turns; the first three are instruction, input, output
    pub conversations: Vec<Turn>,
}

/// Render a record into the fixed three-slot template
///
/// The first three turns substitute positionally as instruction (system),
/// input (user), and output (assistant). A record with fewer than three
/// turns fails here, deterministically — short records are never silently
/// truncated into the template.
pub fn format_record(record: &ConversationRecord) -> Result<String> {
    if record.conversations.len() < 3 {
        anyhow::bail!(
            "Conversation has {} turns; formatting requires at least 3 (instruction, input, output)",
            record.conversations.len()
        );
    }

    Ok(render_example(
        &record.conversations[0].value,
        &record.conversations[1].value,
        &record.conversations[2].value,
    ))
}

/// Load and format a newline-delimited JSON dataset
///
/// One conversation object per line; blank lines are skipped. Any
/// malformed line or short record fails with its line number.
pub fn load_dataset<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open dataset file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut texts = Vec::new();
    for (line_num, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read dataset line")?;
        if line.trim().is_empty() {
            continue;
        }

        let record: ConversationRecord = serde_json::from_str(&line).with_context(|| {
            format!(
                "Failed to parse conversation record at line {} in {}",
                line_num + 1,
                path.display()
            )
        })?;

        let text = format_record(&record).with_context(|| {
            format!("Failed to format record at line {} in {}", line_num + 1, path.display())
        })?;
        texts.push(text);
    }

    Ok(texts)
}

/// Batching data loader over formatted examples
///
/// Tokenizes each formatted string once, right-pads to the sequence length,
/// shuffles with a seeded RNG, and yields (inputs, targets) tensor pairs
/// with targets shifted one position.
pub struct SftDataLoader {
    batch_size: usize,
    seq_len: usize,
    /// Tokenized examples, each padded to `seq_len`
    examples: Vec<Vec<u32>>,
    pad_id: u32,
    current_pos: usize,
    rng: StdRng,
}

impl SftDataLoader {
    /// Create a data loader over formatted example texts
    ///
    /// # Arguments
    /// * `texts` - Formatted examples (output of [`load_dataset`])
    /// * `tokenizer` - Tokenizer; its padding side applies
    /// * `batch_size` - Batch size
    /// * `seq_len` - Sequence length each example pads/truncates to
    /// * `seed` - Optional shuffle seed (None = non-deterministic)
    pub fn new(
        texts: &[String],
        tokenizer: &Tokenizer,
        batch_size: usize,
        seq_len: usize,
        seed: Option<u64>,
    ) -> Result<Self> {
        if texts.is_empty() {
            anyhow::bail!("Dataset is empty; nothing to train on");
        }
        if seq_len < 2 {
            anyhow::bail!("Sequence length must be at least 2, got {}", seq_len);
        }

        let mut examples = Vec::with_capacity(texts.len());
        for text in texts {
            let ids = tokenizer
                .encode(text)
                .context("Failed to tokenize formatted example")?;
            examples.push(tokenizer.pad_to(&ids, seq_len));
        }

        let rng_seed = seed.unwrap_or_else(|| {
            use std::time::{SystemTime, UNIX_EPOCH};
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("Time went backwards")
                .as_secs()
        });
        let mut rng = StdRng::seed_from_u64(rng_seed);
        examples.shuffle(&mut rng);

        Ok(Self {
            batch_size,
            seq_len,
            examples,
            pad_id: tokenizer.pad_id(),
            current_pos: 0,
            rng,
        })
    }

    /// Number of examples
    pub fn num_examples(&self) -> usize {
        self.examples.len()
    }

    /// Batches yielded per epoch
    pub fn batches_per_epoch(&self) -> usize {
        self.examples.len().div_ceil(self.batch_size)
    }

    /// Yield the next (inputs, targets) batch
    ///
    /// Both tensors have shape [batch_size, seq_len - 1]; targets are the
    /// inputs shifted one position. A final short batch is padded out with
    /// pad-token rows. Returns `None` at the end of the epoch.
    pub fn next_batch(&mut self) -> Result<Option<(Tensor, Tensor)>> {
        if self.current_pos >= self.examples.len() {
            return Ok(None);
        }

        let width = self.seq_len - 1;
        let mut inputs = Vec::with_capacity(self.batch_size * width);
        let mut targets = Vec::with_capacity(self.batch_size * width);

        for _ in 0..self.batch_size {
            match self.examples.get(self.current_pos) {
                Some(ids) => {
                    self.current_pos += 1;
                    inputs.extend(ids[..width].iter().map(|&id| id as f32));
                    targets.extend(ids[1..].iter().map(|&id| id as f32));
                }
                None => {
                    // Short final batch: fill with pad rows
                    inputs.extend(std::iter::repeat_n(self.pad_id as f32, width));
                    targets.extend(std::iter::repeat_n(self.pad_id as f32, width));
                }
            }
        }

        let shape = [self.batch_size, width];
        Ok(Some((
            Tensor::new(&inputs, &shape),
            Tensor::new(&targets, &shape),
        )))
    }

    /// Reset to a fresh epoch (reshuffles)
    pub fn reset(&mut self) {
        self.current_pos = 0;
        self.examples.shuffle(&mut self.rng);
    }
}
