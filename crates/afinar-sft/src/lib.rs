//! Supervised fine-tuning for afinar
//!
//! This crate drives the training side of the pipeline:
//! - [`dataset`] — JSONL conversation loading, three-slot template
//!   formatting, batching
//! - [`args`] — [`TrainingArguments`] and [`SftConfig`] with their
//!   last-writer-wins merge
//! - [`trainer`] — the [`SftTrainer`] loop with gradient accumulation
//! - [`report`] — accelerator memory utilization figures

pub mod args;
pub mod dataset;
pub mod metrics;
pub mod optimizer;
pub mod report;
pub mod trainer;

/// Configuration bundles
pub use args::{SchedulerType, SftConfig, TrainingArguments};

/// Dataset loading and formatting
pub use dataset::{format_record, load_dataset, ConversationRecord, SftDataLoader, Turn};

/// Training loop
pub use trainer::{SftTrainer, TrainStats};

/// Memory reporting
pub use report::{bytes_to_gb, round3, MemoryReport};
