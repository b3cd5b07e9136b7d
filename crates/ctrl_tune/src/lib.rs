//! ctrl_tune - fine-tuning harness for controllable summarization
//!
//! - schedule: warmup + cosine learning rate
//! - dataset / loader: JSONL records to collated batches
//! - train: gradient-accumulating step loop with checkpointing
//! - evaluate / generate: mean loss and text generation over a dataset

pub mod cli;
pub mod dataset;
pub mod evaluate;
pub mod generate;
pub mod init;
pub mod loader;
pub mod metrics;
pub mod schedule;
pub mod timing;
pub mod train;

pub use dataset::{ControlDataset, ControlExample, SourceRecord, TokenizeMode};
pub use evaluate::evaluate;
pub use generate::{generate_text, GenerationRecord};
pub use metrics::{JsonlMetricsSink, MetricRecord, MetricsSink};
pub use schedule::{cosine_with_warmup, CosineSchedule};
pub use train::{train, TrainOptions, TrainReport};
