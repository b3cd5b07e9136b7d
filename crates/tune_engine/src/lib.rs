//! Tune Engine
//!
//! Collaborator interfaces for the fine-tuning harness plus a candle backend:
//! - SequenceModel / GradientOptimizer / TextTokenizer: narrow seams the harness drives
//! - Batch + Collator: per-field right padding of tokenized examples
//! - TinyCausalLm, AccumulatingAdamW, HfTokenizer: reference implementations

pub mod batch;
pub mod collab;
pub mod device_utils;
pub mod layers;
pub mod model;
pub mod optim;
pub mod sampler;
pub mod tokenizer;

pub use batch::{Batch, Collator, TokenizedExample, IGNORE_INDEX};
pub use collab::{
    CheckpointFormat, GradientOptimizer, ModelMode, SamplingParams, SequenceModel, TextTokenizer,
};
pub use device_utils::{save_varmap_locked, select_device};
pub use model::{TinyCausalLm, TinyLmConfig};
pub use optim::AccumulatingAdamW;
pub use sampler::Sampler;
pub use tokenizer::HfTokenizer;
