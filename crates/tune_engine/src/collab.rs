//! Collaborator traits - the only surface the harness touches
//!
//! The training, evaluation and generation loops never see a concrete model,
//! optimizer or tokenizer. Everything goes through these traits so a backend
//! (or a test double) can be swapped in.

use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Inference/training toggle for models with mode-dependent layers (dropout).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelMode {
    Train,
    Eval,
}

/// How a checkpoint lands on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointFormat {
    /// `path/` containing `model.safetensors` + `config.json`
    Directory,
    /// `path.safetensors`, weights only
    File,
}

impl CheckpointFormat {
    pub fn from_save_pretrained(save_pretrained: bool) -> Self {
        if save_pretrained {
            Self::Directory
        } else {
            Self::File
        }
    }
}

/// Decoding options handed to [`SequenceModel::generate`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// `false` means greedy decoding; top_k/top_p/temperature are ignored.
    pub do_sample: bool,
    pub top_p: f64,
    /// 0 disables top-k filtering.
    pub top_k: usize,
    pub temperature: f64,
    pub max_new_tokens: usize,
    pub num_return_sequences: usize,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            do_sample: true,
            top_p: 0.9,
            top_k: 50,
            temperature: 1.0,
            max_new_tokens: 128,
            num_return_sequences: 1,
            seed: None,
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            anyhow::bail!("top_p must be in (0, 1], got {}", self.top_p);
        }
        if self.max_new_tokens == 0 {
            anyhow::bail!("max_new_tokens must be > 0");
        }
        if self.num_return_sequences == 0 {
            anyhow::bail!("num_return_sequences must be > 0");
        }
        if self.do_sample && self.temperature <= 0.0 {
            anyhow::bail!("temperature must be > 0 when sampling");
        }
        Ok(())
    }
}

/// A pretrained sequence model the harness fine-tunes.
pub trait SequenceModel {
    /// Scalar loss for a batch. Must stay attached to the autograd graph so the
    /// optimizer can backprop through it.
    fn forward_loss(&mut self, batch: &crate::Batch) -> Result<Tensor>;

    /// Continue `prompt`. Each returned sequence includes the prompt tokens.
    fn generate(&mut self, prompt: &[u32], params: &SamplingParams) -> Result<Vec<Vec<u32>>>;

    fn save(&self, path: &Path, format: CheckpointFormat) -> Result<()>;

    fn set_mode(&mut self, mode: ModelMode);

    fn mode(&self) -> ModelMode;

    fn enable_gradient_checkpointing(&mut self);
}

/// Optimizer with gradient accumulation across micro-batches.
pub trait GradientOptimizer {
    /// Backprop `loss` and add the result to the pending gradients.
    fn backward(&mut self, loss: &Tensor) -> Result<()>;

    /// Rescale pending gradients to a global L2 norm of at most `max_norm`.
    /// Returns the norm measured before clipping.
    fn clip_grad_norm(&mut self, max_norm: f64) -> Result<f64>;

    fn set_learning_rate(&mut self, lr: f64);

    fn learning_rate(&self) -> f64;

    /// Apply the pending gradients.
    fn step(&mut self) -> Result<()>;

    fn zero_grad(&mut self);
}

/// Tokenizer surface used for dataset preparation, collation and decoding.
pub trait TextTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>>;

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> anyhow::Result<String>;

    fn pad_id(&self) -> Option<u32>;

    fn eos_id(&self) -> Option<u32>;

    /// Pad id, patched from eos when the tokenizer defines no pad token.
    fn effective_pad_id(&self) -> anyhow::Result<u32> {
        if let Some(id) = self.pad_id() {
            return Ok(id);
        }
        match self.eos_id() {
            Some(eos) => {
                tracing::warn!("Tokenizer has no pad token; padding with eos id {}", eos);
                Ok(eos)
            }
            None => anyhow::bail!("Tokenizer defines neither a pad nor an eos token"),
        }
    }
}
