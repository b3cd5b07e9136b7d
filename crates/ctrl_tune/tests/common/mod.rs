#![allow(dead_code)]

use candle_core::{Device, Result, Tensor};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use ctrl_tune::{ControlDataset, ControlExample, SourceRecord};
use tune_engine::{
    Batch, CheckpointFormat, GradientOptimizer, ModelMode, SamplingParams, SequenceModel,
    TextTokenizer, TokenizedExample,
};

/// One token per byte; eos = 0, no pad token.
pub struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str, _add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> anyhow::Result<String> {
        Ok(ids
            .iter()
            .filter(|&&i| !(skip_special_tokens && i == 0))
            .map(|&i| i as u8 as char)
            .collect())
    }

    fn pad_id(&self) -> Option<u32> {
        None
    }

    fn eos_id(&self) -> Option<u32> {
        Some(0)
    }
}

/// Records every call; losses are scripted.
pub struct MockModel {
    pub mode: ModelMode,
    pub gradient_checkpointing: bool,
    /// Returned by every train-mode forward.
    pub train_loss: f32,
    /// Popped by eval-mode forwards; falls back to the first token id of the batch.
    pub eval_script: VecDeque<f32>,
    /// Eval-mode forward number (1-based) that fails.
    pub fail_eval_at: Option<usize>,
    pub eval_calls: usize,
    pub first_ids: Vec<u32>,
    pub forward_modes: Vec<ModelMode>,
    pub saved: Vec<(PathBuf, CheckpointFormat)>,
    pub continuation: Vec<u32>,
    pub generate_modes: Vec<ModelMode>,
}

impl Default for MockModel {
    fn default() -> Self {
        Self {
            mode: ModelMode::Train,
            gradient_checkpointing: false,
            train_loss: 2.0,
            eval_script: VecDeque::new(),
            fail_eval_at: None,
            eval_calls: 0,
            first_ids: Vec::new(),
            forward_modes: Vec::new(),
            saved: Vec::new(),
            continuation: b"ok".iter().map(|&b| u32::from(b)).collect(),
            generate_modes: Vec::new(),
        }
    }
}

impl SequenceModel for MockModel {
    fn forward_loss(&mut self, batch: &Batch) -> Result<Tensor> {
        let first = batch.input_ids.get(0)?.get(0)?.to_scalar::<u32>()?;
        self.first_ids.push(first);
        self.forward_modes.push(self.mode);

        let value = match self.mode {
            ModelMode::Train => self.train_loss,
            ModelMode::Eval => {
                self.eval_calls += 1;
                if self.fail_eval_at == Some(self.eval_calls) {
                    candle_core::bail!("scripted eval failure");
                }
                self.eval_script.pop_front().unwrap_or(first as f32)
            }
        };
        Tensor::new(value, &Device::Cpu)
    }

    fn generate(&mut self, prompt: &[u32], params: &SamplingParams) -> Result<Vec<Vec<u32>>> {
        self.generate_modes.push(self.mode);
        let mut seq = prompt.to_vec();
        seq.extend_from_slice(&self.continuation);
        seq.push(0);
        Ok(vec![seq; params.num_return_sequences])
    }

    fn save(&self, _path: &Path, _format: CheckpointFormat) -> Result<()> {
        Ok(())
    }

    fn set_mode(&mut self, mode: ModelMode) {
        self.mode = mode;
    }

    fn mode(&self) -> ModelMode {
        self.mode
    }

    fn enable_gradient_checkpointing(&mut self) {
        self.gradient_checkpointing = true;
    }
}

/// Tracks the accumulate/clip/step/zero sequence without touching tensors.
#[derive(Default)]
pub struct MockOptimizer {
    pub lr: f64,
    pub backward_losses: Vec<f64>,
    pub pending: f64,
    /// Pending scaled-loss sum at each `step`.
    pub applied: Vec<f64>,
    pub lrs: Vec<f64>,
    pub clip_calls: Vec<f64>,
    pub zero_grad_calls: usize,
    pub grad_norm: f64,
}

impl GradientOptimizer for MockOptimizer {
    fn backward(&mut self, loss: &Tensor) -> Result<()> {
        let v = loss.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?;
        self.backward_losses.push(v);
        self.pending += v;
        Ok(())
    }

    fn clip_grad_norm(&mut self, max_norm: f64) -> Result<f64> {
        self.clip_calls.push(max_norm);
        Ok(self.grad_norm)
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn step(&mut self) -> Result<()> {
        self.applied.push(self.pending);
        self.lrs.push(self.lr);
        Ok(())
    }

    fn zero_grad(&mut self) {
        self.pending = 0.0;
        self.zero_grad_calls += 1;
    }
}

/// `n` examples whose first token id is `i + 1`.
pub fn numbered_dataset(n: usize, attribute: &str) -> ControlDataset {
    let examples = (0..n)
        .map(|i| {
            let id = i as u32 + 1;
            ControlExample {
                source: record(&format!("doc {id}"), &format!("sum {id}"), attribute),
                tokens: TokenizedExample::from_ids(vec![id, id + 100, id + 200]),
            }
        })
        .collect();
    ControlDataset::new(attribute, examples)
}

pub fn record(input: &str, output: &str, attribute: &str) -> SourceRecord {
    SourceRecord {
        input: input.to_string(),
        output: output.to_string(),
        control_attribute: attribute.to_string(),
        control_value: Value::from("short"),
        extra: Map::new(),
    }
}
