//! TinyCausalLm - embedding, causal blocks, LM head

use candle_core::{DType, Device, Module, Result, Tensor, Var, D};
use candle_nn::{Embedding, Linear, VarBuilder, VarMap};
use std::path::{Path, PathBuf};

use super::block::maybe_dropout;
use crate::layers::RMSNorm;
use crate::model::{CausalBlock, TinyLmConfig};
use crate::{
    save_varmap_locked, Batch, CheckpointFormat, ModelMode, Sampler, SamplingParams, SequenceModel,
};

/// Epsilon for RMSNorm
const RMS_NORM_EPS: f64 = 1e-5;

const WEIGHTS_FILE: &str = "model.safetensors";
const CONFIG_FILE: &str = "config.json";

pub struct TinyCausalLm {
    pub embedding: Embedding,
    pub layers: Vec<CausalBlock>,
    pub norm: RMSNorm,
    pub lm_head: Linear,
    pub config: TinyLmConfig,
    varmap: VarMap,
    device: Device,
    mode: ModelMode,
}

impl TinyCausalLm {
    /// Fresh weights.
    pub fn init(config: TinyLmConfig, device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);

        let embedding = candle_nn::embedding(config.vocab_size, config.hidden_dim, vb.pp("embed"))?;
        let mut layers = Vec::with_capacity(config.num_layers);
        for i in 0..config.num_layers {
            layers.push(CausalBlock::load(
                config.hidden_dim,
                vb.pp(format!("layers.{i}")),
            )?);
        }
        let norm = RMSNorm::load(config.hidden_dim, RMS_NORM_EPS, vb.pp("norm_f"))?;
        let lm_head =
            candle_nn::linear_no_bias(config.hidden_dim, config.vocab_size, vb.pp("lm_head"))?;

        Ok(Self {
            embedding,
            layers,
            norm,
            lm_head,
            config,
            varmap,
            device: device.clone(),
            mode: ModelMode::Train,
        })
    }

    /// Loads a checkpoint written by [`SequenceModel::save`]: either a directory
    /// holding `model.safetensors` + `config.json`, or a `.safetensors` file with
    /// a `.json` config beside it.
    pub fn load<P: AsRef<Path>>(path: P, device: &Device) -> Result<Self> {
        let path = path.as_ref();
        let (weights, config_path) = resolve_checkpoint(path)?;
        let config = TinyLmConfig::load(&config_path)?;
        let mut model = Self::init(config, device)?;
        model.varmap.load(&weights)?;
        tracing::info!("Loaded model from {:?}", weights);
        Ok(model)
    }

    pub fn vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    fn dropout(&self) -> Option<f32> {
        match self.mode {
            ModelMode::Train if self.config.dropout > 0.0 => Some(self.config.dropout),
            _ => None,
        }
    }

    /// `input_ids`: [B, T] u32. Returns logits [B, T, V].
    pub fn forward(&self, input_ids: &Tensor, attention_mask: Option<&Tensor>) -> Result<Tensor> {
        let mask = match attention_mask {
            Some(m) => m.to_dtype(DType::F32)?,
            None => Tensor::ones(input_ids.dims2()?, DType::F32, &self.device)?,
        };
        let dropout = self.dropout();
        let mut x = maybe_dropout(&self.embedding.forward(input_ids)?, dropout)?;
        for layer in &self.layers {
            x = layer.forward(&x, &mask, dropout)?;
        }
        let x = self.norm.forward(&x)?;
        self.lm_head.forward(&x)
    }
}

fn resolve_checkpoint(path: &Path) -> Result<(PathBuf, PathBuf)> {
    if path.is_dir() {
        let weights = path.join(WEIGHTS_FILE);
        if !weights.exists() {
            candle_core::bail!("No {} found in {:?}", WEIGHTS_FILE, path);
        }
        return Ok((weights, path.join(CONFIG_FILE)));
    }
    if !path.exists() {
        candle_core::bail!("Checkpoint not found: {:?}", path);
    }
    let sidecar = path.with_extension("json");
    let config = if sidecar.exists() {
        sidecar
    } else {
        path.parent().unwrap_or(Path::new(".")).join(CONFIG_FILE)
    };
    Ok((path.to_path_buf(), config))
}

/// Shifted next-token cross-entropy, averaged over labels != -1.
fn causal_lm_loss(logits: &Tensor, labels: &Tensor) -> Result<Tensor> {
    let (b, t, v) = logits.dims3()?;
    if t < 2 {
        candle_core::bail!("sequence too short for a causal LM loss (len {})", t);
    }
    let logits = logits.narrow(1, 0, t - 1)?.reshape((b * (t - 1), v))?;
    let labels = labels.narrow(1, 1, t - 1)?.reshape(b * (t - 1))?;

    let valid = labels.ge(0i64)?.to_dtype(DType::F32)?;
    let targets = labels.maximum(0i64)?;

    let log_sm = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
    let nll = log_sm
        .gather(&targets.unsqueeze(1)?, D::Minus1)?
        .squeeze(D::Minus1)?
        .neg()?;

    let count = valid.sum_all()?.to_scalar::<f32>()?;
    (nll * valid)?.sum_all()? / f64::from(count.max(1.0))
}

impl SequenceModel for TinyCausalLm {
    fn forward_loss(&mut self, batch: &Batch) -> Result<Tensor> {
        let logits = self.forward(&batch.input_ids, Some(&batch.attention_mask))?;
        causal_lm_loss(&logits, &batch.labels)
    }

    fn generate(&mut self, prompt: &[u32], params: &SamplingParams) -> Result<Vec<Vec<u32>>> {
        if prompt.is_empty() {
            candle_core::bail!("cannot generate from an empty prompt");
        }
        let mut sampler = Sampler::new(params);
        let mut sequences = Vec::with_capacity(params.num_return_sequences);

        for _ in 0..params.num_return_sequences {
            let mut tokens = prompt.to_vec();
            for _ in 0..params.max_new_tokens {
                let input = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
                let logits = self.forward(&input, None)?;
                let last = logits
                    .squeeze(0)?
                    .get(tokens.len() - 1)?
                    .to_dtype(DType::F32)?
                    .to_vec1::<f32>()?;
                let next = sampler.sample(&last);
                tokens.push(next);
                if Some(next) == self.config.eos_token_id {
                    break;
                }
            }
            sequences.push(tokens);
        }
        Ok(sequences)
    }

    fn save(&self, path: &Path, format: CheckpointFormat) -> Result<()> {
        match format {
            CheckpointFormat::Directory => {
                std::fs::create_dir_all(path)?;
                save_varmap_locked(&self.varmap, &path.join(WEIGHTS_FILE))?;
                self.config.save(&path.join(CONFIG_FILE))
            }
            CheckpointFormat::File => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                save_varmap_locked(&self.varmap, path)?;
                self.config.save(&path.with_extension("json"))
            }
        }
    }

    fn set_mode(&mut self, mode: ModelMode) {
        self.mode = mode;
    }

    fn mode(&self) -> ModelMode {
        self.mode
    }

    fn enable_gradient_checkpointing(&mut self) {
        tracing::debug!("gradient checkpointing requested; nothing to recompute");
    }
}
