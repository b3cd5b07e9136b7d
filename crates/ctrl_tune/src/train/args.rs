//! Training Arguments - CLI flags and the validated options record

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::cli::TokenizerArgs;

/// Every knob of a training run. Build with [`TrainOptions::validate`] before use.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainOptions {
    pub batch_size: usize,
    pub gradient_accumulation_steps: usize,
    /// Initial optimizer rate; the schedule overrides it at the first update.
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub max_grad_norm: f64,
    pub warmup_ratio: f64,
    pub max_lr: f64,
    pub min_lr: f64,
    /// Checkpoint every N effective steps.
    pub logging_steps: usize,
    /// Evaluate every N effective steps.
    pub eval_interval: usize,
    pub num_epochs: usize,
    pub output_dir: PathBuf,
    /// Directory checkpoints when true, single `.safetensors` files otherwise.
    pub save_pretrained: bool,
    /// Show progress bars.
    pub progress: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            batch_size: 8,
            gradient_accumulation_steps: 1,
            learning_rate: 3e-4,
            weight_decay: 0.01,
            max_grad_norm: 1.0,
            warmup_ratio: 0.1,
            max_lr: 3e-4,
            min_lr: 1e-6,
            logging_steps: 500,
            eval_interval: 500,
            num_epochs: 1,
            output_dir: PathBuf::from("checkpoints"),
            save_pretrained: true,
            progress: true,
        }
    }
}

impl TrainOptions {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open options at {:?}", path))?;
        let opts: Self = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse options at {:?}", path))?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("batch_size", self.batch_size),
            ("gradient_accumulation_steps", self.gradient_accumulation_steps),
            ("logging_steps", self.logging_steps),
            ("eval_interval", self.eval_interval),
            ("num_epochs", self.num_epochs),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be > 0", name);
            }
        }
        if !(0.0..=1.0).contains(&self.warmup_ratio) {
            anyhow::bail!("warmup_ratio must be in [0, 1], got {}", self.warmup_ratio);
        }
        if !(self.min_lr >= 0.0 && self.min_lr <= self.max_lr) {
            anyhow::bail!(
                "expected 0 <= min_lr <= max_lr, got min_lr={} max_lr={}",
                self.min_lr,
                self.max_lr
            );
        }
        if self.learning_rate <= 0.0 {
            anyhow::bail!("learning_rate must be > 0");
        }
        if self.max_grad_norm <= 0.0 {
            anyhow::bail!("max_grad_norm must be > 0");
        }
        Ok(())
    }
}

/// Training configuration from command line arguments
#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Pretrained model (directory or .safetensors file)
    #[arg(long, required = true)]
    pub model: String,

    #[command(flatten)]
    pub tokenizer: TokenizerArgs,

    /// JSONL training data
    #[arg(long, required = true)]
    pub data: String,

    /// Label used in checkpoint names (defaults to the records' control attribute)
    #[arg(long)]
    pub attribute: Option<String>,

    /// JSON file with TrainOptions; replaces the hyperparameter flags below
    #[arg(long)]
    pub config: Option<String>,

    /// Append metric records to this JSONL file
    #[arg(long)]
    pub metrics: Option<String>,

    #[arg(long, default_value_t = 1024)]
    pub max_len: usize,

    #[arg(long, default_value_t = 0)]
    pub device: usize,

    #[arg(long, default_value_t = 8)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1)]
    pub accum: usize,

    #[arg(long, default_value_t = 3e-4)]
    pub lr: f64,

    #[arg(long, default_value_t = 0.01)]
    pub weight_decay: f64,

    #[arg(long, default_value_t = 1.0)]
    pub max_grad_norm: f64,

    #[arg(long, default_value_t = 0.1)]
    pub warmup_ratio: f64,

    #[arg(long, default_value_t = 3e-4)]
    pub max_lr: f64,

    #[arg(long, default_value_t = 1e-6)]
    pub min_lr: f64,

    #[arg(long, default_value_t = 500)]
    pub logging_steps: usize,

    #[arg(long, default_value_t = 500)]
    pub eval_interval: usize,

    #[arg(long, default_value_t = 1)]
    pub epochs: usize,

    #[arg(long, default_value = "checkpoints")]
    pub output_dir: String,

    /// Save single .safetensors files instead of checkpoint directories
    #[arg(long, action)]
    pub single_file: bool,

    #[arg(long, action)]
    pub no_progress: bool,
}

impl TrainArgs {
    pub fn to_options(&self) -> Result<TrainOptions> {
        if let Some(ref path) = self.config {
            tracing::info!("Loading training options from {}", path);
            return TrainOptions::from_json_file(path);
        }
        let opts = TrainOptions {
            batch_size: self.batch_size,
            gradient_accumulation_steps: self.accum,
            learning_rate: self.lr,
            weight_decay: self.weight_decay,
            max_grad_norm: self.max_grad_norm,
            warmup_ratio: self.warmup_ratio,
            max_lr: self.max_lr,
            min_lr: self.min_lr,
            logging_steps: self.logging_steps,
            eval_interval: self.eval_interval,
            num_epochs: self.epochs,
            output_dir: PathBuf::from(&self.output_dir),
            save_pretrained: !self.single_file,
            progress: !self.no_progress,
        };
        opts.validate()?;
        Ok(opts)
    }
}
