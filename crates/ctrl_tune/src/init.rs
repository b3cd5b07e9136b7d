//! Create a fresh model checkpoint sized to a tokenizer.

use anyhow::Result;
use clap::Args;
use std::path::Path;
use tracing::info;
use tune_engine::{CheckpointFormat, SequenceModel, TextTokenizer, TinyCausalLm, TinyLmConfig};

use crate::cli::TokenizerArgs;

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    #[command(flatten)]
    pub tokenizer: TokenizerArgs,

    /// Checkpoint directory to create
    #[arg(short, long, required = true)]
    pub out: String,

    #[arg(long, default_value_t = 128)]
    pub hidden_dim: usize,

    #[arg(long, default_value_t = 2)]
    pub layers: usize,

    #[arg(long, default_value_t = 0.0)]
    pub dropout: f32,
}

pub fn run(args: InitArgs) -> Result<()> {
    let tokenizer = args.tokenizer.load()?;
    let mut config = TinyLmConfig::new(tokenizer.vocab_size(), args.hidden_dim, args.layers);
    config.dropout = args.dropout;
    config.eos_token_id = tokenizer.eos_id();

    info!(
        "Initializing model: vocab={}, dim={}, layers={}",
        config.vocab_size, config.hidden_dim, config.num_layers
    );
    let model = TinyCausalLm::init(config, &candle_core::Device::Cpu)?;
    model.save(Path::new(&args.out), CheckpointFormat::Directory)?;
    info!("Model written to {}", args.out);
    Ok(())
}
