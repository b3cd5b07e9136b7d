use anyhow::{Context, Result};
use candle_core::{DType, Device};
use clap::Args;
use tracing::info;
use tune_engine::{ModelMode, SequenceModel, TextTokenizer, TinyCausalLm};

use crate::cli::TokenizerArgs;
use crate::dataset::{ControlDataset, TokenizeMode};
use crate::loader::BatchLoader;
use crate::timing::timed;

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(short, long, required = true)]
    pub model: String,

    #[command(flatten)]
    pub tokenizer: TokenizerArgs,

    #[arg(short, long, required = true)]
    pub data: String,

    #[arg(long, default_value_t = 8)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 1024)]
    pub max_len: usize,

    #[arg(long, default_value_t = 0)]
    pub device: usize,
}

/// Mean per-batch loss over one pass of `dataset`.
///
/// The model is switched to eval mode for the pass and always handed back in
/// train mode, even when a batch fails.
pub fn evaluate<M, T>(
    model: &mut M,
    tokenizer: &T,
    dataset: &ControlDataset,
    batch_size: usize,
    device: &Device,
) -> Result<f64>
where
    M: SequenceModel + ?Sized,
    T: TextTokenizer + ?Sized,
{
    if dataset.is_empty() {
        anyhow::bail!("Evaluation dataset is empty");
    }
    if batch_size == 0 {
        anyhow::bail!("batch_size must be > 0");
    }

    model.set_mode(ModelMode::Eval);
    let result = mean_loss(model, tokenizer, dataset, batch_size, device);
    model.set_mode(ModelMode::Train);
    result
}

fn mean_loss<M, T>(
    model: &mut M,
    tokenizer: &T,
    dataset: &ControlDataset,
    batch_size: usize,
    device: &Device,
) -> Result<f64>
where
    M: SequenceModel + ?Sized,
    T: TextTokenizer + ?Sized,
{
    let pad_id = tokenizer.effective_pad_id()?;
    let mut loader = BatchLoader::new(dataset, batch_size, pad_id, device).with_loop(false);
    tracing::debug!("Evaluating {} batches", loader.num_batches());

    let mut total = 0.0;
    let mut batches = 0usize;
    while let Some(batch) = loader.next_batch()? {
        let loss = model.forward_loss(&batch)?.detach();
        total += loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        batches += 1;
    }
    Ok(total / batches as f64)
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    info!("--- Evaluation ---");
    info!("Model: {}", args.model);
    info!("Data:  {}", args.data);

    let device = tune_engine::select_device(args.device);
    let tokenizer = args.tokenizer.load()?;
    let dataset =
        ControlDataset::from_jsonl(&args.data, &tokenizer, TokenizeMode::Train, args.max_len, None)?;
    let mut model = TinyCausalLm::load(&args.model, &device)
        .with_context(|| format!("Failed to load model from {}", args.model))?;
    info!("Model loaded successfully on {:?}", model.device());

    let loss = timed("evaluate", || {
        evaluate(&mut model, &tokenizer, &dataset, args.batch_size, &device)
    })()?;

    info!("Eval Loss: {:.4} | Perplexity: {:.4}", loss, loss.exp());
    println!("{:.6}", loss);
    Ok(())
}
