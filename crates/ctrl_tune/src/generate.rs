//! Generation loop - one example at a time, first returned sequence decoded

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use tracing::info;
use tune_engine::{ModelMode, SamplingParams, SequenceModel, TextTokenizer, TinyCausalLm};

use crate::cli::TokenizerArgs;
use crate::dataset::{ControlDataset, TokenizeMode};
use crate::timing::timed;

/// Keys owned by [`GenerationRecord`]; passthrough fields never shadow them.
const RESERVED_KEYS: &[&str] = &[
    "input",
    "predicted_summary",
    "reference",
    "generated_text",
    "control_value",
    "control_attribute",
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub input: String,
    /// Decoded continuation after the prompt.
    pub predicted_summary: String,
    pub reference: String,
    /// Prompt and continuation decoded together.
    pub generated_text: String,
    pub control_value: Value,
    pub control_attribute: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    #[arg(short, long, required = true)]
    pub model: String,

    #[command(flatten)]
    pub tokenizer: TokenizerArgs,

    /// JSONL prompts (references in `output` are carried through)
    #[arg(short, long, required = true)]
    pub data: String,

    /// Write the index-keyed results here as JSON
    #[arg(short, long)]
    pub out: Option<String>,

    #[arg(long, default_value_t = 1024)]
    pub max_len: usize,

    #[arg(long, default_value_t = 0)]
    pub device: usize,

    /// Greedy decoding (ignores top-k, top-p and temperature)
    #[arg(long, action)]
    pub greedy: bool,

    #[arg(long, default_value_t = 0.9)]
    pub top_p: f64,

    #[arg(long, default_value_t = 50)]
    pub top_k: usize,

    #[arg(long, default_value_t = 1.0)]
    pub temperature: f64,

    #[arg(long, default_value_t = 128)]
    pub max_new_tokens: usize,

    #[arg(long, default_value_t = 1)]
    pub num_return_sequences: usize,

    #[arg(long)]
    pub seed: Option<u64>,
}

impl GenerateArgs {
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            do_sample: !self.greedy,
            top_p: self.top_p,
            top_k: self.top_k,
            temperature: self.temperature,
            max_new_tokens: self.max_new_tokens,
            num_return_sequences: self.num_return_sequences,
            seed: self.seed,
        }
    }
}

/// Generate a continuation for every example of `dataset`.
///
/// Each example's token ids are used as the prompt, so load the dataset in
/// [`TokenizeMode::Prompt`]. The model runs in eval mode and gets its previous
/// mode back afterwards.
pub fn generate_text<M, T>(
    model: &mut M,
    tokenizer: &T,
    dataset: &ControlDataset,
    params: &SamplingParams,
) -> Result<BTreeMap<usize, GenerationRecord>>
where
    M: SequenceModel + ?Sized,
    T: TextTokenizer + ?Sized,
{
    params.validate()?;
    let previous = model.mode();
    model.set_mode(ModelMode::Eval);
    let result = generate_all(model, tokenizer, dataset, params);
    model.set_mode(previous);
    result
}

fn generate_all<M, T>(
    model: &mut M,
    tokenizer: &T,
    dataset: &ControlDataset,
    params: &SamplingParams,
) -> Result<BTreeMap<usize, GenerationRecord>>
where
    M: SequenceModel + ?Sized,
    T: TextTokenizer + ?Sized,
{
    let mut results = BTreeMap::new();
    for (idx, example) in dataset.examples.iter().enumerate() {
        let prompt = &example.tokens.input_ids;
        let sequences = model.generate(prompt, params)?;
        let first = sequences
            .first()
            .with_context(|| format!("model returned no sequences for example {}", idx))?;

        let generated_text = tokenizer.decode(first, true)?;
        let continuation = first.get(prompt.len()..).unwrap_or(&[]);
        let predicted_summary = tokenizer.decode(continuation, true)?;
        info!("Predicted text: {}", predicted_summary);

        let source = &example.source;
        let extra = source
            .extra
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        results.insert(
            idx,
            GenerationRecord {
                input: source.input.clone(),
                predicted_summary,
                reference: source.output.clone(),
                generated_text,
                control_value: source.control_value.clone(),
                control_attribute: source.control_attribute.clone(),
                extra,
            },
        );
    }
    Ok(results)
}

pub fn run(args: GenerateArgs) -> Result<()> {
    info!("--- Generation ---");
    let params = args.sampling();
    params.validate()?;

    let device = tune_engine::select_device(args.device);
    let tokenizer = args.tokenizer.load()?;
    let dataset =
        ControlDataset::from_jsonl(&args.data, &tokenizer, TokenizeMode::Prompt, args.max_len, None)?;
    let mut model = TinyCausalLm::load(&args.model, &device)
        .with_context(|| format!("Failed to load model from {}", args.model))?;
    info!("Model loaded successfully on {:?}", model.device());

    let results = timed("generate_text", || {
        generate_text(&mut model, &tokenizer, &dataset, &params)
    })()?;

    match args.out {
        Some(ref path) => {
            let file =
                File::create(path).with_context(|| format!("Failed to create {}", path))?;
            serde_json::to_writer_pretty(BufWriter::new(file), &results)?;
            info!("Wrote {} generations to {}", results.len(), path);
        }
        None => println!("{}", serde_json::to_string_pretty(&results)?),
    }
    Ok(())
}
