use crate::evaluate::EvaluateArgs;
use crate::generate::GenerateArgs;
use crate::init::InitArgs;
use crate::train::TrainArgs;
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tune_engine::HfTokenizer;

#[derive(Parser)]
#[command(author, version, about = "Controllable summarization fine-tuning harness", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a freshly initialized model checkpoint
    Init(InitArgs),

    /// Fine-tune a model
    Train(TrainArgs),

    /// Mean loss over a dataset
    Evaluate(EvaluateArgs),

    /// Generate summaries for a dataset
    Generate(GenerateArgs),
}

/// Tokenizer flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct TokenizerArgs {
    /// tokenizer.json
    #[arg(long = "tokenizer", required = true)]
    pub path: String,

    /// End-of-sequence token (e.g. "<|eot_id|>"); detected when omitted
    #[arg(long)]
    pub eos_token: Option<String>,

    /// Padding token; falls back to eos when the tokenizer has none
    #[arg(long)]
    pub pad_token: Option<String>,
}

impl TokenizerArgs {
    pub fn load(&self) -> Result<HfTokenizer> {
        HfTokenizer::from_file(&self.path)?
            .with_special_tokens(self.eos_token.as_deref(), self.pad_token.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_token_flags_parse() {
        let cli = Cli::try_parse_from([
            "ctrl_tune",
            "generate",
            "--model",
            "ckpt",
            "--tokenizer",
            "tok.json",
            "--data",
            "data.jsonl",
            "--eos-token",
            "<|im_end|>",
            "--greedy",
        ])
        .unwrap();
        let Commands::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.tokenizer.path, "tok.json");
        assert_eq!(args.tokenizer.eos_token.as_deref(), Some("<|im_end|>"));
        assert_eq!(args.tokenizer.pad_token, None);
        assert!(!args.sampling().do_sample);
    }

    #[test]
    fn tokenizer_is_required() {
        assert!(Cli::try_parse_from(["ctrl_tune", "init", "--out", "m"]).is_err());
    }
}
