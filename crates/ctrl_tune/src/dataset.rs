//! Controllable-summarization dataset
//!
//! One JSON object per line:
//! `{"input": ..., "output": ..., "control_attribute": ..., "control_value": ..., <extra>...}`.
//! Any keys beyond the four named ones ride along as passthrough fields.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tune_engine::{TextTokenizer, TokenizedExample, IGNORE_INDEX};

/// Raw text of one example as stored on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub input: String,
    #[serde(default)]
    pub output: String,
    pub control_attribute: String,
    pub control_value: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SourceRecord {
    /// Text fed to the model ahead of the reference.
    pub fn prompt(&self) -> String {
        format!("{}{}", self.input, self.control_suffix())
    }

    /// `"\n{attr}: {value}\n"`, appended to the input.
    pub fn control_suffix(&self) -> String {
        format!(
            "\n{}: {}\n",
            self.control_attribute,
            value_label(&self.control_value)
        )
    }
}

/// Renders a control value without JSON quoting.
pub fn value_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Which token layout to build for each record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenizeMode {
    /// `prompt ++ reference ++ eos`, prompt positions masked out of the loss.
    Train,
    /// Prompt only, for generation.
    Prompt,
}

#[derive(Clone, Debug)]
pub struct ControlExample {
    pub source: SourceRecord,
    pub tokens: TokenizedExample,
}

/// Ordered, indexable examples sharing one attribute label.
#[derive(Clone, Debug)]
pub struct ControlDataset {
    /// Used in checkpoint names.
    pub attribute: String,
    pub examples: Vec<ControlExample>,
}

impl ControlDataset {
    pub fn new(attribute: impl Into<String>, examples: Vec<ControlExample>) -> Self {
        Self {
            attribute: attribute.into(),
            examples,
        }
    }

    /// Load and tokenize a JSONL file. `attribute` defaults to the records'
    /// shared `control_attribute`, or `"mixed"` when they disagree.
    pub fn from_jsonl<P, T>(
        path: P,
        tokenizer: &T,
        mode: TokenizeMode,
        max_len: usize,
        attribute: Option<String>,
    ) -> Result<Self>
    where
        P: AsRef<Path>,
        T: TextTokenizer + ?Sized,
    {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("Failed to open dataset at {:?}", path))?;

        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: SourceRecord = serde_json::from_str(&line)
                .with_context(|| format!("{:?}:{}: malformed record", path, line_no + 1))?;
            records.push(record);
        }

        let attribute = attribute.unwrap_or_else(|| shared_attribute(&records));
        let examples = records
            .into_iter()
            .map(|source| {
                let tokens = tokenize(&source, tokenizer, mode, max_len)?;
                Ok(ControlExample { source, tokens })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            "Loaded {} examples from {:?} (attribute: {})",
            examples.len(),
            path,
            attribute
        );
        Ok(Self::new(attribute, examples))
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ControlExample> {
        self.examples.get(index)
    }
}

fn shared_attribute(records: &[SourceRecord]) -> String {
    match records.split_first() {
        Some((first, rest))
            if rest
                .iter()
                .all(|r| r.control_attribute == first.control_attribute) =>
        {
            first.control_attribute.clone()
        }
        Some(_) => "mixed".to_string(),
        None => "none".to_string(),
    }
}

fn tokenize<T: TextTokenizer + ?Sized>(
    source: &SourceRecord,
    tokenizer: &T,
    mode: TokenizeMode,
    max_len: usize,
) -> Result<TokenizedExample> {
    // Pieces are encoded without special tokens so a post-processor cannot
    // wedge eos/sep between the prompt and the reference.
    let mut input = tokenizer.encode(&source.input, false)?;
    let control = tokenizer.encode(&source.control_suffix(), false)?;

    let mut target = Vec::new();
    if mode == TokenizeMode::Train {
        target = tokenizer.encode(&source.output, false)?;
        if let Some(eos) = tokenizer.eos_id() {
            target.push(eos);
        }
    }

    // The input gives way first; the control line and reference are kept.
    let budget = max_len.saturating_sub(control.len() + target.len());
    if input.len() > budget {
        tracing::debug!(
            "Truncating input from {} to {} tokens to fit max_len {}",
            input.len(),
            budget,
            max_len
        );
        input.truncate(budget);
    }

    let mut input_ids = input;
    input_ids.extend(control);
    let mut labels: Vec<i64> = vec![IGNORE_INDEX; input_ids.len()];
    labels.extend(target.iter().map(|&t| i64::from(t)));
    input_ids.extend(target);

    if input_ids.len() > max_len {
        input_ids.truncate(max_len);
        labels.truncate(max_len);
    }
    if mode == TokenizeMode::Train && labels.iter().all(|&l| l == IGNORE_INDEX) {
        tracing::warn!(
            "Example {:?} has no supervised tokens left within max_len {}",
            truncate_for_log(&source.input),
            max_len
        );
    }

    let attention_mask = vec![1; input_ids.len()];
    Ok(TokenizedExample {
        input_ids,
        attention_mask,
        labels,
    })
}

fn truncate_for_log(text: &str) -> String {
    text.chars().take(40).collect()
}
