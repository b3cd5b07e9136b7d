//! HF `tokenizers` adapter for [`TextTokenizer`].

use anyhow::Result;
use std::path::Path;
use tokenizers::Tokenizer;

use crate::TextTokenizer;

const PAD_CANDIDATES: &[&str] = &["<pad>", "[PAD]", "<|pad|>"];
const EOS_CANDIDATES: &[&str] = &[
    "</s>",
    "<|endoftext|>",
    "<|end_of_text|>",
    "<|eot_id|>",
    "<|im_end|>",
    "<eos>",
    "<|eos|>",
    "[SEP]",
];

pub struct HfTokenizer {
    inner: Tokenizer,
    pad_id: Option<u32>,
    eos_id: Option<u32>,
}

impl HfTokenizer {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = Tokenizer::from_file(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        Ok(Self::new(inner))
    }

    pub fn new(inner: Tokenizer) -> Self {
        let pad_id = inner
            .get_padding()
            .map(|p| p.pad_id)
            .or_else(|| first_known(&inner, PAD_CANDIDATES));
        let eos_id = first_known(&inner, EOS_CANDIDATES);
        tracing::info!(
            "Tokenizer loaded. Vocab: {}, pad: {:?}, eos: {:?}",
            inner.get_vocab_size(true),
            pad_id,
            eos_id
        );
        Self {
            inner,
            pad_id,
            eos_id,
        }
    }

    /// Override the detected eos/pad ids by token string. Unknown tokens are an error.
    pub fn with_special_tokens(mut self, eos: Option<&str>, pad: Option<&str>) -> Result<Self> {
        if let Some(token) = eos {
            self.eos_id = Some(self.require_token(token)?);
        }
        if let Some(token) = pad {
            self.pad_id = Some(self.require_token(token)?);
        }
        tracing::info!("Special tokens: pad {:?}, eos {:?}", self.pad_id, self.eos_id);
        Ok(self)
    }

    fn require_token(&self, token: &str) -> Result<u32> {
        self.inner
            .token_to_id(token)
            .ok_or_else(|| anyhow::anyhow!("Token {:?} is not in the tokenizer vocabulary", token))
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

fn first_known(tokenizer: &Tokenizer, candidates: &[&str]) -> Option<u32> {
    candidates.iter().find_map(|t| tokenizer.token_to_id(t))
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.inner
            .decode(ids, skip_special_tokens)
            .map_err(|e| anyhow::anyhow!(e))
    }

    fn pad_id(&self) -> Option<u32> {
        self.pad_id
    }

    fn eos_id(&self) -> Option<u32> {
        self.eos_id
    }
}
