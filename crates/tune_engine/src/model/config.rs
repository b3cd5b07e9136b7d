//! TinyLmConfig - Model configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_dropout() -> f32 {
    0.0
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TinyLmConfig {
    pub vocab_size: usize,
    pub hidden_dim: usize,
    #[serde(alias = "n_layers")]
    pub num_layers: usize,
    /// Applied only in train mode.
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    /// Generation stops once this token is produced.
    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

impl TinyLmConfig {
    pub fn new(vocab_size: usize, hidden_dim: usize, num_layers: usize) -> Self {
        Self {
            vocab_size,
            hidden_dim,
            num_layers,
            dropout: default_dropout(),
            eos_token_id: None,
        }
    }

    pub fn load(path: &Path) -> candle_core::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(candle_core::Error::wrap)
    }

    pub fn save(&self, path: &Path) -> candle_core::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(candle_core::Error::wrap)
    }
}
