//! Model Module - reference causal LM backend
//!
//! - TinyLmConfig: Model configuration (config.json)
//! - CausalBlock: pre-norm causal context mixing + SwiGLU MLP
//! - TinyCausalLm: embedding, blocks, LM head; implements SequenceModel

pub mod block;
pub mod config;
pub mod tiny_lm;

pub use block::CausalBlock;
pub use config::TinyLmConfig;
pub use tiny_lm::TinyCausalLm;
