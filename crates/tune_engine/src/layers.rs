//! Layers Module - building blocks for the reference causal LM
//!
//! - RMSNorm: Root Mean Square Layer Normalization
//! - SwiGLU: Gated MLP with SiLU activation

pub mod rms_norm;
pub mod swiglu;

pub use rms_norm::RMSNorm;
pub use swiglu::SwiGLU;
