//! CausalBlock - causal context mixing + MLP with residual connections

use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

use crate::layers::{RMSNorm, SwiGLU};

/// Epsilon for RMSNorm
const RMS_NORM_EPS: f64 = 1e-5;

/// Each position mixes in the mean of all earlier (unmasked) positions.
pub struct CausalBlock {
    pub norm1: RMSNorm,
    pub mix_proj: Linear,
    pub norm2: RMSNorm,
    pub mlp: SwiGLU,
}

impl CausalBlock {
    pub fn load(dim: usize, vb: VarBuilder) -> Result<Self> {
        let norm1 = RMSNorm::load(dim, RMS_NORM_EPS, vb.pp("norm1"))?;
        let mix_proj = linear_no_bias(dim, dim, vb.pp("mix_proj"))?;
        let norm2 = RMSNorm::load(dim, RMS_NORM_EPS, vb.pp("norm2"))?;
        let mlp = SwiGLU::load(dim, dim * 4, vb.pp("mlp"))?;
        Ok(Self {
            norm1,
            mix_proj,
            norm2,
            mlp,
        })
    }

    /// `x`: [B, T, D]. `mask`: [B, T] f32, 1 for real tokens.
    pub fn forward(&self, x: &Tensor, mask: &Tensor, dropout: Option<f32>) -> Result<Tensor> {
        let residual = x;
        let x_norm = self.norm1.forward(x)?;
        let ctx = causal_mean(&x_norm, mask)?;
        let mixed = self.mix_proj.forward(&ctx)?;
        let x_mid = (residual + maybe_dropout(&mixed, dropout)?)?;

        let residual = &x_mid;
        let x_norm2 = self.norm2.forward(&x_mid)?;
        let mlp_out = self.mlp.forward(&x_norm2)?;
        residual + maybe_dropout(&mlp_out, dropout)?
    }
}

fn causal_mean(x: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let (_b, t, _d) = x.dims3()?;
    let tril = Tensor::tril2(t, DType::F32, x.device())?;
    let mask = mask.unsqueeze(D::Minus1)?;
    let sums = tril.broadcast_matmul(&x.broadcast_mul(&mask)?)?;
    let counts = tril.broadcast_matmul(&mask)?.clamp(1.0f32, f32::MAX)?;
    sums.broadcast_div(&counts)
}

pub(crate) fn maybe_dropout(x: &Tensor, p: Option<f32>) -> Result<Tensor> {
    match p {
        Some(p) if p > 0.0 => candle_nn::ops::dropout(x, p),
        _ => Ok(x.clone()),
    }
}
