//! RMSNorm - Root Mean Square Layer Normalization

use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::VarBuilder;

/// Normalizes the last dimension by its root mean square, then scales.
/// Computed in f32 regardless of the input dtype.
pub struct RMSNorm {
    pub scale: Tensor,
    pub eps: f64,
}

impl RMSNorm {
    /// Scale starts at 1.0 so a fresh layer is a pure normalization.
    pub fn load(dim: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let scale = vb.get_with_hints((dim,), "weight", candle_nn::Init::Const(1.0))?;
        Ok(Self { scale, eps })
    }
}

impl Module for RMSNorm {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let dtype = x.dtype();
        let x = x.to_dtype(DType::F32)?;
        let rms = (x.sqr()?.mean_keepdim(D::Minus1)? + self.eps)?.sqrt()?;
        x.broadcast_div(&rms)?
            .broadcast_mul(&self.scale.to_dtype(DType::F32)?)?
            .to_dtype(dtype)
    }
}
