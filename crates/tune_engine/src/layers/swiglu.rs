//! SwiGLU - Gated MLP with SiLU activation

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

/// `down(silu(gate(x)) * up(x))`
pub struct SwiGLU {
    pub gate: Linear,
    pub up: Linear,
    pub down: Linear,
}

impl SwiGLU {
    pub fn load(hidden_dim: usize, intermediate_dim: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            gate: linear_no_bias(hidden_dim, intermediate_dim, vb.pp("gate_proj"))?,
            up: linear_no_bias(hidden_dim, intermediate_dim, vb.pp("up_proj"))?,
            down: linear_no_bias(intermediate_dim, hidden_dim, vb.pp("down_proj"))?,
        })
    }
}

impl Module for SwiGLU {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gated = (candle_nn::ops::silu(&self.gate.forward(x)?)? * self.up.forward(x)?)?;
        self.down.forward(&gated)
    }
}
