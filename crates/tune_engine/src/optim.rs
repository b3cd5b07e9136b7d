//! AdamW with micro-batch gradient accumulation.
//!
//! candle's `backward()` hands back a fresh `GradStore` per call. The first store
//! of an accumulation window is kept and later ones are summed into it, which
//! mirrors "backward adds to existing .grad" semantics.

use candle_core::backprop::GradStore;
use candle_core::{DType, Result, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

use crate::GradientOptimizer;

/// Guards the clip scale against a zero norm.
const NORM_EPS: f64 = 1e-6;

pub struct AccumulatingAdamW {
    vars: Vec<Var>,
    inner: AdamW,
    pending: Option<GradStore>,
}

impl AccumulatingAdamW {
    pub fn new(vars: Vec<Var>, lr: f64, weight_decay: f64) -> Result<Self> {
        let params = ParamsAdamW {
            lr,
            weight_decay,
            ..Default::default()
        };
        let inner = AdamW::new(vars.clone(), params)?;
        Ok(Self {
            vars,
            inner,
            pending: None,
        })
    }

    pub fn has_pending_grads(&self) -> bool {
        self.pending.is_some()
    }

    /// Global L2 norm of the pending gradients (0 when nothing is pending).
    pub fn grad_norm(&self) -> Result<f64> {
        let Some(grads) = &self.pending else {
            return Ok(0.0);
        };
        let mut total = 0.0f64;
        for var in &self.vars {
            if let Some(g) = grads.get(var.as_tensor()) {
                total += sum_sq(g)?;
            }
        }
        Ok(total.sqrt())
    }
}

fn sum_sq(g: &Tensor) -> Result<f64> {
    Ok(g.sqr()?.sum_all()?.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}

impl GradientOptimizer for AccumulatingAdamW {
    fn backward(&mut self, loss: &Tensor) -> Result<()> {
        let grads = loss.backward()?;
        match self.pending.as_mut() {
            None => self.pending = Some(grads),
            Some(acc) => {
                for var in &self.vars {
                    let Some(g) = grads.get(var.as_tensor()) else {
                        continue;
                    };
                    let summed = match acc.remove(var.as_tensor()) {
                        Some(prev) => (prev + g)?,
                        None => g.clone(),
                    };
                    acc.insert(var.as_tensor(), summed);
                }
            }
        }
        Ok(())
    }

    fn clip_grad_norm(&mut self, max_norm: f64) -> Result<f64> {
        let norm = self.grad_norm()?;
        if norm <= max_norm {
            return Ok(norm);
        }
        let scale = max_norm / (norm + NORM_EPS);
        if let Some(grads) = self.pending.as_mut() {
            for var in &self.vars {
                if let Some(g) = grads.remove(var.as_tensor()) {
                    grads.insert(var.as_tensor(), g.affine(scale, 0.0)?);
                }
            }
        }
        Ok(norm)
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.inner.set_learning_rate(lr);
    }

    fn learning_rate(&self) -> f64 {
        self.inner.learning_rate()
    }

    fn step(&mut self) -> Result<()> {
        match &self.pending {
            Some(grads) => self.inner.step(grads),
            None => {
                tracing::warn!("optimizer step with no accumulated gradients; skipping");
                Ok(())
            }
        }
    }

    fn zero_grad(&mut self) {
        self.pending = None;
    }
}
