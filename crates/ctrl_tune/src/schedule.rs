//! Learning-rate schedule: linear warmup followed by cosine decay.

use std::f64::consts::PI;

use crate::train::{StepPlan, TrainOptions};

/// Learning rate at effective step `it`.
///
/// Ramps linearly from `min_lr` to `max_lr` over `warmup` steps, then follows a
/// half cosine down to `min_lr` at `total`. Progress is clamped to `[0, 1]`, so
/// steps past `total` stay at `min_lr`. A zero-length decay span (`total <=
/// warmup`) yields `max_lr`.
pub fn cosine_with_warmup(it: usize, warmup: usize, total: usize, max_lr: f64, min_lr: f64) -> f64 {
    if it < warmup {
        return min_lr + (max_lr - min_lr) * (it as f64 / warmup as f64);
    }
    if total <= warmup {
        return max_lr;
    }
    let progress = ((it - warmup) as f64 / (total - warmup) as f64).clamp(0.0, 1.0);
    min_lr + 0.5 * (max_lr - min_lr) * (1.0 + (PI * progress).cos())
}

/// Schedule parameters fixed for one run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CosineSchedule {
    pub warmup_steps: usize,
    pub total_steps: usize,
    pub max_lr: f64,
    pub min_lr: f64,
}

impl CosineSchedule {
    pub fn new(warmup_steps: usize, total_steps: usize, max_lr: f64, min_lr: f64) -> Self {
        Self {
            warmup_steps,
            total_steps,
            max_lr,
            min_lr,
        }
    }

    /// Warmup and decay spans for a run over `dataset_len` examples, counted
    /// in effective steps.
    pub fn for_run(opts: &TrainOptions, dataset_len: usize) -> Self {
        let plan = StepPlan::new(dataset_len, opts);
        Self::new(plan.warmup_steps, plan.effective_steps, opts.max_lr, opts.min_lr)
    }

    pub fn lr_at(&self, it: usize) -> f64 {
        cosine_with_warmup(
            it,
            self.warmup_steps,
            self.total_steps,
            self.max_lr,
            self.min_lr,
        )
    }
}
