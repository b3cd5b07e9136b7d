//! Train Module - fine-tuning pipeline
//!
//! This module provides the training infrastructure:
//! - TrainArgs / TrainOptions: CLI arguments and the validated options record
//! - checkpoint: checkpoint path naming
//! - training_loop: gradient-accumulating step loop

pub mod args;
pub mod checkpoint;
pub mod training_loop;

pub use args::{TrainArgs, TrainOptions};
pub use checkpoint::CheckpointNamer;
pub use training_loop::{run, train, LoopPhase, StepPlan, StepRecord, TrainReport};
