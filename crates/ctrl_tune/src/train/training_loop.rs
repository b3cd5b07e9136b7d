//! Training Loop - gradient accumulation over cyclic micro-batches

use anyhow::{Context, Result};
use candle_core::{DType, Device};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tracing::info;
use tune_engine::{
    AccumulatingAdamW, CheckpointFormat, GradientOptimizer, ModelMode, SequenceModel,
    TextTokenizer, TinyCausalLm,
};

use super::args::{TrainArgs, TrainOptions};
use super::checkpoint::CheckpointNamer;
use crate::dataset::{ControlDataset, TokenizeMode};
use crate::evaluate::evaluate;
use crate::loader::BatchLoader;
use crate::metrics::{emit, JsonlMetricsSink, MetricRecord, MetricsSink};
use crate::schedule::CosineSchedule;
use crate::timing::timed;

/// Initial best-eval sentinel.
const BEST_LOSS_SENTINEL: f64 = 1e12;

/// Where the loop stands after each micro-batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopPhase {
    /// Accumulating inside the warmup window.
    Warmup,
    Accumulating,
    /// An optimizer update just happened.
    Stepped,
    Done,
}

/// Step budget derived once from dataset size, epochs and batch sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepPlan {
    pub total_examples: usize,
    pub effective_batch_size: usize,
    /// Micro-batches to run.
    pub total_steps: usize,
    /// `total_steps / gradient_accumulation_steps`, rounded down.
    pub effective_steps: usize,
    pub warmup_steps: usize,
    pub accum: usize,
}

impl StepPlan {
    pub fn new(dataset_len: usize, opts: &TrainOptions) -> Self {
        let accum = opts.gradient_accumulation_steps;
        let total_examples = dataset_len * opts.num_epochs;
        let total_steps = total_examples.div_ceil(opts.batch_size);
        let effective_steps = total_steps / accum;
        let warmup_steps = (opts.warmup_ratio * effective_steps as f64) as usize;
        Self {
            total_examples,
            effective_batch_size: opts.batch_size * accum,
            total_steps,
            effective_steps,
            warmup_steps,
            accum,
        }
    }

    /// Every `accum`-th micro-batch, plus the last one of the run.
    pub fn is_update_step(&self, step: usize) -> bool {
        (step + 1) % self.accum == 0 || step + 1 == self.total_steps
    }
}

/// One optimizer update.
#[derive(Clone, Debug, PartialEq)]
pub struct StepRecord {
    pub effective_step: usize,
    /// Micro-batch index that triggered the update.
    pub global_step: usize,
    /// Sum of the scaled micro-batch losses in the window.
    pub loss: f64,
    pub learning_rate: f64,
    /// Norm before clipping.
    pub grad_norm: f64,
}

#[derive(Clone, Debug)]
pub struct TrainReport {
    pub plan: StepPlan,
    pub optimizer_updates: usize,
    pub steps: Vec<StepRecord>,
    /// Phase after each micro-batch.
    pub phases: Vec<LoopPhase>,
    pub eval_losses: Vec<(usize, f64)>,
    pub best_eval_loss: f64,
    /// Every checkpoint written, in order.
    pub saved: Vec<PathBuf>,
    pub final_checkpoint: PathBuf,
    pub phase: LoopPhase,
}

/// Ephemeral state of one training invocation.
struct TrainState {
    global_step: usize,
    effective_step: usize,
    running_loss: f64,
    best_eval_loss: f64,
    phase: LoopPhase,
}

fn progress_bar(len: usize, visible: bool, message: &'static str) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(message);
    pb
}

/// Fine-tune `model` on `dataset`.
///
/// Runs `ceil(len * epochs / batch_size)` micro-batches, cycling through the
/// dataset in order. Gradients accumulate for `gradient_accumulation_steps`
/// micro-batches (the final micro-batch always closes its window), then the
/// gradients are clipped, the scheduled learning rate applied and the optimizer
/// stepped. Checkpoints go to `opts.output_dir`; a final one is always written.
pub fn train<M, O, T>(
    model: &mut M,
    optimizer: &mut O,
    tokenizer: &T,
    dataset: &ControlDataset,
    opts: &TrainOptions,
    device: &Device,
    mut metrics: Option<&mut dyn MetricsSink>,
) -> Result<TrainReport>
where
    M: SequenceModel + ?Sized,
    O: GradientOptimizer + ?Sized,
    T: TextTokenizer + ?Sized,
{
    opts.validate()?;
    if dataset.is_empty() {
        anyhow::bail!("Training dataset is empty");
    }

    let plan = StepPlan::new(dataset.len(), opts);
    let schedule = CosineSchedule::for_run(opts, dataset.len());

    info!("Starting training for attribute: {}", dataset.attribute);
    info!(
        "Total steps: {} | Total Effective steps: {} | Warmup steps: {}",
        plan.total_steps, plan.effective_steps, plan.warmup_steps
    );
    info!(
        "Effective batch size: {} | Total examples: {}",
        plan.effective_batch_size, plan.total_examples
    );

    model.enable_gradient_checkpointing();
    model.set_mode(ModelMode::Train);

    let pad_id = tokenizer.effective_pad_id()?;
    let mut loader = BatchLoader::new(dataset, opts.batch_size, pad_id, device);
    let namer = CheckpointNamer::new(
        &opts.output_dir,
        &dataset.attribute,
        CheckpointFormat::from_save_pretrained(opts.save_pretrained),
    );
    std::fs::create_dir_all(&opts.output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", opts.output_dir))?;

    let mut state = TrainState {
        global_step: 0,
        effective_step: 0,
        running_loss: 0.0,
        best_eval_loss: BEST_LOSS_SENTINEL,
        phase: if plan.warmup_steps > 0 {
            LoopPhase::Warmup
        } else {
            LoopPhase::Accumulating
        },
    };
    let mut steps = Vec::new();
    let mut phases = Vec::with_capacity(plan.total_steps);
    let mut eval_losses = Vec::new();
    let mut saved = Vec::new();

    optimizer.zero_grad();
    let pb = progress_bar(plan.total_steps, opts.progress, "Training");

    for step in 0..plan.total_steps {
        let batch = loader
            .next_batch()?
            .context("batch source yielded no batch")?;

        let loss = model.forward_loss(&batch)?;
        let loss = (loss / plan.accum as f64)?;
        state.running_loss += loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        optimizer.backward(&loss)?;
        state.global_step = step + 1;

        if !plan.is_update_step(step) {
            state.phase = if state.effective_step < plan.warmup_steps {
                LoopPhase::Warmup
            } else {
                LoopPhase::Accumulating
            };
            phases.push(state.phase);
            pb.inc(1);
            continue;
        }

        state.effective_step += 1;
        let grad_norm = optimizer.clip_grad_norm(opts.max_grad_norm)?;

        // The final partial window may add one update beyond effective_steps.
        let lr = schedule.lr_at(state.effective_step.min(plan.effective_steps));
        optimizer.set_learning_rate(lr);
        optimizer.step()?;
        optimizer.zero_grad();

        info!(
            "Step: {} | Loss: {:.4} | Learning Rate: {:.8} | Grad Norm: {:.4}",
            state.effective_step, state.running_loss, lr, grad_norm
        );
        emit(
            &mut metrics,
            MetricRecord::Step {
                step: state.effective_step,
                loss: state.running_loss,
                learning_rate: lr,
                grad_norm,
            },
        )?;
        steps.push(StepRecord {
            effective_step: state.effective_step,
            global_step: step,
            loss: state.running_loss,
            learning_rate: lr,
            grad_norm,
        });
        state.running_loss = 0.0;
        state.phase = LoopPhase::Stepped;

        if state.effective_step % opts.logging_steps == 0 {
            let path = namer.step_path(step);
            model.save(&path, namer.format())?;
            info!("Model saved at {:?}", path);
            saved.push(path);
        }

        if state.effective_step % opts.eval_interval == 0 {
            let eval_loss = timed("evaluate", || {
                evaluate(&mut *model, tokenizer, dataset, opts.batch_size, device)
            })()?;
            emit(
                &mut metrics,
                MetricRecord::Eval {
                    step: state.effective_step,
                    eval_loss,
                },
            )?;
            info!("Eval Loss at step {}: {:.4}", step, eval_loss);
            eval_losses.push((state.effective_step, eval_loss));

            if eval_loss < state.best_eval_loss {
                state.best_eval_loss = eval_loss;
                let path = namer.best_path(step);
                model.save(&path, namer.format())?;
                info!("Best Model saved at {:?}", path);
                saved.push(path);
            }
        }

        phases.push(state.phase);
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!("Training done ({} micro-batches)", state.global_step);
    let final_checkpoint = namer.final_path();
    model.save(&final_checkpoint, namer.format())?;
    info!("Final Model saved at {:?}", final_checkpoint);
    saved.push(final_checkpoint.clone());
    state.phase = LoopPhase::Done;

    Ok(TrainReport {
        plan,
        optimizer_updates: steps.len(),
        steps,
        phases,
        eval_losses,
        best_eval_loss: state.best_eval_loss,
        saved,
        final_checkpoint,
        phase: state.phase,
    })
}

/// `train` subcommand: reference backend + AdamW.
pub fn run(args: TrainArgs) -> Result<()> {
    info!("--- Fine-tuning ---");
    let opts = args.to_options()?;
    info!(
        "Hyperparams: Batch={}, Accum={}, LR={}..{}, Warmup ratio={}, Epochs={}",
        opts.batch_size, opts.gradient_accumulation_steps, opts.min_lr, opts.max_lr, opts.warmup_ratio, opts.num_epochs
    );

    let device = tune_engine::select_device(args.device);
    let tokenizer = args.tokenizer.load()?;
    let dataset = ControlDataset::from_jsonl(
        &args.data,
        &tokenizer,
        TokenizeMode::Train,
        args.max_len,
        args.attribute.clone(),
    )?;

    let mut model = TinyCausalLm::load(&args.model, &device)
        .with_context(|| format!("Failed to load model from {}", args.model))?;
    info!("Model loaded successfully on {:?}", model.device());
    let mut optimizer = AccumulatingAdamW::new(model.vars(), opts.learning_rate, opts.weight_decay)?;

    let mut sink = match args.metrics {
        Some(ref path) => Some(JsonlMetricsSink::open(path)?),
        None => None,
    };
    let metrics = sink.as_mut().map(|s| s as &mut dyn MetricsSink);

    let report = timed("train", || {
        train(
            &mut model,
            &mut optimizer,
            &tokenizer,
            &dataset,
            &opts,
            &device,
            metrics,
        )
    })()?;

    info!(
        "Finished: {} updates, best eval loss {:.4}, final checkpoint {:?}",
        report.optimizer_updates, report.best_eval_loss, report.final_checkpoint
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(batch_size: usize, accum: usize, epochs: usize) -> TrainOptions {
        TrainOptions {
            batch_size,
            gradient_accumulation_steps: accum,
            num_epochs: epochs,
            ..TrainOptions::default()
        }
    }

    #[test]
    fn plan_for_reference_scenario() {
        let plan = StepPlan::new(8, &opts(4, 2, 2));
        assert_eq!(plan.total_examples, 16);
        assert_eq!(plan.total_steps, 4);
        assert_eq!(plan.effective_steps, 2);
        assert_eq!(plan.effective_batch_size, 8);
    }

    #[test]
    fn plan_rounds_up_partial_batches() {
        let plan = StepPlan::new(10, &opts(4, 4, 1));
        assert_eq!(plan.total_steps, 3);
        assert_eq!(plan.effective_steps, 0);
        assert!(!plan.is_update_step(0));
        assert!(plan.is_update_step(2));
    }

    #[test]
    fn update_every_accum_and_at_the_end() {
        let plan = StepPlan::new(10, &opts(1, 4, 1));
        let updates: Vec<usize> = (0..plan.total_steps)
            .filter(|&s| plan.is_update_step(s))
            .collect();
        assert_eq!(updates, vec![3, 7, 9]);
    }

    #[test]
    fn warmup_from_ratio() {
        let plan = StepPlan::new(100, &TrainOptions {
            warmup_ratio: 0.25,
            ..opts(1, 2, 1)
        });
        assert_eq!(plan.effective_steps, 50);
        assert_eq!(plan.warmup_steps, 12);
    }
}
