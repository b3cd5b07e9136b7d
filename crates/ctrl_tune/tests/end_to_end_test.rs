mod common;

use candle_core::Device;
use common::ByteTokenizer;
use ctrl_tune::train::{train, TrainOptions};
use ctrl_tune::{evaluate, generate_text, ControlDataset, JsonlMetricsSink, MetricsSink, TokenizeMode};
use std::io::Write;
use tune_engine::{AccumulatingAdamW, SamplingParams, TextTokenizer, TinyCausalLm, TinyLmConfig};

const RECORDS: &[&str] = &[
    r#"{"input":"aaaa","output":"a","control_attribute":"length","control_value":"short"}"#,
    r#"{"input":"bbbb","output":"b","control_attribute":"length","control_value":"short"}"#,
    r#"{"input":"cc","output":"cc","control_attribute":"length","control_value":"long","id":3}"#,
    r#"{"input":"d","output":"dd","control_attribute":"length","control_value":"long"}"#,
];

#[test]
fn test_train_evaluate_generate_on_cpu() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let data_path = dir.path().join("train.jsonl");
    let mut file = std::fs::File::create(&data_path)?;
    for line in RECORDS {
        writeln!(file, "{line}")?;
    }
    drop(file);

    let device = Device::Cpu;
    let tokenizer = ByteTokenizer;
    let dataset = ControlDataset::from_jsonl(&data_path, &tokenizer, TokenizeMode::Train, 64, None)?;
    assert_eq!(dataset.attribute, "length");

    let mut config = TinyLmConfig::new(128, 16, 1);
    config.eos_token_id = tokenizer.eos_id();
    let mut model = TinyCausalLm::init(config, &device)?;
    let mut optimizer = AccumulatingAdamW::new(model.vars(), 1e-2, 0.0)?;

    let out = dir.path().join("checkpoints");
    let opts = TrainOptions {
        batch_size: 2,
        gradient_accumulation_steps: 2,
        num_epochs: 3,
        max_lr: 1e-2,
        min_lr: 1e-3,
        logging_steps: 1,
        eval_interval: 1,
        output_dir: out.clone(),
        progress: false,
        ..TrainOptions::default()
    };

    let before = evaluate(&mut model, &tokenizer, &dataset, 2, &device)?;
    let mut sink = JsonlMetricsSink::open(dir.path().join("metrics.jsonl"))?;
    let report = train(
        &mut model,
        &mut optimizer,
        &tokenizer,
        &dataset,
        &opts,
        &device,
        Some(&mut sink as &mut dyn MetricsSink),
    )?;

    assert_eq!(report.plan.total_steps, 6);
    assert_eq!(report.optimizer_updates, 3);
    assert!(report.best_eval_loss < before, "{} !< {}", report.best_eval_loss, before);
    assert!(report.steps.iter().all(|s| s.loss.is_finite() && s.grad_norm.is_finite()));

    let final_dir = out.join("final_model_length");
    assert_eq!(report.final_checkpoint, final_dir);
    assert!(final_dir.join("model.safetensors").exists());
    assert!(final_dir.join("config.json").exists());
    assert!(out.join("model_1_length").join("model.safetensors").exists());

    let metrics = std::fs::read_to_string(sink.path())?;
    assert_eq!(metrics.lines().count(), 6);

    let mut reloaded = TinyCausalLm::load(&final_dir, &device)?;
    let reloaded_loss = evaluate(&mut reloaded, &tokenizer, &dataset, 2, &device)?;
    let trained_loss = evaluate(&mut model, &tokenizer, &dataset, 2, &device)?;
    assert!((reloaded_loss - trained_loss).abs() < 1e-4);

    let prompts = ControlDataset::from_jsonl(&data_path, &tokenizer, TokenizeMode::Prompt, 64, None)?;
    let params = SamplingParams {
        do_sample: false,
        max_new_tokens: 4,
        ..SamplingParams::default()
    };
    let results = generate_text(&mut reloaded, &tokenizer, &prompts, &params)?;
    assert_eq!(results.len(), 4);
    assert_eq!(results[&2].input, "cc");
    assert_eq!(results[&2].extra.get("id"), Some(&serde_json::Value::from(3)));
    assert!(results[&0].generated_text.starts_with("aaaa\nlength: short\n"));
    Ok(())
}
