//! Metrics sink - optional key/value log records from training

use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricRecord {
    Step {
        step: usize,
        loss: f64,
        learning_rate: f64,
        grad_norm: f64,
    },
    Eval {
        step: usize,
        eval_loss: f64,
    },
}

pub trait MetricsSink {
    fn log(&mut self, record: &MetricRecord) -> Result<()>;
}

/// Keeps records in memory.
impl MetricsSink for Vec<MetricRecord> {
    fn log(&mut self, record: &MetricRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

#[derive(Serialize)]
struct TimestampedRecord<'a> {
    timestamp: String,
    #[serde(flatten)]
    record: &'a MetricRecord,
}

/// Appends one timestamped JSON object per record.
pub struct JsonlMetricsSink {
    path: PathBuf,
    file: File,
}

impl JsonlMetricsSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create metrics directory at {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open metrics file at {:?}", path))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl MetricsSink for JsonlMetricsSink {
    fn log(&mut self, record: &MetricRecord) -> Result<()> {
        let line = TimestampedRecord {
            timestamp: Local::now().to_rfc3339(),
            record,
        };
        let json = serde_json::to_string(&line)?;
        writeln!(self.file, "{}", json)?;
        Ok(())
    }
}

/// Skipped when no sink is configured.
pub(crate) fn emit(sink: &mut Option<&mut dyn MetricsSink>, record: MetricRecord) -> Result<()> {
    match sink {
        Some(s) => s.log(&record),
        None => Ok(()),
    }
}
