//! Checkpoint naming - `{output_dir}/{prefix}_{step}_{attribute}`

use std::path::{Path, PathBuf};
use tune_engine::CheckpointFormat;

const FILE_SUFFIX: &str = "safetensors";

#[derive(Clone, Debug)]
pub struct CheckpointNamer {
    output_dir: PathBuf,
    attribute: String,
    format: CheckpointFormat,
}

impl CheckpointNamer {
    pub fn new(output_dir: impl AsRef<Path>, attribute: &str, format: CheckpointFormat) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            attribute: attribute.to_string(),
            format,
        }
    }

    pub fn format(&self) -> CheckpointFormat {
        self.format
    }

    /// Periodic checkpoint, keyed by micro-batch index.
    pub fn step_path(&self, step: usize) -> PathBuf {
        self.path(format!("model_{}_{}", step, self.attribute))
    }

    pub fn best_path(&self, step: usize) -> PathBuf {
        self.path(format!("best_model_{}_{}", step, self.attribute))
    }

    pub fn final_path(&self) -> PathBuf {
        self.path(format!("final_model_{}", self.attribute))
    }

    fn path(&self, stem: String) -> PathBuf {
        match self.format {
            CheckpointFormat::Directory => self.output_dir.join(stem),
            CheckpointFormat::File => self.output_dir.join(format!("{stem}.{FILE_SUFFIX}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_form() {
        let namer = CheckpointNamer::new("out", "length", CheckpointFormat::Directory);
        assert_eq!(namer.step_path(7), Path::new("out/model_7_length"));
        assert_eq!(namer.best_path(3), Path::new("out/best_model_3_length"));
        assert_eq!(namer.final_path(), Path::new("out/final_model_length"));
    }

    #[test]
    fn file_form_adds_suffix() {
        let namer = CheckpointNamer::new("out", "topic", CheckpointFormat::File);
        assert_eq!(namer.step_path(0), Path::new("out/model_0_topic.safetensors"));
        assert_eq!(namer.final_path(), Path::new("out/final_model_topic.safetensors"));
    }
}
