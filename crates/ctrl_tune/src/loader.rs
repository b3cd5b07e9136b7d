use anyhow::Result;
use candle_core::Device;
use tune_engine::{Batch, Collator, TokenizedExample};

use crate::dataset::ControlDataset;

/// Sequential, collated batches over a dataset. No shuffling.
pub struct BatchLoader<'a> {
    dataset: &'a ControlDataset,
    collator: Collator,
    device: Device,
    pub batch_size: usize,
    pub cursor: usize,
    pub loop_data: bool, // If true, restart from the beginning once exhausted
    pub passes: usize,
}

impl<'a> BatchLoader<'a> {
    pub fn new(dataset: &'a ControlDataset, batch_size: usize, pad_id: u32, device: &Device) -> Self {
        Self {
            dataset,
            collator: Collator::new(pad_id),
            device: device.clone(),
            batch_size,
            cursor: 0,
            loop_data: true, // Default to true (training mode)
            passes: 0,
        }
    }

    pub fn with_loop(mut self, loop_data: bool) -> Self {
        self.loop_data = loop_data;
        self
    }

    /// Batches per full pass; the last one may be short.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    /// `None` once a non-looping loader is exhausted.
    pub fn next_batch(&mut self) -> Result<Option<Batch>> {
        if self.dataset.is_empty() {
            return Ok(None);
        }
        if self.cursor >= self.dataset.len() {
            if !self.loop_data {
                return Ok(None);
            }
            self.passes += 1;
            tracing::debug!("Batch source exhausted; restarting (pass {})", self.passes + 1);
            self.reset();
        }

        let end = (self.cursor + self.batch_size).min(self.dataset.len());
        let rows: Vec<&TokenizedExample> = self.dataset.examples[self.cursor..end]
            .iter()
            .map(|e| &e.tokens)
            .collect();
        self.cursor = end;
        Ok(Some(self.collator.collate(&rows, &self.device)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ControlExample, SourceRecord};
    use serde_json::{Map, Value};

    fn dataset(n: u32) -> ControlDataset {
        let examples = (1..=n)
            .map(|id| ControlExample {
                source: SourceRecord {
                    input: format!("doc {id}"),
                    output: String::new(),
                    control_attribute: "length".into(),
                    control_value: Value::from("short"),
                    extra: Map::new(),
                },
                tokens: TokenizedExample::from_ids(vec![id; id as usize]),
            })
            .collect();
        ControlDataset::new("length", examples)
    }

    fn first_ids(batch: &Batch) -> Result<Vec<u32>> {
        Ok(batch
            .input_ids
            .to_vec2::<u32>()?
            .into_iter()
            .map(|row| row[0])
            .collect())
    }

    #[test]
    fn looping_loader_restarts_in_order() -> Result<()> {
        let ds = dataset(5);
        let mut loader = BatchLoader::new(&ds, 2, 0, &Device::Cpu);
        assert_eq!(loader.num_batches(), 3);

        let mut seen = Vec::new();
        for _ in 0..5 {
            let batch = loader.next_batch()?.expect("looping loader never runs dry");
            seen.push(first_ids(&batch)?);
        }
        assert_eq!(seen, vec![vec![1, 2], vec![3, 4], vec![5], vec![1, 2], vec![3, 4]]);
        assert_eq!(loader.passes, 1);
        Ok(())
    }

    #[test]
    fn non_looping_loader_stops_after_one_pass() -> Result<()> {
        let ds = dataset(3);
        let mut loader = BatchLoader::new(&ds, 2, 0, &Device::Cpu).with_loop(false);

        let first = loader.next_batch()?.expect("first batch");
        assert_eq!(first.batch_size(), 2);
        assert_eq!(first.seq_len(), 2);
        let second = loader.next_batch()?.expect("second batch");
        assert_eq!(first_ids(&second)?, vec![3]);
        assert!(loader.next_batch()?.is_none());
        assert!(loader.next_batch()?.is_none());
        assert_eq!(loader.passes, 0);

        loader.reset();
        assert!(loader.next_batch()?.is_some());
        Ok(())
    }

    #[test]
    fn empty_dataset_yields_nothing() -> Result<()> {
        let ds = ControlDataset::new("length", Vec::new());
        let mut loader = BatchLoader::new(&ds, 4, 0, &Device::Cpu);
        assert_eq!(loader.num_batches(), 0);
        assert!(loader.next_batch()?.is_none());
        Ok(())
    }
}
