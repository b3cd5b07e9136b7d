//! Batch collation - right-pads tokenized examples to a uniform length

use candle_core::{Device, Result, Tensor};
use serde::{Deserialize, Serialize};

/// Label value excluded from the loss.
pub const IGNORE_INDEX: i64 = -1;

/// One pre-tokenized training example.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenizedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub labels: Vec<i64>,
}

impl TokenizedExample {
    /// Full attention, every position is a target.
    pub fn from_ids(input_ids: Vec<u32>) -> Self {
        let attention_mask = vec![1; input_ids.len()];
        let labels = input_ids.iter().map(|&t| t as i64).collect();
        Self {
            input_ids,
            attention_mask,
            labels,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// A padded batch. All tensors are `[batch, seq]`.
#[derive(Clone, Debug)]
pub struct Batch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn batch_size(&self) -> usize {
        self.input_ids.dims().first().copied().unwrap_or(0)
    }

    pub fn seq_len(&self) -> usize {
        self.input_ids.dims().get(1).copied().unwrap_or(0)
    }
}

/// Pads each field independently to the longest sequence of that field.
#[derive(Clone, Copy, Debug)]
pub struct Collator {
    pub pad_token_id: u32,
}

impl Collator {
    pub fn new(pad_token_id: u32) -> Self {
        Self { pad_token_id }
    }

    pub fn collate(&self, examples: &[&TokenizedExample], device: &Device) -> Result<Batch> {
        if examples.is_empty() {
            candle_core::bail!("cannot collate an empty batch");
        }
        let input_ids = pad_field(
            examples.iter().map(|e| e.input_ids.as_slice()),
            self.pad_token_id,
        );
        let attention_mask = pad_field(examples.iter().map(|e| e.attention_mask.as_slice()), 0);
        let labels = pad_field(examples.iter().map(|e| e.labels.as_slice()), IGNORE_INDEX);

        Ok(Batch {
            input_ids: to_tensor(input_ids, device)?,
            attention_mask: to_tensor(attention_mask, device)?,
            labels: to_tensor(labels, device)?,
        })
    }
}

fn pad_field<'a, T, I>(rows: I, pad: T) -> Vec<Vec<T>>
where
    T: Copy + 'a,
    I: Iterator<Item = &'a [T]> + Clone,
{
    let max_len = rows.clone().map(<[T]>::len).max().unwrap_or(0);
    rows.map(|row| {
        let mut padded = Vec::with_capacity(max_len);
        padded.extend_from_slice(row);
        padded.resize(max_len, pad);
        padded
    })
    .collect()
}

fn to_tensor<T: candle_core::WithDType>(rows: Vec<Vec<T>>, device: &Device) -> Result<Tensor> {
    let batch = rows.len();
    let seq = rows.first().map_or(0, Vec::len);
    let flat: Vec<T> = rows.into_iter().flatten().collect();
    Tensor::from_vec(flat, (batch, seq), device)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(len: usize, base: u32) -> TokenizedExample {
        TokenizedExample::from_ids((0..len as u32).map(|i| base + i).collect())
    }

    #[test]
    fn pads_to_longest_per_field() -> Result<()> {
        let examples = [example(3, 10), example(5, 20), example(2, 30)];
        let refs: Vec<&TokenizedExample> = examples.iter().collect();
        let batch = Collator::new(0).collate(&refs, &Device::Cpu)?;

        assert_eq!(batch.input_ids.dims(), &[3, 5]);
        assert_eq!(batch.batch_size(), 3);
        assert_eq!(batch.seq_len(), 5);

        let ids = batch.input_ids.to_vec2::<u32>()?;
        let mask = batch.attention_mask.to_vec2::<u32>()?;
        let labels = batch.labels.to_vec2::<i64>()?;
        assert_eq!(ids[2], vec![30, 31, 0, 0, 0]);
        assert_eq!(mask[2], vec![1, 1, 0, 0, 0]);
        assert_eq!(labels[2][2..], [IGNORE_INDEX; 3]);
        assert_eq!(ids[1], vec![20, 21, 22, 23, 24]);
        Ok(())
    }

    #[test]
    fn uses_given_pad_id_and_keeps_order() -> Result<()> {
        let examples = [example(1, 7), example(2, 8)];
        let refs: Vec<&TokenizedExample> = examples.iter().collect();
        let batch = Collator::new(99).collate(&refs, &Device::Cpu)?;
        let ids = batch.input_ids.to_vec2::<u32>()?;
        assert_eq!(ids, vec![vec![7, 99], vec![8, 9]]);
        Ok(())
    }

    #[test]
    fn leaves_inputs_untouched() -> Result<()> {
        let examples = [example(1, 1), example(4, 1)];
        let before = examples.clone();
        let refs: Vec<&TokenizedExample> = examples.iter().collect();
        Collator::new(0).collate(&refs, &Device::Cpu)?;
        assert_eq!(examples, before);
        Ok(())
    }

    #[test]
    fn rejects_empty_batch() {
        assert!(Collator::new(0).collate(&[], &Device::Cpu).is_err());
    }
}
