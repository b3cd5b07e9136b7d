//! Next-token selection: greedy, temperature, top-k, top-p.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::SamplingParams;

/// Minimum temperature for sampling to prevent division by zero.
const TEMP_MIN: f64 = 1e-6;

pub struct Sampler {
    do_sample: bool,
    temperature: f64,
    top_k: usize,
    top_p: f64,
    rng: StdRng,
}

impl Sampler {
    pub fn new(params: &SamplingParams) -> Self {
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            do_sample: params.do_sample,
            temperature: params.temperature.max(TEMP_MIN),
            top_k: params.top_k,
            top_p: params.top_p,
            rng,
        }
    }

    /// Pick a token id from raw logits over the vocabulary.
    pub fn sample(&mut self, logits: &[f32]) -> u32 {
        if !self.do_sample {
            return argmax(logits);
        }

        let temp = self.temperature as f32;
        let mut scaled: Vec<f32> = logits.iter().map(|&v| v / temp).collect();

        // Top-k filter
        if self.top_k > 0 && self.top_k < scaled.len() {
            let mut sorted = scaled.clone();
            sorted.sort_unstable_by(|a, b| b.total_cmp(a));
            let threshold = sorted[self.top_k - 1];
            for v in &mut scaled {
                if *v < threshold {
                    *v = f32::NEG_INFINITY;
                }
            }
        }

        let mut probs = softmax(&scaled);

        // Top-p (nucleus) filter
        if self.top_p < 1.0 {
            let mut order: Vec<usize> = (0..probs.len()).collect();
            order.sort_unstable_by(|&a, &b| probs[b].total_cmp(&probs[a]));
            let mut keep = vec![false; probs.len()];
            let mut cumsum = 0.0f32;
            for idx in order {
                keep[idx] = true;
                cumsum += probs[idx];
                if cumsum >= self.top_p as f32 {
                    break;
                }
            }
            for (p, kept) in probs.iter_mut().zip(&keep) {
                if !kept {
                    *p = 0.0;
                }
            }
            normalize(&mut probs);
        }

        self.weighted_sample(&probs)
    }

    fn weighted_sample(&mut self, probs: &[f32]) -> u32 {
        let r: f32 = self.rng.gen();
        let mut cumsum = 0.0;
        for (i, &p) in probs.iter().enumerate() {
            cumsum += p;
            if cumsum >= r {
                return i as u32;
            }
        }
        // Rounding left r above the total mass; take the last live token.
        probs.iter().rposition(|&p| p > 0.0).unwrap_or(0) as u32
    }
}

fn argmax(v: &[f32]) -> u32 {
    v.iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i as u32)
        .unwrap_or(0)
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut probs: Vec<f32> = logits.iter().map(|&v| (v - max_val).exp()).collect();
    normalize(&mut probs);
    probs
}

fn normalize(probs: &mut [f32]) {
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for p in probs.iter_mut() {
            *p /= sum;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(do_sample: bool, top_k: usize, top_p: f64) -> SamplingParams {
        SamplingParams {
            do_sample,
            top_k,
            top_p,
            seed: Some(7),
            ..SamplingParams::default()
        }
    }

    #[test]
    fn greedy_takes_argmax() {
        let mut sampler = Sampler::new(&params(false, 0, 1.0));
        assert_eq!(sampler.sample(&[0.1, 2.0, -1.0, 1.9]), 1);
    }

    #[test]
    fn top_k_one_is_greedy() {
        let mut sampler = Sampler::new(&params(true, 1, 1.0));
        for _ in 0..20 {
            assert_eq!(sampler.sample(&[0.5, 0.1, 3.0, 2.9]), 2);
        }
    }

    #[test]
    fn top_p_drops_the_tail() {
        // Token 0 holds ~0.98 of the mass, so p=0.5 keeps only it.
        let mut sampler = Sampler::new(&params(true, 0, 0.5));
        for _ in 0..20 {
            assert_eq!(sampler.sample(&[8.0, 0.0, 0.0, 0.0]), 0);
        }
    }

    #[test]
    fn same_seed_same_tokens() {
        let logits = [1.0, 1.1, 0.9, 1.05, 0.95];
        let mut a = Sampler::new(&params(true, 0, 1.0));
        let mut b = Sampler::new(&params(true, 0, 1.0));
        let xs: Vec<u32> = (0..16).map(|_| a.sample(&logits)).collect();
        let ys: Vec<u32> = (0..16).map(|_| b.sample(&logits)).collect();
        assert_eq!(xs, ys);
    }
}
