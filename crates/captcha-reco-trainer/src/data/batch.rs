//! Fixed-size batching over a [`CaptchaDataset`].

use candle_core::Tensor;
use oorandom::Rand64;

use captcha_reco_core::{CaptchaError, Result};

use crate::data::dataset::{CaptchaDataset, Sample};

/// A collated group of samples.
#[derive(Debug, Clone)]
pub struct Batch {
    /// (batch, 3, height, width)
    pub images: Tensor,
    /// (batch, label_length) `u32` class indices
    pub targets: Tensor,
    pub input_lengths: Vec<usize>,
    pub target_lengths: Vec<usize>,
}

impl Batch {
    /// Stacks samples that share one label length.
    pub fn collate(samples: Vec<Sample>) -> Result<Self> {
        let Some(first) = samples.first() else {
            return Err(CaptchaError::InvalidLength("cannot collate an empty batch".into()));
        };
        let width = first.target.len();
        if let Some(odd) = samples.iter().find(|s| s.target.len() != width) {
            return Err(CaptchaError::ShapeMismatch(format!(
                "targets of length {} and {} in one batch",
                width,
                odd.target.len()
            )));
        }

        let batch = samples.len();
        let device = first.image.device().clone();
        let images: Vec<&Tensor> = samples.iter().map(|s| &s.image).collect();
        let images = Tensor::stack(&images, 0)?;
        let targets: Vec<u32> = samples.iter().flat_map(|s| s.target.iter().copied()).collect();
        let targets = Tensor::from_vec(targets, (batch, width), &device)?;

        Ok(Self {
            images,
            targets,
            input_lengths: samples.iter().map(|s| s.input_length).collect(),
            target_lengths: samples.iter().map(|s| s.label_length).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.input_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_lengths.is_empty()
    }
}

/// Splits a dataset into batches of `batch_size`; the last batch may be
/// smaller and is never dropped.
pub struct BatchLoader<'a> {
    dataset: &'a CaptchaDataset,
    batch_size: usize,
    shuffle_seed: Option<u64>,
}

impl<'a> BatchLoader<'a> {
    pub fn new(dataset: &'a CaptchaDataset, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle_seed: None,
        }
    }

    /// Visit samples in a seeded random order, different for every epoch.
    pub fn shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per epoch, the trailing partial one included.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Sample indices in visiting order for `epoch`.
    pub fn sample_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let mut rng = Rand64::new(u128::from(seed) ^ ((epoch as u128) << 64));
            for i in (1..order.len()).rev() {
                let j = rng.rand_range(0..(i as u64 + 1)) as usize;
                order.swap(i, j);
            }
        }
        order
    }

    /// Lazily loads the batches of one epoch.
    pub fn epoch(&self, epoch: usize) -> Batches<'a> {
        Batches {
            dataset: self.dataset,
            order: self.sample_order(epoch),
            batch_size: self.batch_size,
            cursor: 0,
        }
    }
}

/// Iterator over the batches of one epoch.
pub struct Batches<'a> {
    dataset: &'a CaptchaDataset,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl Iterator for Batches<'_> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = &self.order[self.cursor..end];
        self.cursor = end;

        let samples = indices
            .iter()
            .map(|&idx| self.dataset.get(idx))
            .collect::<Result<Vec<_>>>();
        Some(samples.and_then(Batch::collate))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.cursor).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Batches<'_> {}
