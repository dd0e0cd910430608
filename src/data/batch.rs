use std::sync::Arc;

use super::filter::CifarDataSet;
use super::model::{ClassSet, Label, RawDataset};
use crate::error::Result;

/// A contiguous run of samples from a view.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `len × sample_len` pixels, row major.
    pub images: Vec<f32>,
    pub labels: Vec<Label>,
    pub class_ids: Vec<usize>,
    pub sample_len: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.class_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.class_ids.is_empty()
    }

    pub fn image(&self, idx: usize) -> &[f32] {
        &self.images[idx * self.sample_len..(idx + 1) * self.sample_len]
    }
}

/// Iterates a [`CifarDataSet`] in view order, `batch_size` samples at a time.
/// The last batch may be short.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: CifarDataSet,
    batch_size: usize,
}

impl DataLoader {
    pub fn new(dataset: CifarDataSet, batch_size: usize) -> Self {
        Self {
            dataset,
            batch_size: batch_size.max(1),
        }
    }

    /// Loader over `data` restricted to `classes`.
    pub fn for_classes(data: &Arc<RawDataset>, classes: &ClassSet, batch_size: usize) -> Result<Self> {
        let dataset = CifarDataSet::new(Arc::clone(data), Some(classes.clone()))?;
        Ok(Self::new(dataset, batch_size))
    }

    pub fn dataset(&self) -> &CifarDataSet {
        &self.dataset
    }

    pub fn dataset_mut(&mut self) -> &mut CifarDataSet {
        &mut self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of batches per pass.
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn batches(&self) -> impl Iterator<Item = Result<Batch>> + '_ {
        (0..self.num_batches()).map(move |b| self.batch(b))
    }

    fn batch(&self, b: usize) -> Result<Batch> {
        let start = b * self.batch_size;
        let end = (start + self.batch_size).min(self.dataset.len());
        let mut batch = Batch {
            images: Vec::new(),
            labels: Vec::with_capacity(end - start),
            class_ids: Vec::with_capacity(end - start),
            sample_len: 0,
        };
        for idx in start..end {
            let sample = self.dataset.get(idx)?;
            batch.sample_len = sample.image.len();
            batch.images.extend_from_slice(&sample.image);
            batch.labels.push(sample.label);
            batch.class_ids.push(sample.class_id);
        }
        Ok(batch)
    }
}
