//! Batching over a [`Dataset`].
//!
//! Sample loading runs on a `rayon` pool owned by the loader. The pool is
//! built when a job creates its loaders and torn down with them, so workers
//! never outlive the job.

use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::sync::Arc;

use super::transforms::{ImageTensor, Target};
use super::{Dataset, Sample};
use crate::error::{Result, TrainingError};
use crate::training::reproducibility::RngHandle;

/// A minibatch, in sample order.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Vec<ImageTensor>,
    pub targets: Vec<Target>,
    /// Set when every sample in the batch carries its set size.
    pub set_sizes: Option<Vec<u32>>,
}

impl Batch {
    pub fn from_samples(samples: Vec<Sample>) -> Self {
        let set_sizes: Option<Vec<u32>> = samples.iter().map(|s| s.set_size).collect();
        let (images, targets) = samples.into_iter().map(|s| (s.image, s.target)).unzip();
        Self {
            images,
            targets,
            set_sizes,
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

pub struct DataLoader {
    dataset: Arc<dyn Dataset>,
    batch_size: usize,
    shuffle: bool,
    pool: Option<rayon::ThreadPool>,
    rng: RngHandle,
}

impl DataLoader {
    /// `num_workers = 0` loads samples on the calling thread.
    pub fn new(
        dataset: Arc<dyn Dataset>,
        batch_size: usize,
        shuffle: bool,
        num_workers: usize,
        rng: RngHandle,
    ) -> Result<Self> {
        if dataset.is_empty() {
            return Err(TrainingError::EmptyDataset {
                split: dataset.split().to_string(),
            }
            .into());
        }
        let pool = if num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(num_workers)
                .thread_name(|i| format!("searchnets-loader-{i}"))
                .build()
                .map_err(|e| TrainingError::backend(format!("could not start loader workers: {e}")))?;
            Some(pool)
        } else {
            None
        };
        Ok(Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            pool,
            rng,
        })
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.dataset
    }

    /// One pass over the dataset. Shuffling draws from the shared generator
    /// when this is called, not while iterating.
    pub fn batches(&self) -> impl Iterator<Item = Result<Batch>> + '_ {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(&mut *self.rng.lock());
        }
        let chunks: Vec<Vec<usize>> = order.chunks(self.batch_size).map(<[usize]>::to_vec).collect();
        chunks.into_iter().map(move |indices| self.load(&indices))
    }

    fn load(&self, indices: &[usize]) -> Result<Batch> {
        let samples: Result<Vec<Sample>> = match &self.pool {
            Some(pool) => pool.install(|| {
                indices
                    .par_iter()
                    .map(|&i| self.dataset.get(i))
                    .collect()
            }),
            None => indices.iter().map(|&i| self.dataset.get(i)).collect(),
        };
        Ok(Batch::from_samples(samples?))
    }
}
