//! DataLoader for batching and iterating over image datasets
//!
//! Provides batching for GAN training with support for:
//! - Random shuffling with a seeded RNG
//! - Keeping the last incomplete batch
//! - Endless iteration across epochs (`InfiniteBatches`)

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tch::Tensor;

use super::image_folder::ImageFolder;
use crate::error::{Result, RopeGanError};

/// A batch of images with their class labels
#[derive(Debug)]
pub struct Batch {
    /// Images of shape (batch_size, channels, height, width)
    pub images: Tensor,
    /// Class index of every image
    pub labels: Vec<usize>,
}

impl Batch {
    /// Number of images in the batch
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Check if the batch is empty
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// DataLoader for iterating over batched images
pub struct DataLoader {
    /// Underlying dataset
    dataset: ImageFolder,
    /// Batch size
    batch_size: usize,
    /// Whether to shuffle data each epoch
    shuffle: bool,
    /// Current indices for iteration
    indices: Vec<usize>,
    /// Current position in iteration
    current_idx: usize,
    /// Shuffling RNG
    rng: StdRng,
}

impl DataLoader {
    /// Create a new DataLoader
    ///
    /// # Arguments
    ///
    /// * `dataset` - Image dataset
    /// * `batch_size` - Number of images per batch
    /// * `shuffle` - Whether to shuffle data each epoch
    /// * `seed` - Seed for the shuffling RNG
    pub fn new(dataset: ImageFolder, batch_size: usize, shuffle: bool, seed: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(RopeGanError::InvalidArgument(
                "batch size must be > 0".to_string(),
            ));
        }

        let indices: Vec<usize> = (0..dataset.len()).collect();
        let mut loader = Self {
            dataset,
            batch_size,
            shuffle,
            indices,
            current_idx: 0,
            rng: StdRng::seed_from_u64(seed),
        };

        if shuffle {
            loader.shuffle_indices();
        }

        Ok(loader)
    }

    /// Get the number of batches per epoch
    pub fn num_batches(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }

    /// Get total number of samples
    pub fn num_samples(&self) -> usize {
        self.dataset.len()
    }

    /// Batch size
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Underlying dataset
    pub fn dataset(&self) -> &ImageFolder {
        &self.dataset
    }

    fn shuffle_indices(&mut self) {
        self.indices.shuffle(&mut self.rng);
    }

    /// Reset for new epoch
    pub fn reset(&mut self) {
        self.current_idx = 0;
        if self.shuffle {
            self.shuffle_indices();
        }
    }

    /// Get next batch
    ///
    /// Returns None when the epoch is complete
    pub fn next_batch(&mut self) -> Option<Result<Batch>> {
        let num_samples = self.indices.len();
        let start = self.current_idx;

        if start >= num_samples {
            return None;
        }

        let end = (start + self.batch_size).min(num_samples);
        self.current_idx = end;

        let batch_indices = &self.indices[start..end];
        let labels = self.dataset.labels(batch_indices);
        Some(
            self.dataset
                .load_batch(batch_indices)
                .map(|images| Batch { images, labels }),
        )
    }

    /// First batch of a freshly shuffled epoch. Leaves the loader reset.
    pub fn first_batch(&mut self) -> Result<Batch> {
        self.reset();
        let batch = self.next_batch();
        self.reset();
        batch.unwrap_or_else(|| Err(RopeGanError::Dataset("dataset is empty".to_string())))
    }

    /// Iterate over all batches of a new epoch
    pub fn iter(&mut self) -> DataLoaderIter<'_> {
        self.reset();
        DataLoaderIter { loader: self }
    }
}

/// Iterator adapter for DataLoader
pub struct DataLoaderIter<'a> {
    loader: &'a mut DataLoader,
}

impl<'a> Iterator for DataLoaderIter<'a> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.loader.next_batch()
    }
}

/// Endless batch stream that restarts the loader at every epoch boundary
pub struct InfiniteBatches {
    loader: DataLoader,
    epoch: usize,
}

impl InfiniteBatches {
    /// Wrap a loader
    pub fn new(loader: DataLoader) -> Self {
        Self { loader, epoch: 0 }
    }

    /// Number of completed epochs
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Wrapped loader
    pub fn loader(&self) -> &DataLoader {
        &self.loader
    }

    /// Next batch, wrapping into a new epoch when needed
    pub fn next_batch(&mut self) -> Result<Batch> {
        if let Some(batch) = self.loader.next_batch() {
            return batch;
        }

        self.loader.reset();
        self.epoch += 1;
        self.loader
            .next_batch()
            .unwrap_or_else(|| Err(RopeGanError::Dataset("dataset is empty".to_string())))
    }
}

impl Iterator for InfiniteBatches {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}
