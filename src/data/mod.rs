//! Data loading and preprocessing for rope image datasets
//!
//! This module provides:
//! - Class-per-directory image folders
//! - Image transforms (background filtering, grayscale, dilation, rotation)
//! - Batching with seeded shuffling
//! - Episode loading for dynamics rollouts

pub mod image_folder;
pub mod loader;
pub mod trajectories;
pub mod transforms;

pub use image_folder::{list_images, ImageFolder, IMAGE_EXTENSIONS};
pub use loader::{Batch, DataLoader, DataLoaderIter, InfiniteBatches};
pub use trajectories::{load_rollout_episodes, Episodes, RolloutOptions};
pub use transforms::{
    dilate, filter_background, normalize, resize_center_crop, rotate, to_grayscale, Transform,
    TransformKind, IMAGE_SIZE,
};
