//! # Generative Models for Rope Manipulation Images
//!
//! Training loops and latent-space visualizations for a family of
//! generative models trained on robotic rope manipulation datasets:
//!
//! - GAN with a binary cross-entropy discriminator
//! - WGAN-GP (Wasserstein GAN with gradient penalty)
//! - InfoWGAN (WGAN-GP plus a mutual-information term on a code `c`)
//! - A decoder that renders the latent space of a pretrained CPC encoder
//!
//! ## Modules
//!
//! - `data`: image folders, transforms, batching and trajectory loading
//! - `model`: networks and the GAN / WGAN / decoder wrappers
//! - `training`: training loops, losses and metrics
//! - `viz`: image grids, latent arithmetic and report figures
//! - `utils`: configuration and checkpoints

pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;
pub mod viz;

#[cfg(test)]
mod test_utils;

pub use data::{DataLoader, ImageFolder, InfiniteBatches, Transform, TransformKind};
pub use error::{Result, RopeGanError};
pub use model::{Decoder, Gan, GaussianPosterior, InfoWgan, UniformPrior, Wgan};
pub use training::{
    DecoderTrainer, GanTrainer, InfoWganTrainer, TrainingConfig, TrainingMetrics, WganTrainer,
};
pub use utils::{load_checkpoint, save_checkpoint, Config};
pub use viz::{DistanceMetric, InterpolationKind};
