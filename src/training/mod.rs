//! Training module
//!
//! This module provides:
//! - GAN, WGAN-GP and InfoWGAN training loops
//! - The latent decoder training loop with its report figures
//! - Loss functions (BCE, Wasserstein, gradient penalty, mutual information)
//! - Training configuration and metrics

mod decoder;
mod gan;
mod infowgan;
pub mod losses;
mod metrics;
mod trainer;
mod wgan;

pub use decoder::{evaluate, load_cpc, DecoderTrainer, EpochLoss};
pub use gan::{rotate_batch, GanTrainer};
pub use infowgan::{sample_grid, InfoWganTrainer};
pub use losses::{
    critic_loss_wasserstein, discriminator_loss, generator_loss, generator_loss_wasserstein,
    gradient_penalty, mutual_information_loss,
};
pub use metrics::{RollingStats, TrainingMetrics};
pub use trainer::TrainingConfig;
pub use wgan::WganTrainer;
