//! Training configuration and helpers shared by every training loop

use std::path::{Path, PathBuf};

use tracing::warn;

use super::metrics::TrainingMetrics;
use crate::error::{Result, RopeGanError};
use crate::utils::{save_checkpoint, AdversarialModel};

/// Training configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Generator iterations (adversarial models)
    pub itrs: usize,
    /// Passes over the training set (decoder)
    pub epochs: usize,
    /// Adam learning rate
    pub lr: f64,
    /// Critic updates per generator update
    pub n_critic: usize,
    /// Save samples every N iterations (or figures every N epochs)
    pub log_interval: usize,
    /// Save a checkpoint every N iterations
    pub checkpoint_every: usize,
    /// Folder holding one sub-folder per run
    pub out_dir: PathBuf,
    /// Run name, the sub-folder of `out_dir`
    pub name: String,
    /// Weight of the mutual-information term (InfoWGAN)
    pub info_weight: f64,
    /// Seed for rotations and weight initialisation
    pub seed: u64,
    /// Intermediate points of decoder interpolations
    pub n_interp: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::wgan()
    }
}

impl TrainingConfig {
    /// Settings of the WGAN-GP script
    pub fn wgan() -> Self {
        Self {
            itrs: 100_000,
            epochs: 100,
            lr: 2e-4,
            n_critic: 5,
            log_interval: 1000,
            checkpoint_every: 10_000,
            out_dir: PathBuf::from("out"),
            name: "wgan".to_string(),
            info_weight: 0.1,
            seed: 0,
            n_interp: 8,
        }
    }

    /// Settings of the GAN script: one discriminator step per generator step
    pub fn gan() -> Self {
        Self {
            n_critic: 1,
            name: "gan".to_string(),
            ..Self::wgan()
        }
    }

    /// Settings of the InfoWGAN script
    pub fn infowgan() -> Self {
        Self {
            itrs: 30_000,
            log_interval: 100,
            name: "infowgan".to_string(),
            ..Self::wgan()
        }
    }

    /// Settings of the decoder script
    pub fn decoder() -> Self {
        Self {
            log_interval: 1,
            name: "recon".to_string(),
            ..Self::wgan()
        }
    }

    /// Output folder of this run
    pub fn run_folder(&self) -> PathBuf {
        self.out_dir.join(&self.name)
    }

    /// Check the loop parameters
    pub fn validate(&self) -> Result<()> {
        if self.lr <= 0.0 {
            return Err(RopeGanError::InvalidArgument(format!(
                "learning rate must be > 0, got {}",
                self.lr
            )));
        }
        if self.n_critic == 0 || self.log_interval == 0 || self.checkpoint_every == 0 {
            return Err(RopeGanError::InvalidArgument(
                "n_critic, log_interval and checkpoint_every must be > 0".to_string(),
            ));
        }
        if self.name.is_empty() {
            return Err(RopeGanError::InvalidArgument(
                "run name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Check that a run resumed after `completed` iterations still has work left
    pub fn check_resume(&self, completed: usize) -> Result<()> {
        if completed > self.itrs {
            return Err(RopeGanError::InvalidArgument(format!(
                "checkpoint is at iteration {}, past the requested {} iterations",
                completed, self.itrs
            )));
        }
        Ok(())
    }
}

/// Save a checkpoint after `completed` iterations when one is due
///
/// Failures are logged and training goes on.
pub(crate) fn checkpoint_if_due<M: AdversarialModel>(
    model: &M,
    metrics: &TrainingMetrics,
    completed: usize,
    config: &TrainingConfig,
) {
    if completed % config.checkpoint_every == 0 {
        save_checkpoint_logged(model, metrics, completed, &config.run_folder());
    }
}

/// Final checkpoint and metrics of an adversarial run
pub(crate) fn finish_run<M: AdversarialModel>(
    model: &M,
    metrics: &TrainingMetrics,
    config: &TrainingConfig,
) {
    let folder = config.run_folder();
    if config.itrs % config.checkpoint_every != 0 {
        save_checkpoint_logged(model, metrics, config.itrs, &folder);
    }
    if let Err(e) = metrics.save_csv(folder.join("training_metrics.csv")) {
        warn!("Failed to save metrics: {}", e);
    }
}

fn save_checkpoint_logged<M: AdversarialModel>(
    model: &M,
    metrics: &TrainingMetrics,
    completed: usize,
    folder: &Path,
) {
    if let Err(e) = save_checkpoint(model, metrics, completed, &folder.join("checkpoints")) {
        warn!("Failed to save checkpoint: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_config_presets() {
        let gan = TrainingConfig::gan();
        assert_eq!(gan.n_critic, 1);
        assert_eq!(gan.itrs, 100_000);
        assert_eq!(gan.run_folder(), PathBuf::from("out/gan"));

        let wgan = TrainingConfig::default();
        assert_eq!(wgan.n_critic, 5);
        assert_eq!(wgan.log_interval, 1000);

        let info = TrainingConfig::infowgan();
        assert_eq!(info.itrs, 30_000);
        assert_eq!(info.log_interval, 100);
        assert!((info.info_weight - 0.1).abs() < 1e-12);

        let dec = TrainingConfig::decoder();
        assert_eq!(dec.epochs, 100);
        assert_eq!(dec.log_interval, 1);
        assert_eq!(dec.name, "recon");
    }

    #[test]
    fn test_training_config_validation() {
        assert!(TrainingConfig::default().validate().is_ok());

        let mut config = TrainingConfig::default();
        config.log_interval = 0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.lr = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_check_resume() {
        let config = TrainingConfig {
            itrs: 15_000,
            ..TrainingConfig::default()
        };
        assert!(config.check_resume(0).is_ok());
        assert!(config.check_resume(15_000).is_ok());
        assert!(matches!(
            config.check_resume(20_000),
            Err(RopeGanError::InvalidArgument(_))
        ));
    }
}
