//! Configuration management
//!
//! Provides one configuration file shared by every training command. Command
//! line flags override the values loaded here.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data configuration
    pub data: DataConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Training configuration
    pub training: TrainingConfigFile,
}

/// Data-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Image folder used by the adversarial models
    pub root: String,
    /// Batch size
    pub batch_size: usize,
    /// Seed for shuffling, rotations and weight initialisation
    pub seed: u64,
}

/// Model-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Base filters of generators and decoders
    pub ngf: i64,
    /// Base filters of discriminators, critics and posteriors
    pub ndf: i64,
    /// Gradient penalty weight
    pub lambda: f64,
    /// Hidden 3x3 conv layers of the FCN mask network
    pub fcn_depth: usize,
}

/// Training-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfigFile {
    /// Adam learning rate
    pub lr: f64,
    /// Critic steps per generator step for WGAN-GP and InfoWGAN
    pub n_critic: usize,
    /// Weight of the mutual-information term
    pub info_weight: f64,
    /// Checkpoint frequency in iterations
    pub checkpoint_every: usize,
    /// Folder holding one sub-folder per run
    pub out_dir: String,
    /// Device: "cpu" or "cuda"
    pub device: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                root: "data/rope/full_data".to_string(),
                batch_size: 128,
                seed: 0,
            },
            model: ModelConfig {
                ngf: 64,
                ndf: 64,
                lambda: 10.0,
                fcn_depth: 2,
            },
            training: TrainingConfigFile {
                lr: 2e-4,
                n_critic: 5,
                info_weight: 0.1,
                checkpoint_every: 10_000,
                out_dir: "out".to_string(),
                device: "cpu".to_string(),
            },
        }
    }
}

impl Config {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_toml(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_toml(&self, path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn from_json(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load from TOML or JSON depending on the extension
    pub fn load(path: &str) -> anyhow::Result<Self> {
        if path.ends_with(".toml") {
            Self::from_toml(path)
        } else {
            Self::from_json(path)
        }
    }

    /// Save as TOML or JSON depending on the extension
    pub fn save(&self, path: &str) -> anyhow::Result<()> {
        if path.ends_with(".toml") {
            self.save_toml(path)
        } else {
            self.save_json(path)
        }
    }

    /// Get device from configuration
    pub fn get_device(&self) -> tch::Device {
        match self.training.device.to_lowercase().as_str() {
            "cuda" | "gpu" => {
                if tch::Cuda::is_available() {
                    tch::Device::Cuda(0)
                } else {
                    tracing::warn!("CUDA requested but not available, falling back to CPU");
                    tch::Device::Cpu
                }
            }
            _ => tch::Device::Cpu,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.data.batch_size == 0 {
            anyhow::bail!("Batch size must be > 0");
        }
        if self.model.ngf <= 0 || self.model.ndf <= 0 {
            anyhow::bail!("Filter counts must be > 0");
        }
        if self.model.lambda < 0.0 {
            anyhow::bail!("Gradient penalty weight must be >= 0");
        }
        if self.training.lr <= 0.0 {
            anyhow::bail!("Learning rate must be > 0");
        }
        if self.training.n_critic == 0 {
            anyhow::bail!("Number of critic steps must be > 0");
        }
        if self.training.checkpoint_every == 0 {
            anyhow::bail!("Checkpoint frequency must be > 0");
        }
        Ok(())
    }
}

/// Create default configuration file if it doesn't exist
pub fn ensure_config_exists(path: &str) -> anyhow::Result<Config> {
    if Path::new(path).exists() {
        Config::load(path)
    } else {
        let config = Config::default();
        config.save(path)?;
        tracing::info!("Wrote default configuration to {}", path);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.data.batch_size, 128);
        assert_eq!(config.training.n_critic, 5);
        assert!((config.training.info_weight - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let loaded: Config = serde_json::from_str(&json).unwrap();

        assert_eq!(config.data.root, loaded.data.root);
        assert_eq!(config.model.ngf, loaded.model.ngf);
    }

    #[test]
    fn test_config_toml_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.training.lr = 1e-3;
        config.save(path).unwrap();

        let loaded = Config::load(path).unwrap();
        assert_eq!(loaded.training.lr, 1e-3);
        assert_eq!(loaded.training.out_dir, "out");
    }

    #[test]
    fn test_ensure_config_exists_creates_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let path = path.to_str().unwrap();

        let created = ensure_config_exists(path).unwrap();
        assert!(Path::new(path).exists());
        let loaded = ensure_config_exists(path).unwrap();
        assert_eq!(created.data.root, loaded.data.root);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.data.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.training.n_critic = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cpu_device() {
        assert_eq!(Config::default().get_device(), tch::Device::Cpu);
    }
}
