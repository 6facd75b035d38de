//! Checkpoint save/load utilities
//!
//! Provides functions for saving and loading adversarial model checkpoints
//! along with training state.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RopeGanError};
use crate::model::{Gan, InfoWgan, Wgan};
use crate::training::TrainingMetrics;

/// Generator weights inside a checkpoint folder
pub const GENERATOR_FILE: &str = "generator.ot";
/// Discriminator / critic weights inside a checkpoint folder
pub const CRITIC_FILE: &str = "critic.ot";

const CHECKPOINT_PREFIX: &str = "checkpoint_itr_";

const META_FILE: &str = "meta.json";

/// Adversarial model family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// BCE GAN
    Gan,
    /// WGAN-GP
    Wgan,
    /// WGAN-GP with a code and posterior
    InfoWgan,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Gan => write!(f, "gan"),
            ModelKind::Wgan => write!(f, "wgan"),
            ModelKind::InfoWgan => write!(f, "infowgan"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = RopeGanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "gan" => Ok(ModelKind::Gan),
            "wgan" => Ok(ModelKind::Wgan),
            "infowgan" => Ok(ModelKind::InfoWgan),
            other => Err(RopeGanError::InvalidArgument(format!(
                "unknown model kind '{}', expected gan, wgan or infowgan",
                other
            ))),
        }
    }
}

/// Dimensions needed to rebuild a model before loading its weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Model family
    pub kind: ModelKind,
    /// Noise dimension
    pub z_dim: i64,
    /// Code dimension (0 unless InfoWGAN)
    pub c_dim: i64,
    /// Image channels
    pub channels: i64,
    /// Generator base filters
    pub ngf: i64,
    /// Discriminator / critic base filters
    pub ndf: i64,
}

/// Model that can be written to and restored from a checkpoint
pub trait AdversarialModel {
    /// Dimensions of the model
    fn spec(&self) -> ModelSpec;

    /// Save generator and discriminator weights
    fn save_weights(&self, gen_path: &Path, critic_path: &Path) -> Result<()>;

    /// Load generator and discriminator weights
    fn load_weights(&mut self, gen_path: &Path, critic_path: &Path) -> Result<()>;
}

impl AdversarialModel for Gan {
    fn spec(&self) -> ModelSpec {
        ModelSpec {
            kind: ModelKind::Gan,
            z_dim: self.z_dim(),
            c_dim: 0,
            channels: self.generator.config().out_channels,
            ngf: self.generator.config().ngf,
            ndf: self.discriminator.config().ndf,
        }
    }

    fn save_weights(&self, gen_path: &Path, critic_path: &Path) -> Result<()> {
        self.save(gen_path, critic_path)
    }

    fn load_weights(&mut self, gen_path: &Path, critic_path: &Path) -> Result<()> {
        self.load(gen_path, critic_path)
    }
}

impl AdversarialModel for Wgan {
    fn spec(&self) -> ModelSpec {
        let config = self.config();
        ModelSpec {
            kind: ModelKind::Wgan,
            z_dim: config.z_dim,
            c_dim: config.c_dim,
            channels: config.channels,
            ngf: config.ngf,
            ndf: config.ndf,
        }
    }

    fn save_weights(&self, gen_path: &Path, critic_path: &Path) -> Result<()> {
        self.save(gen_path, critic_path)
    }

    fn load_weights(&mut self, gen_path: &Path, critic_path: &Path) -> Result<()> {
        self.load(gen_path, critic_path)
    }
}

impl AdversarialModel for InfoWgan {
    fn spec(&self) -> ModelSpec {
        ModelSpec {
            kind: ModelKind::InfoWgan,
            ..self.wgan.spec()
        }
    }

    fn save_weights(&self, gen_path: &Path, critic_path: &Path) -> Result<()> {
        self.wgan.save(gen_path, critic_path)
    }

    fn load_weights(&mut self, gen_path: &Path, critic_path: &Path) -> Result<()> {
        self.wgan.load(gen_path, critic_path)
    }
}

/// Checkpoint metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Training iteration
    pub iteration: usize,
    /// Generator loss at checkpoint
    pub gen_loss: f64,
    /// Discriminator / critic loss at checkpoint
    pub disc_loss: f64,
    /// Timestamp of checkpoint
    pub timestamp: String,
    /// Model specification (as JSON)
    pub config: String,
}

impl CheckpointMeta {
    /// Parse the stored model specification
    pub fn spec(&self) -> anyhow::Result<ModelSpec> {
        Ok(serde_json::from_str(&self.config)?)
    }
}

/// Save a complete checkpoint (model + metadata)
///
/// # Arguments
///
/// * `model` - Model to save
/// * `metrics` - Training metrics
/// * `itr` - Current iteration
/// * `dir` - Directory to save checkpoint
///
/// # Returns
///
/// Path to saved checkpoint
pub fn save_checkpoint<M: AdversarialModel>(
    model: &M,
    metrics: &TrainingMetrics,
    itr: usize,
    dir: &Path,
) -> anyhow::Result<PathBuf> {
    let checkpoint_dir = dir.join(format!("{}{:07}", CHECKPOINT_PREFIX, itr));
    std::fs::create_dir_all(&checkpoint_dir)?;

    model.save_weights(
        &checkpoint_dir.join(GENERATOR_FILE),
        &checkpoint_dir.join(CRITIC_FILE),
    )?;

    let meta = CheckpointMeta {
        iteration: itr,
        gen_loss: metrics.latest_gen_loss().unwrap_or(0.0),
        disc_loss: metrics.latest_disc_loss().unwrap_or(0.0),
        timestamp: chrono::Utc::now().to_rfc3339(),
        config: serde_json::to_string(&model.spec())?,
    };
    let meta_json = serde_json::to_string_pretty(&meta)?;
    std::fs::write(checkpoint_dir.join(META_FILE), meta_json)?;

    metrics.save_csv(checkpoint_dir.join("metrics.csv"))?;

    tracing::info!("Saved checkpoint to {}", checkpoint_dir.display());
    Ok(checkpoint_dir)
}

/// Load checkpoint metadata
pub fn load_checkpoint_meta(checkpoint_dir: &Path) -> anyhow::Result<CheckpointMeta> {
    let content = std::fs::read_to_string(checkpoint_dir.join(META_FILE))?;
    let meta: CheckpointMeta = serde_json::from_str(&content)?;
    Ok(meta)
}

/// Load a complete checkpoint
///
/// Fails if the checkpoint was written by a model of different dimensions.
///
/// # Returns
///
/// Tuple of (iteration, metrics)
pub fn load_checkpoint<M: AdversarialModel>(
    model: &mut M,
    checkpoint_dir: &Path,
) -> anyhow::Result<(usize, TrainingMetrics)> {
    let meta = load_checkpoint_meta(checkpoint_dir)?;
    let stored = meta.spec()?;
    if stored != model.spec() {
        anyhow::bail!(
            "checkpoint {} holds {:?}, model is {:?}",
            checkpoint_dir.display(),
            stored,
            model.spec()
        );
    }

    model.load_weights(
        &checkpoint_dir.join(GENERATOR_FILE),
        &checkpoint_dir.join(CRITIC_FILE),
    )?;

    let metrics_path = checkpoint_dir.join("metrics.csv");
    let metrics = if metrics_path.exists() {
        TrainingMetrics::load_csv(&metrics_path)?
    } else {
        TrainingMetrics::new()
    };

    tracing::info!(
        "Loaded checkpoint from {} (iteration {})",
        checkpoint_dir.display(),
        meta.iteration
    );
    Ok((meta.iteration, metrics))
}

/// Checkpoint to resume from
///
/// `path` itself when it holds a `meta.json`, otherwise the latest
/// checkpoint inside it.
pub fn resolve_checkpoint(path: &Path) -> anyhow::Result<PathBuf> {
    if path.join(META_FILE).exists() {
        return Ok(path.to_path_buf());
    }
    find_latest_checkpoint(path)
        .ok_or_else(|| anyhow::anyhow!("no checkpoint found in {}", path.display()))
}

/// Load the checkpoint at or inside `path` into `model`
pub fn resume_checkpoint<M: AdversarialModel>(
    model: &mut M,
    path: &Path,
) -> anyhow::Result<(usize, TrainingMetrics)> {
    let checkpoint = resolve_checkpoint(path)?;
    load_checkpoint(model, &checkpoint)
}

fn checkpoint_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut checkpoints: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with(CHECKPOINT_PREFIX))
                .unwrap_or(false)
        })
        .map(|e| e.path())
        .collect();
    checkpoints.sort();
    checkpoints
}

/// Find the latest checkpoint in a directory
pub fn find_latest_checkpoint(dir: &Path) -> Option<PathBuf> {
    checkpoint_dirs(dir).pop()
}

/// List all checkpoints in a directory, oldest first
pub fn list_checkpoints(dir: &Path) -> Vec<(PathBuf, CheckpointMeta)> {
    checkpoint_dirs(dir)
        .into_iter()
        .filter_map(|path| load_checkpoint_meta(&path).ok().map(|meta| (path, meta)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WganConfig;
    use tch::{Device, Kind, Tensor};
    use tempfile::TempDir;

    fn tiny_wgan() -> Wgan {
        Wgan::new(
            WganConfig {
                z_dim: 4,
                ngf: 4,
                ndf: 4,
                ..Default::default()
            },
            Device::Cpu,
        )
    }

    #[test]
    fn test_checkpoint_meta_serialization() {
        let meta = CheckpointMeta {
            iteration: 10,
            gen_loss: 0.5,
            disc_loss: 0.6,
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            config: "{}".to_string(),
        };

        let json = serde_json::to_string(&meta).unwrap();
        let loaded: CheckpointMeta = serde_json::from_str(&json).unwrap();

        assert_eq!(meta.iteration, loaded.iteration);
        assert!(loaded.spec().is_err());
    }

    #[test]
    fn test_model_kind_parse() {
        assert_eq!("infowgan".parse::<ModelKind>().unwrap(), ModelKind::InfoWgan);
        assert_eq!(ModelKind::Wgan.to_string(), "wgan");
        assert!("vae".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_save_and_load_checkpoint() {
        let dir = TempDir::new().unwrap();
        let model = tiny_wgan();
        let mut metrics = TrainingMetrics::new();
        metrics.record(0, -1.0, 2.0, 0.5, 0.0);

        let path = save_checkpoint(&model, &metrics, 1000, dir.path()).unwrap();
        assert!(path.ends_with("checkpoint_itr_0001000"));
        assert!(path.join(GENERATOR_FILE).exists());
        assert!(path.join(CRITIC_FILE).exists());

        let mut restored = tiny_wgan();
        let (itr, loaded) = load_checkpoint(&mut restored, &path).unwrap();
        assert_eq!(itr, 1000);
        assert_eq!(loaded.gen_losses, vec![-1.0]);

        let x = Tensor::randn([2, 1, 64, 64], (Kind::Float, Device::Cpu));
        let a = model.critique(&x);
        let b = restored.critique(&x);
        assert!(a.allclose(&b, 1e-6, 1e-6, false));
    }

    #[test]
    fn test_load_checkpoint_rejects_other_model() {
        let dir = TempDir::new().unwrap();
        let path = save_checkpoint(&tiny_wgan(), &TrainingMetrics::new(), 0, dir.path()).unwrap();

        let mut gan = Gan::new(4, 1, 4, 4, Device::Cpu);
        assert!(load_checkpoint(&mut gan, &path).is_err());
    }

    #[test]
    fn test_find_latest_and_list() {
        let dir = TempDir::new().unwrap();
        assert!(find_latest_checkpoint(dir.path()).is_none());

        let model = tiny_wgan();
        let metrics = TrainingMetrics::new();
        for itr in [500, 20, 10000] {
            save_checkpoint(&model, &metrics, itr, dir.path()).unwrap();
        }

        let latest = find_latest_checkpoint(dir.path()).unwrap();
        assert!(latest.ends_with("checkpoint_itr_0010000"));

        let all = list_checkpoints(dir.path());
        let itrs: Vec<usize> = all.iter().map(|(_, m)| m.iteration).collect();
        assert_eq!(itrs, vec![20, 500, 10000]);
    }

    #[test]
    fn test_resolve_checkpoint() {
        let dir = TempDir::new().unwrap();
        assert!(resolve_checkpoint(dir.path()).is_err());

        let model = tiny_wgan();
        let metrics = TrainingMetrics::new();
        for itr in [10, 30] {
            save_checkpoint(&model, &metrics, itr, dir.path()).unwrap();
        }

        let latest = resolve_checkpoint(dir.path()).unwrap();
        assert!(latest.ends_with("checkpoint_itr_0000030"));

        let older = dir.path().join("checkpoint_itr_0000010");
        assert_eq!(resolve_checkpoint(&older).unwrap(), older);

        let mut restored = tiny_wgan();
        let (completed, _) = resume_checkpoint(&mut restored, &older).unwrap();
        assert_eq!(completed, 10);
    }
}
