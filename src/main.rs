//! Generative models for rope manipulation images
//!
//! Main entry point providing CLI interface for:
//! - Training GAN, WGAN-GP and InfoWGAN models
//! - Training a decoder on the latent space of a pretrained CPC encoder
//! - Sampling images from checkpoints

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tch::Device;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rust_wgan_rope::{
    data::{DataLoader, ImageFolder, InfiniteBatches, RolloutOptions, Transform, TransformKind},
    model::{Decoder, DecoderConfig, FcnMse, Gan, InfoWgan, Wgan, WganConfig},
    training::{
        load_cpc, DecoderTrainer, GanTrainer, InfoWganTrainer, TrainingConfig, TrainingMetrics,
        WganTrainer,
    },
    utils::{
        ensure_config_exists, list_checkpoints, load_checkpoint, load_checkpoint_meta,
        resume_checkpoint, AdversarialModel, Config, ModelKind,
    },
    viz::{save_image, DistanceMetric, InterpolationKind},
};

/// GAN, WGAN-GP and InfoWGAN training on rope manipulation images
#[derive(Parser)]
#[command(name = "rust_wgan_rope")]
#[command(version = "0.1.0")]
#[command(about = "Train generative models on rope images and visualize their latent spaces")]
struct Cli {
    /// Path to configuration file (JSON or TOML); created with defaults if missing
    #[arg(short, long)]
    config: Option<String>,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by the adversarial models; unset values come from the config
#[derive(Args)]
struct AdversarialArgs {
    /// Image folder with one sub-directory per class
    #[arg(long)]
    root: Option<String>,

    /// Batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Checkpoint folder, or a folder of checkpoints to resume the latest one
    #[arg(long)]
    resume: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the BCE GAN with random rotations
    Gan {
        #[command(flatten)]
        common: AdversarialArgs,

        /// Generator iterations
        #[arg(long, default_value_t = 100_000)]
        itrs: usize,

        /// Save samples every N iterations
        #[arg(long, default_value_t = 1000)]
        log_interval: usize,

        /// Noise dimension
        #[arg(long, default_value_t = 32)]
        z_dim: i64,

        /// Run name
        #[arg(long, default_value = "gan")]
        name: String,

        /// FCN mask network weights; raw RGB frames are masked when given
        #[arg(long)]
        fcn_weights: Option<String>,
    },

    /// Train WGAN-GP
    Wgan {
        #[command(flatten)]
        common: AdversarialArgs,

        /// Generator iterations
        #[arg(long, default_value_t = 100_000)]
        itrs: usize,

        /// Save samples every N iterations
        #[arg(long, default_value_t = 1000)]
        log_interval: usize,

        /// Noise dimension
        #[arg(long, default_value_t = 10)]
        z_dim: i64,

        /// Run name
        #[arg(long, default_value = "wgan")]
        name: String,
    },

    /// Train InfoWGAN
    Infowgan {
        #[command(flatten)]
        common: AdversarialArgs,

        /// Generator iterations
        #[arg(long, default_value_t = 30_000)]
        itrs: usize,

        /// Save samples every N iterations
        #[arg(long, default_value_t = 100)]
        log_interval: usize,

        /// Noise dimension
        #[arg(long, default_value_t = 5)]
        z_dim: i64,

        /// Code dimension
        #[arg(long, default_value_t = 10)]
        c_dim: i64,

        /// Run name
        #[arg(long, default_value = "infowgan")]
        name: String,
    },

    /// Train a decoder on a pretrained CPC encoder
    Decoder {
        /// Dataset root holding train_data/ and test_data/
        #[arg(long, default_value = "data/rope")]
        root: String,

        /// Intermediate points per interpolation
        #[arg(long, default_value_t = 8)]
        n_interp: usize,

        /// Raw RGB frames masked by the FCN network
        #[arg(long)]
        thanard_dset: bool,

        /// Feed actions to the transition model
        #[arg(long)]
        include_actions: bool,

        /// Vine trajectories: keep only the first frame of each step
        #[arg(long)]
        vine: bool,

        /// Categorical output over quantized intensities
        #[arg(long)]
        discrete: bool,

        /// Bits per pixel of the discrete decoder
        #[arg(long, default_value_t = 4)]
        n_bit: u32,

        /// Batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(long)]
        lr: Option<f64>,

        /// Number of epochs
        #[arg(long, default_value_t = 100)]
        epochs: usize,

        /// Write figures every N epochs
        #[arg(long, default_value_t = 1)]
        log_interval: usize,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Run name, the folder holding the CPC model
        #[arg(long, default_value = "recon")]
        name: String,

        /// FCN mask network weights (required with --thanard-dset)
        #[arg(long)]
        fcn_weights: Option<String>,

        /// Interpolation: linear or slerp
        #[arg(long, default_value = "slerp")]
        interpolation: String,

        /// Also save nearest neighbours with this metric: l2 or dotproduct
        #[arg(long)]
        nn_metric: Option<String>,
    },

    /// Generate an image grid from a checkpoint
    Sample {
        /// Checkpoint folder
        #[arg(long)]
        checkpoint: String,

        /// Model kind: gan, wgan or infowgan
        #[arg(long)]
        kind: String,

        /// Number of samples
        #[arg(long, default_value_t = 64)]
        num_samples: i64,

        /// Output PNG
        #[arg(short, long, default_value = "samples.png")]
        output: String,
    },

    /// List the checkpoints of a run
    Checkpoints {
        /// Folder holding checkpoint_itr_* folders
        #[arg(long)]
        dir: String,
    },

    /// Initialize default configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "config.json")]
        output: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Commands::Init { output } = &cli.command {
        return init_config(output);
    }

    let config = match &cli.config {
        Some(path) => ensure_config_exists(path)?,
        None => Config::default(),
    };
    config.validate()?;

    match cli.command {
        Commands::Gan {
            common,
            itrs,
            log_interval,
            z_dim,
            name,
            fcn_weights,
        } => {
            let run = RunArgs::new(&config, &common, TrainingConfig::gan(), itrs, log_interval, name);
            train_gan(&config, run, &common, z_dim, fcn_weights.as_deref())?;
        }
        Commands::Wgan {
            common,
            itrs,
            log_interval,
            z_dim,
            name,
        } => {
            let preset = TrainingConfig {
                n_critic: config.training.n_critic,
                ..TrainingConfig::wgan()
            };
            let run = RunArgs::new(&config, &common, preset, itrs, log_interval, name);
            train_wgan(&config, run, &common, z_dim)?;
        }
        Commands::Infowgan {
            common,
            itrs,
            log_interval,
            z_dim,
            c_dim,
            name,
        } => {
            let preset = TrainingConfig {
                n_critic: config.training.n_critic,
                ..TrainingConfig::infowgan()
            };
            let run = RunArgs::new(&config, &common, preset, itrs, log_interval, name);
            train_infowgan(&config, run, &common, z_dim, c_dim)?;
        }
        Commands::Decoder {
            root,
            n_interp,
            thanard_dset,
            include_actions,
            vine,
            discrete,
            n_bit,
            batch_size,
            lr,
            epochs,
            log_interval,
            seed,
            name,
            fcn_weights,
            interpolation,
            nn_metric,
        } => {
            let training = TrainingConfig {
                epochs,
                lr: lr.unwrap_or(config.training.lr),
                log_interval,
                out_dir: PathBuf::from(&config.training.out_dir),
                name,
                seed: seed.unwrap_or(config.data.seed),
                n_interp,
                ..TrainingConfig::decoder()
            };
            let dataset = DatasetArgs {
                root,
                thanard_dset,
                include_actions,
                vine,
                batch_size: batch_size.unwrap_or(config.data.batch_size),
            };
            let decoder = DecoderConfig {
                discrete,
                n_bit,
                ngf: config.model.ngf,
                ..Default::default()
            };
            train_decoder(
                &config,
                training,
                dataset,
                decoder,
                fcn_weights.as_deref(),
                interpolation.parse::<InterpolationKind>()?,
                nn_metric.map(|m| m.parse::<DistanceMetric>()).transpose()?,
            )?;
        }
        Commands::Sample {
            checkpoint,
            kind,
            num_samples,
            output,
        } => {
            sample(&config, Path::new(&checkpoint), kind.parse::<ModelKind>()?, num_samples, &output)?;
        }
        Commands::Checkpoints { dir } => {
            show_checkpoints(Path::new(&dir));
        }
        Commands::Init { .. } => {}
    }

    Ok(())
}

/// Resolved settings of an adversarial run
struct RunArgs {
    training: TrainingConfig,
    root: String,
    batch_size: usize,
}

impl RunArgs {
    fn new(
        config: &Config,
        common: &AdversarialArgs,
        preset: TrainingConfig,
        itrs: usize,
        log_interval: usize,
        name: String,
    ) -> Self {
        let training = TrainingConfig {
            itrs,
            log_interval,
            name,
            lr: common.lr.unwrap_or(config.training.lr),
            checkpoint_every: config.training.checkpoint_every,
            out_dir: PathBuf::from(&config.training.out_dir),
            info_weight: config.training.info_weight,
            seed: common.seed.unwrap_or(config.data.seed),
            ..preset
        };
        Self {
            training,
            root: common.root.clone().unwrap_or_else(|| config.data.root.clone()),
            batch_size: common.batch_size.unwrap_or(config.data.batch_size),
        }
    }

    fn batches(&self, kind: TransformKind) -> Result<InfiniteBatches> {
        let dataset = ImageFolder::new(&self.root, Transform::new(kind))?;
        info!(
            "Loaded {} images in {} classes from {}",
            dataset.len(),
            dataset.classes().len(),
            self.root
        );
        let loader = DataLoader::new(dataset, self.batch_size, true, self.training.seed)?;
        Ok(InfiniteBatches::new(loader))
    }
}

/// Decoder dataset flags
struct DatasetArgs {
    root: String,
    thanard_dset: bool,
    include_actions: bool,
    vine: bool,
    batch_size: usize,
}

fn load_fcn(path: Option<&str>, config: &Config, device: Device) -> Result<Option<FcnMse>> {
    path.map(|p| {
        info!("Loading FCN mask network from {}", p);
        FcnMse::load(p, config.model.fcn_depth, device)
    })
    .transpose()
    .map_err(Into::into)
}

/// Load the `--resume` checkpoint, if any, into `model`
fn resume<M: AdversarialModel>(
    model: &mut M,
    from: Option<&str>,
) -> Result<Option<(usize, TrainingMetrics)>> {
    let Some(path) = from else {
        return Ok(None);
    };
    let (completed, metrics) = resume_checkpoint(model, Path::new(path))?;
    info!("Resuming after {} iterations", completed);
    Ok(Some((completed, metrics)))
}

/// Train the BCE GAN
fn train_gan(
    config: &Config,
    run: RunArgs,
    common: &AdversarialArgs,
    z_dim: i64,
    fcn_weights: Option<&str>,
) -> Result<()> {
    tch::manual_seed(run.training.seed as i64);
    let device = config.get_device();
    info!("Using device: {:?}", device);

    let fcn = load_fcn(fcn_weights, config, device)?;
    let kind = if fcn.is_some() {
        TransformKind::Raw
    } else {
        TransformKind::Rope
    };
    let mut batches = run.batches(kind)?;

    let mut model = Gan::new(z_dim, 1, config.model.ngf, config.model.ndf, device);
    let mut trainer = GanTrainer::new(run.training);
    if let Some((completed, metrics)) = resume(&mut model, common.resume.as_deref())? {
        trainer.resume_from(completed, metrics);
    }

    let metrics = trainer.train(&mut model, &mut batches, fcn.as_ref())?;
    info!(
        "Training complete. Final G_loss: {:.4}, D_loss: {:.4}",
        metrics.latest_gen_loss().unwrap_or(0.0),
        metrics.latest_disc_loss().unwrap_or(0.0)
    );
    Ok(())
}

/// Train WGAN-GP
fn train_wgan(config: &Config, run: RunArgs, common: &AdversarialArgs, z_dim: i64) -> Result<()> {
    tch::manual_seed(run.training.seed as i64);
    let device = config.get_device();
    info!("Using device: {:?}", device);

    let mut batches = run.batches(TransformKind::RopeNoDilate)?;
    let mut model = Wgan::new(
        WganConfig {
            z_dim,
            c_dim: 0,
            channels: 1,
            lambda: config.model.lambda,
            ngf: config.model.ngf,
            ndf: config.model.ndf,
        },
        device,
    );
    let mut trainer = WganTrainer::new(run.training);
    if let Some((completed, metrics)) = resume(&mut model, common.resume.as_deref())? {
        trainer.resume_from(completed, metrics);
    }

    let metrics = trainer.train(&mut model, &mut batches)?;
    info!(
        "Training complete. Final G_loss: {:.4}, D_loss: {:.4}",
        metrics.latest_gen_loss().unwrap_or(0.0),
        metrics.latest_disc_loss().unwrap_or(0.0)
    );
    Ok(())
}

/// Train InfoWGAN
fn train_infowgan(
    config: &Config,
    run: RunArgs,
    common: &AdversarialArgs,
    z_dim: i64,
    c_dim: i64,
) -> Result<()> {
    tch::manual_seed(run.training.seed as i64);
    let device = config.get_device();
    info!("Using device: {:?}", device);

    let mut batches = run.batches(TransformKind::Rope)?;
    let mut model = InfoWgan::new(
        WganConfig {
            z_dim,
            c_dim,
            channels: 1,
            lambda: config.model.lambda,
            ngf: config.model.ngf,
            ndf: config.model.ndf,
        },
        device,
    )?;
    let mut trainer = InfoWganTrainer::new(run.training);
    if let Some((completed, metrics)) = resume(&mut model, common.resume.as_deref())? {
        trainer.resume_from(completed, metrics);
    }

    let metrics = trainer.train(&mut model, &mut batches)?;
    info!(
        "Training complete. Final G_loss: {:.4}, D_loss: {:.4}",
        metrics.latest_gen_loss().unwrap_or(0.0),
        metrics.latest_disc_loss().unwrap_or(0.0)
    );
    Ok(())
}

/// Train the latent decoder of a CPC run
fn train_decoder(
    config: &Config,
    training: TrainingConfig,
    dataset: DatasetArgs,
    decoder: DecoderConfig,
    fcn_weights: Option<&str>,
    interpolation: InterpolationKind,
    nn_metric: Option<DistanceMetric>,
) -> Result<()> {
    tch::manual_seed(training.seed as i64);
    let device = config.get_device();
    info!("Using device: {:?}", device);

    let folder = training.run_folder();
    let cpc = load_cpc(&folder, device, dataset.include_actions)?;

    let fcn = if dataset.thanard_dset {
        let path = fcn_weights
            .ok_or_else(|| anyhow::anyhow!("--thanard-dset needs --fcn-weights"))?;
        load_fcn(Some(path), config, device)?
    } else {
        None
    };
    let transform = Transform::new(if dataset.thanard_dset {
        TransformKind::Raw
    } else {
        TransformKind::Rope
    });

    let root = Path::new(&dataset.root);
    let train = ImageFolder::new(root.join("train_data"), transform)?;
    let test = ImageFolder::new(root.join("test_data"), transform)?;
    info!("Loaded {} train and {} test images", train.len(), test.len());
    let mut train_loader = DataLoader::new(train, dataset.batch_size, true, training.seed)?;
    let mut test_loader = DataLoader::new(test, dataset.batch_size, true, training.seed + 1)?;

    let mut model = Decoder::new(
        DecoderConfig {
            z_dim: cpc.encoder.z_dim(),
            channels: cpc.meta.channels,
            ..decoder
        },
        device,
    )?;

    let rollout = RolloutOptions::for_dataset(dataset.thanard_dset, dataset.vine);
    let mut trainer = DecoderTrainer::new(training, rollout).with_interpolation(interpolation);
    if let Some(metric) = nn_metric {
        trainer = trainer.with_nearest_neighbors(metric);
    }

    let history = trainer.train(
        &mut model,
        &cpc,
        &mut train_loader,
        &mut test_loader,
        fcn.as_ref(),
    )?;
    if let Some(last) = history.last() {
        info!(
            "Training complete. Train loss {:.4}, test loss {:.4}",
            last.train_loss, last.test_loss
        );
    }
    Ok(())
}

/// Generate samples from a checkpoint
fn sample(
    config: &Config,
    checkpoint: &Path,
    kind: ModelKind,
    num_samples: i64,
    output: &str,
) -> Result<()> {
    let device = config.get_device();
    let spec = load_checkpoint_meta(checkpoint)?.spec()?;
    if spec.kind != kind {
        anyhow::bail!("{} holds a {} checkpoint, not {}", checkpoint.display(), spec.kind, kind);
    }

    let wgan_config = WganConfig {
        z_dim: spec.z_dim,
        c_dim: spec.c_dim,
        channels: spec.channels,
        lambda: config.model.lambda,
        ngf: spec.ngf,
        ndf: spec.ndf,
    };
    let samples = match kind {
        ModelKind::Gan => {
            let mut model = Gan::new(spec.z_dim, spec.channels, spec.ngf, spec.ndf, device);
            load_checkpoint(&mut model, checkpoint)?;
            model.eval();
            model.sample(num_samples)
        }
        ModelKind::Wgan => {
            let mut model = Wgan::new(wgan_config, device);
            load_checkpoint(&mut model, checkpoint)?;
            model.eval();
            model.sample(num_samples, None)?
        }
        ModelKind::InfoWgan => {
            let mut model = InfoWgan::new(wgan_config, device)?;
            load_checkpoint(&mut model, checkpoint)?;
            model.wgan.eval();
            let c = model.prior.sample(num_samples);
            model.wgan.sample(num_samples, Some(&c))?
        }
    };

    save_image(&samples, output, 8)?;
    info!("Saved {} samples to {}", num_samples, output);
    Ok(())
}

/// Print every checkpoint of a run
fn show_checkpoints(dir: &Path) {
    let checkpoints = list_checkpoints(dir);
    if checkpoints.is_empty() {
        info!("No checkpoints in {}", dir.display());
    }
    for (path, meta) in checkpoints {
        info!(
            "{}: iteration {}, G_loss {:.4}, D_loss {:.4}, saved {}",
            path.display(),
            meta.iteration,
            meta.gen_loss,
            meta.disc_loss,
            meta.timestamp
        );
    }
}

/// Initialize default configuration file
fn init_config(output_path: &str) -> Result<()> {
    let config = Config::default();
    config.save(output_path)?;
    info!("Created default configuration at {}", output_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adversarial(args: &[&str]) -> AdversarialArgs {
        let argv = ["rust_wgan_rope", "wgan"].into_iter().chain(args.iter().copied());
        match Cli::parse_from(argv).command {
            Commands::Wgan { common, .. } => common,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_unset_flags_fall_back_to_config() {
        let mut config = Config::default();
        config.data.root = "data/elsewhere".to_string();
        config.data.batch_size = 32;
        config.training.lr = 1e-3;
        config.training.checkpoint_every = 500;

        let run = RunArgs::new(
            &config,
            &adversarial(&[]),
            TrainingConfig::wgan(),
            200,
            10,
            "wgan".to_string(),
        );
        assert_eq!(run.root, "data/elsewhere");
        assert_eq!(run.batch_size, 32);
        assert!((run.training.lr - 1e-3).abs() < 1e-12);
        assert_eq!(run.training.checkpoint_every, 500);
        assert_eq!(run.training.itrs, 200);
        assert_eq!(run.training.n_critic, 5);
    }

    #[test]
    fn test_flags_override_config() {
        let config = Config::default();
        let common = adversarial(&[
            "--root",
            "ropes",
            "--batch-size",
            "8",
            "--lr",
            "0.01",
            "--seed",
            "3",
            "--resume",
            "out/wgan/checkpoints",
        ]);

        let run = RunArgs::new(
            &config,
            &common,
            TrainingConfig::gan(),
            100,
            10,
            "gan".to_string(),
        );
        assert_eq!(run.root, "ropes");
        assert_eq!(run.batch_size, 8);
        assert!((run.training.lr - 0.01).abs() < 1e-12);
        assert_eq!(run.training.seed, 3);
        assert_eq!(run.training.n_critic, 1);
        assert_eq!(common.resume.as_deref(), Some("out/wgan/checkpoints"));
    }

    #[test]
    fn test_resume_without_flag_loads_nothing() {
        let mut model = Wgan::new(WganConfig::default(), Device::Cpu);
        assert!(resume(&mut model, None).unwrap().is_none());
        assert!(resume(&mut model, Some("/nonexistent/run")).is_err());
    }
}
