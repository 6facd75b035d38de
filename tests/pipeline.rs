//! End-to-end runs on small synthetic rope datasets

use std::path::Path;

use image::{Rgb, RgbImage};
use tch::{Device, Kind, Tensor};
use tempfile::TempDir;

use rust_wgan_rope::data::{
    DataLoader, ImageFolder, InfiniteBatches, RolloutOptions, Transform, TransformKind,
};
use rust_wgan_rope::model::{
    CpcMeta, CpcModel, Decoder, DecoderConfig, Gan, InfoWgan, Wgan, WganConfig,
};
use rust_wgan_rope::training::{
    DecoderTrainer, GanTrainer, InfoWganTrainer, TrainingConfig, WganTrainer,
};
use rust_wgan_rope::utils::{find_latest_checkpoint, list_checkpoints, load_checkpoint};
use rust_wgan_rope::viz::InterpolationKind;

fn write_rope_images(dir: &Path, count: usize, offset: usize) {
    std::fs::create_dir_all(dir).unwrap();
    for i in 0..count {
        let shift = i + offset;
        let img = RgbImage::from_fn(80, 80, |x, y| {
            let diagonal = (x as i64 - y as i64 - shift as i64 * 4).abs() < 3;
            if diagonal || (y as usize + shift) % 17 == 0 {
                Rgb([230, 220, 210])
            } else {
                Rgb([10, 10, 10])
            }
        });
        img.save(dir.join(format!("img_{:02}_000.png", i))).unwrap();
    }
}

fn image_root(classes: usize, per_class: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    for c in 0..classes {
        write_rope_images(&dir.path().join(format!("class{}", c)), per_class, c * 5);
    }
    dir
}

fn batches(root: &Path, kind: TransformKind, batch_size: usize) -> InfiniteBatches {
    let dataset = ImageFolder::new(root, Transform::new(kind)).unwrap();
    InfiniteBatches::new(DataLoader::new(dataset, batch_size, true, 7).unwrap())
}

fn short_run(out: &Path, preset: TrainingConfig) -> TrainingConfig {
    TrainingConfig {
        itrs: 2,
        n_critic: preset.n_critic.min(2),
        log_interval: 1,
        checkpoint_every: 1,
        out_dir: out.to_path_buf(),
        ..preset
    }
}

#[test]
fn gan_run_writes_samples_and_checkpoints() {
    tch::manual_seed(0);
    let data = image_root(2, 3);
    let out = TempDir::new().unwrap();

    let mut model = Gan::new(8, 1, 4, 4, Device::Cpu);
    let mut trainer = GanTrainer::new(short_run(out.path(), TrainingConfig::gan()));
    let mut stream = batches(data.path(), TransformKind::Rope, 4);
    let metrics = trainer.train(&mut model, &mut stream, None).unwrap();

    assert_eq!(metrics.len(), 2);
    let run = out.path().join("gan");
    assert!(run.join("samples_itr0.png").exists());
    assert!(run.join("samples_itr1.png").exists());
    assert_eq!(list_checkpoints(&run.join("checkpoints")).len(), 2);
}

#[test]
fn wgan_checkpoint_restores_generator() {
    tch::manual_seed(1);
    let data = image_root(1, 5);
    let out = TempDir::new().unwrap();
    let config = WganConfig {
        z_dim: 4,
        ngf: 4,
        ndf: 4,
        ..Default::default()
    };

    let mut model = Wgan::new(config.clone(), Device::Cpu);
    let mut trainer = WganTrainer::new(short_run(out.path(), TrainingConfig::wgan()));
    let mut stream = batches(data.path(), TransformKind::RopeNoDilate, 2);
    trainer.train(&mut model, &mut stream).unwrap();

    let latest = find_latest_checkpoint(&out.path().join("wgan/checkpoints")).unwrap();
    let mut restored = Wgan::new(config, Device::Cpu);
    let (completed, metrics) = load_checkpoint(&mut restored, &latest).unwrap();
    assert_eq!(completed, 2);
    assert_eq!(metrics.steps, vec![0, 1]);

    model.eval();
    restored.eval();
    let z = Tensor::randn([3, 4], (Kind::Float, Device::Cpu));
    let a = model.generator.forward_t(&z, false);
    let b = restored.generator.forward_t(&z, false);
    assert!(a.allclose(&b, 1e-5, 1e-5, false));
}

#[test]
fn infowgan_run_produces_code_grid() {
    tch::manual_seed(2);
    let data = image_root(1, 4);
    let out = TempDir::new().unwrap();

    let mut model = InfoWgan::new(
        WganConfig {
            z_dim: 3,
            c_dim: 2,
            ngf: 4,
            ndf: 4,
            ..Default::default()
        },
        Device::Cpu,
    )
    .unwrap();
    let mut trainer = InfoWganTrainer::new(short_run(out.path(), TrainingConfig::infowgan()));
    let mut stream = batches(data.path(), TransformKind::Rope, 2);
    let metrics = trainer.train(&mut model, &mut stream).unwrap();

    assert!(metrics.mi_losses.iter().all(|m| m.is_finite()));
    let run = out.path().join("infowgan");
    assert!(run.join("example_dset_infowgan.png").exists());
    let grid = image::open(run.join("samples_itr1.png")).unwrap();
    assert_eq!(grid.width(), grid.height());
}

#[test]
fn decoder_run_renders_latent_reports() {
    tch::manual_seed(3);
    let data = TempDir::new().unwrap();
    let (episodes, frames, action_dim) = (3usize, 4, 2);
    for e in 0..episodes {
        let dir = data.path().join("train_data").join(format!("run{}", e));
        write_rope_images(&dir, frames, e * 3);
        Tensor::randn([frames as i64, action_dim], (Kind::Float, Device::Cpu))
            .write_npy(dir.join("actions.npy"))
            .unwrap();
    }
    write_rope_images(&data.path().join("test_data/run0"), frames, 0);

    let out = TempDir::new().unwrap();
    let run = out.path().join("recon");
    CpcModel::new(
        CpcMeta {
            z_dim: 6,
            action_dim,
            channels: 1,
            include_actions: true,
            ndf: 4,
            hidden: 8,
        },
        Device::Cpu,
    )
    .save(&run)
    .unwrap();
    let cpc = CpcModel::load(&run, Device::Cpu).unwrap();

    let transform = Transform::new(TransformKind::Rope);
    let train = ImageFolder::new(data.path().join("train_data"), transform).unwrap();
    let test = ImageFolder::new(data.path().join("test_data"), transform).unwrap();
    let mut train_loader = DataLoader::new(train, 6, true, 0).unwrap();
    let mut test_loader = DataLoader::new(test, 6, true, 1).unwrap();

    let mut decoder = Decoder::new(
        DecoderConfig {
            z_dim: 6,
            discrete: true,
            n_bit: 3,
            ngf: 4,
            ..Default::default()
        },
        Device::Cpu,
    )
    .unwrap();

    let config = TrainingConfig {
        epochs: 1,
        n_interp: 1,
        out_dir: out.path().to_path_buf(),
        ..TrainingConfig::decoder()
    };
    let rollout = RolloutOptions {
        n_episodes: episodes,
        ..RolloutOptions::for_dataset(false, false)
    };
    let mut trainer = DecoderTrainer::new(config, rollout)
        .with_interpolation(InterpolationKind::Linear);
    let history = trainer
        .train(&mut decoder, &cpc, &mut train_loader, &mut test_loader, None)
        .unwrap();

    assert_eq!(history.len(), 1);
    assert!(run.join("decoder.ot").exists());
    let dynamics = image::open(run.join("run_dynamics/dyn_epoch0.png")).unwrap();
    // 3 episodes, real and rollout rows of 4 frames
    assert_eq!(dynamics.width(), 4 * 66 + 2);
    assert_eq!(dynamics.height(), 6 * 66 + 2);
}
