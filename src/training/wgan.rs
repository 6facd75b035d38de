//! Training loop for WGAN-GP

use tracing::info;

use super::metrics::TrainingMetrics;
use super::trainer::{checkpoint_if_due, finish_run, TrainingConfig};
use crate::data::InfiniteBatches;
use crate::error::Result;
use crate::model::Wgan;
use crate::utils::progress_bar;
use crate::viz::save_image;

/// WGAN-GP trainer
pub struct WganTrainer {
    config: TrainingConfig,
    metrics: TrainingMetrics,
    start_itr: usize,
}

impl WganTrainer {
    /// Create a new trainer
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            metrics: TrainingMetrics::new(),
            start_itr: 0,
        }
    }

    /// Continue a run after `completed` iterations with its recorded metrics
    pub fn resume_from(&mut self, completed: usize, metrics: TrainingMetrics) {
        self.start_itr = completed;
        self.metrics = metrics;
    }

    /// Train the critic `n_critic` times per generator step
    ///
    /// The critic minimises `mean D(x_tilde) - mean D(x) + GP(x_hat)`, the
    /// generator minimises `-mean D(G(z))`.
    pub fn train(
        &mut self,
        model: &mut Wgan,
        batches: &mut InfiniteBatches,
    ) -> Result<&TrainingMetrics> {
        self.config.validate()?;
        self.config.check_resume(self.start_itr)?;
        let folder = self.config.run_folder();
        std::fs::create_dir_all(&folder)?;

        let (mut gen_opt, mut critic_opt) = model.optimizers(self.config.lr)?;

        info!(
            "Training WGAN-GP for {} iterations ({} critic steps each), writing to {}",
            self.config.itrs,
            self.config.n_critic,
            folder.display()
        );

        let pb = progress_bar(self.config.itrs as u64);
        pb.set_position(self.start_itr as u64);
        model.train();

        for itr in self.start_itr..self.config.itrs {
            let mut batch_size = 0;
            let mut critic_loss = 0.0;
            let mut penalty = 0.0;
            for _ in 0..self.config.n_critic {
                let x = batches.next_batch()?.images.to_device(model.device);
                batch_size = x.size()[0];

                let x_tilde = model.generate(batch_size, None)?;
                let x_hat = model.interpolate(&x, &x_tilde);
                let gan_loss = model.gan_loss(&x_tilde, &x);
                let gp = model.grad_penalty(&x_hat);
                let loss = &gan_loss + &gp;

                critic_opt.zero_grad();
                loss.backward();
                critic_opt.step();
                critic_loss = gan_loss.double_value(&[]);
                penalty = gp.double_value(&[]);
            }

            let gz = model.generate(batch_size, None)?;
            let gen_loss = model.generator_loss(&gz);
            gen_opt.zero_grad();
            gen_loss.backward();
            gen_opt.step();
            let gen_loss = gen_loss.double_value(&[]);

            pb.set_message(format!(
                "G: {:.4}, D: {:.4}, GP: {:.4}",
                gen_loss, critic_loss, penalty
            ));

            if itr % self.config.log_interval == 0 {
                self.metrics.record(itr, gen_loss, critic_loss, penalty, 0.0);
                model.eval();
                let samples = model.sample(64, None)?;
                save_image(&samples, folder.join(format!("samples_itr{}.png", itr)), 8)?;
                model.train();
            }

            checkpoint_if_due(model, &self.metrics, itr + 1, &self.config);
            pb.inc(1);
        }

        pb.finish_with_message("done");
        finish_run(model, &self.metrics, &self.config);

        Ok(&self.metrics)
    }

    /// Get training metrics
    pub fn metrics(&self) -> &TrainingMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataLoader, ImageFolder, Transform, TransformKind};
    use crate::model::WganConfig;
    use crate::test_utils::make_image_folder;
    use crate::utils::{find_latest_checkpoint, load_checkpoint};
    use tch::Device;
    use tempfile::TempDir;

    fn batches() -> (TempDir, InfiniteBatches) {
        let root = make_image_folder(&["a", "b"], 3);
        let dataset =
            ImageFolder::new(root.path(), Transform::new(TransformKind::RopeNoDilate)).unwrap();
        let loader = DataLoader::new(dataset, 4, true, 0).unwrap();
        (root, InfiniteBatches::new(loader))
    }

    fn tiny() -> Wgan {
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
    fn test_wgan_trainer_runs_critic_steps() {
        let (_root, mut batches) = batches();
        let out = TempDir::new().unwrap();
        let config = TrainingConfig {
            itrs: 2,
            n_critic: 2,
            log_interval: 1,
            checkpoint_every: 1,
            out_dir: out.path().to_path_buf(),
            ..TrainingConfig::wgan()
        };

        let mut model = tiny();
        let mut trainer = WganTrainer::new(config);
        let metrics = trainer.train(&mut model, &mut batches).unwrap();

        assert_eq!(metrics.len(), 2);
        assert!(metrics.grad_penalties.iter().all(|gp| gp.is_finite() && *gp >= 0.0));
        // 4 critic batches over 6 images of batch size 4
        assert_eq!(batches.epoch(), 1);

        let run = out.path().join("wgan");
        assert!(run.join("samples_itr1.png").exists());
        let latest = find_latest_checkpoint(&run.join("checkpoints")).unwrap();
        assert!(latest.ends_with("checkpoint_itr_0000002"));
    }

    #[test]
    fn test_wgan_trainer_resumes() {
        let (_root, mut batches) = batches();
        let out = TempDir::new().unwrap();
        let config = TrainingConfig {
            itrs: 2,
            n_critic: 1,
            log_interval: 1,
            checkpoint_every: 1,
            out_dir: out.path().to_path_buf(),
            ..TrainingConfig::wgan()
        };

        let mut model = tiny();
        WganTrainer::new(config.clone())
            .train(&mut model, &mut batches)
            .unwrap();

        let checkpoint = out.path().join("wgan/checkpoints/checkpoint_itr_0000001");
        let mut restored = tiny();
        let (completed, metrics) = load_checkpoint(&mut restored, &checkpoint).unwrap();
        assert_eq!(completed, 1);

        let mut trainer = WganTrainer::new(TrainingConfig { itrs: 3, ..config });
        trainer.resume_from(completed, metrics);
        let metrics = trainer.train(&mut restored, &mut batches).unwrap();
        assert_eq!(metrics.steps, vec![0, 1, 2]);
    }

    #[test]
    fn test_wgan_trainer_rejects_resume_past_end() {
        let (_root, mut batches) = batches();
        let out = TempDir::new().unwrap();
        let config = TrainingConfig {
            itrs: 2,
            n_critic: 1,
            log_interval: 1,
            checkpoint_every: 3,
            out_dir: out.path().to_path_buf(),
            ..TrainingConfig::wgan()
        };

        let mut model = tiny();
        let mut trainer = WganTrainer::new(config);
        trainer.resume_from(5, TrainingMetrics::new());
        assert!(trainer.train(&mut model, &mut batches).is_err());

        let checkpoints = out.path().join("wgan/checkpoints");
        assert!(find_latest_checkpoint(&checkpoints).is_none());
    }
}
