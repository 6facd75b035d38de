//! Training loop for InfoWGAN
//!
//! WGAN-GP on `concat(z, c)` with an extra generator term rewarding codes
//! that can be recovered from the generated image by the posterior.

use tch::Tensor;
use tracing::info;

use super::metrics::TrainingMetrics;
use super::trainer::{checkpoint_if_due, finish_run, TrainingConfig};
use crate::data::InfiniteBatches;
use crate::error::Result;
use crate::model::InfoWgan;
use crate::utils::progress_bar;
use crate::viz::save_image;

/// Codes (and noise draws per code) in the logged sample grid
const GRID_CODES: i64 = 8;

/// InfoWGAN trainer
pub struct InfoWganTrainer {
    config: TrainingConfig,
    metrics: TrainingMetrics,
    start_itr: usize,
}

impl InfoWganTrainer {
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

    /// Train generator and posterior against the critic
    pub fn train(
        &mut self,
        model: &mut InfoWgan,
        batches: &mut InfiniteBatches,
    ) -> Result<&TrainingMetrics> {
        self.config.validate()?;
        self.config.check_resume(self.start_itr)?;
        let folder = self.config.run_folder();
        std::fs::create_dir_all(&folder)?;

        // the posterior is registered under the generator store
        let (mut gen_opt, mut critic_opt) = model.wgan.optimizers(self.config.lr)?;
        let device = model.wgan.device;

        info!(
            "Training InfoWGAN for {} iterations (c_dim={}, info weight {}), writing to {}",
            self.config.itrs,
            model.prior.c_dim(),
            self.config.info_weight,
            folder.display()
        );

        let pb = progress_bar(self.config.itrs as u64);
        pb.set_position(self.start_itr as u64);
        let mut saved_example = false;
        model.wgan.train();

        for itr in self.start_itr..self.config.itrs {
            let mut batch_size = 0;
            let mut critic_loss = 0.0;
            let mut penalty = 0.0;
            for _ in 0..self.config.n_critic {
                let x = batches.next_batch()?.images.to_device(device);
                batch_size = x.size()[0];

                if !saved_example {
                    save_image(&(&x * 0.5 + 0.5), folder.join("example_dset_infowgan.png"), 8)?;
                    saved_example = true;
                }

                let c = model.prior.sample(batch_size);
                let x_tilde = model.wgan.generate(batch_size, Some(&c))?;
                let x_hat = model.wgan.interpolate(&x, &x_tilde);
                let gan_loss = model.wgan.gan_loss(&x_tilde, &x);
                let gp = model.wgan.grad_penalty(&x_hat);
                let loss = &gan_loss + &gp;

                critic_opt.zero_grad();
                loss.backward();
                critic_opt.step();
                critic_loss = gan_loss.double_value(&[]);
                penalty = gp.double_value(&[]);
            }

            let c = model.prior.sample(batch_size);
            let gz = model.wgan.generate(batch_size, Some(&c))?;
            let (loss, mi_loss) =
                model.generator_objective(&gz, &c, self.config.info_weight);
            gen_opt.zero_grad();
            loss.backward();
            gen_opt.step();
            let gen_loss = loss.double_value(&[]);
            let mi_loss = mi_loss.double_value(&[]);

            pb.set_message(format!(
                "G: {:.4}, D: {:.4}, MI: {:.4}",
                gen_loss, critic_loss, mi_loss
            ));

            if itr % self.config.log_interval == 0 {
                self.metrics
                    .record(itr, gen_loss, critic_loss, penalty, mi_loss);
                model.wgan.eval();
                let samples = sample_grid(model)?;
                save_image(
                    &samples,
                    folder.join(format!("samples_itr{}.png", itr)),
                    GRID_CODES,
                )?;
                model.wgan.train();
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

/// 8 rows of samples; column `j` of every row shares the code `c_j`
pub fn sample_grid(model: &InfoWgan) -> Result<Tensor> {
    let c = model.prior.sample(GRID_CODES);
    let rows = (0..GRID_CODES)
        .map(|_| model.wgan.sample(GRID_CODES, Some(&c)))
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::cat(&rows, 0))
}
