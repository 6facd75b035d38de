//! Training loop for the BCE GAN
//!
//! Every real batch is optionally passed through the FCN mask network and
//! randomly rotated before the discriminator sees it.

use ndarray::{Array4, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tch::{Device, Kind, Tensor};
use tracing::{info, warn};

use super::metrics::TrainingMetrics;
use super::trainer::{checkpoint_if_due, finish_run, TrainingConfig};
use crate::data::{rotate, InfiniteBatches};
use crate::error::Result;
use crate::model::{prepare_batch, FcnMse, Gan};
use crate::utils::progress_bar;
use crate::viz::save_image;

/// Samples written at every log interval
const LOG_SAMPLES: i64 = 64;

/// GAN trainer
pub struct GanTrainer {
    config: TrainingConfig,
    metrics: TrainingMetrics,
    start_itr: usize,
}

impl GanTrainer {
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

    /// Train the GAN
    ///
    /// # Arguments
    ///
    /// * `model` - GAN to train
    /// * `batches` - Endless stream of real batches in `[-1, 1]`
    /// * `fcn` - Mask network applied to raw RGB frames, if any
    ///
    /// # Returns
    ///
    /// Training metrics
    pub fn train(
        &mut self,
        model: &mut Gan,
        batches: &mut InfiniteBatches,
        fcn: Option<&FcnMse>,
    ) -> Result<&TrainingMetrics> {
        self.config.validate()?;
        self.config.check_resume(self.start_itr)?;
        let folder = self.config.run_folder();
        std::fs::create_dir_all(&folder)?;

        let (mut gen_opt, mut disc_opt) = model.optimizers(self.config.lr)?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        info!(
            "Training GAN for {} iterations, writing to {}",
            self.config.itrs,
            folder.display()
        );

        let pb = progress_bar(self.config.itrs as u64);
        pb.set_position(self.start_itr as u64);
        model.train();

        for itr in self.start_itr..self.config.itrs {
            let mut batch_size = 0;
            let mut disc_loss = 0.0;
            for _ in 0..self.config.n_critic {
                let batch = batches.next_batch()?;
                let x = prepare_batch(&batch.images, fcn, model.device);
                let x = rotate_batch(&x, &mut rng)?;
                batch_size = x.size()[0];

                let x_tilde = model.generate(batch_size);
                let loss = model.gan_loss(&x_tilde, &x);
                disc_opt.zero_grad();
                loss.backward();
                disc_opt.step();
                disc_loss = loss.double_value(&[]);
            }

            let gz = model.generate(batch_size);
            let gen_loss = model.generator_loss(&gz);
            gen_opt.zero_grad();
            gen_loss.backward();
            gen_opt.step();
            let gen_loss = gen_loss.double_value(&[]);

            pb.set_message(format!("G: {:.4}, D: {:.4}", gen_loss, disc_loss));

            if itr % self.config.log_interval == 0 {
                self.metrics.record(itr, gen_loss, disc_loss, 0.0, 0.0);
                model.eval();
                let samples = model.sample(LOG_SAMPLES);
                save_image(&samples, folder.join(format!("samples_itr{}.png", itr)), 8)?;
                model.train();

                if self.metrics.check_mode_collapse(10) {
                    warn!("Possible mode collapse detected! Consider adjusting learning rates.");
                }
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

    /// Get configuration
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }
}

/// Rotate every image of a `[-1, 1]` batch by its own angle in `[0, 360)`
///
/// Rotation happens in `[0, 1]` space so uncovered corners become black.
pub fn rotate_batch(images: &Tensor, rng: &mut StdRng) -> Result<Tensor> {
    let device = images.device();
    let size = images.size();
    let shape = (
        size[0] as usize,
        size[1] as usize,
        size[2] as usize,
        size[3] as usize,
    );

    let unit = images.to_device(Device::Cpu).to_kind(Kind::Float) * 0.5 + 0.5;
    let data = Vec::<f32>::try_from(unit.flatten(0, -1))?;
    let batch = Array4::from_shape_vec(shape, data)?;

    let mut rotated = Array4::<f32>::zeros(shape);
    for (i, image) in batch.outer_iter().enumerate() {
        let degrees = rng.gen_range(0.0f32..360.0);
        rotated
            .index_axis_mut(Axis(0), i)
            .assign(&rotate(&image.to_owned(), degrees));
    }

    Ok((Tensor::try_from(rotated)? * 2.0 - 1.0).to_device(device))
}
