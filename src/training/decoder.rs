//! Training loop for the latent decoder
//!
//! The CPC encoder and transition stay frozen; only the decoder learns to
//! render encoder latents back into images. Report figures are written
//! before training and every `log_interval` epochs.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tch::{nn, nn::OptimizerConfig, Device, Tensor};
use tracing::{info, warn};

use super::metrics::RollingStats;
use super::trainer::TrainingConfig;
use crate::data::{DataLoader, RolloutOptions};
use crate::error::{Result, RopeGanError};
use crate::model::{CpcModel, Decoder, FcnMse, DECODER_FILE};
use crate::utils::progress_bar;
use crate::viz::{
    save_image, save_interpolation, save_nearest_neighbors, save_recon, save_run_dynamics,
    DistanceMetric, InterpolationKind, ReportContext,
};

/// Window of the running train loss
const LOSS_WINDOW: usize = 50;
/// Images of the first train batch used as interpolation endpoints
const INTERP_IMAGES: i64 = 20;
/// Neighbours shown per query in nearest-neighbour figures
const NN_K: i64 = 100;

/// Losses of one epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLoss {
    /// Epoch index
    pub epoch: usize,
    /// Running mean of the last 50 train batches
    pub train_loss: f64,
    /// Dataset-weighted mean test loss
    pub test_loss: f64,
}

/// Load the frozen CPC networks of a run, checking the action setting
///
/// The stored model decides whether actions enter the transition. A
/// different `include_actions` request is reported and ignored.
pub fn load_cpc(folder: &Path, device: Device, include_actions: bool) -> Result<CpcModel> {
    let cpc = CpcModel::load(folder, device)?;
    if cpc.meta.include_actions != include_actions {
        warn!(
            "include_actions={} requested but the transition was trained with include_actions={}",
            include_actions, cpc.meta.include_actions
        );
    }
    Ok(cpc)
}

/// Decoder trainer
pub struct DecoderTrainer {
    config: TrainingConfig,
    rollout: RolloutOptions,
    interpolation: InterpolationKind,
    nn_metric: Option<DistanceMetric>,
    history: Vec<EpochLoss>,
}

impl DecoderTrainer {
    /// Create a new trainer
    pub fn new(config: TrainingConfig, rollout: RolloutOptions) -> Self {
        Self {
            config,
            rollout,
            interpolation: InterpolationKind::default(),
            nn_metric: None,
            history: Vec::new(),
        }
    }

    /// Use `kind` for interpolation figures (slerp by default)
    pub fn with_interpolation(mut self, kind: InterpolationKind) -> Self {
        self.interpolation = kind;
        self
    }

    /// Also write nearest-neighbour figures before training
    pub fn with_nearest_neighbors(mut self, metric: DistanceMetric) -> Self {
        self.nn_metric = Some(metric);
        self
    }

    /// Train the decoder
    ///
    /// # Arguments
    ///
    /// * `decoder` - Decoder to train
    /// * `cpc` - Frozen encoder and transition of the run
    /// * `train_loader` - Batches of `train_data`
    /// * `test_loader` - Batches of `test_data`
    /// * `fcn` - Mask network applied to raw frames (thanard dataset)
    ///
    /// # Returns
    ///
    /// Train and test loss of every epoch
    pub fn train(
        &mut self,
        decoder: &mut Decoder,
        cpc: &CpcModel,
        train_loader: &mut DataLoader,
        test_loader: &mut DataLoader,
        fcn: Option<&FcnMse>,
    ) -> Result<&[EpochLoss]> {
        self.config.validate()?;
        let folder = self.config.run_folder();
        if !folder.is_dir() {
            return Err(RopeGanError::InvalidArgument(format!(
                "run folder {} does not exist",
                folder.display()
            )));
        }
        if decoder.config().z_dim != cpc.encoder.z_dim() {
            return Err(RopeGanError::InvalidArgument(format!(
                "decoder z_dim {} does not match encoder z_dim {}",
                decoder.config().z_dim,
                cpc.encoder.z_dim()
            )));
        }

        let device = decoder.vs.device();
        let ctx = ReportContext::new(&folder, device, fcn);
        let mut opt = nn::Adam::default().build(&decoder.vs, self.config.lr)?;

        let images = ctx.prepare(&train_loader.first_batch()?.images);
        save_image(&(images * 0.5 + 0.5), folder.join("dec_train_img.png"), 8)?;

        if let Some(metric) = self.nn_metric {
            save_nearest_neighbors(&ctx, &cpc.encoder, train_loader, test_loader, -1, NN_K, metric)?;
        }
        self.save_figures(&ctx, decoder, cpc, train_loader, test_loader, -1)?;

        info!(
            "Training decoder for {} epochs on {} images",
            self.config.epochs,
            train_loader.num_samples()
        );

        for epoch in 0..self.config.epochs {
            let train_loss = self.train_epoch(&ctx, decoder, cpc, &mut opt, train_loader, epoch)?;
            let test_loss = evaluate(&ctx, decoder, cpc, test_loader)?;
            info!("Epoch {}, Test Loss: {:.4}", epoch, test_loss);
            self.history.push(EpochLoss {
                epoch,
                train_loss,
                test_loss,
            });

            if epoch % self.config.log_interval == 0 {
                self.save_figures(&ctx, decoder, cpc, train_loader, test_loader, epoch as i64)?;
                decoder.save(folder.join(DECODER_FILE))?;
            }
        }

        if let Err(e) = self.save_history(&folder.join("decoder_losses.csv")) {
            warn!("Failed to save losses: {}", e);
        }

        Ok(&self.history)
    }

    fn train_epoch(
        &self,
        ctx: &ReportContext<'_>,
        decoder: &mut Decoder,
        cpc: &CpcModel,
        opt: &mut nn::Optimizer,
        loader: &mut DataLoader,
        epoch: usize,
    ) -> Result<f64> {
        decoder.train();
        let mut stats = RollingStats::new(LOSS_WINDOW);

        let pb = progress_bar(loader.num_samples() as u64);
        for batch in loader.iter() {
            let x = ctx.prepare(&batch?.images);
            let z = tch::no_grad(|| cpc.encoder.encode(&x));
            let loss = decoder.loss(&x, &z);
            opt.zero_grad();
            loss.backward();
            opt.step();

            stats.push(loss.double_value(&[]));
            pb.set_message(format!("Epoch {}, Train Loss {:.4}", epoch, stats.mean()));
            pb.inc(x.size()[0] as u64);
        }
        pb.finish_and_clear();

        Ok(stats.mean())
    }

    fn save_figures(
        &self,
        ctx: &ReportContext<'_>,
        decoder: &mut Decoder,
        cpc: &CpcModel,
        train_loader: &mut DataLoader,
        test_loader: &mut DataLoader,
        epoch: i64,
    ) -> Result<()> {
        save_recon(ctx, decoder, &cpc.encoder, train_loader, test_loader, epoch)?;

        let images = train_loader.first_batch()?.images;
        let pairs = INTERP_IMAGES.min(images.size()[0]) / 2;
        if pairs > 0 {
            let images = ctx.prepare(&images.narrow(0, 0, 2 * pairs));
            save_interpolation(
                ctx,
                self.config.n_interp,
                decoder,
                &cpc.encoder,
                &images.narrow(0, 0, pairs),
                &images.narrow(0, pairs, pairs),
                epoch,
                self.interpolation,
            )?;
        } else {
            warn!("Not enough images for interpolations at epoch {}", epoch);
        }

        save_run_dynamics(ctx, decoder, cpc, train_loader.dataset(), epoch, &self.rollout)
    }

    fn save_history(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in &self.history {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Losses recorded so far
    pub fn history(&self) -> &[EpochLoss] {
        &self.history
    }
}

/// Dataset-weighted mean loss over the test loader
pub fn evaluate(
    ctx: &ReportContext<'_>,
    decoder: &mut Decoder,
    cpc: &CpcModel,
    loader: &mut DataLoader,
) -> Result<f64> {
    decoder.eval();

    let mut total = 0.0;
    let mut count = 0usize;
    for batch in loader.iter() {
        let x = ctx.prepare(&batch?.images);
        let n = x.size()[0] as usize;
        let loss: Tensor = tch::no_grad(|| decoder.loss(&x, &cpc.encoder.encode(&x)));
        total += loss.double_value(&[]) * n as f64;
        count += n;
    }

    if count == 0 {
        return Err(RopeGanError::Dataset("test set is empty".to_string()));
    }
    Ok(total / count as f64)
}
