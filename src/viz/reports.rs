//! Figures written while training the decoder
//!
//! Every report writes one PNG under the run folder:
//! - `nn_epoch{e}/nn_{i}.png`: nearest neighbours of a query image in latent space
//! - `reconstructions/recon_epoch{e}.png`: real images next to their decodings
//! - `interpolations/interp_epoch{e}.png`: decoded latent interpolations
//! - `run_dynamics/dyn_epoch{e}.png`: real episodes next to latent rollouts

use std::path::{Path, PathBuf};

use tch::{Device, Kind, Tensor};
use tracing::debug;

use super::grid::save_image;
use super::latent::{
    interpolate, nearest_indices, pairwise_distances, DistanceMetric, InterpolationKind,
};
use crate::data::{load_rollout_episodes, DataLoader, ImageFolder, RolloutOptions};
use crate::error::Result;
use crate::model::{prepare_batch, CpcEncoder, CpcModel, Decoder, FcnMse};
use crate::utils::progress_bar;

/// Query images taken from each of the train and test sets
const NN_QUERIES_PER_SPLIT: i64 = 5;
/// Images per row of a nearest-neighbour figure
const NN_ROW: i64 = 10;
/// Real images taken from each split for reconstructions
const RECON_PER_SPLIT: i64 = 16;

/// Where and how reports are produced
#[derive(Clone, Copy)]
pub struct ReportContext<'a> {
    /// Run folder
    pub folder: &'a Path,
    /// Device the networks live on
    pub device: Device,
    /// Mask network applied to raw frames (thanard dataset)
    pub fcn: Option<&'a FcnMse>,
}

impl<'a> ReportContext<'a> {
    /// Create a context
    pub fn new(folder: &'a Path, device: Device, fcn: Option<&'a FcnMse>) -> Self {
        Self {
            folder,
            device,
            fcn,
        }
    }

    /// Move a batch to the device, masking raw frames when needed
    pub fn prepare(&self, images: &Tensor) -> Tensor {
        prepare_batch(images, self.fcn, self.device)
    }

    fn path(&self, sub_dir: &str, file_name: String) -> PathBuf {
        self.folder.join(sub_dir).join(file_name)
    }
}

/// Save the nearest neighbours of 5 train and 5 test images
///
/// Distances are computed against every image of train ∪ test (train
/// indices first). Each query gets its own figure holding its `k + 1`
/// nearest images, the query itself usually first.
pub fn save_nearest_neighbors(
    ctx: &ReportContext<'_>,
    encoder: &CpcEncoder,
    train_loader: &mut DataLoader,
    test_loader: &mut DataLoader,
    epoch: i64,
    k: i64,
    metric: DistanceMetric,
) -> Result<()> {
    let train_batch = train_loader.first_batch()?.images;
    let test_batch = test_loader.first_batch()?.images;
    let queries = Tensor::cat(
        &[
            train_batch.narrow(0, 0, NN_QUERIES_PER_SPLIT.min(train_batch.size()[0])),
            test_batch.narrow(0, 0, NN_QUERIES_PER_SPLIT.min(test_batch.size()[0])),
        ],
        0,
    );

    let train = train_loader.dataset();
    let test = test_loader.dataset();
    let batch_size = train_loader.batch_size();

    let neighbors = tch::no_grad(|| -> Result<Tensor> {
        let z = encoder.encode(&ctx.prepare(&queries));

        let pb = progress_bar((train.len() + test.len()) as u64);
        pb.set_message("Computing NN");

        let mut dists = Vec::new();
        for dataset in [train, test] {
            let indices: Vec<usize> = (0..dataset.len()).collect();
            for chunk in indices.chunks(batch_size) {
                let x = ctx.prepare(&dataset.load_batch(chunk)?);
                let zx = encoder.encode(&x);
                dists.push(pairwise_distances(&z, &zx, metric).to_device(Device::Cpu));
                pb.inc(chunk.len() as u64);
            }
        }
        pb.finish_and_clear();

        Ok(nearest_indices(&Tensor::cat(&dists, 1), k + 1))
    })?;

    let folder = ctx.folder.join(format!("nn_epoch{}", epoch));
    for i in 0..neighbors.size()[0] {
        let row = Vec::<i64>::try_from(neighbors.get(i))?;
        let images = row
            .iter()
            .map(|&idx| load_joint(train, test, idx as usize))
            .collect::<Result<Vec<_>>>()?;
        let images = ctx.prepare(&Tensor::cat(&images, 0));
        save_image(
            &(images * 0.5 + 0.5),
            folder.join(format!("nn_{}.png", i)),
            NN_ROW,
        )?;
    }

    debug!("Saved nearest neighbours for epoch {}", epoch);
    Ok(())
}

/// Image `idx` of the concatenation train ∪ test as a `[1, C, H, W]` batch
fn load_joint(train: &ImageFolder, test: &ImageFolder, idx: usize) -> Result<Tensor> {
    if idx < train.len() {
        train.load_batch(&[idx])
    } else {
        test.load_batch(&[idx - train.len()])
    }
}

/// Save 16 train and 16 test images interleaved with their reconstructions
pub fn save_recon(
    ctx: &ReportContext<'_>,
    decoder: &mut Decoder,
    encoder: &CpcEncoder,
    train_loader: &mut DataLoader,
    test_loader: &mut DataLoader,
    epoch: i64,
) -> Result<()> {
    decoder.eval();

    let train_batch = train_loader.first_batch()?.images;
    let test_batch = test_loader.first_batch()?.images;
    let real = Tensor::cat(
        &[
            ctx.prepare(&train_batch.narrow(0, 0, RECON_PER_SPLIT.min(train_batch.size()[0]))),
            ctx.prepare(&test_batch.narrow(0, 0, RECON_PER_SPLIT.min(test_batch.size()[0]))),
        ],
        0,
    );

    let recon = tch::no_grad(|| decoder.predict(&encoder.encode(&real)));
    let size = real.size();
    let images = Tensor::stack(&[real, recon], 1).view([-1, size[1], size[2], size[3]]);

    save_image(
        &(images * 0.5 + 0.5),
        ctx.path("reconstructions", format!("recon_epoch{}.png", epoch)),
        8,
    )
}

/// Save decoded interpolations between paired start and goal images
///
/// One row per pair with `n_interp + 2` images, endpoints included.
#[allow(clippy::too_many_arguments)]
pub fn save_interpolation(
    ctx: &ReportContext<'_>,
    n_interp: usize,
    decoder: &mut Decoder,
    encoder: &CpcEncoder,
    start_images: &Tensor,
    goal_images: &Tensor,
    epoch: i64,
    kind: InterpolationKind,
) -> Result<()> {
    decoder.eval();

    let images = tch::no_grad(|| -> Result<Tensor> {
        let z_start = encoder.encode(start_images);
        let z_goal = encoder.encode(goal_images);
        let zs = interpolate(&z_start, &z_goal, n_interp, kind)?;
        Ok(decoder.predict(&zs))
    })?;

    save_image(
        &(images * 0.5 + 0.5),
        ctx.path("interpolations", format!("interp_epoch{}.png", epoch)),
        n_interp as i64 + 2,
    )
}

/// Roll the latent dynamics forward from the first frame of a few episodes
///
/// Rows alternate between the real episode and the decoded rollout.
pub fn save_run_dynamics(
    ctx: &ReportContext<'_>,
    decoder: &mut Decoder,
    cpc: &CpcModel,
    dataset: &ImageFolder,
    epoch: i64,
    opts: &RolloutOptions,
) -> Result<()> {
    decoder.eval();

    let episodes = load_rollout_episodes(
        dataset.root(),
        &dataset.class_to_idx(),
        dataset.transform(),
        opts,
    )?;
    let (n_ep, length) = (episodes.num_episodes(), episodes.length());

    let frames = ctx.prepare(&episodes.images.flatten(0, 1));
    let frame_size = frames.size()[1..].to_vec();
    let mut shape = vec![n_ep, length];
    shape.extend_from_slice(&frame_size);
    let images = frames.view(shape.as_slice());
    let actions = episodes.actions.to_device(ctx.device).to_kind(Kind::Float);

    let all_images = tch::no_grad(|| -> Result<Tensor> {
        let mut zs = vec![cpc.encoder.encode(&images.select(1, 0))];
        for t in 0..length - 1 {
            let a = actions.select(1, t);
            let last = &zs[zs.len() - 1];
            let next = cpc.trans.step(last, Some(&a))?;
            zs.push(next);
        }
        let z_dim = cpc.encoder.z_dim();
        let zs = Tensor::stack(&zs, 1).view([-1, z_dim]);
        let recon = decoder.predict(&zs).view(shape.as_slice());

        let mut flat = vec![-1];
        flat.extend_from_slice(&frame_size);
        Ok(Tensor::stack(&[&images, &recon], 1).view(flat.as_slice()))
    })?;

    save_image(
        &(all_images * 0.5 + 0.5),
        ctx.path("run_dynamics", format!("dyn_epoch{}.png", epoch)),
        length,
    )
}
