//! Trajectory loading for learned-dynamics rollouts
//!
//! Each class directory of `train_data/` is one recorded episode holding the
//! frames as images and the applied actions in `actions.npy`.

use std::collections::BTreeMap;
use std::path::Path;

use ndarray::{Array4, Axis};
use tch::{Kind, Tensor};
use tracing::debug;

use super::image_folder::list_images;
use super::transforms::Transform;
use crate::error::{Result, RopeGanError};

/// Options controlling which episodes and frames are loaded
#[derive(Debug, Clone)]
pub struct RolloutOptions {
    /// Number of episodes (first classes by index)
    pub n_episodes: usize,
    /// Upper bound on frames per episode
    pub max_length: usize,
    /// Vine dataset: keep only `img_*_000` frames and the first action column
    pub vine: bool,
    /// Frame file extension
    pub image_ext: String,
}

impl Default for RolloutOptions {
    fn default() -> Self {
        Self {
            n_episodes: 5,
            max_length: 10,
            vine: false,
            image_ext: "png".to_string(),
        }
    }
}

impl RolloutOptions {
    /// Options for a dataset, picking `jpg` frames for the thanard dataset
    pub fn for_dataset(thanard_dset: bool, vine: bool) -> Self {
        Self {
            vine,
            image_ext: if thanard_dset { "jpg" } else { "png" }.to_string(),
            ..Default::default()
        }
    }
}

/// Episodes truncated to a common length
#[derive(Debug)]
pub struct Episodes {
    /// Frames of shape (n_episodes, length, channels, height, width)
    pub images: Tensor,
    /// Actions of shape (n_episodes, length, action_dim)
    pub actions: Tensor,
}

impl Episodes {
    /// Number of episodes
    pub fn num_episodes(&self) -> i64 {
        self.images.size()[0]
    }

    /// Frames per episode
    pub fn length(&self) -> i64 {
        self.images.size()[1]
    }
}

/// Load the first `opts.n_episodes` episodes from `train_dir`
pub fn load_rollout_episodes(
    train_dir: &Path,
    class_to_idx: &BTreeMap<String, usize>,
    transform: &Transform,
    opts: &RolloutOptions,
) -> Result<Episodes> {
    let mut all_actions = Vec::with_capacity(opts.n_episodes);
    let mut all_images = Vec::with_capacity(opts.n_episodes);

    for i in 0..opts.n_episodes {
        let names: Vec<&String> = class_to_idx
            .iter()
            .filter(|(_, &idx)| idx == i)
            .map(|(name, _)| name)
            .collect();
        let class_name = match names.as_slice() {
            [name] => *name,
            _ => {
                return Err(RopeGanError::Dataset(format!(
                    "expected exactly one class with index {}, found {}",
                    i,
                    names.len()
                )))
            }
        };
        let episode_dir = train_dir.join(class_name);

        let actions = Tensor::read_npy(episode_dir.join("actions.npy"))?.to_kind(Kind::Float);
        let actions = if opts.vine {
            actions.select(1, 0)
        } else {
            actions
        };

        let frames: Vec<_> = list_images(&episode_dir)?
            .into_iter()
            .filter(|p| frame_matches(p, opts))
            .collect();
        if frames.is_empty() {
            return Err(RopeGanError::Dataset(format!(
                "episode {} has no .{} frames",
                episode_dir.display(),
                opts.image_ext
            )));
        }

        let size = transform.size() as usize;
        let mut images =
            Array4::<f32>::zeros((frames.len(), transform.channels() as usize, size, size));
        for (t, path) in frames.iter().enumerate() {
            images
                .index_axis_mut(Axis(0), t)
                .assign(&transform.load(path)?);
        }

        all_actions.push(actions);
        all_images.push(Tensor::try_from(images)?);
    }

    let min_length = all_images
        .iter()
        .map(|t| t.size()[0])
        .min()
        .unwrap_or(0)
        .min(opts.max_length as i64);

    // one action per transition is enough to roll out `min_length` frames
    let needed = (min_length - 1).max(0);
    let action_length = all_actions
        .iter()
        .map(|a| a.size()[0])
        .min()
        .unwrap_or(0)
        .min(min_length);
    if action_length < needed {
        return Err(RopeGanError::Dataset(format!(
            "episodes need at least {} actions for {} frames, found {}",
            needed, min_length, action_length
        )));
    }

    debug!(
        "Loaded {} episodes truncated to {} frames",
        all_images.len(),
        min_length
    );

    let actions: Vec<Tensor> = all_actions
        .iter()
        .map(|a| a.narrow(0, 0, action_length))
        .collect();
    let images: Vec<Tensor> = all_images.iter().map(|x| x.narrow(0, 0, min_length)).collect();

    Ok(Episodes {
        images: Tensor::stack(&images, 0),
        actions: Tensor::stack(&actions, 0),
    })
}

fn frame_matches(path: &Path, opts: &RolloutOptions) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };
    let ext_ok = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(&opts.image_ext))
        .unwrap_or(false);

    if opts.vine {
        ext_ok && name.starts_with("img_") && name.ends_with(&format!("_000.{}", opts.image_ext))
    } else {
        ext_ok
    }
}
