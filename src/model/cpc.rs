//! Pretrained CPC encoder and transition model, and the decoder trained on
//! their latent space
//!
//! The encoder and transition weights live in `out/<name>/encoder.ot` and
//! `out/<name>/trans.ot`; their dimensions are recorded in `cpc.json`.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tch::{nn, nn::Module, nn::VarStore, Device, Kind, Tensor};
use tracing::info;

use super::networks::{
    ConvEncoder, ConvEncoderConfig, ConvGenerator, ConvGeneratorConfig, OutputActivation,
};
use crate::error::{Result, RopeGanError};

/// Encoder weights file name
pub const ENCODER_FILE: &str = "encoder.ot";
/// Transition weights file name
pub const TRANSITION_FILE: &str = "trans.ot";
/// Decoder weights file name
pub const DECODER_FILE: &str = "decoder.ot";
/// Dimension metadata file name
pub const CPC_META_FILE: &str = "cpc.json";

/// Dimensions of a pretrained CPC model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpcMeta {
    /// Latent dimension
    pub z_dim: i64,
    /// Action dimension
    pub action_dim: i64,
    /// Image channels
    pub channels: i64,
    /// Whether the transition consumes actions
    pub include_actions: bool,
    /// Base filters of the encoder
    #[serde(default = "default_ndf")]
    pub ndf: i64,
    /// Hidden width of the transition MLP
    #[serde(default = "default_hidden")]
    pub hidden: i64,
}

fn default_ndf() -> i64 {
    64
}

fn default_hidden() -> i64 {
    64
}

impl CpcMeta {
    /// Read `cpc.json` from `folder`
    pub fn load(folder: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(folder.join(CPC_META_FILE))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write `cpc.json` into `folder`
    pub fn save(&self, folder: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(folder.join(CPC_META_FILE), content)?;
        Ok(())
    }
}

/// Image encoder `x -> z`
#[derive(Debug)]
pub struct CpcEncoder {
    net: ConvEncoder,
    z_dim: i64,
}

impl CpcEncoder {
    /// Create the encoder under `vs`
    pub fn new(vs: &nn::Path, channels: i64, z_dim: i64, ndf: i64) -> Self {
        let net = ConvEncoder::new(
            vs,
            ConvEncoderConfig {
                in_channels: channels,
                out_dim: z_dim,
                ndf,
                batch_norm: true,
            },
        );
        Self { net, z_dim }
    }

    /// Latent dimension
    pub fn z_dim(&self) -> i64 {
        self.z_dim
    }

    /// Encode images in evaluation mode
    pub fn encode(&self, x: &Tensor) -> Tensor {
        self.net.forward_t(x, false)
    }
}

/// Latent dynamics `z_t (, a_t) -> z_{t+1}`
#[derive(Debug)]
pub struct Transition {
    fc1: nn::Linear,
    fc2: nn::Linear,
    fc3: nn::Linear,
    z_dim: i64,
    action_dim: i64,
    include_actions: bool,
}

impl Transition {
    /// Create the transition MLP under `vs`
    pub fn new(
        vs: &nn::Path,
        z_dim: i64,
        action_dim: i64,
        include_actions: bool,
        hidden: i64,
    ) -> Self {
        let in_dim = if include_actions {
            z_dim + action_dim
        } else {
            z_dim
        };
        Self {
            fc1: nn::linear(vs / "fc1", in_dim, hidden, Default::default()),
            fc2: nn::linear(vs / "fc2", hidden, hidden, Default::default()),
            fc3: nn::linear(vs / "fc3", hidden, z_dim, Default::default()),
            z_dim,
            action_dim,
            include_actions,
        }
    }

    /// Whether the transition consumes actions
    pub fn include_actions(&self) -> bool {
        self.include_actions
    }

    /// Action dimension
    pub fn action_dim(&self) -> i64 {
        self.action_dim
    }

    /// Latent dimension
    pub fn z_dim(&self) -> i64 {
        self.z_dim
    }

    /// Predict the next latent from `z` and, when actions are included, `a`
    pub fn step(&self, z: &Tensor, a: Option<&Tensor>) -> Result<Tensor> {
        let input = match (self.include_actions, a) {
            (true, Some(a)) => Tensor::cat(&[z, a], 1),
            (false, _) => z.shallow_clone(),
            (true, None) => {
                return Err(RopeGanError::InvalidArgument(
                    "transition expects an action".to_string(),
                ))
            }
        };
        Ok(self.forward(&input))
    }
}

impl Module for Transition {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.fc1)
            .relu()
            .apply(&self.fc2)
            .relu()
            .apply(&self.fc3)
    }
}

/// Frozen encoder + transition pair loaded from a run folder
pub struct CpcModel {
    /// Image encoder
    pub encoder: CpcEncoder,
    /// Latent dynamics
    pub trans: Transition,
    /// Dimensions
    pub meta: CpcMeta,
    encoder_vs: VarStore,
    trans_vs: VarStore,
}

impl CpcModel {
    /// Build freshly initialised networks for `meta`
    pub fn new(meta: CpcMeta, device: Device) -> Self {
        let encoder_vs = VarStore::new(device);
        let trans_vs = VarStore::new(device);
        let encoder = CpcEncoder::new(
            &(encoder_vs.root() / "encoder"),
            meta.channels,
            meta.z_dim,
            meta.ndf,
        );
        let trans = Transition::new(
            &(trans_vs.root() / "trans"),
            meta.z_dim,
            meta.action_dim,
            meta.include_actions,
            meta.hidden,
        );
        Self {
            encoder,
            trans,
            meta,
            encoder_vs,
            trans_vs,
        }
    }

    /// Load `cpc.json`, `encoder.ot` and `trans.ot` from `folder` and freeze them
    pub fn load(folder: &Path, device: Device) -> Result<Self> {
        if !folder.is_dir() {
            return Err(RopeGanError::InvalidArgument(format!(
                "run folder {} does not exist",
                folder.display()
            )));
        }
        let meta = CpcMeta::load(folder)?;
        let mut model = Self::new(meta, device);
        model.encoder_vs.load(folder.join(ENCODER_FILE))?;
        model.trans_vs.load(folder.join(TRANSITION_FILE))?;
        model.encoder_vs.freeze();
        model.trans_vs.freeze();

        info!(
            "Loaded CPC model from {} (z_dim={}, action_dim={})",
            folder.display(),
            meta.z_dim,
            meta.action_dim
        );
        Ok(model)
    }

    /// Write the networks and their metadata into `folder`
    pub fn save(&self, folder: &Path) -> Result<()> {
        std::fs::create_dir_all(folder)?;
        self.meta.save(folder)?;
        self.encoder_vs.save(folder.join(ENCODER_FILE))?;
        self.trans_vs.save(folder.join(TRANSITION_FILE))?;
        Ok(())
    }
}

/// Decoder configuration
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    /// Latent dimension
    pub z_dim: i64,
    /// Image channels
    pub channels: i64,
    /// Categorical output over quantized intensities
    pub discrete: bool,
    /// Bits per pixel in discrete mode
    pub n_bit: u32,
    /// Base filters
    pub ngf: i64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            z_dim: 8,
            channels: 1,
            discrete: false,
            n_bit: 4,
            ngf: 64,
        }
    }
}

/// Latent-to-image decoder
///
/// Continuous mode predicts a tanh image trained with MSE. Discrete mode
/// predicts `2^n_bit` logits per pixel trained with cross-entropy against
/// the quantized image.
pub struct Decoder {
    net: ConvGenerator,
    /// Variable store
    pub vs: VarStore,
    config: DecoderConfig,
    train: bool,
}

impl Decoder {
    /// Create a new decoder
    pub fn new(config: DecoderConfig, device: Device) -> Result<Self> {
        if config.discrete && !(1..=8).contains(&config.n_bit) {
            return Err(RopeGanError::InvalidArgument(format!(
                "n_bit must be in 1..=8, got {}",
                config.n_bit
            )));
        }

        let vs = VarStore::new(device);
        let (out_channels, output) = if config.discrete {
            (
                config.channels * (1i64 << config.n_bit),
                OutputActivation::Identity,
            )
        } else {
            (config.channels, OutputActivation::Tanh)
        };
        let net = ConvGenerator::new(
            &(vs.root() / "decoder"),
            ConvGeneratorConfig {
                in_dim: config.z_dim,
                out_channels,
                ngf: config.ngf,
                output,
            },
        );

        Ok(Self {
            net,
            vs,
            config,
            train: true,
        })
    }

    /// Get configuration
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Number of intensity levels in discrete mode
    pub fn levels(&self) -> i64 {
        1i64 << self.config.n_bit
    }

    /// Switch to training mode
    pub fn train(&mut self) {
        self.train = true;
    }

    /// Switch to evaluation mode
    pub fn eval(&mut self) {
        self.train = false;
    }

    /// Raw network output: image `[B, C, H, W]` or logits `[B, C, L, H, W]`
    pub fn forward(&self, z: &Tensor) -> Tensor {
        let out = self.net.forward_t(z, self.train);
        if self.config.discrete {
            let size = out.size();
            out.view([size[0], self.config.channels, self.levels(), size[2], size[3]])
        } else {
            out
        }
    }

    /// Decoded images in `[-1, 1]`
    pub fn predict(&self, z: &Tensor) -> Tensor {
        let out = self.forward(z);
        if self.config.discrete {
            let levels = out.argmax(2, false).to_kind(Kind::Float);
            levels * (2.0 / (self.levels() - 1) as f64) - 1.0
        } else {
            out
        }
    }

    /// Quantize images in `[-1, 1]` to level indices `0..L`
    pub fn quantize(&self, x: &Tensor) -> Tensor {
        let max_level = (self.levels() - 1) as f64;
        ((x + 1.0) * (0.5 * max_level))
            .round()
            .clamp(0.0, max_level)
            .to_kind(Kind::Int64)
    }

    /// Reconstruction loss of `x` from latents `z`
    pub fn loss(&self, x: &Tensor, z: &Tensor) -> Tensor {
        let out = self.forward(z);
        if self.config.discrete {
            let target = self.quantize(x).unsqueeze(2);
            -out.log_softmax(2, Kind::Float)
                .gather(2, &target, false)
                .mean(Kind::Float)
        } else {
            out.mse_loss(x, tch::Reduction::Mean)
        }
    }

    /// Save weights
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.vs.save(path)?;
        Ok(())
    }

    /// Load weights
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.vs.load(path)?;
        Ok(())
    }
}
