//! Convolutional building blocks shared by the generative models
//!
//! All networks work on 64x64 images:
//! - `ConvGenerator` upsamples a latent vector with transposed 2D convolutions
//! - `ConvEncoder` downsamples an image to a feature vector (critic, posterior, encoder)
//! - `FcnMse` is the fully-convolutional rope mask network used on raw RGB frames

use tch::{nn, nn::Module, nn::ModuleT, nn::VarStore, Device, Tensor};

use crate::error::Result;

/// Spatial size of the smallest feature map (64 / 2^4)
const BASE_SIZE: i64 = 4;

/// Final activation of a generator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputActivation {
    /// Squash into [-1, 1]
    Tanh,
    /// Raw values (logits)
    Identity,
}

/// Generator network configuration
#[derive(Debug, Clone)]
pub struct ConvGeneratorConfig {
    /// Size of the input vector
    pub in_dim: i64,
    /// Number of output channels
    pub out_channels: i64,
    /// Base number of filters
    pub ngf: i64,
    /// Output activation
    pub output: OutputActivation,
}

impl Default for ConvGeneratorConfig {
    fn default() -> Self {
        Self {
            in_dim: 32,
            out_channels: 1,
            ngf: 64,
            output: OutputActivation::Tanh,
        }
    }
}

/// Generator network
///
/// Architecture:
/// 1. Linear projection to a 4x4 map with `8 * ngf` channels
/// 2. Three ConvTranspose2d layers with BatchNorm and ReLU (8x8, 16x16, 32x32)
/// 3. Final ConvTranspose2d to 64x64 with the configured activation
#[derive(Debug)]
pub struct ConvGenerator {
    config: ConvGeneratorConfig,
    fc: nn::Linear,
    bn0: nn::BatchNorm,
    deconvs: Vec<(nn::ConvTranspose2D, nn::BatchNorm)>,
    out: nn::ConvTranspose2D,
}

impl ConvGenerator {
    /// Create a new generator under `vs`
    pub fn new(vs: &nn::Path, config: ConvGeneratorConfig) -> Self {
        let ngf = config.ngf;
        let deconv_config = nn::ConvTransposeConfig {
            stride: 2,
            padding: 1,
            ..Default::default()
        };

        let fc = nn::linear(
            vs / "fc",
            config.in_dim,
            8 * ngf * BASE_SIZE * BASE_SIZE,
            Default::default(),
        );
        let bn0 = nn::batch_norm2d(vs / "bn0", 8 * ngf, Default::default());

        let widths = [8 * ngf, 4 * ngf, 2 * ngf, ngf];
        let deconvs = widths
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let conv = nn::conv_transpose2d(
                    vs / format!("deconv{}", i + 1),
                    w[0],
                    w[1],
                    4,
                    deconv_config,
                );
                let bn = nn::batch_norm2d(vs / format!("bn{}", i + 1), w[1], Default::default());
                (conv, bn)
            })
            .collect();

        let out = nn::conv_transpose2d(vs / "out", ngf, config.out_channels, 4, deconv_config);

        Self {
            config,
            fc,
            bn0,
            deconvs,
            out,
        }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape (batch_size, in_dim)
    /// * `train` - Whether in training mode (affects batch norm)
    ///
    /// # Returns
    ///
    /// Tensor of shape (batch_size, out_channels, 64, 64)
    pub fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let batch_size = input.size()[0];
        let x = self
            .fc
            .forward(input)
            .view([batch_size, 8 * self.config.ngf, BASE_SIZE, BASE_SIZE]);
        let mut x = self.bn0.forward_t(&x, train).relu();

        for (conv, bn) in &self.deconvs {
            x = bn.forward_t(&conv.forward(&x), train).relu();
        }

        let x = self.out.forward(&x);
        match self.config.output {
            OutputActivation::Tanh => x.tanh(),
            OutputActivation::Identity => x,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &ConvGeneratorConfig {
        &self.config
    }
}

impl ModuleT for ConvGenerator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        ConvGenerator::forward_t(self, xs, train)
    }
}

/// Encoder network configuration
#[derive(Debug, Clone)]
pub struct ConvEncoderConfig {
    /// Number of input channels
    pub in_channels: i64,
    /// Size of the output vector
    pub out_dim: i64,
    /// Base number of filters
    pub ndf: i64,
    /// Batch norm after every conv but the first
    pub batch_norm: bool,
}

impl Default for ConvEncoderConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            out_dim: 1,
            ndf: 64,
            batch_norm: true,
        }
    }
}

/// Convolutional encoder
///
/// Four stride-2 Conv2d layers with LeakyReLU (64 -> 4), flatten, linear head.
/// Used as the GAN discriminator, the WGAN critic (without batch norm), the
/// InfoWGAN posterior and the CPC encoder.
#[derive(Debug)]
pub struct ConvEncoder {
    config: ConvEncoderConfig,
    convs: Vec<(nn::Conv2D, Option<nn::BatchNorm>)>,
    fc: nn::Linear,
}

impl ConvEncoder {
    /// Create a new encoder under `vs`
    pub fn new(vs: &nn::Path, config: ConvEncoderConfig) -> Self {
        let ndf = config.ndf;
        let conv_config = nn::ConvConfig {
            stride: 2,
            padding: 1,
            ..Default::default()
        };

        let widths = [config.in_channels, ndf, 2 * ndf, 4 * ndf, 8 * ndf];
        let convs = widths
            .windows(2)
            .enumerate()
            .map(|(i, w)| {
                let conv = nn::conv2d(vs / format!("conv{}", i + 1), w[0], w[1], 4, conv_config);
                let bn = (config.batch_norm && i > 0).then(|| {
                    nn::batch_norm2d(vs / format!("bn{}", i + 1), w[1], Default::default())
                });
                (conv, bn)
            })
            .collect();

        let fc = nn::linear(
            vs / "fc",
            8 * ndf * BASE_SIZE * BASE_SIZE,
            config.out_dim,
            Default::default(),
        );

        Self { config, convs, fc }
    }

    /// Forward pass
    ///
    /// # Arguments
    ///
    /// * `input` - Tensor of shape (batch_size, in_channels, 64, 64)
    /// * `train` - Whether in training mode (affects batch norm)
    ///
    /// # Returns
    ///
    /// Tensor of shape (batch_size, out_dim)
    pub fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let mut x = input.shallow_clone();
        for (conv, bn) in &self.convs {
            x = conv.forward(&x);
            if let Some(bn) = bn {
                x = bn.forward_t(&x, train);
            }
            x = x.leaky_relu();
        }
        let batch_size = x.size()[0];
        self.fc.forward(&x.view([batch_size, -1]))
    }

    /// Get configuration
    pub fn config(&self) -> &ConvEncoderConfig {
        &self.config
    }
}

impl ModuleT for ConvEncoder {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        ConvEncoder::forward_t(self, xs, train)
    }
}

/// Fully-convolutional rope segmentation network
///
/// Maps a `[B, 3, H, W]` RGB frame in `[0, 1]` to a `[B, 1, H, W]` mask in
/// `(0, 1)`. Weights are trained elsewhere and loaded from disk.
pub struct FcnMse {
    vs: VarStore,
    hidden: Vec<nn::Conv2D>,
    out: nn::Conv2D,
}

impl FcnMse {
    /// Hidden width of every conv layer
    pub const WIDTH: i64 = 32;

    /// Depth used by the rope datasets
    pub const DEFAULT_DEPTH: usize = 2;

    /// Create the network with `depth` hidden 3x3 conv layers
    pub fn new(depth: usize, device: Device) -> Self {
        let vs = VarStore::new(device);
        let root = vs.root() / "fcn";
        let conv_config = nn::ConvConfig {
            padding: 1,
            ..Default::default()
        };

        let hidden = (0..depth.max(1))
            .map(|i| {
                let in_channels = if i == 0 { 3 } else { Self::WIDTH };
                nn::conv2d(
                    &root / format!("conv{}", i + 1),
                    in_channels,
                    Self::WIDTH,
                    3,
                    conv_config,
                )
            })
            .collect();
        let out = nn::conv2d(&root / "out", Self::WIDTH, 1, 3, conv_config);

        Self { vs, hidden, out }
    }

    /// Load frozen weights from `path`
    pub fn load<P: AsRef<std::path::Path>>(path: P, depth: usize, device: Device) -> Result<Self> {
        let mut fcn = Self::new(depth, device);
        fcn.vs.load(path)?;
        fcn.vs.freeze();
        Ok(fcn)
    }

    /// Save weights to `path`
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        self.vs.save(path)?;
        Ok(())
    }

    /// Device of the weights
    pub fn device(&self) -> Device {
        self.vs.device()
    }
}

impl Module for FcnMse {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let x = self
            .hidden
            .iter()
            .fold(xs.shallow_clone(), |x, conv| conv.forward(&x).relu());
        self.out.forward(&x).sigmoid()
    }
}

/// Run the mask network and rescale its output to `[-1 + 1e-3, 1 - 1e-3]`
pub fn apply_fcn_mse(fcn: &FcnMse, images: &Tensor) -> Tensor {
    tch::no_grad(|| {
        let o = fcn.forward(&images.to_device(fcn.device()));
        ((o - 0.5) * 2.0).clamp(-1.0 + 1e-3, 1.0 - 1e-3)
    })
}

/// Move a batch to `device`, replacing raw frames by their rope mask when
/// a mask network is given
pub fn prepare_batch(images: &Tensor, fcn: Option<&FcnMse>, device: Device) -> Tensor {
    match fcn {
        Some(fcn) => apply_fcn_mse(fcn, images).to_device(device),
        None => images.to_device(device),
    }
}
