//! Standard GAN with a binary cross-entropy discriminator
//!
//! The discriminator is a batch-norm `ConvEncoder` producing one logit per image.

use tch::{nn, nn::OptimizerConfig, nn::VarStore, Device, Kind, Tensor};

use super::networks::{
    ConvEncoder, ConvEncoderConfig, ConvGenerator, ConvGeneratorConfig, OutputActivation,
};
use crate::error::Result;
use crate::training::losses;

/// Complete GAN model
pub struct Gan {
    /// Generator network
    pub generator: ConvGenerator,
    /// Discriminator network
    pub discriminator: ConvEncoder,
    /// Variable store for generator
    pub gen_vs: VarStore,
    /// Variable store for discriminator
    pub disc_vs: VarStore,
    /// Device (CPU/GPU)
    pub device: Device,
    z_dim: i64,
    train: bool,
}

impl Gan {
    /// Create a new GAN
    ///
    /// # Arguments
    ///
    /// * `z_dim` - Size of the latent noise vector
    /// * `channels` - Image channels
    /// * `ngf` - Base filters of the generator
    /// * `ndf` - Base filters of the discriminator
    /// * `device` - Device to create model on
    pub fn new(z_dim: i64, channels: i64, ngf: i64, ndf: i64, device: Device) -> Self {
        let gen_vs = VarStore::new(device);
        let disc_vs = VarStore::new(device);

        let generator = ConvGenerator::new(
            &(gen_vs.root() / "gen"),
            ConvGeneratorConfig {
                in_dim: z_dim,
                out_channels: channels,
                ngf,
                output: OutputActivation::Tanh,
            },
        );
        let discriminator = ConvEncoder::new(
            &(disc_vs.root() / "disc"),
            ConvEncoderConfig {
                in_channels: channels,
                out_dim: 1,
                ndf,
                batch_norm: true,
            },
        );

        Self {
            generator,
            discriminator,
            gen_vs,
            disc_vs,
            device,
            z_dim,
            train: true,
        }
    }

    /// Latent dimension
    pub fn z_dim(&self) -> i64 {
        self.z_dim
    }

    /// Switch batch norm layers to training mode
    pub fn train(&mut self) {
        self.train = true;
    }

    /// Switch batch norm layers to evaluation mode
    pub fn eval(&mut self) {
        self.train = false;
    }

    /// Draw `batch_size` latent vectors from N(0, I)
    pub fn sample_noise(&self, batch_size: i64) -> Tensor {
        Tensor::randn([batch_size, self.z_dim], (Kind::Float, self.device))
    }

    /// Generate images in `[-1, 1]`
    pub fn generate(&self, batch_size: i64) -> Tensor {
        self.generator
            .forward_t(&self.sample_noise(batch_size), self.train)
    }

    /// Generate images rescaled to `[0, 1]` without tracking gradients
    pub fn sample(&self, n: i64) -> Tensor {
        tch::no_grad(|| self.generate(n) * 0.5 + 0.5)
    }

    /// Discriminator logits
    pub fn discriminate(&self, images: &Tensor) -> Tensor {
        self.discriminator.forward_t(images, self.train)
    }

    /// Discriminator loss: real images labelled 1, generated images labelled 0
    pub fn gan_loss(&self, x_tilde: &Tensor, x: &Tensor) -> Tensor {
        let real = self.discriminate(x);
        let fake = self.discriminate(&x_tilde.detach());
        losses::discriminator_loss(&real, &fake)
    }

    /// Generator loss: generated images labelled 1
    pub fn generator_loss(&self, gz: &Tensor) -> Tensor {
        losses::generator_loss(&self.discriminate(gz))
    }

    /// Adam optimizers `(generator, discriminator)` with betas (0, 0.9)
    pub fn optimizers(&self, lr: f64) -> Result<(nn::Optimizer, nn::Optimizer)> {
        Ok((
            adam_gan().build(&self.gen_vs, lr)?,
            adam_gan().build(&self.disc_vs, lr)?,
        ))
    }

    /// Save both networks
    pub fn save(&self, gen_path: &std::path::Path, disc_path: &std::path::Path) -> Result<()> {
        self.gen_vs.save(gen_path)?;
        self.disc_vs.save(disc_path)?;
        Ok(())
    }

    /// Load both networks
    pub fn load(&mut self, gen_path: &std::path::Path, disc_path: &std::path::Path) -> Result<()> {
        self.gen_vs.load(gen_path)?;
        self.disc_vs.load(disc_path)?;
        Ok(())
    }
}

/// Adam with betas (0, 0.9), shared by every adversarial model
pub(crate) fn adam_gan() -> nn::Adam {
    nn::Adam {
        beta1: 0.0,
        beta2: 0.9,
        wd: 0.0,
        ..Default::default()
    }
}
