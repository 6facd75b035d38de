//! Wasserstein GAN with gradient penalty
//!
//! The critic is a `ConvEncoder` without batch norm, since the gradient
//! penalty is computed per sample. With `c_dim > 0` the generator input is
//! `concat(z, c)` for a structured code `c` (InfoWGAN).

use tch::{nn, nn::OptimizerConfig, nn::VarStore, Device, Kind, Tensor};

use super::gan::adam_gan;
use super::networks::{
    ConvEncoder, ConvEncoderConfig, ConvGenerator, ConvGeneratorConfig, OutputActivation,
};
use crate::error::{Result, RopeGanError};
use crate::training::losses;

/// WGAN model configuration
#[derive(Debug, Clone)]
pub struct WganConfig {
    /// Noise dimension
    pub z_dim: i64,
    /// Code dimension (0 for a plain WGAN)
    pub c_dim: i64,
    /// Image channels
    pub channels: i64,
    /// Gradient penalty weight
    pub lambda: f64,
    /// Base filters of the generator
    pub ngf: i64,
    /// Base filters of the critic
    pub ndf: i64,
}

impl Default for WganConfig {
    fn default() -> Self {
        Self {
            z_dim: 10,
            c_dim: 0,
            channels: 1,
            lambda: 10.0,
            ngf: 64,
            ndf: 64,
        }
    }
}

/// WGAN-GP model
pub struct Wgan {
    /// Generator network
    pub generator: ConvGenerator,
    /// Critic network
    pub critic: ConvEncoder,
    /// Variable store for generator
    pub gen_vs: VarStore,
    /// Variable store for critic
    pub critic_vs: VarStore,
    /// Device (CPU/GPU)
    pub device: Device,
    config: WganConfig,
    train: bool,
}

impl Wgan {
    /// Create a new WGAN-GP model
    pub fn new(config: WganConfig, device: Device) -> Self {
        let gen_vs = VarStore::new(device);
        let critic_vs = VarStore::new(device);

        let generator = ConvGenerator::new(
            &(gen_vs.root() / "gen"),
            ConvGeneratorConfig {
                in_dim: config.z_dim + config.c_dim,
                out_channels: config.channels,
                ngf: config.ngf,
                output: OutputActivation::Tanh,
            },
        );
        let critic = ConvEncoder::new(
            &(critic_vs.root() / "critic"),
            ConvEncoderConfig {
                in_channels: config.channels,
                out_dim: 1,
                ndf: config.ndf,
                batch_norm: false,
            },
        );

        Self {
            generator,
            critic,
            gen_vs,
            critic_vs,
            device,
            config,
            train: true,
        }
    }

    /// Get configuration
    pub fn config(&self) -> &WganConfig {
        &self.config
    }

    /// Switch to training mode
    pub fn train(&mut self) {
        self.train = true;
    }

    /// Switch to evaluation mode
    pub fn eval(&mut self) {
        self.train = false;
    }

    /// Whether batch norm layers run in training mode
    pub fn is_train(&self) -> bool {
        self.train
    }

    /// Generate `batch_size` images in `[-1, 1]`
    ///
    /// `cond` must be given (shape `[batch_size, c_dim]`) exactly when `c_dim > 0`.
    pub fn generate(&self, batch_size: i64, cond: Option<&Tensor>) -> Result<Tensor> {
        let z = Tensor::randn([batch_size, self.config.z_dim], (Kind::Float, self.device));
        let input = match (cond, self.config.c_dim) {
            (None, 0) => z,
            (Some(c), c_dim) if c_dim > 0 => {
                if c.size() != [batch_size, c_dim] {
                    return Err(RopeGanError::InvalidArgument(format!(
                        "code shape {:?} does not match [{}, {}]",
                        c.size(),
                        batch_size,
                        c_dim
                    )));
                }
                Tensor::cat(&[&z, c], 1)
            }
            (None, c_dim) => {
                return Err(RopeGanError::InvalidArgument(format!(
                    "model expects a code of dimension {}",
                    c_dim
                )))
            }
            (Some(_), _) => {
                return Err(RopeGanError::InvalidArgument(
                    "model was built without a code dimension".to_string(),
                ))
            }
        };
        Ok(self.generator.forward_t(&input, self.train))
    }

    /// Generate images rescaled to `[0, 1]` without tracking gradients
    pub fn sample(&self, n: i64, cond: Option<&Tensor>) -> Result<Tensor> {
        tch::no_grad(|| self.generate(n, cond).map(|x| x * 0.5 + 0.5))
    }

    /// Interpolation weights `eps ~ U(0, 1)` of shape `[batch_size]`
    pub fn sample_eps(&self, batch_size: i64) -> Tensor {
        Tensor::rand([batch_size], (Kind::Float, self.device))
    }

    /// Random points on the lines between real and generated images
    pub fn interpolate(&self, x: &Tensor, x_tilde: &Tensor) -> Tensor {
        let batch_size = x.size()[0];
        let eps = self.sample_eps(batch_size).view([batch_size, 1, 1, 1]);
        &eps * x + (-&eps + 1.0) * x_tilde
    }

    /// Critic scores
    pub fn critique(&self, images: &Tensor) -> Tensor {
        self.critic.forward_t(images, self.train)
    }

    /// Critic loss `mean D(x_tilde) - mean D(x)`
    pub fn gan_loss(&self, x_tilde: &Tensor, x: &Tensor) -> Tensor {
        losses::critic_loss_wasserstein(&self.critique(x), &self.critique(&x_tilde.detach()))
    }

    /// Generator loss `-mean D(gz)`
    pub fn generator_loss(&self, gz: &Tensor) -> Tensor {
        losses::generator_loss_wasserstein(&self.critique(gz))
    }

    /// Gradient penalty `lambda * mean((||grad D(x_hat)||_2 - 1)^2)`
    ///
    /// The gradient is built with `create_graph` so the penalty backpropagates
    /// into the critic weights.
    pub fn grad_penalty(&self, x_hat: &Tensor) -> Tensor {
        let x_hat = x_hat.detach().set_requires_grad(true);
        let out = self.critique(&x_hat);
        let grads = Tensor::run_backward(&[out.sum(Kind::Float)], &[&x_hat], true, true);
        losses::gradient_penalty(&grads[0], self.config.lambda)
    }

    /// Adam optimizers `(generator, critic)` with betas (0, 0.9)
    ///
    /// Variables registered under `gen_vs` after construction (the InfoWGAN
    /// posterior) are covered by the generator optimizer.
    pub fn optimizers(&self, lr: f64) -> Result<(nn::Optimizer, nn::Optimizer)> {
        Ok((
            adam_gan().build(&self.gen_vs, lr)?,
            adam_gan().build(&self.critic_vs, lr)?,
        ))
    }

    /// Save both networks
    pub fn save(&self, gen_path: &std::path::Path, critic_path: &std::path::Path) -> Result<()> {
        self.gen_vs.save(gen_path)?;
        self.critic_vs.save(critic_path)?;
        Ok(())
    }

    /// Load both networks
    pub fn load(
        &mut self,
        gen_path: &std::path::Path,
        critic_path: &std::path::Path,
    ) -> Result<()> {
        self.gen_vs.load(gen_path)?;
        self.critic_vs.load(critic_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny(c_dim: i64) -> Wgan {
        Wgan::new(
            WganConfig {
                z_dim: 5,
                c_dim,
                ngf: 4,
                ndf: 4,
                ..Default::default()
            },
            Device::Cpu,
        )
    }

    #[test]
    fn test_generate_checks_code() {
        let wgan = tiny(0);
        assert_eq!(wgan.generate(2, None).unwrap().size(), vec![2, 1, 64, 64]);
        let c = Tensor::zeros([2, 3], (Kind::Float, Device::Cpu));
        assert!(wgan.generate(2, Some(&c)).is_err());

        let info = tiny(3);
        assert!(info.generate(2, None).is_err());
        assert_eq!(info.generate(2, Some(&c)).unwrap().size(), vec![2, 1, 64, 64]);
        let wrong = Tensor::zeros([2, 4], (Kind::Float, Device::Cpu));
        assert!(info.generate(2, Some(&wrong)).is_err());
    }

    #[test]
    fn test_sample_range() {
        let mut wgan = tiny(0);
        wgan.eval();
        let s = wgan.sample(3, None).unwrap();
        assert!(s.min().double_value(&[]) >= 0.0);
        assert!(s.max().double_value(&[]) <= 1.0);
        assert!(!s.requires_grad());
    }

    #[test]
    fn test_sample_eps_in_unit_interval() {
        let wgan = tiny(0);
        let eps = wgan.sample_eps(100);
        assert_eq!(eps.size(), vec![100]);
        assert!(eps.min().double_value(&[]) >= 0.0);
        assert!(eps.max().double_value(&[]) < 1.0);
    }

    #[test]
    fn test_interpolate_between_endpoints() {
        let wgan = tiny(0);
        let x = Tensor::ones([4, 1, 64, 64], (Kind::Float, Device::Cpu));
        let x_tilde = Tensor::zeros([4, 1, 64, 64], (Kind::Float, Device::Cpu));
        let x_hat = wgan.interpolate(&x, &x_tilde);
        assert!(x_hat.min().double_value(&[]) >= 0.0);
        assert!(x_hat.max().double_value(&[]) <= 1.0);
        // eps is shared by all pixels of an image
        let per_image = x_hat.flatten(1, -1);
        let spread = per_image.amax([1].as_slice(), false) - per_image.amin([1].as_slice(), false);
        assert!(spread.max().double_value(&[]) < 1e-6);
    }

    #[test]
    fn test_grad_penalty_reaches_critic_weights() {
        let wgan = tiny(0);
        let x = Tensor::rand([3, 1, 64, 64], (Kind::Float, Device::Cpu));
        let gp = wgan.grad_penalty(&x);
        assert_eq!(gp.dim(), 0);
        assert!(gp.double_value(&[]) >= 0.0);

        gp.backward();
        let has_grad = wgan
            .critic_vs
            .trainable_variables()
            .iter()
            .any(|v| v.grad().defined() && v.grad().abs().sum(Kind::Float).double_value(&[]) > 0.0);
        assert!(has_grad);
    }

    #[test]
    fn test_grad_penalty_scales_with_lambda() {
        tch::manual_seed(3);
        let a = tiny(0);
        let x = Tensor::rand([2, 1, 64, 64], (Kind::Float, Device::Cpu));
        let gp = a.grad_penalty(&x).double_value(&[]);

        let mut b = tiny(0);
        b.critic_vs.copy(&a.critic_vs).unwrap();
        b.config.lambda = 20.0;
        let gp2 = b.grad_penalty(&x).double_value(&[]);
        assert!((gp2 - 2.0 * gp).abs() < 1e-4 * gp.max(1.0));
    }

    #[test]
    fn test_losses() {
        let wgan = tiny(0);
        let x = Tensor::rand([2, 1, 64, 64], (Kind::Float, Device::Cpu));
        let gz = wgan.generate(2, None).unwrap();
        let d = wgan.gan_loss(&gz, &x).double_value(&[]);
        let expected = wgan.critique(&gz).mean(Kind::Float).double_value(&[])
            - wgan.critique(&x).mean(Kind::Float).double_value(&[]);
        assert!((d - expected).abs() < 1e-5);
        let g = wgan.generator_loss(&gz).double_value(&[]);
        assert!((g + wgan.critique(&gz).mean(Kind::Float).double_value(&[])).abs() < 1e-5);
    }
}
