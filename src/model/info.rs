//! Prior and variational posterior over the InfoWGAN code `c`

use std::f64::consts::{LN_2, PI};

use tch::{nn, Device, Kind, Tensor};

use super::networks::{ConvEncoder, ConvEncoderConfig};
use super::wgan::{Wgan, WganConfig};
use crate::error::{Result, RopeGanError};
use crate::training::losses;

/// Uniform distribution on `[-1, 1]^c_dim`
#[derive(Debug, Clone, Copy)]
pub struct UniformPrior {
    c_dim: i64,
    device: Device,
}

impl UniformPrior {
    /// Create a prior over `c_dim` independent coordinates
    pub fn new(c_dim: i64, device: Device) -> Self {
        Self { c_dim, device }
    }

    /// Code dimension
    pub fn c_dim(&self) -> i64 {
        self.c_dim
    }

    /// Draw `batch_size` codes
    pub fn sample(&self, batch_size: i64) -> Tensor {
        Tensor::rand([batch_size, self.c_dim], (Kind::Float, self.device)) * 2.0 - 1.0
    }

    /// Log density of every row of `c`; `-inf` outside the support
    pub fn log_prob(&self, c: &Tensor) -> Tensor {
        let inside = c.abs().le(1.0).all_dim(1, false);
        let density = Tensor::full(
            [c.size()[0]],
            -(self.c_dim as f64) * LN_2,
            (Kind::Float, c.device()),
        );
        density.where_scalarother(&inside, f64::NEG_INFINITY)
    }
}

/// Diagonal Gaussian `q(c | x)` parameterised by a conv encoder
#[derive(Debug)]
pub struct GaussianPosterior {
    encoder: ConvEncoder,
    c_dim: i64,
}

impl GaussianPosterior {
    /// Create the posterior under `vs`
    ///
    /// # Arguments
    ///
    /// * `c_dim` - Code dimension
    /// * `channels` - Image channels
    /// * `ndf` - Base filters of the encoder
    pub fn new(vs: &nn::Path, c_dim: i64, channels: i64, ndf: i64) -> Self {
        let encoder = ConvEncoder::new(
            vs,
            ConvEncoderConfig {
                in_channels: channels,
                out_dim: 2 * c_dim,
                ndf,
                batch_norm: true,
            },
        );
        Self { encoder, c_dim }
    }

    /// Mean and log standard deviation, each `[B, c_dim]`
    pub fn forward_t(&self, x: &Tensor, train: bool) -> (Tensor, Tensor) {
        let out = self.encoder.forward_t(x, train);
        let mean = out.narrow(1, 0, self.c_dim);
        let log_std = out.narrow(1, self.c_dim, self.c_dim);
        (mean, log_std)
    }

    /// `log q(c | x)` summed over code dimensions, shape `[B]`
    pub fn log_prob(&self, x: &Tensor, c: &Tensor, train: bool) -> Tensor {
        let (mean, log_std) = self.forward_t(x, train);
        let z = (c - mean) * (-&log_std).exp();
        let log_density = z.square() * -0.5 - log_std - 0.5 * (2.0 * PI).ln();
        log_density.sum_dim_intlist([1].as_slice(), false, Kind::Float)
    }
}

/// WGAN-GP with a generator conditioned on a code `c ~ U(-1, 1)`
///
/// The posterior lives under the generator `VarStore` (path `posterior`), so
/// the generator optimizer updates it too and generator checkpoints carry it.
pub struct InfoWgan {
    /// Conditioned WGAN-GP
    pub wgan: Wgan,
    /// Variational posterior `q(c | x)`
    pub posterior: GaussianPosterior,
    /// Code prior
    pub prior: UniformPrior,
}

impl InfoWgan {
    /// Create the model; `config.c_dim` must be positive
    pub fn new(config: WganConfig, device: Device) -> Result<Self> {
        if config.c_dim <= 0 {
            return Err(RopeGanError::InvalidArgument(format!(
                "InfoWGAN needs a positive code dimension, got {}",
                config.c_dim
            )));
        }
        let wgan = Wgan::new(config.clone(), device);
        let posterior = GaussianPosterior::new(
            &(wgan.gen_vs.root() / "posterior"),
            config.c_dim,
            config.channels,
            config.ndf,
        );
        let prior = UniformPrior::new(config.c_dim, device);
        Ok(Self {
            wgan,
            posterior,
            prior,
        })
    }

    /// Mutual-information loss of generated images `gz` for their codes `c`
    pub fn info_loss(&self, gz: &Tensor, c: &Tensor) -> Tensor {
        let posterior_lp = self.posterior.log_prob(gz, c, self.wgan.is_train());
        losses::mutual_information_loss(&posterior_lp, &self.prior.log_prob(c))
    }

    /// Generator objective `-mean D(gz) + info_weight * info_loss`
    pub fn generator_objective(&self, gz: &Tensor, c: &Tensor, info_weight: f64) -> (Tensor, Tensor) {
        let info = self.info_loss(gz, c);
        (self.wgan.generator_loss(gz) + &info * info_weight, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::VarStore;

    #[test]
    fn test_uniform_prior_sample_range() {
        let prior = UniformPrior::new(10, Device::Cpu);
        let c = prior.sample(256);
        assert_eq!(c.size(), vec![256, 10]);
        assert!(c.min().double_value(&[]) >= -1.0);
        assert!(c.max().double_value(&[]) <= 1.0);
    }

    #[test]
    fn test_uniform_prior_log_prob() {
        let prior = UniformPrior::new(3, Device::Cpu);
        let c = Tensor::from_slice(&[0.0f32, 0.5, -1.0, 0.2, 1.5, 0.0]).view([2, 3]);
        let lp = prior.log_prob(&c);

        assert!((lp.double_value(&[0]) + 3.0 * LN_2).abs() < 1e-5);
        assert_eq!(lp.double_value(&[1]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_gaussian_posterior_log_prob_peaks_at_mean() {
        let vs = VarStore::new(Device::Cpu);
        let posterior = GaussianPosterior::new(&vs.root(), 4, 1, 4);
        let x = Tensor::randn([2, 1, 64, 64], (Kind::Float, Device::Cpu));

        let (mean, log_std) = posterior.forward_t(&x, false);
        assert_eq!(mean.size(), vec![2, 4]);
        assert_eq!(log_std.size(), vec![2, 4]);

        let at_mean = posterior.log_prob(&x, &mean, false);
        let shifted = posterior.log_prob(&x, &(&mean + 1.0), false);
        assert_eq!(at_mean.size(), vec![2]);
        assert!((&at_mean - shifted).min().double_value(&[]) > 0.0);

        let expected = (-&log_std - 0.5 * (2.0 * PI).ln())
            .sum_dim_intlist([1].as_slice(), false, Kind::Float);
        assert!(at_mean.allclose(&expected, 1e-4, 1e-4, false));
    }

    fn tiny_info() -> InfoWgan {
        InfoWgan::new(
            WganConfig {
                z_dim: 5,
                c_dim: 3,
                ngf: 4,
                ndf: 4,
                ..Default::default()
            },
            Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn test_info_wgan_requires_code() {
        let config = WganConfig {
            c_dim: 0,
            ..Default::default()
        };
        assert!(InfoWgan::new(config, Device::Cpu).is_err());
    }

    #[test]
    fn test_posterior_shares_generator_store() {
        let model = tiny_info();
        let names: Vec<String> = model.wgan.gen_vs.variables().into_keys().collect();
        assert!(names.iter().any(|n| n.starts_with("posterior.")));
        assert!(names.iter().any(|n| n.starts_with("gen.")));
        assert!(model
            .wgan
            .critic_vs
            .variables()
            .keys()
            .all(|n| n.starts_with("critic.")));
    }

    #[test]
    fn test_generator_objective_reaches_posterior() {
        let model = tiny_info();
        let c = model.prior.sample(4);
        let gz = model.wgan.generate(4, Some(&c)).unwrap();
        let (loss, info) = model.generator_objective(&gz, &c, 0.1);
        assert_eq!(loss.size(), Vec::<i64>::new());
        assert!(info.double_value(&[]).is_finite());

        loss.backward();
        let vars = model.wgan.gen_vs.variables();
        let posterior_grad = vars
            .iter()
            .filter(|(name, v)| name.starts_with("posterior.") && v.requires_grad())
            .map(|(_, v)| v.grad().abs().sum(Kind::Float).double_value(&[]))
            .sum::<f64>();
        assert!(posterior_grad > 0.0);
    }
}
