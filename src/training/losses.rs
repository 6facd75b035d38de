//! Loss functions for adversarial training
//!
//! Binary cross-entropy losses for the standard GAN, Wasserstein losses and
//! the gradient penalty for WGAN-GP, and the mutual-information term of
//! InfoWGAN.

use tch::{Kind, Tensor};

/// Generator loss: -log(D(G(z)))
///
/// # Arguments
///
/// * `fake_output` - Discriminator output on generated samples (logits)
///
/// # Returns
///
/// Scalar loss tensor
pub fn generator_loss(fake_output: &Tensor) -> Tensor {
    let targets = Tensor::ones_like(fake_output);
    fake_output.binary_cross_entropy_with_logits::<Tensor>(
        &targets,
        None,
        None,
        tch::Reduction::Mean,
    )
}

/// Discriminator loss: -log(D(x)) - log(1-D(G(z)))
///
/// # Arguments
///
/// * `real_output` - Discriminator output on real samples (logits)
/// * `fake_output` - Discriminator output on generated samples (logits)
pub fn discriminator_loss(real_output: &Tensor, fake_output: &Tensor) -> Tensor {
    let real_targets = Tensor::ones_like(real_output);
    let real_loss = real_output.binary_cross_entropy_with_logits::<Tensor>(
        &real_targets,
        None,
        None,
        tch::Reduction::Mean,
    );

    let fake_targets = Tensor::zeros_like(fake_output);
    let fake_loss = fake_output.binary_cross_entropy_with_logits::<Tensor>(
        &fake_targets,
        None,
        None,
        tch::Reduction::Mean,
    );

    real_loss + fake_loss
}

/// Wasserstein loss for the generator: -E[D(G(z))]
pub fn generator_loss_wasserstein(fake_output: &Tensor) -> Tensor {
    -fake_output.mean(Kind::Float)
}

/// Wasserstein loss for the critic: E[D(G(z))] - E[D(x)]
pub fn critic_loss_wasserstein(real_output: &Tensor, fake_output: &Tensor) -> Tensor {
    fake_output.mean(Kind::Float) - real_output.mean(Kind::Float)
}

/// Gradient penalty from critic input gradients
///
/// `lambda * mean((||g_i||_2 - 1)^2)` where `g_i` is the flattened gradient of
/// sample `i`.
pub fn gradient_penalty(grads: &Tensor, lambda: f64) -> Tensor {
    let norms = grads
        .flatten(1, -1)
        .square()
        .sum_dim_intlist([1].as_slice(), false, Kind::Float)
        .sqrt();
    (norms - 1.0).square().mean(Kind::Float) * lambda
}

/// Mutual-information loss of InfoWGAN
///
/// Cross entropy of the posterior minus the prior entropy:
/// `(-mean log q(c|G(z, c))) - (-mean log p(c))`. Minimising it maximises a
/// lower bound on `I(c; G(z, c))`.
pub fn mutual_information_loss(posterior_log_prob: &Tensor, prior_log_prob: &Tensor) -> Tensor {
    let cross_ent = -posterior_log_prob.mean(Kind::Float);
    let ent = -prior_log_prob.mean(Kind::Float);
    cross_ent - ent
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    #[test]
    fn test_generator_loss() {
        let fake_output = Tensor::randn([4, 1], (Kind::Float, Device::Cpu));
        let loss = generator_loss(&fake_output);

        assert_eq!(loss.size(), Vec::<i64>::new());
        assert!(loss.double_value(&[]) > 0.0);
    }

    #[test]
    fn test_perfect_discriminator() {
        let real_output = Tensor::full([4, 1], 10.0, (Kind::Float, Device::Cpu));
        let fake_output = Tensor::full([4, 1], -10.0, (Kind::Float, Device::Cpu));
        let loss = discriminator_loss(&real_output, &fake_output);

        assert!(loss.double_value(&[]) < 0.1);
    }

    #[test]
    fn test_wasserstein_losses() {
        let real = Tensor::from_slice(&[1.0f32, 3.0]);
        let fake = Tensor::from_slice(&[-1.0f32, 0.0]);

        let d = critic_loss_wasserstein(&real, &fake).double_value(&[]);
        assert!((d - (-0.5 - 2.0)).abs() < 1e-6);
        let g = generator_loss_wasserstein(&fake).double_value(&[]);
        assert!((g - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_gradient_penalty_unit_norm_is_zero() {
        // per-sample gradients with norm exactly 1
        let grads = Tensor::zeros([3, 1, 2, 2], (Kind::Float, Device::Cpu));
        let _ = grads.narrow(3, 0, 1).narrow(2, 0, 1).fill_(1.0);
        let gp = gradient_penalty(&grads, 10.0);
        assert!(gp.double_value(&[]).abs() < 1e-6);

        // zero gradients are penalised by lambda
        let zeros = Tensor::zeros([3, 1, 2, 2], (Kind::Float, Device::Cpu));
        let gp = gradient_penalty(&zeros, 10.0);
        assert!((gp.double_value(&[]) - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_mutual_information_loss() {
        let log_q = Tensor::from_slice(&[-1.0f32, -3.0]);
        let log_p = Tensor::from_slice(&[-2.0f32, -2.0]);
        let mi = mutual_information_loss(&log_q, &log_p).double_value(&[]);
        assert!(mi.abs() < 1e-6);

        let better_q = Tensor::from_slice(&[0.0f32, 0.0]);
        assert!(mutual_information_loss(&better_q, &log_p).double_value(&[]) < 0.0);
    }
}
