//! Model module containing the generative networks
//!
//! This module provides:
//! - Convolutional generator / encoder building blocks and the FCN mask network
//! - GAN with a BCE discriminator
//! - WGAN-GP, optionally conditioned on an InfoWGAN code
//! - Uniform prior and Gaussian posterior over InfoWGAN codes
//! - Pretrained CPC encoder / transition and the latent decoder

mod cpc;
mod gan;
mod info;
mod networks;
mod wgan;

pub use cpc::{
    CpcEncoder, CpcMeta, CpcModel, Decoder, DecoderConfig, Transition, CPC_META_FILE,
    DECODER_FILE, ENCODER_FILE, TRANSITION_FILE,
};
pub use gan::Gan;
pub use info::{GaussianPosterior, InfoWgan, UniformPrior};
pub use networks::{
    apply_fcn_mse, prepare_batch, ConvEncoder, ConvEncoderConfig, ConvGenerator,
    ConvGeneratorConfig, FcnMse, OutputActivation,
};
pub use wgan::{Wgan, WganConfig};
