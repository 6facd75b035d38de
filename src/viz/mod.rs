//! Visualization of generated images and latent spaces
//!
//! This module provides:
//! - Image grids saved as PNG
//! - Distances, nearest neighbours and interpolation in latent space
//! - The report figures written during decoder training

pub mod grid;
pub mod latent;
pub mod reports;

pub use grid::{make_grid, save_image, DEFAULT_NROW, GRID_PADDING};
pub use latent::{
    interpolate, lambdas, nearest_indices, pairwise_distances, DistanceMetric, InterpolationKind,
};
pub use reports::{
    save_interpolation, save_nearest_neighbors, save_recon, save_run_dynamics, ReportContext,
};
