//! Error types for the crate

/// Errors raised by dataset handling, models and visualizations
#[derive(thiserror::Error, Debug)]
pub enum RopeGanError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Torch error: {0}")]
    Tch(#[from] tch::TchError),

    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, RopeGanError>;
