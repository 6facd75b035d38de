//! Image transforms for rope manipulation datasets
//!
//! Images are decoded with the `image` crate and converted to `ndarray`
//! arrays in CHW layout with values in `[0, 1]`. Each preset reproduces one
//! of the preprocessing pipelines used for training:
//!
//! - `Raw`: resize + center crop, RGB in `[0, 1]`
//! - `Rope`: background filtering, grayscale, 3x3 dilation, normalized to `[-1, 1]`
//! - `RopeNoDilate`: background filtering, normalized, then grayscale

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RopeGanError};

/// Side length of every training image
pub const IMAGE_SIZE: u32 = 64;

/// Pixels with any channel below this value are treated as background
pub const BACKGROUND_THRESHOLD: f32 = 0.3;

/// Preprocessing pipeline preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransformKind {
    /// Resize, center crop, RGB in [0, 1]
    Raw,
    /// Background filter, grayscale, dilation, normalization
    Rope,
    /// Background filter, normalization, grayscale
    RopeNoDilate,
}

impl TransformKind {
    /// Number of channels produced by this preset
    pub fn channels(&self) -> i64 {
        match self {
            TransformKind::Raw => 3,
            TransformKind::Rope | TransformKind::RopeNoDilate => 1,
        }
    }
}

impl fmt::Display for TransformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransformKind::Raw => "raw",
            TransformKind::Rope => "rope",
            TransformKind::RopeNoDilate => "rope-no-dilate",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for TransformKind {
    type Err = RopeGanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "raw" => Ok(TransformKind::Raw),
            "rope" => Ok(TransformKind::Rope),
            "rope-no-dilate" | "rope_no_dilate" => Ok(TransformKind::RopeNoDilate),
            other => Err(RopeGanError::InvalidArgument(format!(
                "unknown transform '{}', expected raw, rope or rope-no-dilate",
                other
            ))),
        }
    }
}

/// Image transform pipeline
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    kind: TransformKind,
    size: u32,
}

impl Transform {
    /// Create a transform producing `IMAGE_SIZE` x `IMAGE_SIZE` images
    pub fn new(kind: TransformKind) -> Self {
        Self {
            kind,
            size: IMAGE_SIZE,
        }
    }

    /// Create a transform with a custom output size
    pub fn with_size(kind: TransformKind, size: u32) -> Self {
        Self { kind, size }
    }

    /// Preset of this transform
    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    /// Output side length
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Number of output channels
    pub fn channels(&self) -> i64 {
        self.kind.channels()
    }

    /// Load an image from disk and apply the transform
    pub fn load(&self, path: &Path) -> Result<Array3<f32>> {
        let img = image::open(path)?.to_rgb8();
        Ok(self.apply(&img))
    }

    /// Apply the transform to a decoded RGB image
    pub fn apply(&self, img: &RgbImage) -> Array3<f32> {
        let x = resize_center_crop(img, self.size);
        match self.kind {
            TransformKind::Raw => x,
            TransformKind::Rope => {
                let mut x = x;
                filter_background(&mut x);
                let mut x = dilate(&to_grayscale(&x), 3);
                normalize(&mut x, 0.5, 0.5);
                x
            }
            TransformKind::RopeNoDilate => {
                let mut x = x;
                filter_background(&mut x);
                normalize(&mut x, 0.5, 0.5);
                to_grayscale(&x)
            }
        }
    }
}

/// Resize the shorter side to `size` (bilinear) and crop the center square.
///
/// Returns a `[3, size, size]` array with values in `[0, 1]`.
pub fn resize_center_crop(img: &RgbImage, size: u32) -> Array3<f32> {
    let (w, h) = img.dimensions();
    let (new_w, new_h) = if w <= h {
        let long = (h as f64 * size as f64 / w as f64) as u32;
        (size, long.max(size))
    } else {
        let long = (w as f64 * size as f64 / h as f64) as u32;
        (long.max(size), size)
    };

    let resized = imageops::resize(img, new_w, new_h, FilterType::Triangle);
    let left = ((new_w - size) as f64 / 2.0).round() as u32;
    let top = ((new_h - size) as f64 / 2.0).round() as u32;
    let cropped = imageops::crop_imm(&resized, left, top, size, size).to_image();

    let mut out = Array3::<f32>::zeros((3, size as usize, size as usize));
    for (x, y, pixel) in cropped.enumerate_pixels() {
        for c in 0..3 {
            out[[c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    out
}

/// Zero every channel of pixels where any channel is below the threshold
pub fn filter_background(x: &mut Array3<f32>) {
    let (_, h, w) = x.dim();
    for i in 0..h {
        for j in 0..w {
            let is_background = x
                .index_axis(Axis(1), i)
                .index_axis(Axis(1), j)
                .iter()
                .any(|&v| v < BACKGROUND_THRESHOLD);
            if is_background {
                x.index_axis_mut(Axis(1), i)
                    .index_axis_mut(Axis(1), j)
                    .fill(0.0);
            }
        }
    }
}

/// Average channels into a single channel `[1, H, W]`
pub fn to_grayscale(x: &Array3<f32>) -> Array3<f32> {
    let channels = x.dim().0.max(1) as f32;
    (x.sum_axis(Axis(0)) / channels).insert_axis(Axis(0))
}

/// Grey dilation with a `size` x `size` window clipped at the borders
pub fn dilate(x: &Array3<f32>, size: usize) -> Array3<f32> {
    let (c, h, w) = x.dim();
    let radius = size / 2;
    let mut out = Array3::<f32>::zeros((c, h, w));
    for ch in 0..c {
        for i in 0..h {
            let i0 = i.saturating_sub(radius);
            let i1 = (i + radius + 1).min(h);
            for j in 0..w {
                let j0 = j.saturating_sub(radius);
                let j1 = (j + radius + 1).min(w);
                let mut max = f32::NEG_INFINITY;
                for ii in i0..i1 {
                    for jj in j0..j1 {
                        max = max.max(x[[ch, ii, jj]]);
                    }
                }
                out[[ch, i, j]] = max;
            }
        }
    }
    out
}

/// Normalize in place: `(x - mean) / std`
pub fn normalize(x: &mut Array3<f32>, mean: f32, std: f32) {
    x.mapv_inplace(|v| (v - mean) / std);
}

/// Rotate by `degrees` about the image center (nearest neighbour, zero fill)
pub fn rotate(x: &Array3<f32>, degrees: f32) -> Array3<f32> {
    let (c, h, w) = x.dim();
    let cy = (h as f32 - 1.0) / 2.0;
    let cx = (w as f32 - 1.0) / 2.0;
    let (sin, cos) = degrees.to_radians().sin_cos();

    let mut out = Array3::<f32>::zeros((c, h, w));
    for i in 0..h {
        for j in 0..w {
            let dx = j as f32 - cx;
            let dy = i as f32 - cy;
            let sx = (cx + cos * dx + sin * dy).round();
            let sy = (cy - sin * dx + cos * dy).round();
            if sx < 0.0 || sy < 0.0 || sx >= w as f32 || sy >= h as f32 {
                continue;
            }
            for ch in 0..c {
                out[[ch, i, j]] = x[[ch, sy as usize, sx as usize]];
            }
        }
    }
    out
}
