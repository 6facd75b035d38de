//! Image grids written as PNG files

use std::path::Path;

use image::RgbImage;
use tch::{Device, Kind, Tensor};

use crate::error::{Result, RopeGanError};

/// Default number of images per grid row
pub const DEFAULT_NROW: i64 = 8;

/// Pixels between grid cells
pub const GRID_PADDING: i64 = 2;

/// Tile `[B, C, H, W]` images into a `[3, H', W']` grid
///
/// Images are laid out row-major with `nrow` images per row, separated and
/// surrounded by `padding` pixels of `pad_value`. Single-channel images are
/// repeated to three channels. A batch of one image is returned unpadded.
pub fn make_grid(images: &Tensor, nrow: i64, padding: i64, pad_value: f64) -> Result<Tensor> {
    let size = images.size();
    if size.len() != 4 {
        return Err(RopeGanError::InvalidArgument(format!(
            "expected a [B, C, H, W] batch, got shape {:?}",
            size
        )));
    }
    let (b, c, h, w) = (size[0], size[1], size[2], size[3]);
    if b == 0 || nrow <= 0 {
        return Err(RopeGanError::InvalidArgument(format!(
            "cannot tile {} images with {} per row",
            b, nrow
        )));
    }

    let images = match c {
        1 => images.repeat([1, 3, 1, 1]),
        3 => images.shallow_clone(),
        _ => {
            return Err(RopeGanError::InvalidArgument(format!(
                "expected 1 or 3 channels, got {}",
                c
            )))
        }
    };

    if b == 1 {
        return Ok(images.get(0));
    }

    let xmaps = nrow.min(b);
    let ymaps = (b + xmaps - 1) / xmaps;
    let cell_h = h + padding;
    let cell_w = w + padding;

    let grid = Tensor::full(
        [3, ymaps * cell_h + padding, xmaps * cell_w + padding],
        pad_value,
        (images.kind(), images.device()),
    );
    for k in 0..b {
        let (y, x) = (k / xmaps, k % xmaps);
        grid.narrow(1, y * cell_h + padding, h)
            .narrow(2, x * cell_w + padding, w)
            .copy_(&images.get(k));
    }
    Ok(grid)
}

/// Save images in `[0, 1]` as a PNG grid with `nrow` images per row
///
/// Values are clamped and mapped with `x * 255 + 0.5`. Parent directories are
/// created as needed.
pub fn save_image<P: AsRef<Path>>(images: &Tensor, path: P, nrow: i64) -> Result<()> {
    let path = path.as_ref();
    let images = images.detach().to_device(Device::Cpu).to_kind(Kind::Float);
    let grid = make_grid(&images, nrow, GRID_PADDING, 0.0)?;

    let pixels = (grid * 255.0 + 0.5)
        .clamp(0.0, 255.0)
        .to_kind(Kind::Uint8)
        .permute([1, 2, 0])
        .contiguous();
    let (height, width) = (pixels.size()[0] as u32, pixels.size()[1] as u32);
    let data = Vec::<u8>::try_from(pixels.flatten(0, -1))?;

    let img = RgbImage::from_raw(width, height, data).ok_or_else(|| {
        RopeGanError::InvalidArgument(format!("grid buffer does not match {}x{}", width, height))
    })?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    img.save(path)?;
    Ok(())
}
