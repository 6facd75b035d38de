//! Shared fixtures for unit tests

use image::{Rgb, RgbImage};
use tch::{Device, Kind, Tensor};
use tempfile::TempDir;

/// Write `per_class` synthetic rope-like images into each class directory
pub(crate) fn make_image_folder(classes: &[&str], per_class: usize) -> TempDir {
    let dir = TempDir::new().unwrap();
    write_classes(dir.path(), classes, per_class, "png");
    dir
}

/// Write class directories with images named `{i:03}.{ext}`
pub(crate) fn write_classes(root: &std::path::Path, classes: &[&str], per_class: usize, ext: &str) {
    for (c, class) in classes.iter().enumerate() {
        let class_dir = root.join(class);
        std::fs::create_dir_all(&class_dir).unwrap();
        for i in 0..per_class {
            rope_image(c + i).save(class_dir.join(format!("{:03}.{}", i, ext))).unwrap();
        }
    }
}

/// Dataset root with `train_data/` episodes (images + `actions.npy`) and `test_data/`
pub(crate) fn make_episode_root(episodes: usize, frames: usize, action_dim: i64) -> TempDir {
    let dir = TempDir::new().unwrap();
    let names: Vec<String> = (0..episodes).map(|e| format!("run{:02}", e)).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    write_classes(&dir.path().join("train_data"), &names, frames, "png");
    write_classes(&dir.path().join("test_data"), &names[..1], frames, "png");

    for name in &names {
        let actions = Tensor::randn([frames as i64, action_dim], (Kind::Float, Device::Cpu));
        actions
            .write_npy(dir.path().join("train_data").join(name).join("actions.npy"))
            .unwrap();
    }
    dir
}

fn rope_image(seed: usize) -> RgbImage {
    RgbImage::from_fn(72, 72, |x, y| {
        let on_rope = (x as usize + seed * 3) % 11 < 3 || (y as usize + seed) % 13 == 0;
        if on_rope {
            Rgb([240, 235, 230])
        } else {
            Rgb([20, 25, 30])
        }
    })
}
