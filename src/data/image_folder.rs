//! Class-per-directory image dataset
//!
//! Layout: `root/<class>/<image>.png`. Classes are sorted by name and
//! numbered from zero; images within a class are sorted by path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::{Array3, Array4, Axis};
use tch::Tensor;
use tracing::debug;

use super::transforms::Transform;
use crate::error::{Result, RopeGanError};

/// File extensions recognised as images
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Image dataset with one sub-directory per class
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    transform: Transform,
    classes: Vec<String>,
    samples: Vec<(PathBuf, usize)>,
}

impl ImageFolder {
    /// Scan `root` for class directories and their images
    pub fn new<P: AsRef<Path>>(root: P, transform: Transform) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(RopeGanError::Dataset(format!(
                "dataset root {} is not a directory",
                root.display()
            )));
        }

        let mut classes: Vec<String> = std::fs::read_dir(&root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        classes.sort();

        if classes.is_empty() {
            return Err(RopeGanError::Dataset(format!(
                "no class directories found in {}",
                root.display()
            )));
        }

        let mut samples = Vec::new();
        for (idx, class) in classes.iter().enumerate() {
            for path in list_images(&root.join(class))? {
                samples.push((path, idx));
            }
        }

        if samples.is_empty() {
            return Err(RopeGanError::Dataset(format!(
                "no images found under {}",
                root.display()
            )));
        }

        debug!(
            "Loaded image folder {} ({} classes, {} images)",
            root.display(),
            classes.len(),
            samples.len()
        );

        Ok(Self {
            root,
            transform,
            classes,
            samples,
        })
    }

    /// Number of images
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the dataset has no images
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Dataset root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Transform applied to every image
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Class names sorted by index
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Mapping from class name to class index
    pub fn class_to_idx(&self) -> BTreeMap<String, usize> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect()
    }

    /// All `(path, class)` pairs
    pub fn samples(&self) -> &[(PathBuf, usize)] {
        &self.samples
    }

    /// Load and transform a single image
    pub fn get(&self, idx: usize) -> Result<(Array3<f32>, usize)> {
        let (path, class) = self.samples.get(idx).ok_or_else(|| {
            RopeGanError::Dataset(format!(
                "index {} out of range for dataset of size {}",
                idx,
                self.len()
            ))
        })?;
        Ok((self.transform.load(path)?, *class))
    }

    /// Load the images at `indices` as a `[B, C, H, W]` float tensor
    pub fn load_batch(&self, indices: &[usize]) -> Result<Tensor> {
        let size = self.transform.size() as usize;
        let channels = self.transform.channels() as usize;
        let mut batch = Array4::<f32>::zeros((indices.len(), channels, size, size));

        for (batch_idx, &idx) in indices.iter().enumerate() {
            let (image, _) = self.get(idx)?;
            batch.index_axis_mut(Axis(0), batch_idx).assign(&image);
        }

        Ok(Tensor::try_from(batch)?)
    }

    /// Labels for the images at `indices`
    pub fn labels(&self, indices: &[usize]) -> Vec<usize> {
        indices
            .iter()
            .filter_map(|&i| self.samples.get(i).map(|(_, c)| *c))
            .collect()
    }
}

/// Sorted image files directly inside `dir`
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && has_image_extension(p))
        .collect();
    files.sort();
    Ok(files)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TransformKind;
    use crate::test_utils::make_image_folder;
    use tempfile::TempDir;

    #[test]
    fn test_image_folder_scan() {
        let dir = make_image_folder(&["b_class", "a_class"], 3);
        std::fs::write(dir.path().join("a_class").join("notes.txt"), "skip").unwrap();

        let dataset = ImageFolder::new(dir.path(), Transform::new(TransformKind::Rope)).unwrap();
        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.classes(), &["a_class".to_string(), "b_class".to_string()]);
        assert_eq!(dataset.class_to_idx()["b_class"], 1);
        assert_eq!(dataset.samples()[0].1, 0);
        assert_eq!(dataset.samples()[5].1, 1);
    }

    #[test]
    fn test_image_folder_get_and_batch() {
        let dir = make_image_folder(&["ep0"], 4);
        let dataset = ImageFolder::new(dir.path(), Transform::new(TransformKind::Rope)).unwrap();

        let (img, class) = dataset.get(2).unwrap();
        assert_eq!(img.dim(), (1, 64, 64));
        assert_eq!(class, 0);
        assert!(dataset.get(10).is_err());

        let batch = dataset.load_batch(&[0, 1, 3]).unwrap();
        assert_eq!(batch.size(), vec![3, 1, 64, 64]);
        assert_eq!(dataset.labels(&[0, 3]), vec![0, 0]);
    }

    #[test]
    fn test_image_folder_errors() {
        let dir = TempDir::new().unwrap();
        let transform = Transform::new(TransformKind::Raw);
        assert!(ImageFolder::new(dir.path().join("missing"), transform).is_err());
        assert!(ImageFolder::new(dir.path(), transform).is_err());

        std::fs::create_dir_all(dir.path().join("empty")).unwrap();
        assert!(ImageFolder::new(dir.path(), transform).is_err());
    }
}
