//! Image sources and labelled file discovery.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use image::RgbImage;
use image::imageops::FilterType;
use tracing::debug;

use captcha_reco_core::{CaptchaError, Result};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Produces fixed-size image tensors for dataset entries.
pub trait ImageSource: Send + Sync {
    /// Loads `path` as a (3, height, width) `f32` tensor in `[0, 1]`.
    fn load(&self, path: &Path, width: usize, height: usize, device: &Device) -> Result<Tensor>;
}

/// Decodes images from disk, resizing them when needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn load(&self, path: &Path, width: usize, height: usize, device: &Device) -> Result<Tensor> {
        let img = image::open(path).map_err(|e| CaptchaError::ImageLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let img = if img.width() as usize != width || img.height() as usize != height {
            debug!(
                path = %path.display(),
                from = ?(img.width(), img.height()),
                to = ?(width, height),
                "resizing image"
            );
            img.resize_exact(width as u32, height as u32, FilterType::Triangle)
        } else {
            img
        };

        rgb_to_tensor(&img.to_rgb8(), device)
    }
}

/// HWC `u8` pixels -> CHW `f32` in `[0, 1]`.
pub fn rgb_to_tensor(img: &RgbImage, device: &Device) -> Result<Tensor> {
    let (width, height) = img.dimensions();
    let pixels = Tensor::from_vec(
        img.as_raw().clone(),
        (height as usize, width as usize, 3),
        device,
    )?;
    Ok(pixels
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?
        .contiguous()?)
}

/// An image file and the label encoded in its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImage {
    pub path: PathBuf,
    pub label: String,
}

impl LabeledImage {
    /// Label = file name up to the first `.`, e.g. `AB3C.17.jpg` -> `AB3C`.
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        let label = name.split('.').next()?.to_string();
        Some(Self { path, label })
    }
}

/// Lists labelled images in `dir`, sorted by file name.
///
/// # Errors
/// `DatasetNotFound` when `dir` is not a directory, `EmptyDataset` when it
/// holds no images.
pub fn scan_labeled_images(dir: &Path) -> Result<Vec<LabeledImage>> {
    if !dir.is_dir() {
        return Err(CaptchaError::DatasetNotFound {
            path: dir.to_path_buf(),
        });
    }

    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| ext.eq_ignore_ascii_case(known))
            });
        if !is_image || !path.is_file() {
            continue;
        }
        if let Some(image) = LabeledImage::from_path(path) {
            images.push(image);
        }
    }

    if images.is_empty() {
        return Err(CaptchaError::EmptyDataset {
            path: dir.to_path_buf(),
        });
    }

    images.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(images)
}

/// All-zero images, for tests that only care about shapes and labels.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BlankImageSource;

#[cfg(test)]
impl ImageSource for BlankImageSource {
    fn load(&self, _path: &Path, width: usize, height: usize, device: &Device) -> Result<Tensor> {
        Ok(Tensor::zeros((3, height, width), DType::F32, device)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_image(dir: &Path, name: &str, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, _| image::Rgb([(x * 10) as u8, 0, 255]));
        img.save(dir.join(name)).unwrap();
    }

    #[test]
    fn label_is_name_before_first_dot() {
        let image = LabeledImage::from_path(PathBuf::from("data/AB3C.017.jpg")).unwrap();
        assert_eq!(image.label, "AB3C");
    }

    #[test]
    fn scan_lists_images_sorted() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "ZZ00.png", 8, 4);
        write_image(dir.path(), "AB3C.jpg", 8, 4);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let images = scan_labeled_images(dir.path()).unwrap();
        let labels: Vec<&str> = images.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, ["AB3C", "ZZ00"]);
    }

    #[test]
    fn scan_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            scan_labeled_images(dir.path()),
            Err(CaptchaError::EmptyDataset { .. })
        ));
        assert!(matches!(
            scan_labeled_images(&dir.path().join("missing")),
            Err(CaptchaError::DatasetNotFound { .. })
        ));
    }

    #[test]
    fn file_source_resizes_and_normalizes() {
        let dir = TempDir::new().unwrap();
        write_image(dir.path(), "AB3C.png", 10, 5);

        let tensor = FileImageSource
            .load(&dir.path().join("AB3C.png"), 20, 8, &Device::Cpu)
            .unwrap();
        assert_eq!(tensor.dims(), &[3, 8, 20]);

        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        let max = values.iter().copied().fold(f32::MIN, f32::max);
        let min = values.iter().copied().fold(f32::MAX, f32::min);
        assert!(max <= 1.0 + 1e-6 && max > 0.99);
        assert!(min >= 0.0);
    }

    #[test]
    fn rgb_layout_is_channel_first() {
        let img = RgbImage::from_fn(2, 1, |x, _| image::Rgb([255, if x == 1 { 255 } else { 0 }, 0]));
        let tensor = rgb_to_tensor(&img, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims(), &[3, 1, 2]);
        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        let expected = [1.0, 1.0, 0.0, 1.0, 0.0, 0.0];
        for (got, want) in values.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{values:?}");
        }
    }
}
