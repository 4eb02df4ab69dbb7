//! Captcha dataset with a fixed virtual length.

use std::path::PathBuf;
use std::sync::Arc;

use candle_core::{Device, Tensor};
use tracing::info;

use captcha_reco_core::{CaptchaError, Result, Vocabulary};

use crate::config::TrainConfig;
use crate::data::source::{ImageSource, LabeledImage, scan_labeled_images};

/// Shape and size parameters of one dataset split.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetConfig {
    /// Samples per epoch, independent of the number of files.
    pub virtual_length: usize,
    pub width: usize,
    pub height: usize,
    /// Model timesteps, reported with every sample.
    pub input_length: usize,
    /// Characters per label, reported with every sample.
    pub label_length: usize,
    pub source_path: PathBuf,
}

impl DatasetConfig {
    /// Training split of a run configuration.
    pub fn train(config: &TrainConfig) -> Self {
        Self::split(config, config.train_length, config.train_dir.clone())
    }

    /// Validation split of a run configuration.
    pub fn valid(config: &TrainConfig) -> Self {
        Self::split(config, config.valid_length, config.valid_dir.clone())
    }

    fn split(config: &TrainConfig, virtual_length: usize, source_path: PathBuf) -> Self {
        Self {
            virtual_length,
            width: config.width,
            height: config.height,
            input_length: config.input_length,
            label_length: config.label_length,
            source_path,
        }
    }
}

/// One training example, built fresh on every access.
#[derive(Debug, Clone)]
pub struct Sample {
    /// (3, height, width)
    pub image: Tensor,
    pub target: Vec<u32>,
    pub input_length: usize,
    pub label_length: usize,
}

/// Labelled images served for a fixed number of samples per epoch.
pub struct CaptchaDataset {
    vocabulary: Vocabulary,
    config: DatasetConfig,
    entries: Vec<LabeledImage>,
    source: Arc<dyn ImageSource>,
    device: Device,
}

impl CaptchaDataset {
    /// Scans `config.source_path` and validates every label.
    pub fn open(
        vocabulary: &Vocabulary,
        config: DatasetConfig,
        source: Arc<dyn ImageSource>,
        device: &Device,
    ) -> Result<Self> {
        let entries = scan_labeled_images(&config.source_path)?;
        Self::from_entries(vocabulary, config, entries, source, device)
    }

    /// Builds a dataset over an explicit list of entries.
    pub fn from_entries(
        vocabulary: &Vocabulary,
        config: DatasetConfig,
        entries: Vec<LabeledImage>,
        source: Arc<dyn ImageSource>,
        device: &Device,
    ) -> Result<Self> {
        if entries.is_empty() {
            return Err(CaptchaError::EmptyDataset {
                path: config.source_path.clone(),
            });
        }
        for entry in &entries {
            check_label(vocabulary, &entry.label, config.label_length)?;
        }

        info!(
            path = %config.source_path.display(),
            files = entries.len(),
            virtual_length = config.virtual_length,
            "dataset ready"
        );

        Ok(Self {
            vocabulary: vocabulary.clone(),
            config,
            entries,
            source,
            device: device.clone(),
        })
    }

    /// Samples per epoch.
    pub fn len(&self) -> usize {
        self.config.virtual_length
    }

    pub fn is_empty(&self) -> bool {
        self.config.virtual_length == 0
    }

    /// Number of distinct labelled files behind the dataset.
    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Loads sample `index`. Indices wrap around the file list so the
    /// virtual length can exceed the number of files.
    pub fn get(&self, index: usize) -> Result<Sample> {
        if index >= self.len() {
            return Err(CaptchaError::InvalidLength(format!(
                "sample index {index} out of range for {} samples",
                self.len()
            )));
        }

        let entry = &self.entries[index % self.entries.len()];
        let image = self.source.load(
            &entry.path,
            self.config.width,
            self.config.height,
            &self.device,
        )?;
        let target = self.vocabulary.encode(&entry.label)?;

        Ok(Sample {
            image,
            target,
            input_length: self.config.input_length,
            label_length: self.config.label_length,
        })
    }
}

fn check_label(vocabulary: &Vocabulary, label: &str, expected: usize) -> Result<()> {
    vocabulary.encode(label)?;
    if label.chars().count() != expected {
        return Err(CaptchaError::LabelLengthMismatch {
            label: label.to_string(),
            expected,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::source::{BlankImageSource, FileImageSource};
    use image::RgbImage;
    use tempfile::TempDir;

    fn entries(labels: &[&str]) -> Vec<LabeledImage> {
        labels
            .iter()
            .map(|label| LabeledImage {
                path: PathBuf::from(format!("{label}.jpg")),
                label: label.to_string(),
            })
            .collect()
    }

    fn config(virtual_length: usize) -> DatasetConfig {
        DatasetConfig {
            virtual_length,
            width: 192,
            height: 64,
            input_length: 12,
            label_length: 4,
            source_path: PathBuf::from("memory"),
        }
    }

    #[test]
    fn virtual_length_wraps_files() {
        let vocab = Vocabulary::captcha();
        let dataset = CaptchaDataset::from_entries(
            &vocab,
            config(5),
            entries(&["AB3C", "9Z0X"]),
            Arc::new(BlankImageSource),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.file_count(), 2);

        let sample = dataset.get(4).unwrap();
        assert_eq!(vocab.decode_target(&sample.target).unwrap(), "AB3C");
        assert_eq!(sample.image.dims(), &[3, 64, 192]);
        assert_eq!(sample.input_length, 12);
        assert_eq!(sample.label_length, 4);

        let sample = dataset.get(3).unwrap();
        assert_eq!(vocab.decode_target(&sample.target).unwrap(), "9Z0X");
        assert!(dataset.get(5).is_err());
    }

    #[test]
    fn rejects_bad_labels() {
        let vocab = Vocabulary::captcha();
        let open = |labels: &[&str]| {
            CaptchaDataset::from_entries(
                &vocab,
                config(10),
                entries(labels),
                Arc::new(BlankImageSource),
                &Device::Cpu,
            )
        };
        assert!(matches!(
            open(&["ab3c"]),
            Err(CaptchaError::InvalidCharacter { .. })
        ));
        assert!(matches!(
            open(&["AB3"]),
            Err(CaptchaError::LabelLengthMismatch { expected: 4, .. })
        ));
        assert!(matches!(open(&[]), Err(CaptchaError::EmptyDataset { .. })));
    }

    #[test]
    fn opens_directory_of_images() {
        let dir = TempDir::new().unwrap();
        RgbImage::new(96, 32).save(dir.path().join("AB3C.png")).unwrap();
        RgbImage::new(96, 32).save(dir.path().join("9Z0X.png")).unwrap();

        let mut cfg = config(4);
        cfg.source_path = dir.path().to_path_buf();
        let dataset = CaptchaDataset::open(
            &Vocabulary::captcha(),
            cfg,
            Arc::new(FileImageSource),
            &Device::Cpu,
        )
        .unwrap();
        assert_eq!(dataset.file_count(), 2);
        assert_eq!(dataset.get(0).unwrap().image.dims(), &[3, 64, 192]);
    }

    #[test]
    fn missing_directory_is_fatal() {
        let mut cfg = config(4);
        cfg.source_path = PathBuf::from("/definitely/not/here");
        let result = CaptchaDataset::open(
            &Vocabulary::captcha(),
            cfg,
            Arc::new(FileImageSource),
            &Device::Cpu,
        );
        assert!(matches!(result, Err(CaptchaError::DatasetNotFound { .. })));
    }
}
