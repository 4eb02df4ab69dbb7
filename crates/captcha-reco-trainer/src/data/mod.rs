//! Dataset adapter: labelled image files to collated batches.

pub mod batch;
pub mod dataset;
pub mod source;

pub use batch::{Batch, BatchLoader, Batches};
pub use dataset::{CaptchaDataset, DatasetConfig, Sample};
pub use source::{FileImageSource, ImageSource, LabeledImage, rgb_to_tensor, scan_labeled_images};
