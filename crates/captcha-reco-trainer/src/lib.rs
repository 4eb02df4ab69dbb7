//! # Captcha Reco Trainer
//!
//! Training workflow for the captcha recognizer: run configuration, the
//! dataset adapter that turns labelled image files into batches, and the
//! training and validation loops.
//!
//! ```no_run
//! use captcha_reco_trainer::{TrainConfig, run_training};
//!
//! let config = TrainConfig::new()
//!     .with_train_dir("data/train")
//!     .with_valid_dir("data/valid")
//!     .with_epochs(1);
//! run_training(config).unwrap();
//! ```

pub mod config;
pub mod data;
pub mod metrics;
pub mod trainer;

pub use config::TrainConfig;
pub use data::{Batch, BatchLoader, CaptchaDataset, DatasetConfig, FileImageSource, ImageSource};
pub use metrics::{ExponentialAverage, RunningMean};
pub use trainer::{
    EpochMetrics, StepMetrics, Trainer, eval_step, run_training, train_epoch, train_step,
    valid_epoch,
};
