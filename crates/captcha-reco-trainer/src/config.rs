//! Training configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use captcha_reco_core::CAPTCHA_ALPHABET;
use captcha_reco_core::model::config::{DEFAULT_DROPOUT, DEFAULT_HIDDEN_SIZE};

/// Everything a training run needs. Missing JSON fields fall back to the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Alphabet with the blank symbol first.
    pub alphabet: String,
    pub width: usize,
    pub height: usize,
    /// Characters per captcha.
    pub label_length: usize,
    /// Timesteps the model emits for `width`x`height` images.
    pub input_length: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Samples drawn per training epoch.
    pub train_length: usize,
    /// Samples drawn per validation epoch.
    pub valid_length: usize,
    pub train_dir: PathBuf,
    pub valid_dir: PathBuf,
    /// Seed for the training sample order.
    pub seed: u64,
    /// LSTM hidden size per direction.
    pub hidden_size: usize,
    /// Dropout after the convolutional blocks.
    pub dropout: f32,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            alphabet: CAPTCHA_ALPHABET.to_string(),
            width: 192,
            height: 64,
            label_length: 4,
            input_length: 12,
            epochs: 10,
            batch_size: 128,
            learning_rate: 1e-3,
            train_length: 10_000,
            valid_length: 1_000,
            train_dir: PathBuf::from("data/train"),
            valid_dir: PathBuf::from("data/valid"),
            seed: 42,
            hidden_size: DEFAULT_HIDDEN_SIZE,
            dropout: DEFAULT_DROPOUT,
        }
    }
}

impl TrainConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    /// Input shape fed to the model, channels first.
    pub fn input_shape(&self) -> (usize, usize, usize) {
        (3, self.height, self.width)
    }

    /// Set the number of epochs.
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Set the batch size (at least 1).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Set the optimizer learning rate.
    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the training image directory.
    pub fn with_train_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.train_dir = dir.into();
        self
    }

    /// Set the validation image directory.
    pub fn with_valid_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.valid_dir = dir.into();
        self
    }

    /// Set the per-direction LSTM hidden size.
    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    /// Set the dropout probability.
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout;
        self
    }

    /// Set the shuffle seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
