//! # Captcha Recognition Model
//!
//! CNN feature extractor -> bidirectional LSTM -> per-timestep linear
//! projection, producing CTC scores shaped (timesteps, batch, classes).

use std::fmt::Write;

use candle_core::{D, Device, Module, ModuleT, Tensor};
use candle_nn::{Linear, VarBuilder};
use tracing::debug;

use crate::codec::Vocabulary;
use crate::error::{CaptchaError, Result};
use crate::model::cnn::{FeatureExtractor, FeatureShape};
use crate::model::config::ModelConfig;
use crate::model::encoder::SequenceEncoder;

/// The full recognition network. Parameters live in the `VarBuilder`'s
/// backing store; the struct holds handles to them.
#[derive(Debug, Clone)]
pub struct CaptchaModel {
    config: ModelConfig,
    cnn: FeatureExtractor,
    rnn: SequenceEncoder,
    fc: Linear,
    feature_shape: FeatureShape,
    device: Device,
}

impl CaptchaModel {
    /// Builds the network. The feature extractor is run once on a zero image
    /// to size the encoder input and fix the timestep count.
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        if config.num_classes < 2 {
            return Err(CaptchaError::InvalidVocabulary(format!(
                "model needs a blank and at least one symbol, got {} classes",
                config.num_classes
            )));
        }

        let device = vb.device().clone();
        let cnn = FeatureExtractor::new(config, vb.pp("cnn"))?;
        let feature_shape = cnn.infer_output_shape(config.input_shape, &device)?;
        debug!(
            ?feature_shape,
            input_shape = ?config.input_shape,
            "inferred feature map shape"
        );

        let rnn = SequenceEncoder::new(
            feature_shape.features(),
            config.hidden_size,
            config.rnn_layers,
            vb.pp("lstm"),
        )?;
        let fc = candle_nn::linear(config.encoder_width(), config.num_classes, vb.pp("fc"))?;

        Ok(Self {
            config: config.clone(),
            cnn,
            rnn,
            fc,
            feature_shape,
            device,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn feature_shape(&self) -> FeatureShape {
        self.feature_shape
    }

    /// Timestep count of every output sequence, fixed at construction.
    pub fn timesteps(&self) -> usize {
        self.feature_shape.timesteps()
    }

    /// Re-runs the extractor on a zero image to count output timesteps.
    pub fn infer_output_length(&self) -> Result<usize> {
        self.cnn
            .infer_output_length(self.config.input_shape, &self.device)
    }

    /// Checks that a dataset's input length matches the model's timesteps.
    pub fn check_input_length(&self, input_length: usize) -> Result<()> {
        if input_length != self.timesteps() {
            return Err(CaptchaError::ShapeMismatch(format!(
                "input length {input_length} does not match the {} timesteps produced for input shape {:?}",
                self.timesteps(),
                self.config.input_shape
            )));
        }
        Ok(())
    }

    /// Forward pass.
    ///
    /// `images`: (batch, channels, height, width) -> (timesteps, batch, classes).
    /// `train` switches batch norm to batch statistics and enables dropout.
    pub fn forward_t(&self, images: &Tensor, train: bool) -> Result<Tensor> {
        let (_, c, h, w) = images.dims4()?;
        if (c, h, w) != self.config.input_shape {
            return Err(CaptchaError::ShapeMismatch(format!(
                "image shape {:?} differs from the configured {:?}",
                (c, h, w),
                self.config.input_shape
            )));
        }

        let features = self.cnn.forward_t(images, train)?;
        let (batch, channels, height, width) = features.dims4()?;

        // Merge channels and height; width becomes the time axis.
        let sequence = features
            .reshape((batch, channels * height, width))?
            .transpose(1, 2)?
            .contiguous()?;

        let encoded = self.rnn.forward(&sequence)?;
        let scores = self.fc.forward(&encoded)?;

        Ok(scores.transpose(0, 1)?.contiguous()?)
    }

    /// Human-readable layer listing, one line per stage.
    pub fn summary(&self) -> String {
        let cfg = &self.config;
        let (c, h, w) = cfg.input_shape;
        let mut out = format!("input: {c}x{h}x{w}\n");
        let mut channels = c;
        for (idx, block) in cfg.blocks.iter().enumerate() {
            let _ = writeln!(
                out,
                "block{}: {} -> {} channels, {} x (conv{k}x{k} pad {} + bn + relu), maxpool {:?}",
                idx + 1,
                channels,
                block.channels,
                block.units,
                block.padding(),
                block.pool,
                k = block.kernel,
            );
            channels = block.channels;
        }
        let fs = self.feature_shape;
        let _ = writeln!(
            out,
            "dropout: p={}\nfeatures: {}x{}x{} -> {} timesteps of {}",
            cfg.dropout,
            fs.channels,
            fs.height,
            fs.width,
            fs.timesteps(),
            fs.features()
        );
        let _ = writeln!(
            out,
            "lstm: {} -> {} x 2 directions, {} layers",
            fs.features(),
            cfg.hidden_size,
            cfg.rnn_layers
        );
        let _ = write!(out, "fc: {} -> {}", cfg.encoder_width(), cfg.num_classes);
        out
    }

    /// Evaluation-mode forward pass.
    pub fn forward(&self, images: &Tensor) -> Result<Tensor> {
        self.forward_t(images, false)
    }

    /// Decodes a batch of images into strings with greedy CTC decoding.
    pub fn predict(&self, images: &Tensor, vocabulary: &Vocabulary) -> Result<Vec<String>> {
        let scores = self.forward(images)?.detach();
        let argmax: Vec<Vec<u32>> = scores.argmax(D::Minus1)?.t()?.contiguous()?.to_vec2()?;
        argmax
            .iter()
            .map(|seq| vocabulary.decode_prediction(seq))
            .collect()
    }
}
