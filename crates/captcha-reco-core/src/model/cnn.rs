//! Convolutional feature extractor.

use candle_core::{DType, Device, ModuleT, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, Dropout, VarBuilder};

use crate::error::{CaptchaError, Result};
use crate::model::config::{BlockSpec, ModelConfig};

/// conv -> batch norm -> relu
#[derive(Debug, Clone)]
pub struct ConvUnit {
    conv: Conv2d,
    norm: BatchNorm,
}

impl ConvUnit {
    fn new(
        in_channels: usize,
        out_channels: usize,
        block: &BlockSpec,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        let cfg = Conv2dConfig {
            padding: block.padding(),
            ..Default::default()
        };
        let conv = candle_nn::conv2d(in_channels, out_channels, block.kernel, cfg, vb.pp("conv"))?;
        let norm = candle_nn::batch_norm(out_channels, BatchNormConfig::default(), vb.pp("bn"))?;
        Ok(Self { conv, norm })
    }
}

impl ModuleT for ConvUnit {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        xs.apply(&self.conv)?.apply_t(&self.norm, train)?.relu()
    }
}

/// A stack of conv units followed by a max pool.
#[derive(Debug, Clone)]
pub struct ConvBlock {
    units: Vec<ConvUnit>,
    pool: (usize, usize),
}

impl ConvBlock {
    fn new(in_channels: usize, block: &BlockSpec, vb: VarBuilder) -> candle_core::Result<Self> {
        let mut units = Vec::with_capacity(block.units);
        let mut channels = in_channels;
        for unit in 0..block.units {
            units.push(ConvUnit::new(
                channels,
                block.channels,
                block,
                vb.pp(format!("unit{}", unit + 1)),
            )?);
            channels = block.channels;
        }
        Ok(Self {
            units,
            pool: block.pool,
        })
    }
}

impl ModuleT for ConvBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();
        for unit in &self.units {
            xs = xs.apply_t(unit, train)?;
        }
        xs.max_pool2d(self.pool)
    }
}

/// Spatial shape of the feature map leaving the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl FeatureShape {
    /// Per-timestep feature width once channels and height are merged.
    pub fn features(&self) -> usize {
        self.channels * self.height
    }

    /// Number of timesteps (the remaining width).
    pub fn timesteps(&self) -> usize {
        self.width
    }
}

/// Five conv blocks plus a final dropout.
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    blocks: Vec<ConvBlock>,
    dropout: Dropout,
}

impl FeatureExtractor {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let mut blocks = Vec::with_capacity(config.blocks.len());
        let mut channels = config.input_shape.0;
        for (idx, block) in config.blocks.iter().enumerate() {
            blocks.push(ConvBlock::new(
                channels,
                block,
                vb.pp(format!("block{}", idx + 1)),
            )?);
            channels = block.channels;
        }

        Ok(Self {
            blocks,
            dropout: Dropout::new(config.dropout),
        })
    }

    /// Runs a zero image of `input_shape` through the extractor in
    /// evaluation mode and reports the resulting feature map shape.
    pub fn infer_output_shape(
        &self,
        input_shape: (usize, usize, usize),
        device: &Device,
    ) -> Result<FeatureShape> {
        let (c, h, w) = input_shape;
        let dummy = Tensor::zeros((1, c, h, w), DType::F32, device)?;
        let (_, channels, height, width) = self.forward_t(&dummy, false)?.dims4()?;
        if width == 0 || height == 0 {
            return Err(CaptchaError::ShapeMismatch(format!(
                "input shape {input_shape:?} collapses to an empty feature map"
            )));
        }
        Ok(FeatureShape {
            channels,
            height,
            width,
        })
    }

    /// Timestep count produced for `input_shape`.
    pub fn infer_output_length(
        &self,
        input_shape: (usize, usize, usize),
        device: &Device,
    ) -> Result<usize> {
        Ok(self.infer_output_shape(input_shape, device)?.timesteps())
    }
}

impl ModuleT for FeatureExtractor {
    fn forward_t(&self, xs: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let mut xs = xs.clone();
        for block in &self.blocks {
            xs = xs.apply_t(block, train)?;
        }
        xs.apply_t(&self.dropout, train)
    }
}
