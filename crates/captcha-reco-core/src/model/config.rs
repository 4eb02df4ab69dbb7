/// One convolutional block of the feature extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    /// Output channels of every unit in the block.
    pub channels: usize,
    /// Number of stacked conv -> norm -> relu units.
    pub units: usize,
    /// Square kernel size.
    pub kernel: usize,
    /// Max-pool window (height, width); stride equals the window.
    pub pool: (usize, usize),
}

impl BlockSpec {
    /// Same-size padding for 3x3 kernels, none otherwise.
    pub fn padding(&self) -> usize {
        if self.kernel == 3 { 1 } else { 0 }
    }
}

/// Feature extractor layout. The last block pools height only.
pub const CAPTCHA_BLOCKS: [BlockSpec; 5] = [
    BlockSpec { channels: 32, units: 2, kernel: 3, pool: (2, 2) },
    BlockSpec { channels: 64, units: 2, kernel: 3, pool: (2, 2) },
    BlockSpec { channels: 128, units: 2, kernel: 3, pool: (2, 2) },
    BlockSpec { channels: 256, units: 2, kernel: 3, pool: (2, 2) },
    BlockSpec { channels: 256, units: 2, kernel: 3, pool: (2, 1) },
];

pub const DEFAULT_INPUT_SHAPE: (usize, usize, usize) = (3, 64, 128);
pub const DEFAULT_HIDDEN_SIZE: usize = 128;
pub const DEFAULT_RNN_LAYERS: usize = 2;
pub const DEFAULT_DROPOUT: f32 = 0.25;

/// Static description of the recognition network.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Vocabulary size, blank included.
    pub num_classes: usize,
    /// Input image shape as (channels, height, width).
    pub input_shape: (usize, usize, usize),
    pub blocks: Vec<BlockSpec>,
    /// LSTM hidden size per direction.
    pub hidden_size: usize,
    /// Number of stacked bidirectional LSTM layers.
    pub rnn_layers: usize,
    /// Dropout probability applied after the last block.
    pub dropout: f32,
}

impl ModelConfig {
    /// Default captcha architecture for `num_classes` output classes.
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            input_shape: DEFAULT_INPUT_SHAPE,
            blocks: CAPTCHA_BLOCKS.to_vec(),
            hidden_size: DEFAULT_HIDDEN_SIZE,
            rnn_layers: DEFAULT_RNN_LAYERS,
            dropout: DEFAULT_DROPOUT,
        }
    }

    /// Set the (channels, height, width) input shape.
    pub fn with_input_shape(mut self, shape: (usize, usize, usize)) -> Self {
        self.input_shape = shape;
        self
    }

    /// Set the per-direction LSTM hidden size.
    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    /// Set the dropout probability, clamped to `[0, 0.99]`.
    pub fn with_dropout(mut self, dropout: f32) -> Self {
        self.dropout = dropout.clamp(0.0, 0.99);
        self
    }

    /// Width of the per-timestep encoder output (both directions).
    pub fn encoder_width(&self) -> usize {
        2 * self.hidden_size
    }
}
