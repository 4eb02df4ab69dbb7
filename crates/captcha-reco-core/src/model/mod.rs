pub mod cnn;
pub mod config;
pub mod encoder;
pub mod recognizer;

pub use cnn::{FeatureExtractor, FeatureShape};
pub use config::{BlockSpec, CAPTCHA_BLOCKS, ModelConfig};
pub use encoder::SequenceEncoder;
pub use recognizer::CaptchaModel;
