//! # Captcha Reco Core
//!
//! The recognition engine: a convolutional feature extractor feeding a
//! bidirectional LSTM, trained with CTC and decoded greedily.
//!
//! ## Quick Start
//!
//! ```rust
//! use captcha_reco_core::Vocabulary;
//!
//! let vocab = Vocabulary::captcha();
//! let target = vocab.encode("AB3C").unwrap();
//! assert_eq!(vocab.decode_target(&target).unwrap(), "AB3C");
//!
//! // Per-timestep argmax of a 12-step output sequence.
//! let argmax = [0, 11, 11, 0, 12, 0, 4, 4, 0, 13, 0, 0];
//! assert_eq!(vocab.decode_prediction(&argmax).unwrap(), "AB3C");
//! ```
pub mod accuracy;
pub mod codec;
pub mod ctc;
pub mod error;
pub mod model;

// Re-export primary API
pub use accuracy::{compute_accuracy, sequence_accuracy};
pub use codec::{BLANK_INDEX, CAPTCHA_ALPHABET, Vocabulary};
pub use ctc::ctc_loss;
pub use error::{CaptchaError, Result};
pub use model::{BlockSpec, CAPTCHA_BLOCKS, CaptchaModel, FeatureShape, ModelConfig};
