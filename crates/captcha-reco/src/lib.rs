//! # Captcha Reco
//!
//! Captcha text recognition with a convolutional-recurrent network trained
//! on CTC. This crate bundles the recognition engine and its training
//! workflow.
//!
//! ```rust
//! use captcha_reco::Vocabulary;
//!
//! let vocab = Vocabulary::captcha();
//! assert_eq!(vocab.len(), 37);
//! assert_eq!(vocab.decode_prediction(&[0, 11, 0, 11, 12]).unwrap(), "AAB");
//! ```

pub use captcha_reco_core::*;

/// Training workflow: configuration, dataset adapter and loops.
pub mod trainer {
    pub use captcha_reco_trainer::*;
}
