use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while encoding labels, running the model or
/// preparing training data.
#[derive(Debug, Error)]
pub enum CaptchaError {
    /// A label contains a symbol that is not part of the vocabulary
    /// (or is the reserved blank symbol).
    #[error("invalid character {character:?} in label {label:?}")]
    InvalidCharacter {
        /// The offending character.
        character: char,
        /// The label being encoded.
        label: String,
    },

    /// A class index does not map to any vocabulary symbol.
    #[error("class index {index} is outside the vocabulary of {vocabulary_size} symbols")]
    InvalidIndex { index: u32, vocabulary_size: usize },

    /// The vocabulary itself is unusable.
    #[error("invalid vocabulary: {0}")]
    InvalidVocabulary(String),

    /// Tensor shapes or timestep counts disagree with the model configuration.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A sequence length handed to the loss is unusable.
    #[error("invalid length: {0}")]
    InvalidLength(String),

    /// The input sequence is too short to emit the target under CTC.
    #[error(
        "sample {sample}: input length {input_length} cannot align a target that needs {required} timesteps"
    )]
    InfeasibleAlignment {
        sample: usize,
        input_length: usize,
        required: usize,
    },

    /// The loss became NaN or infinite.
    #[error("loss diverged to {loss}")]
    NumericDivergence { loss: f32 },

    /// The dataset directory does not exist.
    #[error("dataset directory not found: {}", path.display())]
    DatasetNotFound { path: PathBuf },

    /// The dataset directory holds no labelled images.
    #[error("no labelled images found in {}", path.display())]
    EmptyDataset { path: PathBuf },

    /// A label does not have the fixed length the model is trained on.
    #[error("label {label:?} does not have the expected length {expected}")]
    LabelLengthMismatch { label: String, expected: usize },

    /// An image could not be decoded.
    #[error("failed to load image {}: {reason}", path.display())]
    ImageLoad { path: PathBuf, reason: String },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle ML framework error.
    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for captcha recognition operations.
pub type Result<T> = std::result::Result<T, CaptchaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = CaptchaError::InvalidCharacter {
            character: 'a',
            label: "AB3a".into(),
        };
        assert_eq!(err.to_string(), "invalid character 'a' in label \"AB3a\"");

        let err = CaptchaError::EmptyDataset {
            path: PathBuf::from("data/train"),
        };
        assert!(err.to_string().contains("data/train"));

        let err = CaptchaError::NumericDivergence { loss: f32::NAN };
        assert!(err.to_string().contains("NaN"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CaptchaError>();
    }
}
