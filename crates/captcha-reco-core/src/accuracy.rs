//! Sequence-level accuracy: a sample counts only when the whole decoded
//! string matches its target.

use candle_core::{D, DType, Tensor};

use crate::codec::Vocabulary;
use crate::error::{CaptchaError, Result};

/// Fraction of samples whose greedy decoding equals the decoded target.
///
/// * `targets` - (batch, label_length) class indices
/// * `scores` - (timesteps, batch, classes) raw or log-normalized scores
pub fn compute_accuracy(vocabulary: &Vocabulary, targets: &Tensor, scores: &Tensor) -> Result<f64> {
    let (_, batch, _) = scores.dims3()?;
    let target_batch = targets.dim(0)?;
    if target_batch != batch {
        return Err(CaptchaError::ShapeMismatch(format!(
            "{target_batch} targets for a batch of {batch} score sequences"
        )));
    }

    let predictions: Vec<Vec<u32>> = scores
        .detach()
        .argmax(D::Minus1)?
        .t()?
        .contiguous()?
        .to_vec2()?;
    let targets: Vec<Vec<u32>> = targets.to_dtype(DType::U32)?.to_vec2()?;
    sequence_accuracy(vocabulary, &targets, &predictions)
}

/// Same as [`compute_accuracy`] on plain index sequences: `targets[i]` are
/// label indices, `predictions[i]` the per-timestep argmax.
pub fn sequence_accuracy(
    vocabulary: &Vocabulary,
    targets: &[Vec<u32>],
    predictions: &[Vec<u32>],
) -> Result<f64> {
    if targets.len() != predictions.len() {
        return Err(CaptchaError::ShapeMismatch(format!(
            "{} targets for {} predictions",
            targets.len(),
            predictions.len()
        )));
    }
    if targets.is_empty() {
        return Ok(0.0);
    }

    let mut correct = 0usize;
    for (target, prediction) in targets.iter().zip(predictions) {
        if vocabulary.decode_target(target)? == vocabulary.decode_prediction(prediction)? {
            correct += 1;
        }
    }
    Ok(correct as f64 / targets.len() as f64)
}
