//! # CTC Loss
//!
//! Connectionist temporal classification loss built from differentiable
//! tensor operations, so candle's autograd provides the gradient.
//!
//! The forward variable `alpha` lives on the blank-extended label
//! `[blank, l1, blank, l2, ..., blank]` and is propagated in log space.

use candle_core::{DType, Tensor};

use crate::error::{CaptchaError, Result};

/// Finite stand-in for log(0). Keeps `exp(x - max)` and its gradient free of
/// NaN when every candidate path is impossible.
const LOG_ZERO: f32 = -1e30;

/// Mean CTC negative log-likelihood of a batch.
///
/// * `log_probs` - (timesteps, batch, classes), log-softmax normalized
/// * `targets` - (batch, width) class indices; only the first
///   `target_lengths[b]` entries of row `b` are used
/// * `input_lengths` - valid timesteps per sample
/// * `target_lengths` - label length per sample, at least 1
///
/// Each sample's loss is divided by its target length before averaging over
/// the batch.
pub fn ctc_loss(
    log_probs: &Tensor,
    targets: &Tensor,
    input_lengths: &[usize],
    target_lengths: &[usize],
    blank: u32,
) -> Result<Tensor> {
    let (timesteps, batch, classes) = log_probs.dims3()?;
    let (target_batch, target_width) = targets.dims2()?;
    if target_batch != batch || input_lengths.len() != batch || target_lengths.len() != batch {
        return Err(CaptchaError::ShapeMismatch(format!(
            "scores cover {batch} samples but got {target_batch} targets, {} input lengths and {} target lengths",
            input_lengths.len(),
            target_lengths.len()
        )));
    }
    if blank as usize >= classes {
        return Err(CaptchaError::InvalidIndex {
            index: blank,
            vocabulary_size: classes,
        });
    }

    let targets: Vec<Vec<u32>> = targets.to_dtype(DType::U32)?.to_vec2()?;
    for (sample, label) in targets.iter().enumerate() {
        check_sample(
            sample,
            label,
            input_lengths[sample],
            target_lengths[sample],
            timesteps,
            classes,
            blank,
        )?;
    }

    let device = log_probs.device();
    let log_probs = log_probs.to_dtype(DType::F32)?;
    let states = 2 * target_width + 1;

    let mut extended = vec![blank; batch * states];
    let mut skip = vec![LOG_ZERO; batch * states];
    let mut start = vec![LOG_ZERO; batch * states];
    let mut ends = Vec::with_capacity(batch * 2);
    for (b, row) in targets.iter().enumerate() {
        let offset = b * states;
        let label = &row[..target_lengths[b]];
        for (i, &symbol) in label.iter().enumerate() {
            extended[offset + 2 * i + 1] = symbol;
            // A jump over the separating blank is only legal between
            // different symbols.
            if i > 0 && label[i - 1] != symbol {
                skip[offset + 2 * i + 1] = 0.0;
            }
        }
        start[offset] = 0.0;
        start[offset + 1] = 0.0;
        ends.push((2 * label.len()) as u32);
        ends.push((2 * label.len() - 1) as u32);
    }

    let extended = Tensor::from_vec(extended, (batch, states), device)?;
    let skip = Tensor::from_vec(skip, (batch, states), device)?;
    let start = Tensor::from_vec(start, (batch, states), device)?;
    let ends = Tensor::from_vec(ends, (batch, 2), device)?;
    let pad1 = Tensor::full(LOG_ZERO, (batch, 1), device)?;
    let pad2 = Tensor::full(LOG_ZERO, (batch, 2), device)?;

    let emissions = |t: usize| -> candle_core::Result<Tensor> {
        log_probs.get(t)?.contiguous()?.gather(&extended, 1)
    };

    let mut alpha = (emissions(0)? + start)?;
    for t in 1..timesteps {
        let advance = Tensor::cat(&[&pad1, &alpha.narrow(1, 0, states - 1)?], 1)?;
        let jump = (Tensor::cat(&[&pad2, &alpha.narrow(1, 0, states - 2)?], 1)? + &skip)?;
        let merged = log_sum_exp(&Tensor::stack(&[alpha.clone(), advance, jump], 2)?, 2)?;
        let next = (merged + emissions(t)?)?;

        // Samples whose input already ended keep their final alpha.
        let active: Vec<u8> = input_lengths
            .iter()
            .flat_map(|&len| std::iter::repeat_n(u8::from(t < len), states))
            .collect();
        let active = Tensor::from_vec(active, (batch, states), device)?;
        alpha = active.where_cond(&next, &alpha)?;
    }

    let nll = log_sum_exp(&alpha.gather(&ends, 1)?, 1)?.neg()?;
    let lengths: Vec<f32> = target_lengths.iter().map(|&len| len as f32).collect();
    let lengths = Tensor::from_vec(lengths, batch, device)?;
    Ok((nll / lengths)?.mean_all()?)
}

fn check_sample(
    sample: usize,
    label: &[u32],
    input_length: usize,
    target_length: usize,
    timesteps: usize,
    classes: usize,
    blank: u32,
) -> Result<()> {
    if input_length > timesteps {
        return Err(CaptchaError::ShapeMismatch(format!(
            "sample {sample}: input length {input_length} exceeds the {timesteps} timesteps of the scores"
        )));
    }
    if target_length == 0 {
        return Err(CaptchaError::InvalidLength(format!(
            "sample {sample}: target length must be at least 1"
        )));
    }
    if target_length > label.len() {
        return Err(CaptchaError::ShapeMismatch(format!(
            "sample {sample}: target length {target_length} exceeds the target width {}",
            label.len()
        )));
    }

    let label = &label[..target_length];
    if let Some(&index) = label
        .iter()
        .find(|&&idx| idx == blank || idx as usize >= classes)
    {
        return Err(CaptchaError::InvalidIndex {
            index,
            vocabulary_size: classes,
        });
    }

    let repeats = label.windows(2).filter(|w| w[0] == w[1]).count();
    let required = target_length + repeats;
    if input_length < required {
        return Err(CaptchaError::InfeasibleAlignment {
            sample,
            input_length,
            required,
        });
    }
    Ok(())
}

/// `log(sum(exp(xs)))` over `dim`, with the max shift kept out of the graph.
fn log_sum_exp(xs: &Tensor, dim: usize) -> candle_core::Result<Tensor> {
    let max = xs.max_keepdim(dim)?.detach();
    let summed = xs.broadcast_sub(&max)?.exp()?.sum_keepdim(dim)?.log()?;
    (summed + max)?.squeeze(dim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{D, Device, Var};

    /// Standard CTC collapse: merge repeats, then drop blanks.
    fn ctc_collapse(path: &[u32]) -> Vec<u32> {
        let mut out = Vec::new();
        let mut prev = None;
        for &p in path {
            if Some(p) != prev && p != 0 {
                out.push(p);
            }
            prev = Some(p);
        }
        out
    }

    /// Sums the probability of every path of length `t` that collapses to `target`.
    fn brute_force_nll(probs: &[Vec<f32>], target: &[u32]) -> f32 {
        let timesteps = probs.len();
        let classes = probs[0].len();
        let mut total = 0.0f64;
        let mut path = vec![0u32; timesteps];
        for code in 0..classes.pow(timesteps as u32) {
            let mut rest = code;
            let mut p = 1.0f64;
            for t in 0..timesteps {
                path[t] = (rest % classes) as u32;
                rest /= classes;
                p *= probs[t][path[t] as usize] as f64;
            }
            if ctc_collapse(&path) == target {
                total += p;
            }
        }
        -(total.ln() as f32)
    }

    fn log_probs_from(probs: &[Vec<f32>]) -> Tensor {
        let timesteps = probs.len();
        let classes = probs[0].len();
        let flat: Vec<f32> = probs.iter().flatten().map(|p| p.ln()).collect();
        Tensor::from_vec(flat, (timesteps, 1, classes), &Device::Cpu).unwrap()
    }

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn matches_brute_force_enumeration() {
        let probs = vec![
            vec![0.5, 0.3, 0.2],
            vec![0.2, 0.6, 0.2],
            vec![0.4, 0.1, 0.5],
            vec![0.3, 0.3, 0.4],
        ];
        for target in [vec![1u32], vec![1, 2], vec![2, 2], vec![1, 2, 1]] {
            let expected = brute_force_nll(&probs, &target) / target.len() as f32;
            let targets = Tensor::from_vec(target.clone(), (1, target.len()), &Device::Cpu).unwrap();
            let loss = ctc_loss(&log_probs_from(&probs), &targets, &[4], &[target.len()], 0).unwrap();
            assert!(
                (scalar(&loss) - expected).abs() < 1e-4,
                "target {target:?}: {} vs {expected}",
                scalar(&loss)
            );
        }
    }

    #[test]
    fn respects_shorter_input_length() {
        let probs = vec![
            vec![0.5, 0.3, 0.2],
            vec![0.2, 0.6, 0.2],
            vec![0.4, 0.1, 0.5],
            vec![0.3, 0.3, 0.4],
        ];
        let expected = brute_force_nll(&probs[..3], &[2]);
        let targets = Tensor::new(&[[2u32]], &Device::Cpu).unwrap();
        let loss = ctc_loss(&log_probs_from(&probs), &targets, &[3], &[1], 0).unwrap();
        assert!((scalar(&loss) - expected).abs() < 1e-4);
    }

    #[test]
    fn batch_mean_over_samples() {
        let timesteps = 6;
        let classes = 4;
        let logits = Tensor::randn(0f32, 1f32, (timesteps, 2, classes), &Device::Cpu).unwrap();
        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1).unwrap();
        let targets = Tensor::new(&[[1u32, 2, 3], [3, 3, 1]], &Device::Cpu).unwrap();

        let both = ctc_loss(&log_probs, &targets, &[6, 6], &[3, 2], 0).unwrap();
        let first = ctc_loss(
            &log_probs.narrow(1, 0, 1).unwrap(),
            &targets.narrow(0, 0, 1).unwrap(),
            &[6],
            &[3],
            0,
        )
        .unwrap();
        let second = ctc_loss(
            &log_probs.narrow(1, 1, 1).unwrap(),
            &targets.narrow(0, 1, 1).unwrap(),
            &[6],
            &[2],
            0,
        )
        .unwrap();
        let mean = (scalar(&first) + scalar(&second)) / 2.0;
        assert!((scalar(&both) - mean).abs() < 1e-4);
    }

    #[test]
    fn gradient_is_finite_and_nonzero() {
        let logits = Var::from_tensor(
            &Tensor::randn(0f32, 1f32, (12, 2, 37), &Device::Cpu).unwrap(),
        )
        .unwrap();
        let log_probs = candle_nn::ops::log_softmax(logits.as_tensor(), D::Minus1).unwrap();
        let targets = Tensor::new(&[[11u32, 12, 4, 13], [10, 36, 1, 34]], &Device::Cpu).unwrap();
        let loss = ctc_loss(&log_probs, &targets, &[12, 12], &[4, 4], 0).unwrap();
        assert!(scalar(&loss).is_finite());

        let grads = loss.backward().unwrap();
        let grad = grads.get(logits.as_tensor()).unwrap();
        let values: Vec<f32> = grad.flatten_all().unwrap().to_vec1().unwrap();
        assert!(values.iter().all(|v| v.is_finite()));
        assert!(values.iter().any(|v| v.abs() > 0.0));
    }

    #[test]
    fn rejects_infeasible_alignment() {
        let log_probs = Tensor::zeros((2, 1, 3), DType::F32, &Device::Cpu).unwrap();
        let targets = Tensor::new(&[[1u32, 1]], &Device::Cpu).unwrap();
        let err = ctc_loss(&log_probs, &targets, &[2], &[2], 0).unwrap_err();
        assert!(matches!(
            err,
            CaptchaError::InfeasibleAlignment { required: 3, .. }
        ));
    }

    #[test]
    fn rejects_bad_lengths() {
        let log_probs = Tensor::zeros((4, 1, 3), DType::F32, &Device::Cpu).unwrap();
        let targets = Tensor::new(&[[1u32, 2]], &Device::Cpu).unwrap();
        assert!(matches!(
            ctc_loss(&log_probs, &targets, &[5], &[2], 0),
            Err(CaptchaError::ShapeMismatch(_))
        ));
        assert!(matches!(
            ctc_loss(&log_probs, &targets, &[4], &[0], 0),
            Err(CaptchaError::InvalidLength(_))
        ));
        assert!(matches!(
            ctc_loss(&log_probs, &targets, &[4, 4], &[2, 2], 0),
            Err(CaptchaError::ShapeMismatch(_))
        ));
    }
}
