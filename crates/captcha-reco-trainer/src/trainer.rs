//! Training and validation loops for the captcha recognizer.

use std::sync::Arc;

use anyhow::Context;
use candle_core::{D, DType, Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use tracing::{info, warn};

use captcha_reco_core::{
    BLANK_INDEX, CaptchaError, CaptchaModel, ModelConfig, Result, Vocabulary, compute_accuracy,
    ctc_loss,
};

use crate::config::TrainConfig;
use crate::data::{Batch, BatchLoader, CaptchaDataset, DatasetConfig, FileImageSource};
use crate::metrics::{ExponentialAverage, RunningMean};

/// Loss and accuracy of a single batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

/// Aggregated metrics at the end of an epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub batches: usize,
    pub loss: f64,
    pub accuracy: f64,
}

fn check_batch_lengths(model: &CaptchaModel, batch: &Batch) -> Result<()> {
    for &len in &batch.input_lengths {
        model.check_input_length(len)?;
    }
    Ok(())
}

fn batch_loss(batch: &Batch, scores: &Tensor) -> Result<Tensor> {
    let log_probs = candle_nn::ops::log_softmax(scores, D::Minus1)?;
    ctc_loss(
        &log_probs,
        &batch.targets,
        &batch.input_lengths,
        &batch.target_lengths,
        BLANK_INDEX,
    )
}

/// Reads a scalar loss, rejecting NaN and infinities.
fn finite_loss(loss: &Tensor) -> Result<f32> {
    let value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
    if !value.is_finite() {
        warn!(loss = value, "non-finite loss, skipping update");
        return Err(CaptchaError::NumericDivergence { loss: value });
    }
    Ok(value)
}

/// One optimization step: forward in training mode, CTC loss, backward,
/// parameter update. A non-finite loss aborts before the update.
pub fn train_step<O: Optimizer>(
    model: &CaptchaModel,
    optimizer: &mut O,
    vocabulary: &Vocabulary,
    batch: &Batch,
) -> Result<StepMetrics> {
    check_batch_lengths(model, batch)?;

    let scores = model.forward_t(&batch.images, true)?;
    let loss = batch_loss(batch, &scores)?;
    let value = finite_loss(&loss)?;

    optimizer.backward_step(&loss)?;
    let accuracy = compute_accuracy(vocabulary, &batch.targets, &scores)?;

    Ok(StepMetrics {
        loss: f64::from(value),
        accuracy,
    })
}

/// Scores a batch in evaluation mode without touching the parameters.
pub fn eval_step(model: &CaptchaModel, vocabulary: &Vocabulary, batch: &Batch) -> Result<StepMetrics> {
    check_batch_lengths(model, batch)?;

    let scores = model.forward_t(&batch.images, false)?.detach();
    let loss = batch_loss(batch, &scores)?;
    let value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
    let accuracy = compute_accuracy(vocabulary, &batch.targets, &scores)?;

    Ok(StepMetrics {
        loss: f64::from(value),
        accuracy,
    })
}

/// Runs one pass over `batches`, updating the model after every batch.
/// Reported metrics are exponentially smoothed.
pub fn train_epoch<O, I>(
    model: &CaptchaModel,
    optimizer: &mut O,
    vocabulary: &Vocabulary,
    epoch: usize,
    batches: I,
) -> Result<EpochMetrics>
where
    O: Optimizer,
    I: IntoIterator<Item = Result<Batch>>,
{
    let mut loss_avg = ExponentialAverage::new();
    let mut acc_avg = ExponentialAverage::new();
    let mut count = 0;

    for (idx, batch) in batches.into_iter().enumerate() {
        let step = train_step(model, optimizer, vocabulary, &batch?)?;
        let loss = loss_avg.update(step.loss);
        let acc = acc_avg.update(step.accuracy);
        count += 1;

        info!(
            epoch,
            batch = idx + 1,
            loss = format_args!("{loss:.4}"),
            acc = format_args!("{acc:.4}"),
            "train"
        );
    }

    Ok(EpochMetrics {
        epoch,
        batches: count,
        loss: loss_avg.value(),
        accuracy: acc_avg.value(),
    })
}

/// Evaluates `batches` without updating the model. Reported metrics are
/// plain running means.
pub fn valid_epoch<I>(
    model: &CaptchaModel,
    vocabulary: &Vocabulary,
    epoch: usize,
    batches: I,
) -> Result<EpochMetrics>
where
    I: IntoIterator<Item = Result<Batch>>,
{
    let mut loss_mean = RunningMean::new();
    let mut acc_mean = RunningMean::new();

    for (idx, batch) in batches.into_iter().enumerate() {
        let step = eval_step(model, vocabulary, &batch?)?;
        let loss = loss_mean.update(step.loss);
        let acc = acc_mean.update(step.accuracy);

        info!(
            epoch,
            batch = idx + 1,
            loss = format_args!("{loss:.4}"),
            acc = format_args!("{acc:.4}"),
            "valid"
        );
    }

    Ok(EpochMetrics {
        epoch,
        batches: loss_mean.count(),
        loss: loss_mean.value(),
        accuracy: acc_mean.value(),
    })
}

/// Owns everything a training run mutates.
pub struct Trainer {
    config: TrainConfig,
    vocabulary: Vocabulary,
    varmap: VarMap,
    model: CaptchaModel,
    optimizer: AdamW,
}

impl Trainer {
    /// Builds the vocabulary, model and optimizer for `config` on `device`.
    pub fn new(config: TrainConfig, device: &Device) -> anyhow::Result<Self> {
        let vocabulary = Vocabulary::new(&config.alphabet).context("invalid alphabet")?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model_config = ModelConfig::new(vocabulary.len())
            .with_input_shape(config.input_shape())
            .with_hidden_size(config.hidden_size)
            .with_dropout(config.dropout);
        let model = CaptchaModel::new(&model_config, vb).context("failed to build model")?;
        model
            .check_input_length(config.input_length)
            .context("configured input_length does not fit the model")?;

        let params = ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let optimizer = AdamW::new(varmap.all_vars(), params)?;

        let num_params: usize = varmap.all_vars().iter().map(|v| v.elem_count()).sum();
        info!(
            params = num_params,
            timesteps = model.timesteps(),
            classes = vocabulary.len(),
            device = ?model.device(),
            "model ready\n{}",
            model.summary()
        );

        Ok(Self {
            config,
            vocabulary,
            varmap,
            model,
            optimizer,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn model(&self) -> &CaptchaModel {
        &self.model
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Trains on `train` and validates on `valid` for the configured number
    /// of epochs. Returns the metrics of every epoch as (train, valid).
    pub fn fit(
        &mut self,
        train: &CaptchaDataset,
        valid: &CaptchaDataset,
    ) -> anyhow::Result<Vec<(EpochMetrics, EpochMetrics)>> {
        for (split, dataset) in [("train", train), ("valid", valid)] {
            anyhow::ensure!(
                dataset.vocabulary() == &self.vocabulary,
                "{split} dataset uses vocabulary {} instead of {}",
                dataset.vocabulary(),
                self.vocabulary
            );
            self.model
                .check_input_length(dataset.config().input_length)
                .with_context(|| format!("{split} dataset does not fit the model"))?;
        }

        let train_loader = BatchLoader::new(train, self.config.batch_size).shuffle(self.config.seed);
        let valid_loader = BatchLoader::new(valid, self.config.batch_size);
        info!(
            train_batches = train_loader.num_batches(),
            valid_batches = valid_loader.num_batches(),
            epochs = self.config.epochs,
            "starting training"
        );

        let mut history = Vec::with_capacity(self.config.epochs);
        for epoch in 1..=self.config.epochs {
            let trained = train_epoch(
                &self.model,
                &mut self.optimizer,
                &self.vocabulary,
                epoch,
                train_loader.epoch(epoch),
            )
            .with_context(|| format!("training epoch {epoch} failed"))?;
            let validated = valid_epoch(&self.model, &self.vocabulary, epoch, valid_loader.epoch(epoch))
                .with_context(|| format!("validation epoch {epoch} failed"))?;

            info!(
                epoch,
                train_loss = format_args!("{:.4}", trained.loss),
                train_acc = format_args!("{:.4}", trained.accuracy),
                valid_loss = format_args!("{:.4}", validated.loss),
                valid_acc = format_args!("{:.4}", validated.accuracy),
                "epoch complete"
            );
            history.push((trained, validated));
        }

        Ok(history)
    }
}

/// Full run: model, optimizer and both datasets from `config`.
pub fn run_training(config: TrainConfig) -> anyhow::Result<()> {
    let device = Device::Cpu;
    let mut trainer = Trainer::new(config, &device)?;

    let config = trainer.config().clone();
    let source = Arc::new(FileImageSource);
    let train = CaptchaDataset::open(
        trainer.vocabulary(),
        DatasetConfig::train(&config),
        source.clone(),
        &device,
    )
    .with_context(|| format!("failed to open training data {}", config.train_dir.display()))?;
    let valid = CaptchaDataset::open(
        trainer.vocabulary(),
        DatasetConfig::valid(&config),
        source,
        &device,
    )
    .with_context(|| format!("failed to open validation data {}", config.valid_dir.display()))?;

    trainer.fit(&train, &valid)?;
    Ok(())
}
