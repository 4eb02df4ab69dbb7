use std::path::PathBuf;

use clap::Parser;
use captcha_reco_trainer::{TrainConfig, run_training};

#[derive(Parser, Debug)]
#[command(name = "train")]
#[command(about = "Train the captcha recognizer with CTC loss")]
struct Cli {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of training images named `<LABEL>.<ext>`
    #[arg(long)]
    train_dir: Option<PathBuf>,

    /// Directory of validation images
    #[arg(long)]
    valid_dir: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Seed for the training sample order
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<TrainConfig> {
        let mut config = match &self.config {
            Some(path) => TrainConfig::from_json_file(path)?,
            None => TrainConfig::new(),
        };
        if let Some(dir) = self.train_dir {
            config = config.with_train_dir(dir);
        }
        if let Some(dir) = self.valid_dir {
            config = config.with_valid_dir(dir);
        }
        if let Some(epochs) = self.epochs {
            config = config.with_epochs(epochs);
        }
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(lr) = self.learning_rate {
            config = config.with_learning_rate(lr);
        }
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        Ok(config)
    }
}

fn main() {
    tracing_subscriber::fmt::init();

    let result = Cli::parse().into_config().and_then(run_training);
    if let Err(e) = result {
        eprintln!("Training failed: {:#}", e);
        std::process::exit(1);
    }
}
