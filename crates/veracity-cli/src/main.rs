//! Veracity CLI - train and evaluate a fake-news graph classifier.
//!
//! # Usage
//!
//! ```bash
//! # GraphSAGE on politifact/bert.npz under ./data
//! veracity --dataset politifact --feature bert --model sage
//!
//! # GAT without the news-node embedding, keeping every propagation edge
//! veracity --model gat --concat false --edge-mask keep-all --epochs 35
//!
//! # Save the trained parameters and a JSON report
//! veracity --save-model model.safetensors --report report.json
//! ```
//!
//! Per-epoch metrics and the final `Test set results:` line go to stdout;
//! logs go to stderr and are filtered with `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use veracity_core::{DatasetName, EdgeMask, FeatureKind, FnnDataset};
use veracity_nn::ModelKind;
use veracity_train::{TrainConfig, Trainer};

#[derive(Parser)]
#[command(name = "veracity")]
#[command(about = "Graph neural network fake-news detection", long_about = None)]
struct Cli {
    /// Random seed
    #[arg(long, default_value_t = 777)]
    seed: u64,

    /// Device list, e.g. cpu, cuda:0 or cuda:0,cuda:1 (first is primary)
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Directory holding <dataset>/<feature>.npz
    #[arg(long, default_value = "data")]
    root: PathBuf,

    /// News corpus
    #[arg(long, value_enum, default_value_t = DatasetName::Politifact)]
    dataset: DatasetName,

    /// Graphs per batch
    #[arg(long, default_value_t = 128)]
    batch_size: usize,

    /// Learning rate
    #[arg(long, default_value_t = 0.001)]
    lr: f64,

    /// L2 weight decay
    #[arg(long, default_value_t = 0.01)]
    weight_decay: f64,

    /// Hidden width
    #[arg(long, default_value_t = 128)]
    nhid: usize,

    /// Dropout ratio on the graph embedding
    #[arg(long, default_value_t = 0.0)]
    dropout_ratio: f32,

    /// Maximum number of epochs
    #[arg(long, default_value_t = 80)]
    epochs: usize,

    /// Concatenate the news-node embedding
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    concat: bool,

    /// Replace all node features with a constant
    #[arg(long)]
    no_feature: bool,

    /// Scatter each batch over every device in --device
    #[arg(long)]
    multi_gpu: bool,

    /// Node feature encoding
    #[arg(long, value_enum, default_value_t = FeatureKind::Bert)]
    feature: FeatureKind,

    /// Convolution layer
    #[arg(long, value_enum, default_value_t = ModelKind::Sage)]
    model: ModelKind,

    /// Edge filter applied when splitting the corpus
    #[arg(long, value_enum, default_value_t = EdgeMask::SelfLoopsOnly)]
    edge_mask: EdgeMask,

    /// Stop after this many epochs without a lower validation loss
    #[arg(long)]
    patience: Option<usize>,

    /// Restore parameters from a safetensors file before training
    #[arg(long)]
    load_model: Option<PathBuf>,

    /// Write parameters to a safetensors file after training
    #[arg(long)]
    save_model: Option<PathBuf>,

    /// Write a JSON report of the run
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> TrainConfig {
        TrainConfig {
            seed: self.seed,
            device: self.device.clone(),
            root: self.root.clone(),
            dataset: self.dataset,
            feature: self.feature,
            batch_size: self.batch_size,
            lr: self.lr,
            weight_decay: self.weight_decay,
            nhid: self.nhid,
            dropout_ratio: self.dropout_ratio,
            epochs: self.epochs,
            concat: self.concat,
            no_feature: self.no_feature,
            multi_gpu: self.multi_gpu,
            model: self.model,
            edge_mask: self.edge_mask,
            patience: self.patience,
            ..TrainConfig::default()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = cli.config();
    config.validate().context("invalid arguments")?;
    info!(config = %serde_json::to_string(&config)?, "starting run");

    let dataset = FnnDataset::load(&config.root, config.dataset, config.feature, config.load_options())
        .with_context(|| {
            format!(
                "failed to load {}/{} from {}",
                config.dataset,
                config.feature,
                config.root.display()
            )
        })?;

    let epochs = config.epochs as u64;
    let mut trainer = Trainer::new(config, &dataset).context("failed to build trainer")?;
    if let Some(path) = &cli.load_model {
        trainer
            .load_checkpoint(path)
            .with_context(|| format!("failed to load model from {}", path.display()))?;
    }

    let pb = ProgressBar::new(epochs);
    pb.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} epochs [{elapsed_precise}]")
            .context("invalid progress template")?,
    );
    let report = trainer.fit(|summary| {
        pb.suspend(|| println!("{summary}"));
        pb.inc(1);
    })?;
    pb.finish_and_clear();

    if let Some(best) = report.best_epoch {
        info!(best_epoch = best, min_val_loss = ?report.min_val_loss, "validation summary");
    }
    println!("{}", report.test);

    if let Some(path) = &cli.save_model {
        trainer
            .save_checkpoint(path)
            .with_context(|| format!("failed to save model to {}", path.display()))?;
    }
    if let Some(path) = &cli.report {
        report
            .save_json(path)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
    }
    Ok(())
}
