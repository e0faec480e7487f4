//! # veracity-train
//!
//! Training and evaluation of graph classifiers for news veracity.
//!
//! - [`TrainConfig`]: every run parameter, fixed up front
//! - [`Trainer`]: partition, epoch loop, best-validation tracking, test pass
//! - [`eval_deep`]: accuracy, F1, precision, recall, AUC and AP
//! - [`Adam`]: Adam with L2 regularisation in the gradient
//!
//! ```rust,ignore
//! use veracity_core::FnnDataset;
//! use veracity_train::{TrainConfig, Trainer};
//!
//! let config = TrainConfig::default().with_epochs(10);
//! let dataset = FnnDataset::load(&config.root, config.dataset, config.feature, config.load_options())?;
//! let report = Trainer::new(config, &dataset)?.fit(|epoch| println!("{epoch}"))?;
//! println!("{}", report.test);
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod optim;
pub mod trainer;

pub use config::{parse_devices, TrainConfig};
pub use error::{Error, Result};
pub use metrics::{eval_deep, Metrics, OutLog};
pub use optim::{Adam, ParamsAdam};
pub use trainer::{BestLoss, EpochSummary, Split, TestSummary, TrainReport, Trainer};
