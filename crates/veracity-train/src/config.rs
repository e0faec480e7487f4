//! Run configuration.

use std::path::PathBuf;

use candle_core::Device;
use serde::{Deserialize, Serialize};
use veracity_core::split::{TRAIN_RATIO, VAL_RATIO};
use veracity_core::{DatasetName, EdgeMask, FeatureKind, LoadOptions};
use veracity_nn::{ModelConfig, ModelKind};

use crate::error::{Error, Result};

/// Everything a run needs, fixed before training starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Seed for partitioning, shuffling and parameter init (default: 777).
    pub seed: u64,
    /// Comma-separated device list; the first is primary (default: "cpu").
    pub device: String,
    /// Directory holding `<dataset>/<feature>.npz` (default: "data").
    pub root: PathBuf,
    pub dataset: DatasetName,
    pub feature: FeatureKind,
    /// Graphs per step (default: 128).
    pub batch_size: usize,
    /// Adam learning rate (default: 0.001).
    pub lr: f64,
    /// L2 penalty added to the gradient (default: 0.01).
    pub weight_decay: f64,
    /// Hidden width (default: 128).
    pub nhid: usize,
    /// Dropout on the graph embedding (default: 0.0).
    pub dropout_ratio: f32,
    /// Epoch count (default: 80).
    pub epochs: usize,
    /// Concatenate the news-node embedding (default: true).
    pub concat: bool,
    /// Replace node features with a constant (default: false).
    pub no_feature: bool,
    /// Scatter each step over every listed device (default: false).
    pub multi_gpu: bool,
    pub model: ModelKind,
    pub edge_mask: EdgeMask,
    pub train_ratio: f64,
    pub val_ratio: f64,
    /// Stop after this many epochs without a lower validation loss.
    pub patience: Option<usize>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            seed: 777,
            device: "cpu".into(),
            root: PathBuf::from("data"),
            dataset: DatasetName::default(),
            feature: FeatureKind::default(),
            batch_size: 128,
            lr: 0.001,
            weight_decay: 0.01,
            nhid: 128,
            dropout_ratio: 0.0,
            epochs: 80,
            concat: true,
            no_feature: false,
            multi_gpu: false,
            model: ModelKind::default(),
            edge_mask: EdgeMask::default(),
            train_ratio: TRAIN_RATIO,
            val_ratio: VAL_RATIO,
            patience: None,
        }
    }
}

impl TrainConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_nhid(mut self, nhid: usize) -> Self {
        self.nhid = nhid;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_model(mut self, model: ModelKind) -> Self {
        self.model = model;
        self
    }

    pub fn with_concat(mut self, concat: bool) -> Self {
        self.concat = concat;
        self
    }

    pub fn with_edge_mask(mut self, edge_mask: EdgeMask) -> Self {
        self.edge_mask = edge_mask;
        self
    }

    pub fn with_patience(mut self, patience: Option<usize>) -> Self {
        self.patience = patience;
        self
    }

    /// Reject values no run could use.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".into()));
        }
        if self.nhid == 0 {
            return Err(Error::InvalidConfig("hidden width must be positive".into()));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(Error::InvalidConfig(format!("learning rate {} must be positive", self.lr)));
        }
        if self.weight_decay < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "weight decay {} must be non-negative",
                self.weight_decay
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_ratio) {
            return Err(Error::InvalidConfig(format!(
                "dropout ratio {} not in [0, 1)",
                self.dropout_ratio
            )));
        }
        if self.patience == Some(0) {
            return Err(Error::InvalidConfig("patience must be at least 1".into()));
        }
        Ok(())
    }

    /// Devices this run executes on, primary first.
    pub fn devices(&self) -> Result<Vec<Device>> {
        let devices = parse_devices(&self.device)?;
        if self.multi_gpu {
            Ok(devices)
        } else {
            Ok(devices.into_iter().take(1).collect())
        }
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            edge_mask: self.edge_mask,
            no_feature: self.no_feature,
            ..LoadOptions::default()
        }
    }

    pub fn model_config(&self, num_features: usize, num_classes: usize) -> ModelConfig {
        ModelConfig {
            num_features,
            nhid: self.nhid,
            num_classes,
            dropout_ratio: self.dropout_ratio,
            kind: self.model,
            concat: self.concat,
        }
    }
}

/// Parse `cpu`, `cuda[:N]` or `metal[:N]`, comma-separated.
pub fn parse_devices(list: &str) -> Result<Vec<Device>> {
    let devices = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_device)
        .collect::<Result<Vec<_>>>()?;
    if devices.is_empty() {
        return Err(Error::InvalidDevice(list.to_string()));
    }
    Ok(devices)
}

fn parse_device(name: &str) -> Result<Device> {
    let (kind, ordinal) = match name.split_once(':') {
        Some((kind, n)) => {
            let n = n
                .parse::<usize>()
                .map_err(|_| Error::InvalidDevice(name.to_string()))?;
            (kind, n)
        }
        None => (name, 0),
    };
    match kind.to_ascii_lowercase().as_str() {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Ok(Device::new_cuda(ordinal)?),
        "metal" | "mps" => Ok(Device::new_metal(ordinal)?),
        _ => Err(Error::InvalidDevice(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TrainConfig::default();
        assert_eq!(config.seed, 777);
        assert_eq!(config.batch_size, 128);
        assert_eq!(config.nhid, 128);
        assert_eq!(config.epochs, 80);
        assert!(config.concat);
        assert!(!config.multi_gpu);
        assert_eq!(config.model, ModelKind::Sage);
        assert_eq!(config.edge_mask, EdgeMask::SelfLoopsOnly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_cpu_list() -> Result<()> {
        let devices = parse_devices("cpu, cpu")?;
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(Device::is_cpu));
        Ok(())
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(matches!(parse_devices("tpu:0"), Err(Error::InvalidDevice(_))));
        assert!(matches!(parse_devices("cuda:x"), Err(Error::InvalidDevice(_))));
        assert!(matches!(parse_devices(""), Err(Error::InvalidDevice(_))));
    }

    #[test]
    fn test_single_device_unless_multi_gpu() -> Result<()> {
        let config = TrainConfig::default().with_device("cpu,cpu");
        assert_eq!(config.devices()?.len(), 1);
        let config = TrainConfig {
            multi_gpu: true,
            ..config
        };
        assert_eq!(config.devices()?.len(), 2);
        Ok(())
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(TrainConfig::default().with_batch_size(0).validate().is_err());
        assert!(TrainConfig::default().with_learning_rate(0.0).validate().is_err());
        assert!(TrainConfig::default().with_patience(Some(0)).validate().is_err());
    }

    #[test]
    fn test_config_round_trips_through_json() -> Result<()> {
        let config = TrainConfig::default().with_model(ModelKind::Gat).with_patience(Some(5));
        let json = serde_json::to_string(&config)?;
        assert!(json.contains("\"model\":\"gat\""));
        let back: TrainConfig = serde_json::from_str(&json)?;
        assert_eq!(back, config);
        Ok(())
    }
}
