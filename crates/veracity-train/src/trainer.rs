//! Epoch loop for graph classifiers.
//!
//! ```text
//! idle ─▶ train pass ─▶ validation pass ─▶ (next epoch | stop) ─▶ test pass
//! ```
//!
//! Each training step clears gradients, runs the forward pass, computes the
//! negative log-likelihood against the graph labels, backpropagates and
//! applies one optimizer step. Losses are summed over the batches of a pass.

use std::fmt;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{loss, Optimizer, VarBuilder, VarMap};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{debug, info};
use veracity_core::{
    random_split, Batch, BatchLoader, FnnDataset, LoaderItem, LoaderMode, Partition, SplitSizes,
};
use veracity_nn::{seed_parameters, DataParallel, GnnClassifier};

use crate::config::TrainConfig;
use crate::error::{Error, Result};
use crate::metrics::{eval_deep, Metrics, OutLog};
use crate::optim::{Adam, ParamsAdam};

/// Metrics for one epoch.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub loss_train: f64,
    pub train: Metrics,
    pub loss_val: f64,
    pub val: Metrics,
}

impl fmt::Display for EpochSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss_train: {:.4}, acc_train: {:.4}, recall_train: {:.4}, auc_train: {:.4}, \
             loss_val: {:.4}, acc_val: {:.4}, recall_val: {:.4}, auc_val: {:.4}",
            self.loss_train,
            self.train.accuracy,
            self.train.recall,
            self.train.auc,
            self.loss_val,
            self.val.accuracy,
            self.val.recall,
            self.val.auc,
        )
    }
}

/// Held-out test results.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TestSummary {
    pub loss: f64,
    pub metrics: Metrics,
}

impl fmt::Display for TestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test set results: {}", self.metrics)
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub config: TrainConfig,
    pub train_graphs: usize,
    pub val_graphs: usize,
    pub test_graphs: usize,
    pub epochs: Vec<EpochSummary>,
    /// Epoch with the lowest validation loss, if any validation ran.
    pub best_epoch: Option<usize>,
    pub min_val_loss: Option<f64>,
    pub stopped_early: bool,
    pub test: TestSummary,
}

impl TrainReport {
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

/// Which subset to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
    Test,
}

enum Executor {
    Single(Device),
    Parallel(DataParallel),
}

impl Executor {
    fn primary(&self) -> &Device {
        match self {
            Self::Single(device) => device,
            Self::Parallel(dp) => dp.primary(),
        }
    }
}

/// Owns the model, its parameters, the optimizer and the data split.
pub struct Trainer {
    config: TrainConfig,
    varmap: VarMap,
    model: GnnClassifier,
    optimizer: Adam,
    executor: Executor,
    rng: ChaCha8Rng,
    partition: Partition,
    train_loader: BatchLoader,
    val_loader: BatchLoader,
    test_loader: BatchLoader,
}

impl Trainer {
    /// Partition `dataset`, build the model and seed its parameters.
    pub fn new(config: TrainConfig, dataset: &FnnDataset) -> Result<Self> {
        config.validate()?;
        if dataset.is_empty() {
            return Err(Error::InvalidConfig("dataset has no graphs".into()));
        }

        let devices = config.devices()?;
        let executor = if config.multi_gpu {
            Executor::Parallel(DataParallel::new(devices)?)
        } else {
            let device = devices
                .into_iter()
                .next()
                .ok_or_else(|| Error::InvalidDevice(config.device.clone()))?;
            Executor::Single(device)
        };
        let device = executor.primary().clone();

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let sizes = SplitSizes::new(dataset.len(), config.train_ratio, config.val_ratio)?;
        let partition = random_split(sizes, &mut rng);
        info!(
            train = sizes.train,
            val = sizes.val,
            test = sizes.test,
            "partitioned dataset"
        );

        let mode = if config.multi_gpu {
            LoaderMode::List
        } else {
            LoaderMode::Merged
        };
        let loader = |indices: &[usize], shuffle: bool| {
            BatchLoader::new(
                dataset.select(indices),
                config.batch_size,
                shuffle,
                mode,
                device.clone(),
            )
        };
        let train_loader = loader(&partition.train, true)?;
        let val_loader = loader(&partition.val, false)?;
        let test_loader = loader(&partition.test, false)?;

        let num_classes = dataset.num_classes().max(2);
        let model_config = config.model_config(dataset.num_features(), num_classes);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = GnnClassifier::new(model_config, vb)?;
        seed_parameters(&varmap, config.seed)?;

        let optimizer = Adam::new(
            varmap.all_vars(),
            ParamsAdam {
                lr: config.lr,
                weight_decay: config.weight_decay,
                ..ParamsAdam::default()
            },
        )?;

        info!(
            model = %config.model,
            nhid = config.nhid,
            concat = config.concat,
            features = dataset.num_features(),
            classes = num_classes,
            parameters = parameter_count(&varmap),
            "model ready"
        );

        Ok(Self {
            config,
            varmap,
            model,
            optimizer,
            executor,
            rng,
            partition,
            train_loader,
            val_loader,
            test_loader,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn model(&self) -> &GnnClassifier {
        &self.model
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn device(&self) -> &Device {
        self.executor.primary()
    }

    /// Restore parameters written by [`Trainer::save_checkpoint`].
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.varmap.load(path)?;
        info!(path = %path.display(), "loaded checkpoint");
        Ok(())
    }

    /// Write every parameter to a safetensors file.
    pub fn save_checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.varmap.save(path)?;
        info!(path = %path.display(), "saved checkpoint");
        Ok(())
    }

    fn forward(&self, item: &LoaderItem, train: bool) -> Result<Tensor> {
        let out = match (item, &self.executor) {
            (LoaderItem::Merged(batch), _) => self.model.forward_t(batch, train)?,
            (LoaderItem::List(graphs), Executor::Parallel(dp)) => {
                dp.forward_t(&self.model, &self.varmap, graphs, train)?
            }
            (LoaderItem::List(graphs), Executor::Single(device)) => {
                self.model.forward_t(&Batch::collate(graphs, device)?, train)?
            }
        };
        Ok(out)
    }

    /// One optimisation pass over the training subset.
    pub fn train_epoch(&mut self) -> Result<(f64, Metrics)> {
        let mut out_log = OutLog::new();
        let mut loss_train = 0.0;

        for item in self.train_loader.epoch(&mut self.rng) {
            let item = item?;
            let y = item.labels(self.executor.primary())?;
            let out = self.forward(&item, true)?;
            let loss = loss::nll(&out, &y)?;
            self.optimizer.backward_step(&loss)?;

            loss_train += loss.to_dtype(DType::F64)?.to_scalar::<f64>()?;
            out_log.push(&out.detach().exp()?, &y)?;
        }
        Ok((loss_train, eval_deep(&out_log)))
    }

    /// Gradient-free pass over one subset in stored order: metrics and
    /// summed loss. Leaves the run RNG untouched.
    pub fn evaluate(&self, split: Split) -> Result<(Metrics, f64)> {
        let loader = match split {
            Split::Train => &self.train_loader,
            Split::Val => &self.val_loader,
            Split::Test => &self.test_loader,
        };

        let mut out_log = OutLog::new();
        let mut total = 0.0;
        for item in loader.in_order() {
            let item = item?;
            let y = item.labels(self.executor.primary())?;
            let out = self.forward(&item, false)?.detach();
            let probs = out.exp()?;
            if tracing::enabled!(tracing::Level::DEBUG) {
                debug!(?split, probs = ?probs.to_vec2::<f32>()?, "batch probabilities");
            }
            out_log.push(&probs, &y)?;
            total += loss::nll(&out, &y)?.to_dtype(DType::F64)?.to_scalar::<f64>()?;
        }
        Ok((eval_deep(&out_log), total))
    }

    /// Run every epoch (or until patience runs out), then the test pass.
    pub fn fit<F>(&mut self, mut on_epoch: F) -> Result<TrainReport>
    where
        F: FnMut(&EpochSummary),
    {
        let mut epochs = Vec::with_capacity(self.config.epochs);
        let mut best = BestLoss::new(self.config.patience);
        let mut stopped_early = false;
        let has_val = !self.val_loader.is_empty();

        for epoch in 0..self.config.epochs {
            let (loss_train, train) = self.train_epoch()?;
            let (val, loss_val) = self.evaluate(Split::Val)?;
            let summary = EpochSummary {
                epoch,
                loss_train,
                train,
                loss_val,
                val,
            };
            debug!(epoch, loss_train, loss_val, "epoch done");
            on_epoch(&summary);
            epochs.push(summary);

            if has_val && best.observe(epoch, loss_val) {
                info!(epoch, best_epoch = ?best.epoch(), "early stopping");
                stopped_early = true;
                break;
            }
        }

        let (metrics, loss) = self.evaluate(Split::Test)?;
        let sizes = self.partition.sizes();
        Ok(TrainReport {
            config: self.config.clone(),
            train_graphs: sizes.train,
            val_graphs: sizes.val,
            test_graphs: sizes.test,
            epochs,
            best_epoch: best.epoch(),
            min_val_loss: best.loss(),
            stopped_early,
            test: TestSummary { loss, metrics },
        })
    }
}

/// Lowest validation loss seen so far, with optional patience.
#[derive(Debug, Clone, Copy)]
pub struct BestLoss {
    best: Option<(usize, f64)>,
    patience: Option<usize>,
}

impl BestLoss {
    pub fn new(patience: Option<usize>) -> Self {
        Self {
            best: None,
            patience,
        }
    }

    /// Record `loss` for `epoch`; true once patience has run out.
    pub fn observe(&mut self, epoch: usize, loss: f64) -> bool {
        let improved = loss.is_finite() && self.best.map_or(true, |(_, min)| loss < min);
        if improved {
            self.best = Some((epoch, loss));
        }
        match (self.patience, self.best) {
            (Some(patience), Some((best_epoch, _))) => epoch - best_epoch >= patience,
            _ => false,
        }
    }

    pub fn epoch(&self) -> Option<usize> {
        self.best.map(|(e, _)| e)
    }

    pub fn loss(&self) -> Option<f64> {
        self.best.map(|(_, l)| l)
    }
}

fn parameter_count(varmap: &VarMap) -> usize {
    varmap.all_vars().iter().map(|v| v.elem_count()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use veracity_core::{EdgeIndex, GraphRecord};
    use veracity_nn::ModelKind;

    /// Label-separable toy corpus: fake news graphs carry larger features.
    fn corpus(n: usize) -> Result<FnnDataset> {
        let graphs = (0..n)
            .map(|i| -> Result<GraphRecord> {
                let y = (i % 2) as u32;
                let nodes = 2 + i % 3;
                let x = (Tensor::ones((nodes, 4), DType::F32, &Device::Cpu)? * (y as f64 * 2.0 - 1.0))?;
                let edges = EdgeIndex::from_pairs((1..nodes as u32).map(|k| (0, k)));
                Ok(GraphRecord::new(x, edges, y, i)?)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(FnnDataset::from_graphs(graphs, 2)?)
    }

    fn config() -> TrainConfig {
        TrainConfig::default()
            .with_nhid(8)
            .with_batch_size(4)
            .with_epochs(3)
            .with_learning_rate(0.01)
    }

    #[test]
    fn test_fit_runs_every_epoch() -> Result<()> {
        let dataset = corpus(40)?;
        let mut trainer = Trainer::new(config(), &dataset)?;
        let mut seen = Vec::new();
        let report = trainer.fit(|s| seen.push(s.epoch))?;

        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(report.epochs.len(), 3);
        assert_eq!(
            (report.train_graphs, report.val_graphs, report.test_graphs),
            (8, 4, 28)
        );
        assert!(!report.stopped_early);
        assert!(report.best_epoch.is_some());
        assert!(report.test.loss.is_finite());
        Ok(())
    }

    #[test]
    fn test_same_seed_same_report() -> Result<()> {
        let dataset = corpus(30)?;
        let a = Trainer::new(config(), &dataset)?.fit(|_| {})?;
        let b = Trainer::new(config(), &dataset)?.fit(|_| {})?;
        assert_eq!(a.test.loss, b.test.loss);
        assert_eq!(a.epochs[2].loss_train, b.epochs[2].loss_train);
        Ok(())
    }

    #[test]
    fn test_learns_separable_corpus() -> Result<()> {
        let dataset = corpus(60)?;
        for kind in [ModelKind::Gcn, ModelKind::Sage, ModelKind::Gat] {
            let mut trainer = Trainer::new(config().with_model(kind).with_epochs(30), &dataset)?;
            let report = trainer.fit(|_| {})?;
            assert!(
                report.test.metrics.accuracy >= 0.8,
                "{kind}: accuracy {}",
                report.test.metrics.accuracy
            );
        }
        Ok(())
    }

    #[test]
    fn test_best_loss_tracks_minimum_and_patience() {
        let mut best = BestLoss::new(Some(2));
        assert!(!best.observe(0, 1.0));
        assert!(!best.observe(1, 0.5));
        assert!(!best.observe(2, 0.7));
        assert!(best.observe(3, 0.5));
        assert_eq!(best.epoch(), Some(1));
        assert_eq!(best.loss(), Some(0.5));
    }

    #[test]
    fn test_best_loss_without_patience_never_stops() {
        let mut best = BestLoss::new(None);
        for epoch in 0..10 {
            assert!(!best.observe(epoch, 1.0 + epoch as f64));
        }
        assert_eq!(best.epoch(), Some(0));
        assert!(!best.observe(10, f64::NAN));
    }

    #[test]
    fn test_multi_device_list_mode_matches_shapes() -> Result<()> {
        let dataset = corpus(20)?;
        let config = TrainConfig {
            multi_gpu: true,
            ..config().with_device("cpu,cpu")
        };
        let report = Trainer::new(config, &dataset)?.fit(|_| {})?;
        assert_eq!(report.epochs.len(), 3);
        assert!(report.test.loss.is_finite());
        Ok(())
    }

    #[test]
    fn test_evaluating_train_split_keeps_shuffle_stream() -> Result<()> {
        let dataset = corpus(30)?;
        let plain = Trainer::new(config(), &dataset)?.fit(|_| {})?;

        let mut trainer = Trainer::new(config(), &dataset)?;
        let (_, first) = trainer.evaluate(Split::Train)?;
        let (_, second) = trainer.evaluate(Split::Train)?;
        assert_eq!(first, second);
        let report = trainer.fit(|_| {})?;

        let losses = |r: &TrainReport| r.epochs.iter().map(|e| e.loss_train).collect::<Vec<_>>();
        assert_eq!(losses(&plain), losses(&report));
        assert_eq!(plain.test.loss, report.test.loss);
        Ok(())
    }

    #[test]
    fn test_checkpoint_round_trip() -> Result<()> {
        let dataset = corpus(20)?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("model.safetensors");

        let mut trained = Trainer::new(config(), &dataset)?;
        trained.fit(|_| {})?;
        trained.save_checkpoint(&path)?;
        let (_, expected) = trained.evaluate(Split::Test)?;

        let mut restored = Trainer::new(config(), &dataset)?;
        restored.load_checkpoint(&path)?;
        let (_, got) = restored.evaluate(Split::Test)?;
        assert!((expected - got).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_epoch_line_format() {
        let m = Metrics {
            accuracy: 0.5,
            f1_macro: 0.5,
            f1_micro: 0.5,
            precision: 0.25,
            recall: 1.0,
            auc: 0.75,
            ap: 0.6,
        };
        let summary = EpochSummary {
            epoch: 0,
            loss_train: 1.23456,
            train: m,
            loss_val: 0.5,
            val: m,
        };
        assert_eq!(
            summary.to_string(),
            "loss_train: 1.2346, acc_train: 0.5000, recall_train: 1.0000, auc_train: 0.7500, \
             loss_val: 0.5000, acc_val: 0.5000, recall_val: 1.0000, auc_val: 0.7500"
        );
        let test = TestSummary { loss: 0.1, metrics: m };
        assert_eq!(
            test.to_string(),
            "Test set results: acc: 0.5000, f1_macro: 0.5000, f1_micro: 0.5000, \
             precision: 0.2500, recall: 1.0000, auc: 0.7500, ap: 0.6000"
        );
    }
}
