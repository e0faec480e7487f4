//! Graph classifier: one convolution, max readout, optional news embedding.
//!
//! ```text
//! x ──conv──relu──max-pool──┐
//!                           ├─ concat ─ dropout ─ lin1 ─ log_softmax
//! x[first node] ─lin0─relu──┘   (concat mode only)
//! ```
//!
//! The first node of every propagation graph is the news item itself, so in
//! concat mode its raw features are projected separately and appended to the
//! pooled user embedding.

use std::fmt;

use candle_core::{Tensor, D};
use candle_nn::{linear, ops, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use veracity_core::{Batch, EdgeIndex};

use crate::conv::{Aggregator, GATConv, GCNConv, SAGEConv};
use crate::error::{Error, Result};
use crate::pool::global_max_pool;

/// The closed set of convolution variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Spectral-style graph convolution.
    Gcn,
    /// Neighborhood-sampling style (GraphSAGE).
    #[default]
    Sage,
    /// Attention-weighted aggregation.
    Gat,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gcn => "gcn",
            Self::Sage => "sage",
            Self::Gat => "gat",
        })
    }
}

/// One convolution layer of any supported kind.
pub enum GraphConv {
    Gcn(GCNConv),
    Sage(SAGEConv),
    Gat(GATConv),
}

impl GraphConv {
    /// Build the layer for `kind`.
    pub fn new(kind: ModelKind, in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        Ok(match kind {
            ModelKind::Gcn => Self::Gcn(GCNConv::new(in_features, out_features, true, vb)?),
            ModelKind::Sage => Self::Sage(SAGEConv::new(
                in_features,
                out_features,
                Aggregator::Mean,
                false,
                vb,
            )?),
            ModelKind::Gat => Self::Gat(GATConv::new(in_features, out_features, 1, 0.2, vb)?),
        })
    }

    pub fn forward(&self, x: &Tensor, edge_index: &EdgeIndex) -> candle_core::Result<Tensor> {
        match self {
            Self::Gcn(conv) => conv.forward(x, edge_index),
            Self::Sage(conv) => conv.forward(x, edge_index),
            Self::Gat(conv) => conv.forward(x, edge_index),
        }
    }
}

/// Shape and behaviour of a [`GnnClassifier`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub num_features: usize,
    pub nhid: usize,
    pub num_classes: usize,
    /// Dropout on the graph embedding, training only.
    pub dropout_ratio: f32,
    pub kind: ModelKind,
    /// Append the projected news-node features to the pooled embedding.
    pub concat: bool,
}

impl ModelConfig {
    /// Width of the embedding fed to the classification layer.
    pub fn embedding_dim(&self) -> usize {
        if self.concat {
            self.nhid * 2
        } else {
            self.nhid
        }
    }
}

/// Graph-level classifier producing log-probabilities.
pub struct GnnClassifier {
    conv: GraphConv,
    lin0: Option<Linear>,
    lin1: Linear,
    config: ModelConfig,
}

impl GnnClassifier {
    pub fn new(config: ModelConfig, vb: VarBuilder) -> Result<Self> {
        if config.num_features == 0 || config.nhid == 0 || config.num_classes == 0 {
            return Err(Error::InvalidConfig(format!(
                "features ({}), hidden ({}) and classes ({}) must all be positive",
                config.num_features, config.nhid, config.num_classes
            )));
        }
        if !(0.0..1.0).contains(&config.dropout_ratio) {
            return Err(Error::InvalidConfig(format!(
                "dropout ratio {} not in [0, 1)",
                config.dropout_ratio
            )));
        }

        let conv = GraphConv::new(config.kind, config.num_features, config.nhid, vb.pp("conv1"))?;
        let lin0 = if config.concat {
            Some(linear(config.num_features, config.nhid, vb.pp("lin0"))?)
        } else {
            None
        };
        let lin1 = linear(config.embedding_dim(), config.num_classes, vb.pp("lin1"))?;

        Ok(Self {
            conv,
            lin0,
            lin1,
            config,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Graph embeddings fed to the classification layer.
    ///
    /// # Returns
    /// - (num_graphs x nhid), or (num_graphs x 2 * nhid) in concat mode
    pub fn embed(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let (_, features) = batch.x.dims2()?;
        if features != self.config.num_features {
            return Err(Error::DimensionMismatch {
                expected: self.config.num_features,
                got: features,
            });
        }

        let h = self.conv.forward(&batch.x, &batch.edge_index)?.relu()?;
        let mut h = global_max_pool(&h, &batch.ptr)?;

        if let Some(lin0) = &self.lin0 {
            let first = batch.first_nodes();
            let first = Tensor::from_vec(first, batch.num_graphs(), batch.x.device())?;
            let news = lin0.forward(&batch.x.index_select(&first, 0)?)?.relu()?;
            h = Tensor::cat(&[&h, &news], 1)?;
        }

        if train && self.config.dropout_ratio > 0.0 {
            h = ops::dropout(&h, self.config.dropout_ratio)?;
        }
        Ok(h)
    }

    /// Log-probabilities per graph (num_graphs x num_classes).
    pub fn forward_t(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let h = self.embed(batch, train)?;
        Ok(ops::log_softmax(&self.lin1.forward(&h)?, D::Minus1)?)
    }

    /// Inference-mode forward pass.
    pub fn forward(&self, batch: &Batch) -> Result<Tensor> {
        self.forward_t(batch, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use veracity_core::GraphRecord;

    fn config(kind: ModelKind, concat: bool) -> ModelConfig {
        ModelConfig {
            num_features: 8,
            nhid: 16,
            num_classes: 2,
            dropout_ratio: 0.0,
            kind,
            concat,
        }
    }

    /// Two graphs with 3 and 4 nodes, 8 features each.
    fn two_graphs() -> Result<Batch> {
        let device = Device::Cpu;
        let a = GraphRecord::new(
            Tensor::randn(0f32, 1f32, (3, 8), &device)?,
            EdgeIndex::from_pairs([(0, 1), (1, 2), (2, 2)]),
            0,
            0,
        )?;
        let b = GraphRecord::new(
            Tensor::randn(0f32, 1f32, (4, 8), &device)?,
            EdgeIndex::from_pairs([(0, 3), (3, 0)]),
            1,
            1,
        )?;
        Ok(Batch::collate(&[a, b], &device)?)
    }

    fn model(cfg: ModelConfig) -> Result<(VarMap, GnnClassifier)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let model = GnnClassifier::new(cfg, vb)?;
        Ok((varmap, model))
    }

    #[test]
    fn test_output_shape_and_normalisation_all_kinds() -> Result<()> {
        let batch = two_graphs()?;
        for kind in [ModelKind::Gcn, ModelKind::Sage, ModelKind::Gat] {
            for concat in [false, true] {
                let (_vm, model) = model(config(kind, concat))?;
                let out = model.forward(&batch)?;
                assert_eq!(out.dims(), &[2, 2], "{kind} concat={concat}");

                for row in out.exp()?.to_vec2::<f32>()? {
                    let total: f32 = row.iter().sum();
                    assert!((total - 1.0).abs() < 1e-6, "{kind}: row sums to {total}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_concat_doubles_embedding_width() -> Result<()> {
        let batch = two_graphs()?;
        let (_a, plain) = model(config(ModelKind::Sage, false))?;
        let (_b, concat) = model(config(ModelKind::Sage, true))?;

        assert_eq!(plain.embed(&batch, false)?.dims(), &[2, 16]);
        assert_eq!(concat.embed(&batch, false)?.dims(), &[2, 32]);
        assert_eq!(plain.forward(&batch)?.dims(), concat.forward(&batch)?.dims());
        Ok(())
    }

    #[test]
    fn test_feature_width_mismatch_is_reported() -> Result<()> {
        let batch = two_graphs()?;
        let mut cfg = config(ModelKind::Gcn, false);
        cfg.num_features = 5;
        let (_vm, model) = model(cfg)?;
        assert!(matches!(
            model.forward(&batch),
            Err(Error::DimensionMismatch { expected: 5, got: 8 })
        ));
        Ok(())
    }

    #[test]
    fn test_dropout_only_in_training_mode() -> Result<()> {
        let batch = two_graphs()?;
        let mut cfg = config(ModelKind::Sage, true);
        cfg.dropout_ratio = 0.5;
        let (_vm, model) = model(cfg)?;

        let eval_a = model.embed(&batch, false)?.to_vec2::<f32>()?;
        let eval_b = model.embed(&batch, false)?.to_vec2::<f32>()?;
        assert_eq!(eval_a, eval_b);

        // Surviving entries are rescaled by 1 / (1 - p), so a train pass never
        // reproduces a non-zero eval embedding.
        assert!(eval_a.iter().flatten().any(|&v| v > 0.0));
        let train = model.embed(&batch, true)?.to_vec2::<f32>()?;
        assert_ne!(train, eval_a);
        Ok(())
    }

    #[test]
    fn test_invalid_dropout_rejected() {
        let mut cfg = config(ModelKind::Gat, true);
        cfg.dropout_ratio = 1.0;
        assert!(matches!(model(cfg), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_gradients_reach_every_parameter() -> Result<()> {
        let batch = two_graphs()?;
        for kind in [ModelKind::Gcn, ModelKind::Sage, ModelKind::Gat] {
            let (varmap, model) = model(config(kind, true))?;
            let out = model.forward_t(&batch, true)?;
            let loss = candle_nn::loss::nll(&out, &batch.y)?;
            let grads = loss.backward()?;
            for var in varmap.all_vars() {
                assert!(grads.get(&var).is_some(), "{kind}: missing gradient");
            }
        }
        Ok(())
    }
}
