//! # veracity-nn
//!
//! Message-passing layers and the graph classifier used for news veracity
//! detection, built on candle.
//!
//! ## Layers
//!
//! | Layer | Aggregation |
//! |-------|-------------|
//! | [`GCNConv`] | Symmetric-normalised sum over neighbours and self |
//! | [`SAGEConv`] | Mean of in-neighbours plus a self projection |
//! | [`GATConv`] | Attention-weighted sum over in-neighbours and self |
//!
//! ## Example
//!
//! ```rust,ignore
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//! use veracity_nn::{GnnClassifier, ModelConfig, ModelKind};
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let model = GnnClassifier::new(config, vb)?;
//! let log_probs = model.forward(&batch)?;
//! ```

pub mod conv;
pub mod error;
pub mod init;
pub mod model;
pub mod parallel;
pub mod pool;

pub use conv::{Aggregator, GATConv, GCNConv, SAGEConv};
pub use error::{Error, Result};
pub use init::seed_parameters;
pub use model::{GnnClassifier, GraphConv, ModelConfig, ModelKind};
pub use parallel::DataParallel;
pub use pool::global_max_pool;
