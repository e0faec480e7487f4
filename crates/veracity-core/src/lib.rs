//! Data layer for fake-news propagation-graph classification.
//!
//! `veracity-core` turns a collated corpus into immutable graph records and
//! feeds them to a model in mini-batches. It sits below the layer crate
//! (`veracity-nn`) and the training loop (`veracity-train`).
//!
//! # Modules
//!
//! - [`graph`]: graph records, edge lists and the load-time edge mask
//! - [`dataset`]: `.npz` corpora and the graph splitter
//! - [`split`]: random train/validation/test partitioning
//! - [`batch`]: disjoint-union batches and the batch loader
//!
//! # Example
//!
//! ```rust,ignore
//! use veracity_core::{BatchLoader, DatasetName, FeatureKind, FnnDataset, LoaderMode, LoadOptions};
//! use veracity_core::split::{random_split, SplitSizes, TRAIN_RATIO, VAL_RATIO};
//!
//! let ds = FnnDataset::load("data", DatasetName::Politifact, FeatureKind::Bert, LoadOptions::default())?;
//! let sizes = SplitSizes::new(ds.len(), TRAIN_RATIO, VAL_RATIO)?;
//! let parts = random_split(sizes, &mut rng);
//! let train = BatchLoader::new(ds.select(&parts.train), 128, true, LoaderMode::Merged, device)?;
//! for batch in train.epoch(&mut rng) {
//!     let batch = batch?;
//!     // forward / backward
//! }
//! ```

pub mod batch;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod split;

pub use batch::{Batch, BatchLoader, LoaderItem, LoaderMode};
pub use dataset::{split_graphs, DatasetName, FeatureKind, FnnDataset, LoadOptions, RawDataset};
pub use error::{Error, Result};
pub use graph::{EdgeIndex, EdgeMask, GraphRecord};
pub use split::{random_split, Partition, SplitSizes};
