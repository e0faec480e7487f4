//! Error types for veracity-core.

use thiserror::Error;

/// Dataset and batching error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Required array missing from a dataset archive.
    #[error("dataset archive is missing array `{0}`")]
    MissingArray(String),

    /// Slice boundaries are not a monotone cover of the concatenated store.
    #[error("invalid {kind} slices: {reason}")]
    InvalidSlices { kind: &'static str, reason: String },

    /// An edge references a node outside its graph.
    #[error("graph {graph}: edge ({src}, {dst}) out of range for {num_nodes} nodes")]
    EdgeOutOfRange {
        graph: usize,
        src: u32,
        dst: u32,
        num_nodes: usize,
    },

    /// A graph with no nodes cannot be pooled.
    #[error("graph {0} has no nodes")]
    EmptyGraph(usize),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
