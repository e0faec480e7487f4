//! Error types for veracity-nn.

use thiserror::Error;

/// Model error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Batch assembly error.
    #[error("data error: {0}")]
    Data(#[from] veracity_core::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The shared parameter store was poisoned by a panicking thread.
    #[error("parameter store lock poisoned")]
    Poisoned,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
