//! Error types for veracity-train.

use thiserror::Error;

/// Training error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Dataset or batching error.
    #[error("data error: {0}")]
    Data(#[from] veracity_core::Error),

    /// Model construction or forward error.
    #[error("model error: {0}")]
    Model(#[from] veracity_nn::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unrecognised device string.
    #[error("invalid device `{0}`: expected cpu, cuda:N or metal:N")]
    InvalidDevice(String),

    /// Probability rows and labels disagree in length.
    #[error("metric log mismatch: {probs} probability rows for {labels} labels")]
    LogMismatch { probs: usize, labels: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
