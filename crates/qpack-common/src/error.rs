//! Error types shared across the qpack crates

use thiserror::Error;

/// Top-level error for packing, unpacking and configuration.
#[derive(Debug, Error)]
pub enum QPackError {
    #[error("quantization error: {0}")]
    Quantization(#[from] QuantizationError),

    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while constructing or reconstructing quantized tensors.
#[derive(Debug, Error)]
pub enum QuantizationError {
    #[error("{backend} does not support {scheme} weights on this path")]
    UnsupportedScheme { backend: String, scheme: String },

    #[error("expected {expected} quantization parameters, got {got}")]
    ParamLengthMismatch { expected: usize, got: usize },

    #[error("expected a rank-{expected} tensor, got shape {shape:?}")]
    InvalidRank { expected: usize, shape: Vec<usize> },

    #[error("invalid scale {scale}: scales must be finite and positive")]
    InvalidScale { scale: f64 },

    #[error("zero point {zero_point} is outside the int8 range")]
    InvalidZeroPoint { zero_point: i64 },

    #[error("quantization failed: {reason}")]
    QuantizationFailed { reason: String },
}

/// Errors raised by the packed-matrix primitives and backend selection.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("buffer size mismatch: expected {expected} elements, got {got}")]
    BufferSizeMismatch { expected: usize, got: usize },

    #[error("invalid blocking parameters: {reason}")]
    InvalidBlocking { reason: String },

    #[error("corrupt packed matrix: {reason}")]
    CorruptPacking { reason: String },

    #[error("backend {backend} is not compiled into this build")]
    BackendUnavailable { backend: String },

    #[error("no packing backend available")]
    NoProvider,
}

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, QPackError>;
