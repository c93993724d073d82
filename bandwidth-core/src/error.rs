//! Error types for the bandwidth recorder core.
//!
//! Storage failures are split from counter misuse: the former are runtime
//! conditions (logged and retried on the next flush), the latter indicate an
//! ordering or configuration mistake and are surfaced to the caller as-is.

use thiserror::Error;

/// Errors raised by the storage backend and the storage coordinator
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Transaction aborted: {0}")]
    Transaction(String),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Counter {0} is not hydrated")]
    NotHydrated(String),

    #[error("Counter {0} is already hydrated")]
    AlreadyHydrated(String),

    #[error("Duplicate metric identifier: {0}")]
    DuplicateMetric(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error("Metric error: {0}")]
    Metric(#[from] MetricError),
}

/// Errors raised while updating or exposing a time-windowed counter
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("Counter {0} is not hydrated")]
    NotHydrated(String),

    #[error("Counter {metric} expects {expected} label values, got {actual}")]
    LabelArity {
        metric: String,
        expected: usize,
        actual: usize,
    },

    #[error("Counter {metric} received an empty value for label {label}")]
    EmptyLabelValue { metric: String, label: String },

    #[error("Empty bucket label for counter {0}")]
    EmptyBucket(String),

    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Errors raised by the packet metadata framing codec
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Excessive byte count in length prefix")]
    ExcessiveByteCount,

    #[error("Frame length {0} exceeds the maximum of {1} bytes")]
    FrameTooLarge(u32, u32),

    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;
