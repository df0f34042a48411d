//! Error types for the subscription engine and its stores.

use crate::types::{SequenceNumber, SubscriptionId};
use thiserror::Error;

/// Main error type for engine, store and event log operations.
///
/// Projection and hook failures are not represented here: they are caught by
/// the engine and reported through `OperationResult` / `ProcessedResult`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The subscription table has not been created yet.
    #[error("Subscription schema not found (setup has not been run)")]
    SchemaNotFound,

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    #[error("Subscription already exists: {0}")]
    SubscriptionExists(SubscriptionId),

    #[error("Subscriber not registered: {0}")]
    SubscriberNotRegistered(SubscriptionId),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Subscription engine is already processing")]
    AlreadyProcessing,

    #[error("Invalid batch size {0}, must be either None or a positive integer")]
    InvalidBatchSize(usize),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Could not normalize event {event_type} at {sequence_number:?}: {message}")]
    Normalization {
        sequence_number: SequenceNumber,
        event_type: String,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for EngineError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for EngineError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        EngineError::Deserialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
