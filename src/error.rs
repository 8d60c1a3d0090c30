//! Error types for the sync engine.

use crate::types::SyncState;
use thiserror::Error;

/// Main error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid state for {operation}: {state}")]
    InvalidState {
        operation: &'static str,
        state: SyncState,
    },

    #[error("Not ready (state is {0})")]
    NotReady(SyncState),

    #[error("Already initialized (state is {0})")]
    AlreadyInitialized(SyncState),

    #[error("Change feed error: {0}")]
    Feed(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
