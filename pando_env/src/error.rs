//! Error types for the Pando entry store contract.

use crate::key::Key;
use thiserror::Error;

/// Errors an entry store may report.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `update` or a tag mutation addressed a key that does not exist
    #[error("Entry not found: {0}")]
    NotFound(Key),

    /// Sentinel keys are write-only
    #[error("Sentinel key cannot be addressed directly")]
    SentinelKey,

    /// Entry (de)serialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Underlying storage engine failure
    #[error("Storage error: {0}")]
    StorageError(String),

    /// A lock guarding store state was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Creates a storage error.
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::StorageError(msg.to_string())
    }

    /// Creates a serialization error.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::SerializationError(msg.to_string())
    }
}
