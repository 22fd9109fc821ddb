//! Persisted preference storage effect trait
//!
//! A flat, namespaced key-value store. The engine keeps key statuses, the
//! anti-brute-force freeze state and cached support verdicts here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::KeygateError;

/// Storage operation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum StorageError {
    #[error("Invalid key: {reason}")]
    InvalidKey { reason: String },
    #[error("Read failed: {0}")]
    ReadFailed(String),
    #[error("Write failed: {0}")]
    WriteFailed(String),
    #[error("Delete failed: {0}")]
    DeleteFailed(String),
    #[error("List failed: {0}")]
    ListFailed(String),
}

impl From<StorageError> for KeygateError {
    fn from(err: StorageError) -> Self {
        KeygateError::storage(err.to_string())
    }
}

/// Key-value storage interface
#[async_trait]
pub trait StorageEffects: Send + Sync {
    /// Store a value, replacing any previous one
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Retrieve a value
    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Remove a value; returns whether it existed
    async fn remove(&self, key: &str) -> Result<bool, StorageError>;

    /// List keys, optionally restricted to a prefix
    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError>;

    /// Whether a key exists
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.retrieve(key).await?.is_some())
    }
}
