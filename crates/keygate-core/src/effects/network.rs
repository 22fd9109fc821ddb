//! Network collaborator traits
//!
//! Only the data contracts are fixed here. Transport, retries and timeouts
//! belong to the implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Network collaborator error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum NetworkError {
    #[error("Transport failed: {0}")]
    Transport(String),
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("Server rejected request: {0}")]
    Rejected(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// Decides whether this device may use biometric keys
#[async_trait]
pub trait SupportProvider: Send + Sync {
    async fn get_support(&self, device_fingerprint: &str) -> Result<bool, NetworkError>;
}

/// Issues fresh challenges
#[async_trait]
pub trait ChallengeProvider: Send + Sync {
    async fn get_challenge(&self) -> Result<String, NetworkError>;
}

/// Receives exported public keys; returns whether the server verified them
#[async_trait]
pub trait KeyUploader: Send + Sync {
    async fn upload_key(&self, json: &str, signature: &str) -> Result<bool, NetworkError>;
}

/// Payload handed to a [`SignatureUploader`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureUpload {
    /// Signature over `json`, base64
    pub signature: String,
    /// Raw signed JSON
    pub json: String,
    /// Salt length of the signature scheme
    pub salt_len: u32,
}

/// Receives authentication signatures; returns whether the server verified them
#[async_trait]
pub trait SignatureUploader: Send + Sync {
    async fn upload_signature(&self, upload: &SignatureUpload) -> Result<bool, NetworkError>;
}
