//! Hardware-backed key store effect trait
//!
//! The key store owns the root key and the scene keys, never lets private
//! material leave the secure element, and reveals public material and
//! signatures only as export blobs (see [`crate::export_blob`]).
//!
//! Implementations are expected to be non-reentrant; the engine guarantees
//! that no two calls are in flight at the same time.

use async_trait::async_trait;
use std::fmt;

use crate::errors::{ErrorCode, KeygateError};

/// Key store operation error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyStoreError {
    /// The key entry can no longer be recovered (e.g. the secure element was reset)
    #[error("Unrecoverable key entry: {0}")]
    Unrecoverable(String),

    /// The key was permanently invalidated (e.g. new biometric enrolled)
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// No key with that alias exists
    #[error("Key not found: {0}")]
    NotFound(String),

    /// The signing primitive rejected the operation
    #[error("Signature error: {0}")]
    Signature(String),

    /// Hardware key store is not available on this device
    #[error("Key store unavailable: {0}")]
    Unavailable(String),

    /// Any other platform failure
    #[error("Key store backend error: {0}")]
    Backend(String),
}

impl KeyStoreError {
    /// Whether the error proves the key is permanently unusable.
    ///
    /// Only these errors may trigger deletion; everything else is treated as
    /// indeterminate and the key is left in place.
    pub fn invalidates_key(&self) -> bool {
        matches!(
            self,
            KeyStoreError::Unrecoverable(_) | KeyStoreError::InvalidKey(_)
        )
    }

    /// Convert into the engine error shape under `code`
    pub fn into_keygate(self, code: ErrorCode) -> KeygateError {
        KeygateError::new(code, self.to_string())
    }
}

/// Signing handle bound to one scene key.
///
/// A handle is unlocked by a successful biometric authentication, fed the
/// challenge, then consumed by [`SigningHandle::sign`].
pub trait SigningHandle: Send + fmt::Debug {
    /// Alias of the key this handle signs with
    fn key_name(&self) -> &str;

    /// Append data to be signed
    fn update(&mut self, data: &[u8]) -> Result<(), KeyStoreError>;

    /// Finalize and return the signature as an export blob
    fn sign(self: Box<Self>) -> Result<Vec<u8>, KeyStoreError>;
}

/// Hardware-backed key store interface
#[async_trait]
pub trait KeyStoreEffects: Send + Sync {
    /// Whether the platform offers a hardware-backed key store at all
    fn is_supported(&self) -> bool;

    /// Stable identifier of the device, used for support queries
    fn device_fingerprint(&self) -> String;

    /// Generate the application-wide root key pair
    async fn generate_root_key(&self) -> Result<(), KeyStoreError>;

    /// Whether a root key exists
    async fn has_root_key(&self) -> bool;

    /// Remove the root key
    async fn remove_root_key(&self) -> Result<(), KeyStoreError>;

    /// Export the root public key as an export blob
    async fn export_root_key(&self) -> Result<Option<Vec<u8>>, KeyStoreError>;

    /// Generate a scene key pair attested by the root key
    async fn generate_scene_key(&self, name: &str) -> Result<(), KeyStoreError>;

    /// Whether a scene key with this alias exists
    async fn has_scene_key(&self, name: &str) -> bool;

    /// Remove a scene key, optionally taking the root key with it
    async fn remove_scene_key(&self, name: &str, also_remove_root: bool)
        -> Result<(), KeyStoreError>;

    /// Obtain a signing handle for a scene key
    async fn prepare_signing_handle(
        &self,
        name: &str,
    ) -> Result<Box<dyn SigningHandle>, KeyStoreError>;

    /// Export a scene public key as an export blob
    async fn export_scene_key(&self, name: &str) -> Result<Option<Vec<u8>>, KeyStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unrecoverable_and_invalid_invalidate() {
        assert!(KeyStoreError::Unrecoverable("reset".into()).invalidates_key());
        assert!(KeyStoreError::InvalidKey("new finger".into()).invalidates_key());
        assert!(!KeyStoreError::NotFound("k".into()).invalidates_key());
        assert!(!KeyStoreError::Signature("bad".into()).invalidates_key());
        assert!(!KeyStoreError::Backend("binder died".into()).invalidates_key());
    }

    #[test]
    fn test_into_keygate_keeps_detail() {
        let err = KeyStoreError::Backend("binder died".into())
            .into_keygate(ErrorCode::KeyIndeterminate);
        assert_eq!(err.code, ErrorCode::KeyIndeterminate);
        assert!(err.message.contains("binder died"));
    }
}
