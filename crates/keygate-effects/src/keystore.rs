//! Key store effect handlers
//!
//! Null-object implementation of KeyStoreEffects for platforms without a
//! hardware-backed key store. The engine treats such a device as
//! unsupported; every operation reports [`KeyStoreError::Unavailable`].

use async_trait::async_trait;
use keygate_core::effects::{KeyStoreEffects, KeyStoreError, SigningHandle};

const UNAVAILABLE: &str = "no hardware-backed key store on this platform";

/// Key store handler for platforms without secure hardware
#[derive(Debug, Clone)]
pub struct UnsupportedKeyStoreHandler {
    device_fingerprint: String,
}

impl UnsupportedKeyStoreHandler {
    pub fn new(device_fingerprint: impl Into<String>) -> Self {
        Self {
            device_fingerprint: device_fingerprint.into(),
        }
    }

    fn unavailable<T>(&self, operation: &str) -> Result<T, KeyStoreError> {
        tracing::debug!(operation, "Key store operation on unsupported platform");
        Err(KeyStoreError::Unavailable(UNAVAILABLE.to_string()))
    }
}

impl Default for UnsupportedKeyStoreHandler {
    fn default() -> Self {
        Self::new("unknown-device")
    }
}

#[async_trait]
impl KeyStoreEffects for UnsupportedKeyStoreHandler {
    fn is_supported(&self) -> bool {
        false
    }

    fn device_fingerprint(&self) -> String {
        self.device_fingerprint.clone()
    }

    async fn generate_root_key(&self) -> Result<(), KeyStoreError> {
        self.unavailable("generate_root_key")
    }

    async fn has_root_key(&self) -> bool {
        false
    }

    async fn remove_root_key(&self) -> Result<(), KeyStoreError> {
        self.unavailable("remove_root_key")
    }

    async fn export_root_key(&self) -> Result<Option<Vec<u8>>, KeyStoreError> {
        self.unavailable("export_root_key")
    }

    async fn generate_scene_key(&self, _name: &str) -> Result<(), KeyStoreError> {
        self.unavailable("generate_scene_key")
    }

    async fn has_scene_key(&self, _name: &str) -> bool {
        false
    }

    async fn remove_scene_key(
        &self,
        _name: &str,
        _also_remove_root: bool,
    ) -> Result<(), KeyStoreError> {
        self.unavailable("remove_scene_key")
    }

    async fn prepare_signing_handle(
        &self,
        _name: &str,
    ) -> Result<Box<dyn SigningHandle>, KeyStoreError> {
        self.unavailable("prepare_signing_handle")
    }

    async fn export_scene_key(&self, _name: &str) -> Result<Option<Vec<u8>>, KeyStoreError> {
        self.unavailable("export_scene_key")
    }
}
