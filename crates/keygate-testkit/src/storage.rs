//! Memory storage handler for testing

use async_lock::RwLock;
use async_trait::async_trait;
use parking_lot::Mutex;
use keygate_core::effects::{StorageEffects, StorageError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Memory storage handler for testing
///
/// Clones share the same map, so a test can keep one clone to inspect what
/// the engine persisted or to pre-seed records before init.
#[derive(Debug, Clone)]
pub struct MemoryStorageHandler {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
    fail_containing: Arc<Mutex<Option<String>>>,
}

impl Default for MemoryStorageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageHandler {
    /// Create a new memory storage handler
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
            fail_containing: Arc::new(Mutex::new(None)),
        }
    }

    /// Make every subsequent store/remove fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail stores whose value contains `needle`; `None` clears the filter
    pub fn fail_stores_containing(&self, needle: Option<&str>) {
        *self.fail_containing.lock() = needle.map(str::to_string);
    }

    /// Stored value decoded as UTF-8 (for testing)
    pub async fn get_string(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .await
            .get(key)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageEffects for MemoryStorageHandler {
    async fn store(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.check_writable()?;
        if let Some(needle) = self.fail_containing.lock().as_deref() {
            if String::from_utf8_lossy(&value).contains(needle) {
                return Err(StorageError::WriteFailed(format!(
                    "injected failure for value containing {needle}"
                )));
            }
        }
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool, StorageError> {
        self.check_writable()?;
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn list_keys(&self, prefix: Option<&str>) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().await;
        let mut keys: Vec<String> = if let Some(prefix) = prefix {
            data.keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect()
        } else {
            data.keys().cloned().collect()
        };
        keys.sort();
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clones_share_state() {
        let storage = MemoryStorageHandler::new();
        let observer = storage.clone();
        storage.store("ns/key/a", b"x".to_vec()).await.unwrap();
        assert_eq!(observer.get_string("ns/key/a").await.as_deref(), Some("x"));
        assert_eq!(observer.list_keys(Some("ns/")).await.unwrap(), vec!["ns/key/a"]);
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let storage = MemoryStorageHandler::new();
        storage.set_fail_writes(true);
        assert!(matches!(
            storage.store("k", vec![]).await,
            Err(StorageError::WriteFailed(_))
        ));
        storage.set_fail_writes(false);
        storage.store("k", vec![]).await.unwrap();
    }

    #[tokio::test]
    async fn test_failure_matching_stored_value() {
        let storage = MemoryStorageHandler::new();
        storage.fail_stores_containing(Some("normal"));
        storage.store("a", b"pending".to_vec()).await.unwrap();
        assert!(matches!(
            storage.store("b", b"{\"status\":\"normal\"}".to_vec()).await,
            Err(StorageError::WriteFailed(_))
        ));
        assert!(!storage.exists("b").await.unwrap());

        storage.fail_stores_containing(None);
        storage.store("b", b"normal".to_vec()).await.unwrap();
    }
}
