//! Namespaced preference records
//!
//! Layout under the configured namespace `ns`:
//!
//! | key | value |
//! |---|---|
//! | `{ns}/key/{alias}` | [`KeyRecord`] as JSON |
//! | `{ns}/freeze/state` | [`FreezeState`] as JSON |
//! | `{ns}/support/{fingerprint}` | cached support verdict, `true`/`false` |
//!
//! Unreadable records are logged and treated as absent.

use keygate_core::effects::StorageEffects;
use keygate_core::{KeyRecord, KeyStatus, KeyTier, KeygateResult};
use std::sync::Arc;

use crate::state::FreezeState;

#[derive(Clone)]
pub struct PreferenceStore {
    storage: Arc<dyn StorageEffects>,
    namespace: String,
}

impl std::fmt::Debug for PreferenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreferenceStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl PreferenceStore {
    pub fn new(storage: Arc<dyn StorageEffects>, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
        }
    }

    fn key_prefix(&self) -> String {
        format!("{}/key/", self.namespace)
    }

    fn key_path(&self, name: &str) -> String {
        format!("{}{name}", self.key_prefix())
    }

    fn freeze_path(&self) -> String {
        format!("{}/freeze/state", self.namespace)
    }

    fn support_path(&self, fingerprint: &str) -> String {
        format!("{}/support/{fingerprint}", self.namespace)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> KeygateResult<Option<T>> {
        let Some(bytes) = self.storage.retrieve(path).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                tracing::warn!(path, error = %e, "Discarding unreadable preference record");
                Ok(None)
            }
        }
    }

    async fn write_json<T: serde::Serialize>(&self, path: &str, value: &T) -> KeygateResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| keygate_core::KeygateError::internal(e.to_string()))?;
        self.storage.store(path, bytes).await?;
        Ok(())
    }

    pub async fn load_key_record(&self, name: &str) -> KeygateResult<Option<KeyRecord>> {
        self.read_json(&self.key_path(name)).await
    }

    pub async fn save_key_record(&self, record: &KeyRecord) -> KeygateResult<()> {
        tracing::trace!(key = %record.name, status = ?record.status, "Persisting key status");
        self.write_json(&self.key_path(&record.name), record).await
    }

    /// Persist `status` for `name`
    pub async fn set_key_status(
        &self,
        name: &str,
        tier: KeyTier,
        status: KeyStatus,
    ) -> KeygateResult<()> {
        self.save_key_record(&KeyRecord::new(name, tier, status))
            .await
    }

    pub async fn clear_key_record(&self, name: &str) -> KeygateResult<()> {
        self.storage.remove(&self.key_path(name)).await?;
        Ok(())
    }

    /// Every readable key record, ordered by alias
    pub async fn list_key_records(&self) -> KeygateResult<Vec<KeyRecord>> {
        let prefix = self.key_prefix();
        let mut records = Vec::new();
        for path in self.storage.list_keys(Some(&prefix)).await? {
            if let Some(record) = self.read_json::<KeyRecord>(&path).await? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }

    pub async fn load_freeze(&self) -> KeygateResult<Option<FreezeState>> {
        self.read_json(&self.freeze_path()).await
    }

    pub async fn save_freeze(&self, state: &FreezeState) -> KeygateResult<()> {
        self.write_json(&self.freeze_path(), state).await
    }

    pub async fn load_support(&self, fingerprint: &str) -> KeygateResult<Option<bool>> {
        self.read_json(&self.support_path(fingerprint)).await
    }

    pub async fn save_support(&self, fingerprint: &str, supported: bool) -> KeygateResult<()> {
        self.write_json(&self.support_path(fingerprint), &supported)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_testkit::MemoryStorageHandler;

    fn store() -> (PreferenceStore, MemoryStorageHandler) {
        let storage = MemoryStorageHandler::new();
        (
            PreferenceStore::new(Arc::new(storage.clone()), "ns"),
            storage,
        )
    }

    #[tokio::test]
    async fn test_key_records_are_namespaced() {
        let (prefs, storage) = store();
        prefs
            .set_key_status("root", KeyTier::Root, KeyStatus::Generating)
            .await
            .unwrap();
        assert!(storage.get_string("ns/key/root").await.is_some());

        let records = prefs.list_key_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, KeyStatus::Generating);

        prefs.clear_key_record("root").await.unwrap();
        assert!(prefs.load_key_record("root").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_record_reads_as_absent() {
        let (prefs, storage) = store();
        storage
            .store("ns/freeze/state", b"{not json".to_vec())
            .await
            .unwrap();
        assert!(prefs.load_freeze().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_support_cache_round_trip() {
        let (prefs, _) = store();
        assert_eq!(prefs.load_support("abc").await.unwrap(), None);
        prefs.save_support("abc", false).await.unwrap();
        assert_eq!(prefs.load_support("abc").await.unwrap(), Some(false));
    }

    #[tokio::test]
    async fn test_write_failure_maps_to_storage_code() {
        let (prefs, storage) = store();
        storage.set_fail_writes(true);
        let err = prefs.save_freeze(&FreezeState::default()).await.unwrap_err();
        assert_eq!(err.code, keygate_core::ErrorCode::StorageFailed);
    }
}
