//! Key lifecycle manager
//!
//! Owns the root/scene hierarchy: generation with persisted status
//! bookkeeping, upload with rollback, validity probing, self-healing
//! deletion of invalidated keys and startup cleanup of keys abandoned
//! mid-generation.
//!
//! Status transitions for a generated key:
//!
//! ```text
//! (absent) -> Generating -> GeneratedNotUploaded -> Normal    with uploader
//! (absent) -> Generating -> Normal                            without uploader
//! any      -> (record cleared)                                on rollback or removal
//! ```
//!
//! A status write that fails after generation rolls the key back.

use keygate_core::effects::{KeyStoreEffects, KeyStoreError, KeyUploader, SigningHandle};
use keygate_core::{
    ErrorCode, KeyStatus, KeyTier, KeygateError, KeygateResult, PublicKeyModel, ResultExt,
};
use std::sync::Arc;

use crate::persistence::PreferenceStore;

/// Result of probing a scene key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValidity {
    /// A signing handle can be obtained
    Valid,
    /// No key under that alias
    Absent,
    /// Permanently unusable (and deleted if requested)
    Invalid,
    /// The probe failed for a reason that does not prove invalidity
    Indeterminate(String),
}

/// Outcome of a prepare call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedKey {
    /// Key-store alias
    pub name: String,
    /// Whether a new key pair was generated by this call
    pub generated: bool,
    /// Whether the public key was uploaded and verified by this call
    pub uploaded: bool,
    /// Exported public key, when it was exported by this call
    pub model: Option<PublicKeyModel>,
}

impl PreparedKey {
    fn existing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            generated: false,
            uploaded: false,
            model: None,
        }
    }
}

#[derive(Clone)]
pub struct KeyLifecycleManager {
    key_store: Arc<dyn KeyStoreEffects>,
    prefs: PreferenceStore,
    root_key_name: String,
    auto_delete_invalid: bool,
}

impl KeyLifecycleManager {
    pub fn new(
        key_store: Arc<dyn KeyStoreEffects>,
        prefs: PreferenceStore,
        root_key_name: impl Into<String>,
        auto_delete_invalid: bool,
    ) -> Self {
        Self {
            key_store,
            prefs,
            root_key_name: root_key_name.into(),
            auto_delete_invalid,
        }
    }

    pub fn root_key_name(&self) -> &str {
        &self.root_key_name
    }

    /// Root key exists and is not left over from an interrupted generation
    pub async fn is_root_valid(&self) -> KeygateResult<bool> {
        if !self.key_store.has_root_key().await {
            return Ok(false);
        }
        let record = self.prefs.load_key_record(&self.root_key_name).await?;
        Ok(!record.is_some_and(|r| r.status.is_abandoned()))
    }

    pub async fn has_scene_key(&self, name: &str) -> bool {
        self.key_store.has_scene_key(name).await
    }

    /// Generate the root key, uploading it when `uploader` is given
    pub async fn generate_root(
        &self,
        force: bool,
        uploader: Option<Arc<dyn KeyUploader>>,
    ) -> KeygateResult<PreparedKey> {
        let name = self.root_key_name.clone();
        if !force && self.is_root_valid().await? {
            tracing::debug!(key = %name, "Root key already valid");
            return Ok(PreparedKey::existing(&name));
        }
        if self.key_store.has_root_key().await {
            tracing::info!(key = %name, force, "Replacing existing root key");
            self.remove_root(true).await?;
        }

        self.prefs
            .set_key_status(&name, KeyTier::Root, KeyStatus::Generating)
            .await?;
        if let Err(e) = self.key_store.generate_root_key().await {
            tracing::warn!(key = %name, error = %e, "Root key generation failed");
            self.rollback_root().await;
            return Err(e.into_keygate(ErrorCode::RootKeyGenerationFailed));
        }

        let Some(uploader) = uploader else {
            self.commit_status(&name, KeyTier::Root, KeyStatus::Normal).await?;
            tracing::info!(key = %name, "Root key generated");
            return Ok(PreparedKey {
                name,
                generated: true,
                uploaded: false,
                model: None,
            });
        };

        self.commit_status(&name, KeyTier::Root, KeyStatus::GeneratedNotUploaded).await?;
        let model = match self.export_and_upload_root(uploader.as_ref()).await {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(key = %name, code = %e.code, "Root key upload failed, rolling back");
                self.rollback_root().await;
                return Err(e);
            }
        };
        self.commit_status(&name, KeyTier::Root, KeyStatus::Normal).await?;
        tracing::info!(key = %name, "Root key generated and uploaded");
        Ok(PreparedKey {
            name,
            generated: true,
            uploaded: true,
            model: Some(model),
        })
    }

    async fn export_and_upload_root(
        &self,
        uploader: &dyn KeyUploader,
    ) -> KeygateResult<PublicKeyModel> {
        let model = self.root_key_model().await?;
        upload_key(uploader, &model).await?;
        Ok(model)
    }

    async fn rollback_root(&self) {
        if let Err(e) = self.key_store.remove_root_key().await {
            tracing::warn!(key = %self.root_key_name, error = %e, "Root key rollback failed");
        }
        if let Err(e) = self.prefs.clear_key_record(&self.root_key_name).await {
            tracing::warn!(key = %self.root_key_name, error = %e, "Root key record not cleared");
        }
    }

    /// Generate a scene key, uploading it when `uploader` is given
    pub async fn generate_scene(
        &self,
        name: &str,
        force: bool,
        auto_create_root: bool,
        uploader: Option<Arc<dyn KeyUploader>>,
        root_uploader: Option<Arc<dyn KeyUploader>>,
    ) -> KeygateResult<PreparedKey> {
        if !self.is_root_valid().await? {
            if !auto_create_root {
                return Err(KeygateError::new(
                    ErrorCode::RootKeyAbsent,
                    "scene keys require a valid root key",
                ));
            }
            tracing::info!(key = %name, "Creating root key before scene key");
            self.generate_root(false, root_uploader).await?;
        }

        if force {
            if self.key_store.has_scene_key(name).await {
                self.remove_scene(name).await?;
            }
        } else {
            match self.is_valid(name, true).await {
                KeyValidity::Valid => {
                    tracing::debug!(key = %name, "Scene key already valid");
                    return Ok(PreparedKey::existing(name));
                }
                KeyValidity::Absent | KeyValidity::Invalid => {}
                KeyValidity::Indeterminate(reason) => {
                    return Err(KeygateError::new(ErrorCode::KeyIndeterminate, reason));
                }
            }
        }

        self.prefs
            .set_key_status(name, KeyTier::Scene, KeyStatus::Generating)
            .await?;
        if let Err(e) = self.key_store.generate_scene_key(name).await {
            tracing::warn!(key = %name, error = %e, "Scene key generation failed");
            self.rollback_scene(name).await;
            return Err(e.into_keygate(ErrorCode::SceneKeyGenerationFailed));
        }

        let Some(uploader) = uploader else {
            self.commit_status(name, KeyTier::Scene, KeyStatus::Normal).await?;
            tracing::info!(key = %name, "Scene key generated");
            return Ok(PreparedKey {
                name: name.to_string(),
                generated: true,
                uploaded: false,
                model: None,
            });
        };

        self.commit_status(name, KeyTier::Scene, KeyStatus::GeneratedNotUploaded).await?;
        let model = match self.scene_key_model(name).await {
            Ok(model) => model,
            Err(e) => {
                self.rollback_scene(name).await;
                return Err(e);
            }
        };
        if let Err(e) = upload_key(uploader.as_ref(), &model).await {
            tracing::warn!(key = %name, code = %e.code, "Scene key upload failed, rolling back");
            self.rollback_scene(name).await;
            return Err(e);
        }
        self.commit_status(name, KeyTier::Scene, KeyStatus::Normal).await?;
        tracing::info!(key = %name, "Scene key generated and uploaded");
        Ok(PreparedKey {
            name: name.to_string(),
            generated: true,
            uploaded: true,
            model: Some(model),
        })
    }

    /// Persist the status of a freshly generated key, rolling the key back
    /// when the write fails
    async fn commit_status(
        &self,
        name: &str,
        tier: KeyTier,
        status: KeyStatus,
    ) -> KeygateResult<()> {
        let Err(e) = self.prefs.set_key_status(name, tier, status).await else {
            return Ok(());
        };
        tracing::warn!(
            key = %name,
            ?status,
            code = %e.code,
            "Key status not persisted, rolling back"
        );
        match tier {
            KeyTier::Root => self.rollback_root().await,
            KeyTier::Scene => self.rollback_scene(name).await,
        }
        Err(e)
    }

    async fn rollback_scene(&self, name: &str) {
        if let Err(e) = self.key_store.remove_scene_key(name, false).await {
            tracing::warn!(key = %name, error = %e, "Scene key rollback failed");
        }
        if let Err(e) = self.prefs.clear_key_record(name).await {
            tracing::warn!(key = %name, error = %e, "Scene key record not cleared");
        }
    }

    /// Probe a scene key by obtaining a signing handle
    pub async fn is_valid(&self, name: &str, auto_delete: bool) -> KeyValidity {
        if !self.key_store.has_scene_key(name).await {
            return KeyValidity::Absent;
        }
        match self.key_store.prepare_signing_handle(name).await {
            Ok(_) => KeyValidity::Valid,
            Err(e) => self.classify(name, e, auto_delete).await,
        }
    }

    async fn classify(&self, name: &str, err: KeyStoreError, auto_delete: bool) -> KeyValidity {
        match err {
            KeyStoreError::NotFound(_) => KeyValidity::Absent,
            e if e.invalidates_key() => {
                tracing::warn!(key = %name, error = %e, "Scene key invalidated");
                if auto_delete && self.auto_delete_invalid {
                    if let Err(e) = self.remove_scene(name).await {
                        tracing::warn!(key = %name, error = %e, "Invalid scene key not deleted");
                    }
                }
                KeyValidity::Invalid
            }
            e => {
                tracing::debug!(key = %name, error = %e, "Scene key state indeterminate");
                KeyValidity::Indeterminate(e.to_string())
            }
        }
    }

    /// Obtain the signing handle used for authentication.
    ///
    /// Same classification as [`Self::is_valid`], surfaced as errors:
    /// invalid keys are `SceneKeyExpired` (and deleted), anything
    /// unclassifiable is `KeyIndeterminate`.
    pub async fn acquire_signing_handle(
        &self,
        name: &str,
    ) -> KeygateResult<Box<dyn SigningHandle>> {
        let err = match self.key_store.prepare_signing_handle(name).await {
            Ok(handle) => return Ok(handle),
            Err(e) => e,
        };
        let detail = err.to_string();
        match self.classify(name, err, true).await {
            KeyValidity::Absent => Err(KeygateError::new(ErrorCode::SceneKeyAbsent, detail)),
            KeyValidity::Invalid => Err(KeygateError::new(ErrorCode::SceneKeyExpired, detail)),
            KeyValidity::Indeterminate(reason) => {
                Err(KeygateError::new(ErrorCode::KeyIndeterminate, reason))
            }
            KeyValidity::Valid => Err(KeygateError::new(ErrorCode::KeyIndeterminate, detail)),
        }
    }

    /// Delete keys whose persisted status shows an interrupted generation
    pub async fn cleanup_abandoned(&self) -> KeygateResult<usize> {
        let mut removed = 0;
        for record in self.prefs.list_key_records().await? {
            if !record.status.is_abandoned() {
                continue;
            }
            tracing::info!(key = %record.name, status = ?record.status, "Removing abandoned key");
            let result = match record.tier {
                KeyTier::Root => self.key_store.remove_root_key().await,
                KeyTier::Scene => self.key_store.remove_scene_key(&record.name, false).await,
            };
            if let Err(e) = result {
                tracing::warn!(key = %record.name, error = %e, "Abandoned key not removed");
                continue;
            }
            self.prefs.clear_key_record(&record.name).await?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Remove one scene key and its record
    pub async fn remove_scene(&self, name: &str) -> KeygateResult<()> {
        self.key_store
            .remove_scene_key(name, false)
            .await
            .map_err(|e| e.into_keygate(ErrorCode::KeyRemovalFailed))?;
        self.prefs.clear_key_record(name).await?;
        tracing::info!(key = %name, "Scene key removed");
        Ok(())
    }

    /// Remove the root key, and with `also_scenes` every recorded scene key
    pub async fn remove_root(&self, also_scenes: bool) -> KeygateResult<()> {
        if also_scenes {
            for record in self.prefs.list_key_records().await? {
                if record.tier == KeyTier::Scene {
                    self.remove_scene(&record.name).await?;
                }
            }
        }
        self.key_store
            .remove_root_key()
            .await
            .map_err(|e| e.into_keygate(ErrorCode::KeyRemovalFailed))?;
        self.prefs.clear_key_record(&self.root_key_name).await?;
        tracing::info!(key = %self.root_key_name, also_scenes, "Root key removed");
        Ok(())
    }

    /// Export and decode the root public key
    pub async fn root_key_model(&self) -> KeygateResult<PublicKeyModel> {
        let bytes = self
            .key_store
            .export_root_key()
            .await
            .with_code(ErrorCode::KeyExportFailed, "root key export")?
            .ok_or_else(|| KeygateError::from_code(ErrorCode::RootKeyAbsent))?;
        Ok(PublicKeyModel::from_export(&bytes)?)
    }

    /// Export and decode a scene public key
    pub async fn scene_key_model(&self, name: &str) -> KeygateResult<PublicKeyModel> {
        let bytes = self
            .key_store
            .export_scene_key(name)
            .await
            .with_code(ErrorCode::KeyExportFailed, "scene key export")?
            .ok_or_else(|| KeygateError::from_code(ErrorCode::SceneKeyAbsent))?;
        Ok(PublicKeyModel::from_export(&bytes)?)
    }
}

async fn upload_key(uploader: &dyn KeyUploader, model: &PublicKeyModel) -> KeygateResult<()> {
    match uploader.upload_key(&model.json, &model.signature).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(KeygateError::new(
            ErrorCode::UploadKeyFailed,
            "server did not verify the key",
        )),
        Err(e) => Err(KeygateError::new(ErrorCode::UploadKeyFailed, e.to_string())),
    }
}
