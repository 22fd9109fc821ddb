//! Handles and services the worker context runs tasks against

use keygate_core::effects::{BiometricEffects, KeyStoreEffects, PhysicalTimeEffects, StorageEffects};
use keygate_core::{ErrorCode, KeygateError, KeygateResult, SceneId};
use std::sync::Arc;

use crate::cancellation::CancellationBroker;
use crate::config::EngineConfig;
use crate::guard::AntiBruteForceGuard;
use crate::keys::KeyLifecycleManager;
use crate::persistence::PreferenceStore;
use crate::state::SharedStateHandle;

pub(crate) struct EngineContext {
    pub config: EngineConfig,
    pub key_store: Arc<dyn KeyStoreEffects>,
    pub biometric: Arc<dyn BiometricEffects>,
    pub shared: SharedStateHandle,
    pub prefs: PreferenceStore,
    pub guard: AntiBruteForceGuard,
    pub keys: KeyLifecycleManager,
    pub broker: CancellationBroker,
}

impl EngineContext {
    pub fn new(
        config: EngineConfig,
        key_store: Arc<dyn KeyStoreEffects>,
        biometric: Arc<dyn BiometricEffects>,
        storage: Arc<dyn StorageEffects>,
        time: Arc<dyn PhysicalTimeEffects>,
        shared: SharedStateHandle,
    ) -> Self {
        let prefs = PreferenceStore::new(storage, config.storage_namespace.clone());
        let guard = AntiBruteForceGuard::new(
            shared.clone(),
            prefs.clone(),
            time.clone(),
            config.max_fail_count,
            config.freeze_window_ms,
        );
        let keys = KeyLifecycleManager::new(
            key_store.clone(),
            prefs.clone(),
            config.root_key_name.clone(),
            config.auto_delete_invalid_keys,
        );
        let broker = CancellationBroker::new(
            shared.clone(),
            biometric.clone(),
            time,
            config.cancel_wait_ms,
        );
        Self {
            config,
            key_store,
            biometric,
            shared,
            prefs,
            guard,
            keys,
            broker,
        }
    }

    /// Alias of `scene`'s key for the initialized account
    pub fn scene_key_name(&self, scene: SceneId) -> KeygateResult<String> {
        let shared = self.shared.lock();
        let init = shared
            .init
            .as_ref()
            .ok_or_else(|| KeygateError::from_code(ErrorCode::NotInitialized))?;
        Ok(keygate_core::scene_key_name(
            &self.config.scene_key_prefix,
            &init.salt,
            scene,
        ))
    }
}
