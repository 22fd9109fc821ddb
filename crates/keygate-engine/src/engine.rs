//! Caller-facing engine
//!
//! [`Engine`] wraps the admission controller. Task methods return
//! immediately and hand their result to a one-shot callback on the result
//! context; queries are `async` and run on the worker behind any queued
//! task.

use keygate_core::effects::{
    BiometricEffects, KeyStoreEffects, PhysicalTimeEffects, StorageEffects,
};
use keygate_core::{ErrorCode, KeygateError, KeygateResult, PublicKeyModel, SceneId};
use keygate_effects::{FallbackBiometricHandler, RealTimeHandler};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::keys::PreparedKey;
use crate::orchestrator::AuthenticationOutcome;
use crate::state::{FreezeState, SharedState};
use crate::task::{
    AuthenticateRequest, InitOutcome, InitRequest, PrepareRootKeyRequest,
    PrepareSceneKeyRequest, Task, TaskIdentity, TaskOutput, TaskState,
};
use crate::task_registry::{AdmissionController, TaskCallback};

/// Adapt a task callback to a oneshot receiver
pub fn oneshot_callback<T: Send + 'static>() -> (
    impl FnOnce(KeygateResult<T>) + Send + 'static,
    oneshot::Receiver<KeygateResult<T>>,
) {
    let (tx, rx) = oneshot::channel();
    let callback = move |result: KeygateResult<T>| {
        let _ = tx.send(result);
    };
    (callback, rx)
}

/// Assembles an [`Engine`] from its effect handlers
pub struct EngineBuilder {
    config: EngineConfig,
    key_store: Option<Arc<dyn KeyStoreEffects>>,
    biometric: Option<Arc<dyn BiometricEffects>>,
    storage: Option<Arc<dyn StorageEffects>>,
    time: Option<Arc<dyn PhysicalTimeEffects>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            key_store: None,
            biometric: None,
            storage: None,
            time: None,
        }
    }

    pub fn key_store(mut self, key_store: Arc<dyn KeyStoreEffects>) -> Self {
        self.key_store = Some(key_store);
        self
    }

    /// Defaults to [`FallbackBiometricHandler`]
    pub fn biometric(mut self, biometric: Arc<dyn BiometricEffects>) -> Self {
        self.biometric = Some(biometric);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn StorageEffects>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Defaults to [`RealTimeHandler`]
    pub fn time(mut self, time: Arc<dyn PhysicalTimeEffects>) -> Self {
        self.time = Some(time);
        self
    }

    /// Validate the configuration and start the worker and result contexts.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> KeygateResult<Engine> {
        self.config.validate()?;
        let key_store = self
            .key_store
            .ok_or_else(|| KeygateError::invalid_parameter("a key store handler is required"))?;
        let storage = self
            .storage
            .ok_or_else(|| KeygateError::invalid_parameter("a storage handler is required"))?;
        let biometric: Arc<dyn BiometricEffects> = match self.biometric {
            Some(biometric) => biometric,
            None => Arc::new(FallbackBiometricHandler::new()),
        };
        let time: Arc<dyn PhysicalTimeEffects> = match self.time {
            Some(time) => time,
            None => Arc::new(RealTimeHandler::new()),
        };
        let runtime = Handle::try_current()
            .map_err(|e| KeygateError::internal(format!("no tokio runtime: {e}")))?;

        let shared = Arc::new(Mutex::new(SharedState::default()));
        let ctx = Arc::new(EngineContext::new(
            self.config,
            key_store,
            biometric,
            storage,
            time,
            shared,
        ));
        tracing::debug!(
            namespace = %ctx.config.storage_namespace,
            native_lockout = ?ctx.biometric.native_lockout(),
            "Engine started"
        );
        Ok(Engine {
            controller: AdmissionController::start(ctx, &runtime),
        })
    }
}

pub struct Engine {
    controller: AdmissionController,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("active_tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    fn ctx(&self) -> &EngineContext {
        self.controller.context()
    }

    fn submit<T, F>(&self, task: Task, callback: F, extract: fn(TaskOutput) -> Option<T>)
    where
        F: FnOnce(KeygateResult<T>) + Send + 'static,
        T: 'static,
    {
        let callback: TaskCallback = Box::new(move |result: KeygateResult<TaskOutput>| {
            callback(result.and_then(|output| {
                extract(output)
                    .ok_or_else(|| KeygateError::internal("task produced an unexpected output"))
            }))
        });
        self.controller.submit(task, callback);
    }

    /// Establish scenes and salt, decide device support, and clean up keys
    /// left behind by an interrupted generation
    pub fn init<F>(&self, request: InitRequest, callback: F)
    where
        F: FnOnce(KeygateResult<InitOutcome>) + Send + 'static,
    {
        self.submit(Task::Init(request), callback, |output| match output {
            TaskOutput::Initialized(outcome) => Some(outcome),
            _ => None,
        });
    }

    pub fn prepare_root_key<F>(&self, request: PrepareRootKeyRequest, callback: F)
    where
        F: FnOnce(KeygateResult<PreparedKey>) + Send + 'static,
    {
        self.submit(Task::PrepareRootKey(request), callback, |output| match output {
            TaskOutput::RootKey(key) => Some(key),
            _ => None,
        });
    }

    pub fn prepare_scene_key<F>(&self, request: PrepareSceneKeyRequest, callback: F)
    where
        F: FnOnce(KeygateResult<PreparedKey>) + Send + 'static,
    {
        self.submit(Task::PrepareSceneKey(request), callback, |output| match output {
            TaskOutput::SceneKey(key) => Some(key),
            _ => None,
        });
    }

    /// Sign a challenge with the scene key once the user passes the
    /// biometric prompt. Cancel through the request's token or
    /// [`Engine::cancel_authentication`].
    pub fn authenticate<F>(&self, request: AuthenticateRequest, callback: F)
    where
        F: FnOnce(KeygateResult<AuthenticationOutcome>) + Send + 'static,
    {
        self.submit(Task::Authenticate(request), callback, |output| match output {
            TaskOutput::Authenticated(outcome) => Some(outcome),
            _ => None,
        });
    }

    pub fn remove_scene_key<F>(&self, scene: SceneId, callback: F)
    where
        F: FnOnce(KeygateResult<SceneId>) + Send + 'static,
    {
        self.submit(Task::RemoveSceneKey(scene), callback, |output| match output {
            TaskOutput::SceneKeyRemoved(scene) => Some(scene),
            _ => None,
        });
    }

    /// Cancel every registered task without waiting; returns the number cancelled
    pub fn cancel_all(&self) -> usize {
        self.controller.cancel_all()
    }

    /// Cancel the active authentication of `scene`, if any
    pub fn cancel_authentication(&self, scene: SceneId) -> bool {
        self.ctx().broker.cancel_scene(scene)
    }

    /// Fail every outstanding task with `Cancelled` and stop the engine.
    /// Later submissions resolve with `Cancelled` immediately.
    pub fn release(&self) {
        self.controller.shutdown();
    }

    pub fn is_initialized(&self) -> bool {
        self.ctx().shared.lock().init.is_some()
    }

    pub fn is_supported(&self) -> bool {
        self.ctx()
            .shared
            .lock()
            .init
            .as_ref()
            .is_some_and(|init| init.supported)
    }

    /// Whether a usable root key exists
    pub async fn has_root_key(&self) -> KeygateResult<bool> {
        let ctx = self.controller.context().clone();
        self.controller
            .run_serialized(async move { ctx.keys.is_root_valid().await })
            .await
    }

    pub async fn has_scene_key(&self, scene: SceneId) -> KeygateResult<bool> {
        let ctx = self.controller.context().clone();
        self.controller
            .run_serialized(async move {
                let name = ctx.scene_key_name(scene)?;
                Ok(ctx.keys.has_scene_key(&name).await)
            })
            .await
    }

    pub async fn root_key_model(&self) -> KeygateResult<PublicKeyModel> {
        let ctx = self.controller.context().clone();
        self.controller
            .run_serialized(async move { ctx.keys.root_key_model().await })
            .await
    }

    /// Public half of `scene`'s key, as attested by the root key
    pub async fn scene_key_model(&self, scene: SceneId) -> KeygateResult<PublicKeyModel> {
        let ctx = self.controller.context().clone();
        self.controller
            .run_serialized(async move {
                let name = ctx.scene_key_name(scene)?;
                if !ctx.keys.has_scene_key(&name).await {
                    return Err(KeygateError::from_code(ErrorCode::SceneKeyAbsent));
                }
                ctx.keys.scene_key_model(&name).await
            })
            .await
    }

    pub fn active_tasks(&self) -> Vec<(TaskIdentity, TaskState)> {
        self.controller.active_tasks()
    }

    /// Anti-brute-force counters as last loaded or updated
    pub fn freeze_state(&self) -> FreezeState {
        self.ctx().guard.snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx().config
    }
}
