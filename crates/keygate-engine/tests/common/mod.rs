//! Shared harness for engine integration tests

#![allow(dead_code)]
#![allow(clippy::expect_used)]

use keygate_engine::{
    oneshot_callback, AuthenticateRequest, AuthenticationObserver, AuthenticationOutcome, Engine,
    EngineConfig, InitOutcome, InitRequest, KeygateResult, PrepareRootKeyRequest,
    PrepareSceneKeyRequest, PreparedKey, SceneId,
};
use keygate_testkit::{
    init_test_tracing, MemoryStorageHandler, MockBiometricHandler, MockKeyStore,
    SimulatedTimeHandler,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

pub const SCENE: SceneId = SceneId(42);
pub const SALT: &str = "alice";

pub struct Harness {
    pub engine: Engine,
    pub key_store: MockKeyStore,
    pub sensor: MockBiometricHandler,
    pub storage: MemoryStorageHandler,
    pub time: SimulatedTimeHandler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(MockKeyStore::new("device-1"), MemoryStorageHandler::new())
    }

    pub fn with_parts(key_store: MockKeyStore, storage: MemoryStorageHandler) -> Self {
        Self::with_config(EngineConfig::default(), key_store, storage)
    }

    pub fn with_config(
        config: EngineConfig,
        key_store: MockKeyStore,
        storage: MemoryStorageHandler,
    ) -> Self {
        init_test_tracing();
        let sensor = MockBiometricHandler::new();
        let time = SimulatedTimeHandler::new();
        let engine = Engine::builder(config)
            .key_store(Arc::new(key_store.clone()))
            .biometric(Arc::new(sensor.clone()))
            .storage(Arc::new(storage.clone()))
            .time(Arc::new(time.clone()))
            .build()
            .expect("engine builds");
        Self {
            engine,
            key_store,
            sensor,
            storage,
            time,
        }
    }

    /// Initialized for [`SCENE`] with a root and scene key in place
    pub async fn ready() -> Self {
        let harness = Self::new();
        harness.init().await.expect("init");
        harness
            .prepare_scene(PrepareSceneKeyRequest::new(SCENE).auto_create_root(None))
            .await
            .expect("scene key");
        harness
    }

    pub fn scene_key_name(&self, scene: SceneId) -> String {
        keygate_core::scene_key_name(&self.engine.config().scene_key_prefix, SALT, scene)
    }

    pub async fn init(&self) -> KeygateResult<InitOutcome> {
        self.init_with(InitRequest::new([SCENE], SALT)).await
    }

    pub async fn init_with(&self, request: InitRequest) -> KeygateResult<InitOutcome> {
        let (callback, rx) = oneshot_callback();
        self.engine.init(request, callback);
        rx.await.expect("init callback delivered")
    }

    pub async fn prepare_root(&self, request: PrepareRootKeyRequest) -> KeygateResult<PreparedKey> {
        let (callback, rx) = oneshot_callback();
        self.engine.prepare_root_key(request, callback);
        rx.await.expect("prepare_root_key callback delivered")
    }

    pub async fn prepare_scene(
        &self,
        request: PrepareSceneKeyRequest,
    ) -> KeygateResult<PreparedKey> {
        let (callback, rx) = oneshot_callback();
        self.engine.prepare_scene_key(request, callback);
        rx.await.expect("prepare_scene_key callback delivered")
    }

    pub fn start_authentication(
        &self,
        request: AuthenticateRequest,
    ) -> oneshot::Receiver<KeygateResult<AuthenticationOutcome>> {
        let (callback, rx) = oneshot_callback();
        self.engine.authenticate(request, callback);
        rx
    }

    pub async fn authenticate(
        &self,
        request: AuthenticateRequest,
    ) -> KeygateResult<AuthenticationOutcome> {
        self.start_authentication(request)
            .await
            .expect("authenticate callback delivered")
    }

    pub async fn remove_scene(&self, scene: SceneId) -> KeygateResult<SceneId> {
        let (callback, rx) = oneshot_callback();
        self.engine.remove_scene_key(scene, callback);
        rx.await.expect("remove_scene_key callback delivered")
    }

    /// Yield until the sensor has been prompted `calls` times
    pub async fn wait_for_prompt(&self, calls: usize) {
        wait_until(|| self.sensor.authenticate_calls() >= calls).await;
    }
}

/// Yield to the runtime until `condition` holds
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Records every observer callback as a short string
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl AuthenticationObserver for RecordingObserver {
    fn on_start(&self, scene: SceneId) {
        self.events.lock().push(format!("start:{scene}"));
    }

    fn on_help(&self, _scene: SceneId, _code: i32, message: &str) {
        self.events.lock().push(format!("help:{message}"));
    }

    fn on_failed_attempt(&self, _scene: SceneId, remaining: Option<u32>) {
        let remaining = remaining.map_or_else(|| "-".to_string(), |r| r.to_string());
        self.events.lock().push(format!("failed:{remaining}"));
    }

    fn on_success(&self, scene: SceneId) {
        self.events.lock().push(format!("success:{scene}"));
    }
}
