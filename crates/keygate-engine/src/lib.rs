//! # Keygate Engine
//!
//! Single-flight biometric authentication over a two-tier hardware key
//! hierarchy (one root key attesting N scene keys).
//!
//! ## Purpose
//!
//! - Task admission: deduplicates singleton operations and serializes every
//!   key-store and sensor call on one worker context
//! - Key lifecycle: generate, upload, validate and delete root and scene keys,
//!   with persisted status so interrupted generations are cleaned up
//! - Authentication: challenge, biometric-gated signing and upload/verify,
//!   with asynchronous cancellation and signature-invalid self-healing
//! - Anti-brute-force guard for sensors without a native lockout
//!
//! ## What Does NOT Belong Here
//!
//! - Effect traits and the export blob codec (keygate-core)
//! - Production effect handlers (keygate-effects)
//! - Mocks and stubs (keygate-testkit)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keygate_engine::{oneshot_callback, AuthenticateRequest, Engine, EngineConfig, InitRequest};
//!
//! let engine = Engine::builder(EngineConfig::default())
//!     .key_store(key_store)
//!     .biometric(sensor)
//!     .storage(storage)
//!     .build()?;
//!
//! let (callback, init) = oneshot_callback();
//! engine.init(InitRequest::new([SceneId(42)], "alice"), callback);
//! init.await??;
//!
//! let (callback, auth) = oneshot_callback();
//! engine.authenticate(AuthenticateRequest::new(SceneId(42)).with_challenge(nonce), callback);
//! let outcome = auth.await??;
//! ```

pub mod cancellation;
pub mod config;
mod context;
pub mod engine;
pub mod guard;
pub mod keys;
pub mod orchestrator;
pub mod persistence;
pub mod state;
pub mod task;
mod task_registry;

pub use cancellation::{CancelOutcome, CancellationBroker};
pub use config::{ConfigError, ConfigValidator, EngineConfig, ValidationError};
pub use engine::{oneshot_callback, Engine, EngineBuilder};
pub use guard::{AntiBruteForceGuard, GuardVerdict};
pub use keys::{KeyLifecycleManager, KeyValidity, PreparedKey};
pub use orchestrator::{AuthenticationObserver, AuthenticationOutcome, NoopObserver};
pub use persistence::PreferenceStore;
pub use state::{FreezeState, InitState, TaskId, NEVER_FROZEN};
pub use task::{
    AuthenticateRequest, InitOutcome, InitRequest, PrepareRootKeyRequest,
    PrepareSceneKeyRequest, TaskIdentity, TaskOutput, TaskState,
};

pub use keygate_core::effects::CancelToken;
pub use keygate_core::{ErrorCode, KeygateError, KeygateResult, SceneId};
