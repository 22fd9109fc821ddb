//! Keygate Testing Infrastructure
//!
//! Stateful effect handlers for tests. Production and fallback handlers are
//! stateless and live in `keygate-effects`; anything here keeps shared
//! mutable state so tests can script behavior and inspect what happened.
//!
//! ```rust,ignore
//! use keygate_testkit::*;
//!
//! #[tokio::test]
//! async fn my_test() {
//!     init_test_tracing();
//!     let key_store = MockKeyStore::new("device-1");
//!     let sensor = MockBiometricHandler::new();
//!     sensor.push_behavior(SensorBehavior::Succeed);
//!     // build an engine with these handlers...
//! }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod biometric;
pub mod blob;
pub mod keystore;
pub mod logging;
pub mod network;
pub mod storage;
pub mod time;

pub use biometric::{MockBiometricHandler, ScriptStep, SensorBehavior};
pub use blob::encode_export_blob;
pub use keystore::MockKeyStore;
pub use logging::init_test_tracing;
pub use network::{
    StubChallengeProvider, StubKeyUploader, StubSignatureUploader, StubSupportProvider,
};
pub use storage::MemoryStorageHandler;
pub use time::SimulatedTimeHandler;
