//! # Keygate Effects
//!
//! Stateless effect handlers for production and for platforms lacking the
//! relevant hardware.
//!
//! - [`FilesystemStorageHandler`]: preference storage on disk
//! - [`RealTimeHandler`]: system clock and tokio timers
//! - [`FallbackBiometricHandler`]: no sensor present
//! - [`UnsupportedKeyStoreHandler`]: no secure key store present
//!
//! Stateful mocks for tests live in `keygate-testkit`.

pub mod biometric;
pub mod keystore;
pub mod storage;
pub mod time;

pub use biometric::FallbackBiometricHandler;
pub use keystore::UnsupportedKeyStoreHandler;
pub use storage::FilesystemStorageHandler;
pub use time::RealTimeHandler;
