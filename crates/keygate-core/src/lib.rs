//! # Keygate Core
//!
//! Foundation types for the Keygate biometric authentication engine:
//!
//! - the error taxonomy every operation resolves to ([`errors`])
//! - scene identifiers and key-hierarchy records ([`types`])
//! - the export blob codec and the models decoded from it ([`export_blob`], [`models`])
//! - effect traits for the key store, biometric sensor, network collaborators,
//!   preference storage and clock ([`effects`])
//!
//! This crate holds no runtime state. Scheduling, key lifecycle and the
//! authentication protocol live in `keygate-engine`.

pub mod effects;
pub mod errors;
pub mod export_blob;
pub mod models;
pub mod types;

pub use errors::{ErrorCategory, ErrorCode, KeygateError, KeygateResult, ResultExt};
pub use export_blob::{ExportBlobError, ExportedKeyBlob};
pub use models::{PublicKeyModel, SignatureModel};
pub use types::{scene_key_name, KeyRecord, KeyStatus, KeyTier, SceneId};
