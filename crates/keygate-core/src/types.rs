//! Shared identifiers and key-hierarchy records

use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller-defined identifier for one authentication use case (e.g. payment)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(pub u32);

impl SceneId {
    /// Create a scene identifier
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw value
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SceneId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Position of a key in the two-tier hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyTier {
    /// Application-wide anchor key
    Root,
    /// Biometric-gated signing key scoped to one scene
    Scene,
}

/// Persisted lifecycle status of a key.
///
/// Anything other than `Normal` observed at startup marks a key orphaned by
/// an abnormal termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Normal,
    Generating,
    GeneratedNotUploaded,
}

impl KeyStatus {
    /// Whether a key carrying this status must be cleaned up at startup
    pub fn is_abandoned(self) -> bool {
        !matches!(self, KeyStatus::Normal)
    }
}

/// A named key plus its persisted status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Key-store alias
    pub name: String,
    /// Hierarchy tier
    pub tier: KeyTier,
    /// Lifecycle status
    pub status: KeyStatus,
}

impl KeyRecord {
    /// Create a record
    pub fn new(name: impl Into<String>, tier: KeyTier, status: KeyStatus) -> Self {
        Self {
            name: name.into(),
            tier,
            status,
        }
    }
}

/// Derive the key-store alias of a scene key.
///
/// The salt distinguishes accounts sharing one device; the prefix separates
/// applications sharing one key store.
pub fn scene_key_name(prefix: &str, salt: &str, scene: SceneId) -> String {
    format!("{prefix}{salt}_{scene}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_key_name_is_distinct_per_salt_and_scene() {
        let a = scene_key_name("kg_auth_", "alice", SceneId(42));
        let b = scene_key_name("kg_auth_", "bob", SceneId(42));
        let c = scene_key_name("kg_auth_", "alice", SceneId(7));
        assert_eq!(a, "kg_auth_alice_42");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_only_normal_status_survives_startup() {
        assert!(!KeyStatus::Normal.is_abandoned());
        assert!(KeyStatus::Generating.is_abandoned());
        assert!(KeyStatus::GeneratedNotUploaded.is_abandoned());
    }

    #[test]
    fn test_key_record_json_shape() {
        let record = KeyRecord::new("root", KeyTier::Root, KeyStatus::GeneratedNotUploaded);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(
            json,
            r#"{"name":"root","tier":"root","status":"generated_not_uploaded"}"#
        );
    }
}
