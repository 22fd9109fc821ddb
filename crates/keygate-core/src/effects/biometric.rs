//! Biometric Authentication Effects Trait Definitions
//!
//! This module defines the interface to the platform biometric sensor and its
//! native prompt (fingerprint readers, face unlock).
//!
//! # Effect Classification
//!
//! - **Category**: Infrastructure Effect
//! - **Implementation**: `keygate-effects` (fallback), platform crates (real sensors)
//! - **Usage**: Unlocking scene-key signing handles during authentication
//!
//! ## Event model
//!
//! [`BiometricEffects::authenticate`] starts a prompt and returns. The sensor
//! then reports through the supplied [`BiometricEventSender`]:
//!
//! - `Help` and `FailedAttempt` are transient and may repeat
//! - exactly one of `Succeeded` or `Error` terminates the session
//!
//! A successful session hands the (now unlocked) signing handle back to the
//! caller inside the `Succeeded` event.
//!
//! ## Cancellation
//!
//! [`BiometricEffects::cancel`] may cross a process boundary. Confirmation
//! arrives as an `Error(Cancelled)` event, possibly late, possibly never.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

use crate::effects::keystore::SigningHandle;
use crate::effects::task::CancelToken;

/// Types of biometric authentication supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BiometricType {
    /// Fingerprint recognition
    #[default]
    Fingerprint,
    /// Face recognition
    Face,
}

impl BiometricType {
    /// Get human-readable name for the biometric type
    pub fn display_name(&self) -> &'static str {
        match self {
            BiometricType::Fingerprint => "Fingerprint",
            BiometricType::Face => "Face",
        }
    }
}

/// Information about the sensor on this device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricCapability {
    /// Modality of the sensor
    pub biometric_type: BiometricType,
    /// Whether sensor hardware is present
    pub hardware_present: bool,
    /// Whether biometric data is enrolled
    pub enrolled: bool,
    /// `Some(true)` when the platform enforces its own lockout after
    /// repeated failures; `None` when the platform does not say
    pub native_lockout: Option<bool>,
}

impl BiometricCapability {
    /// Check if this biometric can be used for authentication
    pub fn is_usable(&self) -> bool {
        self.hardware_present && self.enrolled
    }

    /// Whether a local anti-brute-force policy has to stand in for the platform
    pub fn needs_local_lockout(&self) -> bool {
        self.native_lockout != Some(true)
    }
}

/// Text shown by the native prompt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptText {
    /// Title line
    pub title: String,
    /// Optional secondary line
    pub subtitle: Option<String>,
    /// Label of the negative button
    pub negative_button: String,
}

impl Default for PromptText {
    fn default() -> Self {
        Self {
            title: "Verify your identity".to_string(),
            subtitle: None,
            negative_button: "Cancel".to_string(),
        }
    }
}

/// A request to unlock a signing handle with a biometric
#[derive(Debug)]
pub struct BiometricRequest {
    /// Handle to unlock; returned in [`BiometricEvent::Succeeded`]
    pub handle: Box<dyn SigningHandle>,
    /// Modality to prompt for
    pub biometric_type: BiometricType,
    /// Prompt text
    pub prompt: PromptText,
}

/// Terminal failure reported by the sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BiometricFailure {
    /// The prompt was dismissed, by the user or by a cancel request
    Cancelled,
    /// Too many attempts; temporarily locked
    Lockout,
    /// Too many attempts; locked until the device credential is entered
    LockoutPermanent,
    /// Sensor disappeared or is busy
    HardwareUnavailable,
    /// Any other platform error
    Other {
        /// Platform error code
        code: i32,
        /// Platform error message
        message: String,
    },
}

impl BiometricFailure {
    /// Whether the failure is a lockout of either kind
    pub fn is_lockout(&self) -> bool {
        matches!(
            self,
            BiometricFailure::Lockout | BiometricFailure::LockoutPermanent
        )
    }
}

impl fmt::Display for BiometricFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BiometricFailure::Cancelled => write!(f, "cancelled"),
            BiometricFailure::Lockout => write!(f, "locked out"),
            BiometricFailure::LockoutPermanent => write!(f, "locked out permanently"),
            BiometricFailure::HardwareUnavailable => write!(f, "hardware unavailable"),
            BiometricFailure::Other { code, message } => write!(f, "error {code}: {message}"),
        }
    }
}

/// Events produced by a running biometric session
#[derive(Debug)]
pub enum BiometricEvent {
    /// Transient guidance for the UI ("move finger slightly")
    Help {
        /// Platform help code
        code: i32,
        /// Guidance text
        message: String,
    },
    /// A sample was read but did not match
    FailedAttempt,
    /// Terminal failure
    Error(BiometricFailure),
    /// Terminal success; carries the unlocked handle
    Succeeded {
        /// The unlocked signing handle
        handle: Box<dyn SigningHandle>,
    },
}

impl BiometricEvent {
    /// Whether this event ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BiometricEvent::Error(_) | BiometricEvent::Succeeded { .. }
        )
    }
}

/// Channel the sensor reports on
pub type BiometricEventSender = mpsc::UnboundedSender<BiometricEvent>;

/// Receiving half handed to the orchestrator
pub type BiometricEventReceiver = mpsc::UnboundedReceiver<BiometricEvent>;

/// Biometric effects interface
///
/// # Implementation Notes
///
/// - Production: interface with platform prompt APIs
/// - Fallback: `keygate_effects::FallbackBiometricHandler` reports no hardware
/// - Testing: `keygate_testkit::MockBiometricHandler` replays scripted events
#[async_trait]
pub trait BiometricEffects: Send + Sync {
    /// Whether at least one biometric is enrolled
    async fn has_enrolled_biometric(&self) -> bool;

    /// Whether sensor hardware is present and usable
    async fn is_hardware_available(&self) -> bool;

    /// Start a prompt; events arrive through `events`
    async fn authenticate(
        &self,
        request: BiometricRequest,
        cancel: CancelToken,
        events: BiometricEventSender,
    );

    /// Ask the sensor to dismiss the prompt started with `cancel`
    async fn cancel(&self, cancel: &CancelToken);

    /// Whether the platform enforces lockout itself; `None` if it cannot say
    fn native_lockout(&self) -> Option<bool> {
        None
    }

    /// Modality this handler drives
    fn biometric_type(&self) -> BiometricType {
        BiometricType::Fingerprint
    }

    /// Summarize the sensor's current state
    async fn capability(&self) -> BiometricCapability {
        BiometricCapability {
            biometric_type: self.biometric_type(),
            hardware_present: self.is_hardware_available().await,
            enrolled: self.has_enrolled_biometric().await,
            native_lockout: self.native_lockout(),
        }
    }
}
