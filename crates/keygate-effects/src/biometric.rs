//! Biometric effect handlers
//!
//! Fallback implementation of BiometricEffects for platforms without a sensor.
//!
//! This handler implements the Null Object Pattern: it provides safe defaults
//! for environments where biometric authentication is unavailable (servers,
//! CI, headless systems, development machines without sensors).
//!
//! **For testing**: use `MockBiometricHandler` from keygate-testkit.
//! **For production with hardware**: implement platform-specific handlers.

use async_trait::async_trait;
use keygate_core::effects::{
    BiometricEffects, BiometricEvent, BiometricEventSender, BiometricFailure, BiometricRequest,
    BiometricType, CancelToken,
};

/// Fallback biometric handler for platforms without biometric hardware.
///
/// Every capability check returns false and every prompt terminates at once
/// with [`BiometricFailure::HardwareUnavailable`].
#[derive(Debug, Clone, Default)]
pub struct FallbackBiometricHandler {
    biometric_type: BiometricType,
}

impl FallbackBiometricHandler {
    /// Create a new fallback biometric handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a specific modality in capability queries
    pub fn with_type(biometric_type: BiometricType) -> Self {
        Self { biometric_type }
    }
}

#[async_trait]
impl BiometricEffects for FallbackBiometricHandler {
    async fn has_enrolled_biometric(&self) -> bool {
        false
    }

    async fn is_hardware_available(&self) -> bool {
        false
    }

    async fn authenticate(
        &self,
        request: BiometricRequest,
        _cancel: CancelToken,
        events: BiometricEventSender,
    ) {
        tracing::debug!(
            key = request.handle.key_name(),
            "Biometric prompt requested on a platform without a sensor"
        );
        let _ = events.send(BiometricEvent::Error(BiometricFailure::HardwareUnavailable));
    }

    async fn cancel(&self, _cancel: &CancelToken) {
        // No prompt is ever shown.
    }

    fn native_lockout(&self) -> Option<bool> {
        Some(false)
    }

    fn biometric_type(&self) -> BiometricType {
        self.biometric_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_core::effects::{KeyStoreError, SigningHandle};
    use tokio::sync::mpsc;

    #[derive(Debug)]
    struct NoopHandle;

    impl SigningHandle for NoopHandle {
        fn key_name(&self) -> &str {
            "noop"
        }

        fn update(&mut self, _data: &[u8]) -> Result<(), KeyStoreError> {
            Ok(())
        }

        fn sign(self: Box<Self>) -> Result<Vec<u8>, KeyStoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_fallback_reports_no_capability() {
        let handler = FallbackBiometricHandler::with_type(BiometricType::Face);
        let capability = handler.capability().await;
        assert!(!capability.is_usable());
        assert_eq!(capability.biometric_type, BiometricType::Face);
        assert!(capability.needs_local_lockout());
    }

    #[tokio::test]
    async fn test_fallback_prompt_fails_immediately() {
        let handler = FallbackBiometricHandler::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        handler
            .authenticate(
                BiometricRequest {
                    handle: Box::new(NoopHandle),
                    biometric_type: BiometricType::Fingerprint,
                    prompt: Default::default(),
                },
                CancelToken::new(),
                tx,
            )
            .await;
        assert!(matches!(
            rx.recv().await,
            Some(BiometricEvent::Error(BiometricFailure::HardwareUnavailable))
        ));
    }
}
