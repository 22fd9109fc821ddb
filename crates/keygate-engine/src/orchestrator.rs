//! Authentication orchestrator
//!
//! Drives one authentication through
//! `Init -> ValidatingPreconditions -> AwaitingChallenge -> Signing -> Uploading -> Done`.
//! Runs on the worker context, so it is the only code touching the key store
//! and the sensor while it is active.

use keygate_core::effects::{
    BiometricEvent, BiometricFailure, BiometricRequest, CancelToken, CancellationToken,
    KeyStoreError, SignatureUpload, SigningHandle,
};
use keygate_core::{ErrorCode, KeygateError, KeygateResult, SceneId, SignatureModel};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::cancellation::CancelOutcome;
use crate::context::EngineContext;
use crate::guard::{self, GuardVerdict};
use crate::task::AuthenticateRequest;

/// UI-facing progress callbacks of one authentication
pub trait AuthenticationObserver: Send + Sync {
    fn on_start(&self, _scene: SceneId) {}

    /// Transient sensor guidance
    fn on_help(&self, _scene: SceneId, _code: i32, _message: &str) {}

    /// A sample did not match. `remaining` is the number of attempts left
    /// before the local guard locks the sensor, when the guard is active.
    fn on_failed_attempt(&self, _scene: SceneId, _remaining: Option<u32>) {}

    fn on_success(&self, _scene: SceneId) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl AuthenticationObserver for NoopObserver {}

/// Successful authentication
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationOutcome {
    pub scene: SceneId,
    pub signature: SignatureModel,
    /// Whether a signature uploader verified the signature
    pub uploaded: bool,
}

enum AuthState {
    Init,
    ValidatingPreconditions,
    AwaitingChallenge {
        handle: Box<dyn SigningHandle>,
    },
    Signing {
        handle: Box<dyn SigningHandle>,
        challenge: String,
    },
    Uploading {
        signature: SignatureModel,
    },
    Done(KeygateResult<AuthenticationOutcome>),
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthState::Init => write!(f, "Init"),
            AuthState::ValidatingPreconditions => write!(f, "ValidatingPreconditions"),
            AuthState::AwaitingChallenge { .. } => write!(f, "AwaitingChallenge"),
            AuthState::Signing { .. } => write!(f, "Signing"),
            AuthState::Uploading { .. } => write!(f, "Uploading"),
            AuthState::Done(Ok(_)) => write!(f, "Done(ok)"),
            AuthState::Done(Err(e)) => write!(f, "Done({:?})", e.code),
        }
    }
}

pub(crate) struct AuthenticationOrchestrator<'a> {
    ctx: &'a EngineContext,
}

impl<'a> AuthenticationOrchestrator<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    pub async fn run(
        &self,
        req: AuthenticateRequest,
        token: CancelToken,
    ) -> KeygateResult<AuthenticationOutcome> {
        let scene = req.scene;
        let observer: Arc<dyn AuthenticationObserver> = req
            .observer
            .clone()
            .unwrap_or_else(|| Arc::new(NoopObserver));

        let mut state = AuthState::Init;
        loop {
            state = match state {
                AuthState::Init => {
                    observer.on_start(scene);
                    AuthState::ValidatingPreconditions
                }
                AuthState::ValidatingPreconditions => match self.validate(scene).await {
                    Ok(handle) => AuthState::AwaitingChallenge { handle },
                    Err(e) => AuthState::Done(Err(e)),
                },
                AuthState::AwaitingChallenge { handle } => {
                    match self.obtain_challenge(&req, &token).await {
                        Ok(challenge) => AuthState::Signing { handle, challenge },
                        Err(e) => AuthState::Done(Err(e)),
                    }
                }
                AuthState::Signing { handle, challenge } => {
                    match self
                        .sign(&req, handle, &challenge, &token, observer.as_ref())
                        .await
                    {
                        Ok(signature) => AuthState::Uploading { signature },
                        Err(e) => AuthState::Done(Err(e)),
                    }
                }
                AuthState::Uploading { signature } => {
                    AuthState::Done(self.upload(&req, signature).await)
                }
                AuthState::Done(result) => {
                    match &result {
                        Ok(outcome) => {
                            tracing::info!(%scene, uploaded = outcome.uploaded, "Authentication succeeded")
                        }
                        Err(e) => tracing::info!(%scene, code = ?e.code, error = %e, "Authentication failed"),
                    }
                    return result;
                }
            };
            tracing::trace!(%scene, ?state, "Authentication state");
        }
    }

    /// First failing precondition wins. On success returns the signing
    /// handle the validity probe acquired.
    async fn validate(&self, scene: SceneId) -> KeygateResult<Box<dyn SigningHandle>> {
        let ctx = self.ctx;
        let (supported, registered) = {
            let shared = ctx.shared.lock();
            let Some(init) = shared.init.as_ref() else {
                return Err(KeygateError::from_code(ErrorCode::NotInitialized));
            };
            (init.supported, init.scenes.contains(&scene))
        };
        if !supported {
            return Err(KeygateError::from_code(ErrorCode::DeviceUnsupported));
        }
        if !ctx.biometric.is_hardware_available().await {
            return Err(KeygateError::from_code(ErrorCode::SensorUnavailable));
        }
        if !registered {
            return Err(KeygateError::new(
                ErrorCode::SceneUnregistered,
                format!("scene {scene} was not registered at init"),
            ));
        }
        if !ctx.keys.is_root_valid().await? {
            return Err(KeygateError::from_code(ErrorCode::RootKeyAbsent));
        }

        let name = ctx.scene_key_name(scene)?;
        if !ctx.keys.has_scene_key(&name).await {
            return Err(KeygateError::from_code(ErrorCode::SceneKeyAbsent));
        }
        let handle = ctx.keys.acquire_signing_handle(&name).await?;

        if !ctx.biometric.has_enrolled_biometric().await {
            return Err(KeygateError::from_code(ErrorCode::NoBiometricEnrolled));
        }
        if guard::is_active(ctx.biometric.native_lockout()) && !ctx.guard.is_available().await? {
            return Err(KeygateError::new(
                ErrorCode::SensorLocked,
                "sensor frozen after repeated failures",
            ));
        }
        Ok(handle)
    }

    async fn obtain_challenge(
        &self,
        req: &AuthenticateRequest,
        token: &CancelToken,
    ) -> KeygateResult<String> {
        if let Some(challenge) = &req.challenge {
            return Ok(challenge.clone());
        }
        let Some(provider) = &req.challenge_provider else {
            return Err(KeygateError::invalid_parameter(
                "either a challenge or a challenge provider is required",
            ));
        };
        tokio::select! {
            biased;
            () = token.cancelled() => Err(KeygateError::cancelled("cancelled while fetching challenge")),
            fetched = provider.get_challenge() => match fetched {
                Ok(challenge) if !challenge.is_empty() => Ok(challenge),
                Ok(_) => Err(KeygateError::new(ErrorCode::GetChallengeFailed, "empty challenge")),
                Err(e) => Err(KeygateError::new(ErrorCode::GetChallengeFailed, e.to_string())),
            },
        }
    }

    async fn sign(
        &self,
        req: &AuthenticateRequest,
        handle: Box<dyn SigningHandle>,
        challenge: &str,
        token: &CancelToken,
        observer: &dyn AuthenticationObserver,
    ) -> KeygateResult<SignatureModel> {
        let ctx = self.ctx;
        let scene = req.scene;
        let guard_active = guard::is_active(ctx.biometric.native_lockout());
        let key_name = handle.key_name().to_string();
        if token.is_cancelled() {
            return Err(KeygateError::cancelled("cancelled before the prompt was shown"));
        }

        let (events_tx, mut events) = mpsc::unbounded_channel();
        ctx.biometric
            .authenticate(
                BiometricRequest {
                    handle,
                    biometric_type: ctx.biometric.biometric_type(),
                    prompt: req.prompt.clone(),
                },
                token.clone(),
                events_tx,
            )
            .await;

        loop {
            let event = tokio::select! {
                biased;
                () = token.cancelled() => {
                    let outcome = ctx.broker.await_confirmation(token, &mut events).await;
                    let message = match outcome {
                        CancelOutcome::Confirmed => "authentication cancelled",
                        CancelOutcome::TimedOut => "authentication cancelled; sensor did not confirm",
                    };
                    return Err(KeygateError::cancelled(message));
                }
                event = events.recv() => event,
            };

            let Some(event) = event else {
                return Err(KeygateError::new(
                    ErrorCode::AuthenticationFailed,
                    "sensor closed the session without a result",
                ));
            };

            match event {
                BiometricEvent::Help { code, message } => {
                    tracing::debug!(%scene, code, %message, "Sensor help");
                    observer.on_help(scene, code, &message);
                }
                BiometricEvent::FailedAttempt if guard_active => {
                    match ctx.guard.on_failed_attempt().await? {
                        GuardVerdict::Forward { remaining } => {
                            observer.on_failed_attempt(scene, Some(remaining));
                        }
                        GuardVerdict::Lockout => {
                            ctx.biometric.cancel(token).await;
                            return Err(KeygateError::new(
                                ErrorCode::SensorLocked,
                                "too many trials",
                            ));
                        }
                    }
                }
                BiometricEvent::FailedAttempt => observer.on_failed_attempt(scene, None),
                BiometricEvent::Error(failure) => return Err(failure_error(failure, token)),
                BiometricEvent::Succeeded { handle } => {
                    let signature = self.finalize(&key_name, handle, challenge).await?;
                    if guard_active {
                        ctx.guard.unfreeze().await?;
                    }
                    observer.on_success(scene);
                    return Ok(signature);
                }
            }
        }
    }

    async fn finalize(
        &self,
        key_name: &str,
        mut handle: Box<dyn SigningHandle>,
        challenge: &str,
    ) -> KeygateResult<SignatureModel> {
        let signed = handle
            .update(challenge.as_bytes())
            .and_then(|()| handle.sign());
        let bytes = match signed {
            Ok(bytes) => bytes,
            Err(KeyStoreError::Signature(reason)) => {
                tracing::warn!(key = %key_name, %reason, "Signature rejected, deleting scene key");
                if let Err(e) = self.ctx.keys.remove_scene(key_name).await {
                    tracing::warn!(key = %key_name, error = %e, "Failed to delete scene key");
                }
                return Err(KeygateError::new(ErrorCode::SignatureInvalid, reason));
            }
            Err(e) => return Err(e.into_keygate(ErrorCode::AuthenticationFailed)),
        };

        let model = SignatureModel::from_export(&bytes, self.ctx.config.signature_salt_len)?;
        if !model.challenge.is_empty() && model.challenge != challenge {
            return Err(KeygateError::new(
                ErrorCode::AuthenticationFailed,
                "signed challenge does not match the challenge sent",
            ));
        }
        Ok(model)
    }

    async fn upload(
        &self,
        req: &AuthenticateRequest,
        signature: SignatureModel,
    ) -> KeygateResult<AuthenticationOutcome> {
        let Some(uploader) = &req.uploader else {
            return Ok(AuthenticationOutcome {
                scene: req.scene,
                signature,
                uploaded: false,
            });
        };
        let upload = SignatureUpload {
            signature: signature.signature.clone(),
            json: signature.json.clone(),
            salt_len: signature.salt_len,
        };
        match uploader.upload_signature(&upload).await {
            Ok(true) => Ok(AuthenticationOutcome {
                scene: req.scene,
                signature,
                uploaded: true,
            }),
            Ok(false) => Err(KeygateError::new(
                ErrorCode::UploadOrVerifyFailed,
                "server rejected the signature",
            )),
            Err(e) => Err(KeygateError::new(
                ErrorCode::UploadOrVerifyFailed,
                e.to_string(),
            )),
        }
    }
}

/// Map a terminal sensor failure; a cancel confirms an engine cancel when one is pending
fn failure_error(failure: BiometricFailure, token: &CancelToken) -> KeygateError {
    match failure {
        BiometricFailure::Cancelled if token.is_cancelled() => {
            KeygateError::cancelled("authentication cancelled")
        }
        BiometricFailure::Cancelled => {
            KeygateError::new(ErrorCode::UserCancelled, "prompt dismissed by the user")
        }
        f if f.is_lockout() => KeygateError::new(ErrorCode::SensorLocked, f.to_string()),
        f => KeygateError::new(ErrorCode::AuthenticationFailed, f.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mapping() {
        let token = CancelToken::new();
        assert_eq!(
            failure_error(BiometricFailure::Cancelled, &token).code,
            ErrorCode::UserCancelled
        );
        assert_eq!(
            failure_error(BiometricFailure::LockoutPermanent, &token).code,
            ErrorCode::SensorLocked
        );
        assert_eq!(
            failure_error(BiometricFailure::HardwareUnavailable, &token).code,
            ErrorCode::AuthenticationFailed
        );

        token.cancel();
        assert_eq!(
            failure_error(BiometricFailure::Cancelled, &token).code,
            ErrorCode::Cancelled
        );
    }

    #[test]
    fn test_state_debug_hides_handles() {
        let state = AuthState::Done(Err(KeygateError::from_code(ErrorCode::SensorLocked)));
        assert_eq!(format!("{state:?}"), "Done(SensorLocked)");
    }
}
