//! Engine tasks
//!
//! Every caller operation is one [`Task`] variant. A task carries its
//! request, knows its [`TaskIdentity`] for deduplication, can fail fast in
//! [`Task::preflight`] without touching hardware, and is executed by
//! [`Task::run`] on the worker context.

use keygate_core::effects::{
    CancelToken, CancellationToken, ChallengeProvider, KeyUploader, PromptText,
    SignatureUploader, SupportProvider,
};
use keygate_core::{ErrorCode, KeygateError, KeygateResult, SceneId};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::config::is_alias_safe;
use crate::context::EngineContext;
use crate::keys::PreparedKey;
use crate::orchestrator::{
    AuthenticationObserver, AuthenticationOrchestrator, AuthenticationOutcome,
};
use crate::state::{InitState, SharedState};

/// Deduplication tag of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskIdentity {
    Init,
    PrepareRootKey,
    PrepareSceneKey(SceneId),
    Authenticate(SceneId),
    RemoveSceneKey(SceneId),
}

impl TaskIdentity {
    /// Whether at most one task with this identity may be active
    pub fn is_singleton(&self) -> bool {
        !matches!(self, TaskIdentity::RemoveSceneKey(_))
    }

    /// Scene the task is bound to, if any
    pub fn scene(&self) -> Option<SceneId> {
        match self {
            TaskIdentity::PrepareSceneKey(scene)
            | TaskIdentity::Authenticate(scene)
            | TaskIdentity::RemoveSceneKey(scene) => Some(*scene),
            TaskIdentity::Init | TaskIdentity::PrepareRootKey => None,
        }
    }
}

impl fmt::Display for TaskIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskIdentity::Init => write!(f, "init"),
            TaskIdentity::PrepareRootKey => write!(f, "prepare_root_key"),
            TaskIdentity::PrepareSceneKey(scene) => write!(f, "prepare_scene_key({scene})"),
            TaskIdentity::Authenticate(scene) => write!(f, "authenticate({scene})"),
            TaskIdentity::RemoveSceneKey(scene) => write!(f, "remove_scene_key({scene})"),
        }
    }
}

/// Lifecycle of an admitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskState {
    Created,
    Queued,
    Running,
    Done,
}

/// Initialize the engine for one account
#[derive(Clone, Default)]
pub struct InitRequest {
    /// Scenes that may prepare keys and authenticate
    pub scenes: Vec<SceneId>,
    /// Account salt mixed into scene key aliases
    pub salt: String,
    /// Server-side support verdict; the device decides alone when absent
    pub support: Option<Arc<dyn SupportProvider>>,
}

impl InitRequest {
    pub fn new(scenes: impl IntoIterator<Item = SceneId>, salt: impl Into<String>) -> Self {
        Self {
            scenes: scenes.into_iter().collect(),
            salt: salt.into(),
            support: None,
        }
    }

    pub fn with_support(mut self, support: Arc<dyn SupportProvider>) -> Self {
        self.support = Some(support);
        self
    }
}

/// Generate (and optionally upload) the root key
#[derive(Clone, Default)]
pub struct PrepareRootKeyRequest {
    /// Replace a valid existing root key
    pub force: bool,
    pub uploader: Option<Arc<dyn KeyUploader>>,
}

/// Generate (and optionally upload) a scene key
#[derive(Clone)]
pub struct PrepareSceneKeyRequest {
    pub scene: SceneId,
    /// Replace a valid existing scene key
    pub force: bool,
    /// Generate the root key first when it is missing
    pub auto_create_root: bool,
    pub uploader: Option<Arc<dyn KeyUploader>>,
    /// Uploader for an automatically created root key
    pub root_uploader: Option<Arc<dyn KeyUploader>>,
}

impl PrepareSceneKeyRequest {
    pub fn new(scene: SceneId) -> Self {
        Self {
            scene,
            force: false,
            auto_create_root: false,
            uploader: None,
            root_uploader: None,
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn KeyUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn auto_create_root(mut self, root_uploader: Option<Arc<dyn KeyUploader>>) -> Self {
        self.auto_create_root = true;
        self.root_uploader = root_uploader;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Sign a challenge with a scene key after a biometric match
#[derive(Clone)]
pub struct AuthenticateRequest {
    pub scene: SceneId,
    /// Challenge to sign; fetched from `challenge_provider` when absent
    pub challenge: Option<String>,
    pub challenge_provider: Option<Arc<dyn ChallengeProvider>>,
    /// Signature verifier; the raw signature is returned when absent
    pub uploader: Option<Arc<dyn SignatureUploader>>,
    /// Fires to cancel this authentication
    pub cancel: CancelToken,
    pub observer: Option<Arc<dyn AuthenticationObserver>>,
    pub prompt: PromptText,
}

impl AuthenticateRequest {
    pub fn new(scene: SceneId) -> Self {
        Self {
            scene,
            challenge: None,
            challenge_provider: None,
            uploader: None,
            cancel: CancelToken::new(),
            observer: None,
            prompt: PromptText::default(),
        }
    }

    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    pub fn with_challenge_provider(mut self, provider: Arc<dyn ChallengeProvider>) -> Self {
        self.challenge_provider = Some(provider);
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn SignatureUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn AuthenticationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of a successful init
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    pub supported: bool,
    /// Keys deleted because a previous generation never finished
    pub abandoned_keys_removed: usize,
    /// The engine was already initialized; nothing was done
    pub already_initialized: bool,
}

/// Successful result of any task
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutput {
    Initialized(InitOutcome),
    RootKey(PreparedKey),
    SceneKey(PreparedKey),
    Authenticated(AuthenticationOutcome),
    SceneKeyRemoved(SceneId),
}

/// One unit of work for the admission controller
pub enum Task {
    Init(InitRequest),
    PrepareRootKey(PrepareRootKeyRequest),
    PrepareSceneKey(PrepareSceneKeyRequest),
    Authenticate(AuthenticateRequest),
    RemoveSceneKey(SceneId),
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Task").field(&self.identity()).finish()
    }
}

impl Task {
    pub fn identity(&self) -> TaskIdentity {
        match self {
            Task::Init(_) => TaskIdentity::Init,
            Task::PrepareRootKey(_) => TaskIdentity::PrepareRootKey,
            Task::PrepareSceneKey(req) => TaskIdentity::PrepareSceneKey(req.scene),
            Task::Authenticate(req) => TaskIdentity::Authenticate(req.scene),
            Task::RemoveSceneKey(scene) => TaskIdentity::RemoveSceneKey(*scene),
        }
    }

    /// Token that cancels this task; authentications use the caller's
    pub fn cancel_token(&self) -> CancelToken {
        match self {
            Task::Authenticate(req) => req.cancel.clone(),
            _ => CancelToken::new(),
        }
    }

    /// Resolve the task without running it, when the outcome is already known.
    ///
    /// Runs under the shared-state lock and never touches hardware.
    pub(crate) fn preflight(&self, shared: &SharedState) -> Option<KeygateResult<TaskOutput>> {
        if let Task::Init(req) = self {
            return match &shared.init {
                Some(init) if init.supported => Some(Ok(TaskOutput::Initialized(InitOutcome {
                    supported: true,
                    abandoned_keys_removed: 0,
                    already_initialized: true,
                }))),
                Some(_) => Some(Err(KeygateError::from_code(ErrorCode::DeviceUnsupported))),
                None => validate_init(req).err().map(Err),
            };
        }

        let Some(init) = &shared.init else {
            return Some(Err(KeygateError::from_code(ErrorCode::NotInitialized)));
        };
        if !init.supported {
            return Some(Err(KeygateError::from_code(ErrorCode::DeviceUnsupported)));
        }

        match self {
            Task::PrepareSceneKey(PrepareSceneKeyRequest { scene, .. })
            | Task::RemoveSceneKey(scene)
                if !init.scenes.contains(scene) =>
            {
                Some(Err(unregistered(*scene)))
            }
            Task::Authenticate(req) => {
                if req.cancel.is_cancelled() {
                    return Some(Err(KeygateError::cancelled(
                        "authentication cancelled before admission",
                    )));
                }
                match (&req.challenge, &req.challenge_provider) {
                    (None, None) => Some(Err(KeygateError::invalid_parameter(
                        "either a challenge or a challenge provider is required",
                    ))),
                    (Some(challenge), _) if challenge.is_empty() => Some(Err(
                        KeygateError::invalid_parameter("challenge must not be empty"),
                    )),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Execute the task body on the worker context
    pub(crate) async fn run(
        self,
        ctx: &EngineContext,
        token: CancelToken,
    ) -> KeygateResult<TaskOutput> {
        if token.is_cancelled() {
            return Err(KeygateError::cancelled("task cancelled before it started"));
        }
        match self {
            Task::Init(req) => run_init(ctx, req).await.map(TaskOutput::Initialized),
            Task::PrepareRootKey(req) => ctx
                .keys
                .generate_root(req.force, req.uploader)
                .await
                .map(TaskOutput::RootKey),
            Task::PrepareSceneKey(req) => {
                let name = ctx.scene_key_name(req.scene)?;
                ctx.keys
                    .generate_scene(
                        &name,
                        req.force,
                        req.auto_create_root,
                        req.uploader,
                        req.root_uploader,
                    )
                    .await
                    .map(TaskOutput::SceneKey)
            }
            Task::Authenticate(req) => AuthenticationOrchestrator::new(ctx)
                .run(req, token)
                .await
                .map(TaskOutput::Authenticated),
            Task::RemoveSceneKey(scene) => {
                let name = ctx.scene_key_name(scene)?;
                ctx.keys.remove_scene(&name).await?;
                Ok(TaskOutput::SceneKeyRemoved(scene))
            }
        }
    }
}

fn unregistered(scene: SceneId) -> KeygateError {
    KeygateError::new(
        ErrorCode::SceneUnregistered,
        format!("scene {scene} was not registered at init"),
    )
}

fn validate_init(req: &InitRequest) -> KeygateResult<()> {
    if req.salt.is_empty() || !is_alias_safe(&req.salt) {
        return Err(KeygateError::invalid_parameter(
            "salt must be non-empty ASCII letters, digits, '_' or '-'",
        ));
    }
    Ok(())
}

async fn run_init(ctx: &EngineContext, req: InitRequest) -> KeygateResult<InitOutcome> {
    ctx.guard.load().await?;

    let fingerprint = ctx.key_store.device_fingerprint();
    let local = ctx.key_store.is_supported();
    let abandoned_keys_removed = if local {
        ctx.keys.cleanup_abandoned().await?
    } else {
        0
    };

    let supported = match (local, &req.support) {
        (false, _) => false,
        (true, None) => true,
        (true, Some(provider)) => resolve_support(ctx, provider.as_ref(), &fingerprint).await?,
    };

    let scenes: BTreeSet<SceneId> = req.scenes.iter().copied().collect();
    tracing::info!(
        supported,
        scenes = scenes.len(),
        abandoned_keys_removed,
        "Engine initialized"
    );
    ctx.shared.lock().init = Some(InitState {
        supported,
        scenes,
        salt: req.salt,
        device_fingerprint: fingerprint,
    });

    if !supported {
        return Err(KeygateError::from_code(ErrorCode::DeviceUnsupported));
    }
    Ok(InitOutcome {
        supported,
        abandoned_keys_removed,
        already_initialized: false,
    })
}

/// Ask the server, falling back to the last cached verdict
async fn resolve_support(
    ctx: &EngineContext,
    provider: &dyn SupportProvider,
    fingerprint: &str,
) -> KeygateResult<bool> {
    match provider.get_support(fingerprint).await {
        Ok(verdict) => {
            ctx.prefs.save_support(fingerprint, verdict).await?;
            Ok(verdict)
        }
        Err(e) => match ctx.prefs.load_support(fingerprint).await? {
            Some(cached) => {
                tracing::warn!(error = %e, cached, "Support query failed, using cached verdict");
                Ok(cached)
            }
            None => Err(KeygateError::new(ErrorCode::GetSupportFailed, e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized(supported: bool) -> SharedState {
        SharedState {
            init: Some(InitState {
                supported,
                scenes: [SceneId(42)].into_iter().collect(),
                salt: "alice".to_string(),
                device_fingerprint: "fp".to_string(),
            }),
            ..SharedState::default()
        }
    }

    fn code(result: Option<KeygateResult<TaskOutput>>) -> Option<ErrorCode> {
        result.and_then(|r| r.err()).map(|e| e.code)
    }

    #[test]
    fn test_singleton_flags() {
        assert!(TaskIdentity::Init.is_singleton());
        assert!(TaskIdentity::PrepareRootKey.is_singleton());
        assert!(TaskIdentity::PrepareSceneKey(SceneId(1)).is_singleton());
        assert!(TaskIdentity::Authenticate(SceneId(1)).is_singleton());
        assert!(!TaskIdentity::RemoveSceneKey(SceneId(1)).is_singleton());
    }

    #[test]
    fn test_preflight_requires_init() {
        let task = Task::PrepareRootKey(PrepareRootKeyRequest::default());
        assert_eq!(
            code(task.preflight(&SharedState::default())),
            Some(ErrorCode::NotInitialized)
        );
    }

    #[test]
    fn test_preflight_rejects_unsupported_device() {
        let task = Task::PrepareRootKey(PrepareRootKeyRequest::default());
        assert_eq!(
            code(task.preflight(&initialized(false))),
            Some(ErrorCode::DeviceUnsupported)
        );
    }

    #[test]
    fn test_preflight_scene_registration() {
        let shared = initialized(true);
        let task = Task::PrepareSceneKey(PrepareSceneKeyRequest::new(SceneId(7)));
        assert_eq!(
            code(task.preflight(&shared)),
            Some(ErrorCode::SceneUnregistered)
        );
        let task = Task::PrepareSceneKey(PrepareSceneKeyRequest::new(SceneId(42)));
        assert!(task.preflight(&shared).is_none());
    }

    #[test]
    fn test_preflight_authentication_parameters() {
        let shared = initialized(true);
        let task = Task::Authenticate(AuthenticateRequest::new(SceneId(42)));
        assert_eq!(
            code(task.preflight(&shared)),
            Some(ErrorCode::InvalidParameter)
        );

        let task = Task::Authenticate(AuthenticateRequest::new(SceneId(42)).with_challenge(""));
        assert_eq!(
            code(task.preflight(&shared)),
            Some(ErrorCode::InvalidParameter)
        );

        let cancel = CancelToken::new();
        cancel.cancel();
        let task = Task::Authenticate(
            AuthenticateRequest::new(SceneId(42))
                .with_challenge("n")
                .with_cancel(cancel),
        );
        assert_eq!(code(task.preflight(&shared)), Some(ErrorCode::Cancelled));
    }

    #[test]
    fn test_repeated_init_resolves_in_preflight() {
        let task = Task::Init(InitRequest::new([SceneId(1)], "alice"));
        assert!(task.preflight(&SharedState::default()).is_none());
        match task.preflight(&initialized(true)) {
            Some(Ok(TaskOutput::Initialized(outcome))) => assert!(outcome.already_initialized),
            other => panic!("unexpected preflight result: {other:?}"),
        }
    }

    #[test]
    fn test_init_rejects_unsafe_salt() {
        let task = Task::Init(InitRequest::new([SceneId(1)], "../x"));
        assert_eq!(
            code(task.preflight(&SharedState::default())),
            Some(ErrorCode::InvalidParameter)
        );
    }
}
