//! Scripted biometric sensor
//!
//! Each `authenticate` call consumes the next queued [`SensorBehavior`]
//! (falling back to the default behavior) and plays it on a spawned task,
//! the way a platform prompt reports asynchronously after the call returns.

use async_trait::async_trait;
use keygate_core::effects::{
    BiometricEffects, BiometricEvent, BiometricEventSender, BiometricFailure, BiometricRequest,
    BiometricType, CancelToken, CancellationToken,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// One step of a scripted prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Emit a help message
    Help(String),
    /// Emit a non-matching sample
    FailedAttempt,
    /// Wait before the next step (real time)
    Wait(u64),
    /// Terminal failure
    Fail(BiometricFailure),
    /// Terminal success, returning the unlocked handle
    Succeed,
}

/// What the sensor does for one prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorBehavior {
    /// Match on the first sample
    Succeed,
    /// Fail immediately
    Fail(BiometricFailure),
    /// Play the steps; without a terminal step, wait for a cancel and confirm it
    Script(Vec<ScriptStep>),
    /// Never emit anything, not even a cancel confirmation
    Silent,
}

impl SensorBehavior {
    fn steps(&self) -> Vec<ScriptStep> {
        match self {
            SensorBehavior::Succeed => vec![ScriptStep::Succeed],
            SensorBehavior::Fail(failure) => vec![ScriptStep::Fail(failure.clone())],
            SensorBehavior::Script(steps) => steps.clone(),
            SensorBehavior::Silent => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Session {
    events: BiometricEventSender,
    confirms_cancel: bool,
}

#[derive(Debug)]
struct SensorState {
    hardware_available: bool,
    enrolled: bool,
    native_lockout: Option<bool>,
    biometric_type: BiometricType,
    queue: VecDeque<SensorBehavior>,
    default_behavior: SensorBehavior,
    sessions: HashMap<Uuid, Session>,
    in_flight: usize,
    max_in_flight: usize,
    authenticate_calls: usize,
    cancel_calls: usize,
}

impl SensorState {
    fn finish(&mut self, id: Uuid) {
        if self.sessions.remove(&id).is_some() {
            self.in_flight = self.in_flight.saturating_sub(1);
        }
    }
}

/// Mock biometric handler with scripted prompts
#[derive(Debug, Clone)]
pub struct MockBiometricHandler {
    state: Arc<Mutex<SensorState>>,
}

impl Default for MockBiometricHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBiometricHandler {
    /// Enrolled fingerprint sensor without native lockout that always matches
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SensorState {
                hardware_available: true,
                enrolled: true,
                native_lockout: None,
                biometric_type: BiometricType::Fingerprint,
                queue: VecDeque::new(),
                default_behavior: SensorBehavior::Succeed,
                sessions: HashMap::new(),
                in_flight: 0,
                max_in_flight: 0,
                authenticate_calls: 0,
                cancel_calls: 0,
            })),
        }
    }

    /// Queue the behavior for the next prompt
    pub fn push_behavior(&self, behavior: SensorBehavior) {
        self.state.lock().queue.push_back(behavior);
    }

    /// Behavior used once the queue is empty
    pub fn set_default_behavior(&self, behavior: SensorBehavior) {
        self.state.lock().default_behavior = behavior;
    }

    pub fn set_hardware_available(&self, available: bool) {
        self.state.lock().hardware_available = available;
    }

    pub fn set_enrolled(&self, enrolled: bool) {
        self.state.lock().enrolled = enrolled;
    }

    pub fn set_native_lockout(&self, native: Option<bool>) {
        self.state.lock().native_lockout = native;
    }

    pub fn set_biometric_type(&self, biometric_type: BiometricType) {
        self.state.lock().biometric_type = biometric_type;
    }

    /// Highest number of prompts that were open at the same time
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    /// Prompts currently open
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    pub fn authenticate_calls(&self) -> usize {
        self.state.lock().authenticate_calls
    }

    pub fn cancel_calls(&self) -> usize {
        self.state.lock().cancel_calls
    }

    async fn play(
        state: Arc<Mutex<SensorState>>,
        id: Uuid,
        request: BiometricRequest,
        cancel: CancelToken,
        events: BiometricEventSender,
        steps: Vec<ScriptStep>,
    ) {
        let mut handle = Some(request.handle);
        for step in steps {
            if cancel.is_cancelled() {
                return;
            }
            let event = match step {
                ScriptStep::Wait(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    continue;
                }
                ScriptStep::Help(message) => BiometricEvent::Help { code: 1, message },
                ScriptStep::FailedAttempt => BiometricEvent::FailedAttempt,
                ScriptStep::Fail(failure) => BiometricEvent::Error(failure),
                ScriptStep::Succeed => match handle.take() {
                    Some(handle) => BiometricEvent::Succeeded { handle },
                    None => continue,
                },
            };
            let terminal = event.is_terminal();
            // The receiver is gone once the engine resolved the session.
            if events.send(event).is_err() || terminal {
                state.lock().finish(id);
                return;
            }
        }
    }
}

#[async_trait]
impl BiometricEffects for MockBiometricHandler {
    async fn has_enrolled_biometric(&self) -> bool {
        self.state.lock().enrolled
    }

    async fn is_hardware_available(&self) -> bool {
        self.state.lock().hardware_available
    }

    async fn authenticate(
        &self,
        request: BiometricRequest,
        cancel: CancelToken,
        events: BiometricEventSender,
    ) {
        let steps = {
            let mut state = self.state.lock();
            let behavior = match state.queue.pop_front() {
                Some(behavior) => behavior,
                None => state.default_behavior.clone(),
            };
            state.authenticate_calls += 1;
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.sessions.insert(
                cancel.id(),
                Session {
                    events: events.clone(),
                    confirms_cancel: behavior != SensorBehavior::Silent,
                },
            );
            behavior.steps()
        };
        tracing::debug!(key = request.handle.key_name(), "Mock prompt shown");

        let state = self.state.clone();
        let id = cancel.id();
        tokio::spawn(Self::play(state, id, request, cancel, events, steps));
    }

    async fn cancel(&self, cancel: &CancelToken) {
        let mut state = self.state.lock();
        state.cancel_calls += 1;
        let Some(session) = state.sessions.get(&cancel.id()) else {
            return;
        };
        if session.confirms_cancel {
            let _ = session
                .events
                .send(BiometricEvent::Error(BiometricFailure::Cancelled));
        }
        state.finish(cancel.id());
    }

    fn native_lockout(&self) -> Option<bool> {
        self.state.lock().native_lockout
    }

    fn biometric_type(&self) -> BiometricType {
        self.state.lock().biometric_type
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

    fn request() -> BiometricRequest {
        BiometricRequest {
            handle: Box::new(NoopHandle),
            biometric_type: BiometricType::Fingerprint,
            prompt: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_script_plays_in_order() {
        let sensor = MockBiometricHandler::new();
        sensor.push_behavior(SensorBehavior::Script(vec![
            ScriptStep::Help("move finger".into()),
            ScriptStep::FailedAttempt,
            ScriptStep::Succeed,
        ]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        sensor.authenticate(request(), CancelToken::new(), tx).await;

        assert!(matches!(rx.recv().await, Some(BiometricEvent::Help { .. })));
        assert!(matches!(rx.recv().await, Some(BiometricEvent::FailedAttempt)));
        assert!(matches!(
            rx.recv().await,
            Some(BiometricEvent::Succeeded { .. })
        ));
        tokio::task::yield_now().await;
        assert_eq!(sensor.in_flight(), 0);
        assert_eq!(sensor.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_open_script_confirms_cancel() {
        let sensor = MockBiometricHandler::new();
        sensor.push_behavior(SensorBehavior::Script(Vec::new()));
        let token = CancelToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sensor.authenticate(request(), token.clone(), tx).await;

        token.cancel();
        sensor.cancel(&token).await;
        assert!(matches!(
            rx.recv().await,
            Some(BiometricEvent::Error(BiometricFailure::Cancelled))
        ));
        assert_eq!(sensor.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_silent_sensor_ignores_cancel() {
        let sensor = MockBiometricHandler::new();
        sensor.set_default_behavior(SensorBehavior::Silent);
        let token = CancelToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        sensor.authenticate(request(), token.clone(), tx).await;

        sensor.cancel(&token).await;
        assert!(rx.try_recv().is_err());
    }
}
