//! Cancellation broker
//!
//! Cancels are fire-and-forget for the caller: the broker flips the task's
//! [`CancelToken`] and returns. The running orchestrator notices the token,
//! asks the sensor to dismiss its prompt and then races the sensor's
//! confirmation against a bounded timer, since the confirmation may arrive
//! late or never.

use keygate_core::effects::{
    BiometricEffects, BiometricEvent, BiometricEventReceiver, CancelToken, PhysicalTimeEffects,
};
use keygate_core::SceneId;
use std::sync::Arc;

use crate::state::SharedStateHandle;
use crate::task::TaskIdentity;

/// How a cancel resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The sensor reported the prompt closed
    Confirmed,
    /// The wait timer fired first
    TimedOut,
}

#[derive(Clone)]
pub struct CancellationBroker {
    shared: SharedStateHandle,
    biometric: Arc<dyn BiometricEffects>,
    time: Arc<dyn PhysicalTimeEffects>,
    cancel_wait_ms: u64,
}

impl CancellationBroker {
    pub(crate) fn new(
        shared: SharedStateHandle,
        biometric: Arc<dyn BiometricEffects>,
        time: Arc<dyn PhysicalTimeEffects>,
        cancel_wait_ms: u64,
    ) -> Self {
        Self {
            shared,
            biometric,
            time,
            cancel_wait_ms,
        }
    }

    /// Fire a task's token. Returns whether this call flipped it.
    pub fn on_active_cancel(&self, identity: &TaskIdentity, token: &CancelToken) -> bool {
        let fired = token.cancel();
        if fired {
            tracing::debug!(task = %identity, "Cancel requested");
        }
        fired
    }

    /// Cancel every active authentication of `scene`
    pub fn cancel_scene(&self, scene: SceneId) -> bool {
        let identity = TaskIdentity::Authenticate(scene);
        let tokens: Vec<CancelToken> = self
            .shared
            .lock()
            .registry
            .values()
            .filter(|entry| entry.identity == identity)
            .map(|entry| entry.cancel.clone())
            .collect();
        tokens
            .iter()
            .fold(false, |any, token| self.on_active_cancel(&identity, token) || any)
    }

    /// Dismiss the prompt and wait for the sensor or the timer, whichever is first
    pub async fn await_confirmation(
        &self,
        token: &CancelToken,
        events: &mut BiometricEventReceiver,
    ) -> CancelOutcome {
        self.biometric.cancel(token).await;

        let outcome = tokio::select! {
            biased;
            () = wait_for_terminal(events) => CancelOutcome::Confirmed,
            _ = self.time.sleep_ms(self.cancel_wait_ms) => CancelOutcome::TimedOut,
        };
        tracing::debug!(?outcome, wait_ms = self.cancel_wait_ms, "Cancel resolved");
        outcome
    }
}

/// Resolves on the first terminal event; never resolves once the sensor
/// hangs up without one.
async fn wait_for_terminal(events: &mut BiometricEventReceiver) {
    loop {
        match events.recv().await {
            Some(event) if event.is_terminal() => return,
            Some(_) => continue,
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_core::effects::{BiometricFailure, CancellationToken};
    use keygate_effects::RealTimeHandler;
    use keygate_testkit::{MockBiometricHandler, SimulatedTimeHandler};
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::state::SharedState;

    fn broker(
        sensor: &MockBiometricHandler,
        time: Arc<dyn PhysicalTimeEffects>,
        wait_ms: u64,
    ) -> CancellationBroker {
        CancellationBroker::new(
            Arc::new(Mutex::new(SharedState::default())),
            Arc::new(sensor.clone()),
            time,
            wait_ms,
        )
    }

    #[tokio::test]
    async fn test_confirmation_wins_over_timer() {
        let sensor = MockBiometricHandler::new();
        let broker = broker(&sensor, Arc::new(RealTimeHandler::new()), 10_000);
        let token = CancelToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(BiometricEvent::Help {
            code: 1,
            message: "hold still".into(),
        })
        .unwrap();
        tx.send(BiometricEvent::Error(BiometricFailure::Cancelled))
            .unwrap();

        let outcome = tokio::time::timeout(
            Duration::from_secs(1),
            broker.await_confirmation(&token, &mut rx),
        )
        .await
        .unwrap();
        assert_eq!(outcome, CancelOutcome::Confirmed);
        assert_eq!(sensor.cancel_calls(), 1);
    }

    #[tokio::test]
    async fn test_silent_sensor_times_out() {
        let sensor = MockBiometricHandler::new();
        let time = SimulatedTimeHandler::new();
        let broker = broker(&sensor, Arc::new(time.clone()), 300);
        let token = CancelToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let before = time.now_ms();
        let outcome = broker.await_confirmation(&token, &mut rx).await;
        assert_eq!(outcome, CancelOutcome::TimedOut);
        assert_eq!(time.now_ms() - before, 300);
        drop(tx);
    }

    #[tokio::test]
    async fn test_cancel_scene_fires_matching_tokens_only() {
        let sensor = MockBiometricHandler::new();
        let broker = broker(&sensor, Arc::new(SimulatedTimeHandler::new()), 300);
        let token = CancelToken::new();
        assert!(!broker.cancel_scene(SceneId(1)));
        assert!(broker.on_active_cancel(&TaskIdentity::Authenticate(SceneId(1)), &token));
        assert!(!broker.on_active_cancel(&TaskIdentity::Authenticate(SceneId(1)), &token));
        assert!(token.is_cancelled());
    }
}
