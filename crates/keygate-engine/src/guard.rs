//! Anti-brute-force guard
//!
//! Local lockout policy for sensors that do not enforce lockout themselves.
//! The counters live in [`SharedState`](crate::state::SharedState) and every
//! mutation is flushed to the preference store.
//!
//! Availability is `fail_count < max_fail_count` OR the freeze window has
//! elapsed since the last freeze. When only the window test passes, the
//! check itself unfreezes the guard.

use keygate_core::effects::PhysicalTimeEffects;
use keygate_core::KeygateResult;
use std::sync::Arc;

use crate::persistence::PreferenceStore;
use crate::state::{FreezeState, SharedStateHandle, NEVER_FROZEN};

/// What to do with a failed biometric sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Pass the failure to the observer; `remaining` attempts before lockout
    Forward { remaining: u32 },
    /// Too many trials; end the session with a lockout
    Lockout,
}

/// Whether the local guard applies for a sensor reporting `native_lockout`
pub fn is_active(native_lockout: Option<bool>) -> bool {
    native_lockout != Some(true)
}

#[derive(Clone)]
pub struct AntiBruteForceGuard {
    shared: SharedStateHandle,
    prefs: PreferenceStore,
    time: Arc<dyn PhysicalTimeEffects>,
    max_fail_count: u32,
    freeze_window_ms: u64,
}

impl AntiBruteForceGuard {
    pub(crate) fn new(
        shared: SharedStateHandle,
        prefs: PreferenceStore,
        time: Arc<dyn PhysicalTimeEffects>,
        max_fail_count: u32,
        freeze_window_ms: u64,
    ) -> Self {
        Self {
            shared,
            prefs,
            time,
            max_fail_count,
            freeze_window_ms,
        }
    }

    /// Current counters
    pub fn snapshot(&self) -> FreezeState {
        self.shared.lock().freeze
    }

    /// Read persisted counters into memory
    pub async fn load(&self) -> KeygateResult<FreezeState> {
        let state = self.prefs.load_freeze().await?.unwrap_or_default();
        self.shared.lock().freeze = state;
        tracing::debug!(
            fail_count = state.fail_count,
            last_freeze_ms = state.last_freeze_ms,
            "Loaded freeze state"
        );
        Ok(state)
    }

    async fn now_ms(&self) -> KeygateResult<i64> {
        let now = self.time.physical_time_ms().await?;
        Ok(i64::try_from(now).unwrap_or(i64::MAX))
    }

    async fn update<F>(&self, mutate: F) -> KeygateResult<FreezeState>
    where
        F: FnOnce(&mut FreezeState),
    {
        let state = {
            let mut shared = self.shared.lock();
            mutate(&mut shared.freeze);
            shared.freeze
        };
        self.prefs.save_freeze(&state).await?;
        Ok(state)
    }

    /// Record one failed sample; freezes on reaching the threshold
    pub async fn add_failure(&self) -> KeygateResult<FreezeState> {
        let state = self
            .update(|freeze| freeze.fail_count = freeze.fail_count.saturating_add(1))
            .await?;
        if state.fail_count >= self.max_fail_count && state.is_never_frozen() {
            tracing::warn!(fail_count = state.fail_count, "Sensor frozen after repeated failures");
            return self.freeze().await;
        }
        Ok(state)
    }

    /// Freeze immediately
    pub async fn freeze(&self) -> KeygateResult<FreezeState> {
        let now = self.now_ms().await?;
        let beyond = self.max_fail_count.saturating_add(1);
        self.update(|freeze| {
            freeze.fail_count = freeze.fail_count.max(beyond);
            freeze.last_freeze_ms = now;
        })
        .await
    }

    /// Reset counters
    pub async fn unfreeze(&self) -> KeygateResult<FreezeState> {
        self.update(|freeze| *freeze = FreezeState::default()).await
    }

    /// Whether the sensor may be used; may unfreeze as a side effect
    pub async fn is_available(&self) -> KeygateResult<bool> {
        let state = self.snapshot();
        if state.fail_count < self.max_fail_count {
            return Ok(true);
        }
        let now = self.now_ms().await?;
        let window_elapsed = state.is_never_frozen()
            || now.saturating_sub(state.last_freeze_ms) > self.freeze_window_ms as i64;
        if window_elapsed {
            tracing::info!(
                fail_count = state.fail_count,
                "Freeze window elapsed, unfreezing sensor"
            );
            self.unfreeze().await?;
        }
        Ok(window_elapsed)
    }

    /// Decide how to handle a failed sample reported by the sensor
    pub async fn on_failed_attempt(&self) -> KeygateResult<GuardVerdict> {
        let state = self.add_failure().await?;
        if state.fail_count >= self.max_fail_count {
            Ok(GuardVerdict::Lockout)
        } else {
            Ok(GuardVerdict::Forward {
                remaining: self.max_fail_count - state.fail_count,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keygate_testkit::{MemoryStorageHandler, SimulatedTimeHandler};
    use parking_lot::Mutex;

    use crate::state::SharedState;

    fn guard() -> (AntiBruteForceGuard, SimulatedTimeHandler, MemoryStorageHandler) {
        let time = SimulatedTimeHandler::at(10_000_000);
        let storage = MemoryStorageHandler::new();
        let guard = AntiBruteForceGuard::new(
            Arc::new(Mutex::new(SharedState::default())),
            PreferenceStore::new(Arc::new(storage.clone()), "ns"),
            Arc::new(time.clone()),
            5,
            30_000,
        );
        (guard, time, storage)
    }

    #[tokio::test]
    async fn test_unavailable_after_exactly_five_failures() {
        let (guard, _, _) = guard();
        for _ in 0..4 {
            guard.add_failure().await.unwrap();
            assert!(guard.is_available().await.unwrap());
        }
        let state = guard.add_failure().await.unwrap();
        assert_eq!(state.last_freeze_ms, 10_000_000);
        assert!(!guard.is_available().await.unwrap());
    }

    #[tokio::test]
    async fn test_reaching_threshold_freezes_beyond_it() {
        let (guard, time, storage) = guard();
        for _ in 0..4 {
            let state = guard.add_failure().await.unwrap();
            assert!(state.is_never_frozen());
        }
        time.advance_time(500);
        let state = guard.add_failure().await.unwrap();
        assert_eq!(state.fail_count, 6);
        assert_eq!(state.last_freeze_ms, 10_000_500);
        let persisted = storage.get_string("ns/freeze/state").await.unwrap();
        assert!(persisted.contains("\"fail_count\":6"));
    }

    #[tokio::test]
    async fn test_window_elapse_unfreezes_on_check() {
        let (guard, time, _) = guard();
        for _ in 0..5 {
            guard.add_failure().await.unwrap();
        }
        time.advance_time(30_000);
        assert!(!guard.is_available().await.unwrap());

        time.advance_time(1);
        assert!(guard.is_available().await.unwrap());
        assert_eq!(guard.snapshot(), FreezeState::default());
    }

    #[tokio::test]
    async fn test_sentinel_counts_as_ancient_freeze() {
        let (guard, _, _) = guard();
        guard.shared.lock().freeze = FreezeState {
            fail_count: 9,
            last_freeze_ms: NEVER_FROZEN,
        };
        assert!(guard.is_available().await.unwrap());
        assert_eq!(guard.snapshot().fail_count, 0);
    }

    #[tokio::test]
    async fn test_freeze_and_unfreeze_are_persisted() {
        let (guard, _, storage) = guard();
        guard.freeze().await.unwrap();
        assert!(!guard.is_available().await.unwrap());
        let persisted = storage.get_string("ns/freeze/state").await.unwrap();
        assert!(persisted.contains("\"fail_count\":6"));

        guard.unfreeze().await.unwrap();
        assert!(guard.is_available().await.unwrap());

        let (reloaded, _, _) = guard_with_storage(storage).await;
        assert_eq!(reloaded.snapshot(), FreezeState::default());
    }

    async fn guard_with_storage(
        storage: MemoryStorageHandler,
    ) -> (AntiBruteForceGuard, SimulatedTimeHandler, MemoryStorageHandler) {
        let time = SimulatedTimeHandler::new();
        let guard = AntiBruteForceGuard::new(
            Arc::new(Mutex::new(SharedState::default())),
            PreferenceStore::new(Arc::new(storage.clone()), "ns"),
            Arc::new(time.clone()),
            5,
            30_000,
        );
        guard.load().await.unwrap();
        (guard, time, storage)
    }

    #[tokio::test]
    async fn test_failed_attempt_verdicts() {
        let (guard, _, _) = guard();
        assert_eq!(
            guard.on_failed_attempt().await.unwrap(),
            GuardVerdict::Forward { remaining: 4 }
        );
        for _ in 0..3 {
            guard.on_failed_attempt().await.unwrap();
        }
        assert_eq!(
            guard.on_failed_attempt().await.unwrap(),
            GuardVerdict::Lockout
        );
    }

    #[test]
    fn test_guard_only_active_without_native_lockout() {
        assert!(is_active(None));
        assert!(is_active(Some(false)));
        assert!(!is_active(Some(true)));
    }
}
