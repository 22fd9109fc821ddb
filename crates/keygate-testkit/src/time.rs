//! Controllable clock for deterministic tests

use async_trait::async_trait;
use keygate_core::effects::{PhysicalTimeEffects, TimeError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Simulated wall clock
///
/// Time only moves when a test advances it or when `sleep_ms` is awaited;
/// sleeping advances the clock and returns after a scheduler yield instead of
/// blocking.
#[derive(Debug, Clone)]
pub struct SimulatedTimeHandler {
    current_ms: Arc<Mutex<u64>>,
}

impl SimulatedTimeHandler {
    /// Start at an arbitrary but realistic epoch
    pub fn new() -> Self {
        Self::at(1_700_000_000_000)
    }

    /// Start at `start_ms`
    pub fn at(start_ms: u64) -> Self {
        Self {
            current_ms: Arc::new(Mutex::new(start_ms)),
        }
    }

    /// Advance time by `ms`
    pub fn advance_time(&self, ms: u64) {
        *self.current_ms.lock() += ms;
    }

    /// Set absolute time
    pub fn set_time(&self, ms: u64) {
        *self.current_ms.lock() = ms;
    }

    /// Current simulated time
    pub fn now_ms(&self) -> u64 {
        *self.current_ms.lock()
    }
}

impl Default for SimulatedTimeHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PhysicalTimeEffects for SimulatedTimeHandler {
    async fn physical_time_ms(&self) -> Result<u64, TimeError> {
        Ok(self.now_ms())
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        self.advance_time(ms);
        tokio::task::yield_now().await;
        Ok(())
    }
}
