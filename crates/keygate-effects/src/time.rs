//! Time effect handlers
//!
//! Stateless implementation of PhysicalTimeEffects backed by the system clock
//! and the tokio timer.

use async_trait::async_trait;
use keygate_core::effects::{PhysicalTimeEffects, TimeError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Real time handler for production use
///
/// Mock clocks belong in keygate-testkit.
#[derive(Debug, Clone, Default)]
pub struct RealTimeHandler;

impl RealTimeHandler {
    /// Create a new real time handler
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PhysicalTimeEffects for RealTimeHandler {
    #[allow(clippy::disallowed_methods)]
    async fn physical_time_ms(&self) -> Result<u64, TimeError> {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TimeError::ClockUnavailable {
                reason: format!("system clock before epoch: {e}"),
            })?;
        Ok(elapsed.as_millis() as u64)
    }

    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError> {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clock_is_monotonic_enough() {
        let handler = RealTimeHandler::new();
        let a = handler.physical_time_ms().await.unwrap();
        handler.sleep_ms(2).await.unwrap();
        let b = handler.physical_time_ms().await.unwrap();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }
}
