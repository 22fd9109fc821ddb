//! Physical time effect trait
//!
//! Wall-clock time for the freeze window and the cancellation wait timer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::KeygateError;

/// Error type for time operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum TimeError {
    #[error("Clock unavailable: {reason}")]
    ClockUnavailable { reason: String },
    #[error("Time service unavailable")]
    ServiceUnavailable,
}

impl From<TimeError> for KeygateError {
    fn from(err: TimeError) -> Self {
        KeygateError::internal(err.to_string())
    }
}

#[async_trait]
pub trait PhysicalTimeEffects: Send + Sync {
    /// Milliseconds since the Unix epoch
    async fn physical_time_ms(&self) -> Result<u64, TimeError>;

    /// Sleep for `ms` milliseconds
    async fn sleep_ms(&self, ms: u64) -> Result<(), TimeError>;
}
