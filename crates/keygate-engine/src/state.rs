//! State shared between the caller-facing API, the worker and the result
//! context.
//!
//! Everything here sits behind one `parking_lot::Mutex`. The lock is never
//! held across an `.await`; hardware access is serialized by the worker,
//! not by this lock.

use keygate_core::effects::CancelToken;
use keygate_core::SceneId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::task::{TaskIdentity, TaskState};
use crate::task_registry::CompletionLatch;

/// Registry key of an admitted task
pub type TaskId = Uuid;

/// `last_freeze_ms` value meaning "never frozen"
pub const NEVER_FROZEN: i64 = -1;

/// Persisted anti-brute-force counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreezeState {
    pub fail_count: u32,
    pub last_freeze_ms: i64,
}

impl Default for FreezeState {
    fn default() -> Self {
        Self {
            fail_count: 0,
            last_freeze_ms: NEVER_FROZEN,
        }
    }
}

impl FreezeState {
    pub fn is_never_frozen(&self) -> bool {
        self.last_freeze_ms == NEVER_FROZEN
    }
}

/// What `init` established
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitState {
    pub supported: bool,
    pub scenes: BTreeSet<SceneId>,
    pub salt: String,
    pub device_fingerprint: String,
}

/// One admitted task
#[derive(Debug)]
pub(crate) struct RegistryEntry {
    pub identity: TaskIdentity,
    pub state: TaskState,
    pub cancel: CancelToken,
    pub latch: Arc<CompletionLatch>,
}

#[derive(Debug, Default)]
pub(crate) struct SharedState {
    pub registry: HashMap<TaskId, RegistryEntry>,
    pub freeze: FreezeState,
    pub init: Option<InitState>,
}

impl SharedState {
    pub fn has_active(&self, identity: &TaskIdentity) -> bool {
        self.registry.values().any(|entry| &entry.identity == identity)
    }

    pub fn set_task_state(&mut self, id: TaskId, state: TaskState) {
        if let Some(entry) = self.registry.get_mut(&id) {
            entry.state = state;
        }
    }
}

pub(crate) type SharedStateHandle = Arc<Mutex<SharedState>>;
