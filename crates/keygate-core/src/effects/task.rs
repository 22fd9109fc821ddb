//! Cooperative cancellation shared between callers, the engine and sensors.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// Cooperative cancellation contract.
#[async_trait]
pub trait CancellationToken: Send + Sync {
    /// Resolves when cancellation is requested.
    async fn cancelled(&self);

    /// Non-blocking cancellation check.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Clonable cancellation token backed by a watch channel.
///
/// All clones observe the same signal. Cancelling is idempotent and never
/// un-cancels.
#[derive(Clone)]
pub struct CancelToken {
    id: Uuid,
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            tx: Arc::new(tx),
        }
    }

    /// Stable identifier shared by all clones
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation. Returns `true` if this call flipped the token.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    /// Whether two tokens are clones of each other
    pub fn same_as(&self, other: &CancelToken) -> bool {
        self.id == other.id
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("id", &self.id)
            .field("cancelled", &*self.tx.borrow())
            .finish()
    }
}

#[async_trait]
impl CancellationToken for CancelToken {
    async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            // The sender lives as long as any clone of the token, including
            // `self`, so `changed` cannot observe a closed channel here.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}
