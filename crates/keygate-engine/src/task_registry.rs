//! Task admission and scheduling.
//!
//! Two tokio tasks back every engine:
//!
//! - the **worker** pulls jobs off an unbounded queue and awaits them one at
//!   a time, so no two key-store or sensor calls ever overlap;
//! - the **result context** runs caller callbacks in completion order.
//!
//! Each admitted task owns a [`CompletionLatch`]. Whichever path reaches the
//! latch first (normal completion, cancellation, shutdown) delivers; every
//! later attempt is a no-op.

#![allow(clippy::disallowed_types)]

use futures::future::BoxFuture;
use futures::FutureExt;
use keygate_core::effects::CancelToken;
use keygate_core::{ErrorCode, KeygateError, KeygateResult};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::context::EngineContext;
use crate::state::{RegistryEntry, TaskId};
use crate::task::{Task, TaskIdentity, TaskOutput, TaskState};

/// One-shot caller callback of a task
pub(crate) type TaskCallback = Box<dyn FnOnce(KeygateResult<TaskOutput>) + Send>;

type Job = BoxFuture<'static, ()>;
type Delivery = Box<dyn FnOnce() + Send>;

/// Delivers a task's result at most once
pub(crate) struct CompletionLatch {
    callback: Mutex<Option<TaskCallback>>,
    results_tx: mpsc::UnboundedSender<Delivery>,
}

impl fmt::Debug for CompletionLatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionLatch")
            .field("completed", &self.is_completed())
            .finish()
    }
}

impl CompletionLatch {
    fn new(callback: TaskCallback, results_tx: mpsc::UnboundedSender<Delivery>) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
            results_tx,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.callback.lock().is_none()
    }

    /// Hand `result` to the result context. Returns false if already completed.
    pub fn complete(&self, result: KeygateResult<TaskOutput>) -> bool {
        let Some(callback) = self.callback.lock().take() else {
            return false;
        };
        let delivery: Delivery = Box::new(move || callback(result));
        if let Err(mpsc::error::SendError(delivery)) = self.results_tx.send(delivery) {
            // Result context already stopped
            run_delivery(delivery);
        }
        true
    }
}

fn run_delivery(delivery: Delivery) {
    if std::panic::catch_unwind(AssertUnwindSafe(delivery)).is_err() {
        tracing::error!("Result callback panicked");
    }
}

async fn run_worker(mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        job.await;
    }
}

async fn deliver_results(
    mut deliveries: mpsc::UnboundedReceiver<Delivery>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            delivery = deliveries.recv() => match delivery {
                Some(delivery) => run_delivery(delivery),
                None => return,
            },
            _ = shutdown_rx.changed() => {
                // Closed: later completions run inline in the completing task
                deliveries.close();
                while let Some(delivery) = deliveries.recv().await {
                    run_delivery(delivery);
                }
                return;
            }
        }
    }
}

enum Admission {
    Resolved(KeygateResult<TaskOutput>),
    Admitted,
}

pub(crate) struct AdmissionController {
    ctx: Arc<EngineContext>,
    jobs_tx: mpsc::UnboundedSender<Job>,
    results_tx: mpsc::UnboundedSender<Delivery>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AdmissionController {
    /// Spawn the worker and result contexts on `runtime`
    pub fn start(ctx: Arc<EngineContext>, runtime: &Handle) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = runtime.spawn(run_worker(jobs_rx));
        let results = runtime.spawn(deliver_results(results_rx, shutdown_rx));

        Self {
            ctx,
            jobs_tx,
            results_tx,
            shutdown_tx,
            handles: Mutex::new(vec![worker, results]),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Admit `task`. Returns its id when it was registered; otherwise the
    /// callback has already been handed its result.
    pub fn submit(&self, task: Task, callback: TaskCallback) -> Option<TaskId> {
        let identity = task.identity();
        let token = task.cancel_token();
        let latch = Arc::new(CompletionLatch::new(callback, self.results_tx.clone()));
        let id = Uuid::new_v4();

        let admission = {
            let mut shared = self.ctx.shared.lock();
            if self.is_shut_down() {
                Admission::Resolved(Err(KeygateError::cancelled("engine released")))
            } else if let Some(resolved) = task.preflight(&shared) {
                Admission::Resolved(resolved)
            } else if identity.is_singleton() && shared.has_active(&identity) {
                Admission::Resolved(Err(KeygateError::new(
                    ErrorCode::AdmissionRejected,
                    format!("{identity} is already in progress"),
                )))
            } else {
                shared.registry.insert(
                    id,
                    RegistryEntry {
                        identity,
                        state: TaskState::Created,
                        cancel: token.clone(),
                        latch: latch.clone(),
                    },
                );
                Admission::Admitted
            }
        };

        if let Admission::Resolved(result) = admission {
            if let Err(e) = &result {
                tracing::debug!(task = %identity, code = ?e.code, "Task resolved at admission");
            }
            latch.complete(result);
            return None;
        }

        let ctx = self.ctx.clone();
        let job_latch = latch.clone();
        let job: Job = Box::pin(async move {
            let result = execute(&ctx, id, identity, task, token).await;
            ctx.shared.lock().registry.remove(&id);
            job_latch.complete(result);
        });

        if self.jobs_tx.send(job).is_err() {
            self.ctx.shared.lock().registry.remove(&id);
            latch.complete(Err(KeygateError::cancelled("engine released")));
            return None;
        }
        self.ctx.shared.lock().set_task_state(id, TaskState::Queued);
        tracing::debug!(task = %identity, %id, "Task queued");
        Some(id)
    }

    /// Fire every registered task's token and clear the registry
    pub fn cancel_all(&self) -> usize {
        let entries: Vec<RegistryEntry> = {
            let mut shared = self.ctx.shared.lock();
            shared.registry.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &entries {
            self.ctx.broker.on_active_cancel(&entry.identity, &entry.cancel);
        }
        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "Cancelled all tasks");
        }
        entries.len()
    }

    /// Run `fut` on the worker, after everything already queued
    pub async fn run_serialized<F, T>(&self, fut: F) -> KeygateResult<T>
    where
        F: Future<Output = KeygateResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(fut.await);
        });
        if self.is_shut_down() || self.jobs_tx.send(job).is_err() {
            return Err(KeygateError::cancelled("engine released"));
        }
        rx.await
            .unwrap_or_else(|_| Err(KeygateError::cancelled("engine released")))
    }

    /// Registered tasks, ordered by identity
    pub fn active_tasks(&self) -> Vec<(TaskIdentity, TaskState)> {
        let mut tasks: Vec<_> = self
            .ctx
            .shared
            .lock()
            .registry
            .values()
            .map(|entry| (entry.identity, entry.state))
            .collect();
        tasks.sort();
        tasks
    }

    /// Cancel and complete every registered task, then stop both contexts
    pub fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        let entries: Vec<RegistryEntry> = {
            let mut shared = self.ctx.shared.lock();
            shared.registry.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.cancel.cancel();
            entry
                .latch
                .complete(Err(KeygateError::cancelled("engine released")));
        }

        let mut handles = self.handles.lock();
        // Worker first; the result context drains and exits on the signal
        if let Some(worker) = handles.first() {
            worker.abort();
        }
        handles.clear();
        tracing::debug!("Task contexts stopped");
    }
}

impl Drop for AdmissionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn execute(
    ctx: &EngineContext,
    id: TaskId,
    identity: TaskIdentity,
    task: Task,
    token: CancelToken,
) -> KeygateResult<TaskOutput> {
    ctx.shared.lock().set_task_state(id, TaskState::Running);
    tracing::debug!(task = %identity, %id, "Task running");

    let result = match AssertUnwindSafe(task.run(ctx, token)).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            tracing::error!(task = %identity, "Task panicked");
            Err(KeygateError::internal(format!("{identity} panicked")))
        }
    };

    ctx.shared.lock().set_task_state(id, TaskState::Done);
    match &result {
        Ok(_) => tracing::debug!(task = %identity, "Task completed"),
        Err(e) => tracing::debug!(task = %identity, code = ?e.code, error = %e, "Task failed"),
    }
    result
}
