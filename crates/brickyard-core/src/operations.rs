//! Background execution of slow operations behind pollable handles.
//!
//! `schedule` records a pending handle and starts the work on its own thread,
//! returning at once. The work runs exactly once; its result, or a panic
//! caught at the thread boundary, is written to the handle exactly once.
//! Handles live in memory only. A terminal handle nobody polls is dropped
//! once it is older than the retention period.

use crate::CoreError;
use brickyard_store::OperationId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Done { location: Option<String> },
    Error { message: String },
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Pending)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub id: OperationId,
    #[serde(flatten)]
    pub status: OperationStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Returned to the caller as soon as work is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledOperation {
    pub id: OperationId,
    /// Where to poll for the outcome.
    pub location: String,
}

/// What a poll tells the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending { location: String },
    Redirect { location: String },
    NoContent,
    Failed { message: String },
    Unknown,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// How long an unpolled terminal handle is kept.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

pub struct AsyncManager {
    route: String,
    retention: Duration,
    operations: Mutex<HashMap<OperationId, Operation>>,
    completed: Condvar,
}

impl Default for AsyncManager {
    fn default() -> Self {
        Self::new("/queue")
    }
}

impl AsyncManager {
    /// `route` is the path prefix poll locations are built under.
    pub fn new(route: impl Into<String>) -> Self {
        Self {
            route: route.into(),
            retention: DEFAULT_RETENTION,
            operations: Mutex::new(HashMap::new()),
            completed: Condvar::new(),
        }
    }

    #[must_use]
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn location(&self, id: &OperationId) -> String {
        format!("{}/{id}", self.route)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<OperationId, Operation>> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `work` in the background and return its handle.
    ///
    /// `work` returns the location of its result, if it has one. It owns any
    /// compensation needed when it fails.
    pub fn schedule<F>(self: &Arc<Self>, work: F) -> ScheduledOperation
    where
        F: FnOnce() -> Result<Option<String>, CoreError> + Send + 'static,
    {
        self.sweep();
        let id = OperationId::generate();
        let location = self.location(&id);
        self.table().insert(
            id.clone(),
            Operation {
                id: id.clone(),
                status: OperationStatus::Pending,
                created_at: Utc::now(),
                completed_at: None,
            },
        );

        let manager = Arc::clone(self);
        let task_id = id.clone();
        let spawned = thread::Builder::new()
            .name(format!("op-{}", &id[..8.min(id.len())]))
            .spawn(move || {
                let status = match panic::catch_unwind(AssertUnwindSafe(work)) {
                    Ok(Ok(location)) => {
                        info!("operation {task_id} completed");
                        OperationStatus::Done { location }
                    }
                    Ok(Err(e)) => {
                        warn!("operation {task_id} failed: {e}");
                        OperationStatus::Error {
                            message: e.to_string(),
                        }
                    }
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!("operation {task_id} panicked: {message}");
                        OperationStatus::Error {
                            message: format!("operation panicked: {message}"),
                        }
                    }
                };
                manager.complete(&task_id, status);
            });

        if let Err(e) = spawned {
            error!("could not start operation {id}: {e}");
            self.complete(
                &id,
                OperationStatus::Error {
                    message: format!("could not start operation: {e}"),
                },
            );
        } else {
            debug!("operation {id} scheduled");
        }

        ScheduledOperation { id, location }
    }

    fn complete(&self, id: &OperationId, status: OperationStatus) {
        let mut table = self.table();
        match table.get_mut(id) {
            Some(op) if !op.status.is_terminal() => {
                op.status = status;
                op.completed_at = Some(Utc::now());
            }
            Some(_) => warn!("operation {id} already completed"),
            None => warn!("operation {id} vanished before completion"),
        }
        drop(table);
        self.completed.notify_all();
    }

    /// Snapshot of a handle. Never waits for the work.
    pub fn status(&self, id: &str) -> Option<Operation> {
        self.table().get(id).cloned()
    }

    /// Poll on behalf of a client. A terminal outcome is delivered once and
    /// the handle is then forgotten.
    pub fn poll(&self, id: &str) -> PollOutcome {
        let mut table = self.table();
        let Some(op) = table.get(id) else {
            return PollOutcome::Unknown;
        };
        if op.status == OperationStatus::Pending {
            return PollOutcome::Pending {
                location: self.location(&op.id),
            };
        }
        let Some(op) = table.remove(id) else {
            return PollOutcome::Unknown;
        };
        match op.status {
            OperationStatus::Done {
                location: Some(location),
            } => PollOutcome::Redirect { location },
            OperationStatus::Done { location: None } => PollOutcome::NoContent,
            OperationStatus::Error { message } => PollOutcome::Failed { message },
            OperationStatus::Pending => PollOutcome::Unknown,
        }
    }

    /// Block until the operation is terminal or `timeout` passes.
    pub fn wait(&self, id: &str, timeout: Duration) -> Option<Operation> {
        let deadline = Instant::now() + timeout;
        let mut table = self.table();
        loop {
            match table.get(id) {
                None => return None,
                Some(op) if op.status.is_terminal() => return Some(op.clone()),
                Some(op) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Some(op.clone());
                    }
                    table = self
                        .completed
                        .wait_timeout(table, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    /// Drop terminal handles completed longer ago than the retention period.
    /// Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let retention = self.retention;
        let mut table = self.table();
        let before = table.len();
        table.retain(|_, op| {
            let expired = op
                .completed_at
                .and_then(|at| (now - at).to_std().ok())
                .is_some_and(|age| age >= retention);
            !expired
        });
        let dropped = before - table.len();
        drop(table);
        if dropped > 0 {
            debug!("dropped {dropped} unpolled operation results");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self) -> usize {
        self.table()
            .values()
            .filter(|op| !op.status.is_terminal())
            .count()
    }
}
