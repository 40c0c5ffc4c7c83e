//! Core of the Brickyard control plane.
//!
//! This crate holds the entity lifecycle state machine, the topology records
//! persisted in the store, the asynchronous operation manager that runs slow
//! remote work in the background, and the `App` operations that combine the
//! three with a remote executor. It also provides server configuration and the
//! single-instance lock.

pub mod api;
pub mod app;
pub mod concurrency;
pub mod config;
pub mod entries;
pub mod health;
pub mod lifecycle;
pub mod operations;
pub mod placement;

pub use app::App;
pub use concurrency::{install_shutdown_handler, shutdown_requested, InstanceLock};
pub use config::ServerConfig;
pub use health::HealthState;
pub use lifecycle::{EntryState, EntryStateMachine, Lifecycle, TransitionError};
pub use operations::{AsyncManager, Operation, OperationStatus, PollOutcome, ScheduledOperation};
pub use placement::{BrickPlacer, Candidate, SimplePlacer};

use brickyard_executor::ExecutorError;
use brickyard_store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("remote execution failed: {0}")]
    Executor(#[from] ExecutorError),
    #[error("{entity}: {source}")]
    Transition {
        entity: String,
        #[source]
        source: TransitionError,
    },
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("no space: {0}")]
    NoSpace(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification used by the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Conflict,
    NotFound,
    Ambiguous,
    RemoteFailure,
    StoreFailure,
    Fatal,
    InvalidRequest,
    NoSpace,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Ambiguous => "ambiguous",
            ErrorKind::RemoteFailure => "remote_failure",
            ErrorKind::StoreFailure => "store_failure",
            ErrorKind::Fatal => "fatal",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::NoSpace => "no_space",
        };
        f.write_str(s)
    }
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Store(e) if e.is_not_found() => ErrorKind::NotFound,
            CoreError::Store(_) | CoreError::Serialization(_) => ErrorKind::StoreFailure,
            CoreError::Executor(ExecutorError::HostNotFound(_)) | CoreError::NotFound(_) => {
                ErrorKind::NotFound
            }
            CoreError::Executor(ExecutorError::AmbiguousHost { .. }) => ErrorKind::Ambiguous,
            CoreError::Executor(ExecutorError::Config(_) | ExecutorError::Unavailable(_))
            | CoreError::Config(_)
            | CoreError::Io(_) => ErrorKind::Fatal,
            CoreError::Executor(_) => ErrorKind::RemoteFailure,
            CoreError::Transition {
                source: TransitionError::Busy { .. },
                ..
            }
            | CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Transition {
                source: TransitionError::Illegal { .. },
                ..
            } => ErrorKind::Fatal,
            CoreError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            CoreError::NoSpace(_) => ErrorKind::NoSpace,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_is_distinct_from_store_failure() {
        let nf = CoreError::from(StoreError::NotFound {
            table: "nodes",
            id: "n1".to_owned(),
        });
        assert_eq!(nf.kind(), ErrorKind::NotFound);
        assert!(nf.is_not_found());

        let broken = CoreError::from(StoreError::UnknownTable("x".to_owned()));
        assert_eq!(broken.kind(), ErrorKind::StoreFailure);
    }

    #[test]
    fn executor_errors_classify() {
        let nf = CoreError::from(ExecutorError::HostNotFound("h".to_owned()));
        assert_eq!(nf.kind(), ErrorKind::NotFound);
        let amb = CoreError::from(ExecutorError::AmbiguousHost {
            host: "h".to_owned(),
            count: 2,
        });
        assert_eq!(amb.kind(), ErrorKind::Ambiguous);
        let failed = CoreError::from(ExecutorError::CommandFailed {
            host: "h".to_owned(),
            command: "c".to_owned(),
            output: "o".to_owned(),
        });
        assert_eq!(failed.kind(), ErrorKind::RemoteFailure);
    }

    #[test]
    fn transitions_classify() {
        let busy = CoreError::Transition {
            entity: "node n1".to_owned(),
            source: TransitionError::Busy {
                current: EntryState::Deleting,
                requested: EntryState::Modifying,
            },
        };
        assert_eq!(busy.kind(), ErrorKind::Conflict);
        assert!(busy.to_string().contains("node n1"));

        let illegal = CoreError::Transition {
            entity: "node n1".to_owned(),
            source: TransitionError::Illegal {
                current: EntryState::Ready,
                requested: EntryState::Creating,
            },
        };
        assert_eq!(illegal.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn kind_display_is_snake_case() {
        assert_eq!(ErrorKind::RemoteFailure.to_string(), "remote_failure");
        assert_eq!(
            serde_json::to_string(&ErrorKind::NoSpace).unwrap(),
            "\"no_space\""
        );
    }
}
