//! Entry state machine guarding mutation of a single entity.
//!
//! `Ready` is the only state new work may start from. `Deleting` admits only
//! the compensating move back to `Ready`. `Modifying` stacks: each nested
//! modify intent increments a counter and each release decrements it, and the
//! entity returns to `Ready` when the counter reaches zero. Moving back into
//! `Creating` is a caller bug and is reported as a distinct, fatal error.

use crate::CoreError;
use brickyard_store::Entity;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Creating,
    Ready,
    Deleting,
    Modifying,
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntryState::Creating => "creating",
            EntryState::Ready => "ready",
            EntryState::Deleting => "deleting",
            EntryState::Modifying => "modifying",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("entity busy: cannot move from {current} to {requested}")]
    Busy {
        current: EntryState,
        requested: EntryState,
    },
    #[error("illegal transition from {current} to {requested}")]
    Illegal {
        current: EntryState,
        requested: EntryState,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStateMachine {
    state: EntryState,
    modify_count: u32,
}

impl Default for EntryStateMachine {
    fn default() -> Self {
        Self {
            state: EntryState::Creating,
            modify_count: 0,
        }
    }
}

impl EntryStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn modify_count(&self) -> u32 {
        self.modify_count
    }

    pub fn is_ready(&self) -> bool {
        self.state == EntryState::Ready
    }

    /// Request a move to `target`. On error the machine is left unchanged.
    pub fn set_state(&mut self, target: EntryState) -> Result<(), TransitionError> {
        use EntryState::{Creating, Deleting, Modifying, Ready};

        let busy = TransitionError::Busy {
            current: self.state,
            requested: target,
        };
        let illegal = TransitionError::Illegal {
            current: self.state,
            requested: target,
        };

        match (self.state, target) {
            (Deleting, Ready) => self.state = Ready,
            // An entry still being created refuses other intents as busy so
            // the caller sees a conflict instead of a fatal error.
            (Deleting, _) | (Modifying, Deleting) | (Creating, Deleting | Modifying) => {
                return Err(busy)
            }
            (_, Creating) => {
                error!("illegal re-entry into creating from {}", self.state);
                return Err(illegal);
            }
            (Modifying, Modifying) => self.modify_count += 1,
            (Modifying, Ready) => {
                self.modify_count = self.modify_count.saturating_sub(1);
                if self.modify_count == 0 {
                    self.state = Ready;
                }
            }
            (Creating, Ready) => self.state = Ready,
            (Ready, next) => self.state = next,
        }
        Ok(())
    }
}

/// Entities governed by an [`EntryStateMachine`].
pub trait Lifecycle: Entity {
    /// Human-readable kind used in error messages.
    const KIND: &'static str;

    fn lifecycle(&self) -> &EntryStateMachine;

    fn lifecycle_mut(&mut self) -> &mut EntryStateMachine;

    fn state(&self) -> EntryState {
        self.lifecycle().state()
    }

    fn set_state(&mut self, target: EntryState) -> Result<(), CoreError> {
        let entity = format!("{} {}", Self::KIND, self.id());
        self.lifecycle_mut()
            .set_state(target)
            .map_err(|source| CoreError::Transition { entity, source })
    }
}
