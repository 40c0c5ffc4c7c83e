use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reported condition of a node or device. Independent of its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    #[default]
    Unknown,
    Online,
    Offline,
    Failed,
}

impl HealthState {
    /// Whether new bricks may be placed on an entity in this state.
    pub fn accepts_allocations(self) -> bool {
        self == HealthState::Online
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Unknown => "unknown",
            HealthState::Online => "online",
            HealthState::Offline => "offline",
            HealthState::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for HealthState {
    type Err = CoreError;

    /// Only states a client may request are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(HealthState::Online),
            "offline" => Ok(HealthState::Offline),
            "failed" => Ok(HealthState::Failed),
            other => Err(CoreError::InvalidRequest(format!(
                "unknown health state '{other}'"
            ))),
        }
    }
}
