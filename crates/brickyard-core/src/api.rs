//! Request and response bodies shared by the server, client and CLI.

use crate::entries::HostNames;
use crate::CoreError;
use brickyard_store::{ClusterId, NodeId, VolumeId};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REPLICA: usize = 2;
pub const MAX_REPLICA: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddRequest {
    pub cluster: ClusterId,
    #[serde(default)]
    pub zone: u32,
    pub hostnames: HostNames,
}

impl NodeAddRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.hostnames.manage.is_empty() {
            return Err(CoreError::InvalidRequest("manage hostname missing".to_owned()));
        }
        if self.hostnames.storage.is_empty() {
            return Err(CoreError::InvalidRequest(
                "storage hostname missing".to_owned(),
            ));
        }
        if self.hostnames.all().any(|h| h.trim().is_empty()) {
            return Err(CoreError::InvalidRequest(
                "hostname cannot be an empty string".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStateRequest {
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAddRequest {
    pub node: NodeId,
    pub name: String,
}

impl DeviceAddRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::InvalidRequest("device name missing".to_owned()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCreateRequest {
    pub size_gib: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Restrict placement to one cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica: Option<usize>,
}

impl VolumeCreateRequest {
    pub fn replica(&self) -> usize {
        self.replica.unwrap_or(DEFAULT_REPLICA)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.size_gib == 0 {
            return Err(CoreError::InvalidRequest(
                "volume size must be at least 1 GiB".to_owned(),
            ));
        }
        let replica = self.replica();
        if replica == 0 || replica > MAX_REPLICA {
            return Err(CoreError::InvalidRequest(format!(
                "replica count must be between 1 and {MAX_REPLICA}"
            )));
        }
        if let Some(name) = &self.name {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                return Err(CoreError::InvalidRequest(format!(
                    "invalid volume name '{name}'"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeExpandRequest {
    pub expand_size_gib: u64,
}

impl VolumeExpandRequest {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.expand_size_gib == 0 {
            return Err(CoreError::InvalidRequest(
                "expansion must be at least 1 GiB".to_owned(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterList {
    pub clusters: Vec<ClusterId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeList {
    pub volumes: Vec<VolumeId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_req(manage: &[&str], storage: &[&str]) -> NodeAddRequest {
        NodeAddRequest {
            cluster: ClusterId::new("c1"),
            zone: 1,
            hostnames: HostNames {
                manage: manage.iter().map(|s| (*s).to_owned()).collect(),
                storage: storage.iter().map(|s| (*s).to_owned()).collect(),
            },
        }
    }

    #[test]
    fn node_request_needs_both_hostnames() {
        assert!(node_req(&["m"], &["s"]).validate().is_ok());
        assert!(node_req(&[], &["s"]).validate().is_err());
        assert!(node_req(&["m"], &[]).validate().is_err());
        assert!(node_req(&["m", ""], &["s"]).validate().is_err());
    }

    #[test]
    fn volume_request_defaults_and_bounds() {
        let mut r = VolumeCreateRequest {
            size_gib: 10,
            name: None,
            cluster: None,
            replica: None,
        };
        assert_eq!(r.replica(), DEFAULT_REPLICA);
        assert!(r.validate().is_ok());

        r.replica = Some(4);
        assert!(r.validate().is_err());
        r.replica = Some(1);
        r.name = Some("bad name".to_owned());
        assert!(r.validate().is_err());
        r.name = Some("good-name_1".to_owned());
        assert!(r.validate().is_ok());
        r.size_gib = 0;
        assert!(r.validate().is_err());
    }

    #[test]
    fn volume_request_parses_minimal_body() {
        let r: VolumeCreateRequest = serde_json::from_str(r#"{"size_gib":5}"#).unwrap();
        assert_eq!(r.size_gib, 5);
        assert!(r.cluster.is_none());
    }
}
