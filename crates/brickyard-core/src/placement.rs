//! Choosing devices for the bricks of a replica set.

use crate::CoreError;
use brickyard_store::{DeviceId, NodeId};

/// A device that may receive a brick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub node: NodeId,
    pub device: DeviceId,
    pub zone: u32,
    pub free_kib: u64,
}

/// Planning step invoked by volume operations.
pub trait BrickPlacer: Send + Sync {
    /// Pick `replica` devices, each able to hold `brick_size_kib`.
    fn place(
        &self,
        candidates: &[Candidate],
        replica: usize,
        brick_size_kib: u64,
    ) -> Result<Vec<Candidate>, CoreError>;
}

/// Puts each replica on a different node, preferring the emptiest devices
/// and spreading across zones when it can.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimplePlacer;

impl BrickPlacer for SimplePlacer {
    fn place(
        &self,
        candidates: &[Candidate],
        replica: usize,
        brick_size_kib: u64,
    ) -> Result<Vec<Candidate>, CoreError> {
        let mut fitting: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.free_kib >= brick_size_kib)
            .collect();
        fitting.sort_by(|a, b| {
            b.free_kib
                .cmp(&a.free_kib)
                .then_with(|| a.device.cmp(&b.device))
        });

        let mut chosen: Vec<Candidate> = Vec::with_capacity(replica);
        // First pass keeps zones distinct, second pass only nodes.
        for distinct_zones in [true, false] {
            for c in &fitting {
                if chosen.len() == replica {
                    break;
                }
                let node_used = chosen.iter().any(|p| p.node == c.node);
                let zone_used = chosen.iter().any(|p| p.zone == c.zone);
                if !node_used && !(distinct_zones && zone_used) {
                    chosen.push((*c).clone());
                }
            }
        }

        if chosen.len() < replica {
            return Err(CoreError::NoSpace(format!(
                "need {replica} devices on distinct nodes with {brick_size_kib} KiB free, found {}",
                chosen.len()
            )));
        }
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn cand(node: &str, device: &str, zone: u32, free: u64) -> Candidate {
        Candidate {
            node: NodeId::new(node),
            device: DeviceId::new(device),
            zone,
            free_kib: free,
        }
    }

    #[test]
    fn picks_distinct_nodes_with_most_space() {
        let cs = vec![
            cand("n1", "d1", 1, 100),
            cand("n1", "d2", 1, 900),
            cand("n2", "d3", 2, 500),
            cand("n3", "d4", 3, 300),
        ];
        let got = SimplePlacer.place(&cs, 2, 200).unwrap();
        let devices: Vec<&str> = got.iter().map(|c| c.device.as_str()).collect();
        assert_eq!(devices, vec!["d2", "d3"]);
    }

    #[test]
    fn prefers_other_zones_but_falls_back() {
        let cs = vec![
            cand("n1", "d1", 1, 900),
            cand("n2", "d2", 1, 800),
            cand("n3", "d3", 2, 100),
        ];
        let got = SimplePlacer.place(&cs, 2, 50).unwrap();
        assert_eq!(got[0].device, "d1");
        assert_eq!(got[1].device, "d3");

        let got = SimplePlacer.place(&cs, 3, 50).unwrap();
        assert_eq!(got.len(), 3);
    }

    #[test]
    fn not_enough_nodes_is_no_space() {
        let cs = vec![cand("n1", "d1", 1, 900), cand("n1", "d2", 1, 900)];
        let err = SimplePlacer.place(&cs, 2, 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpace);
    }

    #[test]
    fn too_small_devices_are_skipped() {
        let cs = vec![cand("n1", "d1", 1, 10), cand("n2", "d2", 2, 10)];
        assert!(SimplePlacer.place(&cs, 1, 100).is_err());
    }
}
