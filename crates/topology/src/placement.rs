//! Initial node placement and the shared assignment file
//!
//! Placement happens once, on the first snapshot of a run, and is
//! fixed afterwards: satellites land on a uniformly random machine,
//! ground stations follow the home of a satellite they uplink to (so
//! their usually-busiest link stays host-local), and an isolated
//! ground station falls back to a random machine.

use std::collections::HashMap;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::naming::node_names;
use crate::snapshot::Snapshot;

#[derive(Error, Debug)]
pub enum AssignmentError {
    #[error("failed to read assignment file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed assignment file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Home machine id for every node, in shifted-id order.
pub fn initial_placement<R: Rng>(snap: &Snapshot, machines: u32, rng: &mut R) -> Vec<u32> {
    let shift = snap.sat_count();
    let mut mid: Vec<Option<u32>> = vec![None; snap.node_count()];

    for m in mid.iter_mut().take(shift) {
        *m = Some(rng.gen_range(0..machines));
    }

    // A ground station inherits the home of the first satellite it
    // uplinks to in this snapshot.
    for gsl in &snap.link_gsl_up {
        let g = gsl.src + shift;
        if mid[g].is_none() {
            mid[g] = mid[gsl.dst];
        }
    }

    mid.into_iter()
        .map(|m| m.unwrap_or_else(|| rng.gen_range(0..machines)))
        .collect()
}

/// The `assign.json` schema shipped to every worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub node_name: Vec<String>,
    pub node_mid: Vec<u32>,
    pub ip: Vec<String>,
}

impl Assignment {
    pub fn new(snap: &Snapshot, node_mid: Vec<u32>, ip: Vec<String>) -> Self {
        Self {
            node_name: node_names(snap.sat_count() as u32, snap.ground.len() as u32),
            node_mid,
            ip,
        }
    }

    pub fn load(path: &Path) -> Result<Self, AssignmentError> {
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), AssignmentError> {
        Ok(std::fs::write(path, serde_json::to_vec(self)?)?)
    }

    /// Name-to-home lookup table.
    pub fn mid_map(&self) -> HashMap<String, u32> {
        self.node_name
            .iter()
            .cloned()
            .zip(self.node_mid.iter().copied())
            .collect()
    }

    pub fn mid_of(&self, name: &str) -> Option<u32> {
        self.node_name
            .iter()
            .position(|n| n == name)
            .map(|i| self.node_mid[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn snapshot() -> Snapshot {
        serde_json::from_str(
            r#"{
                "sat": [
                    {"id": 0, "lat": 0, "lon": 0, "alt": 550},
                    {"id": 1, "lat": 0, "lon": 1, "alt": 550},
                    {"id": 2, "lat": 0, "lon": 2, "alt": 550}
                ],
                "ground": [
                    {"id": 0, "lat": 50, "lon": 8, "alt": 0},
                    {"id": 1, "lat": 60, "lon": 9, "alt": 0}
                ],
                "link_ISL": [{"src": 0, "dst": 1}],
                "link_GSL_Up": [{"src": 0, "dst": 2}]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn ground_station_follows_its_uplink() {
        let snap = snapshot();
        let mut rng = StdRng::seed_from_u64(7);
        let mid = initial_placement(&snap, 4, &mut rng);
        assert_eq!(mid.len(), 5);
        // GS0 uplinks to SAT2 and must share its home.
        assert_eq!(mid[3], mid[2]);
        assert!(mid.iter().all(|m| *m < 4));
    }

    #[test]
    fn isolated_ground_station_still_gets_a_home() {
        let snap = snapshot();
        // GS1 has no uplink in the snapshot; it is placed randomly.
        let mut rng = StdRng::seed_from_u64(7);
        let mid = initial_placement(&snap, 2, &mut rng);
        assert!(mid[4] < 2);
    }

    #[test]
    fn assignment_round_trips_and_resolves() {
        let snap = snapshot();
        let mut rng = StdRng::seed_from_u64(1);
        let mid = initial_placement(&snap, 2, &mut rng);
        let assign = Assignment::new(&snap, mid, vec!["10.0.0.1".into(), "10.0.0.2".into()]);

        assert_eq!(assign.node_name[0], "SAT0");
        assert_eq!(assign.node_name[3], "GS0");
        assert_eq!(assign.mid_of("GS0"), Some(assign.node_mid[3]));
        assert_eq!(assign.mid_of("SAT9"), None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assign.json");
        assign.save(&path).unwrap();
        let back = Assignment::load(&path).unwrap();
        assert_eq!(back.node_name, assign.node_name);
        assert_eq!(back.node_mid, assign.node_mid);
    }
}
