//! Snapshot schema of the external constellation service
//!
//! One snapshot describes the constellation at a single wall-clock
//! instant: node positions plus the live ISL and ground-uplink edges.
//! The service responds with gzipped JSON; both gzipped and plain
//! bodies are accepted here.

use std::collections::BTreeSet;
use std::io::Read;

use flate2::read::GzDecoder;
use serde::Deserialize;
use thiserror::Error;

use crate::diff::Edge;
use crate::geo::GeoPos;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("failed to decompress snapshot body: {0}")]
    Decompress(std::io::Error),

    #[error("malformed snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot schema violation: {0}")]
    Schema(String),
}

/// Position record for one satellite or ground station.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeState {
    pub id: usize,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

/// One directed edge as reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLink {
    pub src: usize,
    pub dst: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    pub sat: Vec<NodeState>,
    pub ground: Vec<NodeState>,
    #[serde(rename = "link_ISL")]
    pub link_isl: Vec<RawLink>,
    #[serde(rename = "link_GSL_Up")]
    pub link_gsl_up: Vec<RawLink>,
}

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

impl Snapshot {
    /// Parse a (possibly gzipped) JSON body and validate its schema.
    pub fn from_slice(body: &[u8]) -> Result<Self, SnapshotError> {
        let snap: Snapshot = if body.starts_with(&GZIP_MAGIC) {
            let mut raw = Vec::new();
            GzDecoder::new(body)
                .read_to_end(&mut raw)
                .map_err(SnapshotError::Decompress)?;
            serde_json::from_slice(&raw)?
        } else {
            serde_json::from_slice(body)?
        };
        snap.validate()?;
        Ok(snap)
    }

    /// The controller relies on node records being stored in id order.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        for (i, sat) in self.sat.iter().enumerate() {
            if sat.id != i {
                return Err(SnapshotError::Schema(format!(
                    "sat[{}] carries id {}",
                    i, sat.id
                )));
            }
        }
        for (i, gs) in self.ground.iter().enumerate() {
            if gs.id != i {
                return Err(SnapshotError::Schema(format!(
                    "ground[{}] carries id {}",
                    i, gs.id
                )));
            }
        }
        Ok(())
    }

    pub fn sat_count(&self) -> usize {
        self.sat.len()
    }

    pub fn node_count(&self) -> usize {
        self.sat.len() + self.ground.len()
    }

    /// Canonical link set over the shifted id space: satellites keep
    /// their ids, ground stations are offset by `sat_count` so both
    /// kinds live in one integer space.
    pub fn link_set(&self) -> BTreeSet<Edge> {
        let shift = self.sat_count() as u32;
        let mut links = BTreeSet::new();
        for isl in &self.link_isl {
            if let Some(e) = Edge::new(isl.src as u32, isl.dst as u32) {
                links.insert(e);
            }
        }
        for gsl in &self.link_gsl_up {
            if let Some(e) = Edge::new(gsl.src as u32 + shift, gsl.dst as u32) {
                links.insert(e);
            }
        }
        links
    }

    /// Node positions indexed by shifted id (satellites, then ground).
    pub fn positions(&self) -> Vec<GeoPos> {
        self.sat
            .iter()
            .chain(self.ground.iter())
            .map(|n| GeoPos {
                lat_deg: n.lat,
                lon_deg: n.lon,
                alt_km: n.alt,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const BODY: &str = r#"{
        "sat": [
            {"id": 0, "lat": 10.0, "lon": 20.0, "alt": 550.0},
            {"id": 1, "lat": 11.0, "lon": 21.0, "alt": 550.0}
        ],
        "ground": [{"id": 0, "lat": 50.0, "lon": 8.0, "alt": 0.0}],
        "link_ISL": [{"src": 1, "dst": 0}, {"src": 0, "dst": 0}],
        "link_GSL_Up": [{"src": 0, "dst": 1}]
    }"#;

    #[test]
    fn parses_plain_body() {
        let snap = Snapshot::from_slice(BODY.as_bytes()).unwrap();
        assert_eq!(snap.sat_count(), 2);
        assert_eq!(snap.node_count(), 3);
    }

    #[test]
    fn parses_gzipped_body() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(BODY.as_bytes()).unwrap();
        let gz = enc.finish().unwrap();
        let snap = Snapshot::from_slice(&gz).unwrap();
        assert_eq!(snap.sat_count(), 2);
    }

    #[test]
    fn link_set_shifts_ground_ids_and_drops_self_loops() {
        let snap = Snapshot::from_slice(BODY.as_bytes()).unwrap();
        let links = snap.link_set();
        // (0,0) self-loop dropped; (1,0) canonicalized; GS0 shifted to 2.
        assert_eq!(links.len(), 2);
        assert!(links.contains(&Edge::new(0, 1).unwrap()));
        assert!(links.contains(&Edge::new(1, 2).unwrap()));
    }

    #[test]
    fn rejects_non_incrementing_ids() {
        let bad = BODY.replace(r#""id": 1, "lat": 11.0"#, r#""id": 7, "lat": 11.0"#);
        assert!(matches!(
            Snapshot::from_slice(bad.as_bytes()),
            Err(SnapshotError::Schema(_))
        ));
    }
}
