//! Per-tick link diff engine
//!
//! Given the previous and the current canonical link set, produce the
//! change-set `(del, update, add)` that the host agents materialize.
//! Link indices are sticky: an edge that disappears and later comes
//! back is handed its original index, which in turn keeps its derived
//! subnet and VXLAN id stable across the run.

use std::collections::{BTreeSet, HashMap};

/// Delay changes at or below this threshold (ms) are not propagated.
/// Sub-10 µs jitter between ticks has no observable effect on the
/// emulation but would reprogram every netem qdisc in the fleet.
pub const DELAY_EPSILON_MS: f64 = 0.01;

/// Canonical undirected edge over the shifted node-id space.
///
/// The smaller id is always the first endpoint, so an edge compares
/// and hashes the same no matter which direction it was reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Edge {
    a: u32,
    b: u32,
}

impl Edge {
    /// Build a canonical edge; self-loops yield `None`.
    pub fn new(x: u32, y: u32) -> Option<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Some(Self { a: x, b: y }),
            std::cmp::Ordering::Greater => Some(Self { a: y, b: x }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn endpoints(&self) -> (u32, u32) {
        (self.a, self.b)
    }
}

#[derive(Debug, Clone, Copy)]
struct LinkRecord {
    idx: u32,
    last_delay_ms: f64,
}

/// Registry of every edge ever seen, keyed to its stable index.
///
/// Entries are never removed; `len + 1` is therefore always a fresh
/// index and a re-added edge finds its old one.
#[derive(Debug, Default)]
pub struct LinkTable {
    records: HashMap<Edge, LinkRecord>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn idx_of(&self, e: Edge) -> Option<u32> {
        self.records.get(&e).map(|r| r.idx)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn assign(&mut self, e: Edge, delay_ms: f64) -> u32 {
        let fresh = self.records.len() as u32 + 1;
        let rec = self.records.entry(e).or_insert(LinkRecord {
            idx: fresh,
            last_delay_ms: delay_ms,
        });
        rec.last_delay_ms = delay_ms;
        rec.idx
    }
}

/// Output of one diff, in shifted node ids.
#[derive(Debug, Default, Clone)]
pub struct ChangeSet {
    pub del: Vec<Edge>,
    pub update: Vec<(Edge, f64)>,
    pub add: Vec<(Edge, f64, u32)>,
}

/// Diff `prev` against `curr`.
///
/// `delay_ms` is consulted for every current edge; the table records
/// the delay that was last shipped so that jitter below
/// [`DELAY_EPSILON_MS`] is suppressed.
pub fn diff<F>(
    prev: &BTreeSet<Edge>,
    curr: &BTreeSet<Edge>,
    table: &mut LinkTable,
    delay_ms: F,
) -> ChangeSet
where
    F: Fn(Edge) -> f64,
{
    let mut out = ChangeSet::default();

    for e in prev.difference(curr) {
        out.del.push(*e);
    }

    for e in curr.difference(prev) {
        let delay = delay_ms(*e);
        let idx = table.assign(*e, delay);
        out.add.push((*e, delay, idx));
    }

    for e in curr.intersection(prev) {
        let delay = delay_ms(*e);
        match table.records.get_mut(e) {
            Some(rec) => {
                if (delay - rec.last_delay_ms).abs() > DELAY_EPSILON_MS {
                    rec.last_delay_ms = delay;
                    out.update.push((*e, delay));
                }
            }
            // An edge we carried but never indexed (first diff of a
            // resumed run): adopt it without emitting an update.
            None => {
                table.assign(*e, delay);
            }
        }
    }

    tracing::debug!(
        "diff: {} del, {} update, {} add over {} current links",
        out.del.len(),
        out.update.len(),
        out.add.len(),
        curr.len()
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: u32, b: u32) -> Edge {
        Edge::new(a, b).unwrap()
    }

    #[test]
    fn canonical_under_endpoint_swap() {
        assert_eq!(edge(4, 2), edge(2, 4));
        assert_eq!(Edge::new(3, 3), None);
    }

    #[test]
    fn fresh_indices_are_monotone_from_one() {
        let mut table = LinkTable::new();
        assert_eq!(table.assign(edge(0, 1), 1.0), 1);
        assert_eq!(table.assign(edge(1, 2), 1.0), 2);
        assert_eq!(table.assign(edge(0, 1), 2.0), 1);
        assert_eq!(table.len(), 2);
    }
}
