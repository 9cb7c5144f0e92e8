//! Constellation topology model
//!
//! This crate holds the pure (no-I/O, no-root) core of the emulator: the
//! snapshot schema pulled from the constellation service, great-circle
//! delay computation, the per-tick link diff engine with stable link
//! indices, the initial node placement, and the on-disk schemas shared
//! between the controller and the host agents.

pub mod changeset;
pub mod diff;
pub mod geo;
pub mod naming;
pub mod ownership;
pub mod placement;
pub mod snapshot;

pub use changeset::{AddLink, ChangeSetFile, DelLink, UpdateLink};
pub use diff::{diff, ChangeSet, Edge, LinkTable, DELAY_EPSILON_MS};
pub use geo::{propagation_delay_ms, GeoPos};
pub use placement::Assignment;
pub use snapshot::{Snapshot, SnapshotError};
