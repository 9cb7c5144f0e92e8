//! Link emulation primitives
//!
//! This crate wires the virtual links between emulated nodes: veth
//! pairs when both endpoints live on the same host, VXLAN tunnels when
//! they do not, with deterministic addressing derived from the link
//! index and a root netem qdisc shaping every interface. All
//! operations are scoped to a single host; cross-host consistency
//! comes from both sides running the same operation against the same
//! change-set.

pub mod addr;
pub mod link;
pub mod netns;
pub mod qdisc;

pub use link::{add_inter, add_intra, del, update, LinkError, VXLAN_PORT};
pub use netns::NetnsGuard;
pub use qdisc::NetemParams;
