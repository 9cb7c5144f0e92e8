//! The four link operations
//!
//! Interfaces are named after the peer they face: inside node `A` the
//! device carrying the A-B link is called `B`. Names therefore only
//! ever collide across namespaces, never within one, and a device name
//! plus the namespace it lives in fully identifies a link end.
//!
//! Invariant shared by both add paths: addresses are assigned first,
//! then the netem qdisc is installed, and only then is the interface
//! brought up, so no packet ever crosses an unshaped link.

use std::net::{IpAddr, Ipv4Addr};
use std::os::fd::AsRawFd;

use futures::TryStreamExt;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::{sleep, Duration};
use tracing::debug;

use crate::addr::{self, AddrError, EndpointAddrs};
use crate::netns::{handle_in, host_handle, NetnsError};
use crate::qdisc::{self, NetemParams, QdiscError};

/// VXLAN destination port; the link index doubles as the VNI.
pub const VXLAN_PORT: u16 = 4789;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("namespace error: {0}")]
    Netns(#[from] NetnsError),

    #[error("address derivation failed: {0}")]
    Addr(#[from] AddrError),

    #[error("qdisc error: {0}")]
    Qdisc(#[from] QdiscError),

    #[error("netlink operation failed: {0}")]
    Netlink(#[from] rtnetlink::Error),

    #[error("interface '{0}' not found")]
    NotFound(String),

    #[error("failed to run ip: {0}")]
    Ip(std::io::Error),

    #[error("ip {args} failed: {stderr}")]
    IpFailed { args: String, stderr: String },
}

async fn ifindex(handle: &rtnetlink::Handle, name: &str) -> Result<u32, LinkError> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(Some(link)) => Ok(link.header.index),
        _ => Err(LinkError::NotFound(name.to_string())),
    }
}

/// Move a host-namespace interface into a node's namespace.
async fn move_into(
    handle: &rtnetlink::Handle,
    index: u32,
    ns_name: &str,
) -> Result<(), LinkError> {
    let ns = std::fs::File::open(container_ns_path(ns_name))
        .map_err(|_| LinkError::NotFound(ns_name.to_string()))?;
    handle
        .link()
        .set(index)
        .setns_by_fd(ns.as_raw_fd())
        .execute()
        .await?;
    Ok(())
}

fn container_ns_path(name: &str) -> String {
    format!("/run/netns/{name}")
}

/// Configure the `node`-side device of a link: addresses, netem, up.
async fn bring_up_endpoint(
    node: &str,
    peer: &str,
    addrs: EndpointAddrs,
    params: NetemParams,
) -> Result<(), LinkError> {
    let handle = handle_in(node).await?;
    let index = ifindex(&handle, peer).await?;

    handle
        .address()
        .add(index, IpAddr::V4(addrs.v4.ip()), addrs.v4.prefix())
        .execute()
        .await?;
    handle
        .address()
        .add(index, IpAddr::V6(addrs.v6.ip()), addrs.v6.prefix())
        .execute()
        .await?;

    qdisc::install(node, peer, params).await?;

    handle.link().set(index).up().execute().await?;
    Ok(())
}

/// Create a link between two nodes homed on this host.
///
/// A veth pair is created in the host namespace under the final
/// peer-facing names and each end is pushed into its node before
/// being addressed and shaped.
pub async fn add_intra(
    name1: &str,
    name2: &str,
    idx: u32,
    gsl: bool,
    params: NetemParams,
) -> Result<(), LinkError> {
    debug!("add intra link {} <-> {} (idx {})", name1, name2, idx);
    let host = host_handle().await?;

    // Device in name1 faces name2 and vice versa.
    host.link()
        .add()
        .veth(name2.to_string(), name1.to_string())
        .execute()
        .await?;
    sleep(Duration::from_millis(50)).await;

    let end1 = ifindex(&host, name2).await?;
    let end2 = ifindex(&host, name1).await?;
    move_into(&host, end1, name1).await?;
    move_into(&host, end2, name2).await?;

    let prefix = addr::derive(idx, gsl)?;
    bring_up_endpoint(name1, name2, addr::endpoint(&prefix, name1, name2)?, params).await?;
    bring_up_endpoint(name2, name1, addr::endpoint(&prefix, name2, name1)?, params).await?;
    Ok(())
}

/// Create the local half of a link whose peer lives on another host.
///
/// The VXLAN device is created straight into `local`'s namespace with
/// the underlay bound to the host namespace; the peer host issues the
/// mirror call with the roles swapped. Which end takes `.10` is
/// decided by name order, so the two calls agree without coordination.
pub async fn add_inter(
    idx: u32,
    local: &str,
    peer: &str,
    peer_host_ip: Ipv4Addr,
    gsl: bool,
    params: NetemParams,
) -> Result<(), LinkError> {
    debug!(
        "add inter link {} -> {} via {} (vni {})",
        local, peer, peer_host_ip, idx
    );

    let args = [
        "link".to_string(),
        "add".into(),
        peer.into(),
        "netns".into(),
        local.into(),
        "type".into(),
        "vxlan".into(),
        "id".into(),
        idx.to_string(),
        "remote".into(),
        peer_host_ip.to_string(),
        "dstport".into(),
        VXLAN_PORT.to_string(),
    ];
    let out = Command::new("ip")
        .args(&args)
        .output()
        .await
        .map_err(LinkError::Ip)?;
    if !out.status.success() {
        return Err(LinkError::IpFailed {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        });
    }

    let prefix = addr::derive(idx, gsl)?;
    bring_up_endpoint(local, peer, addr::endpoint(&prefix, local, peer)?, params).await?;
    Ok(())
}

/// Retime the `node`-side half of a live link. A damaged node keeps
/// reporting 100% loss no matter what the change-set declares.
pub async fn update(
    node: &str,
    peer: &str,
    params: NetemParams,
    damaged: bool,
) -> Result<(), LinkError> {
    let params = if damaged {
        NetemParams {
            loss_pct: 100.0,
            ..params
        }
    } else {
        params
    };
    qdisc::change(node, peer, params).await?;
    Ok(())
}

/// Tear down a link from `node`'s side. Deleting one end of a veth
/// removes both; deleting a VXLAN device removes the local half only,
/// with the peer host doing the same from its side.
pub async fn del(node: &str, peer: &str) -> Result<(), LinkError> {
    debug!("del link {} -> {}", node, peer);
    let handle = handle_in(node).await?;
    let index = ifindex(&handle, peer).await?;
    handle.link().del(index).execute().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[cfg(feature = "sudo-tests")]
    async fn intra_link_round_trip() {
        // Requires two pinned namespaces named below plus CAP_NET_ADMIN.
        let params = NetemParams {
            delay_ms: 5.0,
            bw_gbit: 1.0,
            loss_pct: 0.0,
        };
        add_intra("SAT900", "SAT901", 1, false, params).await.unwrap();
        del("SAT900", "SAT901").await.unwrap();
    }
}
