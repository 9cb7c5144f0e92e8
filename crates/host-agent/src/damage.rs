//! Damage and recovery
//!
//! Damaging a node pins every netem qdisc in its namespace to 100%
//! loss while keeping the programmed delay, and records the node in
//! the damage file so later `networks` updates keep it dark. Recovery
//! restores the declared per-class loss and removes the file.

use anyhow::Result;
use netlink_emu::qdisc;
use topology::naming;
use tracing::{info, warn};

use crate::state::Agent;

pub async fn damage(agent: &Agent, list: &str) -> Result<()> {
    let mut recorded = Vec::new();
    for node in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if !agent.is_mine(node) {
            continue;
        }
        set_all_loss(node, 100.0, 100.0).await?;
        recorded.push(node.to_string());
        info!("[{}] damage node: {}", agent.machine_id, node);
    }
    agent.record_damage(&recorded)?;
    Ok(())
}

pub async fn recovery(agent: &Agent, isl_loss: f64, gsl_loss: f64) -> Result<()> {
    let path = agent.damage_path();
    if !path.exists() {
        return Ok(());
    }
    for node in std::fs::read_to_string(&path)?
        .lines()
        .map(str::trim)
        .filter(|n| !n.is_empty())
    {
        set_all_loss(node, isl_loss, gsl_loss).await?;
        info!("[{}] recover node: {}", agent.machine_id, node);
    }
    std::fs::remove_file(&path)?;
    Ok(())
}

/// Rewrite the loss of every netem qdisc in `node`'s namespace,
/// preserving each interface's current delay. The interface name is
/// the peer, which decides whether the ISL or the GSL loss applies.
async fn set_all_loss(node: &str, isl_loss: f64, gsl_loss: f64) -> Result<()> {
    for entry in qdisc::list(node).await? {
        let loss = if naming::is_gsl(node, &entry.dev) {
            gsl_loss
        } else {
            isl_loss
        };
        if let Err(e) = qdisc::set_loss(node, &entry.dev, &entry.delay, loss).await {
            warn!("failed to set loss on {}/{}: {}", node, entry.dev, e);
        }
    }
    Ok(())
}
