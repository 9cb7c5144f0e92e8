//! Node initialization
//!
//! `nodes` is idempotent: any previous run is cleaned away, then every
//! node homed on this machine gets an overlay directory and a pause
//! container, the PID index is rewritten, and each container's network
//! namespace is pinned and set up for forwarding.

use std::fmt::Write as _;

use anyhow::{bail, Context, Result};
use nix::unistd::Pid;
use tokio::process::Command;
use topology::naming;
use tracing::{debug, info};

use crate::clean;
use crate::state::Agent;

pub async fn run(agent: &Agent) -> Result<()> {
    clean::run(agent).await?;
    raise_neigh_thresholds().await?;

    let mut index = String::new();
    let mut spawned: Vec<(String, Pid)> = Vec::new();

    // Satellites fill the first index line, ground stations the last.
    let mut sat_cnt = 0usize;
    for (name, mid) in agent
        .assignment
        .node_name
        .iter()
        .zip(&agent.assignment.node_mid)
    {
        if !naming::is_satellite(name) {
            continue;
        }
        if *mid != agent.machine_id {
            index.push_str("NA ");
            continue;
        }
        let pid = spawn_node(agent, name)?;
        let _ = write!(index, "{name}:{pid} ");
        spawned.push((name.clone(), pid));
        sat_cnt += 1;
    }
    index.push('\n');
    info!("[{}] {} satellites initialized", agent.machine_id, sat_cnt);

    let mut gs_names = Vec::new();
    for (name, mid) in agent
        .assignment
        .node_name
        .iter()
        .zip(&agent.assignment.node_mid)
    {
        if !naming::is_ground(name) {
            continue;
        }
        if *mid != agent.machine_id {
            index.push_str("NA ");
            continue;
        }
        let pid = spawn_node(agent, name)?;
        let _ = write!(index, "{name}:{pid} ");
        spawned.push((name.clone(), pid));
        gs_names.push(name.clone());
    }
    index.push('\n');
    info!("[{}] GS: {}", agent.machine_id, gs_names.join(","));

    std::fs::write(agent.pid_path(), index).context("failed to write pid index")?;

    for (name, pid) in &spawned {
        container::pin_netns(*pid, name)?;
        enable_forwarding(pid.as_raw(), name).await?;
    }
    Ok(())
}

fn spawn_node(agent: &Agent, name: &str) -> Result<Pid> {
    let dir = agent.workdir.join("overlay").join(name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create overlay dir for {name}"))?;
    let pid = container::spawn_pause(&dir, name)
        .with_context(|| format!("failed to start container {name}"))?;
    debug!("[{}] {} running as pid {}", agent.machine_id, name, pid);
    Ok(pid)
}

/// Dense meshes overflow the kernel's default neighbor tables long
/// before they stress anything else; raise the thresholds up front.
async fn raise_neigh_thresholds() -> Result<()> {
    let thresholds = [
        ("gc_thresh1", "4096"),
        ("gc_thresh2", "8192"),
        ("gc_thresh3", "16384"),
    ];
    for (key, value) in thresholds {
        sysctl(&format!("net.ipv4.neigh.default.{key}={value}"), true).await?;
    }
    for (key, value) in thresholds {
        // IPv6 may be compiled out; don't fail the whole init over it.
        sysctl(&format!("net.ipv6.neigh.default.{key}={value}"), false).await?;
    }
    Ok(())
}

async fn sysctl(assignment: &str, required: bool) -> Result<()> {
    let status = Command::new("sysctl")
        .arg(assignment)
        .stdout(std::process::Stdio::null())
        .status()
        .await
        .context("failed to run sysctl")?;
    if required && !status.success() {
        bail!("sysctl {assignment} failed");
    }
    Ok(())
}

async fn enable_forwarding(pid: i32, name: &str) -> Result<()> {
    for key in [
        "net.ipv4.conf.all.forwarding=1",
        "net.ipv6.conf.all.forwarding=1",
    ] {
        let status = container::exec::enter_all(pid, "sysctl")
            .arg(key)
            .stdout(std::process::Stdio::null())
            .status()
            .await
            .with_context(|| format!("failed to run sysctl inside {name}"))?;
        if !status.success() {
            bail!("enabling forwarding ({key}) inside {name} failed");
        }
    }
    Ok(())
}
