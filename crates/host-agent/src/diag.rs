//! User diagnostics inside the emulated nodes
//!
//! Thin wrappers over the usual tools, entered through the pause
//! container's namespaces. Output goes straight to the caller's
//! stdout, which the controller's façade streams onward.

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::state::Agent;

/// Run an arbitrary command inside a node; returns its exit code.
pub async fn exec(agent: &Agent, node: &str, argv: &[String]) -> Result<i32> {
    if argv.is_empty() {
        bail!("no command given");
    }
    let pid = agent.pid_of(node)?;
    let mut cmd = container::exec::enter_all(pid, &argv[0]);
    cmd.args(&argv[1..]);
    let status = cmd
        .status()
        .await
        .with_context(|| format!("failed to run {:?} in {}", argv, node))?;
    Ok(status.code().unwrap_or(1))
}

/// `(device, address)` pairs of a node, loopback included.
async fn brief_addrs(pid: i32) -> Result<Vec<(String, String)>> {
    let out = container::exec::enter_all(pid, "ip")
        .args(["-br", "addr", "show"])
        .output()
        .await
        .context("failed to list addresses")?;
    if !out.status.success() {
        bail!("ip addr show failed: {}", String::from_utf8_lossy(&out.stderr));
    }

    let mut addrs = Vec::new();
    for line in String::from_utf8_lossy(&out.stdout).lines() {
        let toks: Vec<&str> = line.split_whitespace().collect();
        if toks.len() < 3 {
            continue;
        }
        let dev = toks[0].split('@').next().unwrap_or(toks[0]).to_string();
        for addr in &toks[2..] {
            addrs.push((dev.clone(), addr.to_string()));
        }
    }
    Ok(addrs)
}

pub async fn show_ip(agent: &Agent, node: &str) -> Result<()> {
    let pid = agent.pid_of(node)?;
    for (dev, addr) in brief_addrs(pid).await? {
        println!("{dev} {addr}");
    }
    Ok(())
}

/// The address of `dst` on the interface that faces `src`; interfaces
/// are named after their peer, so this is a plain name match.
async fn peer_addr(agent: &Agent, src: &str, dst: &str) -> Result<String> {
    let dst_pid = agent.pid_of(dst)?;
    let addrs = brief_addrs(dst_pid).await?;
    let addr = addrs
        .iter()
        .find(|(dev, _)| dev == src)
        .or_else(|| addrs.iter().find(|(dev, _)| dev != "lo"))
        .map(|(_, addr)| addr.clone())
        .with_context(|| format!("{dst} has no addressed interface"))?;
    Ok(addr[..addr.rfind('/').unwrap_or(addr.len())].to_string())
}

pub async fn ping(agent: &Agent, src: &str, dst: &str) -> Result<i32> {
    let addr = peer_addr(agent, src, dst).await?;
    info!("ping {} -> {} ({})", src, dst, addr);
    let pid = agent.pid_of(src)?;
    let status = container::exec::enter_all(pid, "ping")
        .args(["-c", "4", "-i", "0.01", &addr])
        .status()
        .await
        .context("failed to run ping")?;
    Ok(status.code().unwrap_or(1))
}

pub async fn iperf(agent: &Agent, src: &str, dst: &str) -> Result<i32> {
    let addr = peer_addr(agent, src, dst).await?;
    let dst_pid = agent.pid_of(dst)?;
    let src_pid = agent.pid_of(src)?;

    let mut server = container::exec::enter_all(dst_pid, "iperf3")
        .arg("-s")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("failed to start iperf3 server")?;

    let status = container::exec::enter_all(src_pid, "iperf3")
        .args(["-c", &addr, "-t", "5"])
        .status()
        .await
        .context("failed to run iperf3 client")?;

    if let Err(e) = server.kill().await {
        warn!("failed to stop iperf3 server: {}", e);
    }
    Ok(status.code().unwrap_or(1))
}

/// Install static /24 routes on `src` towards every v4 subnet of `dst`.
pub async fn static_route(agent: &Agent, src: &str, dst: &str, via_dev: &str) -> Result<()> {
    let src_pid = agent.pid_of(src)?;
    let dst_pid = agent.pid_of(dst)?;
    for (dev, addr) in brief_addrs(dst_pid).await? {
        if dev == "lo" || !addr.contains('.') {
            continue;
        }
        let bare = &addr[..addr.rfind('/').unwrap_or(addr.len())];
        let Some(last_dot) = bare.rfind('.') else { continue };
        let prefix = format!("{}.0/24", &bare[..last_dot]);
        let status = container::exec::enter_net(src_pid, "ip")
            .args(["route", "add", &prefix, "dev", via_dev])
            .status()
            .await
            .context("failed to run ip route add")?;
        if !status.success() {
            warn!("route {} via {} on {} not installed", prefix, via_dev, src);
        }
    }
    Ok(())
}

pub async fn rtable(agent: &Agent, node: &str) -> Result<i32> {
    let pid = agent.pid_of(node)?;
    let status = container::exec::enter_net(pid, "route")
        .status()
        .await
        .context("failed to run route")?;
    Ok(status.code().unwrap_or(1))
}

/// Start the routing daemon inside the selected nodes (`all` or a
/// comma-separated list). The daemon forks itself; a non-zero exit
/// here means it never came up.
pub async fn routed(agent: &Agent, selector: &str) -> Result<()> {
    let conf = agent.workdir.join("bird.conf");
    let ctl = agent.workdir.join("bird.ctl");
    let index = agent.pid_index()?;

    let nodes: Vec<String> = if selector == "all" {
        index.keys().cloned().collect()
    } else {
        selector
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty() && index.contains_key(*n))
            .map(str::to_string)
            .collect()
    };

    for node in nodes {
        let pid = index[&node];
        let status = container::exec::enter_all(pid, "bird")
            .args([
                "-c",
                &conf.to_string_lossy(),
                "-s",
                &ctl.to_string_lossy(),
            ])
            .status()
            .await
            .context("failed to start bird")?;
        if !status.success() {
            warn!("[{}] bird did not start in {}", agent.machine_id, node);
        }
    }
    Ok(())
}

pub fn list(agent: &Agent) -> Result<()> {
    println!("{:<20} STATE", "NODE");
    let mut names: Vec<String> = agent.pid_index()?.into_keys().collect();
    names.sort();
    for name in names {
        let state = if agent.damage.contains(&name) {
            "Damaged"
        } else {
            "OK"
        };
        println!("{name:<20} {state}");
    }
    Ok(())
}
