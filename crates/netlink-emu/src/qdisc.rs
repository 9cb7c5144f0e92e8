//! Netem qdisc programming
//!
//! Shaping goes through the `tc` binary spawned while the calling
//! thread holds a [`NetnsGuard`]; the child inherits the namespace at
//! fork time. Netlink would also work but `tc` keeps the netem
//! parameter surface (delay/loss/rate string grammar) in one place
//! that matches what an operator would type by hand.

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::netns::{NetnsError, NetnsGuard};

#[derive(Error, Debug)]
pub enum QdiscError {
    #[error("namespace error: {0}")]
    Netns(#[from] NetnsError),

    #[error("failed to run tc: {0}")]
    Spawn(std::io::Error),

    #[error("tc {args} failed: {stderr}")]
    Failed { args: String, stderr: String },
}

/// Netem parameters for one direction of a link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetemParams {
    pub delay_ms: f64,
    pub bw_gbit: f64,
    pub loss_pct: f64,
}

/// One root qdisc as reported by `tc qdisc show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QdiscView {
    pub dev: String,
    /// Delay token verbatim (e.g. `13.4ms`), re-usable in a change.
    pub delay: String,
}

/// Run `tc` with the given arguments inside a namespace.
async fn run_tc(ns: &str, args: &[String]) -> Result<String, QdiscError> {
    debug!("tc {:?} in {}", args, ns);
    let mut cmd = Command::new("tc");
    cmd.args(args)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());

    // Spawn while inside the namespace; the child keeps it for life.
    let child = {
        let _guard = NetnsGuard::enter(ns)?;
        cmd.spawn().map_err(QdiscError::Spawn)?
    };

    let out = child.wait_with_output().await.map_err(QdiscError::Spawn)?;
    if !out.status.success() {
        return Err(QdiscError::Failed {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

fn netem_args(op: &str, dev: &str, p: NetemParams) -> Vec<String> {
    vec![
        "qdisc".into(),
        op.into(),
        "dev".into(),
        dev.into(),
        "root".into(),
        "netem".into(),
        "delay".into(),
        format!("{}ms", p.delay_ms),
        "loss".into(),
        format!("{}%", p.loss_pct),
        "rate".into(),
        format!("{}Gbit", p.bw_gbit),
    ]
}

/// Install the root netem qdisc on a fresh interface.
pub async fn install(ns: &str, dev: &str, p: NetemParams) -> Result<(), QdiscError> {
    run_tc(ns, &netem_args("add", dev, p)).await.map(|_| ())
}

/// Reprogram the root netem qdisc of a live interface.
pub async fn change(ns: &str, dev: &str, p: NetemParams) -> Result<(), QdiscError> {
    run_tc(ns, &netem_args("change", dev, p)).await.map(|_| ())
}

/// Rewrite only the loss of a live qdisc, keeping its current delay.
pub async fn set_loss(ns: &str, dev: &str, delay: &str, loss_pct: f64) -> Result<(), QdiscError> {
    let args = vec![
        "qdisc".into(),
        "change".into(),
        "dev".into(),
        dev.into(),
        "root".into(),
        "netem".into(),
        "delay".into(),
        delay.into(),
        "loss".into(),
        format!("{}%", loss_pct),
    ];
    run_tc(ns, &args).await.map(|_| ())
}

/// List the netem qdiscs of a namespace.
pub async fn list(ns: &str) -> Result<Vec<QdiscView>, QdiscError> {
    let out = run_tc(ns, &["qdisc".into(), "show".into()]).await?;
    Ok(parse_qdisc_show(&out))
}

/// Parse `tc qdisc show` output into per-device netem entries.
pub fn parse_qdisc_show(out: &str) -> Vec<QdiscView> {
    let mut views = Vec::new();
    for line in out.lines() {
        let toks: Vec<&str> = line.split_whitespace().collect();
        // "qdisc netem 8001: dev SAT2 root refcnt 2 ... delay 13.4ms loss 1%"
        if toks.len() < 5 || toks[0] != "qdisc" || toks[1] != "netem" {
            continue;
        }
        let dev = toks[4];
        if dev == "lo" {
            continue;
        }
        let delay = toks
            .iter()
            .position(|t| *t == "delay")
            .and_then(|i| toks.get(i + 1));
        if let Some(delay) = delay {
            views.push(QdiscView {
                dev: dev.to_string(),
                delay: delay.to_string(),
            });
        }
    }
    views
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netem_args_mirror_the_tc_grammar() {
        let args = netem_args(
            "add",
            "SAT2",
            NetemParams {
                delay_ms: 12.5,
                bw_gbit: 10.0,
                loss_pct: 1.0,
            },
        );
        assert_eq!(
            args.join(" "),
            "qdisc add dev SAT2 root netem delay 12.5ms loss 1% rate 10Gbit"
        );
    }

    #[test]
    fn parses_qdisc_show_output() {
        let out = "\
qdisc noqueue 0: dev lo root refcnt 2
qdisc netem 8001: dev SAT2 root refcnt 2 limit 1000 delay 13.4ms loss 1%
qdisc netem 8002: dev GS0 root refcnt 2 limit 1000 delay 2.1ms rate 10Gbit
qdisc fq_codel 0: dev eth0 root refcnt 2 limit 10240p
";
        let views = parse_qdisc_show(out);
        assert_eq!(
            views,
            vec![
                QdiscView {
                    dev: "SAT2".into(),
                    delay: "13.4ms".into()
                },
                QdiscView {
                    dev: "GS0".into(),
                    delay: "2.1ms".into()
                },
            ]
        );
    }

    #[test]
    fn qdisc_show_skips_loopback_netem() {
        let out = "qdisc netem 8001: dev lo root refcnt 2 delay 1ms\n";
        assert!(parse_qdisc_show(out).is_empty());
    }
}
