//! Run configuration
//!
//! One JSON file describes a whole run: the constellation service to
//! poll, the tick interval, the declared per-class link shaping, where
//! the facade listens, and the worker machines.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Constellation name passed through to the service.
    pub constellation: String,
    /// Base URL of the constellation service.
    pub api_url: String,
    /// Tick interval in seconds.
    pub step: f64,

    pub isl_bw: f64,
    pub isl_loss: f64,
    pub gsl_bw: f64,
    pub gsl_loss: f64,

    /// Local path of the host-agent binary shipped to every worker.
    pub agent_bin: PathBuf,

    /// Facade bind address.
    #[serde(default = "default_facade_listen")]
    pub facade_listen: String,

    pub machines: Vec<MachineConfig>,
}

fn default_facade_listen() -> String {
    "0.0.0.0:5000".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    /// Address the controller reaches the worker at; also the VXLAN
    /// underlay endpoint the other workers tunnel to.
    #[serde(rename = "IP")]
    pub ip: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    /// Absolute working directory on the worker.
    pub workdir: String,
}

fn default_ssh_port() -> u16 {
    22
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Config = serde_json::from_slice(&raw)
            .with_context(|| format!("malformed config {}", path.display()))?;
        if config.machines.is_empty() {
            anyhow::bail!("config lists no machines");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let raw = r#"{
            "constellation": "starlink550",
            "api_url": "http://127.0.0.1:9000/position",
            "step": 10.0,
            "isl_bw": 10.0, "isl_loss": 0.0,
            "gsl_bw": 5.0, "gsl_loss": 1.0,
            "agent_bin": "./target/release/host-agent",
            "machines": [
                {"IP": "192.168.1.10", "username": "root", "workdir": "/var/lib/emu"},
                {"IP": "192.168.1.11", "port": 2222, "username": "root", "workdir": "/var/lib/emu"}
            ]
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sn.json");
        std::fs::write(&path, raw).unwrap();

        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.machines.len(), 2);
        assert_eq!(cfg.machines[0].port, 22);
        assert_eq!(cfg.machines[1].port, 2222);
        assert_eq!(cfg.facade_listen, "0.0.0.0:5000");
    }

    #[test]
    fn rejects_an_empty_cluster() {
        let raw = r#"{
            "constellation": "x", "api_url": "http://x", "step": 1.0,
            "isl_bw": 1, "isl_loss": 0, "gsl_bw": 1, "gsl_loss": 0,
            "agent_bin": "host-agent", "machines": []
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sn.json");
        std::fs::write(&path, raw).unwrap();
        assert!(Config::load(&path).is_err());
    }
}
