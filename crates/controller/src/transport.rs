//! Worker command channel
//!
//! One SSH session per worker, multiplexed for the lifetime of the
//! run. The channel carries two things: short-lived host-agent
//! invocations with captured output, and file pushes streamed to the
//! worker's working directory. Authentication is the operator's ssh
//! key; the control plane assumes a trusted LAN.

use std::sync::Arc;

use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::MachineConfig;

pub const AGENT_FILENAME: &str = "host-agent";
pub const ASSIGN_FILENAME: &str = "assign.json";
pub const LINK_FILENAME: &str = "link.json";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to reach {0}: {1}")]
    Connect(String, openssh::Error),

    #[error("ssh channel error: {0}")]
    Ssh(#[from] openssh::Error),

    #[error("i/o on ssh channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote '{verb}' exited with {status}: {stderr}")]
    Remote {
        verb: String,
        status: i32,
        stderr: String,
    },

    #[error("remote stream not available")]
    Stream,
}

pub struct Worker {
    pub id: u32,
    pub host: String,
    pub workdir: String,
    session: Arc<Session>,
}

impl Worker {
    pub async fn connect(id: u32, cfg: &MachineConfig) -> Result<Self, TransportError> {
        let session = SessionBuilder::default()
            .user(cfg.username.clone())
            .port(cfg.port)
            .known_hosts_check(KnownHosts::Accept)
            .connect(&cfg.ip)
            .await
            .map_err(|e| TransportError::Connect(cfg.ip.clone(), e))?;
        info!("[{}] connected to {}", id, cfg.ip);
        Ok(Self {
            id,
            host: cfg.ip.clone(),
            workdir: cfg.workdir.clone(),
            session: Arc::new(session),
        })
    }

    pub fn agent_path(&self) -> String {
        format!("{}/{}", self.workdir, AGENT_FILENAME)
    }

    /// Arguments of a host-agent verb on this worker.
    pub fn verb(&self, name: &str, extra: &[String]) -> Vec<String> {
        let mut args = vec![name.to_string(), self.id.to_string(), self.workdir.clone()];
        args.extend_from_slice(extra);
        args
    }

    /// Ship the agent binary and the assignment into the workdir.
    pub async fn provision(&self, agent_bin: &[u8], assignment: &[u8]) -> Result<(), TransportError> {
        self.host_command("mkdir", &["-p", &self.workdir]).await?;
        self.push(agent_bin, AGENT_FILENAME).await?;
        self.host_command("chmod", &["+x", &self.agent_path()])
            .await?;
        self.push(assignment, ASSIGN_FILENAME).await?;
        Ok(())
    }

    /// Run a plain command on the worker host (not inside a node).
    async fn host_command(&self, program: &str, args: &[&str]) -> Result<(), TransportError> {
        let out = self.session.command(program).args(args).output().await?;
        if !out.status.success() {
            return Err(TransportError::Remote {
                verb: program.to_string(),
                status: out.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }
        Ok(())
    }

    /// Stream `bytes` into `<workdir>/<filename>`.
    pub async fn push(&self, bytes: &[u8], filename: &str) -> Result<(), TransportError> {
        debug!("[{}] pushing {} ({} bytes)", self.id, filename, bytes.len());
        let mut child = self
            .session
            .command("sh")
            .arg("-c")
            .arg(format!("cat > {}/{}", self.workdir, filename))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .await?;

        let mut stdin = child.stdin().take().ok_or(TransportError::Stream)?;
        stdin.write_all(bytes).await?;
        drop(stdin);

        let out = child.wait_with_output().await?;
        if !out.status.success() {
            return Err(TransportError::Remote {
                verb: format!("push {filename}"),
                status: out.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }
        Ok(())
    }

    /// Run one host-agent verb to completion. The agent logs to
    /// stderr; surface those lines under this worker's id.
    pub async fn agent(&self, args: &[String]) -> Result<(), TransportError> {
        let verb = args.first().cloned().unwrap_or_default();
        debug!("[{}] host-agent {:?}", self.id, args);
        let out = self
            .session
            .command(self.agent_path())
            .args(args)
            .output()
            .await?;

        for line in String::from_utf8_lossy(&out.stderr).lines() {
            info!("[{}] {}", self.id, line);
        }
        if !out.status.success() {
            return Err(TransportError::Remote {
                verb,
                status: out.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            });
        }
        Ok(())
    }

    /// Spawn a host-agent verb with live stdout/stderr, for the exec
    /// facade. The remote child is reaped in the background once both
    /// streams close.
    pub async fn agent_stream(
        &self,
        args: &[String],
    ) -> Result<
        (
            impl tokio::io::AsyncRead + Send + Unpin + 'static,
            impl tokio::io::AsyncRead + Send + Unpin + 'static,
        ),
        TransportError,
    > {
        let mut cmd = self.session.clone().arc_command(self.agent_path());
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = cmd.spawn().await?;

        let stdout = child.stdout().take().ok_or(TransportError::Stream)?;
        let stderr = child.stderr().take().ok_or(TransportError::Stream)?;

        let id = self.id;
        tokio::spawn(async move {
            if let Err(e) = child.wait().await {
                warn!("[{}] streamed command did not exit cleanly: {}", id, e);
            }
        });

        Ok((stdout, stderr))
    }
}
