//! Scoped network namespace entry
//!
//! Namespace membership is a per-thread property on Linux. Entry is
//! therefore modeled as an RAII guard: construction saves the calling
//! thread's current namespace and switches to the target, drop
//! switches back. Callers must not move across threads while a guard
//! is live; the host agent runs single-threaded for exactly this
//! reason.

use std::fs::File;
use std::path::Path;

use nix::sched::{setns, CloneFlags};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum NetnsError {
    #[error("namespace '{0}' not found under /run/netns")]
    NotFound(String),

    #[error("failed to open namespace handle: {0}")]
    Open(std::io::Error),

    #[error("failed to enter namespace: {0}")]
    SetNs(nix::Error),

    #[error("netlink connection failed: {0}")]
    Connection(std::io::Error),
}

/// RAII guard holding the original namespace open for restore.
pub struct NetnsGuard {
    original: File,
    name: String,
}

impl NetnsGuard {
    /// Enter the namespace pinned as `/run/netns/<name>`.
    pub fn enter(name: &str) -> Result<Self, NetnsError> {
        let path = Path::new("/run/netns").join(name);
        if !path.exists() {
            return Err(NetnsError::NotFound(name.to_string()));
        }

        let original = File::open("/proc/self/ns/net").map_err(NetnsError::Open)?;
        let target = File::open(&path).map_err(NetnsError::Open)?;
        setns(&target, CloneFlags::CLONE_NEWNET).map_err(NetnsError::SetNs)?;
        debug!("entered namespace {}", name);

        Ok(Self {
            original,
            name: name.to_string(),
        })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(&self.original, CloneFlags::CLONE_NEWNET) {
            warn!("failed to restore host namespace from {}: {}", self.name, e);
        }
    }
}

/// Open an rtnetlink handle bound to a node's namespace.
///
/// The netlink socket captures the thread's namespace at creation, so
/// the connection is built while the guard is held and stays valid
/// after the thread has returned to the host namespace.
pub async fn handle_in(name: &str) -> Result<rtnetlink::Handle, NetnsError> {
    let handle = {
        let _guard = NetnsGuard::enter(name)?;
        let (connection, handle, _) =
            rtnetlink::new_connection().map_err(NetnsError::Connection)?;
        tokio::spawn(connection);
        handle
    };
    Ok(handle)
}

/// Open an rtnetlink handle in the host namespace.
pub async fn host_handle() -> Result<rtnetlink::Handle, NetnsError> {
    let (connection, handle, _) = rtnetlink::new_connection().map_err(NetnsError::Connection)?;
    tokio::spawn(connection);
    Ok(handle)
}
