//! Teardown
//!
//! Removes the damage file, the constellation's `/run/netns` entries
//! and every container recorded in the PID index. The namespace sweep
//! matches the emulator's own naming only, since `/run/netns` is
//! shared with whatever else runs on the host.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::state::{parse_pid_index, Agent};

pub async fn run(agent: &Agent) -> Result<()> {
    let damage = agent.damage_path();
    if damage.exists() {
        std::fs::remove_file(&damage).context("failed to remove damage file")?;
    }

    if let Ok(entries) = std::fs::read_dir("/run/netns") {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if topology::naming::is_emulated_ns(name) && entry.path().is_symlink() {
                if let Err(e) = std::fs::remove_file(entry.path()) {
                    warn!("failed to remove netns link {}: {}", name, e);
                }
            }
        }
    }

    let pid_path = agent.pid_path();
    if !pid_path.exists() {
        return Ok(());
    }
    let index = parse_pid_index(&std::fs::read_to_string(&pid_path)?)?;
    for (name, pid) in index {
        match kill(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) => debug!("[{}] killed {} (pid {})", agent.machine_id, name, pid),
            Err(Errno::ESRCH) => {}
            Err(e) => warn!("[{}] failed to kill {}: {}", agent.machine_id, name, e),
        }
    }
    std::fs::remove_file(&pid_path).context("failed to remove pid index")?;
    Ok(())
}
