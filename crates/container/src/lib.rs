//! Pause-container primitive
//!
//! Every emulated node is one long-lived "pause" process holding a
//! fresh set of mount/uts/ipc/pid/net namespaces and an overlay root
//! filesystem. The process does nothing but sleep; its PID is the
//! anchor that link operations and user commands attach to, and its
//! network namespace is pinned under `/run/netns/<name>` so standard
//! tooling can enter it by name.

pub mod exec;

use std::io::Read;
use std::os::fd::BorrowedFd;
use std::path::{Path, PathBuf};

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use nix::sched::CloneFlags;
use nix::sys::signal::Signal;
use nix::sys::wait::waitpid;
use nix::unistd::{sethostname, Pid};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("failed to prepare rootfs directory: {0}")]
    Rootfs(std::io::Error),

    #[error("clone failed: {0}")]
    Clone(nix::Error),

    #[error("container '{0}' failed during namespace setup")]
    Setup(String),

    #[error("failed to reap container child: {0}")]
    Reap(nix::Error),

    #[error("failed to pin network namespace: {0}")]
    Pin(std::io::Error),
}

const STACK_SIZE: usize = 1024 * 1024;
const NETNS_DIR: &str = "/run/netns";

/// Spawn a pause container named `name`.
///
/// The child is cloned directly into new mount, uts, ipc, pid and net
/// namespaces, mounts an overlay whose upper and work directories live
/// under `rootfs_dir` (the host root is the lower layer), pivots into
/// it, mounts a fresh `/proc`, sets its hostname and then blocks
/// forever. The parent returns once the child reports readiness.
///
/// On any setup error the child is reaped and leftover mounts are
/// detached before the error is returned.
pub fn spawn_pause(rootfs_dir: &Path, name: &str) -> Result<Pid, ContainerError> {
    let upper = rootfs_dir.join("upper");
    let work = rootfs_dir.join("work");
    let merged = rootfs_dir.join("merged");
    for dir in [&upper, &work, &merged] {
        std::fs::create_dir_all(dir).map_err(ContainerError::Rootfs)?;
    }

    let (ready_rx, ready_tx) = nix::unistd::pipe().map_err(ContainerError::Clone)?;

    let flags = CloneFlags::CLONE_NEWNS
        | CloneFlags::CLONE_NEWUTS
        | CloneFlags::CLONE_NEWIPC
        | CloneFlags::CLONE_NEWPID
        | CloneFlags::CLONE_NEWNET;

    let mut stack = vec![0u8; STACK_SIZE];
    let hostname = name.to_string();
    let child_upper = upper.clone();
    let child_work = work.clone();
    let child_merged = merged.clone();
    let ready_fd = std::os::fd::AsRawFd::as_raw_fd(&ready_tx);

    debug!("spawning pause container {}", name);

    let pid = unsafe {
        nix::sched::clone(
            Box::new(move || {
                pause_child(
                    &child_upper,
                    &child_work,
                    &child_merged,
                    &hostname,
                    ready_fd,
                )
            }),
            &mut stack,
            flags,
            Some(Signal::SIGCHLD as i32),
        )
    }
    .map_err(ContainerError::Clone)?;

    // Close our copy of the write end so a dead child reads as EOF.
    drop(ready_tx);

    let mut byte = [0u8; 1];
    let mut rx = std::fs::File::from(ready_rx);
    let ok = matches!(rx.read(&mut byte), Ok(1) if byte[0] == 1);
    if !ok {
        if let Err(e) = waitpid(pid, None) {
            warn!("failed to reap container {}: {}", name, e);
        }
        if let Err(e) = umount2(&merged, MntFlags::MNT_DETACH) {
            debug!("no overlay to detach for {}: {}", name, e);
        }
        return Err(ContainerError::Setup(name.to_string()));
    }

    debug!("container {} running as pid {}", name, pid);
    Ok(pid)
}

/// Child side: runs inside the fresh namespaces, never returns on
/// success. Any error is reported on stderr and via the exit code;
/// the parent observes the closed readiness pipe.
fn pause_child(upper: &Path, work: &Path, merged: &Path, name: &str, ready_fd: i32) -> isize {
    if let Err(e) = setup_rootfs(upper, work, merged, name) {
        eprintln!("container {name}: {e}");
        return 1;
    }

    let ready = unsafe { BorrowedFd::borrow_raw(ready_fd) };
    if nix::unistd::write(ready, &[1u8]).is_err() {
        return 1;
    }

    loop {
        nix::unistd::pause();
    }
}

fn setup_rootfs(upper: &Path, work: &Path, merged: &Path, name: &str) -> Result<(), String> {
    // Keep every mount below private to this namespace.
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| format!("making mount tree private: {e}"))?;

    let options = format!(
        "lowerdir=/,upperdir={},workdir={}",
        upper.display(),
        work.display()
    );
    mount(
        Some("overlay"),
        merged,
        Some("overlay"),
        MsFlags::empty(),
        Some(options.as_str()),
    )
    .map_err(|e| format!("mounting overlay: {e}"))?;

    sethostname(name).map_err(|e| format!("setting hostname: {e}"))?;

    let old_root = merged.join("old_root");
    std::fs::create_dir_all(&old_root).map_err(|e| format!("creating old_root: {e}"))?;
    nix::unistd::pivot_root(merged, &old_root).map_err(|e| format!("pivot_root: {e}"))?;
    std::env::set_current_dir("/").map_err(|e| format!("chdir to new root: {e}"))?;
    umount2("/old_root", MntFlags::MNT_DETACH).map_err(|e| format!("detaching old root: {e}"))?;
    let _ = std::fs::remove_dir("/old_root");

    // We are pid 1 of a fresh pid namespace, so this /proc is ours.
    mount(
        Some("proc"),
        "/proc",
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| format!("mounting /proc: {e}"))?;

    Ok(())
}

/// Expose a container's network namespace as `/run/netns/<name>`.
pub fn pin_netns(pid: Pid, name: &str) -> Result<(), ContainerError> {
    std::fs::create_dir_all(NETNS_DIR).map_err(ContainerError::Pin)?;
    let link = netns_path(name);
    if link.exists() {
        return Ok(());
    }
    std::os::unix::fs::symlink(format!("/proc/{pid}/ns/net"), &link)
        .map_err(ContainerError::Pin)
}

/// Remove a `/run/netns` entry pinned by [`pin_netns`]; missing
/// entries are not an error.
pub fn unpin_netns(name: &str) {
    let link = netns_path(name);
    if link.is_symlink() {
        if let Err(e) = std::fs::remove_file(&link) {
            warn!("failed to remove {}: {}", link.display(), e);
        }
    }
}

pub fn netns_path(name: &str) -> PathBuf {
    Path::new(NETNS_DIR).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netns_paths_stay_under_run() {
        assert_eq!(netns_path("SAT3"), Path::new("/run/netns/SAT3"));
    }

    #[test]
    #[cfg(feature = "sudo-tests")]
    fn spawn_and_kill_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pid = spawn_pause(dir.path(), "pausetest").unwrap();
        assert!(Path::new(&format!("/proc/{pid}/ns/net")).exists());

        pin_netns(pid, "pausetest").unwrap();
        assert!(netns_path("pausetest").is_symlink());
        unpin_netns("pausetest");

        nix::sys::signal::kill(pid, Signal::SIGKILL).unwrap();
        waitpid(pid, None).unwrap();
    }
}
