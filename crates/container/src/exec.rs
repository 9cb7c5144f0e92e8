//! Running commands inside a container
//!
//! Mount-namespace entry is not reliable from a threaded process, so
//! full entry goes through the `nsenter` binary keyed on the pause
//! PID, exactly like manual debugging would.

use tokio::process::Command;

/// Command builder entering all of a container's namespaces.
pub fn enter_all(pid: i32, program: &str) -> Command {
    let mut cmd = Command::new("nsenter");
    cmd.arg("-m")
        .arg("-u")
        .arg("-i")
        .arg("-n")
        .arg("-p")
        .arg("-t")
        .arg(pid.to_string())
        .arg(program);
    cmd
}

/// Command builder entering only the network namespace. Used for
/// tooling that must see the node's interfaces but the host's
/// filesystem (e.g. `ip`, `tc`, `route`).
pub fn enter_net(pid: i32, program: &str) -> Command {
    let mut cmd = Command::new("nsenter");
    cmd.arg("-n").arg("-t").arg(pid.to_string()).arg(program);
    cmd
}
