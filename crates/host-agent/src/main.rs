//! Host agent
//!
//! The per-worker executor of the emulator. The controller invokes one
//! verb at a time over the command channel; every verb carries the
//! machine id and the working directory so any invocation can join the
//! state an earlier one left on disk.
//!
//! Runs single-threaded on purpose: entering a network namespace is a
//! per-thread property, and a single thread makes every scoped entry
//! sound without pinning.

mod clean;
mod damage;
mod diag;
mod networks;
mod nodes;
mod state;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use networks::ClassParams;
use state::Agent;
use tracing::Level;

#[derive(Parser)]
#[command(name = "host-agent", about = "Per-worker executor for the constellation emulator")]
struct Cli {
    #[command(subcommand)]
    verb: Verb,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Verb {
    /// Ensure every node homed on this machine has a running container
    Nodes { machine_id: u32, workdir: PathBuf },

    /// Apply the uploaded change-set for one tick
    Networks {
        machine_id: u32,
        workdir: PathBuf,
        tick: String,
        isl_bw: f64,
        isl_loss: f64,
        gsl_bw: f64,
        gsl_loss: f64,
    },

    /// Start the routing daemon in the selected nodes ("all" or a CSV)
    Routed {
        machine_id: u32,
        workdir: PathBuf,
        selector: String,
    },

    /// Run a command inside a node
    Exec {
        machine_id: u32,
        workdir: PathBuf,
        node: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        argv: Vec<String>,
    },

    /// Show the addresses of a node
    #[command(name = "ip", alias = "IP")]
    Ip {
        machine_id: u32,
        workdir: PathBuf,
        node: String,
    },

    /// Ping between two local nodes
    Ping {
        machine_id: u32,
        workdir: PathBuf,
        src: String,
        dst: String,
    },

    /// Throughput test between two local nodes
    Iperf {
        machine_id: u32,
        workdir: PathBuf,
        src: String,
        dst: String,
    },

    /// Install a static route on src towards dst via an interface
    Sr {
        machine_id: u32,
        workdir: PathBuf,
        src: String,
        dst: String,
        via_dev: String,
    },

    /// Show a node's routing table
    Rtable {
        machine_id: u32,
        workdir: PathBuf,
        node: String,
    },

    /// Pin the listed nodes (CSV) to 100% loss until recovery
    Damage {
        machine_id: u32,
        workdir: PathBuf,
        nodes: String,
    },

    /// Restore the declared loss on every damaged node
    Recovery {
        machine_id: u32,
        workdir: PathBuf,
        isl_loss: f64,
        gsl_loss: f64,
    },

    /// List local nodes and their damage state
    List { machine_id: u32, workdir: PathBuf },

    /// Tear down containers, namespaces and state files
    Clean { machine_id: u32, workdir: PathBuf },
}

impl Verb {
    fn machine_id(&self) -> u32 {
        match self {
            Verb::Nodes { machine_id, .. }
            | Verb::Networks { machine_id, .. }
            | Verb::Routed { machine_id, .. }
            | Verb::Exec { machine_id, .. }
            | Verb::Ip { machine_id, .. }
            | Verb::Ping { machine_id, .. }
            | Verb::Iperf { machine_id, .. }
            | Verb::Sr { machine_id, .. }
            | Verb::Rtable { machine_id, .. }
            | Verb::Damage { machine_id, .. }
            | Verb::Recovery { machine_id, .. }
            | Verb::List { machine_id, .. }
            | Verb::Clean { machine_id, .. } => *machine_id,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let machine_id = cli.verb.machine_id();
    match dispatch(cli.verb).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("[{machine_id}] error: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn dispatch(verb: Verb) -> Result<i32> {
    match verb {
        Verb::Nodes {
            machine_id,
            workdir,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            nodes::run(&agent).await?;
        }
        Verb::Networks {
            machine_id,
            workdir,
            tick,
            isl_bw,
            isl_loss,
            gsl_bw,
            gsl_loss,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            let isl = ClassParams {
                bw_gbit: isl_bw,
                loss_pct: isl_loss,
            };
            let gsl = ClassParams {
                bw_gbit: gsl_bw,
                loss_pct: gsl_loss,
            };
            networks::run(&agent, &tick, isl, gsl).await?;
        }
        Verb::Routed {
            machine_id,
            workdir,
            selector,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            diag::routed(&agent, &selector).await?;
        }
        Verb::Exec {
            machine_id,
            workdir,
            node,
            argv,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            return diag::exec(&agent, &node, &argv).await;
        }
        Verb::Ip {
            machine_id,
            workdir,
            node,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            diag::show_ip(&agent, &node).await?;
        }
        Verb::Ping {
            machine_id,
            workdir,
            src,
            dst,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            return diag::ping(&agent, &src, &dst).await;
        }
        Verb::Iperf {
            machine_id,
            workdir,
            src,
            dst,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            return diag::iperf(&agent, &src, &dst).await;
        }
        Verb::Sr {
            machine_id,
            workdir,
            src,
            dst,
            via_dev,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            diag::static_route(&agent, &src, &dst, &via_dev).await?;
        }
        Verb::Rtable {
            machine_id,
            workdir,
            node,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            return diag::rtable(&agent, &node).await;
        }
        Verb::Damage {
            machine_id,
            workdir,
            nodes,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            damage::damage(&agent, &nodes).await?;
        }
        Verb::Recovery {
            machine_id,
            workdir,
            isl_loss,
            gsl_loss,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            damage::recovery(&agent, isl_loss, gsl_loss).await?;
        }
        Verb::List {
            machine_id,
            workdir,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            diag::list(&agent)?;
        }
        Verb::Clean {
            machine_id,
            workdir,
        } => {
            let agent = Agent::load(machine_id, &workdir)?;
            clean::run(&agent).await?;
        }
    }
    Ok(0)
}
