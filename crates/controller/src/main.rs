//! Topology controller
//!
//! Central brain of the emulator: pulls constellation snapshots, diffs
//! them into per-tick change-sets, fans the change-sets out to the
//! worker fleet and exposes the command facade. Workers only ever see
//! files and verbs; all shared mutable state lives here, behind a
//! strictly sequential tick loop.

mod config;
mod facade;
mod sync;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::Config;
use sync::TopoSync;
use tracing::{error, Level};

#[derive(Parser)]
#[command(name = "controller", about = "Topology controller for the constellation emulator")]
struct Cli {
    /// Run configuration file
    #[arg(short, long, default_value = "sn.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive the emulation until interrupted
    Run,

    /// Tear down every worker listed in the config
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Command::Run => {
            let facade_state: facade::SharedState = Arc::new(tokio::sync::RwLock::new(None));

            let listen = cfg.facade_listen.clone();
            let state = facade_state.clone();
            tokio::spawn(async move {
                if let Err(e) = facade::serve(&listen, state).await {
                    error!("facade stopped: {e:#}");
                }
            });

            TopoSync::new(cfg, facade_state).run().await
        }
        Command::Clean => TopoSync::clean(&cfg).await,
    }
}
