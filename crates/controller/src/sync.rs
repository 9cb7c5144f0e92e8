//! The controller tick loop
//!
//! A pacemaker drives the run: every `step` seconds pull a snapshot,
//! diff it against the committed link set, fan the change-set out to
//! every worker and barrier on their completion before committing.
//! Only this loop writes the link set and the index table; the worker
//! fan-out reads immutable snapshots of both.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{info, warn};

use topology::placement::initial_placement;
use topology::{diff, propagation_delay_ms, Assignment, ChangeSetFile, Edge, LinkTable, Snapshot};
use topology::{GeoPos, SnapshotError};

use crate::config::Config;
use crate::facade::{FacadeState, SharedState};
use crate::transport::{Worker, ASSIGN_FILENAME, LINK_FILENAME};

pub struct TopoSync {
    cfg: Config,
    client: reqwest::Client,
    last_links: BTreeSet<Edge>,
    table: LinkTable,
    fleet: Option<Fleet>,
    facade: SharedState,
}

struct Fleet {
    assignment: Assignment,
    positions: Vec<GeoPos>,
    workers: Arc<Vec<Worker>>,
}

enum FetchError {
    /// Bad luck this tick; keep the committed state and try again.
    Transient(String),
    /// The service broke its contract; the run cannot continue.
    Schema(SnapshotError),
}

impl TopoSync {
    pub fn new(cfg: Config, facade: SharedState) -> Self {
        Self {
            cfg,
            client: reqwest::Client::new(),
            last_links: BTreeSet::new(),
            table: LinkTable::new(),
            fleet: None,
            facade,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let step = Duration::from_secs_f64(self.cfg.step);
        let mut last_tick: Option<Instant> = None;

        loop {
            // Signals are honored only here, never mid-tick.
            if let Some(t0) = last_tick {
                tokio::select! {
                    _ = sleep_until(t0 + step) => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("interrupted; stopping after {} links", self.last_links.len());
                        return Ok(());
                    }
                }
            }
            last_tick = Some(Instant::now());
            let stamp = Utc::now();

            let snap = match self.fetch(stamp).await {
                Ok(snap) => snap,
                Err(FetchError::Transient(e)) => {
                    warn!("tick {}: fetch failed, skipping: {}", stamp, e);
                    continue;
                }
                Err(FetchError::Schema(e)) => {
                    return Err(e).context("constellation service broke its schema");
                }
            };

            if self.fleet.is_none() {
                let fleet = self.init_fleet(&snap).await?;
                self.fleet = Some(fleet);
            }
            let Some(fleet) = self.fleet.as_mut() else {
                continue;
            };
            if snap.node_count() != fleet.assignment.node_name.len() {
                bail!(
                    "constellation changed size mid-run ({} nodes, expected {})",
                    snap.node_count(),
                    fleet.assignment.node_name.len()
                );
            }

            fleet.positions = snap.positions();
            let curr = snap.link_set();

            let positions = &fleet.positions;
            let changes = diff(&self.last_links, &curr, &mut self.table, |e: Edge| {
                let (a, b) = e.endpoints();
                propagation_delay_ms(positions[a as usize], positions[b as usize])
            });
            info!(
                "tick {}: {} del, {} update, {} add ({} live links)",
                stamp,
                changes.del.len(),
                changes.update.len(),
                changes.add.len(),
                curr.len()
            );

            let file = ChangeSetFile::from_changeset(&changes, &fleet.assignment.node_name);
            let payload = serde_json::to_vec(&file)?;
            std::fs::write(LINK_FILENAME, &payload).context("failed to write change-set")?;

            let tick_arg = stamp.to_rfc3339();
            let networks_extra = [
                tick_arg.clone(),
                self.cfg.isl_bw.to_string(),
                self.cfg.isl_loss.to_string(),
                self.cfg.gsl_bw.to_string(),
                self.cfg.gsl_loss.to_string(),
            ];

            let results = join_all(fleet.workers.iter().map(|w| {
                let payload = &payload;
                let extra = &networks_extra;
                async move {
                    w.push(payload, LINK_FILENAME).await?;
                    w.agent(&w.verb("networks", extra)).await
                }
            }))
            .await;
            for (w, result) in fleet.workers.iter().zip(results) {
                if let Err(e) = result {
                    warn!("[{}] tick {} not applied: {}", w.id, stamp, e);
                }
            }

            // Commit even on partial worker success: a lagging worker
            // re-converges through future del/add entries.
            self.last_links = curr;
        }
    }

    async fn fetch(&self, stamp: DateTime<Utc>) -> Result<Snapshot, FetchError> {
        let response = self
            .client
            .get(&self.cfg.api_url)
            .query(&[
                ("startTime", stamp.to_rfc3339()),
                ("constellation", self.cfg.constellation.clone()),
            ])
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Transient(format!(
                "service answered {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        Snapshot::from_slice(&body).map_err(|e| match e {
            SnapshotError::Decompress(_) => FetchError::Transient(e.to_string()),
            other => FetchError::Schema(other),
        })
    }

    /// First-snapshot setup: place every node, ship the placement and
    /// the agent to every worker, and bring the containers up.
    async fn init_fleet(&mut self, snap: &Snapshot) -> Result<Fleet> {
        let machines = self.cfg.machines.len() as u32;
        info!(
            "placing {} satellites and {} ground stations on {} machines",
            snap.sat_count(),
            snap.ground.len(),
            machines
        );

        let mut rng = StdRng::from_entropy();
        let node_mid = initial_placement(snap, machines, &mut rng);
        let ips: Vec<String> = self.cfg.machines.iter().map(|m| m.ip.clone()).collect();
        let assignment = Assignment::new(snap, node_mid, ips);
        assignment
            .save(Path::new(ASSIGN_FILENAME))
            .context("failed to write assignment")?;
        let assign_bytes = serde_json::to_vec(&assignment)?;

        let agent_bin = std::fs::read(&self.cfg.agent_bin).with_context(|| {
            format!("agent binary not found at {}", self.cfg.agent_bin.display())
        })?;

        let connects = join_all(self.cfg.machines.iter().enumerate().map(|(id, m)| {
            let agent_bin = &agent_bin;
            let assign = &assign_bytes;
            async move {
                let worker = Worker::connect(id as u32, m).await?;
                worker.provision(agent_bin, assign).await?;
                Ok::<Worker, crate::transport::TransportError>(worker)
            }
        }))
        .await;

        let mut workers = Vec::new();
        for (id, result) in connects.into_iter().enumerate() {
            match result {
                Ok(w) => workers.push(w),
                Err(e) => warn!("[{}] worker unreachable: {}", id, e),
            }
        }
        if workers.is_empty() {
            bail!("no worker is reachable");
        }
        let workers = Arc::new(workers);

        let results = join_all(workers.iter().map(|w| async move {
            let args = w.verb("nodes", &[]);
            w.agent(&args).await
        }))
        .await;
        for (w, result) in workers.iter().zip(results) {
            if let Err(e) = result {
                warn!("[{}] node init failed: {}", w.id, e);
            }
        }

        let assignment_shared = Arc::new(assignment.clone());
        *self.facade.write().await = Some(FacadeState {
            assignment: assignment_shared,
            workers: workers.clone(),
        });

        Ok(Fleet {
            assignment,
            positions: snap.positions(),
            workers,
        })
    }

    /// Fan a `clean` out to every machine in the config.
    pub async fn clean(cfg: &Config) -> Result<()> {
        let connects = join_all(
            cfg.machines
                .iter()
                .enumerate()
                .map(|(id, m)| Worker::connect(id as u32, m)),
        )
        .await;

        for (id, result) in connects.into_iter().enumerate() {
            match result {
                Ok(w) => {
                    if let Err(e) = w.agent(&w.verb("clean", &[])).await {
                        warn!("[{}] clean failed: {}", id, e);
                    }
                }
                Err(e) => warn!("[{}] worker unreachable: {}", id, e),
            }
        }
        Ok(())
    }
}
