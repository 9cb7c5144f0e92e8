//! Applying one tick's change-set
//!
//! Every worker reads the same `link.json`; the ownership rule decides
//! which entries produce local work. Deletes run before updates so an
//! update never races an interface about to disappear, and before adds
//! so a re-used link index never collides with its previous life.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use netlink_emu::{link, NetemParams};
use thiserror::Error;
use topology::changeset::ChangeSetFile;
use topology::naming;
use topology::ownership::{classify, Sides};
use tracing::{info, warn};

use crate::state::Agent;

/// Declared shaping for one link class (ISL or GSL).
#[derive(Debug, Clone, Copy)]
pub struct ClassParams {
    pub bw_gbit: f64,
    pub loss_pct: f64,
}

impl ClassParams {
    fn netem(&self, delay_ms: f64) -> NetemParams {
        NetemParams {
            delay_ms,
            bw_gbit: self.bw_gbit,
            loss_pct: self.loss_pct,
        }
    }
}

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("change-set names unknown node '{0}'")]
    UnknownNode(String),

    #[error("machine {0} has unparsable address '{1}'")]
    BadAddress(u32, String),
}

/// One unit of local work derived from a change-set entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Del {
        node: String,
        peer: String,
    },
    Update {
        node: String,
        peer: String,
        delay_ms: f64,
    },
    AddIntra {
        a: String,
        b: String,
        delay_ms: f64,
        idx: u32,
    },
    AddInter {
        local: String,
        peer: String,
        remote: Ipv4Addr,
        delay_ms: f64,
        idx: u32,
    },
}

impl Op {
    fn gsl(&self) -> bool {
        match self {
            Op::Del { node, peer }
            | Op::Update { node, peer, .. }
            | Op::AddInter {
                local: node, peer, ..
            } => naming::is_gsl(node, peer),
            Op::AddIntra { a, b, .. } => naming::is_gsl(a, b),
        }
    }
}

/// Work counters per link class, in change-set category order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub del: u32,
    pub update: u32,
    pub add: u32,
}

/// Translate the change-set into this machine's operation list.
///
/// Output order is del, update, add; `execute` relies on it.
pub fn plan(
    file: &ChangeSetFile,
    mids: &HashMap<String, u32>,
    ips: &[String],
    me: u32,
) -> Result<Vec<Op>, PlanError> {
    let mid = |name: &str| -> Result<u32, PlanError> {
        mids.get(name)
            .copied()
            .ok_or_else(|| PlanError::UnknownNode(name.to_string()))
    };
    let ip = |m: u32| -> Result<Ipv4Addr, PlanError> {
        let raw = ips
            .get(m as usize)
            .ok_or_else(|| PlanError::BadAddress(m, "<missing>".into()))?;
        raw.parse()
            .map_err(|_| PlanError::BadAddress(m, raw.clone()))
    };

    let mut ops = Vec::new();

    for del in &file.del_links {
        let (a, b) = (&del.0, &del.1);
        match classify(mid(a)?, mid(b)?, me) {
            // An intra-host veth dies from either end; one side suffices.
            Sides::Both | Sides::First => ops.push(Op::Del {
                node: a.clone(),
                peer: b.clone(),
            }),
            Sides::Second => ops.push(Op::Del {
                node: b.clone(),
                peer: a.clone(),
            }),
            Sides::None => {}
        }
    }

    for up in &file.update_links {
        let (a, b, delay_ms) = (&up.0, &up.1, up.2);
        match classify(mid(a)?, mid(b)?, me) {
            Sides::Both => {
                ops.push(Op::Update {
                    node: a.clone(),
                    peer: b.clone(),
                    delay_ms,
                });
                ops.push(Op::Update {
                    node: b.clone(),
                    peer: a.clone(),
                    delay_ms,
                });
            }
            // The remote half is in the same change-set on the peer host.
            Sides::First => ops.push(Op::Update {
                node: a.clone(),
                peer: b.clone(),
                delay_ms,
            }),
            Sides::Second => ops.push(Op::Update {
                node: b.clone(),
                peer: a.clone(),
                delay_ms,
            }),
            Sides::None => {}
        }
    }

    for add in &file.add_links {
        let (a, b, delay_ms, idx) = (&add.0, &add.1, add.2, add.3);
        match classify(mid(a)?, mid(b)?, me) {
            Sides::Both => ops.push(Op::AddIntra {
                a: a.clone(),
                b: b.clone(),
                delay_ms,
                idx,
            }),
            Sides::First => ops.push(Op::AddInter {
                local: a.clone(),
                peer: b.clone(),
                remote: ip(mid(b)?)?,
                delay_ms,
                idx,
            }),
            Sides::Second => ops.push(Op::AddInter {
                local: b.clone(),
                peer: a.clone(),
                remote: ip(mid(a)?)?,
                delay_ms,
                idx,
            }),
            Sides::None => {}
        }
    }

    Ok(ops)
}

/// Run the planned operations, tallying work per link class. A single
/// failing interface is logged and skipped; it must not strand the
/// rest of the tick.
pub async fn execute(
    agent: &Agent,
    ops: &[Op],
    isl: ClassParams,
    gsl: ClassParams,
) -> (Counters, Counters) {
    let mut isl_count = Counters::default();
    let mut gsl_count = Counters::default();

    for op in ops {
        let class = if op.gsl() { gsl } else { isl };
        let count = if op.gsl() {
            &mut gsl_count
        } else {
            &mut isl_count
        };
        let result = match op {
            Op::Del { node, peer } => {
                count.del += 1;
                link::del(node, peer).await
            }
            Op::Update {
                node,
                peer,
                delay_ms,
            } => {
                count.update += 1;
                let damaged = agent.damage.contains(node);
                link::update(node, peer, class.netem(*delay_ms), damaged).await
            }
            Op::AddIntra {
                a,
                b,
                delay_ms,
                idx,
            } => {
                count.add += 1;
                link::add_intra(a, b, *idx, op.gsl(), class.netem(*delay_ms)).await
            }
            Op::AddInter {
                local,
                peer,
                remote,
                delay_ms,
                idx,
            } => {
                count.add += 1;
                link::add_inter(*idx, local, peer, *remote, op.gsl(), class.netem(*delay_ms))
                    .await
            }
        };
        if let Err(e) = result {
            warn!("[{}] link op {:?} failed: {}", agent.machine_id, op, e);
        }
    }

    (isl_count, gsl_count)
}

pub async fn run(
    agent: &Agent,
    tick: &str,
    isl: ClassParams,
    gsl: ClassParams,
) -> Result<()> {
    let raw = std::fs::read(agent.link_path()).context("change-set file not found")?;
    let file: ChangeSetFile = serde_json::from_slice(&raw).context("malformed change-set")?;

    let ops = plan(&file, &agent.mids, &agent.assignment.ip, agent.machine_id)?;
    let (isl_count, gsl_count) = execute(agent, &ops, isl, gsl).await;

    info!(
        "[{}] tick {}: ISL {} deleted, {} updated, {} added.",
        agent.machine_id, tick, isl_count.del, isl_count.update, isl_count.add
    );
    info!(
        "[{}] tick {}: GSL {} deleted, {} updated, {} added.",
        agent.machine_id, tick, gsl_count.del, gsl_count.update, gsl_count.add
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use topology::changeset::{AddLink, DelLink, UpdateLink};

    fn mids() -> HashMap<String, u32> {
        // SAT0, SAT1 on machine 0; SAT2, GS0 on machine 1.
        [
            ("SAT0".to_string(), 0),
            ("SAT1".to_string(), 0),
            ("SAT2".to_string(), 1),
            ("GS0".to_string(), 1),
        ]
        .into_iter()
        .collect()
    }

    fn ips() -> Vec<String> {
        vec!["192.168.1.10".into(), "192.168.1.11".into()]
    }

    #[test]
    fn inter_host_add_produces_mirrored_halves() {
        let file = ChangeSetFile {
            del_links: vec![],
            update_links: vec![],
            add_links: vec![AddLink("SAT1".into(), "SAT2".into(), 7.5, 3)],
        };

        let on0 = plan(&file, &mids(), &ips(), 0).unwrap();
        let on1 = plan(&file, &mids(), &ips(), 1).unwrap();

        assert_eq!(
            on0,
            vec![Op::AddInter {
                local: "SAT1".into(),
                peer: "SAT2".into(),
                remote: "192.168.1.11".parse().unwrap(),
                delay_ms: 7.5,
                idx: 3,
            }]
        );
        assert_eq!(
            on1,
            vec![Op::AddInter {
                local: "SAT2".into(),
                peer: "SAT1".into(),
                remote: "192.168.1.10".parse().unwrap(),
                delay_ms: 7.5,
                idx: 3,
            }]
        );
    }

    #[test]
    fn intra_host_entries_act_once() {
        let file = ChangeSetFile {
            del_links: vec![DelLink("SAT0".into(), "SAT1".into())],
            update_links: vec![UpdateLink("SAT0".into(), "SAT1".into(), 2.0)],
            add_links: vec![],
        };

        let on0 = plan(&file, &mids(), &ips(), 0).unwrap();
        assert_eq!(on0.len(), 3); // one delete, both update halves
        assert_eq!(
            on0[0],
            Op::Del {
                node: "SAT0".into(),
                peer: "SAT1".into()
            }
        );

        // The other machine has nothing to do.
        assert!(plan(&file, &mids(), &ips(), 1).unwrap().is_empty());
    }

    #[test]
    fn uninvolved_machines_plan_nothing() {
        let file = ChangeSetFile {
            del_links: vec![DelLink("SAT2".into(), "GS0".into())],
            update_links: vec![],
            add_links: vec![],
        };
        assert!(plan(&file, &mids(), &ips(), 0).unwrap().is_empty());
        assert_eq!(plan(&file, &mids(), &ips(), 1).unwrap().len(), 1);
    }

    #[test]
    fn plan_keeps_category_order() {
        let file = ChangeSetFile {
            del_links: vec![DelLink("SAT0".into(), "SAT1".into())],
            update_links: vec![UpdateLink("SAT0".into(), "SAT2".into(), 1.0)],
            add_links: vec![AddLink("GS0".into(), "SAT0".into(), 1.0, 9)],
        };
        let ops = plan(&file, &mids(), &ips(), 0).unwrap();
        assert!(matches!(ops[0], Op::Del { .. }));
        assert!(matches!(ops[1], Op::Update { .. }));
        assert!(matches!(ops[2], Op::AddInter { .. }));
    }

    #[test]
    fn unknown_node_is_a_schema_error() {
        let file = ChangeSetFile {
            del_links: vec![DelLink("SAT0".into(), "SAT9".into())],
            update_links: vec![],
            add_links: vec![],
        };
        assert!(matches!(
            plan(&file, &mids(), &ips(), 0),
            Err(PlanError::UnknownNode(_))
        ));
    }
}
