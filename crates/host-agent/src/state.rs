//! Per-worker on-disk state
//!
//! Three files live in the agent's working directory: the assignment
//! shipped once by the controller, the PID index written by `nodes`
//! so later invocations can join the running containers, and the
//! damage list that survives between `damage` and `recovery`.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use topology::Assignment;

pub const ASSIGN_FILENAME: &str = "assign.json";
pub const PID_FILENAME: &str = "container_pid.txt";
pub const DAMAGE_FILENAME: &str = "damage_list.txt";
pub const LINK_FILENAME: &str = "link.json";

/// Marker written in place of a node homed on another machine.
pub const NOT_ASSIGNED: &str = "NA";

pub struct Agent {
    pub machine_id: u32,
    pub workdir: PathBuf,
    pub assignment: Assignment,
    pub mids: HashMap<String, u32>,
    pub damage: HashSet<String>,
}

impl Agent {
    pub fn load(machine_id: u32, workdir: &Path) -> Result<Self> {
        let assignment = Assignment::load(&workdir.join(ASSIGN_FILENAME))
            .context("assignment file missing; was this worker initialized?")?;
        let mids = assignment.mid_map();
        let damage = load_damage(&workdir.join(DAMAGE_FILENAME))?;
        Ok(Self {
            machine_id,
            workdir: workdir.to_path_buf(),
            assignment,
            mids,
            damage,
        })
    }

    pub fn is_mine(&self, node: &str) -> bool {
        self.mids.get(node) == Some(&self.machine_id)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.workdir.join(PID_FILENAME)
    }

    pub fn damage_path(&self) -> PathBuf {
        self.workdir.join(DAMAGE_FILENAME)
    }

    pub fn link_path(&self) -> PathBuf {
        self.workdir.join(LINK_FILENAME)
    }

    /// Parse the PID index of the running containers on this host.
    pub fn pid_index(&self) -> Result<HashMap<String, i32>> {
        let content = std::fs::read_to_string(self.pid_path())
            .context("container index file not found; run `nodes` first")?;
        parse_pid_index(&content)
    }

    pub fn pid_of(&self, node: &str) -> Result<i32> {
        let index = self.pid_index()?;
        match index.get(node) {
            Some(pid) => Ok(*pid),
            None => bail!("node '{}' has no container on this machine", node),
        }
    }

    /// Append nodes to the damage list, creating it if needed.
    pub fn record_damage(&self, nodes: &[String]) -> Result<()> {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.damage_path())?;
        for node in nodes {
            writeln!(f, "{node}")?;
        }
        Ok(())
    }
}

fn load_damage(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Parse `name:pid` tokens, skipping the `NA` placeholders.
pub fn parse_pid_index(content: &str) -> Result<HashMap<String, i32>> {
    let mut map = HashMap::new();
    for token in content.split_whitespace() {
        if token == NOT_ASSIGNED {
            continue;
        }
        let (name, pid) = token
            .split_once(':')
            .with_context(|| format!("malformed pid index token '{token}'"))?;
        let pid: i32 = pid
            .parse()
            .with_context(|| format!("malformed pid in token '{token}'"))?;
        map.insert(name.to_string(), pid);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_index_skips_placeholders() {
        let content = "SAT0:101 NA SAT2:103 \nNA GS1:200 \n";
        let map = parse_pid_index(content).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["SAT0"], 101);
        assert_eq!(map["GS1"], 200);
    }

    #[test]
    fn pid_index_rejects_garbage() {
        assert!(parse_pid_index("SAT0").is_err());
        assert!(parse_pid_index("SAT0:abc").is_err());
    }

    #[test]
    fn damage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DAMAGE_FILENAME);
        std::fs::write(&path, "SAT3\n\nGS1\n").unwrap();
        let set = load_damage(&path).unwrap();
        assert!(set.contains("SAT3") && set.contains("GS1"));
        assert_eq!(set.len(), 2);
    }
}
