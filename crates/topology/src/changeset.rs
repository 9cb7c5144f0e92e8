//! On-disk change-set schema (`link.json`)
//!
//! The controller writes one change-set per tick and every worker
//! receives the same file; ownership filtering happens on the agent
//! side. Endpoints are serialized as node names with the
//! lexicographically smaller name first, so the file is canonical
//! regardless of how the diff ordered the underlying ids.

use serde::{Deserialize, Serialize};

use crate::diff::ChangeSet;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelLink(pub String, pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateLink(pub String, pub String, pub f64);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddLink(pub String, pub String, pub f64, pub u32);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChangeSetFile {
    pub del_links: Vec<DelLink>,
    pub update_links: Vec<UpdateLink>,
    pub add_links: Vec<AddLink>,
}

fn ordered(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl ChangeSetFile {
    /// Render an id-space change-set with the run's node names.
    pub fn from_changeset(cs: &ChangeSet, names: &[String]) -> Self {
        let name = |id: u32| names[id as usize].as_str();
        let mut file = ChangeSetFile::default();
        for e in &cs.del {
            let (x, y) = e.endpoints();
            let (a, b) = ordered(name(x), name(y));
            file.del_links.push(DelLink(a, b));
        }
        for (e, delay) in &cs.update {
            let (x, y) = e.endpoints();
            let (a, b) = ordered(name(x), name(y));
            file.update_links.push(UpdateLink(a, b, *delay));
        }
        for (e, delay, idx) in &cs.add {
            let (x, y) = e.endpoints();
            let (a, b) = ordered(name(x), name(y));
            file.add_links.push(AddLink(a, b, *delay, *idx));
        }
        file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Edge;

    #[test]
    fn endpoints_are_lexicographically_ordered() {
        // Numeric canonical order (SAT2 < SAT10 by id) differs from
        // name order ("SAT10" < "SAT2"); the file uses name order.
        let names: Vec<String> = (0..11).map(|i| format!("SAT{i}")).collect();
        let cs = ChangeSet {
            del: vec![Edge::new(2, 10).unwrap()],
            update: vec![],
            add: vec![],
        };
        let file = ChangeSetFile::from_changeset(&cs, &names);
        assert_eq!(
            file.del_links,
            vec![DelLink("SAT10".into(), "SAT2".into())]
        );
    }

    #[test]
    fn serializes_as_bare_arrays() {
        let file = ChangeSetFile {
            del_links: vec![DelLink("GS0".into(), "SAT1".into())],
            update_links: vec![UpdateLink("SAT1".into(), "SAT2".into(), 3.5)],
            add_links: vec![AddLink("SAT2".into(), "SAT3".into(), 1.25, 7)],
        };
        let json = serde_json::to_string(&file).unwrap();
        assert!(json.contains(r#"["GS0","SAT1"]"#));
        assert!(json.contains(r#"["SAT1","SAT2",3.5]"#));
        assert!(json.contains(r#"["SAT2","SAT3",1.25,7]"#));

        let back: ChangeSetFile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, file);
    }
}
