//! Node naming over the shifted id space
//!
//! Satellites are `SAT{i}`, ground stations `GS{j}`. The names double
//! as hostnames, network namespace names and (on the peer side)
//! interface names, so they must stay short and flat.

/// Name for a shifted node id.
pub fn node_name(id: u32, sat_count: u32) -> String {
    if id < sat_count {
        format!("SAT{id}")
    } else {
        format!("GS{}", id - sat_count)
    }
}

/// All node names in shifted-id order.
pub fn node_names(sat_count: u32, ground_count: u32) -> Vec<String> {
    (0..sat_count + ground_count)
        .map(|id| node_name(id, sat_count))
        .collect()
}

pub fn is_ground(name: &str) -> bool {
    name.starts_with("GS")
}

pub fn is_satellite(name: &str) -> bool {
    name.starts_with("SAT")
}

/// Whether a link touching `a` and `b` is a ground-to-satellite link.
pub fn is_gsl(a: &str, b: &str) -> bool {
    is_ground(a) || is_ground(b)
}

/// Matches exactly the namespace names this emulator creates, so that
/// cleanup never touches a foreign `/run/netns` entry.
pub fn is_emulated_ns(name: &str) -> bool {
    let digits = name
        .strip_prefix("SAT")
        .or_else(|| name.strip_prefix("GS"));
    match digits {
        Some(d) => !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shifted_ids_map_to_names() {
        assert_eq!(node_name(0, 25), "SAT0");
        assert_eq!(node_name(24, 25), "SAT24");
        assert_eq!(node_name(25, 25), "GS0");
        assert_eq!(node_name(27, 25), "GS2");
    }

    #[test]
    fn link_classes() {
        assert!(!is_gsl("SAT1", "SAT2"));
        assert!(is_gsl("GS0", "SAT2"));
        assert!(is_gsl("SAT1", "GS3"));
    }

    #[test]
    fn namespace_pattern_is_conservative() {
        assert!(is_emulated_ns("SAT12"));
        assert!(is_emulated_ns("GS0"));
        assert!(!is_emulated_ns("SAT"));
        assert!(!is_emulated_ns("GSx"));
        assert!(!is_emulated_ns("default"));
        assert!(!is_emulated_ns("SAT1x"));
    }
}
