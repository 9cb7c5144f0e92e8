//! Link ownership rule
//!
//! Every worker receives the full change-set and applies exactly the
//! portion its own nodes are involved in. For a link (a, b) a worker
//! acts two-sided when it homes both endpoints, one-sided when it
//! homes exactly one, and not at all otherwise. When every host honors
//! this rule the union of side effects across the cluster is exactly
//! the change-set.

/// Which sides of a link the local machine is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sides {
    None,
    /// Only the first endpoint is homed here.
    First,
    /// Only the second endpoint is homed here.
    Second,
    Both,
}

pub fn classify(mid_first: u32, mid_second: u32, me: u32) -> Sides {
    match (mid_first == me, mid_second == me) {
        (true, true) => Sides::Both,
        (true, false) => Sides::First,
        (false, true) => Sides::Second,
        (false, false) => Sides::None,
    }
}

/// Number of hosts in a cluster of `machines` that act on a link.
pub fn acting_hosts(mid_first: u32, mid_second: u32, machines: u32) -> u32 {
    (0..machines)
        .filter(|me| classify(mid_first, mid_second, *me) != Sides::None)
        .count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intra_host_links_have_one_actor() {
        for m in 0..4 {
            assert_eq!(acting_hosts(m, m, 4), 1);
            assert_eq!(classify(m, m, m), Sides::Both);
        }
    }

    #[test]
    fn inter_host_links_have_two_actors() {
        assert_eq!(acting_hosts(0, 1, 4), 2);
        assert_eq!(classify(0, 1, 0), Sides::First);
        assert_eq!(classify(0, 1, 1), Sides::Second);
        assert_eq!(classify(0, 1, 2), Sides::None);
    }

    #[test]
    fn every_pair_partitions_cleanly() {
        let machines = 5;
        for a in 0..machines {
            for b in 0..machines {
                let expect = if a == b { 1 } else { 2 };
                assert_eq!(acting_hosts(a, b, machines), expect);
            }
        }
    }
}
