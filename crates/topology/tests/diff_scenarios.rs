//! End-to-end behavior of the diff engine across ticks.

use std::collections::BTreeSet;

use topology::diff::{diff, ChangeSet, Edge, LinkTable, DELAY_EPSILON_MS};

fn edge(a: u32, b: u32) -> Edge {
    Edge::new(a, b).unwrap()
}

fn set(edges: &[(u32, u32)]) -> BTreeSet<Edge> {
    edges.iter().map(|(a, b)| edge(*a, *b)).collect()
}

/// Replay `del` and `add` on top of `prev` and compare with `curr`.
fn apply(prev: &BTreeSet<Edge>, cs: &ChangeSet) -> BTreeSet<Edge> {
    let mut out = prev.clone();
    for e in &cs.del {
        assert!(out.remove(e), "deleted edge was not present");
    }
    for (e, _, _) in &cs.add {
        assert!(out.insert(*e), "added edge was already present");
    }
    out
}

#[test]
fn basic_del_add_split() {
    let mut table = LinkTable::new();
    let prev = set(&[(1, 2), (2, 3)]);
    let curr = set(&[(2, 3), (3, 4)]);

    let cs = diff(&prev, &curr, &mut table, |_| 5.0);

    assert_eq!(cs.del, vec![edge(1, 2)]);
    assert_eq!(cs.add.len(), 1);
    let (e, delay, idx) = cs.add[0];
    assert_eq!(e, edge(3, 4));
    assert_eq!(delay, 5.0);
    assert_eq!(idx, 1, "first link ever indexed gets idx 1");
    assert!(cs.update.is_empty());

    assert_eq!(apply(&prev, &cs), curr);
}

#[test]
fn reappearing_edge_reuses_its_index() {
    let mut table = LinkTable::new();

    // Tick 0: both links appear.
    let t0 = diff(&set(&[]), &set(&[(1, 2), (2, 3)]), &mut table, |_| 1.0);
    let idx_12 = t0
        .add
        .iter()
        .find(|(e, _, _)| *e == edge(1, 2))
        .map(|(_, _, idx)| *idx)
        .unwrap();

    // Tick 1: (1,2) goes away, (3,4) shows up.
    let t1 = diff(
        &set(&[(1, 2), (2, 3)]),
        &set(&[(2, 3), (3, 4)]),
        &mut table,
        |_| 1.0,
    );
    assert_eq!(t1.del, vec![edge(1, 2)]);

    // Tick 2: (1,2) comes back and must keep its original index.
    let t2 = diff(
        &set(&[(2, 3), (3, 4)]),
        &set(&[(1, 2), (2, 3), (3, 4)]),
        &mut table,
        |_| 1.0,
    );
    let (_, _, idx_back) = t2
        .add
        .iter()
        .find(|(e, _, _)| *e == edge(1, 2))
        .copied()
        .unwrap();
    assert_eq!(idx_back, idx_12);
}

#[test]
fn delay_epsilon_suppresses_jitter() {
    let mut table = LinkTable::new();
    let links = set(&[(1, 2)]);

    let t0 = diff(&set(&[]), &links, &mut table, |_| 10.0);
    assert_eq!(t0.add.len(), 1);

    // 5 µs of movement: below the threshold, no update.
    let t1 = diff(&links, &links, &mut table, |_| 10.005);
    assert!(t1.update.is_empty());

    // 20 µs of movement: propagated with the new delay.
    let t2 = diff(&links, &links, &mut table, |_| 10.02);
    assert_eq!(t2.update, vec![(edge(1, 2), 10.02)]);

    // The shipped delay is now the baseline for the next comparison.
    let t3 = diff(&links, &links, &mut table, |_| 10.025);
    assert!(t3.update.is_empty());
}

#[test]
fn updates_only_touch_surviving_edges() {
    let mut table = LinkTable::new();
    let prev = set(&[(1, 2), (2, 3)]);
    diff(&set(&[]), &prev, &mut table, |_| 1.0);

    let curr = set(&[(2, 3), (3, 4)]);
    let cs = diff(&prev, &curr, &mut table, |_| 50.0);
    for (e, _) in &cs.update {
        assert!(prev.contains(e) && curr.contains(e));
    }
    assert_eq!(apply(&prev, &cs), curr);
}

#[test]
fn direction_of_input_edges_is_irrelevant() {
    let mut fwd = LinkTable::new();
    let mut rev = LinkTable::new();

    let a = diff(&set(&[(1, 2)]), &set(&[(1, 2), (2, 3)]), &mut fwd, |_| 2.0);
    let b = diff(&set(&[(2, 1)]), &set(&[(2, 1), (3, 2)]), &mut rev, |_| 2.0);

    assert_eq!(a.del, b.del);
    assert_eq!(a.update, b.update);
    assert_eq!(a.add, b.add);
}

#[test]
fn epsilon_is_an_open_bound() {
    let mut table = LinkTable::new();
    let links = set(&[(1, 2)]);
    diff(&set(&[]), &links, &mut table, |_| 1.0);

    // A change of exactly epsilon stays suppressed.
    let cs = diff(&links, &links, &mut table, |_| 1.0 + DELAY_EPSILON_MS);
    assert!(cs.update.is_empty());
}
