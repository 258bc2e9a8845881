#![allow(dead_code)]
use mesh_cluster::algs::communicator::{Communicator, ThreadComm};
use mesh_cluster::geometry::{BlockId, IndexBox, IntVector};
use mesh_cluster::level::{MappedBox, PatchLevel};
use std::collections::BTreeSet;
use std::thread;

/// Data slot holding the tags.
pub const TAGS: usize = 0;

pub fn bx(lo: &[i32], hi: &[i32]) -> IndexBox {
    IndexBox::from_bounds(lo, hi)
}

/// Runs `f` once per rank of a fresh `n`-rank world, one thread each, and
/// returns the results in rank order.
pub fn on_ranks<T: Send>(n: usize, f: impl Fn(ThreadComm) -> T + Sync) -> Vec<T> {
    let comms = ThreadComm::world(n);
    thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| {
                let f = &f;
                s.spawn(move || f(c))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("rank panicked"))
            .collect()
    })
}

/// Splits `domain` into `n` slabs along axis 1 (extent divisible by `n`).
pub fn slabs(domain: &IndexBox, n: usize) -> Vec<IndexBox> {
    let lo = domain.lower()[1];
    let h = domain.extent(1) as i32 / n as i32;
    (0..n as i32)
        .map(|k| domain.with_axis(1, lo + k * h, lo + (k + 1) * h - 1))
        .collect()
}

/// Tag level on `comm`: rank `r` holds `layout[i]` for every `i` with
/// `i % size == r`; cells inside `tagged` carry 1, the rest 0.
pub fn tag_level(
    comm: ThreadComm,
    layout: &[IndexBox],
    tagged: &[IndexBox],
) -> PatchLevel<ThreadComm> {
    let dim = layout[0].dim();
    let (rank, size) = (comm.rank(), comm.size());
    let mut level = PatchLevel::new(IntVector::one(dim), comm);
    for (i, b) in layout.iter().enumerate() {
        if i % size == rank {
            level.add_patch(*b, BlockId(0));
        }
    }
    level.allocate(TAGS, 0);
    for t in tagged {
        level.fill_region(TAGS, t, 1);
    }
    level
}

/// Asserts the boxes are pairwise disjoint, lie inside `bound` and cover
/// every tagged cell exactly once.
pub fn assert_exact_cover(boxes: &[MappedBox], bound: &IndexBox, tagged: &[IndexBox]) {
    for (i, a) in boxes.iter().enumerate() {
        assert!(bound.contains_box(&a.bx), "{a} leaves {bound}");
        for b in &boxes[i + 1..] {
            assert!(!a.bx.intersects(&b.bx), "{a} overlaps {b}");
        }
    }
    let cells: BTreeSet<IntVector> = tagged.iter().flat_map(|t| t.cells()).collect();
    for c in cells {
        let n = boxes.iter().filter(|b| b.bx.contains(&c)).count();
        assert_eq!(n, 1, "tagged cell {c} covered {n} times");
    }
}
