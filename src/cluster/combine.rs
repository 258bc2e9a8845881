//! Greedy merging of finished leaves.
//!
//! Pairs are merged highest fill ratio `(vol a + vol b) / vol(bbox)` first.
//! A pair qualifies when the ratio reaches `combine_tol`, the bounding box
//! overlaps no other leaf, its tag efficiency stays at or above
//! `efficiency_tol` and it fits `max_box_size`. Ties go to the pair that comes
//! first in canonical leaf order (block, box, id), so every rank computes the
//! same merges from the same global leaf list.

use crate::geometry::IntVector;
use crate::level::{BoxId, MappedBox};
use itertools::Itertools;
use std::collections::BTreeMap;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Leaf {
    pub mapped: MappedBox,
    pub tags: u64,
}

/// One merge, applied in order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Merge {
    pub result: MappedBox,
    pub tags: u64,
    pub absorbed: [BoxId; 2],
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CombineParams {
    pub efficiency_tol: f64,
    pub combine_tol: f64,
    pub max_box_size: IntVector,
}

fn canonical(leaves: &mut [Leaf]) {
    leaves.sort_by(|a, b| {
        (a.mapped.block, a.mapped.bx, a.mapped.id).cmp(&(b.mapped.block, b.mapped.bx, b.mapped.id))
    });
}

/// Merges `leaves` in place and returns the merges performed.
pub fn combine_leaves(leaves: &mut Vec<Leaf>, params: &CombineParams) -> Vec<Merge> {
    let mut merges = Vec::new();
    if params.combine_tol >= 1.0 {
        return merges;
    }
    let mut next_local: BTreeMap<usize, usize> = BTreeMap::new();
    for l in leaves.iter() {
        let n = next_local.entry(l.mapped.owner()).or_default();
        *n = (*n).max(l.mapped.id.local_id + 1);
    }
    canonical(leaves);

    loop {
        let mut best: Option<(f64, usize, usize)> = None;
        for (i, j) in (0..leaves.len()).tuple_combinations() {
            let (a, b) = (&leaves[i], &leaves[j]);
            if a.mapped.block != b.mapped.block {
                continue;
            }
            let bbox = a.mapped.bx.bounding(&b.mapped.bx);
            let vol = bbox.size() as f64;
            let ratio = (a.mapped.bx.size() + b.mapped.bx.size()) as f64 / vol;
            if ratio < params.combine_tol || best.is_some_and(|(r, ..)| ratio <= r) {
                continue;
            }
            if ((a.tags + b.tags) as f64 / vol) < params.efficiency_tol
                || !bbox.shape().all_le(&params.max_box_size)
            {
                continue;
            }
            let blocked = leaves.iter().enumerate().any(|(k, c)| {
                k != i
                    && k != j
                    && c.mapped.block == a.mapped.block
                    && c.mapped.bx.intersects(&bbox)
            });
            if !blocked {
                best = Some((ratio, i, j));
            }
        }

        let Some((_, i, j)) = best else {
            break;
        };
        let b = leaves.remove(j);
        let a = leaves.remove(i);
        let (va, vb) = (a.mapped.bx.size(), b.mapped.bx.size());
        let owner = if va > vb || (va == vb && a.mapped.owner() <= b.mapped.owner()) {
            a.mapped.owner()
        } else {
            b.mapped.owner()
        };
        let local = next_local.entry(owner).or_default();
        let id = BoxId::new(owner, *local);
        *local += 1;

        let merged = Leaf {
            mapped: MappedBox::new(id, a.mapped.bx.bounding(&b.mapped.bx), a.mapped.block),
            tags: a.tags + b.tags,
        };
        merges.push(Merge {
            result: merged.mapped,
            tags: merged.tags,
            absorbed: [a.mapped.id, b.mapped.id],
        });
        leaves.push(merged);
        canonical(leaves);
    }
    merges
}

/// New ids that number each owner's boxes by (lower, upper) corner.
pub fn sorted_renumbering(leaves: &[Leaf]) -> BTreeMap<BoxId, BoxId> {
    let mut by_owner: BTreeMap<usize, Vec<&MappedBox>> = BTreeMap::new();
    for l in leaves {
        by_owner.entry(l.mapped.owner()).or_default().push(&l.mapped);
    }
    let mut map = BTreeMap::new();
    for (owner, mut boxes) in by_owner {
        boxes.sort_by_key(|mb| (mb.bx.lower(), mb.bx.upper(), mb.block));
        for (k, mb) in boxes.into_iter().enumerate() {
            map.insert(mb.id, BoxId::new(owner, k));
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BlockId, IndexBox};

    fn leaf(owner: usize, local: usize, lo: &[i32], hi: &[i32], tags: u64) -> Leaf {
        Leaf {
            mapped: MappedBox::new(
                BoxId::new(owner, local),
                IndexBox::from_bounds(lo, hi),
                BlockId(0),
            ),
            tags,
        }
    }

    fn params(combine_tol: f64) -> CombineParams {
        CombineParams {
            efficiency_tol: 0.5,
            combine_tol,
            max_box_size: IntVector::new(&[100, 100]),
        }
    }

    #[test]
    fn adjacent_leaves_merge() {
        let mut leaves = vec![
            leaf(1, 0, &[0, 0], &[3, 3], 16),
            leaf(0, 0, &[4, 0], &[9, 3], 24),
        ];
        let merges = combine_leaves(&mut leaves, &params(0.9));
        assert_eq!(merges.len(), 1);
        // the right piece is larger, so rank 0 owns the result
        assert_eq!(merges[0].result.id, BoxId::new(0, 1));
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[0].mapped.bx, IndexBox::from_bounds(&[0, 0], &[9, 3]));
        assert_eq!(leaves[0].tags, 40);
    }

    #[test]
    fn blocked_or_sparse_pairs_stay_apart() {
        let mut leaves = vec![
            leaf(0, 0, &[0, 0], &[1, 1], 4),
            leaf(0, 1, &[6, 0], &[7, 1], 4),
            leaf(0, 2, &[3, 0], &[4, 1], 4),
        ];
        // 0 and 1 would swallow 2; 0+2 and 2+1 leave a gap column (ratio 0.8)
        assert!(combine_leaves(&mut leaves.clone(), &params(0.9)).is_empty());
        assert!(combine_leaves(&mut leaves, &params(1.0)).is_empty());
    }

    #[test]
    fn renumbering_orders_by_position() {
        let leaves = vec![
            leaf(0, 7, &[5, 0], &[6, 1], 1),
            leaf(0, 3, &[0, 0], &[1, 1], 1),
            leaf(1, 0, &[9, 9], &[9, 9], 1),
        ];
        let map = sorted_renumbering(&leaves);
        assert_eq!(map[&BoxId::new(0, 3)], BoxId::new(0, 0));
        assert_eq!(map[&BoxId::new(0, 7)], BoxId::new(0, 1));
        assert_eq!(map[&BoxId::new(1, 0)], BoxId::new(1, 0));
    }
}
