//! First-fit-decreasing assignment of pieces to ranks.
//!
//! Pieces are placed heaviest first. A piece goes to its preferred rank (the
//! one whose attractor boxes it overlaps most) when that keeps the rank at or
//! below `(1 + tolerance)` times the ideal load; otherwise to the least
//! loaded rank. Every tie is broken by canonical piece order and lowest rank,
//! so all ranks compute the same packing from the same piece list.

use crate::geometry::{BlockId, IndexBox};
use crate::level::BoxId;
use crate::mesh_error::MeshError;

/// A box fragment waiting for an owner.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Piece {
    /// The pre-balance box it was cut from.
    pub origin: BoxId,
    pub bx: IndexBox,
    pub block: BlockId,
    pub load: f64,
    /// Rank with the largest attractor overlap, and that overlap.
    pub preferred: Option<(usize, u64)>,
}

/// Result of [`pack_pieces`].
#[derive(Clone, Debug, PartialEq)]
pub struct Packing {
    /// Owner rank of each piece, parallel to the input.
    pub owner: Vec<usize>,
    /// Load per rank, parallel to the rank list.
    pub bin_loads: Vec<f64>,
}

impl Packing {
    /// `max / mean` over the bins; 1 when nothing was packed.
    pub fn imbalance(&self) -> f64 {
        let n = self.bin_loads.len().max(1) as f64;
        let mean = self.bin_loads.iter().sum::<f64>() / n;
        let max = self.bin_loads.iter().copied().fold(0.0, f64::max);
        if mean > 0.0 { max / mean } else { 1.0 }
    }
}

/// Assigns every piece to one of `ranks` (ascending, non-empty).
pub fn pack_pieces(
    pieces: &[Piece],
    ranks: &[usize],
    tolerance: f64,
) -> Result<Packing, MeshError> {
    if ranks.is_empty() {
        return Err(MeshError::config("rank_group", "no rank may receive work"));
    }
    let k = ranks.len();

    let mut order: Vec<usize> = (0..pieces.len()).collect();
    order.sort_by(|&a, &b| {
        let (pa, pb) = (&pieces[a], &pieces[b]);
        pb.load
            .total_cmp(&pa.load)
            .then_with(|| (pa.block, pa.bx, pa.origin).cmp(&(pb.block, pb.bx, pb.origin)))
    });

    let total: f64 = pieces.iter().map(|p| p.load).sum();
    let threshold = (1.0 + tolerance) * total / k as f64;
    let mut bins = vec![0.0f64; k];
    let mut counts = vec![0usize; k];
    let mut owner = vec![0usize; pieces.len()];

    for idx in order {
        let p = &pieces[idx];
        // (a) the attractor's rank, if it still has room
        let preferred = p
            .preferred
            .and_then(|(rank, _)| ranks.binary_search(&rank).ok())
            .filter(|&b| bins[b] + p.load <= threshold);
        // (b) otherwise the least loaded rank
        let bin = preferred.unwrap_or_else(|| {
            (0..k)
                .min_by(|&a, &b| bins[a].total_cmp(&bins[b]).then(counts[a].cmp(&counts[b])))
                .unwrap_or(0)
        });
        owner[idx] = ranks[bin];
        bins[bin] += p.load;
        counts[bin] += 1;
    }

    Ok(Packing {
        owner,
        bin_loads: bins,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn piece(x: i32, load: f64, preferred: Option<usize>) -> Piece {
        Piece {
            origin: BoxId::new(0, 0),
            bx: IndexBox::from_bounds(&[x], &[x]),
            block: BlockId(0),
            load,
            preferred: preferred.map(|r| (r, 1)),
        }
    }

    #[test]
    fn simple_binpack_test() {
        let pieces = vec![
            piece(0, 10.0, None),
            piece(1, 20.0, None),
            piece(2, 5.0, None),
            piece(3, 15.0, None),
        ];
        let packing = pack_pieces(&pieces, &[0, 1], 0.05).unwrap();
        assert_eq!(packing.bin_loads, vec![25.0, 25.0]);
        assert!(packing.imbalance() <= 1.05);
    }

    #[test]
    fn preference_wins_while_it_fits() {
        let pieces = vec![
            piece(0, 10.0, Some(3)),
            piece(1, 10.0, Some(3)),
            piece(2, 10.0, Some(3)),
        ];
        // ideal 15 with two ranks, so rank 3 takes only one piece of 10
        let packing = pack_pieces(&pieces, &[1, 3], 0.0).unwrap();
        assert_eq!(packing.owner, vec![3, 1, 1]);
    }

    #[test]
    fn preference_outside_the_group_is_ignored() {
        let pieces = vec![piece(0, 1.0, Some(7))];
        let packing = pack_pieces(&pieces, &[2], 0.0).unwrap();
        assert_eq!(packing.owner, vec![2]);
    }

    #[test]
    fn zero_loads_spread_by_count() {
        let pieces: Vec<Piece> = (0..4).map(|x| piece(x, 0.0, None)).collect();
        let packing = pack_pieces(&pieces, &[0, 1], 0.0).unwrap();
        assert_eq!(packing.owner, vec![0, 1, 0, 1]);
    }

    #[test]
    fn empty_group_is_rejected() {
        assert!(pack_pieces(&[], &[], 0.0).is_err());
    }
}
