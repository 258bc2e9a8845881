//! Accept/split decision for one dendrogram node.
//!
//! [`decide`] is pure: it looks only at the summed histogram and the cut
//! parameters, so every rank that evaluates it on the same input gets the same
//! answer. The box is first shrunk to the bounding box of its tags. Cuts are
//! searched in two passes:
//!
//! 1. *zero swath*: the longest interior run of empty slabs over all axes
//!    (ties: longer box axis, then the run nearest the center). The run is
//!    dropped from both children.
//! 2. *Laplacian*: `lap[i] = h[i-1] - 2h[i] + h[i+1]`; a cut between `c-1` and
//!    `c` where `lap` changes sign has strength `|lap[c] - lap[c-1]|`. Only
//!    cuts within `max_lap_cut_from_center` of the center are considered and
//!    axes are tried longest first. Without a sign change the center plane is
//!    used.
//!
//! Both pieces of a cut are at least `min_box` wide along the cut axis.

use crate::cluster::histogram::Histogram;
use crate::geometry::{IndexBox, IntVector};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CutParams {
    pub min_box: IntVector,
    pub max_box_size: IntVector,
    pub efficiency_tol: f64,
    pub max_lap_cut_from_center: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CutKind {
    ZeroSwath,
    Laplacian,
    Center,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Cut {
    pub axis: usize,
    pub left: IndexBox,
    pub right: IndexBox,
    pub kind: CutKind,
    /// The box was efficient but too large.
    pub forced_by_max_size: bool,
}

/// Why a node became a leaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LeafReason {
    /// Efficient enough and within the size limit.
    Converged,
    /// No admissible cut exists.
    Irreducible,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Decision {
    /// No tags at all.
    Reject,
    Accept {
        bx: IndexBox,
        tags: u64,
        reason: LeafReason,
    },
    Split {
        bx: IndexBox,
        tags: u64,
        cut: Cut,
    },
}

/// Tagged fraction of a box.
pub fn efficiency(tags: u64, bx: &IndexBox) -> f64 {
    match bx.size() {
        0 => 0.0,
        n => tags as f64 / n as f64,
    }
}

pub fn decide(hist: &Histogram, params: &CutParams) -> Decision {
    let tags = hist.total();
    let Some(bx) = hist.tag_bounds() else {
        return Decision::Reject;
    };
    let hist = hist.restrict(&bx);
    let shape = bx.shape();
    let oversized: Vec<usize> = (0..bx.dim().get())
        .filter(|&a| shape[a] > params.max_box_size[a])
        .collect();
    let efficient = efficiency(tags, &bx) >= params.efficiency_tol;

    if efficient && oversized.is_empty() {
        return Decision::Accept {
            bx,
            tags,
            reason: LeafReason::Converged,
        };
    }

    let cut = if oversized.is_empty() {
        let all: Vec<usize> = (0..bx.dim().get()).collect();
        find_cut(&hist, params, &all)
    } else {
        find_cut(&hist, params, &oversized).map(|c| Cut {
            forced_by_max_size: efficient,
            ..c
        })
    };

    match cut {
        Some(cut) => Decision::Split { bx, tags, cut },
        None => Decision::Accept {
            bx,
            tags,
            reason: LeafReason::Irreducible,
        },
    }
}

fn find_cut(hist: &Histogram, params: &CutParams, axes: &[usize]) -> Option<Cut> {
    zero_swath_cut(hist, params, axes).or_else(|| laplacian_cut(hist, params, axes))
}

fn min_width(params: &CutParams, axis: usize) -> usize {
    params.min_box[axis].max(1) as usize
}

fn zero_swath_cut(hist: &Histogram, params: &CutParams, axes: &[usize]) -> Option<Cut> {
    let bx = *hist.bx();
    // (run length, box extent, distance from center, axis, first, last)
    let mut best: Option<(usize, i64, i64, usize, usize, usize)> = None;
    for &axis in axes {
        let h = hist.axis(axis);
        let n = h.len();
        let min_w = min_width(params, axis);
        let mut i = 0;
        while i < n {
            if h[i] != 0 {
                i += 1;
                continue;
            }
            let start = i;
            while i < n && h[i] == 0 {
                i += 1;
            }
            let end = i - 1;
            if start < min_w || n - 1 - end < min_w {
                continue;
            }
            let len = end - start + 1;
            let extent = bx.extent(axis);
            let dist = (start as i64 + end as i64 - (n as i64 - 1)).abs();
            let better = match best {
                None => true,
                Some((bl, be, bd, ..)) => {
                    len > bl || (len == bl && (extent > be || (extent == be && dist < bd)))
                }
            };
            if better {
                best = Some((len, extent, dist, axis, start, end));
            }
        }
    }
    best.map(|(_, _, _, axis, start, end)| {
        let lo = bx.lower()[axis];
        Cut {
            axis,
            left: bx.with_axis(axis, lo, lo + start as i32 - 1),
            right: bx.with_axis(axis, lo + end as i32 + 1, bx.upper()[axis]),
            kind: CutKind::ZeroSwath,
            forced_by_max_size: false,
        }
    })
}

fn laplacian_cut(hist: &Histogram, params: &CutParams, axes: &[usize]) -> Option<Cut> {
    let bx = *hist.bx();
    let mut order = axes.to_vec();
    order.sort_by(|a, b| bx.extent(*b).cmp(&bx.extent(*a)).then(a.cmp(b)));

    for axis in order {
        let h = hist.axis(axis);
        let n = h.len();
        let min_w = min_width(params, axis);
        if n < 2 * min_w {
            continue;
        }
        // `c` counts the cells left of the cut
        let half = n as f64 / 2.0;
        let reach = params.max_lap_cut_from_center * half;
        let lo_c = min_w.max((half - reach).ceil() as usize);
        let hi_c = (n - min_w).min((half + reach).floor() as usize);
        let center = n / 2;

        let lap: Vec<i64> = (0..n)
            .map(|i| {
                if i == 0 || i == n - 1 {
                    0
                } else {
                    h[i - 1] as i64 - 2 * h[i] as i64 + h[i + 1] as i64
                }
            })
            .collect();

        // (strength, distance, c)
        let mut best: Option<(i64, usize, usize)> = None;
        for c in lo_c.max(2)..=hi_c.min(n.saturating_sub(2)) {
            let (a, b) = (lap[c - 1], lap[c]);
            if a.signum() * b.signum() >= 0 {
                continue;
            }
            let strength = (b - a).abs();
            let dist = (2 * c).abs_diff(n);
            let better = match best {
                None => true,
                Some((bs, bd, _)) => strength > bs || (strength == bs && dist < bd),
            };
            if better {
                best = Some((strength, dist, c));
            }
        }

        let (c, kind) = match best {
            Some((_, _, c)) => (c, CutKind::Laplacian),
            None => (center, CutKind::Center),
        };
        let pos = bx.lower()[axis] + c as i32;
        let (left, right) = bx.split_at(axis, pos);
        return Some(Cut {
            axis,
            left,
            right,
            kind,
            forced_by_max_size: false,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::CellData;

    fn params(min: i32, eff: f64) -> CutParams {
        CutParams {
            min_box: IntVector::new(&[min, min]),
            max_box_size: IntVector::new(&[i32::MAX, i32::MAX]),
            efficiency_tol: eff,
            max_lap_cut_from_center: 1.0,
        }
    }

    fn hist_of(bx: IndexBox, regions: &[IndexBox]) -> Histogram {
        let mut d = CellData::filled(bx, 0);
        for r in regions {
            d.fill_region(r, 1);
        }
        let mut h = Histogram::zeros(bx);
        h.accumulate(&d, 1);
        h
    }

    #[test]
    fn empty_histogram_is_rejected() {
        let h = Histogram::zeros(IndexBox::from_bounds(&[0, 0], &[7, 7]));
        assert_eq!(decide(&h, &params(1, 0.8)), Decision::Reject);
    }

    #[test]
    fn dense_block_is_shrunk_and_accepted() {
        let tagged = IndexBox::from_bounds(&[2, 3], &[5, 6]);
        let h = hist_of(IndexBox::from_bounds(&[0, 0], &[15, 15]), &[tagged]);
        match decide(&h, &params(1, 0.8)) {
            Decision::Accept { bx, tags, reason } => {
                assert_eq!(bx, tagged);
                assert_eq!(tags, 16);
                assert_eq!(reason, LeafReason::Converged);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gap_gives_zero_swath_cut() {
        let a = IndexBox::from_bounds(&[0, 0], &[3, 3]);
        let b = IndexBox::from_bounds(&[10, 0], &[13, 3]);
        let h = hist_of(IndexBox::from_bounds(&[0, 0], &[13, 3]), &[a, b]);
        match decide(&h, &params(1, 0.8)) {
            Decision::Split { cut, .. } => {
                assert_eq!(cut.kind, CutKind::ZeroSwath);
                assert_eq!(cut.axis, 0);
                assert_eq!(cut.left, a);
                assert_eq!(cut.right, b);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn gap_narrower_than_min_box_is_not_used() {
        let a = IndexBox::from_bounds(&[0, 0], &[1, 3]);
        let b = IndexBox::from_bounds(&[10, 0], &[13, 3]);
        let h = hist_of(IndexBox::from_bounds(&[0, 0], &[13, 3]), &[a, b]);
        if let Decision::Split { cut, .. } = decide(&h, &params(3, 0.8)) {
            assert_ne!(cut.kind, CutKind::ZeroSwath);
            assert!(cut.left.extent(cut.axis) >= 3);
            assert!(cut.right.extent(cut.axis) >= 3);
        }
    }

    #[test]
    fn l_shape_uses_laplacian() {
        // full-height column plus a one-row foot: no empty slab anywhere
        let col = IndexBox::from_bounds(&[0, 0], &[1, 15]);
        let foot = IndexBox::from_bounds(&[0, 0], &[15, 1]);
        let h = hist_of(IndexBox::from_bounds(&[0, 0], &[15, 15]), &[col, foot]);
        match decide(&h, &params(1, 0.9)) {
            Decision::Split { cut, .. } => {
                assert_eq!(cut.kind, CutKind::Laplacian);
                assert_eq!(cut.left.size() + cut.right.size(), 256);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn efficient_but_oversized_cuts_only_long_axis() {
        let tagged = IndexBox::from_bounds(&[0, 0], &[39, 9]);
        let h = hist_of(tagged, &[tagged]);
        let p = CutParams {
            max_box_size: IntVector::new(&[16, 16]),
            ..params(2, 0.5)
        };
        match decide(&h, &p) {
            Decision::Split { cut, .. } => {
                assert_eq!(cut.axis, 0);
                assert!(cut.forced_by_max_size);
                assert_eq!(cut.kind, CutKind::Center);
                assert_eq!(cut.left.extent(0), 20);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tiny_sparse_box_is_irreducible() {
        let bx = IndexBox::from_bounds(&[0, 0], &[2, 2]);
        let h = hist_of(
            bx,
            &[
                IndexBox::from_bounds(&[0, 0], &[0, 0]),
                IndexBox::from_bounds(&[2, 2], &[2, 2]),
            ],
        );
        match decide(&h, &params(2, 0.9)) {
            Decision::Accept { reason, .. } => assert_eq!(reason, LeafReason::Irreducible),
            other => panic!("unexpected {other:?}"),
        }
    }
}
