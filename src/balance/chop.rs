//! Recursive bisection of boxes into balanceable pieces.
//!
//! A box is cut while it is wider than `max_size` on some axis or carries
//! more than the ideal per-rank load. Oversized axes are cut first, longest
//! first; otherwise the longest axis that admits a cut is used. Cut planes
//! keep piece widths multiples of `cut_factor`, leave both halves at least
//! `min_size` wide, and stay `bad_interval` away from domain box faces when any other
//! plane is available. The plane is placed so the left piece carries
//! `floor(n/2)/n` of the load, `n` being the number of pieces the box needs.

use crate::geometry::{Dimension, IndexBox, IntVector};
use crate::mesh_error::MeshError;
use std::cmp::Reverse;

/// Relative slack before a piece counts as overloaded.
const LOAD_SLACK: f64 = 1e-9;

/// Size and alignment limits applied to balanced boxes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BalanceConstraints {
    pub min_size: IntVector,
    pub max_size: IntVector,
    /// Preferred minimum distance between a cut and a domain face.
    pub bad_interval: IntVector,
    /// Piece widths are multiples of this.
    pub cut_factor: IntVector,
}

impl BalanceConstraints {
    /// No limits beyond one-cell pieces.
    pub fn new(dim: Dimension) -> Self {
        Self {
            min_size: IntVector::one(dim),
            max_size: IntVector::max_value(dim),
            bad_interval: IntVector::zero(dim),
            cut_factor: IntVector::one(dim),
        }
    }

    pub fn with_min_size(mut self, min_size: IntVector) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_max_size(mut self, max_size: IntVector) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_bad_interval(mut self, bad_interval: IntVector) -> Self {
        self.bad_interval = bad_interval;
        self
    }

    pub fn with_cut_factor(mut self, cut_factor: IntVector) -> Self {
        self.cut_factor = cut_factor;
        self
    }

    pub fn validate(&self, dim: Dimension) -> Result<(), MeshError> {
        for v in [
            &self.min_size,
            &self.max_size,
            &self.bad_interval,
            &self.cut_factor,
        ] {
            if v.dim() != dim {
                return Err(MeshError::DimensionMismatch {
                    expected: dim.get(),
                    got: v.dim().get(),
                });
            }
        }
        if self.min_size.min_component() < 1 {
            return Err(MeshError::config(
                "min_size",
                format!("{} must be positive", self.min_size),
            ));
        }
        if self.max_size.any_lt(&self.min_size) {
            return Err(MeshError::config(
                "max_size",
                format!("{} is below min_size {}", self.max_size, self.min_size),
            ));
        }
        if self.cut_factor.min_component() < 1 {
            return Err(MeshError::config(
                "cut_factor",
                format!("{} must be positive", self.cut_factor),
            ));
        }
        if self.bad_interval.min_component() < 0 {
            return Err(MeshError::config(
                "bad_interval",
                format!("{} is negative", self.bad_interval),
            ));
        }
        Ok(())
    }
}

/// Cuts `bx` into pieces that tile it exactly.
///
/// `ideal_load <= 0` disables load-driven cuts. `domain` holds the domain
/// boxes of the block `bx` lives in.
pub fn chop_box(
    bx: &IndexBox,
    ideal_load: f64,
    constraints: &BalanceConstraints,
    domain: &[IndexBox],
    load: &dyn Fn(&IndexBox) -> f64,
) -> Vec<IndexBox> {
    let mut out = Vec::new();
    if !bx.is_empty() {
        chop_into(*bx, ideal_load, constraints, domain, load, &mut out);
    }
    out
}

fn chop_into(
    bx: IndexBox,
    ideal: f64,
    c: &BalanceConstraints,
    domain: &[IndexBox],
    load: &dyn Fn(&IndexBox) -> f64,
    out: &mut Vec<IndexBox>,
) {
    let shape = bx.shape();
    let dim = shape.dim().get();
    let w = load(&bx);
    let oversized: Vec<usize> = (0..dim).filter(|&a| shape[a] > c.max_size[a]).collect();
    let overloaded = ideal > 0.0 && w > ideal * (1.0 + LOAD_SLACK);
    if oversized.is_empty() && !overloaded {
        out.push(bx);
        return;
    }

    let mut axes = if oversized.is_empty() {
        (0..dim).collect()
    } else {
        oversized.clone()
    };
    axes.sort_by_key(|&a| (Reverse(shape[a]), a));

    // zero-load boxes are cut by volume
    let measure = |b: &IndexBox| if w > 0.0 { load(b) } else { b.size() as f64 };
    let total = if w > 0.0 { w } else { bx.size() as f64 };

    for axis in axes {
        let planes = cut_planes(&bx, axis, c, domain);
        if planes.is_empty() {
            continue;
        }
        let by_load = if ideal > 0.0 { (w / ideal).ceil() } else { 1.0 };
        let by_size = (f64::from(shape[axis]) / f64::from(c.max_size[axis])).ceil();
        let n = by_load.max(by_size).max(2.0);
        let target = total * (n / 2.0).floor() / n;
        let pos = nearest_plane(&bx, axis, &planes, target, &measure);
        let (left, right) = bx.split_at(axis, pos);
        chop_into(left, ideal, c, domain, load, out);
        chop_into(right, ideal, c, domain, load, out);
        return;
    }

    if !oversized.is_empty() {
        log::warn!(
            "box {bx} cannot be cut to max_size {} within min_size {} and cut_factor {}",
            c.max_size,
            c.min_size,
            c.cut_factor
        );
    }
    out.push(bx);
}

/// Admissible planes on `axis`, given as the first cell of the right piece.
fn cut_planes(
    bx: &IndexBox,
    axis: usize,
    c: &BalanceConstraints,
    domain: &[IndexBox],
) -> Vec<i32> {
    let lo = bx.lower()[axis];
    let hi = bx.upper()[axis];
    let min = c.min_size[axis];
    let factor = c.cut_factor[axis];
    // both pieces keep widths that are multiples of the factor; a box whose
    // width is not a multiple only keeps the left piece aligned
    let whole = (hi + 1 - lo) % factor == 0;
    let all: Vec<i32> = ((lo + min)..=(hi + 1 - min))
        .filter(|p| (p - lo) % factor == 0 && (!whole || (hi + 1 - p) % factor == 0))
        .collect();

    let bad = c.bad_interval[axis];
    if bad == 0 {
        return all;
    }
    let faces: Vec<i32> = domain
        .iter()
        .filter(|d| d.intersects(bx))
        .flat_map(|d| [d.lower()[axis], d.upper()[axis] + 1])
        .collect();
    let good: Vec<i32> = all
        .iter()
        .copied()
        .filter(|&p| faces.iter().all(|&f| (p - f).abs() >= bad))
        .collect();
    if good.is_empty() { all } else { good }
}

/// The plane whose left piece comes closest to `target`; lower plane on ties.
fn nearest_plane(
    bx: &IndexBox,
    axis: usize,
    planes: &[i32],
    target: f64,
    measure: &dyn Fn(&IndexBox) -> f64,
) -> i32 {
    let left_of = |p: i32| measure(&bx.split_at(axis, p).0);
    let k = planes.partition_point(|&p| left_of(p) < target);
    let candidates = [k.checked_sub(1), (k < planes.len()).then_some(k)];
    candidates
        .into_iter()
        .flatten()
        .map(|i| (i, (left_of(planes[i]) - target).abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map_or(planes[0], |(i, _)| planes[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim2() -> Dimension {
        Dimension::new(2).unwrap()
    }

    fn cells(b: &IndexBox) -> f64 {
        b.size() as f64
    }

    #[test]
    fn square_into_four() {
        let c = BalanceConstraints::new(dim2())
            .with_min_size(IntVector::new(&[10, 10]))
            .with_max_size(IntVector::new(&[50, 50]));
        let bx = IndexBox::from_bounds(&[0, 0], &[99, 99]);
        let pieces = chop_box(&bx, 2500.0, &c, &[bx], &cells);
        assert_eq!(pieces.len(), 4);
        assert!(pieces.iter().all(|p| p.size() == 2500));
    }

    #[test]
    fn min_size_stops_cutting() {
        let c = BalanceConstraints::new(dim2()).with_min_size(IntVector::new(&[8, 8]));
        let bx = IndexBox::from_bounds(&[0, 0], &[11, 11]);
        // any cut would leave a piece narrower than 8
        assert_eq!(chop_box(&bx, 1.0, &c, &[], &cells), vec![bx]);
    }

    #[test]
    fn cuts_respect_cut_factor() {
        let c = BalanceConstraints::new(dim2()).with_cut_factor(IntVector::new(&[4, 4]));
        let bx = IndexBox::from_bounds(&[2, 0], &[33, 3]);
        let pieces = chop_box(&bx, 40.0, &c, &[], &cells);
        assert_eq!(pieces.len(), 4);
        for p in &pieces {
            let shape = p.shape();
            assert!(shape[0] % 4 == 0 && shape[1] % 4 == 0, "{p}");
        }
        assert_eq!(pieces.iter().map(IndexBox::size).sum::<u64>(), bx.size());
    }

    #[test]
    fn cut_factor_is_measured_from_the_box_corner() {
        let c = BalanceConstraints::new(Dimension::new(1).unwrap())
            .with_max_size(IntVector::new(&[4]))
            .with_cut_factor(IntVector::new(&[4]));
        let bx = IndexBox::from_bounds(&[2], &[9]);
        assert_eq!(
            chop_box(&bx, 0.0, &c, &[], &cells),
            vec![
                IndexBox::from_bounds(&[2], &[5]),
                IndexBox::from_bounds(&[6], &[9]),
            ]
        );
    }

    #[test]
    fn bad_interval_moves_cut_off_the_boundary() {
        let c = BalanceConstraints::new(Dimension::new(1).unwrap())
            .with_max_size(IntVector::new(&[8]))
            .with_bad_interval(IntVector::new(&[2]));
        let domain = [
            IndexBox::from_bounds(&[0], &[5]),
            IndexBox::from_bounds(&[6], &[11]),
        ];
        let bx = IndexBox::from_bounds(&[0], &[11]);
        // the balanced plane 6 is a domain face; 4 and 8 are equally close
        let pieces = chop_box(&bx, 0.0, &c, &domain, &cells);
        assert_eq!(
            pieces,
            vec![
                IndexBox::from_bounds(&[0], &[3]),
                IndexBox::from_bounds(&[4], &[11]),
            ]
        );
    }

    #[test]
    fn weighted_load_shifts_the_cut() {
        let c = BalanceConstraints::new(Dimension::new(1).unwrap());
        let bx = IndexBox::from_bounds(&[0], &[9]);
        // cells 0..=2 are nine times heavier than the rest
        let load = |b: &IndexBox| {
            b.cells().map(|cell| if cell[0] < 3 { 9.0 } else { 1.0 }).sum::<f64>()
        };
        let pieces = chop_box(&bx, 17.0, &c, &[], &load);
        assert_eq!(
            pieces,
            vec![
                IndexBox::from_bounds(&[0], &[0]),
                IndexBox::from_bounds(&[1], &[1]),
                IndexBox::from_bounds(&[2], &[9]),
            ]
        );
        assert!(pieces.iter().all(|p| load(p) <= 17.0));
    }

    #[test]
    fn unattainable_max_size_keeps_box() {
        let c = BalanceConstraints::new(dim2())
            .with_min_size(IntVector::new(&[6, 6]))
            .with_max_size(IntVector::new(&[8, 8]));
        let bx = IndexBox::from_bounds(&[0, 0], &[9, 5]);
        assert_eq!(chop_box(&bx, 0.0, &c, &[], &cells), vec![bx]);
    }

    #[test]
    fn constraints_are_validated() {
        let c = BalanceConstraints::new(dim2()).with_max_size(IntVector::new(&[0, 4]));
        assert!(matches!(c.validate(dim2()), Err(MeshError::InvalidConfig { .. })));
        assert!(BalanceConstraints::new(dim2()).validate(dim2()).is_ok());
    }
}
