//! Axis-aligned boxes in integer index space.
//!
//! An [`IndexBox`] covers the cells `lo..=hi` on every axis. A box with
//! `hi < lo` on any axis is *empty*; empty boxes are valid values and simply
//! cover no cells. Cell enumeration is axis-0 fastest.

use super::int_vector::{Dimension, IntVector};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexBox {
    lo: IntVector,
    hi: IntVector,
}

impl IndexBox {
    /// Creates the box `lo..=hi`.
    ///
    /// # Panics
    ///
    /// Panics if `lo` and `hi` have different dimensions.
    pub fn new(lo: IntVector, hi: IntVector) -> Self {
        assert_eq!(lo.dim(), hi.dim(), "box corners must share a dimension");
        Self { lo, hi }
    }

    /// Convenience constructor from corner slices.
    pub fn from_bounds(lo: &[i32], hi: &[i32]) -> Self {
        Self::new(IntVector::new(lo), IntVector::new(hi))
    }

    /// The canonical empty box of a dimension.
    pub fn empty(dim: Dimension) -> Self {
        Self {
            lo: IntVector::zero(dim),
            hi: IntVector::uniform(dim, -1),
        }
    }

    #[inline]
    pub fn lower(&self) -> IntVector {
        self.lo
    }

    #[inline]
    pub fn upper(&self) -> IntVector {
        self.hi
    }

    #[inline]
    pub fn dim(&self) -> Dimension {
        self.lo.dim()
    }

    pub fn is_empty(&self) -> bool {
        (0..self.dim().get()).any(|axis| self.hi[axis] < self.lo[axis])
    }

    /// Number of cells along `axis` (zero for an empty extent).
    pub fn extent(&self, axis: usize) -> i64 {
        (i64::from(self.hi[axis]) - i64::from(self.lo[axis]) + 1).max(0)
    }

    /// Cells per axis.
    pub fn shape(&self) -> IntVector {
        self.hi.zip_with(&self.lo, |h, l| (h - l + 1).max(0))
    }

    /// Total number of cells.
    pub fn size(&self) -> u64 {
        (0..self.dim().get())
            .map(|axis| self.extent(axis) as u64)
            .product()
    }

    pub fn contains(&self, cell: &IntVector) -> bool {
        cell.all_ge(&self.lo) && cell.all_le(&self.hi)
    }

    /// True when `other` is empty or lies entirely inside `self`.
    pub fn contains_box(&self, other: &IndexBox) -> bool {
        other.is_empty() || (self.contains(&other.lo) && self.contains(&other.hi))
    }

    /// Intersection, possibly empty.
    pub fn intersect(&self, other: &IndexBox) -> IndexBox {
        IndexBox {
            lo: self.lo.componentwise_max(&other.lo),
            hi: self.hi.componentwise_min(&other.hi),
        }
    }

    pub fn intersects(&self, other: &IndexBox) -> bool {
        !self.is_empty() && !other.is_empty() && !self.intersect(other).is_empty()
    }

    /// Smallest box containing both; empty operands are ignored.
    pub fn bounding(&self, other: &IndexBox) -> IndexBox {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        IndexBox {
            lo: self.lo.componentwise_min(&other.lo),
            hi: self.hi.componentwise_max(&other.hi),
        }
    }

    /// Grows every face outward by `width` (shrinks for negative widths).
    pub fn grow(&self, width: &IntVector) -> IndexBox {
        if self.is_empty() {
            return *self;
        }
        IndexBox {
            lo: self.lo - *width,
            hi: self.hi + *width,
        }
    }

    /// Same box moved by `offset`.
    pub fn shift(&self, offset: &IntVector) -> IndexBox {
        IndexBox {
            lo: self.lo + *offset,
            hi: self.hi + *offset,
        }
    }

    /// Splits before the cell `pos` on `axis`: the left piece is
    /// `lo..=pos-1`, the right piece `pos..=hi`.
    pub fn split_at(&self, axis: usize, pos: i32) -> (IndexBox, IndexBox) {
        let mut left = *self;
        let mut right = *self;
        left.hi[axis] = pos - 1;
        right.lo[axis] = pos;
        (left, right)
    }

    /// Restricts `axis` to `lo..=hi`, keeping the other axes.
    pub fn with_axis(&self, axis: usize, lo: i32, hi: i32) -> IndexBox {
        let mut b = *self;
        b.lo[axis] = lo;
        b.hi[axis] = hi;
        b
    }

    /// Linear offset of `cell` inside this box (axis-0 fastest).
    pub fn offset_of(&self, cell: &IntVector) -> Option<usize> {
        if !self.contains(cell) {
            return None;
        }
        let mut offset = 0usize;
        let mut stride = 1usize;
        for axis in 0..self.dim().get() {
            offset += (cell[axis] - self.lo[axis]) as usize * stride;
            stride *= self.extent(axis) as usize;
        }
        Some(offset)
    }

    /// Iterates every cell of the box, axis 0 fastest.
    pub fn cells(&self) -> CellIter {
        CellIter {
            bx: *self,
            next: if self.is_empty() { None } else { Some(self.lo) },
        }
    }
}

/// Iterator returned by [`IndexBox::cells`].
pub struct CellIter {
    bx: IndexBox,
    next: Option<IntVector>,
}

impl Iterator for CellIter {
    type Item = IntVector;

    fn next(&mut self) -> Option<IntVector> {
        let current = self.next?;
        let mut succ = current;
        let mut axis = 0;
        loop {
            if axis == self.bx.dim().get() {
                self.next = None;
                break;
            }
            if succ[axis] < self.bx.hi[axis] {
                succ[axis] += 1;
                self.next = Some(succ);
                break;
            }
            succ[axis] = self.bx.lo[axis];
            axis += 1;
        }
        Some(current)
    }
}

impl fmt::Debug for IndexBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for IndexBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", self.lo, self.hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(lo: &[i32], hi: &[i32]) -> IndexBox {
        IndexBox::from_bounds(lo, hi)
    }

    #[test]
    fn size_and_emptiness() {
        assert_eq!(b(&[0, 0], &[9, 4]).size(), 50);
        assert!(b(&[3, 0], &[2, 4]).is_empty());
        assert_eq!(b(&[3, 0], &[2, 4]).size(), 0);
        assert!(IndexBox::empty(Dimension::new(3).unwrap()).is_empty());
    }

    #[test]
    fn intersect_and_bound() {
        let a = b(&[0, 0], &[4, 4]);
        let c = b(&[3, 2], &[8, 9]);
        assert_eq!(a.intersect(&c), b(&[3, 2], &[4, 4]));
        assert!(a.intersects(&c));
        assert!(!a.intersects(&b(&[5, 0], &[6, 1])));
        assert_eq!(a.bounding(&c), b(&[0, 0], &[8, 9]));
        assert_eq!(a.grow(&IntVector::new(&[1, 2])), b(&[-1, -2], &[5, 6]));
    }

    #[test]
    fn intersect_is_per_axis() {
        let a = b(&[0, 5], &[9, 9]);
        let c = b(&[3, 0], &[6, 7]);
        assert_eq!(a.intersect(&c), b(&[3, 5], &[6, 7]));
        assert_eq!(a.bounding(&c), b(&[0, 0], &[9, 9]));
    }

    #[test]
    fn split_keeps_cells() {
        let a = b(&[0, 0], &[9, 3]);
        let (l, r) = a.split_at(0, 4);
        assert_eq!(l, b(&[0, 0], &[3, 3]));
        assert_eq!(r, b(&[4, 0], &[9, 3]));
        assert_eq!(l.size() + r.size(), a.size());
    }

    #[test]
    fn cell_iteration_matches_offsets() {
        let a = b(&[1, -1, 0], &[2, 0, 1]);
        let cells: Vec<_> = a.cells().collect();
        assert_eq!(cells.len() as u64, a.size());
        for (i, c) in cells.iter().enumerate() {
            assert_eq!(a.offset_of(c), Some(i));
        }
        assert_eq!(cells[1], IntVector::new(&[2, -1, 0]));
        assert_eq!(b(&[1], &[0]).cells().count(), 0);
    }
}
