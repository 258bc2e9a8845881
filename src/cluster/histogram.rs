//! Per-axis tag histograms.
//!
//! `counts[axis][i]` is the number of tagged cells in the slab
//! `lo[axis] + i` of the histogram box.

use crate::geometry::IndexBox;
use crate::level::{CellData, Patch};
use crate::mesh_error::MeshError;
#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Histogram {
    bx: IndexBox,
    counts: Vec<Vec<u64>>,
}

impl Histogram {
    pub fn zeros(bx: IndexBox) -> Self {
        let counts = (0..bx.dim().get())
            .map(|axis| vec![0; bx.extent(axis) as usize])
            .collect();
        Self { bx, counts }
    }

    /// Rebuilds a histogram from its [`flatten`](Self::flatten)ed form.
    pub fn from_flat(bx: IndexBox, flat: &[u64]) -> Result<Self, MeshError> {
        let mut h = Self::zeros(bx);
        h.merge_flat(flat)?;
        Ok(h)
    }

    #[inline]
    pub fn bx(&self) -> &IndexBox {
        &self.bx
    }

    #[inline]
    pub fn axis(&self, axis: usize) -> &[u64] {
        &self.counts[axis]
    }

    /// Total tagged cells.
    pub fn total(&self) -> u64 {
        self.counts.first().map_or(0, |c| c.iter().sum())
    }

    /// Adds the cells of `data` equal to `tag_value` inside the histogram box.
    pub fn accumulate(&mut self, data: &CellData<i32>, tag_value: i32) {
        let lo = self.bx.lower();
        for cell in data.bx().intersect(&self.bx).cells() {
            if data.get(&cell) == Some(tag_value) {
                for (axis, c) in self.counts.iter_mut().enumerate() {
                    c[(cell[axis] - lo[axis]) as usize] += 1;
                }
            }
        }
    }

    pub fn merge(&mut self, other: &Histogram) {
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
        }
    }

    /// Adds a flattened histogram of the same box.
    pub fn merge_flat(&mut self, flat: &[u64]) -> Result<(), MeshError> {
        let expected: usize = self.counts.iter().map(Vec::len).sum();
        if flat.len() != expected {
            return Err(MeshError::Wire(format!(
                "histogram of {} needs {expected} counts, got {}",
                self.bx,
                flat.len()
            )));
        }
        let mut rest = flat;
        for c in &mut self.counts {
            let (head, tail) = rest.split_at(c.len());
            c.iter_mut().zip(head).for_each(|(x, y)| *x += y);
            rest = tail;
        }
        Ok(())
    }

    /// Axis arrays concatenated, axis 0 first.
    pub fn flatten(&self) -> Vec<u64> {
        self.counts.concat()
    }

    /// Smallest box holding every tagged cell, `None` when there are none.
    pub fn tag_bounds(&self) -> Option<IndexBox> {
        let mut out = self.bx;
        for (axis, c) in self.counts.iter().enumerate() {
            let first = c.iter().position(|&n| n > 0)?;
            let last = c.iter().rposition(|&n| n > 0)?;
            let lo = self.bx.lower()[axis];
            out = out.with_axis(axis, lo + first as i32, lo + last as i32);
        }
        Some(out)
    }

    /// The histogram restricted to `sub`, which must lie inside the box.
    pub fn restrict(&self, sub: &IndexBox) -> Histogram {
        debug_assert!(self.bx.contains_box(sub));
        let counts = self
            .counts
            .iter()
            .enumerate()
            .map(|(axis, c)| {
                let start = (sub.lower()[axis] - self.bx.lower()[axis]) as usize;
                c[start..start + sub.extent(axis) as usize].to_vec()
            })
            .collect();
        Histogram { bx: *sub, counts }
    }
}

/// Histogram of the tags held by `patches` over `bx`.
#[cfg(not(feature = "rayon"))]
pub fn local_histogram(
    bx: IndexBox,
    patches: &[&Patch],
    data_index: usize,
    tag_value: i32,
) -> Result<Histogram, MeshError> {
    let mut h = Histogram::zeros(bx);
    for p in patches {
        if p.bx().intersects(&bx) {
            h.accumulate(p.require_data(data_index)?, tag_value);
        }
    }
    Ok(h)
}

/// Histogram of the tags held by `patches` over `bx`.
#[cfg(feature = "rayon")]
pub fn local_histogram(
    bx: IndexBox,
    patches: &[&Patch],
    data_index: usize,
    tag_value: i32,
) -> Result<Histogram, MeshError> {
    patches
        .par_iter()
        .filter(|p| p.bx().intersects(&bx))
        .map(|p| {
            let mut h = Histogram::zeros(bx);
            h.accumulate(p.require_data(data_index)?, tag_value);
            Ok(h)
        })
        .try_reduce(
            || Histogram::zeros(bx),
            |mut a, b| {
                a.merge(&b);
                Ok(a)
            },
        )
}
