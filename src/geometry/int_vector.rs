//! Integer vectors over a runtime dimension.
//!
//! [`IntVector`] is the index-space workhorse: cell coordinates, box shapes,
//! ghost widths, refinement ratios and size limits are all `IntVector`s.
//! Storage is a fixed `[i32; MAX_DIM]` so the type is `Copy` and can be put on
//! the wire without allocation; components past the dimension are always zero.

use crate::mesh_error::MeshError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Index, IndexMut, Mul, Sub};

/// Largest supported spatial dimension.
pub const MAX_DIM: usize = 3;

/// Spatial dimension of a mesh, `1..=MAX_DIM`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dimension(u8);

impl Dimension {
    /// Creates a dimension, rejecting values outside `1..=MAX_DIM`.
    pub fn new(d: usize) -> Result<Self, MeshError> {
        if d == 0 || d > MAX_DIM {
            return Err(MeshError::UnsupportedDimension(d));
        }
        Ok(Dimension(d as u8))
    }

    #[inline]
    pub const fn get(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}D", self.0)
    }
}

/// A point or extent in integer index space.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntVector {
    dim: Dimension,
    v: [i32; MAX_DIM],
}

impl IntVector {
    /// Builds a vector from its components.
    ///
    /// # Panics
    ///
    /// Panics if `values` is empty or longer than [`MAX_DIM`]. Use
    /// [`IntVector::try_from_slice`] for untrusted input.
    pub fn new(values: &[i32]) -> Self {
        Self::try_from_slice(values).expect("IntVector needs 1..=3 components")
    }

    /// Fallible constructor for configuration and wire input.
    pub fn try_from_slice(values: &[i32]) -> Result<Self, MeshError> {
        let dim = Dimension::new(values.len())?;
        let mut v = [0; MAX_DIM];
        v[..values.len()].copy_from_slice(values);
        Ok(Self { dim, v })
    }

    /// Every component equal to `value`.
    pub fn uniform(dim: Dimension, value: i32) -> Self {
        let mut v = [0; MAX_DIM];
        v[..dim.get()].iter_mut().for_each(|c| *c = value);
        Self { dim, v }
    }

    pub fn zero(dim: Dimension) -> Self {
        Self::uniform(dim, 0)
    }

    pub fn one(dim: Dimension) -> Self {
        Self::uniform(dim, 1)
    }

    /// The "unbounded" size limit.
    pub fn max_value(dim: Dimension) -> Self {
        Self::uniform(dim, i32::MAX)
    }

    #[inline]
    pub fn dim(&self) -> Dimension {
        self.dim
    }

    /// Components as a slice of length `dim`.
    #[inline]
    pub fn as_slice(&self) -> &[i32] {
        &self.v[..self.dim.get()]
    }

    /// Raw storage, padded with zeros to [`MAX_DIM`].
    #[inline]
    pub fn raw(&self) -> [i32; MAX_DIM] {
        self.v
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.as_slice().iter().copied()
    }

    /// Product of the components, widened to avoid overflow.
    pub fn product(&self) -> i64 {
        self.iter().map(i64::from).product()
    }

    /// Per-axis minimum. `Ord::min` compares lexicographically instead.
    pub fn componentwise_min(&self, other: &Self) -> Self {
        self.zip_with(other, i32::min)
    }

    /// Per-axis maximum.
    pub fn componentwise_max(&self, other: &Self) -> Self {
        self.zip_with(other, i32::max)
    }

    /// Smallest component.
    pub fn min_component(&self) -> i32 {
        self.iter().min().unwrap_or(0)
    }

    /// Axis holding the largest component; lowest axis on ties.
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for axis in 1..self.dim.get() {
            if self.v[axis] > self.v[best] {
                best = axis;
            }
        }
        best
    }

    /// True when every component of `self` is `>= other`.
    pub fn all_ge(&self, other: &Self) -> bool {
        self.iter().zip(other.iter()).all(|(a, b)| a >= b)
    }

    /// True when every component of `self` is `<= other`.
    pub fn all_le(&self, other: &Self) -> bool {
        self.iter().zip(other.iter()).all(|(a, b)| a <= b)
    }

    /// True when some component of `self` is `< other`.
    pub fn any_lt(&self, other: &Self) -> bool {
        !self.all_ge(other)
    }

    pub(crate) fn zip_with(&self, other: &Self, f: impl Fn(i32, i32) -> i32) -> Self {
        debug_assert_eq!(self.dim, other.dim, "IntVector dimension mismatch");
        let mut v = [0; MAX_DIM];
        for axis in 0..self.dim.get() {
            v[axis] = f(self.v[axis], other.v[axis]);
        }
        Self { dim: self.dim, v }
    }

    pub(crate) fn map(&self, f: impl Fn(i32) -> i32) -> Self {
        let mut v = [0; MAX_DIM];
        for axis in 0..self.dim.get() {
            v[axis] = f(self.v[axis]);
        }
        Self { dim: self.dim, v }
    }
}

impl Index<usize> for IntVector {
    type Output = i32;
    fn index(&self, axis: usize) -> &i32 {
        &self.as_slice()[axis]
    }
}

impl IndexMut<usize> for IntVector {
    fn index_mut(&mut self, axis: usize) -> &mut i32 {
        let d = self.dim.get();
        &mut self.v[..d][axis]
    }
}

impl Add for IntVector {
    type Output = IntVector;
    fn add(self, rhs: IntVector) -> IntVector {
        self.zip_with(&rhs, i32::saturating_add)
    }
}

impl Sub for IntVector {
    type Output = IntVector;
    fn sub(self, rhs: IntVector) -> IntVector {
        self.zip_with(&rhs, i32::saturating_sub)
    }
}

impl Mul for IntVector {
    type Output = IntVector;
    fn mul(self, rhs: IntVector) -> IntVector {
        self.zip_with(&rhs, i32::saturating_mul)
    }
}

impl Mul<i32> for IntVector {
    type Output = IntVector;
    fn mul(self, rhs: i32) -> IntVector {
        self.map(|c| c.saturating_mul(rhs))
    }
}

impl fmt::Debug for IntVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for IntVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            if c == i32::MAX {
                write!(f, "inf")?;
            } else {
                write!(f, "{c}")?;
            }
        }
        write!(f, ")")
    }
}

impl Serialize for IntVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_slice().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IntVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<i32>::deserialize(deserializer)?;
        IntVector::try_from_slice(&values).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_bounds() {
        assert!(Dimension::new(0).is_err());
        assert!(Dimension::new(4).is_err());
        assert_eq!(Dimension::new(2).unwrap().get(), 2);
    }

    #[test]
    fn arithmetic_and_product() {
        let a = IntVector::new(&[2, 3]);
        let b = IntVector::new(&[4, 5]);
        assert_eq!(a + b, IntVector::new(&[6, 8]));
        assert_eq!(b - a, IntVector::new(&[2, 2]));
        assert_eq!((a * b).product(), 8 * 15);
        assert_eq!(a.componentwise_max(&b), b);
        assert_eq!(IntVector::new(&[3, 7, 7]).argmax(), 1);
    }

    #[test]
    fn componentwise_bounds_differ_from_lexicographic_order() {
        let a = IntVector::new(&[0, 5]);
        let b = IntVector::new(&[3, 0]);
        assert_eq!(a.componentwise_max(&b), IntVector::new(&[3, 5]));
        assert_eq!(a.componentwise_min(&b), IntVector::new(&[0, 0]));
        assert_eq!(std::cmp::max(a, b), b);
    }

    #[test]
    fn unbounded_add_saturates() {
        let d = Dimension::new(2).unwrap();
        let big = IntVector::max_value(d) + IntVector::one(d);
        assert_eq!(big, IntVector::max_value(d));
        assert_eq!(format!("{big}"), "(inf,inf)");
    }

    #[test]
    fn serde_as_array() {
        let v: IntVector = serde_json::from_str("[8, 16]").unwrap();
        assert_eq!(v, IntVector::new(&[8, 16]));
        assert_eq!(serde_json::to_string(&v).unwrap(), "[8,16]");
        assert!(serde_json::from_str::<IntVector>("[]").is_err());
    }
}
