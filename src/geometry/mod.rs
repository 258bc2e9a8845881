//! Index-space geometry: dimensions, integer vectors and boxes.

pub mod index_box;
pub mod int_vector;

pub use index_box::{CellIter, IndexBox};
pub use int_vector::{Dimension, IntVector, MAX_DIM};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical block of a multi-block mesh. Passed through untouched.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block{}", self.0)
    }
}
