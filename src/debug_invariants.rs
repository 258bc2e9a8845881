use crate::level::{BoxLevel, Connector};
use crate::mesh_error::MeshError;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Assert invariants in debug builds or when invariant checking is enabled.
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), MeshError>;
}

/// Helper macro to run a fallible check and panic on error when invariant
/// checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}

impl DebugInvariants for BoxLevel {
    fn debug_assert_invariants(&self) {
        debug_invariants!(self.validate_invariants(), "BoxLevel");
    }

    /// Local boxes are non-empty, share the level dimension and are pairwise
    /// disjoint within a block.
    fn validate_invariants(&self) -> Result<(), MeshError> {
        let local: Vec<_> = self.local_boxes().collect();
        for mb in &local {
            if mb.bx.dim() != self.dim() {
                return Err(MeshError::Invariant(format!("box {mb} has the wrong dimension")));
            }
            if mb.bx.is_empty() {
                return Err(MeshError::Invariant(format!("box {mb} is empty")));
            }
        }
        for (i, a) in local.iter().enumerate() {
            for b in &local[i + 1..] {
                if a.block == b.block && a.bx.intersects(&b.bx) {
                    return Err(MeshError::Invariant(format!("boxes {a} and {b} overlap")));
                }
            }
        }
        Ok(())
    }
}

impl DebugInvariants for Connector {
    fn debug_assert_invariants(&self) {
        debug_invariants!(self.validate_invariants(), "Connector");
    }

    /// Heads share the width's dimension.
    fn validate_invariants(&self) -> Result<(), MeshError> {
        let dim = self.width().dim();
        for (base, heads) in self.iter() {
            if let Some(h) = heads.iter().find(|h| h.bx.dim() != dim) {
                return Err(MeshError::Invariant(format!(
                    "neighbor {h} of {base} is not {dim}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BlockId, IndexBox, IntVector};

    #[test]
    fn overlapping_local_boxes_are_reported() {
        let mut level = BoxLevel::new(IntVector::new(&[1, 1]), 0, 1);
        level.add_box(IndexBox::from_bounds(&[0, 0], &[3, 3]), BlockId(0));
        assert!(level.validate_invariants().is_ok());
        level.add_box(IndexBox::from_bounds(&[3, 3], &[5, 5]), BlockId(1));
        assert!(level.validate_invariants().is_ok());
        level.add_box(IndexBox::from_bounds(&[2, 2], &[4, 4]), BlockId(0));
        assert!(matches!(level.validate_invariants(), Err(MeshError::Invariant(_))));
    }
}
