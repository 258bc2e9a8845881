//! MeshError: Unified error type for mesh-cluster public APIs
//!
//! Clustering and load balancing are collective algorithms: a failure on one
//! rank invalidates the whole invocation. Every public fallible operation
//! returns this type so the caller can abandon the step and rerun it with
//! corrected inputs.

use crate::geometry::{IndexBox, IntVector};
use thiserror::Error;

/// Unified error type for mesh-cluster operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MeshError {
    /// A configuration value is out of range or malformed.
    #[error("invalid configuration `{option}`: {reason}")]
    InvalidConfig {
        /// Name of the offending option.
        option: &'static str,
        /// Human readable explanation.
        reason: String,
    },
    /// A dimension outside `1..=MAX_DIM` was requested.
    #[error("unsupported dimension {0} (expected 1..=3)")]
    UnsupportedDimension(usize),
    /// Two geometric objects of different dimension were combined.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Dimension that was supplied.
        got: usize,
    },
    /// The preconfigured communicator is not congruent with the tag level's.
    #[error("communicator is not congruent with the tag level's process group")]
    IncongruentCommunicator,
    /// An accepted cluster is smaller than the minimum box size and the
    /// configured policy treats that as fatal.
    #[error("box {bx} is smaller than min_box {min_box}")]
    MinBoxViolation {
        /// The undersized box.
        bx: IndexBox,
        /// The minimum size it violates.
        min_box: IntVector,
    },
    /// The tag level has no data at the requested slot.
    #[error("patch {patch} has no tag data at index {index}")]
    MissingTagData {
        /// Patch identifier as text.
        patch: String,
        /// Requested data index.
        index: usize,
    },
    /// Ranks disagreed about a collective call.
    #[error("collective call mismatch on rank {rank}: {reason}")]
    CollectiveMismatch {
        /// Rank that detected the mismatch.
        rank: usize,
        /// What differed.
        reason: String,
    },
    /// A peer failed and asked every rank to abandon the algorithm.
    #[error("aborted by rank {rank}: {reason}")]
    Aborted {
        /// Rank that raised the abort.
        rank: usize,
        /// The error on that rank.
        reason: String,
    },
    /// A message from a neighbour could not be received or decoded.
    #[error("communication error with rank {neighbor}: {reason}")]
    CommError {
        /// Peer rank.
        neighbor: usize,
        /// What went wrong.
        reason: String,
    },
    /// A message carried an unexpected wire version or kind.
    #[error("wire format error: {0}")]
    Wire(String),
    /// The load balancer cannot satisfy its size constraints.
    #[error("cannot balance box {bx}: {reason}")]
    Unbalanceable {
        /// The offending box.
        bx: IndexBox,
        /// What could not be satisfied.
        reason: String,
    },
    /// Writing a load report to its sink failed.
    #[error("failed to write load report: {0}")]
    Report(String),
    /// A connector or box level failed an invariant check.
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl MeshError {
    pub(crate) fn config(option: &'static str, reason: impl Into<String>) -> Self {
        MeshError::InvalidConfig {
            option,
            reason: reason.into(),
        }
    }
}
