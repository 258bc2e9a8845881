//! Owner selection for new dendrogram nodes.
//!
//! When a node splits, every member of its group reports how much of its tag
//! data overlaps each child. The node owner hands those reports to an
//! [`OwnerPolicy`], which must pick exactly one rank and must do so
//! deterministically.

use crate::cluster::config::OwnerMode;
use std::cmp::Reverse;
use std::fmt::Debug;
use std::sync::Arc;

/// One member's report for a child box.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OwnerCandidate {
    pub rank: usize,
    /// Tagged-level cells overlapping the child (grown by the ghost width).
    pub overlap: u64,
    /// Nodes this rank has owned in the current call.
    pub owned: u32,
    /// Nodes this rank owns that are still live.
    pub active: u32,
}

pub trait OwnerPolicy: Send + Sync + Debug {
    /// Picks the owner among `candidates` (never empty, sorted by rank).
    fn select_owner(&self, candidates: &[OwnerCandidate]) -> usize;
}

/// Largest overlap; ties to the lowest rank.
#[derive(Debug, Default, Clone, Copy)]
pub struct MostOverlap;

/// Lowest rank of the parent group.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleOwner;

/// Fewest owned nodes among overlapping ranks.
#[derive(Debug, Default, Clone, Copy)]
pub struct FewestOwned;

/// Fewest live owned nodes among overlapping ranks.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastActive;

impl OwnerPolicy for MostOverlap {
    fn select_owner(&self, candidates: &[OwnerCandidate]) -> usize {
        candidates
            .iter()
            .min_by_key(|c| (Reverse(c.overlap), c.rank))
            .map_or(0, |c| c.rank)
    }
}

impl OwnerPolicy for SingleOwner {
    fn select_owner(&self, candidates: &[OwnerCandidate]) -> usize {
        candidates.iter().map(|c| c.rank).min().unwrap_or(0)
    }
}

fn least_by(candidates: &[OwnerCandidate], load: impl Fn(&OwnerCandidate) -> u32) -> usize {
    let overlapping = candidates.iter().any(|c| c.overlap > 0);
    candidates
        .iter()
        .filter(|c| !overlapping || c.overlap > 0)
        .min_by_key(|c| (load(c), Reverse(c.overlap), c.rank))
        .map_or(0, |c| c.rank)
}

impl OwnerPolicy for FewestOwned {
    fn select_owner(&self, candidates: &[OwnerCandidate]) -> usize {
        least_by(candidates, |c| c.owned)
    }
}

impl OwnerPolicy for LeastActive {
    fn select_owner(&self, candidates: &[OwnerCandidate]) -> usize {
        least_by(candidates, |c| c.active)
    }
}

/// The built-in policy for a configured mode.
pub fn policy_for(mode: OwnerMode) -> Arc<dyn OwnerPolicy> {
    match mode {
        OwnerMode::MostOverlap => Arc::new(MostOverlap),
        OwnerMode::SingleOwner => Arc::new(SingleOwner),
        OwnerMode::FewestOwned => Arc::new(FewestOwned),
        OwnerMode::LeastActive => Arc::new(LeastActive),
    }
}
