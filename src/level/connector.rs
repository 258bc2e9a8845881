//! Overlap relationships between two box levels.
//!
//! A [`Connector`] from a base level to a head level maps each *local* base
//! box to the head boxes (local or remote) that overlap it once the base box
//! is grown by the connector width. Every local base box has an entry, even
//! when it has no neighbors.

use crate::algs::collective::all_gather;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::WireMappedBox;
use crate::geometry::{IndexBox, IntVector};
use crate::level::box_level::{BoxId, BoxLevel, MappedBox};
use crate::mesh_error::MeshError;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq)]
pub struct Connector {
    width: IntVector,
    relationships: BTreeMap<BoxId, BTreeSet<MappedBox>>,
}

impl Connector {
    pub fn new(width: IntVector) -> Self {
        Self {
            width,
            relationships: BTreeMap::new(),
        }
    }

    /// Connector with an empty entry for every local box of `base`.
    pub fn with_bases(width: IntVector, base: &BoxLevel) -> Self {
        let mut c = Self::new(width);
        for mb in base.local_boxes() {
            c.add_base(mb.id);
        }
        c
    }

    #[inline]
    pub fn width(&self) -> IntVector {
        self.width
    }

    /// True when `base` grown by the width touches `head`.
    pub fn overlaps(&self, base: &IndexBox, head: &IndexBox) -> bool {
        base.grow(&self.width).intersects(head)
    }

    pub fn add_base(&mut self, base: BoxId) {
        self.relationships.entry(base).or_default();
    }

    pub fn add_edge(&mut self, base: BoxId, head: MappedBox) {
        self.relationships.entry(base).or_default().insert(head);
    }

    pub fn remove_base(&mut self, base: &BoxId) -> Option<BTreeSet<MappedBox>> {
        self.relationships.remove(base)
    }

    /// Drops every edge pointing at `head`.
    pub fn remove_neighbor(&mut self, head: &BoxId) {
        for heads in self.relationships.values_mut() {
            heads.retain(|mb| mb.id != *head);
        }
    }

    /// Rewrites head identities through `map`; unmapped heads are kept.
    pub fn rename_neighbors(&mut self, map: &BTreeMap<BoxId, BoxId>) {
        for heads in self.relationships.values_mut() {
            *heads = heads
                .iter()
                .map(|mb| MappedBox {
                    id: map.get(&mb.id).copied().unwrap_or(mb.id),
                    ..*mb
                })
                .collect();
        }
    }

    /// Rewrites base identities through `map`; unmapped bases are kept.
    pub fn rename_bases(&mut self, map: &BTreeMap<BoxId, BoxId>) {
        let old = std::mem::take(&mut self.relationships);
        self.relationships = old
            .into_iter()
            .map(|(id, heads)| (map.get(&id).copied().unwrap_or(id), heads))
            .collect();
    }

    pub fn neighbors(&self, base: &BoxId) -> Option<&BTreeSet<MappedBox>> {
        self.relationships.get(base)
    }

    pub fn bases(&self) -> impl Iterator<Item = &BoxId> {
        self.relationships.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BoxId, &BTreeSet<MappedBox>)> {
        self.relationships.iter()
    }

    pub fn base_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn edge_count(&self) -> usize {
        self.relationships.values().map(BTreeSet::len).sum()
    }

    /// `(base, head)` id pairs of every local edge.
    pub fn edge_pairs(&self) -> BTreeSet<(BoxId, BoxId)> {
        self.relationships
            .iter()
            .flat_map(|(b, heads)| heads.iter().map(move |h| (*b, h.id)))
            .collect()
    }

    /// Local check: `other` holds exactly the reversed edges of `self`.
    /// Only meaningful when both connectors are complete on this rank.
    pub fn is_transpose_of(&self, other: &Connector) -> bool {
        let reversed: BTreeSet<_> = other.edge_pairs().into_iter().map(|(a, b)| (b, a)).collect();
        self.edge_pairs() == reversed
    }

    /// Collective check that `forward` and `reverse` are transposes once
    /// every rank's edges are combined.
    pub fn check_transpose<C: Communicator>(
        forward: &Connector,
        reverse: &Connector,
        comm: &C,
        tag: CommTag,
    ) -> Result<(), MeshError> {
        let fwd = gather_pairs(forward, comm, tag)?;
        let rev: BTreeSet<_> = gather_pairs(reverse, comm, tag)?
            .into_iter()
            .map(|(a, b)| (b, a))
            .collect();
        if fwd == rev {
            return Ok(());
        }
        let missing = fwd.symmetric_difference(&rev).next();
        Err(MeshError::Invariant(format!(
            "connectors are not transposes; first differing edge {missing:?}"
        )))
    }
}

fn gather_pairs<C: Communicator>(
    c: &Connector,
    comm: &C,
    tag: CommTag,
) -> Result<BTreeSet<(BoxId, BoxId)>, MeshError> {
    let flat: Vec<u32> = c
        .edge_pairs()
        .into_iter()
        .flat_map(|(a, b)| {
            [a.owner_rank, a.local_id, b.owner_rank, b.local_id].map(|x| (x as u32).to_le())
        })
        .collect();
    let mut out = BTreeSet::new();
    for part in all_gather(comm, tag, &flat)? {
        for q in part.chunks_exact(4) {
            let [a0, a1, b0, b1] = [q[0], q[1], q[2], q[3]].map(|x| u32::from_le(x) as usize);
            out.insert((BoxId::new(a0, a1), BoxId::new(b0, b1)));
        }
    }
    Ok(out)
}

/// Collective: every head box of `c` across all ranks, deduplicated.
pub(crate) fn gather_heads<C: Communicator>(
    c: &Connector,
    comm: &C,
    tag: CommTag,
) -> Result<BTreeMap<BoxId, MappedBox>, MeshError> {
    let heads: BTreeSet<MappedBox> = c.iter().flat_map(|(_, h)| h.iter().copied()).collect();
    let wire: Vec<WireMappedBox> = heads.iter().map(WireMappedBox::new).collect();
    let mut out = BTreeMap::new();
    for part in all_gather(comm, tag, &wire)? {
        for w in part {
            let mb = w.decode()?;
            out.insert(mb.id, mb);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BlockId;

    fn mb(owner: usize, local: usize, lo: &[i32], hi: &[i32]) -> MappedBox {
        MappedBox::new(BoxId::new(owner, local), IndexBox::from_bounds(lo, hi), BlockId(0))
    }

    #[test]
    fn width_controls_overlap() {
        let c0 = Connector::new(IntVector::new(&[0, 0]));
        let c1 = Connector::new(IntVector::new(&[1, 1]));
        let a = IndexBox::from_bounds(&[0, 0], &[3, 3]);
        let touching = IndexBox::from_bounds(&[4, 0], &[5, 3]);
        assert!(!c0.overlaps(&a, &touching));
        assert!(c1.overlaps(&a, &touching));
    }

    #[test]
    fn transpose_and_renaming() {
        let a = mb(0, 0, &[0, 0], &[3, 3]);
        let b = mb(0, 1, &[2, 2], &[5, 5]);
        let w = IntVector::new(&[0, 0]);
        let mut fwd = Connector::new(w);
        let mut rev = Connector::new(w);
        fwd.add_edge(a.id, b);
        rev.add_edge(b.id, a);
        assert!(fwd.is_transpose_of(&rev));

        let renamed = BoxId::new(0, 9);
        let map = BTreeMap::from([(b.id, renamed)]);
        fwd.rename_neighbors(&map);
        assert!(!fwd.is_transpose_of(&rev));
        rev.rename_bases(&map);
        assert!(fwd.is_transpose_of(&rev));

        fwd.remove_neighbor(&renamed);
        assert_eq!(fwd.edge_count(), 0);
        assert_eq!(fwd.base_count(), 1);
    }
}
