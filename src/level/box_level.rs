//! Distributed sets of boxes.
//!
//! A [`BoxLevel`] is one rank's view of a level: the boxes it owns, plus any
//! remote boxes it has been told about (after [`BoxLevel::globalize`]). Every
//! box carries a [`BoxId`] that is unique across ranks.

use crate::algs::collective::all_gather;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::WireMappedBox;
use crate::geometry::{BlockId, Dimension, IndexBox, IntVector};
use crate::mesh_error::MeshError;
use std::collections::BTreeMap;
use std::fmt;

/// Globally unique box identity: owning rank plus a rank-local number.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxId {
    pub owner_rank: usize,
    pub local_id: usize,
}

impl BoxId {
    pub const fn new(owner_rank: usize, local_id: usize) -> Self {
        Self {
            owner_rank,
            local_id,
        }
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner_rank, self.local_id)
    }
}

/// A box with its identity and block. Orders by id first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MappedBox {
    pub id: BoxId,
    pub bx: IndexBox,
    pub block: BlockId,
}

impl MappedBox {
    pub fn new(id: BoxId, bx: IndexBox, block: BlockId) -> Self {
        Self { id, bx, block }
    }

    #[inline]
    pub fn owner(&self) -> usize {
        self.id.owner_rank
    }
}

impl fmt::Display for MappedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.id, self.bx, self.block)
    }
}

/// One rank's view of a distributed box level.
#[derive(Clone, Debug, PartialEq)]
pub struct BoxLevel {
    dim: Dimension,
    ratio: IntVector,
    rank: usize,
    nprocs: usize,
    boxes: BTreeMap<BoxId, MappedBox>,
}

impl BoxLevel {
    /// Empty level for `rank` of `nprocs`, refined by `ratio` from level 0.
    pub fn new(ratio: IntVector, rank: usize, nprocs: usize) -> Self {
        Self {
            dim: ratio.dim(),
            ratio,
            rank,
            nprocs,
            boxes: BTreeMap::new(),
        }
    }

    /// Empty level whose process group is that of `comm`.
    pub fn for_comm<C: Communicator>(ratio: IntVector, comm: &C) -> Self {
        Self::new(ratio, comm.rank(), comm.size())
    }

    /// Same shape and process group, no boxes.
    pub fn empty_like(&self) -> Self {
        Self::new(self.ratio, self.rank, self.nprocs)
    }

    #[inline]
    pub fn dim(&self) -> Dimension {
        self.dim
    }
    #[inline]
    pub fn ratio(&self) -> IntVector {
        self.ratio
    }
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }
    #[inline]
    pub fn nprocs(&self) -> usize {
        self.nprocs
    }

    /// Next unused local id on this rank.
    pub fn next_local_id(&self) -> usize {
        self.boxes
            .range(BoxId::new(self.rank, 0)..=BoxId::new(self.rank, usize::MAX))
            .next_back()
            .map_or(0, |(id, _)| id.local_id + 1)
    }

    /// Adds a locally owned box with a fresh id.
    pub fn add_box(&mut self, bx: IndexBox, block: BlockId) -> MappedBox {
        let id = BoxId::new(self.rank, self.next_local_id());
        let mb = MappedBox::new(id, bx, block);
        self.boxes.insert(id, mb);
        mb
    }

    /// Inserts a box under its existing id (local or remote).
    pub fn insert(&mut self, mb: MappedBox) -> Result<(), MeshError> {
        if mb.bx.dim() != self.dim {
            return Err(MeshError::DimensionMismatch {
                expected: self.dim.get(),
                got: mb.bx.dim().get(),
            });
        }
        self.boxes.insert(mb.id, mb);
        Ok(())
    }

    pub fn remove(&mut self, id: &BoxId) -> Option<MappedBox> {
        self.boxes.remove(id)
    }

    pub fn get(&self, id: &BoxId) -> Option<&MappedBox> {
        self.boxes.get(id)
    }

    /// Every known box, ordered by id.
    pub fn boxes(&self) -> impl Iterator<Item = &MappedBox> {
        self.boxes.values()
    }

    /// Boxes owned by this rank, ordered by id.
    pub fn local_boxes(&self) -> impl Iterator<Item = &MappedBox> {
        self.boxes
            .range(BoxId::new(self.rank, 0)..=BoxId::new(self.rank, usize::MAX))
            .map(|(_, mb)| mb)
    }

    pub fn local_box_count(&self) -> usize {
        self.local_boxes().count()
    }

    pub fn local_cell_count(&self) -> u64 {
        self.local_boxes().map(|mb| mb.bx.size()).sum()
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Collective: a copy of this level that also knows every remote box.
    pub fn globalize<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
    ) -> Result<BoxLevel, MeshError> {
        let local: Vec<WireMappedBox> = self.local_boxes().map(WireMappedBox::new).collect();
        let mut global = self.empty_like();
        for part in all_gather(comm, tag, &local)? {
            for w in part {
                global.insert(w.decode()?)?;
            }
        }
        Ok(global)
    }
}
