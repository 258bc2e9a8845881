//! Patches carrying cell-centered data over a box level.

use crate::algs::communicator::Communicator;
use crate::geometry::{BlockId, IndexBox, IntVector};
use crate::level::box_level::{BoxId, BoxLevel, MappedBox};
use crate::mesh_error::MeshError;
use std::collections::BTreeMap;

/// Dense cell-centered array over a box (axis-0 fastest).
#[derive(Clone, Debug, PartialEq)]
pub struct CellData<T> {
    bx: IndexBox,
    values: Vec<T>,
}

impl<T: Copy> CellData<T> {
    /// Every cell of `bx` set to `fill`.
    pub fn filled(bx: IndexBox, fill: T) -> Self {
        Self {
            bx,
            values: vec![fill; bx.size() as usize],
        }
    }

    /// Wraps existing values; the length must match the box size.
    pub fn from_values(bx: IndexBox, values: Vec<T>) -> Result<Self, MeshError> {
        if values.len() as u64 != bx.size() {
            return Err(MeshError::Invariant(format!(
                "cell data for {bx} needs {} values, got {}",
                bx.size(),
                values.len()
            )));
        }
        Ok(Self { bx, values })
    }

    #[inline]
    pub fn bx(&self) -> &IndexBox {
        &self.bx
    }

    pub fn get(&self, cell: &IntVector) -> Option<T> {
        self.bx.offset_of(cell).map(|i| self.values[i])
    }

    /// Sets one cell; returns false if `cell` lies outside the box.
    pub fn set(&mut self, cell: &IntVector, value: T) -> bool {
        match self.bx.offset_of(cell) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    /// Sets every cell of `region ∩ box`.
    pub fn fill_region(&mut self, region: &IndexBox, value: T) {
        for cell in self.bx.intersect(region).cells() {
            self.set(&cell, value);
        }
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }
}

/// A box of the level plus its data slots, addressed by integer index.
#[derive(Clone, Debug)]
pub struct Patch {
    mapped: MappedBox,
    data: BTreeMap<usize, CellData<i32>>,
}

impl Patch {
    pub fn new(mapped: MappedBox) -> Self {
        Self {
            mapped,
            data: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn mapped_box(&self) -> &MappedBox {
        &self.mapped
    }

    #[inline]
    pub fn id(&self) -> BoxId {
        self.mapped.id
    }

    #[inline]
    pub fn bx(&self) -> &IndexBox {
        &self.mapped.bx
    }

    #[inline]
    pub fn block(&self) -> BlockId {
        self.mapped.block
    }

    pub fn data(&self, index: usize) -> Option<&CellData<i32>> {
        self.data.get(&index)
    }

    pub fn data_mut(&mut self, index: usize) -> Option<&mut CellData<i32>> {
        self.data.get_mut(&index)
    }

    /// Looks up a data slot, reporting a missing one as an error.
    pub fn require_data(&self, index: usize) -> Result<&CellData<i32>, MeshError> {
        self.data.get(&index).ok_or_else(|| MeshError::MissingTagData {
            patch: self.mapped.id.to_string(),
            index,
        })
    }

    pub fn set_data(&mut self, index: usize, data: CellData<i32>) {
        self.data.insert(index, data);
    }
}

/// The local patches of one level and the communicator spanning its ranks.
#[derive(Debug)]
pub struct PatchLevel<C> {
    box_level: BoxLevel,
    patches: BTreeMap<BoxId, Patch>,
    comm: C,
}

impl<C: Communicator> PatchLevel<C> {
    pub fn new(ratio: IntVector, comm: C) -> Self {
        Self {
            box_level: BoxLevel::for_comm(ratio, &comm),
            patches: BTreeMap::new(),
            comm,
        }
    }

    /// Adds a local patch covering `bx` and returns its id.
    pub fn add_patch(&mut self, bx: IndexBox, block: BlockId) -> BoxId {
        let mb = self.box_level.add_box(bx, block);
        self.patches.insert(mb.id, Patch::new(mb));
        mb.id
    }

    /// Gives every patch a data slot `index` filled with `fill`.
    pub fn allocate(&mut self, index: usize, fill: i32) {
        for p in self.patches.values_mut() {
            let data = CellData::filled(*p.bx(), fill);
            p.set_data(index, data);
        }
    }

    /// Sets `value` at slot `index` on every cell of `region` held locally.
    pub fn fill_region(&mut self, index: usize, region: &IndexBox, value: i32) {
        for p in self.patches.values_mut() {
            if let Some(d) = p.data_mut(index) {
                d.fill_region(region, value);
            }
        }
    }

    pub fn patch(&self, id: &BoxId) -> Option<&Patch> {
        self.patches.get(id)
    }

    pub fn patch_mut(&mut self, id: &BoxId) -> Option<&mut Patch> {
        self.patches.get_mut(id)
    }

    pub fn patches(&self) -> impl Iterator<Item = &Patch> {
        self.patches.values()
    }

    #[inline]
    pub fn box_level(&self) -> &BoxLevel {
        &self.box_level
    }

    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    #[test]
    fn fill_and_lookup() {
        let mut level = PatchLevel::new(IntVector::new(&[1, 1]), NoComm);
        let a = level.add_patch(IndexBox::from_bounds(&[0, 0], &[3, 3]), BlockId(0));
        let b = level.add_patch(IndexBox::from_bounds(&[4, 0], &[7, 3]), BlockId(0));
        level.allocate(0, 0);
        level.fill_region(0, &IndexBox::from_bounds(&[3, 1], &[4, 1]), 1);

        let pa = level.patch(&a).unwrap().require_data(0).unwrap();
        let pb = level.patch(&b).unwrap().require_data(0).unwrap();
        assert_eq!(pa.get(&IntVector::new(&[3, 1])), Some(1));
        assert_eq!(pb.get(&IntVector::new(&[4, 1])), Some(1));
        assert_eq!(pa.values().iter().sum::<i32>(), 1);
        assert!(matches!(
            level.patch(&a).unwrap().require_data(3),
            Err(MeshError::MissingTagData { index: 3, .. })
        ));
    }

    #[test]
    fn from_values_checks_length() {
        let bx = IndexBox::from_bounds(&[0], &[3]);
        assert!(CellData::from_values(bx, vec![0; 3]).is_err());
        assert!(CellData::from_values(bx, vec![0; 4]).is_ok());
    }
}
