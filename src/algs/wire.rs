//! Fixed, versioned, little-endian wire types for the clustering and
//! balancing protocols.
//!
//! Every message starts with a [`WireHdr`]; the rest is a sequence of the
//! `Pod` records below, written with an [`Encoder`] and read back with a
//! [`Decoder`]. Decoding copies (`pod_read_unaligned`), so receive buffers
//! need no particular alignment.

use crate::geometry::{BlockId, Dimension, IndexBox, IntVector, MAX_DIM};
use crate::level::{BoxId, MappedBox};
use crate::mesh_error::MeshError;
use bytemuck::{Pod, Zeroable};
use std::mem::{align_of, size_of};

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

// ===== Common records ======================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    /// Invocation counter; lets receivers drop traffic of abandoned runs.
    pub epoch_le: u32,
}

impl WireHdr {
    pub fn new(kind: u16, epoch: u32) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            epoch_le: epoch.to_le(),
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn epoch(&self) -> u32 {
        u32::from_le(self.epoch_le)
    }

    /// Rejects headers written by an incompatible peer.
    pub fn check_version(&self) -> Result<(), MeshError> {
        if self.version() == WIRE_VERSION {
            Ok(())
        } else {
            Err(MeshError::Wire(format!(
                "wire version {} (expected {WIRE_VERSION})",
                self.version()
            )))
        }
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32, // count of following records
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// Dendrogram node identity `(creator rank, sequence)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireNodeId {
    pub creator_le: u32,
    pub seq_le: u32,
}
impl WireNodeId {
    pub fn new(creator: usize, seq: u32) -> Self {
        Self {
            creator_le: (creator as u32).to_le(),
            seq_le: seq.to_le(),
        }
    }
    pub fn creator(&self) -> usize {
        u32::from_le(self.creator_le) as usize
    }
    pub fn seq(&self) -> u32 {
        u32::from_le(self.seq_le)
    }
}

/// An index box with its block; corners are padded to `MAX_DIM`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireBox {
    pub lo_le: [i32; MAX_DIM],
    pub hi_le: [i32; MAX_DIM],
    pub dim_le: u32,
    pub block_le: u32,
}
impl WireBox {
    pub fn new(bx: &IndexBox, block: BlockId) -> Self {
        Self {
            lo_le: bx.lower().raw().map(i32::to_le),
            hi_le: bx.upper().raw().map(i32::to_le),
            dim_le: (bx.dim().get() as u32).to_le(),
            block_le: block.0.to_le(),
        }
    }

    pub fn block(&self) -> BlockId {
        BlockId(u32::from_le(self.block_le))
    }

    pub fn index_box(&self) -> Result<IndexBox, MeshError> {
        let d = Dimension::new(u32::from_le(self.dim_le) as usize)
            .map_err(|e| MeshError::Wire(e.to_string()))?
            .get();
        let lo = self.lo_le.map(i32::from_le);
        let hi = self.hi_le.map(i32::from_le);
        Ok(IndexBox::new(
            IntVector::try_from_slice(&lo[..d])?,
            IntVector::try_from_slice(&hi[..d])?,
        ))
    }
}

/// A box carrying its global identity.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireMappedBox {
    pub owner_le: u32,
    pub local_le: u32,
    pub bx: WireBox,
}
impl WireMappedBox {
    pub fn new(mb: &MappedBox) -> Self {
        Self {
            owner_le: (mb.id.owner_rank as u32).to_le(),
            local_le: (mb.id.local_id as u32).to_le(),
            bx: WireBox::new(&mb.bx, mb.block),
        }
    }
    pub fn decode(&self) -> Result<MappedBox, MeshError> {
        Ok(MappedBox {
            id: BoxId::new(
                u32::from_le(self.owner_le) as usize,
                u32::from_le(self.local_le) as usize,
            ),
            bx: self.bx.index_box()?,
            block: self.bx.block(),
        })
    }
}

// ===== Clustering protocol ================================================

/// Overlap a member reports for each child of a split.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireGroupEntry {
    pub overlap_le: [u64; 2],
    pub owned_le: u32,
    pub active_le: u32,
}
impl WireGroupEntry {
    pub fn new(overlap: [u64; 2], owned: u32, active: u32) -> Self {
        Self {
            overlap_le: overlap.map(u64::to_le),
            owned_le: owned.to_le(),
            active_le: active.to_le(),
        }
    }
    pub fn overlap(&self) -> [u64; 2] {
        self.overlap_le.map(u64::from_le)
    }
    pub fn owned(&self) -> u32 {
        u32::from_le(self.owned_le)
    }
    pub fn active(&self) -> u32 {
        u32::from_le(self.active_le)
    }
}

/// One child of a split; followed on the wire by `n_members` rank words.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireChild {
    pub id: WireNodeId,
    pub owner_le: u32,
    pub n_members_le: u32,
    pub bx: WireBox,
}

/// Owner verdict for a node.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireDecision {
    /// 0 reject, 1 accept, 2 split
    pub code_le: u32,
    /// accept: 0 converged, 1 irreducible
    pub reason_le: u32,
    pub tags_le: u64,
    pub bx: WireBox,
    pub left: WireBox,
    pub right: WireBox,
    pub new_owner_le: u32,
    pub new_local_le: u32,
}

/// A finished leaf, exchanged by the clustering post-passes.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireLeaf {
    pub mapped: WireMappedBox,
    pub tags_le: u64,
}

// ===== Load balancing ======================================================

/// Collective call signature compared by every participant.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireCallHdr {
    pub kind_le: u16,
    pub version_le: u16,
    pub seq_le: u32,
    pub level_le: u32,
    pub group_size_le: u32,
    pub group_hash_le: u64,
}

/// A chopped piece with its workload and attractor preference.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WirePiece {
    /// Originating (pre-balance) box id and the piece geometry.
    pub mapped: WireMappedBox,
    pub load_bits_le: u64,
    pub pref_rank_le: u32,
    pub has_pref_le: u32,
    pub pref_overlap_le: u64,
}

// ===== Encoder / Decoder ===================================================

/// Append-only message builder.
#[derive(Default, Debug)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Pod>(&mut self, v: &T) -> &mut Self {
        self.buf.extend_from_slice(bytemuck::bytes_of(v));
        self
    }

    pub fn put_slice<T: Pod>(&mut self, v: &[T]) -> &mut Self {
        self.buf.extend_from_slice(bytemuck::cast_slice(v));
        self
    }

    /// A [`WireCount`] followed by the records.
    pub fn put_counted<T: Pod>(&mut self, v: &[T]) -> &mut Self {
        self.put(&WireCount::new(v.len()));
        self.put_slice(v)
    }

    /// Counted `u64` words, converted to little-endian.
    pub fn put_u64s(&mut self, v: &[u64]) -> &mut Self {
        let le: Vec<u64> = v.iter().map(|x| x.to_le()).collect();
        self.put_counted(&le)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received message.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn take<T: Pod>(&mut self) -> Result<T, MeshError> {
        let n = size_of::<T>();
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(MeshError::Wire(format!(
                "truncated message: need {n} bytes at offset {}, have {}",
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let v = bytemuck::pod_read_unaligned(&self.buf[self.pos..end]);
        self.pos = end;
        Ok(v)
    }

    pub fn take_vec<T: Pod>(&mut self, n: usize) -> Result<Vec<T>, MeshError> {
        (0..n).map(|_| self.take()).collect()
    }

    pub fn take_counted<T: Pod>(&mut self) -> Result<Vec<T>, MeshError> {
        let n = self.take::<WireCount>()?.get();
        self.take_vec(n)
    }

    pub fn take_u64s(&mut self) -> Result<Vec<u64>, MeshError> {
        Ok(self
            .take_counted::<u64>()?
            .into_iter()
            .map(u64::from_le)
            .collect())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Errors if trailing bytes were left unread.
    pub fn finish(self) -> Result<(), MeshError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(MeshError::Wire(format!("{n} trailing bytes"))),
        }
    }
}

// ===== Compile-time sanity checks =========================================

const _: () = {
    assert!(size_of::<WireHdr>() == 8);
    assert!(size_of::<WireCount>() == 4);
    assert!(size_of::<WireNodeId>() == 8);
    assert!(size_of::<WireBox>() == 32);
    assert!(size_of::<WireMappedBox>() == 40);
    assert!(size_of::<WireGroupEntry>() == 24);
    assert!(size_of::<WireChild>() == 48);
    assert!(size_of::<WireDecision>() == 120);
    assert!(size_of::<WireLeaf>() == 48);
    assert!(size_of::<WireCallHdr>() == 24);
    assert!(size_of::<WirePiece>() == 64);
    assert!(align_of::<WireDecision>() == 8);
};
static_assertions::assert_eq_size!(WirePiece, [u64; 8]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_box_survives_the_wire() {
        let mb = MappedBox {
            id: BoxId::new(3, 17),
            bx: IndexBox::from_bounds(&[-2, 4], &[9, 11]),
            block: BlockId(1),
        };
        let mut enc = Encoder::new();
        enc.put(&WireHdr::new(5, 9)).put_counted(&[WireMappedBox::new(&mb)]);
        let bytes = enc.finish();

        // decode from an odd offset to exercise unaligned reads
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let mut dec = Decoder::new(&shifted[1..]);
        let hdr: WireHdr = dec.take().unwrap();
        assert_eq!((hdr.kind(), hdr.epoch()), (5, 9));
        hdr.check_version().unwrap();
        let boxes: Vec<WireMappedBox> = dec.take_counted().unwrap();
        dec.finish().unwrap();
        assert_eq!(boxes[0].decode().unwrap(), mb);
    }

    #[test]
    fn truncated_and_trailing_bytes_are_errors() {
        let mut enc = Encoder::new();
        enc.put_u64s(&[1, 2, 3]);
        let bytes = enc.finish();
        assert!(Decoder::new(&bytes[..bytes.len() - 1]).take_u64s().is_err());

        let mut dec = Decoder::new(&bytes);
        assert_eq!(dec.take::<WireCount>().unwrap().get(), 3);
        assert!(matches!(dec.finish(), Err(MeshError::Wire(_))));
    }

    #[test]
    fn version_guard() {
        let mut hdr = WireHdr::new(1, 0);
        assert_eq!(hdr.version(), WIRE_VERSION);
        hdr.version_le = 99u16.to_le();
        assert!(hdr.check_version().is_err());
    }

    #[test]
    fn bad_dimension_is_rejected() {
        let mut wb = WireBox::new(&IndexBox::from_bounds(&[0], &[3]), BlockId(0));
        wb.dim_le = 7u32.to_le();
        assert!(wb.index_box().is_err());
    }
}
