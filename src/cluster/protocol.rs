//! Messages exchanged between the members of a dendrogram node's group.
//!
//! Layout: [`WireHdr`] (kind, epoch), [`WireNodeId`], then a kind-specific
//! body. Abort notices and post-pass gathers carry only the header.

use crate::algs::wire::{
    Decoder, Encoder, WireBox, WireChild, WireDecision, WireGroupEntry, WireHdr, WireMappedBox,
    WireNodeId,
};
use crate::cluster::cut::LeafReason;
use crate::cluster::node::NodeId;
use crate::geometry::{BlockId, IndexBox};
use crate::level::MappedBox;
use crate::mesh_error::MeshError;
use bytemuck::Zeroable;

pub(crate) const KIND_HISTOGRAM: u16 = 1;
pub(crate) const KIND_DECISION: u16 = 2;
pub(crate) const KIND_EDGES: u16 = 3;
pub(crate) const KIND_GROUPING: u16 = 4;
pub(crate) const KIND_CHILD_GROUPS: u16 = 5;
pub(crate) const KIND_ABORT: u16 = 6;
/// Post-pass gathers use `KIND_GATHER + k` for the k-th gather of a call.
pub(crate) const KIND_GATHER: u16 = 16;

/// Owner verdict, as seen by the members.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum DecisionMsg {
    Reject,
    Accept {
        bx: IndexBox,
        tags: u64,
        reason: LeafReason,
        new_box: MappedBox,
    },
    Split {
        bx: IndexBox,
        tags: u64,
        left: IndexBox,
        right: IndexBox,
    },
}

/// A member's grouping criteria for the two children of a split.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct GroupReport {
    pub overlap: [u64; 2],
    pub owned: u32,
    pub active: u32,
}

/// A child node as announced by the parent's owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ChildSpec {
    pub id: NodeId,
    pub bx: IndexBox,
    pub owner: usize,
    pub group: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Payload {
    Histogram(Vec<u64>),
    Decision(DecisionMsg),
    Edges(Vec<MappedBox>),
    Grouping(GroupReport),
    ChildGroups([ChildSpec; 2]),
}

impl Payload {
    fn kind(&self) -> u16 {
        match self {
            Payload::Histogram(_) => KIND_HISTOGRAM,
            Payload::Decision(_) => KIND_DECISION,
            Payload::Edges(_) => KIND_EDGES,
            Payload::Grouping(_) => KIND_GROUPING,
            Payload::ChildGroups(_) => KIND_CHILD_GROUPS,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Envelope {
    pub epoch: u32,
    pub node: NodeId,
    pub payload: Payload,
}

fn leaf_code(reason: LeafReason) -> u32 {
    match reason {
        LeafReason::Converged => 0,
        LeafReason::Irreducible => 1,
    }
}

impl Envelope {
    pub fn encode(&self, block: BlockId) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.put(&WireHdr::new(self.payload.kind(), self.epoch))
            .put(&WireNodeId::new(self.node.creator, self.node.seq));
        match &self.payload {
            Payload::Histogram(counts) => {
                enc.put_u64s(counts);
            }
            Payload::Decision(d) => {
                let mut w = WireDecision::zeroed();
                match d {
                    DecisionMsg::Reject => {}
                    DecisionMsg::Accept {
                        bx,
                        tags,
                        reason,
                        new_box,
                    } => {
                        w.code_le = 1u32.to_le();
                        w.reason_le = leaf_code(*reason).to_le();
                        w.tags_le = tags.to_le();
                        w.bx = WireBox::new(bx, block);
                        w.new_owner_le = (new_box.id.owner_rank as u32).to_le();
                        w.new_local_le = (new_box.id.local_id as u32).to_le();
                    }
                    DecisionMsg::Split {
                        bx,
                        tags,
                        left,
                        right,
                    } => {
                        w.code_le = 2u32.to_le();
                        w.tags_le = tags.to_le();
                        w.bx = WireBox::new(bx, block);
                        w.left = WireBox::new(left, block);
                        w.right = WireBox::new(right, block);
                    }
                }
                enc.put(&w);
            }
            Payload::Edges(boxes) => {
                let w: Vec<WireMappedBox> = boxes.iter().map(WireMappedBox::new).collect();
                enc.put_counted(&w);
            }
            Payload::Grouping(r) => {
                enc.put(&WireGroupEntry::new(r.overlap, r.owned, r.active));
            }
            Payload::ChildGroups(children) => {
                for c in children {
                    enc.put(&WireChild {
                        id: WireNodeId::new(c.id.creator, c.id.seq),
                        owner_le: (c.owner as u32).to_le(),
                        n_members_le: (c.group.len() as u32).to_le(),
                        bx: WireBox::new(&c.bx, block),
                    });
                    let members: Vec<u32> = c.group.iter().map(|&r| (r as u32).to_le()).collect();
                    enc.put_slice(&members);
                }
            }
        }
        enc.finish()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MeshError> {
        let mut dec = Decoder::new(bytes);
        let hdr: WireHdr = dec.take()?;
        hdr.check_version()?;
        let id: WireNodeId = dec.take()?;
        let node = NodeId::new(id.creator(), id.seq());
        let payload = match hdr.kind() {
            KIND_HISTOGRAM => Payload::Histogram(dec.take_u64s()?),
            KIND_DECISION => {
                let w: WireDecision = dec.take()?;
                let tags = u64::from_le(w.tags_le);
                Payload::Decision(match u32::from_le(w.code_le) {
                    0 => DecisionMsg::Reject,
                    1 => {
                        let bx = w.bx.index_box()?;
                        let reason = match u32::from_le(w.reason_le) {
                            0 => LeafReason::Converged,
                            _ => LeafReason::Irreducible,
                        };
                        let new_box = MappedBox::new(
                            crate::level::BoxId::new(
                                u32::from_le(w.new_owner_le) as usize,
                                u32::from_le(w.new_local_le) as usize,
                            ),
                            bx,
                            w.bx.block(),
                        );
                        DecisionMsg::Accept {
                            bx,
                            tags,
                            reason,
                            new_box,
                        }
                    }
                    2 => DecisionMsg::Split {
                        bx: w.bx.index_box()?,
                        tags,
                        left: w.left.index_box()?,
                        right: w.right.index_box()?,
                    },
                    code => return Err(MeshError::Wire(format!("unknown decision code {code}"))),
                })
            }
            KIND_EDGES => Payload::Edges(
                dec.take_counted::<WireMappedBox>()?
                    .iter()
                    .map(WireMappedBox::decode)
                    .collect::<Result<_, _>>()?,
            ),
            KIND_GROUPING => {
                let w: WireGroupEntry = dec.take()?;
                Payload::Grouping(GroupReport {
                    overlap: w.overlap(),
                    owned: w.owned(),
                    active: w.active(),
                })
            }
            KIND_CHILD_GROUPS => {
                let mut read_child = || -> Result<ChildSpec, MeshError> {
                    let w: WireChild = dec.take()?;
                    let n = u32::from_le(w.n_members_le) as usize;
                    let group = dec
                        .take_vec::<u32>(n)?
                        .into_iter()
                        .map(|r| u32::from_le(r) as usize)
                        .collect();
                    Ok(ChildSpec {
                        id: NodeId::new(w.id.creator(), w.id.seq()),
                        bx: w.bx.index_box()?,
                        owner: u32::from_le(w.owner_le) as usize,
                        group,
                    })
                };
                let left = read_child()?;
                let right = read_child()?;
                Payload::ChildGroups([left, right])
            }
            kind => return Err(MeshError::Wire(format!("unknown node message kind {kind}"))),
        };
        dec.finish()?;
        Ok(Envelope {
            epoch: hdr.epoch(),
            node,
            payload,
        })
    }
}

/// Header-only peek used to sort out stale or early traffic.
pub(crate) fn peek_header(bytes: &[u8]) -> Result<WireHdr, MeshError> {
    let hdr: WireHdr = Decoder::new(bytes).take()?;
    hdr.check_version()?;
    Ok(hdr)
}

pub(crate) fn encode_abort(epoch: u32, reason: &str) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.put(&WireHdr::new(KIND_ABORT, epoch))
        .put_counted(reason.as_bytes());
    enc.finish()
}

pub(crate) fn decode_abort(bytes: &[u8]) -> Result<(u32, String), MeshError> {
    let mut dec = Decoder::new(bytes);
    let hdr: WireHdr = dec.take()?;
    hdr.check_version()?;
    let text = dec.take_counted::<u8>()?;
    Ok((hdr.epoch(), String::from_utf8_lossy(&text).into_owned()))
}

/// Header followed by an opaque body.
pub(crate) fn encode_gather(epoch: u32, seq: u16, body: &[u8]) -> Vec<u8> {
    let mut enc = Encoder::new();
    enc.put(&WireHdr::new(KIND_GATHER + seq, epoch)).put_slice(body);
    enc.finish()
}

pub(crate) fn gather_body(bytes: &[u8]) -> &[u8] {
    &bytes[std::mem::size_of::<WireHdr>()..]
}
