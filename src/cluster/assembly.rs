//! Incremental construction of the clustering output.
//!
//! Edges are recorded as leaves are finalized: members link their local tag
//! boxes to the new box (`tag_to_new`), the owner links the new box back to
//! every tag box reported by the group (`new_to_tag`). The post-passes then
//! rewrite both connectors for merged and renumbered boxes.

use crate::cluster::combine::{Leaf, Merge};
use crate::geometry::IntVector;
use crate::level::{BoxId, BoxLevel, Connector, MappedBox};
use crate::mesh_error::MeshError;
use std::collections::BTreeMap;

/// Output of one clustering call.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterOutput {
    /// The new boxes, locally owned ones only.
    pub box_level: BoxLevel,
    /// Local tag boxes to overlapping new boxes.
    pub tag_to_new: Connector,
    /// Local new boxes to overlapping tag boxes.
    pub new_to_tag: Connector,
}

#[derive(Debug)]
pub(crate) struct OutputAssembly {
    level: BoxLevel,
    tag_to_new: Connector,
    new_to_tag: Connector,
    leaf_tags: BTreeMap<BoxId, u64>,
    next_local: usize,
}

impl OutputAssembly {
    /// Empty output; `tag_to_new` gets an entry for every local tag box.
    pub fn new(tag_level: &BoxLevel, width: IntVector) -> Self {
        Self {
            level: tag_level.empty_like(),
            tag_to_new: Connector::with_bases(width, tag_level),
            new_to_tag: Connector::new(width),
            leaf_tags: BTreeMap::new(),
            next_local: 0,
        }
    }

    pub fn width(&self) -> IntVector {
        self.tag_to_new.width()
    }

    pub fn allocate_id(&mut self) -> BoxId {
        let id = BoxId::new(self.level.rank(), self.next_local);
        self.next_local += 1;
        id
    }

    /// Registers a box owned by this rank.
    pub fn add_leaf(&mut self, new_box: MappedBox, tags: u64) -> Result<(), MeshError> {
        self.level.insert(new_box)?;
        self.new_to_tag.add_base(new_box.id);
        self.leaf_tags.insert(new_box.id, tags);
        Ok(())
    }

    /// Member side: local tag boxes that see `new_box`.
    pub fn link_tag_boxes(&mut self, new_box: &MappedBox, tag_boxes: &[MappedBox]) {
        for t in tag_boxes {
            self.tag_to_new.add_edge(t.id, *new_box);
        }
    }

    /// Owner side: tag boxes (from any rank) that see `new_id`.
    pub fn link_new_box(&mut self, new_id: BoxId, tag_boxes: impl IntoIterator<Item = MappedBox>) {
        for t in tag_boxes {
            self.new_to_tag.add_edge(new_id, t);
        }
    }

    pub fn local_leaves(&self) -> Vec<Leaf> {
        self.level
            .local_boxes()
            .map(|mb| Leaf {
                mapped: *mb,
                tags: self.leaf_tags.get(&mb.id).copied().unwrap_or(0),
            })
            .collect()
    }

    /// Replays `merges`; edges of merged boxes are recomputed from the
    /// global tag boxes.
    pub fn apply_merges(
        &mut self,
        merges: &[Merge],
        global_tag_boxes: &[MappedBox],
        local_tag_boxes: &[MappedBox],
    ) -> Result<(), MeshError> {
        let me = self.level.rank();
        let width = self.width();
        for m in merges {
            for gone in &m.absorbed {
                self.level.remove(gone);
                self.new_to_tag.remove_base(gone);
                self.leaf_tags.remove(gone);
                self.tag_to_new.remove_neighbor(gone);
            }
            let result = m.result;
            if result.owner() == me {
                self.add_leaf(result, m.tags)?;
                let seen = global_tag_boxes
                    .iter()
                    .filter(|t| t.block == result.block && t.bx.grow(&width).intersects(&result.bx))
                    .copied();
                self.link_new_box(result.id, seen);
            }
            for t in local_tag_boxes {
                if t.block == result.block && t.bx.grow(&width).intersects(&result.bx) {
                    self.tag_to_new.add_edge(t.id, result);
                }
            }
        }
        Ok(())
    }

    /// Renames every new box through `map`.
    pub fn renumber(&mut self, map: &BTreeMap<BoxId, BoxId>) -> Result<(), MeshError> {
        let mut level = self.level.empty_like();
        for mb in self.level.boxes() {
            let id = map.get(&mb.id).copied().unwrap_or(mb.id);
            level.insert(MappedBox { id, ..*mb })?;
        }
        self.level = level;
        self.new_to_tag.rename_bases(map);
        self.tag_to_new.rename_neighbors(map);
        self.leaf_tags = std::mem::take(&mut self.leaf_tags)
            .into_iter()
            .map(|(id, t)| (map.get(&id).copied().unwrap_or(id), t))
            .collect();
        Ok(())
    }

    pub fn finish(self) -> ClusterOutput {
        ClusterOutput {
            box_level: self.level,
            tag_to_new: self.tag_to_new,
            new_to_tag: self.new_to_tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{BlockId, IndexBox};

    #[test]
    fn merge_rewrites_both_directions() {
        let mut tags = BoxLevel::new(IntVector::new(&[1, 1]), 0, 1);
        let t = tags.add_box(IndexBox::from_bounds(&[0, 0], &[9, 3]), BlockId(0));
        let mut out = OutputAssembly::new(&tags, IntVector::new(&[1, 1]));

        let box_of = |lo: &[i32], hi: &[i32]| IndexBox::from_bounds(lo, hi);
        let a = MappedBox::new(out.allocate_id(), box_of(&[0, 0], &[3, 3]), BlockId(0));
        let b = MappedBox::new(out.allocate_id(), box_of(&[4, 0], &[9, 3]), BlockId(0));
        for (mb, n) in [(a, 16), (b, 24)] {
            out.add_leaf(mb, n).unwrap();
            out.link_tag_boxes(&mb, &[t]);
            out.link_new_box(mb.id, [t]);
        }
        let merged = MappedBox::new(BoxId::new(0, 2), box_of(&[0, 0], &[9, 3]), BlockId(0));
        out.apply_merges(
            &[Merge {
                result: merged,
                tags: 40,
                absorbed: [a.id, b.id],
            }],
            &[t],
            &[t],
        )
        .unwrap();
        out.renumber(&BTreeMap::from([(merged.id, BoxId::new(0, 0))])).unwrap();

        let res = out.finish();
        assert_eq!(res.box_level.local_box_count(), 1);
        assert_eq!(res.tag_to_new.edge_count(), 1);
        assert_eq!(res.new_to_tag.edge_count(), 1);
        assert!(res.tag_to_new.is_transpose_of(&res.new_to_tag));
        let only = res.box_level.local_boxes().next().unwrap();
        assert_eq!(only.id, BoxId::new(0, 0));
    }
}
