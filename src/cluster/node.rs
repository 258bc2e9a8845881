//! Dendrogram nodes and the per-call arena that owns them.
//!
//! A rank only holds the nodes whose group it belongs to. Nodes are created
//! `Built`, walk through the protocol states and end in exactly one terminal
//! state; terminal nodes are never reactivated.
//!
//! ```text
//!  owner:   Built -> Histogrammed -> CutSearch -+-> Rejected
//!                                               +-> GatherEdges -> Leaf
//!                                               +-> GatherGrouping -> Split
//!  member:  Built -> AwaitDecision -+-> Rejected
//!                                   +-> Leaf
//!                                   +-> AwaitChildGroups -> Split
//! ```

use crate::cluster::cut::LeafReason;
use crate::cluster::histogram::Histogram;
use crate::cluster::protocol::{GroupReport, Payload};
use crate::geometry::IndexBox;
use crate::level::MappedBox;
use hashbrown::HashMap;
use std::collections::VecDeque;
use std::fmt;

/// Identity of a node: the rank that created it and a per-rank counter.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub creator: usize,
    pub seq: u32,
}

impl NodeId {
    /// The root is created by every rank under this id.
    pub const ROOT: NodeId = NodeId { creator: 0, seq: 0 };

    pub const fn new(creator: usize, seq: u32) -> Self {
        Self { creator, seq }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}.{}", self.creator, self.seq)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Local histogram not computed yet.
    Built,
    /// Owner: waiting for the members' histograms.
    Histogrammed,
    /// Owner: summed histogram complete, decision pending.
    CutSearch,
    /// Member: waiting for the owner's decision.
    AwaitDecision,
    /// Owner of an accepted node: waiting for the members' edges.
    GatherEdges,
    /// Owner of a split node: waiting for grouping reports.
    GatherGrouping,
    /// Member of a split node: waiting for the child groups.
    AwaitChildGroups,
    Split,
    Leaf(LeafReason),
    Rejected,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Split | NodeState::Leaf(_) | NodeState::Rejected
        )
    }
}

#[derive(Debug)]
pub struct ClusterNode {
    pub id: NodeId,
    pub bx: IndexBox,
    /// Siblings share their parent, which identifies their selection group.
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub owner: usize,
    /// Member ranks, ascending; always contains `owner`.
    pub group: Vec<usize>,
    pub depth: u32,
    pub state: NodeState,
    pub tags: u64,
    pub(crate) histogram: Option<Histogram>,
    pub(crate) inbox: VecDeque<(usize, Payload)>,
    /// Histograms or edge lists folded in so far, own contribution included.
    pub(crate) arrived: usize,
    pub(crate) reports: Vec<(usize, GroupReport)>,
    pub(crate) split: Option<(IndexBox, IndexBox)>,
    pub(crate) leaf: Option<(MappedBox, LeafReason)>,
}

impl ClusterNode {
    pub fn new(
        id: NodeId,
        bx: IndexBox,
        parent: Option<NodeId>,
        owner: usize,
        group: Vec<usize>,
        depth: u32,
    ) -> Self {
        Self {
            id,
            bx,
            parent,
            children: Vec::new(),
            owner,
            group,
            depth,
            state: NodeState::Built,
            tags: 0,
            histogram: None,
            inbox: VecDeque::new(),
            arrived: 0,
            reports: Vec::new(),
            split: None,
            leaf: None,
        }
    }

    fn count_inbox(&self, pred: impl Fn(&Payload) -> bool) -> usize {
        self.inbox.iter().filter(|(_, p)| pred(p)).count()
    }

    /// True when the node can make progress without new messages.
    pub fn is_ready(&self) -> bool {
        let n = self.group.len();
        match self.state {
            NodeState::Built | NodeState::CutSearch => true,
            NodeState::Histogrammed => {
                self.arrived + self.count_inbox(|p| matches!(p, Payload::Histogram(_))) >= n
            }
            NodeState::GatherEdges => {
                self.arrived + self.count_inbox(|p| matches!(p, Payload::Edges(_))) >= n
            }
            NodeState::GatherGrouping => {
                self.reports.len() + self.count_inbox(|p| matches!(p, Payload::Grouping(_))) >= n
            }
            NodeState::AwaitDecision => self.count_inbox(|p| matches!(p, Payload::Decision(_))) > 0,
            NodeState::AwaitChildGroups => {
                self.count_inbox(|p| matches!(p, Payload::ChildGroups(_))) > 0
            }
            NodeState::Split | NodeState::Leaf(_) | NodeState::Rejected => false,
        }
    }

    /// Removes and returns the first inbox entry matching `pred`.
    pub(crate) fn take_message(
        &mut self,
        pred: impl Fn(&Payload) -> bool,
    ) -> Option<(usize, Payload)> {
        let pos = self.inbox.iter().position(|(_, p)| pred(p))?;
        self.inbox.remove(pos)
    }
}

/// Arena of the nodes known to this rank, indexed by [`NodeId`].
#[derive(Debug, Default)]
pub struct Dendrogram {
    nodes: Vec<ClusterNode>,
    index: HashMap<NodeId, usize>,
}

impl Dendrogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: ClusterNode) -> usize {
        let idx = self.nodes.len();
        self.index.insert(node.id, idx);
        self.nodes.push(node);
        idx
    }

    pub fn find(&self, id: &NodeId) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn get(&self, idx: usize) -> &ClusterNode {
        &self.nodes[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut ClusterNode {
        &mut self.nodes[idx]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.iter()
    }

    /// Indices of non-terminal nodes, in creation order.
    pub fn live(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| !self.nodes[i].state.is_terminal())
            .collect()
    }

    pub fn all_terminal(&self) -> bool {
        self.nodes.iter().all(|n| n.state.is_terminal())
    }

    /// `(owned, still live)` node counts for `rank`.
    pub fn owner_load(&self, rank: usize) -> (u32, u32) {
        self.nodes
            .iter()
            .filter(|n| n.owner == rank)
            .fold((0, 0), |(o, a), n| {
                (o + 1, a + u32::from(!n.state.is_terminal()))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_follows_inbox() {
        let bx = IndexBox::from_bounds(&[0], &[9]);
        let mut tree = Dendrogram::new();
        let idx = tree.insert(ClusterNode::new(NodeId::ROOT, bx, None, 0, vec![0, 1, 2], 0));
        let node = tree.get_mut(idx);
        node.state = NodeState::Histogrammed;
        node.arrived = 1;
        assert!(!node.is_ready());
        node.inbox.push_back((1, Payload::Histogram(vec![0; 10])));
        node.inbox.push_back((2, Payload::Histogram(vec![0; 10])));
        assert!(node.is_ready());

        let got = node.take_message(|p| matches!(p, Payload::Histogram(_)));
        assert_eq!(got, Some((1, Payload::Histogram(vec![0; 10]))));
        assert_eq!(node.inbox.len(), 1);
        assert_eq!(tree.owner_load(0), (1, 1));
        assert_eq!(tree.live(), vec![idx]);
    }
}
