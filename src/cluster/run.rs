//! One invocation of the asynchronous clustering protocol on one rank.
//!
//! [`ClusterRun`] owns the dendrogram arena, routes incoming messages to the
//! nodes they address and advances the node state machines according to the
//! configured [`AdvanceMode`]. Messages for nodes this rank has not created
//! yet are parked until the node appears; traffic stamped with a later epoch
//! (a peer already in the next call) is stashed and replayed then.
//!
//! A rank that fails tells every peer through an abort notice, and every wait
//! loop here watches for those notices, so a failure anywhere makes the whole
//! group return an error instead of hanging.

use crate::algs::communicator::{Communicator, Wait, tags};
use crate::algs::wire::{Decoder, Encoder, WireLeaf, WireMappedBox};
use crate::cluster::assembly::OutputAssembly;
use crate::cluster::combine::{CombineParams, Leaf, combine_leaves, sorted_renumbering};
use crate::cluster::config::{AdvanceMode, MinBoxCheck};
use crate::cluster::cut::{self, CutParams, Decision};
use crate::cluster::histogram::local_histogram;
use crate::cluster::node::{ClusterNode, Dendrogram, NodeId, NodeState};
use crate::cluster::owner::{OwnerCandidate, OwnerPolicy};
use crate::cluster::protocol::{
    ChildSpec, DecisionMsg, Envelope, GroupReport, KIND_GATHER, Payload, decode_abort,
    encode_abort, encode_gather, gather_body, peek_header,
};
use crate::geometry::{BlockId, IndexBox, IntVector};
use crate::level::{MappedBox, Patch, PatchLevel};
use crate::mesh_error::MeshError;
use crate::timers::TimerRegistry;
use hashbrown::HashMap;
use std::cmp::Ordering;
use std::sync::Arc;

/// A message that arrived ahead of the call it belongs to.
#[derive(Debug)]
pub(crate) struct Stashed {
    pub tag: u16,
    pub src: usize,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug)]
pub(crate) struct RunParams {
    pub data_index: usize,
    pub tag_value: i32,
    pub block: BlockId,
    pub cut: CutParams,
    pub max_gcw: IntVector,
    pub min_box_check: MinBoxCheck,
    pub mode: AdvanceMode,
    pub log_node_history: bool,
}

pub(crate) struct ClusterRun<'a, C: Communicator> {
    comm: &'a C,
    epoch: u32,
    params: RunParams,
    policy: Arc<dyn OwnerPolicy>,
    patches: Vec<&'a Patch>,
    tree: Dendrogram,
    pending: HashMap<NodeId, Vec<(usize, Payload)>>,
    stash: Vec<Stashed>,
    sends: Vec<C::SendHandle>,
    out: OutputAssembly,
    next_seq: u32,
    gathers: u16,
}

fn comm_err(neighbor: usize, e: MeshError) -> MeshError {
    MeshError::CommError {
        neighbor,
        reason: e.to_string(),
    }
}

impl<'a, C: Communicator> ClusterRun<'a, C> {
    pub fn new(
        comm: &'a C,
        epoch: u32,
        params: RunParams,
        policy: Arc<dyn OwnerPolicy>,
        tag_level: &'a PatchLevel<C>,
        stash: Vec<Stashed>,
    ) -> Self {
        let patches = tag_level
            .patches()
            .filter(|p| p.block() == params.block)
            .collect();
        let out = OutputAssembly::new(tag_level.box_level(), params.max_gcw);
        Self {
            comm,
            epoch,
            params,
            policy,
            patches,
            tree: Dendrogram::new(),
            pending: HashMap::new(),
            stash,
            sends: Vec::new(),
            out,
            next_seq: 1,
            gathers: 0,
        }
    }

    /// Runs the protocol and the post-passes.
    pub fn execute(
        &mut self,
        bound: IndexBox,
        combine: Option<CombineParams>,
        sort: bool,
        timers: &TimerRegistry,
    ) -> Result<(), MeshError> {
        let result = self.execute_inner(bound, combine, sort, timers);
        if let Err(e) = &result {
            if !matches!(e, MeshError::Aborted { .. }) {
                self.broadcast_abort(e);
            }
        }
        for s in self.sends.drain(..) {
            let _ = s.wait();
        }
        result
    }

    fn execute_inner(
        &mut self,
        bound: IndexBox,
        combine: Option<CombineParams>,
        sort: bool,
        timers: &TimerRegistry,
    ) -> Result<(), MeshError> {
        {
            let _t = timers.scoped("cluster::run_protocol");
            self.run_protocol(bound)?;
        }
        if combine.is_none() && !sort {
            return Ok(());
        }
        let _t = timers.scoped("cluster::global_reductions");
        self.post_pass(combine, sort, timers)
    }

    /// Hands back the assembled output and any traffic for later calls.
    pub fn into_parts(self) -> (OutputAssembly, Vec<Stashed>) {
        (self.out, self.stash)
    }

    // --- advance loop ---

    fn run_protocol(&mut self, bound: IndexBox) -> Result<(), MeshError> {
        let group: Vec<usize> = (0..self.comm.size()).collect();
        self.tree
            .insert(ClusterNode::new(NodeId::ROOT, bound, None, 0, group, 0));
        self.replay_stash()?;

        loop {
            self.poll()?;
            if self.tree.all_terminal() {
                break;
            }
            let ready: Vec<usize> = self
                .tree
                .live()
                .into_iter()
                .filter(|&i| self.tree.get(i).is_ready())
                .collect();
            if ready.is_empty() {
                self.wait_for_traffic()?;
                continue;
            }
            match self.params.mode {
                AdvanceMode::AdvanceAny => self.advance(ready[0])?,
                AdvanceMode::AdvanceSome => {
                    for idx in ready {
                        self.advance(idx)?;
                    }
                }
                AdvanceMode::AdvanceAll => {
                    for idx in self.tree.live() {
                        self.advance(idx)?;
                    }
                    self.wait_until_all_ready()?;
                }
            }
        }

        if !self.pending.is_empty() {
            log::warn!(
                "clustering finished with messages for {} unknown nodes",
                self.pending.len()
            );
        }
        Ok(())
    }

    fn wait_for_traffic(&mut self) -> Result<(), MeshError> {
        while self.poll()? == 0 {
            std::thread::yield_now();
        }
        Ok(())
    }

    fn wait_until_all_ready(&mut self) -> Result<(), MeshError> {
        loop {
            let live = self.tree.live();
            if live.iter().all(|&i| self.tree.get(i).is_ready()) {
                return Ok(());
            }
            if self.poll()? == 0 {
                std::thread::yield_now();
            }
        }
    }

    fn advance(&mut self, idx: usize) -> Result<(), MeshError> {
        while self.step(idx)? {}
        Ok(())
    }

    /// Performs at most one state transition; false when the node must wait.
    fn step(&mut self, idx: usize) -> Result<bool, MeshError> {
        let me = self.comm.rank();
        let (state, owner, id, bx) = {
            let n = self.tree.get(idx);
            (n.state, n.owner, n.id, n.bx)
        };
        match state {
            NodeState::Built => {
                let local = local_histogram(
                    bx,
                    &self.patches,
                    self.params.data_index,
                    self.params.tag_value,
                )?;
                if owner == me {
                    let node = self.tree.get_mut(idx);
                    node.histogram = Some(local);
                    node.arrived = 1;
                    self.set_state(idx, NodeState::Histogrammed);
                } else {
                    self.send(owner, id, Payload::Histogram(local.flatten()));
                    self.set_state(idx, NodeState::AwaitDecision);
                }
                Ok(true)
            }
            NodeState::Histogrammed => {
                let node = self.tree.get_mut(idx);
                let mut progressed = false;
                while let Some((src, Payload::Histogram(counts))) =
                    node.take_message(|p| matches!(p, Payload::Histogram(_)))
                {
                    node.histogram
                        .as_mut()
                        .ok_or_else(|| MeshError::Invariant(format!("{id} lost its histogram")))?
                        .merge_flat(&counts)
                        .map_err(|e| comm_err(src, e))?;
                    node.arrived += 1;
                    progressed = true;
                }
                if node.arrived >= node.group.len() {
                    self.set_state(idx, NodeState::CutSearch);
                    return Ok(true);
                }
                Ok(progressed)
            }
            NodeState::CutSearch => {
                self.decide(idx)?;
                Ok(true)
            }
            NodeState::GatherEdges => {
                let mut progressed = false;
                loop {
                    let node = self.tree.get_mut(idx);
                    let Some((_, Payload::Edges(boxes))) =
                        node.take_message(|p| matches!(p, Payload::Edges(_)))
                    else {
                        break;
                    };
                    node.arrived += 1;
                    let (new_box, _) = node
                        .leaf
                        .ok_or_else(|| MeshError::Invariant(format!("{id} has no leaf box")))?;
                    self.out.link_new_box(new_box.id, boxes);
                    progressed = true;
                }
                let node = self.tree.get(idx);
                if node.arrived >= node.group.len() {
                    let reason = node.leaf.map(|(_, r)| r).ok_or_else(|| {
                        MeshError::Invariant(format!("{id} has no leaf box"))
                    })?;
                    self.set_state(idx, NodeState::Leaf(reason));
                    return Ok(true);
                }
                Ok(progressed)
            }
            NodeState::GatherGrouping => {
                let node = self.tree.get_mut(idx);
                let mut progressed = false;
                while let Some((src, Payload::Grouping(rep))) =
                    node.take_message(|p| matches!(p, Payload::Grouping(_)))
                {
                    node.reports.push((src, rep));
                    progressed = true;
                }
                if node.reports.len() >= node.group.len() {
                    self.form_children(idx)?;
                    return Ok(true);
                }
                Ok(progressed)
            }
            NodeState::AwaitDecision => {
                let node = self.tree.get_mut(idx);
                let Some((_, Payload::Decision(d))) =
                    node.take_message(|p| matches!(p, Payload::Decision(_)))
                else {
                    return Ok(false);
                };
                self.follow_decision(idx, d)?;
                Ok(true)
            }
            NodeState::AwaitChildGroups => {
                let node = self.tree.get_mut(idx);
                let Some((_, Payload::ChildGroups(children))) =
                    node.take_message(|p| matches!(p, Payload::ChildGroups(_)))
                else {
                    return Ok(false);
                };
                node.children = children.iter().map(|c| c.id).collect();
                let depth = node.depth + 1;
                for spec in children {
                    if spec.group.contains(&me) {
                        self.create_child(id, depth, spec);
                    }
                }
                self.set_state(idx, NodeState::Split);
                Ok(true)
            }
            NodeState::Split | NodeState::Leaf(_) | NodeState::Rejected => Ok(false),
        }
    }

    // --- owner actions ---

    fn decide(&mut self, idx: usize) -> Result<(), MeshError> {
        let me = self.comm.rank();
        let node = self.tree.get_mut(idx);
        let id = node.id;
        let hist = node.histogram.take().ok_or_else(|| {
            MeshError::Invariant(format!("{id} reached cut search without a histogram"))
        })?;
        match cut::decide(&hist, &self.params.cut) {
            Decision::Reject => {
                self.broadcast(idx, DecisionMsg::Reject);
                self.set_state(idx, NodeState::Rejected);
            }
            Decision::Accept { bx, tags, reason } => {
                self.check_min_box(&bx)?;
                let new_box = MappedBox::new(self.out.allocate_id(), bx, self.params.block);
                self.out.add_leaf(new_box, tags)?;
                let mine = self.tag_boxes_touching(&bx);
                self.out.link_tag_boxes(&new_box, &mine);
                self.out.link_new_box(new_box.id, mine);
                {
                    let node = self.tree.get_mut(idx);
                    node.bx = bx;
                    node.tags = tags;
                    node.leaf = Some((new_box, reason));
                    node.arrived = 1;
                }
                self.broadcast(
                    idx,
                    DecisionMsg::Accept {
                        bx,
                        tags,
                        reason,
                        new_box,
                    },
                );
                self.set_state(idx, NodeState::GatherEdges);
            }
            Decision::Split { bx, tags, cut } => {
                {
                    let node = self.tree.get_mut(idx);
                    node.bx = bx;
                    node.tags = tags;
                    node.split = Some((cut.left, cut.right));
                }
                self.broadcast(
                    idx,
                    DecisionMsg::Split {
                        bx,
                        tags,
                        left: cut.left,
                        right: cut.right,
                    },
                );
                let rep = self.group_report(&cut.left, &cut.right);
                self.tree.get_mut(idx).reports.push((me, rep));
                self.set_state(idx, NodeState::GatherGrouping);
            }
        }
        Ok(())
    }

    fn form_children(&mut self, idx: usize) -> Result<(), MeshError> {
        let me = self.comm.rank();
        let (parent, depth, group, split, mut reports) = {
            let node = self.tree.get_mut(idx);
            (
                node.id,
                node.depth + 1,
                node.group.clone(),
                node.split,
                std::mem::take(&mut node.reports),
            )
        };
        let (left, right) =
            split.ok_or_else(|| MeshError::Invariant(format!("{parent} split without pieces")))?;
        reports.sort_by_key(|(rank, _)| *rank);

        let left = self.child_spec(parent, &reports, 0, left)?;
        let right = self.child_spec(parent, &reports, 1, right)?;
        let children = [left, right];
        for &r in &group {
            if r != me {
                self.send(r, parent, Payload::ChildGroups(children.clone()));
            }
        }
        self.tree.get_mut(idx).children = children.iter().map(|c| c.id).collect();
        for spec in children {
            if spec.group.contains(&me) {
                self.create_child(parent, depth, spec);
            }
        }
        self.set_state(idx, NodeState::Split);
        Ok(())
    }

    fn child_spec(
        &mut self,
        parent: NodeId,
        reports: &[(usize, GroupReport)],
        k: usize,
        bx: IndexBox,
    ) -> Result<ChildSpec, MeshError> {
        let candidates: Vec<OwnerCandidate> = reports
            .iter()
            .map(|(rank, rep)| OwnerCandidate {
                rank: *rank,
                overlap: rep.overlap[k],
                owned: rep.owned,
                active: rep.active,
            })
            .collect();
        let owner = self.policy.select_owner(&candidates);
        if !candidates.iter().any(|c| c.rank == owner) {
            return Err(MeshError::Invariant(format!(
                "owner policy picked rank {owner} outside the group of {parent}"
            )));
        }
        let group = candidates
            .iter()
            .filter(|c| c.overlap > 0 || c.rank == owner)
            .map(|c| c.rank)
            .collect();
        let id = NodeId::new(self.comm.rank(), self.next_seq);
        self.next_seq += 1;
        Ok(ChildSpec {
            id,
            bx,
            owner,
            group,
        })
    }

    fn check_min_box(&self, bx: &IndexBox) -> Result<(), MeshError> {
        let min_box = self.params.cut.min_box;
        if !bx.shape().any_lt(&min_box) {
            return Ok(());
        }
        match self.params.min_box_check {
            MinBoxCheck::Ignore => Ok(()),
            MinBoxCheck::Warn => {
                log::warn!("accepted box {bx} is smaller than min_box {min_box}");
                Ok(())
            }
            MinBoxCheck::Error => Err(MeshError::MinBoxViolation { bx: *bx, min_box }),
        }
    }

    // --- member actions ---

    fn follow_decision(&mut self, idx: usize, d: DecisionMsg) -> Result<(), MeshError> {
        let (id, owner) = {
            let n = self.tree.get(idx);
            (n.id, n.owner)
        };
        match d {
            DecisionMsg::Reject => self.set_state(idx, NodeState::Rejected),
            DecisionMsg::Accept {
                bx,
                tags,
                reason,
                new_box,
            } => {
                let mine = self.tag_boxes_touching(&bx);
                self.out.link_tag_boxes(&new_box, &mine);
                self.send(owner, id, Payload::Edges(mine));
                let node = self.tree.get_mut(idx);
                node.bx = bx;
                node.tags = tags;
                node.leaf = Some((new_box, reason));
                self.set_state(idx, NodeState::Leaf(reason));
            }
            DecisionMsg::Split {
                bx,
                tags,
                left,
                right,
            } => {
                let rep = self.group_report(&left, &right);
                self.send(owner, id, Payload::Grouping(rep));
                let node = self.tree.get_mut(idx);
                node.bx = bx;
                node.tags = tags;
                node.split = Some((left, right));
                self.set_state(idx, NodeState::AwaitChildGroups);
            }
        }
        Ok(())
    }

    // --- helpers ---

    fn create_child(&mut self, parent: NodeId, depth: u32, spec: ChildSpec) {
        let node = ClusterNode::new(spec.id, spec.bx, Some(parent), spec.owner, spec.group, depth);
        let idx = self.tree.insert(node);
        if let Some(parked) = self.pending.remove(&spec.id) {
            self.tree.get_mut(idx).inbox.extend(parked);
        }
        if self.params.log_node_history {
            log::debug!("created {} {} under {parent}", spec.id, spec.bx);
        }
    }

    fn set_state(&mut self, idx: usize, state: NodeState) {
        let node = self.tree.get_mut(idx);
        if self.params.log_node_history {
            log::debug!(
                "{} {:?} -> {:?} box {} owner {} group {:?}",
                node.id,
                node.state,
                state,
                node.bx,
                node.owner,
                node.group
            );
        }
        node.state = state;
    }

    /// Local tag boxes whose ghost-grown box touches `bx`.
    fn tag_boxes_touching(&self, bx: &IndexBox) -> Vec<MappedBox> {
        self.patches
            .iter()
            .filter(|p| p.bx().grow(&self.params.max_gcw).intersects(bx))
            .map(|p| *p.mapped_box())
            .collect()
    }

    fn group_report(&self, left: &IndexBox, right: &IndexBox) -> GroupReport {
        let gcw = self.params.max_gcw;
        let overlap = [left, right].map(|child| {
            let grown = child.grow(&gcw);
            self.patches
                .iter()
                .map(|p| p.bx().intersect(&grown).size())
                .sum::<u64>()
        });
        let (owned, active) = self.tree.owner_load(self.comm.rank());
        GroupReport {
            overlap,
            owned,
            active,
        }
    }

    fn send(&mut self, peer: usize, node: NodeId, payload: Payload) {
        let bytes = Envelope {
            epoch: self.epoch,
            node,
            payload,
        }
        .encode(self.params.block);
        self.sends
            .push(self.comm.isend(peer, tags::CLUSTER.as_u16(), &bytes));
    }

    fn broadcast(&mut self, idx: usize, d: DecisionMsg) {
        let me = self.comm.rank();
        let (id, group) = {
            let n = self.tree.get(idx);
            (n.id, n.group.clone())
        };
        for r in group {
            if r != me {
                self.send(r, id, Payload::Decision(d.clone()));
            }
        }
    }

    // --- incoming traffic ---

    fn poll(&mut self) -> Result<usize, MeshError> {
        self.check_abort()?;
        let mut n = 0;
        while let Some((src, bytes)) = self.comm.try_recv_any(tags::CLUSTER.as_u16()) {
            self.accept(src, bytes)?;
            n += 1;
        }
        Ok(n)
    }

    fn accept(&mut self, src: usize, bytes: Vec<u8>) -> Result<(), MeshError> {
        let hdr = peek_header(&bytes).map_err(|e| comm_err(src, e))?;
        match hdr.epoch().cmp(&self.epoch) {
            Ordering::Less => Ok(()),
            Ordering::Greater => {
                self.stash.push(Stashed {
                    tag: tags::CLUSTER.as_u16(),
                    src,
                    bytes,
                });
                Ok(())
            }
            Ordering::Equal => {
                let env = Envelope::decode(&bytes).map_err(|e| comm_err(src, e))?;
                match self.tree.find(&env.node) {
                    Some(idx) => self.tree.get_mut(idx).inbox.push_back((src, env.payload)),
                    None => self
                        .pending
                        .entry(env.node)
                        .or_default()
                        .push((src, env.payload)),
                }
                Ok(())
            }
        }
    }

    fn check_abort(&mut self) -> Result<(), MeshError> {
        while let Some((src, bytes)) = self.comm.try_recv_any(tags::CLUSTER_ABORT.as_u16()) {
            let (epoch, reason) = decode_abort(&bytes).map_err(|e| comm_err(src, e))?;
            match epoch.cmp(&self.epoch) {
                Ordering::Equal => return Err(MeshError::Aborted { rank: src, reason }),
                Ordering::Greater => self.stash.push(Stashed {
                    tag: tags::CLUSTER_ABORT.as_u16(),
                    src,
                    bytes,
                }),
                Ordering::Less => {}
            }
        }
        Ok(())
    }

    /// Feeds stashed traffic of this epoch back in; gathers stay stashed.
    fn replay_stash(&mut self) -> Result<(), MeshError> {
        for s in std::mem::take(&mut self.stash) {
            let epoch = peek_header(&s.bytes).map(|h| h.epoch()).unwrap_or(0);
            if epoch < self.epoch {
                continue;
            }
            if epoch > self.epoch || s.tag == tags::CLUSTER_GATHER.as_u16() {
                self.stash.push(s);
            } else if s.tag == tags::CLUSTER_ABORT.as_u16() {
                let (_, reason) = decode_abort(&s.bytes)?;
                return Err(MeshError::Aborted {
                    rank: s.src,
                    reason,
                });
            } else {
                self.accept(s.src, s.bytes)?;
            }
        }
        Ok(())
    }

    fn broadcast_abort(&mut self, err: &MeshError) {
        let me = self.comm.rank();
        let bytes = encode_abort(self.epoch, &err.to_string());
        for r in 0..self.comm.size() {
            if r != me {
                self.sends
                    .push(self.comm.isend(r, tags::CLUSTER_ABORT.as_u16(), &bytes));
            }
        }
    }

    // --- post-passes ---

    /// All-gather that keeps watching for abort notices.
    fn gather(&mut self, body: &[u8]) -> Result<Vec<Vec<u8>>, MeshError> {
        let me = self.comm.rank();
        let n = self.comm.size();
        let seq = self.gathers;
        self.gathers += 1;
        let kind = KIND_GATHER + seq;
        let tag = tags::CLUSTER_GATHER.as_u16();

        let mut parts: Vec<Option<Vec<u8>>> = vec![None; n];
        parts[me] = Some(body.to_vec());
        let msg = encode_gather(self.epoch, seq, body);
        for r in 0..n {
            if r != me {
                self.sends.push(self.comm.isend(r, tag, &msg));
            }
        }

        let mut missing = n - 1;
        let mut early = std::mem::take(&mut self.stash);
        early.retain(|s| {
            let hit = s.tag == tag
                && peek_header(&s.bytes).is_ok_and(|h| h.epoch() == self.epoch && h.kind() == kind);
            if hit && parts[s.src].is_none() {
                parts[s.src] = Some(gather_body(&s.bytes).to_vec());
                missing -= 1;
            }
            !hit
        });
        self.stash = early;

        while missing > 0 {
            self.check_abort()?;
            let Some((src, bytes)) = self.comm.try_recv_any(tag) else {
                std::thread::yield_now();
                continue;
            };
            let hdr = peek_header(&bytes).map_err(|e| comm_err(src, e))?;
            if hdr.epoch() < self.epoch {
                continue;
            }
            if hdr.epoch() > self.epoch || hdr.kind() != kind {
                self.stash.push(Stashed { tag, src, bytes });
                continue;
            }
            if parts[src].is_some() {
                return Err(MeshError::CollectiveMismatch {
                    rank: me,
                    reason: format!("rank {src} contributed twice to gather {seq}"),
                });
            }
            parts[src] = Some(gather_body(&bytes).to_vec());
            missing -= 1;
        }
        Ok(parts.into_iter().map(Option::unwrap_or_default).collect())
    }

    fn gather_boxes(&mut self, local: &[MappedBox]) -> Result<Vec<MappedBox>, MeshError> {
        let wire: Vec<WireMappedBox> = local.iter().map(WireMappedBox::new).collect();
        let mut enc = Encoder::new();
        enc.put_counted(&wire);
        let mut all = Vec::new();
        for (src, part) in self.gather(&enc.finish())?.into_iter().enumerate() {
            let mut dec = Decoder::new(&part);
            for w in dec.take_counted::<WireMappedBox>().map_err(|e| comm_err(src, e))? {
                all.push(w.decode()?);
            }
        }
        Ok(all)
    }

    /// Gathers every leaf to every rank, then merges and renumbers.
    fn post_pass(
        &mut self,
        combine: Option<CombineParams>,
        sort: bool,
        timers: &TimerRegistry,
    ) -> Result<(), MeshError> {
        let wire: Vec<WireLeaf> = self
            .out
            .local_leaves()
            .iter()
            .map(|l| WireLeaf {
                mapped: WireMappedBox::new(&l.mapped),
                tags_le: l.tags.to_le(),
            })
            .collect();
        let mut enc = Encoder::new();
        enc.put_counted(&wire);
        let mut leaves = Vec::new();
        for (src, part) in self.gather(&enc.finish())?.into_iter().enumerate() {
            let mut dec = Decoder::new(&part);
            for w in dec.take_counted::<WireLeaf>().map_err(|e| comm_err(src, e))? {
                leaves.push(Leaf {
                    mapped: w.mapped.decode()?,
                    tags: u64::from_le(w.tags_le),
                });
            }
        }

        if let Some(params) = combine {
            let _t = timers.scoped("cluster::combine");
            let merges = combine_leaves(&mut leaves, &params);
            if !merges.is_empty() {
                let local_tags: Vec<MappedBox> =
                    self.patches.iter().map(|p| *p.mapped_box()).collect();
                let global_tags = self.gather_boxes(&local_tags)?;
                self.out.apply_merges(&merges, &global_tags, &local_tags)?;
            }
        }

        if sort {
            let _t = timers.scoped("cluster::sort_output_nodes");
            let map = sorted_renumbering(&leaves);
            self.out.renumber(&map)?;
        }
        Ok(())
    }
}
