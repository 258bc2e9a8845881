//! Chop-and-pack load balancer.
//!
//! Every rank chops its own boxes against the ideal per-rank load, the
//! pieces are gathered everywhere, and each rank runs the same deterministic
//! first-fit-decreasing packing. Ids are assigned per owner in canonical
//! piece order, so no further exchange is needed to agree on them. The two
//! anchor connectors are rebuilt from the gathered anchor boxes.

use crate::algs::collective;
use crate::algs::communicator::{Communicator, tags};
use crate::algs::wire::{WIRE_VERSION, WireCallHdr, WireMappedBox, WirePiece};
use crate::balance::binpack::{Piece, pack_pieces};
use crate::balance::chop::{BalanceConstraints, chop_box};
use crate::balance::report::gather_and_report_load_balance;
use crate::balance::workload::WorkloadSource;
use crate::balance::LoadBalanceStrategy;
use crate::debug_invariants::DebugInvariants;
use crate::geometry::IndexBox;
use crate::level::connector::gather_heads;
use crate::level::{BoxId, BoxLevel, Connector, MappedBox, RankGroup};
use crate::mesh_error::MeshError;
use crate::timers::TimerRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Marks the handshake record of a balance call.
const CALL_KIND: u16 = 0x4C42;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BalancerConfig {
    /// Levels whose workload comes from patch data; other levels count cells.
    pub workload_data_levels: Vec<usize>,
    /// Overload a rank may take to keep an attractor preference.
    pub flexible_load_tolerance: f64,
    /// Log a load report after every call.
    pub report_load_balance: bool,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            workload_data_levels: Vec::new(),
            flexible_load_tolerance: 0.05,
            report_load_balance: false,
        }
    }
}

impl BalancerConfig {
    pub fn validate(&self) -> Result<(), MeshError> {
        let tol = self.flexible_load_tolerance;
        if !tol.is_finite() || tol < 0.0 {
            return Err(MeshError::config(
                "flexible_load_tolerance",
                format!("{tol} must be a non-negative number"),
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct GreedyLoadBalancer {
    config: BalancerConfig,
    calls: u32,
    timers: Arc<TimerRegistry>,
}

impl GreedyLoadBalancer {
    pub fn new(config: BalancerConfig) -> Result<Self, MeshError> {
        config.validate()?;
        Ok(Self {
            config,
            calls: 0,
            timers: Arc::new(TimerRegistry::new()),
        })
    }

    pub fn with_timers(mut self, timers: Arc<TimerRegistry>) -> Self {
        self.timers = timers;
        self
    }

    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }
}

/// Every participant must enter the same call with the same group.
fn handshake<C: Communicator>(
    comm: &C,
    seq: u32,
    level_number: usize,
    group: &RankGroup,
) -> Result<(), MeshError> {
    let nprocs = comm.size();
    let mine = WireCallHdr {
        kind_le: CALL_KIND.to_le(),
        version_le: WIRE_VERSION.to_le(),
        seq_le: seq.to_le(),
        level_le: (level_number as u32).to_le(),
        group_size_le: (group.size(nprocs) as u32).to_le(),
        group_hash_le: group.fingerprint(nprocs).to_le(),
    };
    for (rank, part) in collective::all_gather(comm, tags::BALANCE, &[mine])?
        .iter()
        .enumerate()
    {
        match part.as_slice() {
            [h] if *h == mine => {}
            [h] => {
                return Err(MeshError::CollectiveMismatch {
                    rank: comm.rank(),
                    reason: format!(
                        "rank {rank} entered balance call {} on level {} with {} ranks, \
                         this rank entered call {seq} on level {level_number} with {} ranks",
                        u32::from_le(h.seq_le),
                        u32::from_le(h.level_le),
                        u32::from_le(h.group_size_le),
                        group.size(nprocs),
                    ),
                });
            }
            _ => {
                return Err(MeshError::CollectiveMismatch {
                    rank: comm.rank(),
                    reason: format!("rank {rank} sent {} handshake records", part.len()),
                });
            }
        }
    }
    Ok(())
}

/// Attractor owner with the largest overlap with `piece`; lowest rank on ties.
fn preferred_rank(attractor: &Connector, origin: BoxId, piece: &MappedBox) -> Option<(usize, u64)> {
    let mut overlap: BTreeMap<usize, u64> = BTreeMap::new();
    for head in attractor.neighbors(&origin)? {
        if head.block == piece.block {
            *overlap.entry(head.owner()).or_default() += piece.bx.intersect(&head.bx).size();
        }
    }
    overlap
        .into_iter()
        .filter(|&(_, n)| n > 0)
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
}

impl<C: Communicator> LoadBalanceStrategy<C> for GreedyLoadBalancer {
    fn load_balance_depends_on_patch_data(&self, level_number: usize) -> bool {
        self.config.workload_data_levels.contains(&level_number)
    }

    fn load_balance_box_level(
        &mut self,
        balance_level: &mut BoxLevel,
        balance_to_anchor: &mut Connector,
        anchor_to_balance: &mut Connector,
        workload: &dyn WorkloadSource,
        level_number: usize,
        attractor: Option<&Connector>,
        constraints: &BalanceConstraints,
        domain_level: &BoxLevel,
        rank_group: &RankGroup,
        comm: &C,
    ) -> Result<(), MeshError> {
        let timers = Arc::clone(&self.timers);
        let _t = timers.scoped("balance::load_balance_box_level");
        let me = comm.rank();
        let nprocs = comm.size();
        constraints.validate(balance_level.dim())?;
        let ranks = rank_group.ranks(nprocs);
        if ranks.is_empty() || ranks.iter().any(|&r| r >= nprocs) {
            return Err(MeshError::config(
                "rank_group",
                format!("{ranks:?} is not a non-empty subset of 0..{nprocs}"),
            ));
        }

        self.calls += 1;
        handshake(comm, self.calls, level_number, rank_group)?;

        let by_data = self.config.workload_data_levels.contains(&level_number);
        let cost = |b: &IndexBox| {
            if by_data {
                workload.box_workload(level_number, b)
            } else {
                b.size() as f64
            }
        };

        let local: Vec<MappedBox> = balance_level.local_boxes().copied().collect();
        let local_load: f64 = local.iter().map(|mb| cost(&mb.bx)).sum();
        let total: f64 = collective::all_gather_f64(comm, tags::BALANCE, local_load)?
            .iter()
            .sum();
        let ideal = total / ranks.len() as f64;

        // 1) chop local boxes
        let mut wire = Vec::new();
        {
            let _c = timers.scoped("balance::chop");
            for mb in &local {
                let domain: Vec<IndexBox> = domain_level
                    .boxes()
                    .filter(|d| d.block == mb.block)
                    .map(|d| d.bx)
                    .collect();
                for bx in chop_box(&mb.bx, ideal, constraints, &domain, &cost) {
                    let piece = MappedBox::new(mb.id, bx, mb.block);
                    let preferred = attractor.and_then(|a| preferred_rank(a, mb.id, &piece));
                    wire.push(WirePiece {
                        mapped: WireMappedBox::new(&piece),
                        load_bits_le: cost(&bx).to_bits().to_le(),
                        pref_rank_le: (preferred.map_or(0, |p| p.0) as u32).to_le(),
                        has_pref_le: u32::from(preferred.is_some()).to_le(),
                        pref_overlap_le: preferred.map_or(0, |p| p.1).to_le(),
                    });
                }
            }
        }

        // 2) gather and pack everywhere
        let mut pieces = Vec::new();
        for part in collective::all_gather(comm, tags::BALANCE, &wire)? {
            for w in part {
                let mb = w.mapped.decode()?;
                pieces.push(Piece {
                    origin: mb.id,
                    bx: mb.bx,
                    block: mb.block,
                    load: f64::from_bits(u64::from_le(w.load_bits_le)),
                    preferred: (u32::from_le(w.has_pref_le) != 0).then(|| {
                        (
                            u32::from_le(w.pref_rank_le) as usize,
                            u64::from_le(w.pref_overlap_le),
                        )
                    }),
                });
            }
        }
        let packing = {
            let _p = timers.scoped("balance::pack");
            pack_pieces(&pieces, &ranks, self.config.flexible_load_tolerance)?
        };
        log::debug!(
            "balanced {} pieces over {} ranks, imbalance {:.3}",
            pieces.len(),
            ranks.len(),
            packing.imbalance()
        );

        // 3) ids per owner in canonical order
        let mut by_owner: BTreeMap<usize, Vec<&Piece>> = BTreeMap::new();
        for (p, &owner) in pieces.iter().zip(&packing.owner) {
            by_owner.entry(owner).or_default().push(p);
        }
        let mut new_boxes = Vec::with_capacity(pieces.len());
        for (owner, mut list) in by_owner {
            list.sort_by_key(|p| (p.block, p.bx, p.origin));
            for (k, p) in list.into_iter().enumerate() {
                new_boxes.push(MappedBox::new(BoxId::new(owner, k), p.bx, p.block));
            }
        }

        // 4) rebuild the level and both connectors
        let anchors = gather_heads(balance_to_anchor, comm, tags::BALANCE)?;
        let mut level = balance_level.empty_like();
        let mut b2a = Connector::new(balance_to_anchor.width());
        for nb in new_boxes.iter().filter(|nb| nb.owner() == me) {
            level.insert(*nb)?;
            b2a.add_base(nb.id);
            for a in anchors.values() {
                if a.block == nb.block && b2a.overlaps(&nb.bx, &a.bx) {
                    b2a.add_edge(nb.id, *a);
                }
            }
        }
        let mut a2b = Connector::new(anchor_to_balance.width());
        for base in anchor_to_balance.bases().copied() {
            a2b.add_base(base);
            let Some(a) = anchors.get(&base) else {
                continue;
            };
            for nb in &new_boxes {
                if nb.block == a.block && a2b.overlaps(&a.bx, &nb.bx) {
                    a2b.add_edge(base, *nb);
                }
            }
        }

        level.debug_assert_invariants();
        b2a.debug_assert_invariants();
        a2b.debug_assert_invariants();
        *balance_level = level;
        *balance_to_anchor = b2a;
        *anchor_to_balance = a2b;

        if self.config.report_load_balance {
            let mine: f64 = balance_level.local_boxes().map(|mb| cost(&mb.bx)).sum();
            let mut text = Vec::new();
            gather_and_report_load_balance(mine, balance_level.local_box_count(), comm, &mut text)?;
            log::info!("{}", String::from_utf8_lossy(&text).trim_end());
        }
        Ok(())
    }
}
