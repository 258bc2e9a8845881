//! Asynchronous Berger-Rigoutsos clustering of tagged cells.
//!
//! [`BergerRigoutsos`] turns the cells of a tag level that carry a given tag
//! value into a set of disjoint boxes that cover every tagged cell, plus the
//! two connectors between the tag level and the new boxes. The dendrogram is
//! built cooperatively: each node is evaluated by the ranks whose patches
//! overlap it, and ranks advance many nodes at once as their messages arrive.
//!
//! ```no_run
//! use mesh_cluster::algs::communicator::NoComm;
//! use mesh_cluster::cluster::{BergerRigoutsos, BoxGeneratorStrategy, ClusterConfig};
//! use mesh_cluster::geometry::{BlockId, Dimension, IndexBox, IntVector};
//! use mesh_cluster::level::PatchLevel;
//!
//! # fn main() -> Result<(), mesh_cluster::mesh_error::MeshError> {
//! let dim = Dimension::new(2)?;
//! let mut level = PatchLevel::new(IntVector::one(dim), NoComm);
//! level.add_patch(IndexBox::from_bounds(&[0, 0], &[31, 31]), BlockId(0));
//! level.allocate(0, 0);
//! level.fill_region(0, &IndexBox::from_bounds(&[4, 4], &[11, 9]), 1);
//!
//! let mut br = BergerRigoutsos::<NoComm>::new(dim, ClusterConfig::default())?;
//! let out = br.find_boxes_containing_tags(
//!     &level,
//!     0,
//!     1,
//!     &IndexBox::from_bounds(&[0, 0], &[31, 31]),
//!     &IntVector::new(&[2, 2]),
//!     0.8,
//!     1.0,
//!     &IntVector::one(dim),
//!     BlockId(0),
//! )?;
//! assert_eq!(out.box_level.local_box_count(), 1);
//! # Ok(())
//! # }
//! ```

pub mod assembly;
pub mod combine;
pub mod config;
pub mod cut;
pub mod histogram;
pub mod node;
pub mod owner;
pub(crate) mod protocol;
pub(crate) mod run;

pub use assembly::ClusterOutput;
pub use config::{AdvanceMode, ClusterConfig, MinBoxCheck, OwnerMode};
pub use cut::LeafReason;
pub use node::{NodeId, NodeState};
pub use owner::{
    FewestOwned, LeastActive, MostOverlap, OwnerCandidate, OwnerPolicy, SingleOwner, policy_for,
};

use crate::algs::collective;
use crate::algs::communicator::{Communicator, tags};
use crate::cluster::combine::CombineParams;
use crate::cluster::cut::CutParams;
use crate::cluster::run::{ClusterRun, RunParams, Stashed};
use crate::debug_invariants::DebugInvariants;
use crate::geometry::{BlockId, Dimension, IndexBox, IntVector};
use crate::level::PatchLevel;
use crate::mesh_error::MeshError;
use crate::timers::TimerRegistry;
use std::sync::Arc;

/// A method that generates boxes covering the tagged cells of a level.
pub trait BoxGeneratorStrategy<C: Communicator> {
    /// Clusters the cells of `tag_level` whose value at `tag_data_index`
    /// equals `tag_value`, within `bound_box` of block `block_id`.
    ///
    /// Collective over the tag level's process group.
    #[allow(clippy::too_many_arguments)]
    fn find_boxes_containing_tags(
        &mut self,
        tag_level: &PatchLevel<C>,
        tag_data_index: usize,
        tag_value: i32,
        bound_box: &IndexBox,
        min_box: &IntVector,
        efficiency_tol: f64,
        combine_tol: f64,
        max_gcw: &IntVector,
        block_id: BlockId,
    ) -> Result<ClusterOutput, MeshError>;
}

/// Distributed asynchronous Berger-Rigoutsos clustering.
#[derive(Debug)]
pub struct BergerRigoutsos<C: Communicator> {
    dim: Dimension,
    config: ClusterConfig,
    policy: Arc<dyn OwnerPolicy>,
    mpi: Option<C>,
    timers: Arc<TimerRegistry>,
    epoch: u32,
    stash: Vec<Stashed>,
}

impl<C: Communicator> BergerRigoutsos<C> {
    /// Validates `config` and builds a clusterer for `dim`-dimensional levels.
    pub fn new(dim: Dimension, config: ClusterConfig) -> Result<Self, MeshError> {
        config.validate()?;
        if let Some(max) = &config.max_box_size {
            if max.dim() != dim {
                return Err(MeshError::DimensionMismatch {
                    expected: dim.get(),
                    got: max.dim().get(),
                });
            }
        }
        Ok(Self {
            dim,
            policy: policy_for(config.owner_mode),
            config,
            mpi: None,
            timers: Arc::new(TimerRegistry::new()),
            epoch: 0,
            stash: Vec::new(),
        })
    }

    /// Runs every later call on `comm`, which must be congruent with the tag
    /// level's communicator. Pass a duplicate to keep the traffic apart.
    pub fn set_mpi(&mut self, comm: C) {
        self.mpi = Some(comm);
    }

    /// Replaces the owner policy selected by `owner_mode`.
    pub fn set_owner_policy(&mut self, policy: Arc<dyn OwnerPolicy>) {
        self.policy = policy;
    }

    pub fn with_timers(mut self, timers: Arc<TimerRegistry>) -> Self {
        self.timers = timers;
        self
    }

    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn check_args(
        &self,
        tag_level: &PatchLevel<C>,
        bound_box: &IndexBox,
        min_box: &IntVector,
        efficiency_tol: f64,
        combine_tol: f64,
        max_gcw: &IntVector,
    ) -> Result<(), MeshError> {
        let expected = self.dim.get();
        for got in [
            tag_level.box_level().dim(),
            bound_box.dim(),
            min_box.dim(),
            max_gcw.dim(),
        ] {
            if got != self.dim {
                return Err(MeshError::DimensionMismatch {
                    expected,
                    got: got.get(),
                });
            }
        }
        if !(efficiency_tol > 0.0 && efficiency_tol <= 1.0) {
            return Err(MeshError::config(
                "efficiency_tol",
                format!("{efficiency_tol} is outside (0, 1]"),
            ));
        }
        if !(0.0..=1.0).contains(&combine_tol) {
            return Err(MeshError::config(
                "combine_tol",
                format!("{combine_tol} is outside [0, 1]"),
            ));
        }
        if min_box.min_component() < 1 {
            return Err(MeshError::config(
                "min_box",
                format!("{min_box} must be positive on every axis"),
            ));
        }
        if max_gcw.min_component() < 0 {
            return Err(MeshError::config(
                "max_gcw",
                format!("{max_gcw} must not be negative"),
            ));
        }
        // an oversized box must split into two pieces of at least min_box
        if let Some(max) = &self.config.max_box_size {
            if (0..expected).any(|a| i64::from(max[a]) < 2 * i64::from(min_box[a])) {
                return Err(MeshError::config(
                    "max_box_size",
                    format!("{max} is below twice min_box {min_box} on some axis"),
                ));
            }
        }
        Ok(())
    }
}

impl<C: Communicator> BoxGeneratorStrategy<C> for BergerRigoutsos<C> {
    fn find_boxes_containing_tags(
        &mut self,
        tag_level: &PatchLevel<C>,
        tag_data_index: usize,
        tag_value: i32,
        bound_box: &IndexBox,
        min_box: &IntVector,
        efficiency_tol: f64,
        combine_tol: f64,
        max_gcw: &IntVector,
        block_id: BlockId,
    ) -> Result<ClusterOutput, MeshError> {
        let timers = Arc::clone(&self.timers);
        let _t = timers.scoped("cluster::find_boxes_containing_tags");
        self.check_args(
            tag_level,
            bound_box,
            min_box,
            efficiency_tol,
            combine_tol,
            max_gcw,
        )?;

        let comm: &C = match &self.mpi {
            Some(c) if !c.is_congruent(tag_level.comm()) => {
                return Err(MeshError::IncongruentCommunicator);
            }
            Some(c) => c,
            None => tag_level.comm(),
        };
        self.epoch += 1;

        if self.config.barrier_before {
            let _b = timers.scoped("cluster::barrier_before");
            collective::barrier(comm, tags::BARRIER)?;
        }

        let max_box_size = self
            .config
            .max_box_size
            .unwrap_or_else(|| IntVector::max_value(self.dim));
        let params = RunParams {
            data_index: tag_data_index,
            tag_value,
            block: block_id,
            cut: CutParams {
                min_box: *min_box,
                max_box_size,
                efficiency_tol,
                max_lap_cut_from_center: self.config.max_lap_cut_from_center,
            },
            max_gcw: *max_gcw,
            min_box_check: self.config.check_min_box_size,
            mode: self.config.algo_advance_mode,
            log_node_history: self.config.log_node_history,
        };
        let combine = (combine_tol < 1.0).then_some(CombineParams {
            efficiency_tol,
            combine_tol,
            max_box_size,
        });

        let mut run = ClusterRun::new(
            comm,
            self.epoch,
            params,
            Arc::clone(&self.policy),
            tag_level,
            std::mem::take(&mut self.stash),
        );
        let result = run.execute(
            *bound_box,
            combine,
            self.config.sort_output_nodes,
            &timers,
        );
        let (assembly, stash) = run.into_parts();
        self.stash = stash;
        result?;

        if self.config.barrier_after {
            let _b = timers.scoped("cluster::barrier_after");
            collective::barrier(comm, tags::BARRIER)?;
        }

        if self.config.log_cluster_summary {
            let leaves = assembly.local_leaves();
            let tags: u64 = leaves.iter().map(|l| l.tags).sum();
            let cells: u64 = leaves.iter().map(|l| l.mapped.bx.size()).sum();
            log::info!(
                "rank {} owns {} boxes of {bound_box} covering {tags} tags in {cells} cells \
                 (efficiency {:.3})",
                comm.rank(),
                leaves.len(),
                if cells == 0 { 0.0 } else { tags as f64 / cells as f64 },
            );
        }
        let out = assembly.finish();
        if self.config.log_cluster {
            for mb in out.box_level.local_boxes() {
                log::info!("new box {mb}");
            }
        }
        out.box_level.debug_assert_invariants();
        out.tag_to_new.debug_assert_invariants();
        out.new_to_tag.debug_assert_invariants();
        Ok(out)
    }
}
