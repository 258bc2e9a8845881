//! Load balancing of box levels.
//!
//! A [`LoadBalanceStrategy`] redistributes the boxes of a level over a group
//! of ranks. The output covers exactly the input cells, and the connectors to
//! the anchor level are rebuilt as exact transposes of each other.

pub mod binpack;
pub mod chop;
pub mod greedy;
pub mod report;
pub mod workload;

pub use binpack::{Packing, Piece, pack_pieces};
pub use chop::{BalanceConstraints, chop_box};
pub use greedy::{BalancerConfig, GreedyLoadBalancer};
pub use report::{
    LoadReport, RankAndLoad, gather_and_report_load_balance,
    gather_and_report_load_balance_sequence, sort_ascending, sort_descending,
};
pub use workload::{CellWorkload, UniformWorkload, WorkloadSource};

use crate::algs::communicator::Communicator;
use crate::level::{BoxLevel, Connector, RankGroup};
use crate::mesh_error::MeshError;

pub trait LoadBalanceStrategy<C: Communicator> {
    /// True when a change of patch data alone (same boxes) on level
    /// `level_number` calls for rebalancing.
    fn load_balance_depends_on_patch_data(&self, level_number: usize) -> bool;

    /// Rebalances `balance_level` over `rank_group`.
    ///
    /// `balance_to_anchor` and `anchor_to_balance` connect the level to an
    /// anchor level and are rewritten for the new boxes. `attractor`, when
    /// given, connects the current boxes to a level whose owners the new
    /// boxes should prefer. `domain_level` holds the physical domain used for
    /// the `bad_interval` constraint.
    ///
    /// Collective over `comm`; every rank must make the same call.
    #[allow(clippy::too_many_arguments)]
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
    ) -> Result<(), MeshError>;
}
