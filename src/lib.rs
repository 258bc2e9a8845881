#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-cluster
//!
//! mesh-cluster generates and distributes the boxes of a structured adaptive
//! mesh refinement (AMR) level. It provides:
//!
//! - an asynchronous, distributed Berger-Rigoutsos clusterer that covers the
//!   tagged cells of a level with efficient, disjoint boxes
//!   ([`cluster::BergerRigoutsos`]);
//! - a load-balance contract and a chop-and-pack balancer
//!   ([`balance::GreedyLoadBalancer`]);
//! - gathered load reports for diagnostics.
//!
//! Both algorithms are collective over a [`Communicator`]. The in-process
//! [`ThreadComm`](algs::communicator::ThreadComm) backend runs one thread per
//! rank; the `mpi-support` feature adds an MPI backend.
//!
//! ## Features
//! - `rayon`: parallel histogram accumulation over local patches.
//! - `mpi-support`: [`MpiComm`](algs::communicator::MpiComm).
//! - `check-invariants`: run [`DebugInvariants`] checks in release builds.
//!
//! ## Determinism
//!
//! Box ids depend on message arrival order unless
//! `ClusterConfig::sort_output_nodes` is set; the balancer is deterministic
//! for identical inputs and rank counts.

pub mod algs;
pub mod balance;
pub mod cluster;
pub mod debug_invariants;
pub mod geometry;
pub mod level;
pub mod mesh_error;
pub mod timers;

pub use algs::communicator::Communicator;
pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{Communicator, NoComm, ThreadComm};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::balance::{
        BalanceConstraints, BalancerConfig, GreedyLoadBalancer, LoadBalanceStrategy,
        WorkloadSource, gather_and_report_load_balance,
    };
    pub use crate::cluster::{
        BergerRigoutsos, BoxGeneratorStrategy, ClusterConfig, ClusterOutput,
    };
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::geometry::{BlockId, Dimension, IndexBox, IntVector};
    pub use crate::level::{BoxId, BoxLevel, Connector, MappedBox, PatchLevel, RankGroup};
    pub use crate::mesh_error::MeshError;
    pub use crate::timers::TimerRegistry;
}
