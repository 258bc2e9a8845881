//! Clustering configuration.
//!
//! Loaded from any serde format; enum values use the upper-case spellings
//! (`"ADVANCE_SOME"`, `"MOST_OVERLAP"`, `"WARN"`). Unknown keys are rejected.
//!
//! ```
//! use mesh_cluster::cluster::{AdvanceMode, ClusterConfig};
//! let cfg = ClusterConfig::default();
//! assert_eq!(cfg.algo_advance_mode, AdvanceMode::AdvanceSome);
//! assert!(cfg.validate().is_ok());
//! ```

use crate::geometry::IntVector;
use crate::mesh_error::MeshError;
use serde::{Deserialize, Serialize};

/// How the advance loop schedules waiting nodes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdvanceMode {
    /// Advance every live node, then wait until all of them are ready.
    AdvanceAll,
    /// Advance every ready node; wait only while none is ready.
    #[default]
    AdvanceSome,
    /// Advance one ready node per poll.
    AdvanceAny,
}

/// Owner-selection policy for new dendrogram nodes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerMode {
    #[default]
    MostOverlap,
    SingleOwner,
    FewestOwned,
    LeastActive,
}

/// What to do with an accepted box smaller than `min_box`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MinBoxCheck {
    Ignore,
    #[default]
    Warn,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    pub algo_advance_mode: AdvanceMode,
    pub owner_mode: OwnerMode,
    /// Renumber each owner's output boxes by position.
    pub sort_output_nodes: bool,
    /// Largest allowed box; `None` means unbounded.
    pub max_box_size: Option<IntVector>,
    pub check_min_box_size: MinBoxCheck,
    /// Fraction of the center-to-edge distance the Laplacian cut may move.
    pub max_lap_cut_from_center: f64,
    pub barrier_before: bool,
    pub barrier_after: bool,
    pub log_node_history: bool,
    pub log_cluster_summary: bool,
    pub log_cluster: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            algo_advance_mode: AdvanceMode::AdvanceSome,
            owner_mode: OwnerMode::MostOverlap,
            sort_output_nodes: false,
            max_box_size: None,
            check_min_box_size: MinBoxCheck::Warn,
            max_lap_cut_from_center: 1.0,
            barrier_before: false,
            barrier_after: false,
            log_node_history: false,
            log_cluster_summary: false,
            log_cluster: false,
        }
    }
}

impl ClusterConfig {
    pub fn validate(&self) -> Result<(), MeshError> {
        let lap = self.max_lap_cut_from_center;
        if !lap.is_finite() || !(0.0..=1.0).contains(&lap) {
            return Err(MeshError::config(
                "max_lap_cut_from_center",
                format!("{lap} is outside [0, 1]"),
            ));
        }
        if let Some(max) = &self.max_box_size {
            if max.min_component() < 1 {
                return Err(MeshError::config(
                    "max_box_size",
                    format!("{max} must be positive on every axis"),
                ));
            }
        }
        Ok(())
    }
}
