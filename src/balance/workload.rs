//! Workload estimates for boxes of a level.

use crate::geometry::{IndexBox, IntVector};

/// Cost model consulted by a load balancer.
pub trait WorkloadSource: Send + Sync {
    /// Workload of the cells of `bx` on level `level_number`.
    fn box_workload(&self, level_number: usize, bx: &IndexBox) -> f64;
}

/// The same cost for every cell.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UniformWorkload {
    per_cell: f64,
}

impl UniformWorkload {
    pub fn new(per_cell: f64) -> Self {
        Self { per_cell }
    }
}

impl Default for UniformWorkload {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl WorkloadSource for UniformWorkload {
    fn box_workload(&self, _level_number: usize, bx: &IndexBox) -> f64 {
        bx.size() as f64 * self.per_cell
    }
}

/// Per-cell cost given by a closure of `(level_number, cell)`.
///
/// ```
/// use mesh_cluster::balance::{CellWorkload, WorkloadSource};
/// use mesh_cluster::geometry::IndexBox;
///
/// // cells right of x = 4 cost twice as much
/// let w = CellWorkload::new(|_, c| if c[0] > 4 { 2.0 } else { 1.0 });
/// assert_eq!(w.box_workload(0, &IndexBox::from_bounds(&[0, 0], &[9, 0])), 15.0);
/// ```
pub struct CellWorkload<F> {
    cost: F,
}

impl<F> CellWorkload<F>
where
    F: Fn(usize, &IntVector) -> f64 + Send + Sync,
{
    pub fn new(cost: F) -> Self {
        Self { cost }
    }
}

impl<F> WorkloadSource for CellWorkload<F>
where
    F: Fn(usize, &IntVector) -> f64 + Send + Sync,
{
    fn box_workload(&self, level_number: usize, bx: &IndexBox) -> f64 {
        bx.cells().map(|c| (self.cost)(level_number, &c)).sum()
    }
}

impl<F> std::fmt::Debug for CellWorkload<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellWorkload").finish_non_exhaustive()
    }
}
