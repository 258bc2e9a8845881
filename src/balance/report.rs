//! Gathered load statistics, for diagnostics only.

use crate::algs::collective;
use crate::algs::communicator::{Communicator, tags};
use crate::mesh_error::MeshError;
use std::io::Write;

/// A rank and its workload.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RankAndLoad {
    pub rank: usize,
    pub load: f64,
}

/// Lightest first; equal loads by rank.
pub fn sort_ascending(v: &mut [RankAndLoad]) {
    v.sort_by(|a, b| a.load.total_cmp(&b.load).then(a.rank.cmp(&b.rank)));
}

/// Heaviest first; equal loads by rank.
pub fn sort_descending(v: &mut [RankAndLoad]) {
    v.sort_by(|a, b| b.load.total_cmp(&a.load).then(a.rank.cmp(&b.rank)));
}

/// Load distribution over a process group.
#[derive(Clone, Debug, PartialEq)]
pub struct LoadReport {
    /// Workload per rank.
    pub workloads: Vec<f64>,
    /// Boxes per rank; empty when not gathered.
    pub box_counts: Vec<u64>,
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    /// `mean / max`; 1 for an idle group.
    pub efficiency: f64,
    pub max_rank: usize,
    pub min_rank: usize,
}

/// Ranks listed by name in the most/least loaded lines.
const LISTED_RANKS: usize = 5;

impl LoadReport {
    pub fn new(workloads: Vec<f64>, box_counts: Vec<u64>) -> Self {
        let mut ranked = Self::rank_loads(&workloads);
        sort_ascending(&mut ranked);
        let (min, min_rank) = ranked.first().map_or((0.0, 0), |r| (r.load, r.rank));
        sort_descending(&mut ranked);
        let (max, max_rank) = ranked.first().map_or((0.0, 0), |r| (r.load, r.rank));
        let mean = if workloads.is_empty() {
            0.0
        } else {
            workloads.iter().sum::<f64>() / workloads.len() as f64
        };
        let efficiency = if max > 0.0 { mean / max } else { 1.0 };
        Self {
            workloads,
            box_counts,
            max,
            min,
            mean,
            efficiency,
            max_rank,
            min_rank,
        }
    }

    fn rank_loads(workloads: &[f64]) -> Vec<RankAndLoad> {
        workloads
            .iter()
            .enumerate()
            .map(|(rank, &load)| RankAndLoad { rank, load })
            .collect()
    }

    /// Every rank, heaviest first.
    pub fn most_loaded(&self) -> Vec<RankAndLoad> {
        let mut v = Self::rank_loads(&self.workloads);
        sort_descending(&mut v);
        v
    }

    /// Every rank, lightest first.
    pub fn least_loaded(&self) -> Vec<RankAndLoad> {
        let mut v = Self::rank_loads(&self.workloads);
        sort_ascending(&mut v);
        v
    }

    pub fn write_to(&self, out: &mut impl Write) -> std::io::Result<()> {
        let list = |v: Vec<RankAndLoad>| {
            v.iter()
                .take(LISTED_RANKS)
                .map(|r| format!("r{}:{:.6}", r.rank, r.load))
                .collect::<Vec<_>>()
                .join(" ")
        };
        writeln!(out, "load balance over {} ranks", self.workloads.len())?;
        writeln!(out, "  max        {:.6} on rank {}", self.max, self.max_rank)?;
        writeln!(out, "  min        {:.6} on rank {}", self.min, self.min_rank)?;
        writeln!(out, "  mean       {:.6}", self.mean)?;
        writeln!(out, "  efficiency {:.4}", self.efficiency)?;
        writeln!(out, "  most loaded  {}", list(self.most_loaded()))?;
        writeln!(out, "  least loaded {}", list(self.least_loaded()))?;
        if !self.box_counts.is_empty() {
            writeln!(out, "  boxes per rank {:?}", self.box_counts)?;
        }
        Ok(())
    }
}

fn report_err(e: std::io::Error) -> MeshError {
    MeshError::Report(e.to_string())
}

/// Collective: gathers every rank's workload and box count, writes the
/// report to `out` and returns it.
pub fn gather_and_report_load_balance<C: Communicator>(
    local_workload: f64,
    local_box_count: usize,
    comm: &C,
    out: &mut impl Write,
) -> Result<LoadReport, MeshError> {
    let local = [
        local_workload.to_bits().to_le(),
        (local_box_count as u64).to_le(),
    ];
    let parts = collective::all_gather(comm, tags::REPORT, &local)?;
    let mut workloads = Vec::with_capacity(parts.len());
    let mut box_counts = Vec::with_capacity(parts.len());
    for (rank, part) in parts.iter().enumerate() {
        let [bits, count] = part.as_slice() else {
            return Err(MeshError::CommError {
                neighbor: rank,
                reason: format!("expected workload and box count, got {} values", part.len()),
            });
        };
        workloads.push(f64::from_bits(u64::from_le(*bits)));
        box_counts.push(u64::from_le(*count));
    }
    let report = LoadReport::new(workloads, box_counts);
    report.write_to(out).map_err(report_err)?;
    Ok(report)
}

/// Collective: one report per entry of `local_workloads`, e.g. one per
/// level or per step. Every rank must pass the same number of entries.
pub fn gather_and_report_load_balance_sequence<C: Communicator>(
    local_workloads: &[f64],
    comm: &C,
    out: &mut impl Write,
) -> Result<Vec<LoadReport>, MeshError> {
    let local: Vec<u64> = local_workloads.iter().map(|w| w.to_bits().to_le()).collect();
    let parts = collective::all_gather(comm, tags::REPORT, &local)?;
    if let Some((rank, part)) = parts
        .iter()
        .enumerate()
        .find(|(_, p)| p.len() != local.len())
    {
        return Err(MeshError::CollectiveMismatch {
            rank: comm.rank(),
            reason: format!(
                "rank {rank} reported {} workloads, expected {}",
                part.len(),
                local.len()
            ),
        });
    }
    let mut reports = Vec::with_capacity(local.len());
    for k in 0..local.len() {
        let workloads = parts
            .iter()
            .map(|p| f64::from_bits(u64::from_le(p[k])))
            .collect();
        let report = LoadReport::new(workloads, Vec::new());
        writeln!(out, "[{k}]").map_err(report_err)?;
        report.write_to(out).map_err(report_err)?;
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    #[test]
    fn statistics_and_sorting() {
        let r = LoadReport::new(vec![3.0, 9.0, 1.0, 9.0], vec![1, 2, 1, 2]);
        assert_eq!((r.max, r.max_rank), (9.0, 1));
        assert_eq!((r.min, r.min_rank), (1.0, 2));
        assert_eq!(r.mean, 5.5);
        assert!((r.efficiency - 5.5 / 9.0).abs() < 1e-12);
        let order: Vec<usize> = r.most_loaded().iter().map(|x| x.rank).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
        let order: Vec<usize> = r.least_loaded().iter().map(|x| x.rank).collect();
        assert_eq!(order, vec![2, 0, 1, 3]);
    }

    #[test]
    fn serial_report_is_written() {
        let mut buf = Vec::new();
        let r = gather_and_report_load_balance(10.0, 3, &NoComm, &mut buf).unwrap();
        assert_eq!((r.max, r.min, r.mean), (10.0, 10.0, 10.0));
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("load balance over 1 ranks"));
        assert!(text.contains("boxes per rank [3]"));
    }

    #[test]
    fn sequence_reports_each_entry() {
        let mut buf = Vec::new();
        let reps = gather_and_report_load_balance_sequence(&[1.0, 4.0], &NoComm, &mut buf).unwrap();
        assert_eq!(reps.len(), 2);
        assert_eq!(reps[1].max, 4.0);
        assert!(reps[0].box_counts.is_empty());
    }
}
