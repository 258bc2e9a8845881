//! Subsets of ranks allowed to receive work.

/// Either every rank of the communicator or an explicit sorted subset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RankGroup {
    ranks: Option<Vec<usize>>,
}

impl RankGroup {
    /// Every rank of the communicator.
    pub fn all() -> Self {
        Self { ranks: None }
    }

    /// An explicit subset; duplicates are dropped.
    pub fn from_ranks(mut ranks: Vec<usize>) -> Self {
        ranks.sort_unstable();
        ranks.dedup();
        Self { ranks: Some(ranks) }
    }

    pub fn is_all(&self) -> bool {
        self.ranks.is_none()
    }

    pub fn contains(&self, rank: usize, nprocs: usize) -> bool {
        match &self.ranks {
            None => rank < nprocs,
            Some(r) => r.binary_search(&rank).is_ok(),
        }
    }

    pub fn size(&self, nprocs: usize) -> usize {
        self.ranks.as_ref().map_or(nprocs, Vec::len)
    }

    /// Member ranks in ascending order.
    pub fn ranks(&self, nprocs: usize) -> Vec<usize> {
        match &self.ranks {
            None => (0..nprocs).collect(),
            Some(r) => r.clone(),
        }
    }

    /// Stable fingerprint (FNV-1a) for cross-rank agreement checks.
    pub fn fingerprint(&self, nprocs: usize) -> u64 {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for r in self.ranks(nprocs) {
            for b in (r as u64).to_le_bytes() {
                h ^= u64::from(b);
                h = h.wrapping_mul(0x0100_0000_01b3);
            }
        }
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_and_subset() {
        let all = RankGroup::all();
        assert!(all.contains(3, 4));
        assert!(!all.contains(4, 4));
        assert_eq!(all.ranks(3), vec![0, 1, 2]);

        let sub = RankGroup::from_ranks(vec![3, 1, 3]);
        assert_eq!(sub.ranks(8), vec![1, 3]);
        assert!(!sub.contains(0, 8));
        assert_eq!(sub.size(8), 2);
        assert_ne!(sub.fingerprint(8), all.fingerprint(8));
        assert_eq!(RankGroup::from_ranks(vec![0, 1]).fingerprint(2), all.fingerprint(2));
    }
}
