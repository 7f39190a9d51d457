//! Row partitioning for row-block distributed matrices.
//!
//! A `PartitionStrategy` decides how many rows each rank owns. The
//! resulting `RowPartition` is the replicated table mapping ranks to
//! contiguous global row ranges.

use crate::error::{Result, RowBlockError};
use std::ops::Range;

/// Row partitioner trait. Returns the number of rows per rank, in rank order.
///
/// Implementations must return exactly `num_ranks` counts summing to
/// `total_rows`, and must be deterministic: every rank evaluates the
/// strategy independently and relies on getting the same answer.
pub trait PartitionStrategy: Send + Sync {
    fn row_counts(&self, total_rows: usize, num_ranks: usize) -> Result<Vec<usize>>;
}

/// Even split: the first `total_rows % num_ranks` ranks get one extra row.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvenSplit;

impl EvenSplit {
    /// (offset, count) of `rank`'s rows without building the whole table.
    pub fn local_range(total_rows: usize, rank: usize, num_ranks: usize) -> (usize, usize) {
        let base = total_rows / num_ranks;
        let remainder = total_rows % num_ranks;
        let count = if rank < remainder { base + 1 } else { base };
        (rank * base + rank.min(remainder), count)
    }
}

impl PartitionStrategy for EvenSplit {
    fn row_counts(&self, total_rows: usize, num_ranks: usize) -> Result<Vec<usize>> {
        if num_ranks == 0 {
            return Err(RowBlockError::Partition("cannot partition over zero ranks".into()));
        }
        Ok((0..num_ranks)
            .map(|rank| Self::local_range(total_rows, rank, num_ranks).1)
            .collect())
    }
}

/// Split proportional to per-rank weights (e.g. measured throughput).
///
/// Uses largest-remainder apportionment: each rank first gets the floor of
/// its exact share, then leftover rows go to the largest fractional parts,
/// lower rank first on ties. An all-zero weight vector falls back to
/// `EvenSplit`.
#[derive(Debug, Clone)]
pub struct WeightedSplit {
    weights: Vec<f64>,
}

impl WeightedSplit {
    pub fn new(weights: Vec<f64>) -> Result<Self> {
        if let Some((rank, w)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(RowBlockError::Partition(format!(
                "weight {} for rank {} must be finite and non-negative",
                w, rank
            )));
        }
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
}

impl PartitionStrategy for WeightedSplit {
    fn row_counts(&self, total_rows: usize, num_ranks: usize) -> Result<Vec<usize>> {
        if self.weights.len() != num_ranks {
            return Err(RowBlockError::Partition(format!(
                "{} weights given for {} ranks",
                self.weights.len(),
                num_ranks
            )));
        }
        let total_weight: f64 = self.weights.iter().sum();
        if total_weight <= 0.0 {
            return EvenSplit.row_counts(total_rows, num_ranks);
        }

        let shares: Vec<f64> = self
            .weights
            .iter()
            .map(|w| w * total_rows as f64 / total_weight)
            .collect();
        let mut counts: Vec<usize> = shares.iter().map(|s| s.floor() as usize).collect();
        let assigned: usize = counts.iter().sum();

        // Zero-weight ranks never receive rows.
        let mut order: Vec<usize> = (0..num_ranks).filter(|&r| self.weights[r] > 0.0).collect();
        order.sort_by(|&a, &b| {
            let fa = shares[a] - shares[a].floor();
            let fb = shares[b] - shares[b].floor();
            fb.total_cmp(&fa).then(a.cmp(&b))
        });
        for &rank in order.iter().cycle().take(total_rows.saturating_sub(assigned)) {
            counts[rank] += 1;
        }
        // Rounding can push the floors past the total; take back from the smallest remainders.
        let mut excess = assigned.saturating_sub(total_rows);
        for &rank in order.iter().rev() {
            if excess == 0 {
                break;
            }
            if counts[rank] > 0 {
                counts[rank] -= 1;
                excess -= 1;
            }
        }
        Ok(counts)
    }
}

/// Replicated table of which rank owns which global rows.
///
/// `row_indices[p]` is the first global row owned by rank `p` and
/// `row_ranges[p]` the number of rows it owns. Ranges are contiguous,
/// non-overlapping and in rank order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowPartition {
    row_indices: Vec<usize>,
    row_ranges: Vec<usize>,
}

impl RowPartition {
    /// Build the table from per-rank row counts (exclusive prefix sum).
    pub fn from_counts(counts: Vec<usize>) -> Self {
        let mut row_indices = Vec::with_capacity(counts.len());
        let mut index = 0;
        for &c in &counts {
            row_indices.push(index);
            index += c;
        }
        Self {
            row_indices,
            row_ranges: counts,
        }
    }

    /// All-zero table for `num_ranks` ranks.
    pub fn empty(num_ranks: usize) -> Self {
        Self::from_counts(vec![0; num_ranks])
    }

    pub fn num_ranks(&self) -> usize {
        self.row_ranges.len()
    }

    pub fn total_rows(&self) -> usize {
        self.row_ranges.iter().sum()
    }

    pub fn offset(&self, rank: usize) -> usize {
        self.row_indices[rank]
    }

    pub fn count(&self, rank: usize) -> usize {
        self.row_ranges[rank]
    }

    pub fn range(&self, rank: usize) -> Range<usize> {
        self.row_indices[rank]..self.row_indices[rank] + self.row_ranges[rank]
    }

    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    pub fn row_ranges(&self) -> &[usize] {
        &self.row_ranges
    }

    /// Rank owning global row `row`, or `None` if `row >= total_rows()`.
    pub fn owner_of(&self, row: usize) -> Option<usize> {
        (0..self.num_ranks()).find(|&r| self.range(r).contains(&row))
    }

    /// Largest difference in row count between any two ranks.
    pub fn max_imbalance(&self) -> usize {
        let max = self.row_ranges.iter().copied().max().unwrap_or(0);
        let min = self.row_ranges.iter().copied().min().unwrap_or(0);
        max - min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_split_ten_over_four() {
        let counts = EvenSplit.row_counts(10, 4).unwrap();
        assert_eq!(counts, vec![3, 3, 2, 2]);
        let p = RowPartition::from_counts(counts);
        assert_eq!(p.row_indices(), &[0, 3, 6, 8]);
        assert_eq!(p.range(2), 6..8);
        assert_eq!(p.total_rows(), 10);
    }

    #[test]
    fn even_split_local_range_matches_table() {
        for m in 0..40 {
            for ranks in 1..9 {
                let p = RowPartition::from_counts(EvenSplit.row_counts(m, ranks).unwrap());
                for r in 0..ranks {
                    assert_eq!(EvenSplit::local_range(m, r, ranks), (p.offset(r), p.count(r)));
                }
            }
        }
    }

    #[test]
    fn even_split_covers_and_balances() {
        for m in 0..100 {
            for ranks in 1..12 {
                let p = RowPartition::from_counts(EvenSplit.row_counts(m, ranks).unwrap());
                assert_eq!(p.total_rows(), m);
                assert!(p.max_imbalance() <= 1, "m={m} ranks={ranks}");
                let non_empty: Vec<usize> = (0..ranks)
                    .filter(|&r| p.count(r) > 0)
                    .map(|r| p.offset(r))
                    .collect();
                assert!(non_empty.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn even_split_more_ranks_than_rows() {
        let counts = EvenSplit.row_counts(2, 5).unwrap();
        assert_eq!(counts, vec![1, 1, 0, 0, 0]);
    }

    #[test]
    fn even_split_zero_ranks_rejected() {
        assert!(EvenSplit.row_counts(4, 0).is_err());
    }

    #[test]
    fn owner_of_scans_ranges() {
        let p = RowPartition::from_counts(vec![3, 0, 2, 2]);
        assert_eq!(p.owner_of(0), Some(0));
        assert_eq!(p.owner_of(2), Some(0));
        assert_eq!(p.owner_of(3), Some(2));
        assert_eq!(p.owner_of(6), Some(3));
        assert_eq!(p.owner_of(7), None);
    }

    #[test]
    fn weighted_split_proportional() {
        let s = WeightedSplit::new(vec![1.0, 3.0]).unwrap();
        assert_eq!(s.row_counts(8, 2).unwrap(), vec![2, 6]);
    }

    #[test]
    fn weighted_split_largest_remainder() {
        // Shares: 10/3 each -> floors 3,3,3, one leftover to rank 0.
        let s = WeightedSplit::new(vec![1.0, 1.0, 1.0]).unwrap();
        assert_eq!(s.row_counts(10, 3).unwrap(), vec![4, 3, 3]);
        // Shares: 1.4, 2.8, 2.8 -> floors 1,2,2, leftovers to ranks 1,2.
        let s = WeightedSplit::new(vec![1.0, 2.0, 2.0]).unwrap();
        assert_eq!(s.row_counts(7, 3).unwrap(), vec![1, 3, 3]);
    }

    #[test]
    fn weighted_split_always_sums() {
        let s = WeightedSplit::new(vec![0.3, 0.0, 2.5, 1.1]).unwrap();
        for m in 0..50 {
            let counts = s.row_counts(m, 4).unwrap();
            assert_eq!(counts.iter().sum::<usize>(), m);
            assert_eq!(counts[1], 0);
        }
    }

    #[test]
    fn weighted_split_zero_weights_falls_back() {
        let s = WeightedSplit::new(vec![0.0; 4]).unwrap();
        assert_eq!(s.row_counts(10, 4).unwrap(), vec![3, 3, 2, 2]);
    }

    #[test]
    fn weighted_split_rejects_bad_input() {
        assert!(WeightedSplit::new(vec![1.0, -1.0]).is_err());
        assert!(WeightedSplit::new(vec![f64::NAN]).is_err());
        let s = WeightedSplit::new(vec![1.0, 1.0]).unwrap();
        assert!(s.row_counts(4, 3).is_err());
    }
}
