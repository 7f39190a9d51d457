//! Collective helpers used by the distributed matrix.
//!
//! Thin wrappers over `CommunicationBackend` that turn per-rank pieces into
//! replicated results. All of them are collective: every rank must call
//! them in the same order with a consistent partition.

use super::comm::CommunicationBackend;
use super::partition::RowPartition;
use crate::error::{Result, RowBlockError};

/// All-gather every rank's local row count, in rank order.
pub fn gather_row_counts(comm: &dyn CommunicationBackend, local_rows: usize) -> Result<Vec<usize>> {
    let counts = comm.all_gather_usize(local_rows)?;
    if counts.len() != comm.num_ranks() {
        return Err(RowBlockError::Protocol(format!(
            "row-count gather returned {} entries for {} ranks",
            counts.len(),
            comm.num_ranks()
        )));
    }
    tracing::trace!(rank = comm.rank(), ?counts, "gathered row counts");
    Ok(counts)
}

/// All-gather `value` and fail on every rank unless all ranks passed the same.
///
/// The error message is built from the gathered vector, so it is identical
/// on every rank.
pub fn agree_usize(comm: &dyn CommunicationBackend, value: usize, what: &str) -> Result<usize> {
    let values = comm.all_gather_usize(value)?;
    if values.iter().any(|&v| v != value) || values.len() != comm.num_ranks() {
        return Err(RowBlockError::Protocol(format!(
            "ranks disagree on {}: {:?}",
            what, values
        )));
    }
    Ok(value)
}

/// Assemble a row-partitioned vector and replicate it on every rank.
///
/// `local` is this rank's slice (length `partition.count(rank)`). Each
/// owner in turn broadcasts its slice of the full-length buffer.
pub fn assemble_and_broadcast(
    comm: &dyn CommunicationBackend,
    partition: &RowPartition,
    local: &[f64],
) -> Result<Vec<f64>> {
    let rank = comm.rank();
    let own = partition.range(rank);
    if local.len() != own.len() {
        return Err(RowBlockError::Shape(format!(
            "rank {} contributes {} values but owns {} rows",
            rank,
            local.len(),
            own.len()
        )));
    }

    let mut assembled = vec![0.0; partition.total_rows()];
    assembled[own].copy_from_slice(local);

    for owner in 0..partition.num_ranks() {
        let range = partition.range(owner);
        // The table is replicated, so every rank skips the same owners.
        if range.is_empty() {
            continue;
        }
        comm.broadcast(&mut assembled[range], owner)?;
    }
    Ok(assembled)
}

/// All-reduce-sum a vector; every rank gets the same element-wise total.
pub fn reduce_sum(comm: &dyn CommunicationBackend, local: &[f64]) -> Result<Vec<f64>> {
    let mut result = local.to_vec();
    comm.all_reduce_sum_vec(&mut result)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::comm::SingleProcessComm;
    use crate::distributed::comm_threaded::run_spmd;
    use crate::distributed::partition::{EvenSplit, PartitionStrategy};

    #[test]
    fn agree_usize_matching_values() {
        let results = run_spmd(3, |comm| agree_usize(comm, 7, "rows").unwrap());
        assert_eq!(results, vec![7, 7, 7]);
    }

    #[test]
    fn agree_usize_mismatch_fails_everywhere_with_same_message() {
        let results = run_spmd(3, |comm| {
            let value = if comm.rank() == 2 { 4 } else { 5 };
            agree_usize(comm, value, "rows").unwrap_err().to_string()
        });
        for msg in &results {
            assert_eq!(msg, &results[0]);
            assert!(msg.contains("[5, 5, 4]"), "{msg}");
        }
    }

    #[test]
    fn gather_row_counts_single_process() {
        assert_eq!(gather_row_counts(&SingleProcessComm, 5).unwrap(), vec![5]);
    }

    #[test]
    fn assemble_and_broadcast_replicates() {
        let results = run_spmd(4, |comm| {
            let partition = RowPartition::from_counts(EvenSplit.row_counts(10, 4).unwrap());
            let local: Vec<f64> = partition.range(comm.rank()).map(|i| i as f64).collect();
            assemble_and_broadcast(comm, &partition, &local).unwrap()
        });
        let expected: Vec<f64> = (0..10).map(|i| i as f64).collect();
        for r in results {
            assert_eq!(r, expected);
        }
    }

    #[test]
    fn assemble_skips_empty_owners() {
        let results = run_spmd(3, |comm| {
            let partition = RowPartition::from_counts(vec![2, 0, 1]);
            let local = vec![comm.rank() as f64 + 1.0; partition.count(comm.rank())];
            assemble_and_broadcast(comm, &partition, &local).unwrap()
        });
        for r in results {
            assert_eq!(r, vec![1.0, 1.0, 3.0]);
        }
    }

    #[test]
    fn assemble_rejects_wrong_local_length() {
        let partition = RowPartition::from_counts(vec![3]);
        let err = assemble_and_broadcast(&SingleProcessComm, &partition, &[1.0]).unwrap_err();
        assert!(matches!(err, RowBlockError::Shape(_)));
    }

    #[test]
    fn reduce_sum_totals() {
        let results = run_spmd(3, |comm| {
            let local = vec![1.0, comm.rank() as f64];
            reduce_sum(comm, &local).unwrap()
        });
        for r in results {
            assert_eq!(r, vec![3.0, 3.0]);
        }
    }
}
