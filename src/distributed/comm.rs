//! Communication backend abstraction for row-block distributed matrices.
//!
//! Provides a trait for the collectives the distributed matrix needs
//! (all-gather, broadcast, all-reduce) and a no-op single-process
//! implementation.
//!
//! Every method is collective: all ranks must call the same method, with
//! the same root and payload length, in the same order. Implementations
//! match calls purely by order; there are no tags.

use crate::error::Result;

/// Abstraction over inter-process communication for distributed matrices.
///
/// Implementations: `SingleProcessComm` (no-op), `ThreadComm` (ranks as
/// threads of one process), `MpiComm` (via mpi crate), and the
/// `SequencedComm` wrapper that checks call order.
pub trait CommunicationBackend: Send + Sync {
    /// This process's rank.
    fn rank(&self) -> usize;

    /// Total number of ranks in the group.
    fn num_ranks(&self) -> usize;

    /// Gather one value from every rank. The result has `num_ranks()`
    /// entries in rank order and is identical on every rank.
    fn all_gather_usize(&self, local: usize) -> Result<Vec<usize>>;

    /// Overwrite `buf` on every rank with the contents of `buf` on `root`.
    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()>;

    /// Same as `broadcast`, for index/shape payloads.
    fn broadcast_usize(&self, buf: &mut [usize], root: usize) -> Result<()>;

    /// Element-wise sum of a vector across all ranks, in place.
    ///
    /// After the call, every rank holds the same global sum.
    fn all_reduce_sum_vec(&self, local: &mut [f64]) -> Result<()>;

    /// Sum a local scalar across all ranks.
    fn all_reduce_sum(&self, local: f64) -> Result<f64> {
        let mut buf = [local];
        self.all_reduce_sum_vec(&mut buf)?;
        Ok(buf[0])
    }

    /// Synchronization barrier.
    fn barrier(&self) -> Result<()>;
}

impl<C: CommunicationBackend + ?Sized> CommunicationBackend for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn num_ranks(&self) -> usize {
        (**self).num_ranks()
    }

    fn all_gather_usize(&self, local: usize) -> Result<Vec<usize>> {
        (**self).all_gather_usize(local)
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()> {
        (**self).broadcast(buf, root)
    }

    fn broadcast_usize(&self, buf: &mut [usize], root: usize) -> Result<()> {
        (**self).broadcast_usize(buf, root)
    }

    fn all_reduce_sum_vec(&self, local: &mut [f64]) -> Result<()> {
        (**self).all_reduce_sum_vec(local)
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64> {
        (**self).all_reduce_sum(local)
    }

    fn barrier(&self) -> Result<()> {
        (**self).barrier()
    }
}

/// No-op communication backend for single-process execution.
///
/// All operations pass through unchanged: the only rank is always the root
/// and already holds the complete result.
pub struct SingleProcessComm;

impl CommunicationBackend for SingleProcessComm {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn all_gather_usize(&self, local: usize) -> Result<Vec<usize>> {
        Ok(vec![local])
    }

    fn broadcast(&self, _buf: &mut [f64], _root: usize) -> Result<()> {
        Ok(())
    }

    fn broadcast_usize(&self, _buf: &mut [usize], _root: usize) -> Result<()> {
        Ok(())
    }

    fn all_reduce_sum_vec(&self, _local: &mut [f64]) -> Result<()> {
        // Single process: vector is already complete.
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_all_reduce_sum() {
        let comm = SingleProcessComm;
        assert_eq!(comm.all_reduce_sum(42.0).unwrap(), 42.0);
        assert_eq!(comm.all_reduce_sum(-1.5).unwrap(), -1.5);
    }

    #[test]
    fn single_process_rank_and_size() {
        let comm = SingleProcessComm;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.num_ranks(), 1);
    }

    #[test]
    fn single_process_all_gather() {
        let comm = SingleProcessComm;
        assert_eq!(comm.all_gather_usize(7).unwrap(), vec![7]);
    }

    #[test]
    fn single_process_broadcast_is_noop() {
        let comm = SingleProcessComm;
        let mut buf = vec![1.0, 2.0, 3.0];
        comm.broadcast(&mut buf, 0).unwrap();
        assert_eq!(buf, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn reference_forwards_to_backend() {
        let comm = SingleProcessComm;
        let by_ref: &dyn CommunicationBackend = &comm;
        assert_eq!((&by_ref).num_ranks(), 1);
        assert_eq!(by_ref.all_reduce_sum(3.0).unwrap(), 3.0);
    }
}
