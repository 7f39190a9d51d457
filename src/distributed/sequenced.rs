//! Call-order checking for collective operations.
//!
//! Collectives are matched by call order only, so a rank that skips or
//! reorders a call normally hangs the group or pairs the wrong payloads.
//! `SequencedComm` numbers every collective. In debug builds it first
//! all-gathers a fingerprint of (sequence number, operation, root, payload
//! length) and fails with `Protocol` on every rank when they disagree.
//! Release builds only count calls.

use super::comm::CommunicationBackend;
use crate::error::{Result, RowBlockError};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CollectiveKind {
    AllGather,
    Broadcast,
    BroadcastIndex,
    AllReduce,
    Barrier,
}

/// Wraps a backend with a per-rank collective sequence counter.
pub struct SequencedComm<C> {
    inner: C,
    sequence: AtomicU64,
    elements: AtomicU64,
    verify: bool,
}

impl<C: CommunicationBackend> SequencedComm<C> {
    /// Wrap `inner`. Verification follows `debug_assertions`.
    pub fn new(inner: C) -> Self {
        Self::with_verification(inner, cfg!(debug_assertions))
    }

    /// Wrap `inner` with verification explicitly on or off.
    pub fn with_verification(inner: C, verify: bool) -> Self {
        Self {
            inner,
            sequence: AtomicU64::new(0),
            elements: AtomicU64::new(0),
            verify,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Collective calls issued through this wrapper so far.
    pub fn calls(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Total payload elements passed to collectives so far.
    pub fn elements(&self) -> u64 {
        self.elements.load(Ordering::Relaxed)
    }

    fn enter(&self, kind: CollectiveKind, root: usize, len: usize) -> Result<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.elements.fetch_add(len as u64, Ordering::Relaxed);
        if !self.verify {
            return Ok(());
        }

        let mut hasher = DefaultHasher::new();
        (sequence, kind, root, len).hash(&mut hasher);
        let fingerprint = hasher.finish() as usize;

        let seen = self.inner.all_gather_usize(fingerprint)?;
        if seen.len() != self.inner.num_ranks() {
            return Err(RowBlockError::Protocol(format!(
                "fingerprint exchange returned {} entries for {} ranks",
                seen.len(),
                self.inner.num_ranks()
            )));
        }
        // `seen` is identical everywhere, so every rank names the same culprit.
        if let Some(peer) = seen.iter().position(|&f| f != seen[0]) {
            tracing::warn!(
                sequence,
                ?kind,
                root,
                len,
                peer,
                "collective call sequence diverged"
            );
            return Err(RowBlockError::Protocol(format!(
                "collective #{} diverged: rank {} disagrees with rank 0 (this rank {} issued {:?}, root {}, length {})",
                sequence,
                peer,
                self.inner.rank(),
                kind,
                root,
                len
            )));
        }
        Ok(())
    }
}

impl<C: CommunicationBackend> CommunicationBackend for SequencedComm<C> {
    fn rank(&self) -> usize {
        self.inner.rank()
    }

    fn num_ranks(&self) -> usize {
        self.inner.num_ranks()
    }

    fn all_gather_usize(&self, local: usize) -> Result<Vec<usize>> {
        self.enter(CollectiveKind::AllGather, 0, 1)?;
        self.inner.all_gather_usize(local)
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()> {
        self.enter(CollectiveKind::Broadcast, root, buf.len())?;
        self.inner.broadcast(buf, root)
    }

    fn broadcast_usize(&self, buf: &mut [usize], root: usize) -> Result<()> {
        self.enter(CollectiveKind::BroadcastIndex, root, buf.len())?;
        self.inner.broadcast_usize(buf, root)
    }

    fn all_reduce_sum_vec(&self, local: &mut [f64]) -> Result<()> {
        self.enter(CollectiveKind::AllReduce, 0, local.len())?;
        self.inner.all_reduce_sum_vec(local)
    }

    fn barrier(&self) -> Result<()> {
        self.enter(CollectiveKind::Barrier, 0, 0)?;
        self.inner.barrier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::comm::SingleProcessComm;
    use crate::distributed::comm_threaded::{run_spmd, ThreadComm};

    #[test]
    fn counts_calls_and_elements() {
        let comm = SequencedComm::with_verification(SingleProcessComm, false);
        let mut buf = [0.0; 5];
        comm.broadcast(&mut buf, 0).unwrap();
        comm.all_reduce_sum_vec(&mut buf[..3]).unwrap();
        comm.barrier().unwrap();
        assert_eq!(comm.calls(), 3);
        assert_eq!(comm.elements(), 8);
    }

    #[test]
    fn matching_sequences_pass() {
        let results = run_spmd(3, |comm: &ThreadComm| {
            let comm = SequencedComm::with_verification(comm, true);
            let mut buf = [comm.rank() as f64; 2];
            comm.broadcast(&mut buf, 1)?;
            comm.all_reduce_sum_vec(&mut buf)?;
            Ok::<_, RowBlockError>(buf)
        });
        for r in results {
            assert_eq!(r.unwrap(), [3.0, 3.0]);
        }
    }

    #[test]
    fn divergent_root_detected_on_every_rank() {
        let results = run_spmd(2, |comm: &ThreadComm| {
            let comm = SequencedComm::with_verification(comm, true);
            let mut buf = [0.0];
            // Each rank believes it is the root: would pair wrong data unchecked.
            comm.broadcast(&mut buf, comm.rank())
        });
        for r in results {
            assert!(matches!(r, Err(RowBlockError::Protocol(_))));
        }
    }

    #[test]
    fn reordered_collectives_detected() {
        let results = run_spmd(2, |comm: &ThreadComm| {
            let comm = SequencedComm::with_verification(comm, true);
            let mut buf = [1.0];
            if comm.rank() == 0 {
                comm.all_reduce_sum_vec(&mut buf)
            } else {
                comm.broadcast(&mut buf, 0)
            }
        });
        for r in results {
            assert!(matches!(r, Err(RowBlockError::Protocol(_))));
        }
    }
}
