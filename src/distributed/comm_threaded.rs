//! In-process communication backend: N ranks as N threads.
//!
//! Each collective deposits this rank's contribution into a shared
//! exchange area, waits on a barrier, reads what it needs, and waits again
//! so no rank can overwrite the area before every rank has read it. This
//! gives the same blocking, order-matched semantics as MPI collectives and
//! lets SPMD code run deterministically inside a single test process.

use super::comm::CommunicationBackend;
use crate::error::{Result, RowBlockError};
use std::sync::{Arc, Barrier, Mutex, MutexGuard};

struct Exchange {
    /// One slot per rank for all-gather.
    gathered: Vec<usize>,
    /// One contribution per rank for all-reduce.
    contributions: Vec<Vec<f64>>,
    /// Root payload for broadcast.
    payload: Vec<f64>,
    payload_usize: Vec<usize>,
}

struct Shared {
    barrier: Barrier,
    exchange: Mutex<Exchange>,
}

/// One rank of an in-process group created by `ThreadComm::group`.
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    /// Create a group of `size` connected ranks. Hand one to each thread.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "communicator group must have at least one rank");
        let shared = Arc::new(Shared {
            barrier: Barrier::new(size),
            exchange: Mutex::new(Exchange {
                gathered: vec![0; size],
                contributions: vec![Vec::new(); size],
                payload: Vec::new(),
                payload_usize: Vec::new(),
            }),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn exchange(&self) -> Result<MutexGuard<'_, Exchange>> {
        self.shared
            .exchange
            .lock()
            .map_err(|_| RowBlockError::Transport("exchange poisoned by a panicked rank".into()))
    }

    fn wait(&self) {
        self.shared.barrier.wait();
    }

    fn check_root(&self, root: usize) -> Result<()> {
        if root >= self.size {
            return Err(RowBlockError::Transport(format!(
                "broadcast root {} out of range for {} ranks",
                root, self.size
            )));
        }
        Ok(())
    }
}

impl CommunicationBackend for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.size
    }

    fn all_gather_usize(&self, local: usize) -> Result<Vec<usize>> {
        // A failed deposit still takes part in both barriers so the other ranks are not left hanging.
        let deposited = self.exchange().map(|mut ex| ex.gathered[self.rank] = local);
        self.wait();
        let result = deposited.and_then(|()| self.exchange().map(|ex| ex.gathered.clone()));
        self.wait();
        result
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()> {
        self.check_root(root)?;
        let deposited = if self.rank == root {
            self.exchange().map(|mut ex| {
                ex.payload.clear();
                ex.payload.extend_from_slice(buf);
            })
        } else {
            Ok(())
        };
        self.wait();
        let result = if self.rank == root {
            deposited
        } else {
            self.exchange().and_then(|ex| {
                if ex.payload.len() != buf.len() {
                    return Err(RowBlockError::Protocol(format!(
                        "rank {} expected {} broadcast values from rank {}, got {}",
                        self.rank,
                        buf.len(),
                        root,
                        ex.payload.len()
                    )));
                }
                buf.copy_from_slice(&ex.payload);
                Ok(())
            })
        };
        self.wait();
        result
    }

    fn broadcast_usize(&self, buf: &mut [usize], root: usize) -> Result<()> {
        self.check_root(root)?;
        let deposited = if self.rank == root {
            self.exchange().map(|mut ex| {
                ex.payload_usize.clear();
                ex.payload_usize.extend_from_slice(buf);
            })
        } else {
            Ok(())
        };
        self.wait();
        let result = if self.rank == root {
            deposited
        } else {
            self.exchange().and_then(|ex| {
                if ex.payload_usize.len() != buf.len() {
                    return Err(RowBlockError::Protocol(format!(
                        "rank {} expected {} broadcast indices from rank {}, got {}",
                        self.rank,
                        buf.len(),
                        root,
                        ex.payload_usize.len()
                    )));
                }
                buf.copy_from_slice(&ex.payload_usize);
                Ok(())
            })
        };
        self.wait();
        result
    }

    fn all_reduce_sum_vec(&self, local: &mut [f64]) -> Result<()> {
        let deposited = self
            .exchange()
            .map(|mut ex| ex.contributions[self.rank] = local.to_vec());
        self.wait();
        // Every rank sums in rank order, so all ranks get bit-identical results.
        let result = deposited.and_then(|()| self.exchange()).and_then(|ex| {
            if let Some((peer, c)) = ex
                .contributions
                .iter()
                .enumerate()
                .find(|(_, c)| c.len() != local.len())
            {
                return Err(RowBlockError::Protocol(format!(
                    "all-reduce length mismatch: rank {} has {}, rank {} has {}",
                    self.rank,
                    local.len(),
                    peer,
                    c.len()
                )));
            }
            let mut sum = vec![0.0; local.len()];
            for c in &ex.contributions {
                for (s, v) in sum.iter_mut().zip(c) {
                    *s += v;
                }
            }
            Ok(sum)
        });
        self.wait();
        local.copy_from_slice(&result?);
        Ok(())
    }

    fn barrier(&self) -> Result<()> {
        self.wait();
        Ok(())
    }
}

/// Run `f` once per rank on `size` scoped threads and collect the results
/// in rank order.
///
/// A panic on any rank is re-raised on the calling thread once all ranks
/// have finished.
pub fn run_spmd<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(&ThreadComm) -> R + Sync,
{
    let comms = ThreadComm::group(size);
    let f = &f;
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .iter()
            .map(|comm| {
                std::thread::Builder::new()
                    .name(format!("rank-{}", comm.rank))
                    .spawn_scoped(scope, move || f(comm))
                    .unwrap_or_else(|e| panic!("failed to spawn rank thread: {e}"))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|payload| std::panic::resume_unwind(payload)))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_gather_is_rank_ordered_everywhere() {
        let results = run_spmd(4, |comm| comm.all_gather_usize(comm.rank() * 10).unwrap());
        for r in results {
            assert_eq!(r, vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn broadcast_from_each_root() {
        let results = run_spmd(3, |comm| {
            let mut seen = Vec::new();
            for root in 0..comm.num_ranks() {
                let mut buf = [comm.rank() as f64, -1.0];
                comm.broadcast(&mut buf, root).unwrap();
                seen.push(buf);
            }
            seen
        });
        for seen in results {
            assert_eq!(seen, vec![[0.0, -1.0], [1.0, -1.0], [2.0, -1.0]]);
        }
    }

    #[test]
    fn broadcast_usize_shape() {
        let results = run_spmd(2, |comm| {
            let mut shape = if comm.rank() == 1 { [5, 7] } else { [0, 0] };
            comm.broadcast_usize(&mut shape, 1).unwrap();
            shape
        });
        assert_eq!(results, vec![[5, 7], [5, 7]]);
    }

    #[test]
    fn all_reduce_sum_vec_identical() {
        let results = run_spmd(4, |comm| {
            let r = comm.rank() as f64;
            let mut v = vec![r, 1.0, -r];
            comm.all_reduce_sum_vec(&mut v).unwrap();
            v
        });
        for v in results {
            assert_eq!(v, vec![6.0, 4.0, -6.0]);
        }
    }

    #[test]
    fn all_reduce_length_mismatch_reported_on_every_rank() {
        let results = run_spmd(2, |comm| {
            let mut v = vec![1.0; comm.rank() + 1];
            comm.all_reduce_sum_vec(&mut v)
        });
        for r in results {
            assert!(matches!(r, Err(RowBlockError::Protocol(_))));
        }
    }

    #[test]
    fn scalar_all_reduce_default_method() {
        let results = run_spmd(3, |comm| comm.all_reduce_sum(1.5).unwrap());
        assert_eq!(results, vec![4.5, 4.5, 4.5]);
    }

    #[test]
    fn poisoned_exchange_fails_every_collective_without_hanging() {
        let comms = ThreadComm::group(3);
        let shared = Arc::clone(&comms[0].shared);
        let _ = std::thread::spawn(move || {
            let _guard = shared.exchange.lock().unwrap();
            panic!("rank died while holding the exchange");
        })
        .join();

        let results: Vec<[Result<()>; 4]> = std::thread::scope(|scope| {
            let handles: Vec<_> = comms
                .iter()
                .map(|comm| {
                    scope.spawn(move || {
                        let gathered = comm.all_gather_usize(comm.rank()).map(|_| ());
                        let mut buf = [1.0];
                        let broadcast = comm.broadcast(&mut buf, 0);
                        let mut shape = [1usize, 2];
                        let broadcast_usize = comm.broadcast_usize(&mut shape, 0);
                        let mut v = [1.0];
                        let reduced = comm.all_reduce_sum_vec(&mut v);
                        [gathered, broadcast, broadcast_usize, reduced]
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for per_rank in results {
            for r in per_rank {
                assert!(matches!(r, Err(RowBlockError::Transport(_))));
            }
        }
    }

    #[test]
    fn broadcast_bad_root_is_local_error() {
        let comm = ThreadComm::group(1).pop().unwrap();
        let mut buf = [0.0];
        assert!(matches!(
            comm.broadcast(&mut buf, 3),
            Err(RowBlockError::Transport(_))
        ));
    }
}
