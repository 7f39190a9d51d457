//! MPI communication backend for distributed matrices.
//!
//! Requires the `distributed` feature flag and an MPI installation.
//! Implements `CommunicationBackend` using `mpi::traits::*` on the world
//! communicator.
//!
//! # Usage
//!
//! The caller must initialize MPI before constructing `MpiComm`:
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI init failed");
//! let comm = MpiComm::new();
//! ```
//!
//! MPI reports failures by aborting the job, so every method here returns
//! `Ok` once the underlying call completes.

use super::comm::CommunicationBackend;
use crate::error::Result;
use mpi::collective::SystemOperation;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

/// MPI-based communication backend.
///
/// Wraps the MPI world communicator. Requires `mpi::initialize()` to have
/// been called before construction.
pub struct MpiComm;

impl MpiComm {
    /// Create a new MPI communication backend.
    pub fn new() -> Self {
        Self
    }
}

impl Default for MpiComm {
    fn default() -> Self {
        Self::new()
    }
}

impl CommunicationBackend for MpiComm {
    fn rank(&self) -> usize {
        let world = SimpleCommunicator::world();
        world.rank() as usize
    }

    fn num_ranks(&self) -> usize {
        let world = SimpleCommunicator::world();
        world.size() as usize
    }

    fn all_gather_usize(&self, local: usize) -> Result<Vec<usize>> {
        let world = SimpleCommunicator::world();
        let send = local as u64;
        let mut recv = vec![0u64; world.size() as usize];
        world.all_gather_into(&send, &mut recv[..]);
        Ok(recv.into_iter().map(|v| v as usize).collect())
    }

    fn broadcast(&self, buf: &mut [f64], root: usize) -> Result<()> {
        let world = SimpleCommunicator::world();
        world.process_at_rank(root as i32).broadcast_into(buf);
        Ok(())
    }

    fn broadcast_usize(&self, buf: &mut [usize], root: usize) -> Result<()> {
        let world = SimpleCommunicator::world();
        let mut wire: Vec<u64> = buf.iter().map(|&v| v as u64).collect();
        world.process_at_rank(root as i32).broadcast_into(&mut wire[..]);
        for (dst, src) in buf.iter_mut().zip(wire) {
            *dst = src as usize;
        }
        Ok(())
    }

    fn all_reduce_sum_vec(&self, local: &mut [f64]) -> Result<()> {
        let world = SimpleCommunicator::world();
        let send = local.to_vec();
        world.all_reduce_into(&send[..], local, SystemOperation::sum());
        Ok(())
    }

    fn all_reduce_sum(&self, local: f64) -> Result<f64> {
        let world = SimpleCommunicator::world();
        let mut global = 0.0f64;
        world.all_reduce_into(&local, &mut global, SystemOperation::sum());
        Ok(global)
    }

    fn barrier(&self) -> Result<()> {
        let world = SimpleCommunicator::world();
        world.barrier();
        Ok(())
    }
}
