//! Row-block distributed matrices and the collectives behind them.

pub mod collective;
pub mod comm;
#[cfg(feature = "distributed")]
pub mod comm_mpi;
pub mod comm_threaded;
pub mod matrix;
pub mod partition;
pub mod sequenced;

pub use comm::{CommunicationBackend, SingleProcessComm};
pub use comm_threaded::{run_spmd, ThreadComm};
pub use matrix::DistributedMatrix;
pub use partition::{EvenSplit, PartitionStrategy, RowPartition, WeightedSplit};
pub use sequenced::SequencedComm;
