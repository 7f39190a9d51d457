//! Row-block distributed dense matrix.
//!
//! A logically single m×n matrix whose rows are split into contiguous
//! blocks, one per rank. Each rank stores only its own block; shape
//! queries are local, while element reads and matrix-vector products are
//! collective and return replicated results.
//!
//! Every collective method must be called by all ranks in the same order
//! with the same arguments. Argument validation happens before any
//! communication, so a bad index or vector length fails on every rank
//! alike instead of leaving some ranks blocked in a collective.

use std::sync::Arc;

use super::collective::{agree_usize, assemble_and_broadcast, gather_row_counts, reduce_sum};
use super::comm::CommunicationBackend;
use super::partition::{EvenSplit, PartitionStrategy, RowPartition};
use crate::dense::DenseMatrix;
use crate::error::{Result, RowBlockError};

/// Dense matrix distributed by contiguous row blocks.
pub struct DistributedMatrix<'c> {
    comm: &'c dyn CommunicationBackend,
    strategy: Arc<dyn PartitionStrategy>,
    /// Global rows.
    m: usize,
    /// Global cols; also the column count of `local`.
    n: usize,
    rank: usize,
    num_ranks: usize,
    local: DenseMatrix,
    partition: RowPartition,
}

impl<'c> DistributedMatrix<'c> {
    /// Empty 0×0 matrix. No communication.
    pub fn empty(comm: &'c dyn CommunicationBackend) -> Self {
        let num_ranks = comm.num_ranks();
        Self {
            comm,
            strategy: Arc::new(EvenSplit),
            m: 0,
            n: 0,
            rank: comm.rank(),
            num_ranks,
            local: DenseMatrix::default(),
            partition: RowPartition::empty(num_ranks),
        }
    }

    /// Wrap a block this rank already holds.
    ///
    /// The global layout is derived from every rank's block height, so
    /// uneven or externally imposed partitions are fine. Ranks with a
    /// non-empty block must agree on the column count. Collective.
    pub fn from_local(comm: &'c dyn CommunicationBackend, local: DenseMatrix) -> Result<Self> {
        Self::from_local_with(comm, local, Arc::new(EvenSplit))
    }

    /// `from_local` with the strategy later used by `resize`.
    pub fn from_local_with(
        comm: &'c dyn CommunicationBackend,
        mut local: DenseMatrix,
        strategy: Arc<dyn PartitionStrategy>,
    ) -> Result<Self> {
        let _span = tracing::debug_span!(
            "wrap_local_block",
            rank = comm.rank(),
            local_rows = local.rows(),
            local_cols = local.cols()
        )
        .entered();

        let counts = gather_row_counts(comm, local.rows())?;
        let cols = comm.all_gather_usize(local.cols())?;

        // Empty blocks carry no column information (e.g. after resize to 0 rows).
        let mut n = None;
        for (rank, (&rows, &c)) in counts.iter().zip(&cols).enumerate() {
            if rows == 0 {
                continue;
            }
            match n {
                None => n = Some(c),
                Some(expected) if expected != c => {
                    return Err(RowBlockError::Shape(format!(
                        "rank {} holds {} columns, earlier ranks hold {}",
                        rank, c, expected
                    )));
                }
                Some(_) => {}
            }
        }
        let n = n.unwrap_or_else(|| cols.iter().copied().max().unwrap_or(0));
        if local.rows() == 0 && local.cols() != n {
            local = DenseMatrix::zeros(0, n);
        }

        let partition = RowPartition::from_counts(counts);
        tracing::debug!(
            m = partition.total_rows(),
            n,
            row_ranges = ?partition.row_ranges(),
            "derived row partition"
        );

        Ok(Self {
            comm,
            strategy,
            m: partition.total_rows(),
            n,
            rank: comm.rank(),
            num_ranks: comm.num_ranks(),
            local,
            partition,
        })
    }

    /// Split a full matrix evenly across the group.
    ///
    /// Each rank cuts its own slice out of `full`, so `full` must be the
    /// same matrix on every rank. A matrix held only by one rank has to go
    /// through `broadcast_matrix` first; ranks passing different shapes
    /// all get `Protocol`. Collective.
    pub fn split(comm: &'c dyn CommunicationBackend, full: &DenseMatrix) -> Result<Self> {
        Self::split_with(comm, full, Arc::new(EvenSplit))
    }

    /// Split a full matrix using `strategy`.
    pub fn split_with(
        comm: &'c dyn CommunicationBackend,
        full: &DenseMatrix,
        strategy: Arc<dyn PartitionStrategy>,
    ) -> Result<Self> {
        let m = agree_usize(comm, full.rows(), "source matrix rows")?;
        let n = agree_usize(comm, full.cols(), "source matrix columns")?;
        let counts = strategy.row_counts(m, comm.num_ranks())?;
        check_counts(&counts, m, comm.num_ranks())?;
        let planned = RowPartition::from_counts(counts);
        let rank = comm.rank();
        let block = full.get_block(planned.offset(rank), 0, planned.count(rank), n);
        let split = Self::from_local_with(comm, block, strategy)?;
        if split.rows() != m {
            return Err(RowBlockError::Protocol(format!(
                "split of {} rows produced {} rows across ranks",
                m,
                split.rows()
            )));
        }
        Ok(split)
    }

    /// Replicate a whole matrix from `root` to every rank.
    ///
    /// Broadcasts the shape first so non-root ranks can allocate, then the
    /// raw row-major buffer. This replicates rather than partitions.
    /// Collective.
    pub fn broadcast_matrix(
        comm: &dyn CommunicationBackend,
        matrix: &mut DenseMatrix,
        root: usize,
    ) -> Result<()> {
        let _span = tracing::debug_span!("broadcast_matrix", rank = comm.rank(), root).entered();
        let mut shape = [matrix.rows(), matrix.cols()];
        comm.broadcast_usize(&mut shape, root)?;
        if comm.rank() != root && (matrix.rows(), matrix.cols()) != (shape[0], shape[1]) {
            matrix.resize(shape[0], shape[1])?;
        }
        comm.broadcast(matrix.as_mut_slice(), root)
    }

    /// Global row count. Local read.
    pub fn rows(&self) -> usize {
        self.m
    }

    /// Global column count. Local read.
    pub fn cols(&self) -> usize {
        self.n
    }

    /// Rows owned by this rank.
    pub fn local_rows(&self) -> usize {
        self.local.rows()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    pub fn partition(&self) -> &RowPartition {
        &self.partition
    }

    /// This rank's row block.
    pub fn local(&self) -> &DenseMatrix {
        &self.local
    }

    /// Mutable view of this rank's block values. The shape is fixed; use
    /// `resize` to change it.
    pub fn local_values_mut(&mut self) -> &mut [f64] {
        self.local.as_mut_slice()
    }

    pub fn into_local(self) -> DenseMatrix {
        self.local
    }

    fn check_index(&self, i: usize, j: usize) -> Result<()> {
        if i >= self.m || j >= self.n {
            return Err(RowBlockError::IndexOutOfBounds {
                row: i,
                col: j,
                rows: self.m,
                cols: self.n,
            });
        }
        Ok(())
    }

    fn owner_of(&self, i: usize) -> Result<usize> {
        self.partition.owner_of(i).ok_or_else(|| {
            RowBlockError::Partition(format!("no rank owns row {} of {}", i, self.m))
        })
    }

    /// Read global entry (i, j). Collective: the owner broadcasts it.
    pub fn at(&self, i: usize, j: usize) -> Result<f64> {
        self.check_index(i, j)?;
        let owner = self.owner_of(i)?;
        let mut value = [0.0];
        if self.rank == owner {
            value[0] = self.local[(i - self.partition.offset(owner), j)];
        }
        self.comm.broadcast(&mut value, owner)?;
        tracing::trace!(i, j, owner, value = value[0], "element read");
        Ok(value[0])
    }

    /// Write global entry (i, j).
    ///
    /// Every rank calls this with the same arguments; only the owner
    /// stores the value. No communication is needed because all ranks
    /// already hold `value`.
    pub fn assign(&mut self, i: usize, j: usize, value: f64) -> Result<()> {
        self.check_index(i, j)?;
        let owner = self.owner_of(i)?;
        if self.rank == owner {
            let local_row = i - self.partition.offset(owner);
            self.local[(local_row, j)] = value;
        }
        Ok(())
    }

    /// w = A v, replicated on every rank. `v` (length n) must be the same everywhere.
    pub fn multiply(&self, v: &[f64]) -> Result<Vec<f64>> {
        if v.len() != self.n {
            return Err(RowBlockError::Shape(format!(
                "multiply: vector length {} does not match {} columns",
                v.len(),
                self.n
            )));
        }
        let _span =
            tracing::debug_span!("distributed_multiply", rank = self.rank, m = self.m, n = self.n)
                .entered();
        let w_local = self.local.multiply(v);
        assemble_and_broadcast(self.comm, &self.partition, &w_local)
    }

    /// w = Aᵀ v, replicated on every rank. `v` (length m) must be the same everywhere;
    /// each rank only reads its own rows' entries.
    pub fn transpose_multiply(&self, v: &[f64]) -> Result<Vec<f64>> {
        if v.len() != self.m {
            return Err(RowBlockError::Shape(format!(
                "transpose_multiply: vector length {} does not match {} rows",
                v.len(),
                self.m
            )));
        }
        let _span = tracing::debug_span!(
            "distributed_transpose_multiply",
            rank = self.rank,
            m = self.m,
            n = self.n
        )
        .entered();
        let w_local = self.local.transpose_multiply_block(
            v,
            self.partition.offset(self.rank),
            self.partition.count(self.rank),
        );
        reduce_sum(self.comm, &w_local)
    }

    /// Reshape to m×n with a fresh partition from this matrix's strategy.
    ///
    /// Existing contents are discarded; the new block is zero-filled. The
    /// block is allocated before any communication. Ranks requesting
    /// different shapes all get `Protocol` and keep their old contents.
    /// Collective.
    pub fn resize(&mut self, m: usize, n: usize) -> Result<()> {
        let _span = tracing::debug_span!("resize", rank = self.rank, m, n).entered();
        let counts = self.strategy.row_counts(m, self.num_ranks)?;
        check_counts(&counts, m, self.num_ranks)?;
        let local = DenseMatrix::try_zeros(counts[self.rank], n)?;

        agree_usize(self.comm, m, "resize rows")?;
        agree_usize(self.comm, n, "resize columns")?;
        let gathered = gather_row_counts(self.comm, local.rows())?;
        let partition = RowPartition::from_counts(gathered);
        if partition.total_rows() != m {
            return Err(RowBlockError::Protocol(format!(
                "resize to {} rows on rank {}, but ranks hold {} rows in total",
                m,
                self.rank,
                partition.total_rows()
            )));
        }

        self.m = m;
        self.n = n;
        self.local = local;
        self.partition = partition;
        Ok(())
    }

    /// Reassemble the full matrix on every rank. Collective.
    pub fn gather(&self) -> Result<DenseMatrix> {
        let _span = tracing::debug_span!("gather", rank = self.rank, m = self.m, n = self.n).entered();
        let mut full = DenseMatrix::try_zeros(self.m, self.n)?;
        let n = self.n;
        let own = self.partition.range(self.rank);
        full.as_mut_slice()[own.start * n..own.end * n].copy_from_slice(self.local.as_slice());
        for owner in 0..self.num_ranks {
            let range = self.partition.range(owner);
            if range.is_empty() || n == 0 {
                continue;
            }
            self.comm
                .broadcast(&mut full.as_mut_slice()[range.start * n..range.end * n], owner)?;
        }
        Ok(full)
    }
}

fn check_counts(counts: &[usize], total_rows: usize, num_ranks: usize) -> Result<()> {
    if counts.len() != num_ranks || counts.iter().sum::<usize>() != total_rows {
        return Err(RowBlockError::Partition(format!(
            "strategy returned {:?} for {} rows over {} ranks",
            counts, total_rows, num_ranks
        )));
    }
    Ok(())
}

impl std::fmt::Debug for DistributedMatrix<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedMatrix")
            .field("m", &self.m)
            .field("n", &self.n)
            .field("rank", &self.rank)
            .field("num_ranks", &self.num_ranks)
            .field("partition", &self.partition)
            .finish_non_exhaustive()
    }
}
