use clap::Parser;
use rowblock::dense::DenseMatrix;
use rowblock::distributed::{
    run_spmd, CommunicationBackend, DistributedMatrix, PartitionStrategy, RowPartition,
    SequencedComm, WeightedSplit,
};
use rowblock::error::{Result, RowBlockError};
use rowblock::output;
use rowblock::stats::Stats;
use std::io;
use std::sync::Arc;

/// Row-block distributed matrix-vector products over an SPMD group
#[derive(Parser)]
#[command(name = "rowblock", version)]
struct Cli {
    /// Number of in-process ranks to simulate
    #[arg(long, default_value_t = 4)]
    ranks: usize,

    /// Global row count of the test matrix
    #[arg(long, default_value_t = 10)]
    rows: usize,

    /// Global column count of the test matrix
    #[arg(long, default_value_t = 3)]
    cols: usize,

    /// Per-rank partition weights, comma separated (default: even split)
    #[arg(long, value_delimiter = ',')]
    weights: Option<Vec<f64>>,

    /// Also read element I,J collectively
    #[arg(long, value_delimiter = ',', value_name = "I,J")]
    at: Option<Vec<usize>>,

    /// Also compute the transpose product with a vector of ones
    #[arg(long)]
    transpose: bool,

    /// Run under MPI instead of simulated ranks (requires `distributed` feature)
    #[arg(long)]
    mpi: bool,

    /// Print performance stats to stderr
    #[arg(long)]
    stats: bool,
}

/// What one rank computed.
struct RankReport {
    partition: RowPartition,
    product: Vec<f64>,
    transpose_product: Option<Vec<f64>>,
    element: Option<f64>,
    stats: Option<Stats>,
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let report = if cli.mpi {
        run_mpi(&cli)
    } else {
        run_threaded(&cli)
    }
    .unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });

    // Only rank 0 (or the single simulated report) writes.
    let Some(report) = report else {
        return;
    };

    let mut stdout = io::stdout();
    write_report(&report, &mut stdout).unwrap_or_else(|e| {
        eprintln!("Output error: {}", e);
        std::process::exit(1);
    });

    if let Some(ref stats) = report.stats {
        stats.display();
    }
}

fn strategy(cli: &Cli) -> Result<Option<Arc<dyn PartitionStrategy>>> {
    match &cli.weights {
        Some(w) => Ok(Some(Arc::new(WeightedSplit::new(w.clone())?))),
        None => Ok(None),
    }
}

/// Matrix with entry (i, j) = i * cols + j, the same on every rank.
fn test_matrix(rows: usize, cols: usize) -> DenseMatrix {
    DenseMatrix::from_fn(rows, cols, |i, j| (i * cols + j) as f64)
}

/// The SPMD body every rank runs.
fn run_rank<C: CommunicationBackend>(comm: &SequencedComm<C>, cli: &Cli) -> Result<RankReport> {
    let mut stats = cli.stats.then(Stats::new);
    let full = test_matrix(cli.rows, cli.cols);

    let strategy = strategy(cli)?;
    let a = Stats::time(stats.as_mut(), "split", || match strategy {
        Some(s) => DistributedMatrix::split_with(comm, &full, s),
        None => DistributedMatrix::split(comm, &full),
    })?;

    let ones_n = vec![1.0; a.cols()];
    let product = Stats::time(stats.as_mut(), "multiply", || a.multiply(&ones_n))?;

    let transpose_product = if cli.transpose {
        let ones_m = vec![1.0; a.rows()];
        Some(Stats::time(stats.as_mut(), "transpose_multiply", || {
            a.transpose_multiply(&ones_m)
        })?)
    } else {
        None
    };

    let element = match cli.at.as_deref() {
        Some(&[i, j]) => Some(Stats::time(stats.as_mut(), "element_read", || a.at(i, j))?),
        Some(other) => {
            return Err(RowBlockError::Shape(format!(
                "--at expects two indices, got {}",
                other.len()
            )))
        }
        None => None,
    };

    if let Some(ref mut s) = stats {
        s.collective_calls = comm.calls();
        s.collective_elements = comm.elements();
        s.ranks = a.num_ranks();
        s.rows_per_rank = a.partition().row_ranges().to_vec();
    }

    Ok(RankReport {
        partition: a.partition().clone(),
        product,
        transpose_product,
        element,
        stats,
    })
}

fn run_threaded(cli: &Cli) -> Result<Option<RankReport>> {
    if cli.ranks == 0 {
        return Err(RowBlockError::Partition("--ranks must be at least 1".into()));
    }
    let reports = run_spmd(cli.ranks, |comm| run_rank(&SequencedComm::new(comm), cli));
    let mut reports = reports.into_iter().collect::<Result<Vec<_>>>()?;

    // Every rank must hold the same replicated results.
    for (rank, r) in reports.iter().enumerate().skip(1) {
        if r.product != reports[0].product
            || r.transpose_product != reports[0].transpose_product
            || r.element != reports[0].element
        {
            return Err(RowBlockError::Protocol(format!(
                "rank {} disagrees with rank 0 on replicated results",
                rank
            )));
        }
    }
    Ok(Some(reports.swap_remove(0)))
}

#[cfg(feature = "distributed")]
fn run_mpi(cli: &Cli) -> Result<Option<RankReport>> {
    use rowblock::distributed::comm_mpi::MpiComm;

    let _universe = mpi::initialize()
        .ok_or_else(|| RowBlockError::Transport("MPI already initialized".into()))?;
    let comm = SequencedComm::new(MpiComm::new());
    let report = run_rank(&comm, cli)?;
    Ok((comm.rank() == 0).then_some(report))
}

#[cfg(not(feature = "distributed"))]
fn run_mpi(_cli: &Cli) -> Result<Option<RankReport>> {
    Err(RowBlockError::Transport(
        "built without the `distributed` feature; rebuild with --features distributed".into(),
    ))
}

fn write_report<W: io::Write>(report: &RankReport, writer: &mut W) -> Result<()> {
    output::write_partition_csv(&report.partition, writer)?;
    writeln!(writer)?;
    output::write_vector_csv(&report.product, writer)?;
    if let Some(ref t) = report.transpose_product {
        writeln!(writer)?;
        output::write_vector_csv(t, writer)?;
    }
    if let Some(v) = report.element {
        writeln!(writer)?;
        writeln!(writer, "Element,{}", v)?;
    }
    Ok(())
}
