//! Performance statistics collection for `--stats` output.

use std::time::{Duration, Instant};

/// Collects phase timings and collective counters.
///
/// Created when `--stats` is passed, threaded as `Option<&mut Stats>`.
/// Zero cost when `None`: no timing calls, no counter reads.
pub struct Stats {
    total_start: Instant,
    phases: Vec<(&'static str, Duration)>,
    /// Collective calls issued (read from `SequencedComm`).
    pub collective_calls: u64,
    /// Payload elements passed to collectives.
    pub collective_elements: u64,
    pub ranks: usize,
    /// Rows owned by every rank in rank order, not just this rank's block.
    pub rows_per_rank: Vec<usize>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            phases: Vec::new(),
            collective_calls: 0,
            collective_elements: 0,
            ranks: 0,
            rows_per_rank: Vec::new(),
        }
    }

    /// Record a completed phase with its duration.
    pub fn add_phase(&mut self, name: &'static str, duration: Duration) {
        self.phases.push((name, duration));
    }

    /// Time `f` and record it as phase `name`.
    pub fn time<T>(stats: Option<&mut Stats>, name: &'static str, f: impl FnOnce() -> T) -> T {
        match stats {
            Some(s) => {
                let start = Instant::now();
                let out = f();
                s.add_phase(name, start.elapsed());
                out
            }
            None => f(),
        }
    }

    pub fn phases(&self) -> &[(&'static str, Duration)] {
        &self.phases
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== rowblock Performance Stats ===");

        for (name, dur) in &self.phases {
            eprintln!("  {:<24} {:>8.3}s", name, dur.as_secs_f64());
        }

        if self.ranks > 0 {
            let rows: Vec<String> = self.rows_per_rank.iter().map(|r| r.to_string()).collect();
            eprintln!("  Ranks:                  {}", self.ranks);
            eprintln!("  Rows per rank:          {}", rows.join(" / "));
        }

        eprintln!("  ─────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
        eprintln!("  Collective calls:       {}", self.collective_calls);
        eprintln!("  Collective elements:    {}", self.collective_elements);
    }
}
