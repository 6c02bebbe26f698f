//! memtable-bench: generate workloads, replay them against the engine and
//! compare write buffer strategies.

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memtable_bench::bench::{self, BenchPlan, RunOptions, Sweep, SweepParam};
use memtable_bench::workload::{self, WorkloadSpec};
use memtable_bench::BufferKind;

#[derive(Parser, Debug)]
#[command(name = "memtable-bench", about = "Compare LSM write buffer implementations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a workload file
    Gen(GenArgs),
    /// Replay a workload file and print the timing log to stdout
    Run(RunArgs),
    /// Run the default plan, or a plan file, for every selected implementation
    Bench(BenchArgs),
    /// Aggregate existing result logs into comparison tables
    Report(ReportArgs),
}

#[derive(Args, Debug)]
struct GenArgs {
    /// Inserts
    #[arg(short = 'I', default_value_t = 0)]
    inserts: u64,
    /// Updates
    #[arg(short = 'U', default_value_t = 0)]
    updates: u64,
    /// Point queries
    #[arg(short = 'Q', default_value_t = 0)]
    point_queries: u64,
    /// Range queries
    #[arg(short = 'S', default_value_t = 0)]
    range_queries: u64,
    /// Range query selectivity
    #[arg(short = 'Y', default_value_t = 0.0)]
    selectivity: f64,
    /// Entry size in bytes
    #[arg(short = 'E', default_value_t = 64)]
    entry_size: usize,
    /// Point deletes
    #[arg(short = 'D', default_value_t = 0)]
    deletes: u64,
    /// Range deletes, covering as many keys as a range query
    #[arg(short = 'R', default_value_t = 0)]
    range_deletes: u64,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(short = 'o', long, default_value = "workload.txt")]
    output: PathBuf,
}

impl GenArgs {
    fn spec(&self) -> WorkloadSpec {
        let mut spec = WorkloadSpec::new(self.inserts)
            .updates(self.updates)
            .point_queries(self.point_queries)
            .range_queries(self.range_queries, self.selectivity)
            .deletes(self.deletes)
            .range_deletes(self.range_deletes)
            .entry_size(self.entry_size);
        if let Some(seed) = self.seed {
            spec = spec.seed(seed);
        }
        spec
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Buffer implementation: 1 skiplist, 2 vector, 3 hash skip list,
    /// 4 hash linked list, 5 unsorted vector, 6 linked list
    #[arg(short = 'm', long = "memtable_factory", default_value = "1")]
    memtable_factory: BufferKind,
    /// Entry size in bytes
    #[arg(short = 'E', long = "entry_size", default_value_t = 64)]
    entry_size: usize,
    /// Entries per page
    #[arg(short = 'B', long = "entries_per_page", default_value_t = 64)]
    entries_per_page: usize,
    /// Buffer size in pages
    #[arg(short = 'P', long = "buffer_size_in_pages", default_value_t = 4096)]
    buffer_size_in_pages: usize,
    /// Buffer size in bytes, overrides the page geometry
    #[arg(short = 'M', long = "memory_size")]
    buffer_size: Option<usize>,
    /// Size ratio between levels
    #[arg(short = 'T', long = "size_ratio", default_value_t = 10)]
    size_ratio: usize,
    /// Key prefix length for the hash buffers
    #[arg(short = 'l', long = "prefix_length", default_value_t = 0)]
    prefix_length: usize,
    #[arg(long = "bucket_count", default_value_t = 50_000)]
    bucket_count: usize,
    #[arg(long = "threshold_use_skiplist", default_value_t = 256)]
    threshold_use_skiplist: usize,
    /// Entries preallocated by the vector buffers
    #[arg(short = 'A', long = "preallocation_size", default_value_t = 0)]
    preallocation: usize,
    /// Destroy and recreate the database (0 or 1)
    #[arg(short = 'd', long = "destroy", default_value_t = 1)]
    destroy: u8,
    /// Print engine statistics after the summary (0 or 1)
    #[arg(long = "stat", default_value_t = 0)]
    stat: u8,
    #[arg(long, default_value = "workload.txt")]
    workload: PathBuf,
    #[arg(long, default_value = "db")]
    db: PathBuf,
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            entry_size: self.entry_size,
            entries_per_page: self.entries_per_page,
            buffer_size_in_pages: self.buffer_size_in_pages,
            buffer_size: self.buffer_size,
            size_ratio: self.size_ratio,
            prefix_length: self.prefix_length,
            bucket_count: self.bucket_count,
            threshold_use_skiplist: self.threshold_use_skiplist,
            preallocation: self.preallocation,
            destroy_db: self.destroy != 0,
            print_stats: self.stat != 0,
            profile: true,
        }
    }
}

#[derive(Args, Debug)]
struct BenchArgs {
    #[arg(long, default_value = "result")]
    result_dir: PathBuf,
    /// JSON plan file replacing the default plan
    #[arg(long)]
    plan: Option<PathBuf>,
    /// Implementations to run, by id or name (default: all, or the plan's)
    #[arg(long = "impl")]
    implementations: Vec<BufferKind>,
    /// Size ratios to sweep, one experiment each
    #[arg(long, value_delimiter = ',')]
    sweep_size_ratio: Vec<usize>,
    /// Prefix lengths to sweep
    #[arg(long, value_delimiter = ',')]
    sweep_prefix_length: Vec<usize>,
    /// Bucket counts to sweep
    #[arg(long, value_delimiter = ',')]
    sweep_bucket_count: Vec<usize>,
    /// Entry sizes to sweep
    #[arg(long, value_delimiter = ',')]
    sweep_entry_size: Vec<usize>,
    /// Buffer sizes in pages to sweep
    #[arg(long, value_delimiter = ',')]
    sweep_pages: Vec<usize>,
    /// Skip writing the comparison tables afterwards
    #[arg(long)]
    no_report: bool,
}

impl BenchArgs {
    fn plan(&self) -> memtable_bench::Result<BenchPlan> {
        let mut plan = match &self.plan {
            Some(path) => BenchPlan::from_file(path)?,
            None => BenchPlan::default(),
        };
        if !self.implementations.is_empty() {
            plan = plan.with_implementations(self.implementations.clone());
        }
        let sweeps = [
            (SweepParam::SizeRatio, &self.sweep_size_ratio),
            (SweepParam::PrefixLength, &self.sweep_prefix_length),
            (SweepParam::BucketCount, &self.sweep_bucket_count),
            (SweepParam::EntrySize, &self.sweep_entry_size),
            (SweepParam::Pages, &self.sweep_pages),
        ];
        for (param, values) in sweeps {
            if !values.is_empty() {
                plan = plan.with_sweep(Sweep::new(param, values.clone()));
            }
        }
        Ok(plan)
    }
}

#[derive(Args, Debug)]
struct ReportArgs {
    #[arg(long, default_value = "result")]
    result_dir: PathBuf,
    /// Implementations to include, by id or name (default: all)
    #[arg(long = "impl")]
    implementations: Vec<BufferKind>,
}

fn selected(implementations: &[BufferKind]) -> Vec<BufferKind> {
    if implementations.is_empty() {
        BufferKind::ALL.to_vec()
    } else {
        implementations.to_vec()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the timing log, so diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Gen(args) => {
            let spec = args.spec();
            let ops = workload::generate(&spec)?;
            workload::write_workload(&args.output, &ops)?;
            tracing::info!(
                workload = %spec.name(),
                operations = ops.len(),
                path = %args.output.display(),
                "Generated workload"
            );
        }
        Command::Run(args) => {
            let ops = workload::read_workload(&args.workload)?;
            let report = bench::run_once(args.memtable_factory, &ops, &args.options(), &args.db)?;
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            report.write_log(&mut out)?;
            out.flush()?;
        }
        Command::Bench(args) => {
            let plan = args.plan()?;
            for experiment in bench::run_experiments(&plan, &args.result_dir)? {
                let outcome = &experiment.outcome;
                for skipped in &outcome.skipped {
                    tracing::error!(
                        experiment = %experiment.name,
                        implementation = %skipped.implementation,
                        workload = %skipped.workload,
                        reason = %skipped.reason,
                        "No log produced"
                    );
                }
                if !args.no_report {
                    bench::write_report(&experiment.dir, plan.implementations())?;
                }
                tracing::info!(
                    experiment = %experiment.name,
                    logs = outcome.logs.len(),
                    skipped = outcome.skipped.len(),
                    "Execution completed"
                );
            }
        }
        Command::Report(args) => {
            let report = bench::write_report(&args.result_dir, &selected(&args.implementations))?;
            if !report.missing.is_empty() {
                tracing::warn!(
                    missing = report.missing.len(),
                    "Some points were missing and charted as zero"
                );
            }
        }
    }
    Ok(())
}
