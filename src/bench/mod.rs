//! The benchmark harness: replay workloads against every buffer strategy,
//! keep one timing log per (implementation, workload) and aggregate the logs
//! into comparison tables.

pub mod harness;
pub mod logparse;
pub mod plan;
pub mod report;
pub mod runner;

pub use harness::{run_experiments, run_once, run_plan, ExperimentOutcome, Outcome, Skipped};
pub use logparse::{parse_events, parse_summary, EventLog, ParseWarning, ParsedLog, Summary};
pub use plan::{BenchPlan, Experiment, RunOptions, Sweep, SweepParam};
pub use report::{build_report, collect_results, write_report, MissingPoint, Report, Table};
pub use runner::{replay, RunReport, Totals};
