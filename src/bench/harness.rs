use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::plan::{BenchPlan, RunOptions};
use super::report::log_path;
use super::runner::{replay, RunReport};
use crate::engine::Engine;
use crate::error::Result;
use crate::memtable::BufferKind;
use crate::workload::{generate, read_workload, write_workload, Operation};

pub const WORKLOAD_FILE: &str = "workload.txt";
const DB_DIR: &str = "db";

/// A (implementation, workload) pair that produced no log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Skipped {
    pub implementation: String,
    pub workload: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Outcome {
    /// Logs written, in run order.
    pub logs: Vec<PathBuf>,
    pub skipped: Vec<Skipped>,
}

/// The result of one experiment of a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentOutcome {
    pub name: String,
    /// Root of the experiment's result tree.
    pub dir: PathBuf,
    pub outcome: Outcome,
}

/// Replays `ops` on a fresh engine of `kind` whose files live in `db_dir`.
pub fn run_once(
    kind: BufferKind,
    ops: &[Operation],
    options: &RunOptions,
    db_dir: &Path,
) -> Result<RunReport> {
    let engine = Engine::open(options.engine_config(kind, db_dir)?)?;
    replay(&engine, ops, options.print_stats)
}

/// Runs every workload of `plan` against every implementation and writes
/// `result_dir/<implementation>/<workload>/<workload>.log`.
///
/// A failing pair is logged and recorded in [`Outcome::skipped`]; the
/// remaining pairs still run.
pub fn run_plan(plan: &BenchPlan, result_dir: &Path) -> Result<Outcome> {
    fs::create_dir_all(result_dir)?;
    let mut outcome = Outcome::default();
    let staged = result_dir.join(WORKLOAD_FILE);

    for spec in plan.workloads() {
        let workload = spec.name();
        tracing::info!(%workload, "Generating workload");

        // The staged file is what every implementation replays.
        let staged_ops = generate(spec)
            .and_then(|ops| write_workload(&staged, &ops))
            .and_then(|()| read_workload(&staged));
        let ops = match staged_ops {
            Ok(ops) => ops,
            Err(e) => {
                tracing::error!(%workload, error = %e, "Failed to stage workload");
                for &kind in plan.implementations() {
                    outcome.skipped.push(Skipped {
                        implementation: kind.name().to_string(),
                        workload: workload.clone(),
                        reason: e.to_string(),
                    });
                }
                continue;
            }
        };

        for &kind in plan.implementations() {
            tracing::info!(%workload, implementation = %kind, "Running workload");
            match run_pair(kind, &workload, &ops, plan.run_options(), &staged, result_dir) {
                Ok(log) => outcome.logs.push(log),
                Err(e) => {
                    tracing::error!(
                        %workload,
                        implementation = %kind,
                        error = %e,
                        "Benchmark failed, skipping"
                    );
                    outcome.skipped.push(Skipped {
                        implementation: kind.name().to_string(),
                        workload: workload.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = fs::remove_file(&staged) {
            tracing::warn!(path = %staged.display(), error = %e, "Failed to remove staged workload");
        }
    }
    Ok(outcome)
}

/// Runs every experiment of `plan` into `result_dir/<experiment>/`. A plan
/// without sweeps writes straight into `result_dir`.
pub fn run_experiments(plan: &BenchPlan, result_dir: &Path) -> Result<Vec<ExperimentOutcome>> {
    let mut outcomes = Vec::new();
    for experiment in plan.experiments() {
        let dir = if experiment.name.is_empty() {
            result_dir.to_path_buf()
        } else {
            result_dir.join(&experiment.name)
        };
        tracing::info!(experiment = %experiment.name, dir = %dir.display(), "Running experiment");
        let outcome = run_plan(&experiment.plan, &dir)?;
        outcomes.push(ExperimentOutcome {
            name: experiment.name,
            dir,
            outcome,
        });
    }
    Ok(outcomes)
}

fn run_pair(
    kind: BufferKind,
    workload: &str,
    ops: &[Operation],
    options: &RunOptions,
    staged: &Path,
    result_dir: &Path,
) -> Result<PathBuf> {
    let log = log_path(result_dir, kind, workload);
    let dir = log
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| result_dir.to_path_buf());
    fs::create_dir_all(&dir)?;
    fs::copy(staged, dir.join(WORKLOAD_FILE))?;

    let db_dir = dir.join(DB_DIR);
    let result = run_once(kind, ops, options, &db_dir);
    remove_db(&db_dir);

    let report = result?;
    fs::write(&log, report.to_log())?;
    Ok(log)
}

fn remove_db(db_dir: &Path) {
    if !db_dir.exists() {
        return;
    }
    match fs::remove_dir_all(db_dir) {
        Ok(()) => tracing::debug!(dir = %db_dir.display(), "Deleted db folder"),
        Err(e) => tracing::error!(dir = %db_dir.display(), error = %e, "Failed to delete db folder"),
    }
}
