//! Aggregates result logs into comparison tables.
//!
//! For every summary operation a `<operation>_comparison.csv` holds one row per
//! workload and one column per implementation. `mean_query_latency.csv` holds
//! the mean per-event point and range query latency. A value that is missing
//! for some (implementation, workload, operation) is written as zero and
//! reported as a [`MissingPoint`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::logparse::{parse_log_file, ParsedLog};
use super::runner::SUMMARY_NAMES;
use crate::error::Result;
use crate::memtable::BufferKind;
use crate::metrics::Label;

pub const MEAN_LATENCY_FILE: &str = "mean_query_latency.csv";
pub const SUMMARY_FILE: &str = "summary.json";

/// Labels whose per-event means go into the latency table.
pub const LATENCY_LABELS: [Label; 2] = [Label::PointQuery, Label::RangeQuery];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct MissingPoint {
    pub implementation: String,
    pub workload: String,
    pub operation: String,
}

impl fmt::Display for MissingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Time not found for operation '{}' in workload '{}' for implementation '{}'",
            self.operation, self.workload, self.implementation
        )
    }
}

/// Parsed logs found under a result directory, by implementation then
/// workload name.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub implementations: Vec<BufferKind>,
    pub logs: BTreeMap<String, BTreeMap<String, ParsedLog>>,
}

impl ResultSet {
    /// Every workload seen for any implementation, sorted.
    pub fn workloads(&self) -> Vec<String> {
        let all: BTreeSet<&String> = self.logs.values().flat_map(|w| w.keys()).collect();
        all.into_iter().cloned().collect()
    }

    fn log(&self, implementation: &str, workload: &str) -> Option<&ParsedLog> {
        self.logs.get(implementation)?.get(workload)
    }
}

/// The path of one result log.
pub fn log_path(result_dir: &Path, implementation: BufferKind, workload: &str) -> PathBuf {
    result_dir
        .join(implementation.name())
        .join(workload)
        .join(format!("{}.log", workload))
}

/// Reads `result/<implementation>/<workload>/<workload>.log` for each
/// implementation. Missing or unreadable directories and logs are logged and
/// skipped, so their points end up as [`MissingPoint`]s.
pub fn collect_results(result_dir: &Path, implementations: &[BufferKind]) -> Result<ResultSet> {
    let mut set = ResultSet {
        implementations: implementations.to_vec(),
        logs: BTreeMap::new(),
    };
    for &kind in implementations {
        let logs = set.logs.entry(kind.name().to_string()).or_default();
        let impl_dir = result_dir.join(kind.name());
        let dirents = match fs::read_dir(&impl_dir) {
            Ok(dirents) => dirents,
            Err(e) => {
                tracing::error!(dir = %impl_dir.display(), error = %e, "No results for implementation");
                continue;
            }
        };
        for dirent in dirents {
            let path = match dirent {
                Ok(dirent) => dirent.path(),
                Err(e) => {
                    tracing::error!(dir = %impl_dir.display(), error = %e, "Failed to list results");
                    continue;
                }
            };
            if !path.is_dir() {
                tracing::warn!(path = %path.display(), "Not a directory");
                continue;
            }
            let Some(workload) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let log = log_path(result_dir, kind, workload);
            if !log.exists() {
                tracing::error!(path = %log.display(), "Log file not found");
                continue;
            }
            match parse_log_file(&log, &Label::ALL) {
                Ok(parsed) => {
                    logs.insert(workload.to_string(), parsed);
                }
                Err(e) => tracing::error!(path = %log.display(), error = %e, "Failed to read log"),
            }
        }
    }
    Ok(set)
}

/// One value per (workload, implementation).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub implementations: Vec<String>,
    pub workloads: Vec<String>,
    /// `values[w][i]` belongs to `workloads[w]` and `implementations[i]`.
    pub values: Vec<Vec<f64>>,
}

impl Table {
    pub fn write_csv(&self, out: &mut impl Write) -> std::io::Result<()> {
        writeln!(out, "workload,{}", self.implementations.join(","))?;
        for (workload, row) in self.workloads.iter().zip(&self.values) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(out, "{},{}", workload, cells.join(","))?;
        }
        Ok(())
    }

    pub fn value(&self, workload: &str, implementation: &str) -> Option<f64> {
        let w = self.workloads.iter().position(|n| n == workload)?;
        let i = self.implementations.iter().position(|n| n == implementation)?;
        Some(self.values[w][i])
    }
}

/// Builds a table, substituting zero for each point `lookup` cannot find.
fn build_table(
    set: &ResultSet,
    name: &str,
    operation: &str,
    missing: &mut Vec<MissingPoint>,
    lookup: impl Fn(&ParsedLog) -> Option<f64>,
) -> Table {
    let workloads = set.workloads();
    let implementations: Vec<String> = set
        .implementations
        .iter()
        .map(|k| k.name().to_string())
        .collect();

    let mut values = Vec::with_capacity(workloads.len());
    for workload in &workloads {
        let mut row = Vec::with_capacity(implementations.len());
        for implementation in &implementations {
            match set.log(implementation, workload).and_then(&lookup) {
                Some(value) => row.push(value),
                None => {
                    let point = MissingPoint {
                        implementation: implementation.clone(),
                        workload: workload.clone(),
                        operation: operation.to_string(),
                    };
                    tracing::warn!(
                        implementation = %point.implementation,
                        workload = %point.workload,
                        operation = %point.operation,
                        "{}", point
                    );
                    missing.push(point);
                    row.push(0.0);
                }
            }
        }
        values.push(row);
    }

    Table {
        name: name.to_string(),
        implementations,
        workloads,
        values,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub comparisons: Vec<Table>,
    pub mean_latency: Vec<Table>,
    pub missing: Vec<MissingPoint>,
}

impl Report {
    pub fn comparison(&self, operation: &str) -> Option<&Table> {
        self.comparisons.iter().find(|t| t.name == operation)
    }
}

pub fn build_report(set: &ResultSet) -> Report {
    let mut missing = Vec::new();
    let comparisons = SUMMARY_NAMES
        .iter()
        .map(|&op| {
            build_table(set, op, op, &mut missing, |log| {
                log.summary.totals.get(op).copied()
            })
        })
        .collect();
    let mean_latency = LATENCY_LABELS
        .iter()
        .map(|&label| {
            build_table(set, label.as_str(), label.as_str(), &mut missing, |log| {
                log.events.mean(label)
            })
        })
        .collect();

    Report {
        comparisons,
        mean_latency,
        missing,
    }
}

/// File name of a comparison table, e.g. `range_queries_comparison.csv`.
pub fn comparison_file(operation: &str) -> String {
    format!("{}_comparison.csv", operation.replace([' ', '/'], "_"))
}

/// Collects the logs under `result_dir` and writes every table plus
/// `summary.json` next to them.
pub fn write_report(result_dir: &Path, implementations: &[BufferKind]) -> Result<Report> {
    let set = collect_results(result_dir, implementations)?;
    let report = build_report(&set);

    for table in &report.comparisons {
        let mut file = fs::File::create(result_dir.join(comparison_file(&table.name)))?;
        table.write_csv(&mut file)?;
    }

    // Mean latency: one section per label, workloads as rows.
    let mut file = fs::File::create(result_dir.join(MEAN_LATENCY_FILE))?;
    for (i, table) in report.mean_latency.iter().enumerate() {
        if i > 0 {
            writeln!(file)?;
        }
        writeln!(file, "# {}", table.name)?;
        table.write_csv(&mut file)?;
    }

    fs::write(
        result_dir.join(SUMMARY_FILE),
        serde_json::to_string_pretty(&report)?,
    )?;

    tracing::info!(
        dir = %result_dir.display(),
        workloads = set.workloads().len(),
        missing = report.missing.len(),
        "Wrote report"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_log(dir: &Path, kind: BufferKind, workload: &str, body: &str) {
        let path = log_path(dir, kind, workload);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_missing_log_becomes_zero_point() {
        let dir = tempdir().unwrap();
        let body = "PointQueryTime: 40 ns\nPointQueryTime: 60 ns\n\n\
                    Total time taken by workload = 500 ns\nTotal time taken by inserts = 300 ns\n";
        write_log(dir.path(), BufferKind::SkipList, "w1", body);
        write_log(dir.path(), BufferKind::SkipList, "w2", body);
        write_log(dir.path(), BufferKind::Vector, "w1", body);

        let set = collect_results(dir.path(), &[BufferKind::SkipList, BufferKind::Vector]).unwrap();
        let report = build_report(&set);

        let workload = report.comparison("workload").unwrap();
        assert_eq!(workload.workloads, vec!["w1", "w2"]);
        assert_eq!(workload.value("w2", "skiplist"), Some(500.0));
        assert_eq!(workload.value("w2", "vector"), Some(0.0));
        assert!(report.missing.contains(&MissingPoint {
            implementation: "vector".into(),
            workload: "w2".into(),
            operation: "workload".into(),
        }));

        let latency = &report.mean_latency[0];
        assert_eq!(latency.value("w1", "vector"), Some(50.0));
    }

    #[test]
    fn test_unreadable_logs_do_not_abort_the_report() {
        let dir = tempdir().unwrap();
        let good = "InsertTime: 10 ns\n\nTotal time taken by inserts = 12 ns\n";
        write_log(dir.path(), BufferKind::SkipList, "w", good);

        let garbled = log_path(dir.path(), BufferKind::Vector, "w");
        fs::create_dir_all(garbled.parent().unwrap()).unwrap();
        fs::write(
            &garbled,
            b"InsertTime: 10 ns\n\xff\xfe\n\nTotal time taken by inserts = 7 ns\n",
        )
        .unwrap();

        // A directory where the log should be cannot be read at all.
        fs::create_dir_all(log_path(dir.path(), BufferKind::LinkList, "w")).unwrap();

        let kinds = [BufferKind::SkipList, BufferKind::Vector, BufferKind::LinkList];
        let set = collect_results(dir.path(), &kinds).unwrap();
        let parsed = &set.logs["vector"]["w"];
        assert_eq!(parsed.warnings().count(), 1);
        assert!(!set.logs["linklist"].contains_key("w"));

        let report = build_report(&set);
        let inserts = report.comparison("inserts").unwrap();
        assert_eq!(inserts.value("w", "skiplist"), Some(12.0));
        assert_eq!(inserts.value("w", "vector"), Some(7.0));
        assert_eq!(inserts.value("w", "linklist"), Some(0.0));
        assert!(report.missing.contains(&MissingPoint {
            implementation: "linklist".into(),
            workload: "w".into(),
            operation: "inserts".into(),
        }));
    }

    #[test]
    fn test_missing_operation_in_present_log() {
        let dir = tempdir().unwrap();
        write_log(dir.path(), BufferKind::LinkList, "w", "\nTotal time taken by inserts = 1 ns\n");
        let set = collect_results(dir.path(), &[BufferKind::LinkList]).unwrap();
        let report = build_report(&set);

        assert_eq!(report.comparison("inserts").unwrap().value("w", "linklist"), Some(1.0));
        let missing_ops: BTreeSet<&str> = report
            .missing
            .iter()
            .map(|p| p.operation.as_str())
            .collect();
        assert!(missing_ops.contains("updates"));
        assert!(missing_ops.contains("PointQueryTime"));
        assert!(!missing_ops.contains("inserts"));
    }

    #[test]
    fn test_write_report_files() {
        let dir = tempdir().unwrap();
        write_log(
            dir.path(),
            BufferKind::HashSkipList,
            "w",
            "\nTotal time taken by range queries = 8 ns\n",
        );
        let report = write_report(dir.path(), &[BufferKind::HashSkipList, BufferKind::Vector]).unwrap();

        let csv = fs::read_to_string(dir.path().join("range_queries_comparison.csv")).unwrap();
        assert_eq!(csv, "workload,hash_skip_list,vector\nw,8,0\n");
        assert!(dir.path().join(MEAN_LATENCY_FILE).exists());

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap()).unwrap();
        assert_eq!(
            json["missing"].as_array().unwrap().len(),
            report.missing.len()
        );
    }

    #[test]
    fn test_comparison_file_names() {
        assert_eq!(comparison_file("workload"), "workload_comparison.csv");
        assert_eq!(comparison_file("range queries"), "range_queries_comparison.csv");
    }
}
