//! Parsers for the timing log written by the runner.
//!
//! Two independent views of one log:
//!
//! - the event section (everything before the first blank line), one
//!   `"<Label>: <n>"` line per measured step, with an optional `ns` suffix;
//! - the summary lines `"Total time taken by <name> = <n> ns"`.
//!
//! Neither parser fails on bad input. Lines they cannot read become
//! [`ParseWarning`]s and are otherwise ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::metrics::Label;

const SUMMARY_PREFIX: &str = "Total time taken by";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    /// 1-based line number within the log.
    pub line: usize,
    pub text: String,
    pub reason: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} ({:?})", self.line, self.reason, self.text)
    }
}

/// Event series by label name, in log order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    pub series: BTreeMap<String, Vec<u64>>,
    pub warnings: Vec<ParseWarning>,
}

impl EventLog {
    /// Sum of every series.
    pub fn totals(&self) -> BTreeMap<String, u64> {
        self.series
            .iter()
            .map(|(label, values)| (label.clone(), values.iter().sum()))
            .collect()
    }

    /// Mean of one series, if it has any events.
    pub fn mean(&self, label: Label) -> Option<f64> {
        let values = self.series.get(label.as_str())?;
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<u64>() as f64 / values.len() as f64)
    }
}

/// Reads the event section of `log`, keeping only `tracked` labels.
///
/// Lines with a known but untracked label are skipped silently; anything
/// else that does not parse becomes a warning.
pub fn parse_events(log: &str, tracked: &[Label]) -> EventLog {
    let mut out = EventLog::default();
    for (i, raw) in log.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            break;
        }
        let warn = |reason: &str| ParseWarning {
            line: i + 1,
            text: raw.to_string(),
            reason: reason.to_string(),
        };

        let Some((name, value)) = line.split_once(": ") else {
            out.warnings.push(warn("not an event line"));
            continue;
        };
        let Ok(label) = name.parse::<Label>() else {
            out.warnings.push(warn("unknown label"));
            continue;
        };
        if !tracked.contains(&label) {
            continue;
        }
        let value = value.trim();
        let value = value.strip_suffix("ns").map_or(value, str::trim_end);
        match value.parse::<u64>() {
            Ok(nanos) => out
                .series
                .entry(label.as_str().to_string())
                .or_default()
                .push(nanos),
            Err(_) => out.warnings.push(warn("bad duration")),
        }
    }
    out
}

/// Summary totals by name, e.g. `"inserts" -> 120.0`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub totals: BTreeMap<String, f64>,
    pub warnings: Vec<ParseWarning>,
}

pub fn parse_summary(log: &str) -> Summary {
    let mut out = Summary::default();
    for (i, raw) in log.lines().enumerate() {
        let line = raw.trim();
        let Some(rest) = line.strip_prefix(SUMMARY_PREFIX) else {
            continue;
        };
        let warn = |reason: &str| ParseWarning {
            line: i + 1,
            text: raw.to_string(),
            reason: reason.to_string(),
        };
        let Some((name, value)) = rest.split_once('=') else {
            out.warnings.push(warn("summary line without '='"));
            continue;
        };
        let value = value.trim();
        let value = value.strip_suffix("ns").map_or(value, str::trim_end);
        match value.parse::<f64>() {
            Ok(nanos) => {
                out.totals.insert(name.trim().to_string(), nanos);
            }
            Err(_) => out.warnings.push(warn("bad duration")),
        }
    }
    out
}

/// Both views of one log file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLog {
    pub events: EventLog,
    pub summary: Summary,
}

impl ParsedLog {
    pub fn parse(log: &str, tracked: &[Label]) -> Self {
        Self {
            events: parse_events(log, tracked),
            summary: parse_summary(log),
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ParseWarning> {
        self.events.warnings.iter().chain(self.summary.warnings.iter())
    }
}

/// Parses the log at `path`, logging every warning. Invalid UTF-8 is
/// replaced rather than rejected, so the affected lines become warnings.
pub fn parse_log_file(path: &Path, tracked: &[Label]) -> Result<ParsedLog> {
    let bytes = std::fs::read(path)?;
    let parsed = ParsedLog::parse(&String::from_utf8_lossy(&bytes), tracked);
    for warning in parsed.warnings() {
        tracing::warn!(path = %path.display(), %warning, "Ignoring malformed log line");
    }
    Ok(parsed)
}
