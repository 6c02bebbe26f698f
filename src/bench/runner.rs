//! Replays a workload against an engine and renders the timing log.
//!
//! The log has three parts:
//!
//! ```text
//! InsertTime: 812 ns
//! SortingTime: 90 ns
//! ...
//!
//! ----------------------Workload Complete-----------------------
//! Total time taken by workload = 1234567 ns
//! Total time taken by inserts = 812000 ns
//! ...
//! ```
//!
//! followed by an engine statistics block when requested.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::engine::{Engine, EngineStats};
use crate::error::Result;
use crate::metrics::{Event, Label, Profiler};
use crate::workload::{encode_key, Operation};

pub const COMPLETE_MARKER: &str = "----------------------Workload Complete-----------------------";
pub const STATS_MARKER: &str = "-----------------------Engine Statistics----------------------";

/// Summary names, in log order.
pub const SUMMARY_NAMES: [&str; 7] = [
    "workload",
    "inserts",
    "queries",
    "updates",
    "deletes",
    "range deletes",
    "range queries",
];

/// Wall time per operation class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub workload: Duration,
    pub inserts: Duration,
    pub queries: Duration,
    pub updates: Duration,
    pub deletes: Duration,
    pub range_deletes: Duration,
    pub range_queries: Duration,
}

impl Totals {
    /// `(summary name, nanoseconds)` pairs in log order.
    pub fn lines(&self) -> [(&'static str, u128); 7] {
        let values = [
            self.workload,
            self.inserts,
            self.queries,
            self.updates,
            self.deletes,
            self.range_deletes,
            self.range_queries,
        ];
        let mut out = [("", 0); 7];
        for (slot, (name, value)) in out.iter_mut().zip(SUMMARY_NAMES.iter().zip(values)) {
            *slot = (*name, value.as_nanos());
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub operations: usize,
    pub events: Vec<Event>,
    pub totals: Totals,
    /// Point queries that found a live value.
    pub point_hits: u64,
    /// Pairs returned by all range queries.
    pub scanned: u64,
    /// Keys tombstoned by all range deletes.
    pub range_deleted: u64,
    /// Time spent writing frozen buffers out during the replay.
    pub flush_time: Duration,
    pub stats: Option<EngineStats>,
}

impl RunReport {
    pub fn write_log(&self, out: &mut impl Write) -> io::Result<()> {
        for event in &self.events {
            writeln!(out, "{}", event)?;
        }
        writeln!(out)?;
        writeln!(out, "{}", COMPLETE_MARKER)?;
        for (name, nanos) in self.totals.lines() {
            writeln!(out, "Total time taken by {} = {} ns", name, nanos)?;
        }
        if let Some(stats) = &self.stats {
            writeln!(out)?;
            writeln!(out, "{}", STATS_MARKER)?;
            write!(out, "{}", stats)?;
        }
        Ok(())
    }

    pub fn to_log(&self) -> String {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        let _ = self.write_log(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Runs `f`, adds its wall time to `total` and records it under `label`.
fn timed<T>(
    profiler: &Profiler,
    label: Label,
    total: &mut Duration,
    f: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let start = Instant::now();
    let out = f()?;
    let elapsed = start.elapsed();
    *total += elapsed;
    profiler.record(label, elapsed);
    Ok(out)
}

/// Executes `ops` in order. The first failing operation aborts the replay.
pub fn replay(engine: &Engine, ops: &[Operation], with_stats: bool) -> Result<RunReport> {
    let profiler = engine.profiler();
    // Events from an earlier replay on the same engine do not belong here.
    profiler.drain();

    let mut totals = Totals::default();
    let mut point_hits = 0;
    let mut scanned = 0;
    let mut range_deleted = 0;
    let flushed_before = profiler.total(Label::Flush);
    let start = Instant::now();

    for op in ops {
        match op {
            Operation::Insert { key, value } => {
                timed(profiler, Label::Insert, &mut totals.inserts, || {
                    engine.put(encode_key(*key), value.as_bytes())
                })?;
            }
            Operation::Update { key, value } => {
                timed(profiler, Label::UpdateQuery, &mut totals.updates, || {
                    engine.put(encode_key(*key), value.as_bytes())
                })?;
            }
            Operation::Delete { key } => {
                timed(profiler, Label::Delete, &mut totals.deletes, || {
                    engine.delete(encode_key(*key))
                })?;
            }
            Operation::PointQuery { key } => {
                let found = timed(profiler, Label::PointQuery, &mut totals.queries, || {
                    engine.get(&encode_key(*key))
                })?;
                point_hits += u64::from(found.is_some());
            }
            Operation::RangeQuery { start, end } => {
                scanned += timed(profiler, Label::RangeQuery, &mut totals.range_queries, || {
                    let mut n = 0u64;
                    for pair in engine.scan(encode_key(*start)..encode_key(*end))? {
                        pair?;
                        n += 1;
                    }
                    Ok(n)
                })?;
            }
            Operation::RangeDelete { start, end } => {
                // Timed as a whole; the per-key deletes emit no events.
                let begin = Instant::now();
                let n = engine.delete_range(encode_key(*start)..encode_key(*end))?;
                totals.range_deletes += begin.elapsed();
                range_deleted += n as u64;
            }
        }
    }
    totals.workload = start.elapsed();
    let flush_time = profiler.total(Label::Flush).saturating_sub(flushed_before);

    let stats = if with_stats { Some(engine.stats()?) } else { None };
    tracing::debug!(
        operations = ops.len(),
        point_hits,
        scanned,
        range_deleted,
        workload_ns = totals.workload.as_nanos() as u64,
        flush_ns = flush_time.as_nanos() as u64,
        "Workload complete"
    );

    Ok(RunReport {
        operations: ops.len(),
        events: profiler.drain(),
        totals,
        point_hits,
        scanned,
        range_deleted,
        flush_time,
        stats,
    })
}
