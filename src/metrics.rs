//! Per-operation timing events.
//!
//! Buffers and the engine report how long each measured step took. Events are
//! kept in arrival order so the runner can replay them as log lines of the form
//! `"<Label>: <n> ns"`.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Label {
    Insert,
    PointQuery,
    RangeQuery,
    UpdateQuery,
    Delete,
    /// Copying a mutable buffer so a point lookup sees a stable view.
    SnapshotGet,
    /// Pinning a view for an iterator (range query or scan).
    SnapshotIterator,
    Sorting,
    Flush,
}

impl Label {
    pub const ALL: [Label; 9] = [
        Label::Insert,
        Label::PointQuery,
        Label::RangeQuery,
        Label::UpdateQuery,
        Label::Delete,
        Label::SnapshotGet,
        Label::SnapshotIterator,
        Label::Sorting,
        Label::Flush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Insert => "InsertTime",
            Label::PointQuery => "PointQueryTime",
            Label::RangeQuery => "RangeQueryTime",
            Label::UpdateQuery => "UpdateQueryTime",
            Label::Delete => "DeleteTime",
            Label::SnapshotGet => "SnapshotCreationTime(Get)",
            Label::SnapshotIterator => "SnapshotCreationTime(GetIterator)",
            Label::Sorting => "SortingTime",
            Label::Flush => "FlushTime",
        }
    }

    fn index(&self) -> usize {
        Label::ALL
            .iter()
            .position(|l| l == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Label {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Label::ALL
            .iter()
            .find(|label| label.as_str() == s)
            .copied()
            .ok_or(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub label: Label,
    pub nanos: u64,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ns", self.label, self.nanos)
    }
}

/// Collects timing events. Totals are always kept; the individual event
/// stream only while `events` is enabled.
#[derive(Debug)]
pub struct Profiler {
    keep_events: AtomicBool,
    events: Mutex<Vec<Event>>,
    totals: [AtomicU64; 9],
    counts: [AtomicU64; 9],
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Profiler {
    pub fn new(keep_events: bool) -> Self {
        Self {
            keep_events: AtomicBool::new(keep_events),
            events: Mutex::new(Vec::new()),
            totals: Default::default(),
            counts: Default::default(),
        }
    }

    /// A profiler that only keeps totals.
    pub fn quiet() -> Self {
        Self::new(false)
    }

    pub fn record(&self, label: Label, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        let idx = label.index();
        self.totals[idx].fetch_add(nanos, Ordering::Relaxed);
        self.counts[idx].fetch_add(1, Ordering::Relaxed);
        if self.keep_events.load(Ordering::Relaxed) {
            // A poisoned event list only loses the event stream, never totals.
            if let Ok(mut events) = self.events.lock() {
                events.push(Event { label, nanos });
            }
        }
    }

    /// Runs `f` and records its wall time under `label`.
    pub fn time<T>(&self, label: Label, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.record(label, start.elapsed());
        out
    }

    pub fn total(&self, label: Label) -> Duration {
        Duration::from_nanos(self.totals[label.index()].load(Ordering::Relaxed))
    }

    pub fn count(&self, label: Label) -> u64 {
        self.counts[label.index()].load(Ordering::Relaxed)
    }

    /// Takes the buffered events, leaving the stream empty.
    pub fn drain(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(mut events) => std::mem::take(&mut *events),
            Err(_) => Vec::new(),
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }
}
