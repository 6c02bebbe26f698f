use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use super::{BufferKind, EntryIter, Memtable, Usage};
use crate::config::BufferOptions;
use crate::entry::{dedup_newest, Entry};
use crate::error::Result;
use crate::filter::KeyRange;
use crate::metrics::{Label, Profiler};

/// Append-only vector sorted on read.
///
/// While mutable, every read copies the vector and sorts the copy. Once the
/// buffer is frozen the first read sorts it in place and later reads
/// binary-search the cached order.
#[derive(Debug)]
pub struct VectorBuffer {
    entries: RwLock<Vec<Entry>>,
    sorted: AtomicBool,
    usage: Usage,
    profiler: Arc<Profiler>,
}

impl VectorBuffer {
    pub fn new(options: &BufferOptions, profiler: Arc<Profiler>) -> Self {
        Self {
            entries: RwLock::new(Vec::with_capacity(options.preallocation)),
            sorted: AtomicBool::new(false),
            usage: Usage::new(options.capacity),
            profiler,
        }
    }

    /// Sorts frozen entries once. A mutable buffer is left alone.
    fn sort_if_frozen(&self) -> Result<()> {
        if !self.usage.is_frozen() || self.sorted.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut entries = self.entries.write()?;
        if !self.sorted.load(Ordering::Acquire) {
            self.profiler
                .time(Label::Sorting, || entries.sort_unstable_by(Entry::internal_cmp));
            self.sorted.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Runs `f` over the entries in internal order, copying and sorting first
    /// when the cached order is not available.
    fn with_sorted<T>(&self, snapshot: Label, f: impl FnOnce(&[Entry]) -> T) -> Result<T> {
        self.sort_if_frozen()?;
        if self.sorted.load(Ordering::Acquire) {
            let entries = self.entries.read()?;
            return Ok(f(&entries));
        }
        let mut copy = self
            .profiler
            .time(snapshot, || self.entries.read().map(|e| e.to_vec()))?;
        self.profiler
            .time(Label::Sorting, || copy.sort_unstable_by(Entry::internal_cmp));
        Ok(f(&copy))
    }
}

/// First index at or after `(key, snapshot_seq)` in internal order.
fn seek(entries: &[Entry], key: &[u8], snapshot_seq: u64) -> usize {
    entries.partition_point(|e| {
        (e.key.as_slice(), Reverse(e.seq)) < (key, Reverse(snapshot_seq))
    })
}

impl Memtable for VectorBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::Vector
    }

    fn insert(&self, entry: Entry) -> Result<()> {
        let mut entries = self.entries.write()?;
        self.usage.reserve(entry.size())?;
        entries.push(entry);
        Ok(())
    }

    fn lookup(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<Entry>> {
        self.with_sorted(Label::SnapshotGet, |entries| {
            entries
                .get(seek(entries, key, snapshot_seq))
                .filter(|e| e.key == key)
                .cloned()
        })
    }

    fn range(&self, range: &KeyRange, snapshot_seq: u64) -> Result<EntryIter> {
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        let found = self
            .with_sorted(Label::SnapshotIterator, |entries| {
                let start = match range.start_key() {
                    Some(key) => seek(entries, key, u64::MAX),
                    None => 0,
                };
                let visible: Vec<Entry> = entries[start..]
                    .iter()
                    .take_while(|e| !range.is_beyond_end(&e.key))
                    .filter(|e| e.seq <= snapshot_seq && range.contains(&e.key))
                    .cloned()
                    .collect();
                dedup_newest(visible)
            })?;
        Ok(Box::new(found.into_iter()))
    }

    fn size(&self) -> usize {
        self.usage.size()
    }

    fn len(&self) -> usize {
        self.usage.len()
    }

    fn capacity(&self) -> usize {
        self.usage.capacity()
    }

    fn freeze(&self) {
        self.usage.freeze();
    }

    fn is_frozen(&self) -> bool {
        self.usage.is_frozen()
    }
}
