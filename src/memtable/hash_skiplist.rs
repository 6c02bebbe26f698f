use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use itertools::Itertools;

use super::hash::BucketIndex;
use super::skiplist::OrderedEntries;
use super::{BufferKind, EntryIter, Memtable, Usage};
use crate::config::BufferOptions;
use crate::entry::{dedup_newest, Entry};
use crate::error::Result;
use crate::filter::KeyRange;
use crate::metrics::{Label, Profiler};

/// Prefix-hashed buckets, each an ordered skip list. Buckets are allocated on
/// first insert.
#[derive(Debug)]
pub struct HashSkipListBuffer {
    index: BucketIndex,
    buckets: Vec<OnceLock<OrderedEntries>>,
    non_empty: AtomicUsize,
    threshold: usize,
    usage: Usage,
    profiler: Arc<Profiler>,
}

impl HashSkipListBuffer {
    pub fn new(options: &BufferOptions, profiler: Arc<Profiler>) -> Self {
        let index = BucketIndex::new(options);
        Self {
            buckets: (0..index.bucket_count()).map(|_| OnceLock::new()).collect(),
            index,
            non_empty: AtomicUsize::new(0),
            threshold: options.threshold_use_skiplist,
            usage: Usage::new(options.capacity),
            profiler,
        }
    }

    fn bucket(&self, key: &[u8]) -> Option<&OrderedEntries> {
        self.buckets[self.index.bucket_of(key)].get()
    }

    fn populated(&self) -> impl Iterator<Item = &OrderedEntries> {
        self.buckets.iter().filter_map(|b| b.get())
    }
}

impl Memtable for HashSkipListBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::HashSkipList
    }

    fn insert(&self, entry: Entry) -> Result<()> {
        self.usage.reserve(entry.size())?;
        let slot = &self.buckets[self.index.bucket_of(&entry.key)];
        let bucket = slot.get_or_init(|| {
            self.non_empty.fetch_add(1, Ordering::SeqCst);
            OrderedEntries::new()
        });
        bucket.insert(entry);
        Ok(())
    }

    fn lookup(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<Entry>> {
        Ok(self
            .bucket(key)
            .and_then(|bucket| bucket.lookup(key, snapshot_seq)))
    }

    fn range(&self, range: &KeyRange, snapshot_seq: u64) -> Result<EntryIter> {
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }

        if let Some(idx) = self.index.single_bucket(range) {
            return Ok(match self.buckets[idx].get() {
                Some(bucket) => Box::new(bucket.range(range, snapshot_seq)),
                None => Box::new(std::iter::empty()),
            });
        }

        if self.non_empty.load(Ordering::SeqCst) > self.threshold {
            // Too many buckets to merge: materialise and sort everything.
            let mut all: Vec<Entry> = self.profiler.time(Label::SnapshotIterator, || {
                self.populated()
                    .flat_map(|bucket| bucket.range(range, snapshot_seq))
                    .collect()
            });
            self.profiler
                .time(Label::Sorting, || all.sort_unstable_by(Entry::internal_cmp));
            return Ok(Box::new(dedup_newest(all).into_iter()));
        }

        // Every version of a key lives in one bucket, so the per-bucket
        // results never collide and a plain k-way merge keeps one per key.
        let iters: Vec<_> = self
            .populated()
            .map(|bucket| bucket.range(range, snapshot_seq))
            .collect();
        Ok(Box::new(
            iters
                .into_iter()
                .kmerge_by(|a: &Entry, b: &Entry| a.key < b.key),
        ))
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
