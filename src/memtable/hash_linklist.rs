use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use itertools::Itertools;

use super::hash::BucketIndex;
use super::linklist::EntryList;
use super::skiplist::OrderedEntries;
use super::{BufferKind, EntryIter, Memtable, Usage};
use crate::config::BufferOptions;
use crate::entry::{dedup_newest, Entry};
use crate::error::Result;
use crate::filter::KeyRange;
use crate::metrics::{Label, Profiler};
use crate::Error;

#[derive(Debug)]
enum LinkBucket {
    List(EntryList),
    /// A list that grew past the threshold.
    Ordered(OrderedEntries),
}

/// Prefix-hashed buckets, each an unordered linked list until it holds more
/// than `threshold_use_skiplist` entries, then an ordered skip list.
#[derive(Debug)]
pub struct HashLinkListBuffer {
    index: BucketIndex,
    buckets: Vec<OnceLock<RwLock<LinkBucket>>>,
    non_empty: AtomicUsize,
    promoted: AtomicUsize,
    threshold: usize,
    usage: Usage,
    profiler: Arc<Profiler>,
}

impl HashLinkListBuffer {
    pub fn new(options: &BufferOptions, profiler: Arc<Profiler>) -> Self {
        let index = BucketIndex::new(options);
        Self {
            buckets: (0..index.bucket_count()).map(|_| OnceLock::new()).collect(),
            index,
            non_empty: AtomicUsize::new(0),
            promoted: AtomicUsize::new(0),
            threshold: options.threshold_use_skiplist,
            usage: Usage::new(options.capacity),
            profiler,
        }
    }

    /// Buckets converted to skip lists so far.
    pub fn promoted_buckets(&self) -> usize {
        self.promoted.load(Ordering::SeqCst)
    }

    fn populated(&self) -> impl Iterator<Item = &RwLock<LinkBucket>> {
        self.buckets.iter().filter_map(|b| b.get())
    }

    /// Visible entries of one bucket in key order.
    fn bucket_range(
        &self,
        bucket: &RwLock<LinkBucket>,
        range: &KeyRange,
        snapshot_seq: u64,
    ) -> Result<EntryIter> {
        let view = match &*bucket.read()? {
            LinkBucket::List(list) => list.clone(),
            LinkBucket::Ordered(ordered) => {
                return Ok(Box::new(ordered.range(range, snapshot_seq)));
            }
        };
        let mut matches = view.collect_range(range, snapshot_seq);
        self.profiler
            .time(Label::Sorting, || matches.sort_unstable_by(Entry::internal_cmp));
        Ok(Box::new(dedup_newest(matches).into_iter()))
    }

    /// Every visible entry in `range` across all buckets, sorted and
    /// deduplicated in one pass.
    fn full_scan(&self, range: &KeyRange, snapshot_seq: u64) -> Result<Vec<Entry>> {
        let mut all: Vec<Entry> = self.profiler.time(Label::SnapshotIterator, || {
            let mut all = Vec::new();
            for bucket in self.populated() {
                match &*bucket.read()? {
                    LinkBucket::List(list) => {
                        all.extend(list.collect_range(range, snapshot_seq))
                    }
                    LinkBucket::Ordered(ordered) => {
                        all.extend(ordered.range(range, snapshot_seq))
                    }
                }
            }
            Ok::<_, Error>(all)
        })?;
        self.profiler
            .time(Label::Sorting, || all.sort_unstable_by(Entry::internal_cmp));
        Ok(dedup_newest(all))
    }
}

impl Memtable for HashLinkListBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::HashLinkedList
    }

    fn insert(&self, entry: Entry) -> Result<()> {
        let slot = &self.buckets[self.index.bucket_of(&entry.key)];
        let bucket = slot.get_or_init(|| RwLock::new(LinkBucket::List(EntryList::default())));

        // Capacity is claimed only once the bucket lock is held, so a failed
        // lock leaves the accounting untouched.
        let mut bucket = bucket.write()?;
        self.usage.reserve(entry.size())?;
        match &mut *bucket {
            LinkBucket::List(list) => {
                if list.is_empty() {
                    self.non_empty.fetch_add(1, Ordering::SeqCst);
                }
                list.push(entry);
                if list.len() > self.threshold {
                    let ordered = OrderedEntries::new();
                    for e in list.iter() {
                        ordered.insert(e.clone());
                    }
                    *bucket = LinkBucket::Ordered(ordered);
                    self.promoted.fetch_add(1, Ordering::SeqCst);
                }
            }
            LinkBucket::Ordered(ordered) => ordered.insert(entry),
        }
        Ok(())
    }

    fn lookup(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<Entry>> {
        let Some(bucket) = self.buckets[self.index.bucket_of(key)].get() else {
            return Ok(None);
        };
        let bucket = self.profiler.time(Label::SnapshotGet, || bucket.read())?;
        Ok(match &*bucket {
            LinkBucket::List(list) => list.lookup(key, snapshot_seq),
            LinkBucket::Ordered(ordered) => ordered.lookup(key, snapshot_seq),
        })
    }

    fn range(&self, range: &KeyRange, snapshot_seq: u64) -> Result<EntryIter> {
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }

        if let Some(idx) = self.index.single_bucket(range) {
            return match self.buckets[idx].get() {
                Some(bucket) => self.bucket_range(bucket, range, snapshot_seq),
                None => Ok(Box::new(std::iter::empty())),
            };
        }

        if self.non_empty.load(Ordering::SeqCst) > self.threshold {
            return Ok(Box::new(self.full_scan(range, snapshot_seq)?.into_iter()));
        }

        let iters = self
            .populated()
            .map(|bucket| self.bucket_range(bucket, range, snapshot_seq))
            .collect::<Result<Vec<EntryIter>>>()?;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: u32) -> Vec<u8> {
        format!("{:010}", i).into_bytes()
    }

    #[test]
    fn test_bucket_promotes_past_threshold() {
        let buffer = HashLinkListBuffer::new(
            &BufferOptions::new(BufferKind::HashLinkedList)
                .prefix_length(8)
                .bucket_count(16)
                .threshold_use_skiplist(50),
            Arc::new(Profiler::quiet()),
        );
        // Keys 0..=99 share one prefix, so they land in one bucket.
        for i in 0..50u32 {
            buffer.insert(Entry::value(key(i), b"v".to_vec(), i as u64 + 1)).unwrap();
        }
        assert_eq!(buffer.promoted_buckets(), 0);
        buffer.insert(Entry::value(key(50), b"v".to_vec(), 51)).unwrap();
        assert_eq!(buffer.promoted_buckets(), 1);

        buffer.insert(Entry::value(key(7), b"new".to_vec(), 52)).unwrap();
        assert_eq!(buffer.get(&key(7)).unwrap().unwrap().value, b"new");
        assert_eq!(buffer.lookup(&key(7), 51).unwrap().unwrap().value, b"v");

        let keys: Vec<Vec<u8>> = buffer
            .range(&KeyRange::inclusive(key(45), key(55)), u64::MAX)
            .unwrap()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, (45..=50).map(key).collect::<Vec<_>>());
    }

    #[test]
    fn test_cross_bucket_range_merges_lists() {
        let buffer = HashLinkListBuffer::new(
            &BufferOptions::new(BufferKind::HashLinkedList)
                .prefix_length(9)
                .bucket_count(128)
                .threshold_use_skiplist(1000),
            Arc::new(Profiler::quiet()),
        );
        for i in (0..300u32).rev() {
            buffer.insert(Entry::value(key(i), b"v".to_vec(), 300 - i as u64)).unwrap();
        }
        let keys: Vec<Vec<u8>> = buffer
            .range(&KeyRange::half_open(key(5), key(215)), u64::MAX)
            .unwrap()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, (5..215).map(key).collect::<Vec<_>>());
    }

    fn whole_key_buffer(threshold: usize, profiler: Arc<Profiler>) -> HashLinkListBuffer {
        HashLinkListBuffer::new(
            &BufferOptions::new(BufferKind::HashLinkedList)
                .prefix_length(10)
                .bucket_count(4096)
                .threshold_use_skiplist(threshold),
            profiler,
        )
    }

    fn fill(buffer: &HashLinkListBuffer) {
        let mut seq = 0;
        for i in 0..200u32 {
            seq += 1;
            buffer
                .insert(Entry::value(key(i), format!("v{}", i).into_bytes(), seq))
                .unwrap();
        }
        for i in (0..200u32).step_by(7) {
            seq += 1;
            buffer
                .insert(Entry::value(key(i), format!("u{}", i).into_bytes(), seq))
                .unwrap();
        }
        buffer.insert(Entry::tombstone(key(50), seq + 1)).unwrap();
    }

    #[test]
    fn test_full_scan_fallback_matches_bucket_merge() {
        let merging = whole_key_buffer(10_000, Arc::new(Profiler::quiet()));
        let scanning_profiler = Arc::new(Profiler::default());
        let scanning = whole_key_buffer(1, scanning_profiler.clone());
        fill(&merging);
        fill(&scanning);
        // Updated keys promoted their buckets, most buckets are still lists.
        assert!(scanning.promoted_buckets() > 0);
        assert!(scanning.promoted_buckets() < 100);

        let range = KeyRange::inclusive(key(20), key(120));
        let merged: Vec<Entry> = merging.range(&range, u64::MAX).unwrap().collect();
        let scanned: Vec<Entry> = scanning.range(&range, u64::MAX).unwrap().collect();
        assert_eq!(scanning_profiler.count(Label::SnapshotIterator), 1);
        assert_eq!(scanning_profiler.count(Label::Sorting), 1);

        assert_eq!(merged, scanned);
        let keys: Vec<Vec<u8>> = scanned.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, (20..=120).map(key).collect::<Vec<_>>());
        assert_eq!(scanned[1].value, b"u21");
        assert_eq!(scanned[2].value, b"v22");
        assert!(scanned[30].is_tombstone());

        // A snapshot taken before the updates sees only the first versions.
        let early: Vec<Entry> = scanning.range(&range, 200).unwrap().collect();
        assert_eq!(early.len(), 101);
        assert!(early.iter().all(|e| e.value.starts_with(b"v")));
    }

    #[test]
    fn test_poisoned_bucket_is_reported_and_keeps_accounting() {
        let buffer = whole_key_buffer(1000, Arc::new(Profiler::quiet()));
        buffer.insert(Entry::value(key(1), b"a".to_vec(), 1)).unwrap();
        buffer.insert(Entry::value(key(2), b"b".to_vec(), 2)).unwrap();
        let bucket = buffer.buckets[buffer.index.bucket_of(&key(1))]
            .get()
            .unwrap();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = bucket.write().unwrap();
            panic!("writer died holding the lock");
        }));

        let (size, len) = (buffer.size(), buffer.len());
        assert!(matches!(
            buffer.insert(Entry::value(key(1), b"c".to_vec(), 3)),
            Err(Error::MutexPoisoned)
        ));
        assert_eq!(buffer.size(), size);
        assert_eq!(buffer.len(), len);

        assert!(matches!(buffer.lookup(&key(1), u64::MAX), Err(Error::MutexPoisoned)));
        assert!(matches!(
            buffer.range(&KeyRange::all(), u64::MAX),
            Err(Error::MutexPoisoned)
        ));
    }
}
