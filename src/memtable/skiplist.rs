use std::cmp::Reverse;
use std::ops::Bound;
use std::sync::Arc;

use crossbeam_skiplist::SkipMap;

use super::{BufferKind, EntryIter, Memtable, Usage};
use crate::config::BufferOptions;
use crate::entry::Entry;
use crate::error::Result;
use crate::filter::KeyRange;
use crate::metrics::Profiler;

/// Skip list key. Sorting by `Reverse(seq)` puts the newest version of a key
/// first, so a seek to `(key, Reverse(snapshot))` lands on the visible version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct InternalKey {
    key: Vec<u8>,
    seq: Reverse<u64>,
}

impl InternalKey {
    fn new(key: &[u8], seq: u64) -> Self {
        Self {
            key: key.to_vec(),
            seq: Reverse(seq),
        }
    }
}

/// Every stored version of every key, ordered for seeks. Shared by the plain
/// skip list, the hash skip list buckets and promoted hash linked list buckets.
#[derive(Debug, Default, Clone)]
pub(crate) struct OrderedEntries {
    map: Arc<SkipMap<InternalKey, Entry>>,
}

impl OrderedEntries {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, entry: Entry) {
        self.map.insert(InternalKey::new(&entry.key, entry.seq), entry);
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn lookup(&self, key: &[u8], snapshot_seq: u64) -> Option<Entry> {
        let lower = InternalKey::new(key, snapshot_seq);
        let found = self
            .map
            .range::<InternalKey, _>((Bound::Included(lower), Bound::Unbounded))
            .next()?;
        (found.key().key == key).then(|| found.value().clone())
    }

    /// Lazy walk over the visible version of each key in `range`.
    pub(crate) fn range(&self, range: &KeyRange, snapshot_seq: u64) -> SkipListIter {
        let lower = match &range.start {
            Bound::Included(key) => Bound::Included(InternalKey::new(key, snapshot_seq)),
            Bound::Excluded(key) => Bound::Excluded(InternalKey::new(key, 0)),
            Bound::Unbounded => Bound::Unbounded,
        };
        SkipListIter {
            map: self.map.clone(),
            range: range.clone(),
            snapshot_seq,
            lower,
            done: range.is_empty(),
        }
    }
}

/// Re-seeks from the last yielded key on every step instead of holding a
/// borrow into the map, so the iterator can own its data.
pub(crate) struct SkipListIter {
    map: Arc<SkipMap<InternalKey, Entry>>,
    range: KeyRange,
    snapshot_seq: u64,
    lower: Bound<InternalKey>,
    done: bool,
}

impl Iterator for SkipListIter {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        while !self.done {
            let (ik, entry) = match self
                .map
                .range::<InternalKey, _>((self.lower.clone(), Bound::Unbounded))
                .next()
            {
                Some(e) => (e.key().clone(), e.value().clone()),
                None => break,
            };

            if self.range.is_beyond_end(&ik.key) {
                break;
            }
            if ik.seq.0 > self.snapshot_seq {
                // Newer than the snapshot: jump to this key's visible versions.
                self.lower = Bound::Included(InternalKey {
                    key: ik.key,
                    seq: Reverse(self.snapshot_seq),
                });
                continue;
            }
            // Skip the older versions of this key.
            self.lower = Bound::Excluded(InternalKey {
                key: ik.key,
                seq: Reverse(0),
            });
            return Some(entry);
        }
        self.done = true;
        None
    }
}

#[derive(Debug)]
pub struct SkipListBuffer {
    entries: OrderedEntries,
    usage: Usage,
}

impl SkipListBuffer {
    pub fn new(options: &BufferOptions, _profiler: Arc<Profiler>) -> Self {
        Self {
            entries: OrderedEntries::new(),
            usage: Usage::new(options.capacity),
        }
    }
}

impl Memtable for SkipListBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::SkipList
    }

    fn insert(&self, entry: Entry) -> Result<()> {
        self.usage.reserve(entry.size())?;
        self.entries.insert(entry);
        Ok(())
    }

    fn lookup(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<Entry>> {
        Ok(self.entries.lookup(key, snapshot_seq))
    }

    fn range(&self, range: &KeyRange, snapshot_seq: u64) -> Result<EntryIter> {
        // Nothing is copied; the sequence filter is the snapshot.
        Ok(Box::new(self.entries.range(range, snapshot_seq)))
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
