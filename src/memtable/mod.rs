//! Write buffers ("memtables").
//!
//! Every strategy implements [`Memtable`] so the engine can stay agnostic to
//! which one is active. They differ only in cost:
//!
//! | strategy           | insert          | point query       | range query                 |
//! |--------------------|-----------------|-------------------|-----------------------------|
//! | `skiplist`         | O(log n)        | O(log n)          | ordered walk                |
//! | `vector`           | O(1) append     | copy + sort       | copy + sort                 |
//! | `hash_skip_list`   | O(1) + O(log b) | one bucket        | bucket merge or full scan   |
//! | `hash_linked_list` | O(1)            | one bucket        | bucket merge or full scan   |
//! | `unsorted_vector`  | O(1) append     | O(n) scan         | filter then sort            |
//! | `linklist`         | O(1) head push  | O(n) scan         | collect then sort           |
//!
//! # Shadowing
//!
//! Buffers keep every version they receive. Reads resolve shadowing: the
//! newest entry whose sequence number is at most the reader's snapshot wins.
//! Range results carry one entry per key and keep tombstones, so the caller
//! can let a deletion hide older data further down the tree.
//!
//! # Iterators
//!
//! Range iterators own whatever they need, so they outlive the call. The skip
//! list walk is lazy and may observe inserts made while it runs; the snapshot
//! sequence filter hides them. Iterators are finite and not restartable.

pub mod hash;
pub mod hash_linklist;
pub mod hash_skiplist;
pub mod linklist;
pub mod skiplist;
pub mod unsorted;
pub mod vector;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::BufferOptions;
use crate::entry::Entry;
use crate::error::Result;
use crate::filter::KeyRange;
use crate::metrics::Profiler;
use crate::Error;

pub use hash_linklist::HashLinkListBuffer;
pub use hash_skiplist::HashSkipListBuffer;
pub use linklist::LinkListBuffer;
pub use skiplist::SkipListBuffer;
pub use unsorted::UnsortedVectorBuffer;
pub use vector::VectorBuffer;

/// Entries produced by a range query, ascending by key.
pub type EntryIter = Box<dyn Iterator<Item = Entry> + Send>;

pub trait Memtable: Send + Sync + fmt::Debug {
    fn kind(&self) -> BufferKind;

    /// Adds an entry, logically overwriting older entries for the same key.
    /// Fails with [`Error::BufferFull`] when the entry does not fit and with
    /// [`Error::Frozen`] once the buffer stopped accepting writes.
    fn insert(&self, entry: Entry) -> Result<()>;

    /// Newest entry for `key` with `seq <= snapshot_seq`, tombstones included.
    /// Fails with [`Error::MutexPoisoned`] when a writer panicked while
    /// holding the buffer's lock.
    fn lookup(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<Entry>>;

    /// Newest live entry for `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        Ok(self.lookup(key, u64::MAX)?.filter(|e| !e.is_tombstone()))
    }

    /// One entry per key in `range` as of `snapshot_seq`, ascending.
    fn range(&self, range: &KeyRange, snapshot_seq: u64) -> Result<EntryIter>;

    /// Bytes of capacity in use.
    fn size(&self) -> usize;

    /// Stored entries, counting every version.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;

    /// Stops further writes. Idempotent.
    fn freeze(&self);

    fn is_frozen(&self) -> bool;
}

/// Buffer strategies, numbered by their factory id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BufferKind {
    #[serde(rename = "skiplist")]
    SkipList,
    #[serde(rename = "vector")]
    Vector,
    #[serde(rename = "hash_skip_list")]
    HashSkipList,
    #[serde(rename = "hash_linked_list")]
    HashLinkedList,
    #[serde(rename = "unsorted_vector")]
    UnsortedVector,
    #[serde(rename = "linklist")]
    LinkList,
}

impl BufferKind {
    pub const ALL: [BufferKind; 6] = [
        BufferKind::SkipList,
        BufferKind::Vector,
        BufferKind::HashSkipList,
        BufferKind::HashLinkedList,
        BufferKind::UnsortedVector,
        BufferKind::LinkList,
    ];

    pub fn id(&self) -> u8 {
        match self {
            BufferKind::SkipList => 1,
            BufferKind::Vector => 2,
            BufferKind::HashSkipList => 3,
            BufferKind::HashLinkedList => 4,
            BufferKind::UnsortedVector => 5,
            BufferKind::LinkList => 6,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        BufferKind::ALL
            .iter()
            .find(|kind| kind.id() == id)
            .copied()
            .ok_or_else(|| Error::UnknownBufferKind(id.to_string()))
    }

    /// Directory-safe name used in the result tree.
    pub fn name(&self) -> &'static str {
        match self {
            BufferKind::SkipList => "skiplist",
            BufferKind::Vector => "vector",
            BufferKind::HashSkipList => "hash_skip_list",
            BufferKind::HashLinkedList => "hash_linked_list",
            BufferKind::UnsortedVector => "unsorted_vector",
            BufferKind::LinkList => "linklist",
        }
    }

    /// Human readable name for report legends.
    pub fn display_name(&self) -> &'static str {
        match self {
            BufferKind::SkipList => "Skiplist",
            BufferKind::Vector => "Vector",
            BufferKind::HashSkipList => "Hash Skip List",
            BufferKind::HashLinkedList => "Hash Linked List",
            BufferKind::UnsortedVector => "Unsorted Vector",
            BufferKind::LinkList => "Linked List",
        }
    }
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BufferKind {
    type Err = Error;

    /// Accepts either the factory id or the name.
    fn from_str(s: &str) -> Result<Self> {
        if let Ok(id) = s.parse::<u8>() {
            return BufferKind::from_id(id);
        }
        BufferKind::ALL
            .iter()
            .find(|kind| kind.name() == s)
            .copied()
            .ok_or_else(|| Error::UnknownBufferKind(s.to_string()))
    }
}

/// Creates an empty buffer of the configured kind.
pub fn new_buffer(options: &BufferOptions, profiler: Arc<Profiler>) -> Arc<dyn Memtable> {
    match options.kind {
        BufferKind::SkipList => Arc::new(SkipListBuffer::new(options, profiler)),
        BufferKind::Vector => Arc::new(VectorBuffer::new(options, profiler)),
        BufferKind::HashSkipList => Arc::new(HashSkipListBuffer::new(options, profiler)),
        BufferKind::HashLinkedList => Arc::new(HashLinkListBuffer::new(options, profiler)),
        BufferKind::UnsortedVector => Arc::new(UnsortedVectorBuffer::new(options, profiler)),
        BufferKind::LinkList => Arc::new(LinkListBuffer::new(options, profiler)),
    }
}

/// Capacity accounting and freeze state shared by all strategies.
#[derive(Debug)]
pub(crate) struct Usage {
    capacity: usize,
    size: AtomicUsize,
    entries: AtomicUsize,
    frozen: AtomicBool,
}

impl Usage {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            size: AtomicUsize::new(0),
            entries: AtomicUsize::new(0),
            frozen: AtomicBool::new(false),
        }
    }

    /// Claims room for `bytes`. An empty buffer always accepts one entry so an
    /// oversized entry cannot make the engine flush forever.
    pub(crate) fn reserve(&self, bytes: usize) -> Result<()> {
        if self.frozen.load(Ordering::SeqCst) {
            return Err(Error::Frozen);
        }
        let mut current = self.size.load(Ordering::SeqCst);
        loop {
            if current > 0 && current + bytes > self.capacity {
                return Err(Error::BufferFull);
            }
            match self.size.compare_exchange(
                current,
                current + bytes,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        self.entries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub(crate) fn size(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns true the first time it is called.
    pub(crate) fn freeze(&self) -> bool {
        !self.frozen.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }
}
