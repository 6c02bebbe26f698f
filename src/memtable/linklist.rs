use std::sync::{Arc, RwLock};

use super::{BufferKind, EntryIter, Memtable, Usage};
use crate::config::BufferOptions;
use crate::entry::{dedup_newest, Entry};
use crate::error::Result;
use crate::filter::KeyRange;
use crate::metrics::{Label, Profiler};

#[derive(Debug)]
struct Node {
    entry: Entry,
    next: Option<Arc<Node>>,
}

impl Drop for Node {
    // Unlink iteratively; the default drop recurses once per node.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.next.take(),
                Err(_) => break,
            }
        }
    }
}

/// Persistent singly linked list, newest entry at the head. Nodes are never
/// modified after they are linked, so a clone of the head is a stable view.
#[derive(Debug, Default, Clone)]
pub(crate) struct EntryList {
    head: Option<Arc<Node>>,
    len: usize,
}

impl EntryList {
    pub(crate) fn push(&mut self, entry: Entry) {
        let node = Node {
            entry,
            next: self.head.take(),
        };
        self.head = Some(Arc::new(node));
        self.len += 1;
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn iter(&self) -> ListIter<'_> {
        ListIter {
            next: self.head.as_deref(),
        }
    }

    /// First visible match walking from the head. The head is the newest
    /// entry, so this is the newest visible version.
    pub(crate) fn lookup(&self, key: &[u8], snapshot_seq: u64) -> Option<Entry> {
        self.iter()
            .find(|e| e.seq <= snapshot_seq && e.key == key)
            .cloned()
    }

    /// Visible entries in `range`, unsorted and with every version.
    pub(crate) fn collect_range(&self, range: &KeyRange, snapshot_seq: u64) -> Vec<Entry> {
        self.iter()
            .filter(|e| e.seq <= snapshot_seq && range.contains(&e.key))
            .cloned()
            .collect()
    }
}

pub(crate) struct ListIter<'a> {
    next: Option<&'a Node>,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Entry;

    fn next(&mut self) -> Option<&'a Entry> {
        let node = self.next?;
        self.next = node.next.as_deref();
        Some(&node.entry)
    }
}

#[derive(Debug)]
pub struct LinkListBuffer {
    list: RwLock<EntryList>,
    usage: Usage,
    profiler: Arc<Profiler>,
}

impl LinkListBuffer {
    pub fn new(options: &BufferOptions, profiler: Arc<Profiler>) -> Self {
        Self {
            list: RwLock::new(EntryList::default()),
            usage: Usage::new(options.capacity),
            profiler,
        }
    }

    /// Pins the current head. The lock is held only for the pointer copy.
    fn snapshot(&self, label: Label) -> Result<EntryList> {
        let view = self
            .profiler
            .time(label, || self.list.read().map(|list| list.clone()))?;
        Ok(view)
    }
}

impl Memtable for LinkListBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::LinkList
    }

    fn insert(&self, entry: Entry) -> Result<()> {
        let mut list = self.list.write()?;
        self.usage.reserve(entry.size())?;
        list.push(entry);
        Ok(())
    }

    fn lookup(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<Entry>> {
        Ok(self.snapshot(Label::SnapshotGet)?.lookup(key, snapshot_seq))
    }

    fn range(&self, range: &KeyRange, snapshot_seq: u64) -> Result<EntryIter> {
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        let view = self.snapshot(Label::SnapshotIterator)?;
        let mut matches = view.collect_range(range, snapshot_seq);
        self.profiler
            .time(Label::Sorting, || matches.sort_unstable_by(Entry::internal_cmp));
        Ok(Box::new(dedup_newest(matches).into_iter()))
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
    use crate::Error;

    #[test]
    fn test_head_insert_order() {
        let mut list = EntryList::default();
        list.push(Entry::value(b"a".to_vec(), b"1".to_vec(), 1));
        list.push(Entry::value(b"b".to_vec(), b"2".to_vec(), 2));
        list.push(Entry::value(b"a".to_vec(), b"3".to_vec(), 3));

        let seqs: Vec<u64> = list.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 2, 1]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.lookup(b"a", u64::MAX).unwrap().value, b"3");
        assert_eq!(list.lookup(b"a", 2).unwrap().value, b"1");
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_pushes() {
        let mut list = EntryList::default();
        list.push(Entry::value(b"a".to_vec(), b"1".to_vec(), 1));
        let view = list.clone();
        list.push(Entry::value(b"b".to_vec(), b"2".to_vec(), 2));
        assert_eq!(view.iter().count(), 1);
        assert_eq!(list.iter().count(), 2);
    }

    #[test]
    fn test_long_list_drops_without_overflow() {
        let mut list = EntryList::default();
        for i in 0..200_000u64 {
            list.push(Entry::tombstone(i.to_be_bytes().to_vec(), i + 1));
        }
        drop(list);
    }

    #[test]
    fn test_shared_tail_survives_drop_of_newer_head() {
        let mut list = EntryList::default();
        list.push(Entry::value(b"a".to_vec(), b"1".to_vec(), 1));
        list.push(Entry::value(b"b".to_vec(), b"2".to_vec(), 2));
        let older = list.clone();
        list.push(Entry::value(b"c".to_vec(), b"3".to_vec(), 3));
        drop(list);
        let keys: Vec<&[u8]> = older.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![b"b".as_slice(), b"a".as_slice()]);
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let buffer = LinkListBuffer::new(
            &BufferOptions::new(BufferKind::LinkList),
            Arc::new(Profiler::quiet()),
        );
        buffer.insert(Entry::value(b"a".to_vec(), b"1".to_vec(), 1)).unwrap();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = buffer.list.write().unwrap();
            panic!("writer died holding the lock");
        }));

        assert!(matches!(buffer.lookup(b"a", u64::MAX), Err(Error::MutexPoisoned)));
        assert!(matches!(
            buffer.range(&KeyRange::all(), u64::MAX),
            Err(Error::MutexPoisoned)
        ));
    }
}
