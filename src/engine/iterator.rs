use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::entry::Entry;
use crate::error::Result;

/// A source of entries in ascending key order with at most one entry per key.
pub type EntrySource = Box<dyn Iterator<Item = Result<Entry>> + Send>;

struct HeapEntry {
    entry: Entry,
    /// Position in the source list; lower is newer.
    source: usize,
    iterator: EntrySource,
}

impl std::fmt::Debug for HeapEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapEntry")
            .field("key", &self.entry.key)
            .field("seq", &self.entry.seq)
            .field("source", &self.source)
            .finish()
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.entry.key == other.entry.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    // BinaryHeap is a max-heap: the smallest key, then the newest source,
    // must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .entry
            .key
            .cmp(&self.entry.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// K-way merge of sources ordered newest first. Yields one entry per key,
/// taken from the newest source holding it; tombstones are passed through.
#[derive(Debug)]
pub struct MergeIterator {
    heap: BinaryHeap<HeapEntry>,
    latest_key: Option<Vec<u8>>,
    pending_error: Option<crate::Error>,
    failed: bool,
}

impl MergeIterator {
    pub fn new(sources: Vec<EntrySource>) -> Self {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            latest_key: None,
            pending_error: None,
            failed: false,
        };
        for (source, iterator) in sources.into_iter().enumerate() {
            merge.advance(source, iterator);
        }
        merge
    }

    /// Pulls the next entry of `iterator` onto the heap.
    fn advance(&mut self, source: usize, mut iterator: EntrySource) {
        match iterator.next() {
            Some(Ok(entry)) => self.heap.push(HeapEntry {
                entry,
                source,
                iterator,
            }),
            Some(Err(e)) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(e);
                }
            }
            None => {}
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(e) = self.pending_error.take() {
                self.failed = true;
                return Some(Err(e));
            }

            let HeapEntry {
                entry,
                source,
                iterator,
            } = self.heap.pop()?;
            self.advance(source, iterator);

            if self.latest_key.as_ref() == Some(&entry.key) {
                // Shadowed by a newer source.
                continue;
            }
            self.latest_key = Some(entry.key.clone());
            return Some(Ok(entry));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn source(entries: Vec<Entry>) -> EntrySource {
        Box::new(entries.into_iter().map(Ok))
    }

    fn v(key: &str, value: &str, seq: u64) -> Entry {
        Entry::value(key.as_bytes().to_vec(), value.as_bytes().to_vec(), seq)
    }

    #[test]
    fn test_newest_source_wins() {
        let newest = source(vec![v("b", "new", 9), v("d", "new", 8)]);
        let middle = source(vec![Entry::tombstone(b"a".to_vec(), 6), v("b", "mid", 5)]);
        let oldest = source(vec![v("a", "old", 1), v("b", "old", 2), v("c", "old", 3)]);

        let merged: Vec<Entry> = MergeIterator::new(vec![newest, middle, oldest])
            .map(|e| e.unwrap())
            .collect();
        let keys: Vec<&[u8]> = merged.iter().map(|e| e.key.as_slice()).collect();
        assert_eq!(keys, vec![&b"a"[..], &b"b"[..], &b"c"[..], &b"d"[..]]);
        assert!(merged[0].is_tombstone());
        assert_eq!(merged[1].value, b"new");
        assert_eq!(merged[2].value, b"old");
    }

    #[test]
    fn test_empty_sources() {
        assert_eq!(MergeIterator::new(vec![]).count(), 0);
        assert_eq!(MergeIterator::new(vec![source(vec![]), source(vec![])]).count(), 0);
    }

    #[test]
    fn test_source_error_ends_iteration() {
        let failing: EntrySource = Box::new(
            vec![
                Ok(v("a", "1", 1)),
                Err(Error::Corruption("bad block".into())),
                Ok(v("c", "3", 3)),
            ]
            .into_iter(),
        );
        let mut merge = MergeIterator::new(vec![failing, source(vec![v("b", "2", 2)])]);
        assert_eq!(merge.next().unwrap().unwrap().key, b"a");
        assert!(matches!(merge.next(), Some(Err(Error::Corruption(_)))));
        assert!(merge.next().is_none());
    }
}
