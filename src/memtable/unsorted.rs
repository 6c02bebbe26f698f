use std::sync::{Arc, RwLock};

use super::{BufferKind, EntryIter, Memtable, Usage};
use crate::config::BufferOptions;
use crate::entry::{dedup_newest, Entry};
use crate::error::Result;
use crate::filter::KeyRange;
use crate::metrics::{Label, Profiler};

/// Append-only vector that is never kept in order. Point queries scan from the
/// newest entry backwards; range queries filter under the read lock and sort
/// the matches afterwards.
#[derive(Debug)]
pub struct UnsortedVectorBuffer {
    entries: RwLock<Vec<Entry>>,
    usage: Usage,
    profiler: Arc<Profiler>,
}

impl UnsortedVectorBuffer {
    pub fn new(options: &BufferOptions, profiler: Arc<Profiler>) -> Self {
        Self {
            entries: RwLock::new(Vec::with_capacity(options.preallocation)),
            usage: Usage::new(options.capacity),
            profiler,
        }
    }
}

impl Memtable for UnsortedVectorBuffer {
    fn kind(&self) -> BufferKind {
        BufferKind::UnsortedVector
    }

    fn insert(&self, entry: Entry) -> Result<()> {
        let mut entries = self.entries.write()?;
        self.usage.reserve(entry.size())?;
        entries.push(entry);
        Ok(())
    }

    fn lookup(&self, key: &[u8], snapshot_seq: u64) -> Result<Option<Entry>> {
        let entries = self.entries.read()?;
        // Appends arrive in sequence order, so the first match from the back
        // is the newest visible version.
        Ok(entries
            .iter()
            .rev()
            .find(|e| e.seq <= snapshot_seq && e.key == key)
            .cloned())
    }

    fn range(&self, range: &KeyRange, snapshot_seq: u64) -> Result<EntryIter> {
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        let mut matches: Vec<Entry> = self.profiler.time(Label::SnapshotIterator, || {
            self.entries.read().map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.seq <= snapshot_seq && range.contains(&e.key))
                    .cloned()
                    .collect::<Vec<Entry>>()
            })
        })?;
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
    fn test_range_pays_sorting_cost() {
        let profiler = Arc::new(Profiler::default());
        let buffer = UnsortedVectorBuffer::new(
            &BufferOptions::new(BufferKind::UnsortedVector).preallocation(8),
            profiler.clone(),
        );
        for (i, k) in ["d", "b", "a", "c"].iter().enumerate() {
            buffer
                .insert(Entry::value(k.as_bytes().to_vec(), b"v".to_vec(), i as u64 + 1))
                .unwrap();
        }
        assert!(buffer.get(b"c").unwrap().is_some());
        assert_eq!(profiler.count(Label::Sorting), 0);

        let keys: Vec<Vec<u8>> = buffer
            .range(&KeyRange::inclusive(b"b".to_vec(), b"d".to_vec()), u64::MAX)
            .unwrap()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
        assert_eq!(profiler.count(Label::Sorting), 1);
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let buffer = UnsortedVectorBuffer::new(
            &BufferOptions::new(BufferKind::UnsortedVector),
            Arc::new(Profiler::quiet()),
        );
        buffer.insert(Entry::value(b"a".to_vec(), b"1".to_vec(), 1)).unwrap();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = buffer.entries.write().unwrap();
            panic!("writer died holding the lock");
        }));

        assert!(matches!(buffer.get(b"a"), Err(Error::MutexPoisoned)));
        assert!(matches!(
            buffer.range(&KeyRange::all(), u64::MAX),
            Err(Error::MutexPoisoned)
        ));
        assert!(matches!(
            buffer.insert(Entry::value(b"b".to_vec(), b"2".to_vec(), 2)),
            Err(Error::MutexPoisoned)
        ));
    }
}
