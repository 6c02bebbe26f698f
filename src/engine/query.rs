use std::sync::Arc;

use super::iterator::{EntrySource, MergeIterator};
use super::state::EngineState;
use crate::entry::Entry;
use crate::error::Result;
use crate::filter::KeyRange;
use crate::level::LevelSet;
use crate::memtable::Memtable;

/// A point-in-time view of the engine: a sequence number plus the buffers
/// and runs that existed when it was taken. Later writes are invisible to it.
#[derive(Debug, Clone)]
pub struct Snapshot {
    seq: u64,
    active: Arc<dyn Memtable>,
    /// Newest first.
    frozen: Vec<Arc<dyn Memtable>>,
    levels: Arc<LevelSet>,
}

impl Snapshot {
    pub(crate) fn capture(state: &EngineState) -> Result<Self> {
        let active = state.active.read()?;
        let frozen = state.frozen.read()?;
        let levels = state.levels.read()?;
        Ok(Self {
            seq: state.visible_seq(),
            active: Arc::clone(&active),
            frozen: frozen.iter().cloned().collect(),
            levels: Arc::clone(&levels),
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn levels(&self) -> &LevelSet {
        &self.levels
    }

    /// Newest entry for `key`, tombstones included.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<Entry>> {
        if let Some(entry) = self.active.lookup(key, self.seq)? {
            return Ok(Some(entry));
        }
        for buffer in &self.frozen {
            if let Some(entry) = buffer.lookup(key, self.seq)? {
                return Ok(Some(entry));
            }
        }
        // Run entries all predate the snapshot: a run is installed only after
        // its buffer was frozen, and frozen buffers take no new writes.
        self.levels.get(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .lookup(key)?
            .filter(|e| !e.is_tombstone())
            .map(|e| e.value))
    }

    /// Merged view of every source in `range`, one entry per key,
    /// tombstones included.
    pub fn entries(&self, range: &KeyRange) -> Result<MergeIterator> {
        let buffers = std::iter::once(&self.active).chain(self.frozen.iter());
        let mut sources = Vec::with_capacity(1 + self.frozen.len());
        for buffer in buffers {
            sources.push(Box::new(buffer.range(range, self.seq)?.map(Ok)) as EntrySource);
        }
        for run in self.levels.runs_newest_first() {
            if run.overlaps(range) {
                sources.push(Box::new(run.scan(range)));
            }
        }
        Ok(MergeIterator::new(sources))
    }

    /// Live key-value pairs in `range`, ascending.
    pub fn scan(&self, range: &KeyRange) -> Result<Scan> {
        Ok(Scan {
            inner: self.entries(range)?,
        })
    }
}

/// Live pairs of a range query. Tombstones are dropped here, after merging,
/// so a deletion still hides older versions in deeper sources.
#[derive(Debug)]
pub struct Scan {
    inner: MergeIterator,
}

impl Iterator for Scan {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(entry) if entry.is_tombstone() => continue,
                Ok(entry) => return Some(Ok((entry.key, entry.value))),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
