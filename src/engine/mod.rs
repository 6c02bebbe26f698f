//! The LSM engine: one active write buffer, a queue of frozen buffers waiting
//! for their flush, and levels of sorted runs on disk.
//!
//! Writes go through a single writer guard. When the next entry would not fit
//! in the active buffer, the writer freezes it, swaps in a fresh buffer of the
//! same kind, writes the frozen one out as a level 0 run and merges any level
//! that filled up. Readers never wait on that work: they pin a [`Snapshot`] and
//! read from the buffers and runs it holds.

pub mod compaction;
pub mod flush;
pub mod iterator;
pub mod query;
mod recovery;
pub mod state;

use std::fmt;
use std::ops::RangeBounds;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::config::EngineConfig;
use crate::entry::Entry;
use crate::error::Result;
use crate::filter::KeyRange;
use crate::memtable::BufferKind;
use crate::metrics::{Label, Profiler};

pub use iterator::{EntrySource, MergeIterator};
pub use query::{Scan, Snapshot};
pub use state::EngineState;

pub struct Engine {
    config: EngineConfig,
    state: EngineState,
    profiler: Arc<Profiler>,
    /// Serialises writers: inserts, flushes and merges.
    write_lock: Mutex<()>,
}

impl Engine {
    pub fn open(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let profiler = Arc::new(Profiler::new(config.profile));
        let state = recovery::recover_state(&config, &profiler)?;

        tracing::debug!(
            dir = %config.dir.display(),
            buffer = %config.buffer.kind,
            capacity = config.buffer.capacity,
            size_ratio = config.size_ratio,
            "Opened engine"
        );
        Ok(Self {
            config,
            state,
            profiler,
            write_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profiler(&self) -> &Arc<Profiler> {
        &self.profiler
    }

    /// Inserts or overwrites `key`.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        self.write(|seq| Entry::value(key, value, seq))
    }

    /// Writes a tombstone for `key`. Deleting an absent key is not an error.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<()> {
        let key = key.into();
        self.write(|seq| Entry::tombstone(key, seq))
    }

    fn write(&self, make: impl FnOnce(u64) -> Entry) -> Result<()> {
        self.state.ensure_healthy()?;
        let _guard = self.write_lock.lock()?;
        self.state.ensure_healthy()?;

        let seq = self.state.next_seq();
        let entry = make(seq);

        let full = {
            let active = self.state.active.read()?;
            !active.is_empty() && active.size() + entry.size() > active.capacity()
        };
        if full {
            self.flush_locked()?;
        }

        self.state.active.read()?.insert(entry)?;
        self.state.publish(seq);
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.state.ensure_healthy()?;
        self.snapshot()?.get(key)
    }

    /// Live pairs in `range`, ascending, as of the moment of the call.
    pub fn scan(&self, range: impl RangeBounds<Vec<u8>>) -> Result<Scan> {
        self.state.ensure_healthy()?;
        let snapshot = self
            .profiler
            .time(Label::SnapshotIterator, || Snapshot::capture(&self.state))?;
        snapshot.scan(&KeyRange::from_bounds(&range))
    }

    /// Writes a tombstone for every key live in `range` when the call starts.
    /// Returns how many keys were deleted.
    pub fn delete_range(&self, range: impl RangeBounds<Vec<u8>>) -> Result<usize> {
        let keys = self
            .scan(range)?
            .map(|pair| pair.map(|(key, _)| key))
            .collect::<Result<Vec<_>>>()?;
        for key in &keys {
            self.delete(key.as_slice())?;
        }
        Ok(keys.len())
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        Snapshot::capture(&self.state)
    }

    /// Writes the active buffer out. Returns false when it was empty.
    pub fn flush(&self) -> Result<bool> {
        self.state.ensure_healthy()?;
        let _guard = self.write_lock.lock()?;
        self.flush_locked()
    }

    /// Caller holds the write guard.
    fn flush_locked(&self) -> Result<bool> {
        let Some(buffer) = flush::freeze_active(&self.state, &self.config, &self.profiler)? else {
            return Ok(false);
        };

        let result = flush::flush_frozen(&self.state, &self.config, &self.profiler, buffer)
            .and_then(|()| {
                compaction::merge_full_levels(&self.state, &self.config.dir, self.config.size_ratio)
            });
        if let Err(e) = result {
            self.state.mark_failed();
            tracing::error!(dir = %self.config.dir.display(), error = %e, "Flush failed");
            return Err(e);
        }
        Ok(true)
    }

    pub fn is_failed(&self) -> bool {
        self.state.is_failed()
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let (active_entries, active_bytes) = {
            let active = self.state.active.read()?;
            (active.len(), active.size())
        };
        let frozen_buffers = self.state.frozen.read()?.len();
        let levels = self
            .state
            .levels()?
            .levels()
            .iter()
            .map(|level| LevelStats {
                level: level.level_num,
                runs: level.len(),
                entries: level.entries(),
                bytes: level.size(),
            })
            .collect();

        Ok(EngineStats {
            buffer: self.config.buffer.kind,
            capacity: self.config.buffer.capacity,
            active_entries,
            active_bytes,
            frozen_buffers,
            levels,
            flushes: self.state.flushes.load(std::sync::atomic::Ordering::SeqCst),
            merges: self.state.merges.load(std::sync::atomic::Ordering::SeqCst),
            last_seq: self.state.visible_seq(),
        })
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.config.dir)
            .field("buffer", &self.config.buffer.kind)
            .field("failed", &self.state.is_failed())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelStats {
    pub level: usize,
    pub runs: usize,
    pub entries: u64,
    pub bytes: u64,
}

/// Engine counters printed by `run --stat 1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub buffer: BufferKind,
    pub capacity: usize,
    pub active_entries: usize,
    pub active_bytes: usize,
    pub frozen_buffers: usize,
    pub levels: Vec<LevelStats>,
    pub flushes: u64,
    pub merges: u64,
    pub last_seq: u64,
}

impl fmt::Display for EngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Buffer implementation: {}", self.buffer.display_name())?;
        writeln!(
            f,
            "Active buffer: {} entries, {} / {} bytes",
            self.active_entries, self.active_bytes, self.capacity
        )?;
        writeln!(f, "Frozen buffers: {}", self.frozen_buffers)?;
        writeln!(f, "Flushes: {}", self.flushes)?;
        writeln!(f, "Merges: {}", self.merges)?;
        writeln!(f, "Last sequence: {}", self.last_seq)?;
        for level in &self.levels {
            writeln!(
                f,
                "Level {}: {} runs, {} entries, {} bytes",
                level.level, level.runs, level.entries, level.bytes
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferOptions;
    use crate::Error;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn small(dir: &std::path::Path, kind: BufferKind) -> EngineConfig {
        EngineConfig::new(dir)
            .size_ratio(3)
            .profile(false)
            .buffer(
                BufferOptions::new(kind)
                    .capacity(512)
                    .prefix_length(8)
                    .bucket_count(16)
                    .threshold_use_skiplist(4),
            )
    }

    fn key(i: usize) -> Vec<u8> {
        format!("{:010}", i).into_bytes()
    }

    fn collect(scan: Scan) -> Vec<(Vec<u8>, Vec<u8>)> {
        scan.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_put_get_delete() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::open(EngineConfig::new(dir.path()))?;

        engine.put("a", "1")?;
        engine.put("b", "2")?;
        engine.put("a", "3")?;
        engine.delete("b")?;
        engine.delete("never-written")?;

        assert_eq!(engine.get(b"a")?, Some(b"3".to_vec()));
        assert_eq!(engine.get(b"b")?, None);
        assert_eq!(collect(engine.scan(..)?), vec![(b"a".to_vec(), b"3".to_vec())]);
        Ok(())
    }

    #[test]
    fn test_delete_range_removes_live_keys_in_range() -> Result<()> {
        let dir = tempdir()?;
        let engine = Engine::open(small(dir.path(), BufferKind::HashLinkedList))?;
        for i in 0..60 {
            engine.put(key(i), format!("v{}", i))?;
        }
        engine.delete(key(25))?;

        assert_eq!(engine.delete_range(key(20)..key(40))?, 19);
        let left: Vec<Vec<u8>> = collect(engine.scan(..)?).into_iter().map(|(k, _)| k).collect();
        let expected: Vec<Vec<u8>> = (0..20).chain(40..60).map(key).collect();
        assert_eq!(left, expected);
        assert_eq!(engine.get(&key(39))?, None);
        assert_eq!(engine.get(&key(40))?, Some(b"v40".to_vec()));

        // Nothing left to delete in the range the second time round.
        assert_eq!(engine.delete_range(key(20)..key(40))?, 0);
        Ok(())
    }

    #[test]
    fn test_data_survives_flushes_and_merges() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::open(small(dir.path(), BufferKind::SkipList))?;

        for i in 0..400 {
            engine.put(key(i), format!("v{}", i))?;
        }
        for i in (0..400).step_by(2) {
            engine.put(key(i), format!("w{}", i))?;
        }
        for i in (0..400).step_by(5) {
            engine.delete(key(i))?;
        }

        let stats = engine.stats()?;
        assert!(stats.flushes > 3);
        assert!(stats.merges > 0);

        for i in 0..400 {
            let expected = match (i % 5, i % 2) {
                (0, _) => None,
                (_, 0) => Some(format!("w{}", i).into_bytes()),
                _ => Some(format!("v{}", i).into_bytes()),
            };
            assert_eq!(engine.get(&key(i))?, expected, "key {}", i);
        }

        let scanned = collect(engine.scan(key(100)..key(120))?);
        let keys: Vec<Vec<u8>> = scanned.into_iter().map(|(k, _)| k).collect();
        let expected: Vec<Vec<u8>> = (100..120).filter(|i| i % 5 != 0).map(key).collect();
        assert_eq!(keys, expected);
        Ok(())
    }

    #[test]
    fn test_snapshot_ignores_later_writes() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::open(small(dir.path(), BufferKind::Vector))?;
        engine.put("k", "before")?;
        let snapshot = engine.snapshot()?;

        engine.put("k", "after")?;
        engine.put("new", "x")?;
        engine.flush()?;

        assert_eq!(snapshot.get(b"k")?, Some(b"before".to_vec()));
        assert_eq!(snapshot.get(b"new")?, None);
        assert_eq!(snapshot.scan(&KeyRange::all())?.count(), 1);
        assert_eq!(engine.get(b"k")?, Some(b"after".to_vec()));
        Ok(())
    }

    #[test]
    fn test_concurrent_scans_see_a_prefix_of_writes() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::open(small(dir.path(), BufferKind::SkipList))?;
        let total = 600;

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..total {
                    engine.put(key(i), "v").unwrap();
                }
            });
            for _ in 0..3 {
                s.spawn(|| {
                    let mut last = 0;
                    while last < total {
                        let keys: Vec<Vec<u8>> =
                            engine.scan(..).unwrap().map(|r| r.unwrap().0).collect();
                        let expected: Vec<Vec<u8>> = (0..keys.len()).map(key).collect();
                        assert_eq!(keys, expected);
                        assert!(keys.len() >= last);
                        last = keys.len();
                    }
                });
            }
        });
        Ok(())
    }

    #[test]
    fn test_flush_failure_is_fatal() -> Result<()> {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        let engine = Engine::open(EngineConfig::new(&db))?;
        engine.put("a", "1")?;

        std::fs::remove_dir_all(&db)?;
        assert!(engine.flush().is_err());
        assert!(engine.is_failed());
        assert!(matches!(engine.put("b", "2"), Err(Error::EngineFailed)));
        assert!(matches!(engine.get(b"a"), Err(Error::EngineFailed)));
        Ok(())
    }

    #[test]
    fn test_empty_flush_is_a_no_op() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::open(EngineConfig::new(dir.path()))?;
        assert!(!engine.flush()?);
        engine.put("a", "1")?;
        assert!(engine.flush()?);
        assert!(!engine.flush()?);
        assert_eq!(engine.stats()?.flushes, 1);
        Ok(())
    }

    #[test]
    fn test_reopen_keeps_flushed_data() -> Result<()> {
        let dir = tempdir().unwrap();
        let config = small(dir.path(), BufferKind::SkipList);
        {
            let engine = Engine::open(config.clone())?;
            for i in 0..100 {
                engine.put(key(i), "first")?;
            }
            engine.flush()?;
        }

        let engine = Engine::open(config.destroy_on_open(false))?;
        assert_eq!(engine.get(&key(42))?, Some(b"first".to_vec()));
        engine.put(key(42), "second")?;
        engine.flush()?;
        assert_eq!(engine.get(&key(42))?, Some(b"second".to_vec()));
        assert_eq!(engine.scan(..)?.count(), 100);
        Ok(())
    }

    #[test]
    fn test_all_buffer_kinds_agree() -> Result<()> {
        let mut results = Vec::new();
        for kind in BufferKind::ALL {
            let dir = tempdir().unwrap();
            let engine = Engine::open(small(dir.path(), kind))?;
            let mut model = BTreeMap::new();

            for round in 0..3 {
                for i in (0..150).map(|i| (i * 37 + round * 11) % 200) {
                    let value = format!("{}-{}", round, i).into_bytes();
                    engine.put(key(i), value.clone())?;
                    model.insert(key(i), value);
                }
                for i in (0..200).step_by(7 + round) {
                    engine.delete(key(i))?;
                    model.remove(&key(i));
                }
            }

            for i in 0..200 {
                assert_eq!(engine.get(&key(i))?, model.get(&key(i)).cloned(), "{} key {}", kind, i);
            }
            let scanned = collect(engine.scan(key(20)..=key(180))?);
            let expected: Vec<(Vec<u8>, Vec<u8>)> = model
                .range(key(20)..=key(180))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            assert_eq!(scanned, expected, "{}", kind);
            results.push(scanned);
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));
        Ok(())
    }

    #[test]
    fn test_stats_display() -> Result<()> {
        let dir = tempdir().unwrap();
        let engine = Engine::open(small(dir.path(), BufferKind::LinkList))?;
        for i in 0..50 {
            engine.put(key(i), "v")?;
        }
        let stats = engine.stats()?;
        let text = stats.to_string();
        assert!(text.contains("Buffer implementation: "));
        assert!(text.contains(&format!("Flushes: {}", stats.flushes)));
        assert_eq!(stats.last_seq, 50);
        Ok(())
    }
}
