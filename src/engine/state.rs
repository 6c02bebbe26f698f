use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::level::LevelSet;
use crate::memtable::Memtable;
use crate::Error;

/// Mutable engine state.
///
/// Lock order is always `active`, then `frozen`, then `levels`. Snapshots take
/// all three read locks together, and every structural change takes the write
/// locks it needs in that same order, so a reader sees a change either fully
/// or not at all.
pub struct EngineState {
    pub active: RwLock<Arc<dyn Memtable>>,
    /// Buffers that are frozen but not yet on disk, newest first.
    pub frozen: RwLock<VecDeque<Arc<dyn Memtable>>>,
    pub levels: RwLock<Arc<LevelSet>>,

    next_seq: AtomicU64,
    /// Highest sequence whose entry is fully inserted.
    visible_seq: AtomicU64,
    next_run_id: AtomicU64,

    failed: AtomicBool,
    pub flushes: AtomicU64,
    pub merges: AtomicU64,
}

impl EngineState {
    pub fn new(
        active: Arc<dyn Memtable>,
        levels: LevelSet,
        next_seq: u64,
        next_run_id: u64,
    ) -> Self {
        Self {
            active: RwLock::new(active),
            frozen: RwLock::new(VecDeque::new()),
            levels: RwLock::new(Arc::new(levels)),
            next_seq: AtomicU64::new(next_seq.max(1)),
            visible_seq: AtomicU64::new(next_seq.max(1) - 1),
            next_run_id: AtomicU64::new(next_run_id),
            failed: AtomicBool::new(false),
            flushes: AtomicU64::new(0),
            merges: AtomicU64::new(0),
        }
    }

    /// Get next sequence number atomically
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Makes `seq` visible to snapshots taken from now on.
    pub fn publish(&self, seq: u64) {
        self.visible_seq.fetch_max(seq, Ordering::SeqCst);
    }

    pub fn visible_seq(&self) -> u64 {
        self.visible_seq.load(Ordering::SeqCst)
    }

    /// Get next run ID atomically
    pub fn next_run_id(&self) -> u64 {
        self.next_run_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn ensure_healthy(&self) -> Result<()> {
        if self.is_failed() {
            Err(Error::EngineFailed)
        } else {
            Ok(())
        }
    }

    /// Current level set, for readers that only need the runs.
    pub fn levels(&self) -> Result<Arc<LevelSet>> {
        Ok(self.levels.read()?.clone())
    }

    /// Installs `next` in place of the current level set.
    pub fn replace_levels(&self, next: LevelSet) -> Result<()> {
        *self.levels.write()? = Arc::new(next);
        Ok(())
    }
}
