use std::sync::Arc;

use crate::entry::Entry;
use crate::error::Result;
use crate::run::Run;

/// Runs of one level, newest first.
#[derive(Debug, Clone, Default)]
pub struct Level {
    pub level_num: usize,
    runs: Vec<Arc<Run>>,
}

impl Level {
    pub fn new(level_num: usize) -> Self {
        Self {
            level_num,
            runs: Vec::new(),
        }
    }

    pub fn runs(&self) -> &[Arc<Run>] {
        &self.runs
    }

    /// Number of runs in the level.
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Total entries across the level's runs.
    pub fn entries(&self) -> u64 {
        self.runs.iter().map(|r| r.len()).sum()
    }

    /// Total bytes on disk.
    pub fn size(&self) -> u64 {
        self.runs.iter().map(|r| r.meta().file_size).sum()
    }

    pub fn push_newest(&mut self, run: Arc<Run>) {
        self.runs.insert(0, run);
    }

    pub fn take_runs(&mut self) -> Vec<Arc<Run>> {
        std::mem::take(&mut self.runs)
    }
}

/// All levels of the tree. Installed behind an `Arc` and replaced wholesale,
/// so a reader's copy never changes under it.
#[derive(Debug, Clone, Default)]
pub struct LevelSet {
    levels: Vec<Level>,
}

impl LevelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn level(&self, level_num: usize) -> Option<&Level> {
        self.levels.get(level_num)
    }

    /// The level, created along with any missing shallower ones.
    pub fn level_mut(&mut self, level_num: usize) -> &mut Level {
        while self.levels.len() <= level_num {
            let next = self.levels.len();
            self.levels.push(Level::new(next));
        }
        &mut self.levels[level_num]
    }

    /// Installs a freshly flushed run at the front of level 0.
    pub fn add_flushed(&mut self, run: Arc<Run>) {
        self.level_mut(0).push_newest(run);
    }

    pub fn run_count(&self) -> usize {
        self.levels.iter().map(|l| l.len()).sum()
    }

    /// Deepest level holding at least one run.
    pub fn deepest_non_empty(&self) -> Option<usize> {
        self.levels.iter().rposition(|l| !l.is_empty())
    }

    /// Every run from newest to oldest: level 0 front to back, then deeper
    /// levels in order.
    pub fn runs_newest_first(&self) -> impl Iterator<Item = &Arc<Run>> {
        self.levels.iter().flat_map(|l| l.runs.iter())
    }

    /// First entry for `key` in recency order, tombstones included.
    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        for run in self.runs_newest_first() {
            if let Some(entry) = run.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }
}
