//! Tiered merging of sorted runs.
//!
//! Level `n` collects runs until it holds `size_ratio` of them. Those runs
//! are then merged into a single run that becomes the newest run of level
//! `n + 1`, which may in turn cascade.
//!
//! A merge drops tombstones only when nothing older can exist below it: the
//! target level and every deeper level must be empty before the merge.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::iterator::{EntrySource, MergeIterator};
use super::state::EngineState;
use crate::error::Result;
use crate::filter::KeyRange;
use crate::level::LevelSet;
use crate::run::{run_path, Run, RunWriter};

/// The shallowest level that holds at least `size_ratio` runs.
pub fn find_merge_level(levels: &LevelSet, size_ratio: usize) -> Option<usize> {
    levels
        .levels()
        .iter()
        .position(|level| level.len() >= size_ratio)
}

/// Merges levels until none is full. Called by the writer after a flush.
pub fn merge_full_levels(state: &EngineState, dir: &Path, size_ratio: usize) -> Result<usize> {
    let mut merged = 0;
    loop {
        let current = state.levels()?;
        let Some(source) = find_merge_level(&current, size_ratio) else {
            return Ok(merged);
        };
        let next = merge_level(state, dir, &current, source)?;
        state.replace_levels(next)?;
        state.merges.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        merged += 1;
    }
}

/// Builds the level set that results from merging all runs of `source`.
fn merge_level(
    state: &EngineState,
    dir: &Path,
    current: &LevelSet,
    source: usize,
) -> Result<LevelSet> {
    let start = Instant::now();
    let target = source + 1;
    let drop_tombstones = current
        .levels()
        .iter()
        .skip(target)
        .all(|level| level.is_empty());

    let mut next = current.clone();
    let inputs = next.level_mut(source).take_runs();
    let input_entries: u64 = inputs.iter().map(|r| r.len()).sum();

    let sources: Vec<EntrySource> = inputs
        .iter()
        .map(|run| Box::new(run.scan(&KeyRange::all())) as EntrySource)
        .collect();

    let id = state.next_run_id();
    let mut writer = RunWriter::create(run_path(dir, id))?;
    for entry in MergeIterator::new(sources) {
        let entry = entry?;
        if drop_tombstones && entry.is_tombstone() {
            continue;
        }
        writer.add(&entry)?;
    }

    let output_entries = writer.entries();
    if output_entries == 0 {
        // Everything was deleted.
        writer.abandon()?;
    } else {
        let run: Run = writer.finish(id)?;
        next.level_mut(target).push_newest(Arc::new(run));
    }

    for run in &inputs {
        run.mark_obsolete();
    }

    tracing::info!(
        source_level = source,
        target_level = target,
        input_runs = inputs.len(),
        input_entries,
        output_entries,
        drop_tombstones,
        elapsed_us = start.elapsed().as_micros() as u64,
        "Merged level"
    );
    Ok(next)
}
