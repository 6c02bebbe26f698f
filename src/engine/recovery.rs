use std::fs;
use std::path::Path;
use std::sync::Arc;

use super::state::EngineState;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::filter::KeyRange;
use crate::level::LevelSet;
use crate::memtable::new_buffer;
use crate::metrics::Profiler;
use crate::run::{Run, RUN_EXTENSION};

/// Builds the engine state for `config.dir`, reopening any run files left by
/// an earlier instance.
///
/// No level layout is persisted. Run ids grow with recency, so every reopened
/// run goes to level 0 ordered by id and the first flush merges them down.
pub(crate) fn recover_state(config: &EngineConfig, profiler: &Arc<Profiler>) -> Result<EngineState> {
    let dir = &config.dir;
    if config.destroy_on_open && dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;

    let mut ids = run_ids(dir)?;
    ids.sort_unstable();

    let mut levels = LevelSet::new();
    let mut max_seq = 0;
    for &id in &ids {
        let run = Arc::new(Run::open(id, crate::run::run_path(dir, id))?);
        for entry in run.scan(&KeyRange::all()) {
            max_seq = max_seq.max(entry?.seq);
        }
        levels.add_flushed(run);
    }
    let next_run_id = ids.last().map_or(1, |id| id + 1);

    if !ids.is_empty() {
        tracing::info!(
            dir = %dir.display(),
            runs = ids.len(),
            max_seq,
            "Reopened existing runs"
        );
    }

    let active = new_buffer(&config.buffer, Arc::clone(profiler));
    Ok(EngineState::new(active, levels, max_seq + 1, next_run_id))
}

/// Ids of the run files in `dir`. Other files are ignored.
fn run_ids(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for dirent in fs::read_dir(dir)? {
        let path = dirent?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(RUN_EXTENSION) {
            continue;
        }
        match path.file_stem().and_then(|s| s.to_str()).map(str::parse::<u64>) {
            Some(Ok(id)) => ids.push(id),
            _ => tracing::warn!(path = %path.display(), "Ignoring run file with unparsable name"),
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;
    use crate::run::run_path;
    use tempfile::tempdir;

    #[test]
    fn test_recover_empty_dir() -> Result<()> {
        let dir = tempdir().unwrap();
        let config = EngineConfig::new(dir.path().join("db"));
        let state = recover_state(&config, &Arc::new(Profiler::quiet()))?;

        assert_eq!(state.levels()?.run_count(), 0);
        assert_eq!(state.next_seq(), 1);
        assert_eq!(state.next_run_id(), 1);
        Ok(())
    }

    #[test]
    fn test_recover_existing_runs() -> Result<()> {
        let dir = tempdir().unwrap();
        Run::create(3, run_path(dir.path(), 3), vec![Ok(Entry::value("a", "old", 4))])?;
        Run::create(7, run_path(dir.path(), 7), vec![Ok(Entry::value("a", "new", 9))])?;
        fs::write(dir.path().join("notes.txt"), b"not a run")?;

        let config = EngineConfig::new(dir.path()).destroy_on_open(false);
        let state = recover_state(&config, &Arc::new(Profiler::quiet()))?;

        let levels = state.levels()?;
        assert_eq!(levels.level(0).unwrap().len(), 2);
        assert_eq!(levels.get(b"a")?.unwrap().value, b"new");
        assert_eq!(state.next_seq(), 10);
        assert_eq!(state.next_run_id(), 8);
        Ok(())
    }

    #[test]
    fn test_destroy_on_open_clears_dir() -> Result<()> {
        let dir = tempdir().unwrap();
        Run::create(1, run_path(dir.path(), 1), vec![Ok(Entry::value("a", "1", 1))])?;

        let config = EngineConfig::new(dir.path());
        let state = recover_state(&config, &Arc::new(Profiler::quiet()))?;
        assert_eq!(state.levels()?.run_count(), 0);
        assert!(!run_path(dir.path(), 1).exists());
        Ok(())
    }
}
