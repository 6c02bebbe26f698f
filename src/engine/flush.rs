use std::sync::Arc;
use std::time::Instant;

use super::state::EngineState;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::filter::KeyRange;
use crate::memtable::{new_buffer, Memtable};
use crate::metrics::{Label, Profiler};
use crate::run::{run_path, Run};

/// Freezes the active buffer and installs an empty one in its place.
///
/// Both write locks are held for the swap, so a snapshot sees either the old
/// buffer as active or the old buffer frozen with the new one active. Returns
/// None when the active buffer is empty.
pub fn freeze_active(
    state: &EngineState,
    config: &EngineConfig,
    profiler: &Arc<Profiler>,
) -> Result<Option<Arc<dyn Memtable>>> {
    let mut active = state.active.write()?;
    let mut frozen = state.frozen.write()?;
    if active.is_empty() {
        return Ok(None);
    }
    active.freeze();
    let fresh = new_buffer(&config.buffer, Arc::clone(profiler));
    let old = std::mem::replace(&mut *active, fresh);
    frozen.push_front(Arc::clone(&old));
    Ok(Some(old))
}

/// Writes the oldest frozen buffer to a level 0 run and retires it.
pub fn flush_frozen(
    state: &EngineState,
    config: &EngineConfig,
    profiler: &Profiler,
    buffer: Arc<dyn Memtable>,
) -> Result<()> {
    let start = Instant::now();
    let id = state.next_run_id();
    let entries = buffer.len();

    // Drains in key order with shadowing resolved; tombstones stay so they
    // keep hiding older runs.
    let run = Run::create(
        id,
        run_path(&config.dir, id),
        buffer.range(&KeyRange::all(), u64::MAX)?.map(Ok),
    )?;
    let run_entries = run.len();

    {
        let mut frozen = state.frozen.write()?;
        let mut levels = state.levels.write()?;
        let mut next = (**levels).clone();
        next.add_flushed(Arc::new(run));
        *levels = Arc::new(next);
        frozen.retain(|b| !Arc::ptr_eq(b, &buffer));
    }

    let elapsed = start.elapsed();
    profiler.record(Label::Flush, elapsed);
    state.flushes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    tracing::info!(
        run_id = id,
        buffer = %buffer.kind(),
        buffered_entries = entries,
        run_entries,
        elapsed_us = elapsed.as_micros() as u64,
        "Flushed buffer to run"
    );
    Ok(())
}
