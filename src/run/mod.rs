pub mod block;
pub mod index;
pub mod table;

use std::path::{Path, PathBuf};

pub use table::{Run, RunIter, RunMeta, RunWriter, MAX_BLOCK_SIZE};

pub const RUN_EXTENSION: &str = "run";

/// File name of run `id` inside `dir`.
pub fn run_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.{}", id, RUN_EXTENSION))
}
