pub mod bench;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod filter;
pub mod hasher;
pub mod level;
pub mod memtable;
pub mod metrics;
pub mod run;
pub mod workload;

pub use config::{BufferOptions, EngineConfig};
pub use engine::{Engine, EngineStats, Scan, Snapshot};
pub use entry::Entry;
pub use error::{Error, Result};
pub use hasher::Hasher;
pub use memtable::{BufferKind, Memtable};
