use std::path::PathBuf;

use crate::error::Result;
use crate::memtable::BufferKind;
use crate::Error;

/// Default page geometry: 4096 pages of 64 entries of 64 bytes (16 MiB).
pub const DEFAULT_PAGES: usize = 4096;
pub const DEFAULT_ENTRIES_PER_PAGE: usize = 64;
pub const DEFAULT_ENTRY_SIZE: usize = 64;

/// `pages × entries_per_page × entry_size` in bytes.
pub fn page_capacity(pages: usize, entries_per_page: usize, entry_size: usize) -> Result<usize> {
    pages
        .checked_mul(entries_per_page)
        .and_then(|entries| entries.checked_mul(entry_size))
        .ok_or_else(|| {
            Error::InvalidConfig(format!(
                "buffer of {} pages of {} entries of {} bytes overflows",
                pages, entries_per_page, entry_size
            ))
        })
}

/// Configuration for a write buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferOptions {
    /// Which strategy backs the buffer (default: skip list)
    pub kind: BufferKind,

    /// Capacity in bytes before the buffer reports full (default: 16MB)
    pub capacity: usize,

    /// Leading key bytes used to pick a hash bucket; 0 hashes the whole key
    pub prefix_length: usize,

    /// Number of hash buckets for the hash-bucketed strategies (default: 50000)
    pub bucket_count: usize,

    /// Bucket size at which a hash linked list converts to a skip list, and the
    /// non-empty bucket count above which a hash range query falls back to a
    /// full sorted scan (default: 256)
    pub threshold_use_skiplist: usize,

    /// Entries reserved up front by the vector strategies (default: 0)
    pub preallocation: usize,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            kind: BufferKind::SkipList,
            capacity: DEFAULT_PAGES * DEFAULT_ENTRIES_PER_PAGE * DEFAULT_ENTRY_SIZE,
            prefix_length: 0,
            bucket_count: 50_000,
            threshold_use_skiplist: 256,
            preallocation: 0,
        }
    }
}

impl BufferOptions {
    pub fn new(kind: BufferKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Set buffer strategy
    pub fn kind(mut self, kind: BufferKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set capacity in bytes
    pub fn capacity(mut self, bytes: usize) -> Self {
        self.capacity = bytes;
        self
    }

    /// Set capacity from page geometry, see [`page_capacity`]
    pub fn pages(self, pages: usize, entries_per_page: usize, entry_size: usize) -> Result<Self> {
        Ok(self.capacity(page_capacity(pages, entries_per_page, entry_size)?))
    }

    pub fn prefix_length(mut self, len: usize) -> Self {
        self.prefix_length = len;
        self
    }

    pub fn bucket_count(mut self, count: usize) -> Self {
        self.bucket_count = count;
        self
    }

    pub fn threshold_use_skiplist(mut self, threshold: usize) -> Self {
        self.threshold_use_skiplist = threshold;
        self
    }

    pub fn preallocation(mut self, entries: usize) -> Self {
        self.preallocation = entries;
        self
    }
}

/// Configuration for the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding the sorted run files
    pub dir: PathBuf,

    /// Write buffer configuration
    pub buffer: BufferOptions,

    /// Runs a level may hold before they merge into the next level (default: 10)
    pub size_ratio: usize,

    /// Remove any existing run files when opening (default: true)
    pub destroy_on_open: bool,

    /// Keep every timing event, not only totals (default: true)
    pub profile: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./db"),
            buffer: BufferOptions::default(),
            size_ratio: 10,
            destroy_on_open: true,
            profile: true,
        }
    }
}

impl EngineConfig {
    /// Create a new config with the given directory
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Default::default()
        }
    }

    pub fn buffer(mut self, buffer: BufferOptions) -> Self {
        self.buffer = buffer;
        self
    }

    /// Shorthand for replacing only the buffer strategy
    pub fn buffer_kind(mut self, kind: BufferKind) -> Self {
        self.buffer.kind = kind;
        self
    }

    pub fn size_ratio(mut self, ratio: usize) -> Self {
        self.size_ratio = ratio;
        self
    }

    pub fn destroy_on_open(mut self, destroy: bool) -> Self {
        self.destroy_on_open = destroy;
        self
    }

    pub fn profile(mut self, enabled: bool) -> Self {
        self.profile = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.size_ratio < 2 {
            return Err(Error::InvalidConfig(format!(
                "size ratio must be at least 2, got {}",
                self.size_ratio
            )));
        }
        if self.buffer.capacity == 0 {
            return Err(Error::InvalidConfig(
                "buffer capacity must be positive".into(),
            ));
        }
        if self.buffer.bucket_count == 0 {
            return Err(Error::InvalidConfig(
                "bucket count must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.dir, PathBuf::from("./db"));
        assert_eq!(config.size_ratio, 10);
        assert_eq!(config.buffer.kind, BufferKind::SkipList);
        assert_eq!(config.buffer.capacity, 16 * 1024 * 1024);
        assert_eq!(config.buffer.bucket_count, 50_000);
        assert_eq!(config.buffer.threshold_use_skiplist, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new("/tmp/test")
            .size_ratio(4)
            .profile(false)
            .buffer(
                BufferOptions::new(BufferKind::HashLinkedList)
                    .pages(128, 4, 64)
                    .unwrap()
                    .prefix_length(6)
                    .bucket_count(1000)
                    .threshold_use_skiplist(20_000),
            );

        assert_eq!(config.dir, PathBuf::from("/tmp/test"));
        assert_eq!(config.size_ratio, 4);
        assert!(!config.profile);
        assert_eq!(config.buffer.kind, BufferKind::HashLinkedList);
        assert_eq!(config.buffer.capacity, 128 * 4 * 64);
        assert_eq!(config.buffer.prefix_length, 6);
        assert_eq!(config.buffer.bucket_count, 1000);
        assert_eq!(config.buffer.threshold_use_skiplist, 20_000);
    }

    #[test]
    fn test_validate_rejects_degenerate_values() {
        assert!(EngineConfig::default().size_ratio(1).validate().is_err());
        let config = EngineConfig::default().buffer(BufferOptions::default().capacity(0));
        assert!(config.validate().is_err());
        let config = EngineConfig::default().buffer(BufferOptions::default().bucket_count(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_page_geometry_overflow_is_rejected() {
        assert_eq!(page_capacity(4096, 64, 64).unwrap(), 16 * 1024 * 1024);
        assert!(matches!(
            page_capacity(usize::MAX, 2, 1),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            BufferOptions::default().pages(1 << 40, 1 << 20, 1 << 10),
            Err(Error::InvalidConfig(_))
        ));
    }
}
