//! Sorted run files.
//!
//! ```text
//! +-------------+-------+----------------------------+---------+
//! | data blocks | index | min_key (u16 len + bytes)  | trailer |
//! |             |       | max_key (u16 len + bytes)  |         |
//! +-------------+-------+----------------------------+---------+
//!
//! trailer: index_offset u64 | keys_offset u64 | entries u64 | data_crc u64 | magic u64
//! ```
//!
//! The CRC-64 covers the data region and is verified when a run is opened.

use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::block::{Block, Builder, OwnedBlockIter};
use super::index::Index;
use crate::entry::Entry;
use crate::error::Result;
use crate::filter::{KeyRange, RangeFilter};
use crate::hasher::Hasher;
use crate::Error;

pub const MAX_BLOCK_SIZE: usize = 4096;

const TRAILER_SIZE: u64 = 40;
const MAGIC: u64 = 0x4d45_4d42_454e_4348;
const VERIFY_CHUNK: usize = 64 * 1024;

/// Writes entries, ascending by key with one entry per key, into a run file.
pub struct RunWriter {
    file: BufWriter<File>,
    path: PathBuf,
    builder: Builder,
    block_first_key: Option<Vec<u8>>,
    index: Index,
    offset: u64,
    hasher: Hasher,
    entries: u64,
    min_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
}

impl RunWriter {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self {
            file: BufWriter::new(file),
            path,
            builder: Builder::new(),
            block_first_key: None,
            index: Index::new(),
            offset: 0,
            hasher: Hasher::new(),
            entries: 0,
            min_key: None,
            last_key: None,
        })
    }

    pub fn add(&mut self, entry: &Entry) -> Result<()> {
        if let Some(last) = &self.last_key {
            if entry.key.as_slice() <= last.as_slice() {
                return Err(Error::InvalidOperation(format!(
                    "run keys must be strictly ascending: {:?} after {:?}",
                    String::from_utf8_lossy(&entry.key),
                    String::from_utf8_lossy(last)
                )));
            }
        }

        if self.block_first_key.is_none() {
            self.block_first_key = Some(entry.key.clone());
        }
        self.builder.add_entry(&entry.key, &entry.encode_value())?;
        if self.min_key.is_none() {
            self.min_key = Some(entry.key.clone());
        }
        self.last_key = Some(entry.key.clone());
        self.entries += 1;

        if self.builder.len() >= MAX_BLOCK_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Discards the partially written file.
    pub fn abandon(self) -> Result<()> {
        let RunWriter { file, path, .. } = self;
        drop(file);
        fs::remove_file(&path)?;
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        let Some(first_key) = self.block_first_key.take() else {
            return Ok(());
        };
        let builder = std::mem::replace(&mut self.builder, Builder::new());
        let data = builder.finish()?;
        self.file.write_all(&data)?;
        self.hasher.write(&data);
        self.index.push(first_key, self.offset, data.len() as u64);
        self.offset += data.len() as u64;
        Ok(())
    }

    /// Writes index and footer, syncs, and reopens the file for reading.
    pub fn finish(mut self, id: u64) -> Result<Run> {
        self.flush_block()?;
        let (Some(min_key), Some(max_key)) = (self.min_key.take(), self.last_key.take()) else {
            self.abandon()?;
            return Err(Error::InvalidOperation("cannot write an empty run".into()));
        };

        let index_offset = self.offset;
        let index_data = self.index.encode()?;
        self.file.write_all(&index_data)?;
        let keys_offset = index_offset + index_data.len() as u64;

        for key in [&min_key, &max_key] {
            self.file.write_u16::<BigEndian>(key.len() as u16)?;
            self.file.write_all(key)?;
        }

        self.file.write_u64::<BigEndian>(index_offset)?;
        self.file.write_u64::<BigEndian>(keys_offset)?;
        self.file.write_u64::<BigEndian>(self.entries)?;
        self.file.write_u64::<BigEndian>(self.hasher.checksum())?;
        self.file.write_u64::<BigEndian>(MAGIC)?;

        let file = self
            .file
            .into_inner()
            .map_err(|e| Error::IoError(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        Run::open(id, &self.path)
    }
}

/// Footer contents of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunMeta {
    pub entries: u64,
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
    pub checksum: u64,
    pub file_size: u64,
}

/// An immutable sorted run opened for reading.
#[derive(Debug)]
pub struct Run {
    id: u64,
    path: PathBuf,
    file: Mutex<File>,
    index: Index,
    data_len: u64,
    meta: RunMeta,
    obsolete: AtomicBool,
}

fn corrupt(path: &Path, msg: impl std::fmt::Display) -> Error {
    Error::Corruption(format!("{}: {}", path.display(), msg))
}

impl Run {
    /// Writes `entries` (ascending, one per key) as run `id` at `path`.
    pub fn create<I>(id: u64, path: impl Into<PathBuf>, entries: I) -> Result<Run>
    where
        I: IntoIterator<Item = Result<Entry>>,
    {
        let mut writer = RunWriter::create(path)?;
        for entry in entries {
            writer.add(&entry?)?;
        }
        writer.finish(id)
    }

    pub fn open(id: u64, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < TRAILER_SIZE {
            return Err(corrupt(path, "file shorter than trailer"));
        }

        file.seek(SeekFrom::Start(file_size - TRAILER_SIZE))?;
        let index_offset = file.read_u64::<BigEndian>()?;
        let keys_offset = file.read_u64::<BigEndian>()?;
        let entries = file.read_u64::<BigEndian>()?;
        let checksum = file.read_u64::<BigEndian>()?;
        let magic = file.read_u64::<BigEndian>()?;
        if magic != MAGIC {
            return Err(corrupt(path, format!("bad magic {:#x}", magic)));
        }
        if index_offset > keys_offset || keys_offset > file_size - TRAILER_SIZE {
            return Err(corrupt(path, "footer offsets out of order"));
        }

        let mut index_data = vec![0u8; (keys_offset - index_offset) as usize];
        file.seek(SeekFrom::Start(index_offset))?;
        file.read_exact(&mut index_data)?;
        let index = Index::try_from(index_data.as_slice())?;

        let mut keys = vec![0u8; (file_size - TRAILER_SIZE - keys_offset) as usize];
        file.read_exact(&mut keys)?;
        let mut cursor = Cursor::new(keys.as_slice());
        let mut read_key = |field: &'static str| -> Result<Vec<u8>> {
            let len = cursor
                .read_u16::<BigEndian>()
                .map_err(|e| Error::Decode(field, e))?;
            let mut key = vec![0u8; len as usize];
            cursor
                .read_exact(&mut key)
                .map_err(|e| Error::Decode(field, e))?;
            Ok(key)
        };
        let min_key = read_key("run min key")?;
        let max_key = read_key("run max key")?;

        let actual = checksum_region(&mut file, index_offset)?;
        if actual != checksum {
            return Err(corrupt(
                path,
                format!("checksum mismatch: stored {:#x}, computed {:#x}", checksum, actual),
            ));
        }

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(file),
            index,
            data_len: index_offset,
            meta: RunMeta {
                entries,
                min_key,
                max_key,
                checksum,
                file_size,
            },
            obsolete: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &RunMeta {
        &self.meta
    }

    pub fn len(&self) -> u64 {
        self.meta.entries
    }

    pub fn is_empty(&self) -> bool {
        self.meta.entries == 0
    }

    pub fn min_key(&self) -> &[u8] {
        &self.meta.min_key
    }

    pub fn max_key(&self) -> &[u8] {
        &self.meta.max_key
    }

    pub fn overlaps(&self, range: &KeyRange) -> bool {
        !range.is_beyond_end(&self.meta.min_key)
            && match range.start_key() {
                Some(start) => self.meta.max_key.as_slice() >= start,
                None => true,
            }
    }

    /// Removes the file once the last reference is dropped.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::SeqCst);
    }

    fn read_block(&self, idx: usize) -> Result<Block> {
        let handle = self
            .index
            .get(idx)
            .ok_or_else(|| corrupt(&self.path, format!("no block {}", idx)))?;
        if handle.offset + handle.size > self.data_len {
            return Err(corrupt(
                &self.path,
                format!("block {} extends past the data region", idx),
            ));
        }
        let mut data = vec![0u8; handle.size as usize];
        {
            let mut file = self.file.lock()?;
            file.seek(SeekFrom::Start(handle.offset))?;
            file.read_exact(&mut data)?;
        }
        Block::new(data)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Entry>> {
        if key < self.min_key() || key > self.max_key() {
            return Ok(None);
        }
        let Some(idx) = self.index.find(key) else {
            return Ok(None);
        };
        match self.read_block(idx)?.get(key)? {
            Some(encoded) => Ok(Some(Entry::decode(key.to_vec(), &encoded)?)),
            None => Ok(None),
        }
    }

    /// Entries in `range`, tombstones included.
    pub fn scan(self: &Arc<Self>, range: &KeyRange) -> RangeFilter<RunIter> {
        let blocks = if range.is_empty() || !self.overlaps(range) {
            0..0
        } else {
            self.index.range(range)
        };
        RangeFilter::new(
            RunIter {
                run: Arc::clone(self),
                blocks,
                current: None,
                failed: false,
            },
            range.clone(),
        )
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::SeqCst) {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove obsolete run");
            }
        }
    }
}

fn checksum_region(file: &mut File, len: u64) -> Result<u64> {
    let mut hasher = Hasher::new();
    let mut chunk = vec![0u8; VERIFY_CHUNK];
    let mut remaining = len;
    file.seek(SeekFrom::Start(0))?;
    while remaining > 0 {
        let n = remaining.min(VERIFY_CHUNK as u64) as usize;
        file.read_exact(&mut chunk[..n])?;
        hasher.write(&chunk[..n]);
        remaining -= n as u64;
    }
    Ok(hasher.checksum())
}

/// Walks the candidate blocks of a run in order, loading one at a time.
pub struct RunIter {
    run: Arc<Run>,
    blocks: Range<usize>,
    current: Option<OwnedBlockIter>,
    failed: bool,
}

impl Iterator for RunIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(iter) = &mut self.current {
                match iter.next() {
                    Some(Ok((key, value))) => {
                        let decoded = Entry::decode(key, &value);
                        self.failed = decoded.is_err();
                        return Some(decoded);
                    }
                    Some(Err(e)) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                    None => self.current = None,
                }
            }

            let idx = self.blocks.next()?;
            match self.run.read_block(idx) {
                Ok(block) => self.current = Some(Arc::new(block).into_owned_iter()),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
