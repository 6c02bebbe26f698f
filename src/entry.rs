//! Key-value record shared by every buffer strategy and by the on-disk runs.
//!
//! An entry is immutable once created. Entries for the same key are totally
//! ordered by their sequence number and the highest one wins on read.
//!
//! ## Encoded value layout
//!
//! Runs store the key in the block entry itself and the rest of the record
//! packed into the block value:
//!
//! ```text
//! +----------+---------+-------------+
//! | seq: u64 | kind:u8 | value bytes |
//! +----------+---------+-------------+
//! ```

use std::cmp::Ordering;
use std::io::{self, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::Result;
use crate::Error;

/// Bytes accounted per entry on top of key and value (sequence + kind).
pub const ENTRY_OVERHEAD: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Value,
    Tombstone,
}

impl EntryKind {
    fn tag(self) -> u8 {
        match self {
            EntryKind::Value => 0,
            EntryKind::Tombstone => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(EntryKind::Value),
            1 => Ok(EntryKind::Tombstone),
            other => Err(Error::Corruption(format!("unknown entry kind {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub seq: u64,
    pub kind: EntryKind,
}

impl Entry {
    pub fn value(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, seq: u64) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            seq,
            kind: EntryKind::Value,
        }
    }

    pub fn tombstone(key: impl Into<Vec<u8>>, seq: u64) -> Self {
        Self {
            key: key.into(),
            value: Vec::new(),
            seq,
            kind: EntryKind::Tombstone,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind == EntryKind::Tombstone
    }

    /// Bytes this entry occupies in a buffer's capacity accounting.
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len() + ENTRY_OVERHEAD
    }

    /// Ordering used inside buffers and merges: key ascending, then newest first.
    pub fn internal_cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| other.seq.cmp(&self.seq))
    }

    /// Encodes everything except the key into a run block value.
    pub fn encode_value(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ENTRY_OVERHEAD + self.value.len());
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.push(self.kind.tag());
        buf.extend_from_slice(&self.value);
        buf
    }

    /// Rebuilds an entry from a run block key and its encoded value.
    pub fn decode(key: Vec<u8>, encoded: &[u8]) -> Result<Self> {
        let mut cursor = io::Cursor::new(encoded);
        let seq = cursor
            .read_u64::<BigEndian>()
            .map_err(|e| Error::Decode("entry seq", e))?;
        let tag = cursor
            .read_u8()
            .map_err(|e| Error::Decode("entry kind", e))?;
        let kind = EntryKind::from_tag(tag)?;
        let mut value = Vec::with_capacity(encoded.len().saturating_sub(ENTRY_OVERHEAD));
        cursor
            .read_to_end(&mut value)
            .map_err(|e| Error::Decode("entry value", e))?;
        if kind == EntryKind::Tombstone && !value.is_empty() {
            return Err(Error::Corruption("tombstone carries a value".into()));
        }
        Ok(Self {
            key,
            value,
            seq,
            kind,
        })
    }
}

/// Keeps only the newest entry per key from an input sorted by `internal_cmp`.
pub fn dedup_newest(sorted: Vec<Entry>) -> Vec<Entry> {
    let mut out: Vec<Entry> = Vec::with_capacity(sorted.len());
    for entry in sorted {
        match out.last() {
            Some(last) if last.key == entry.key => {}
            _ => out.push(entry),
        }
    }
    out
}
