use std::convert::TryFrom;
use std::io::{Cursor, Read, Write};
use std::ops::{Bound, Range};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::filter::KeyRange;
use crate::Error;

/// Location of one data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHandle {
    pub first_key: Vec<u8>,
    pub offset: u64,
    pub size: u64,
}

/// Sparse index: one handle per block, ordered by first key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    blocks: Vec<BlockHandle>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, first_key: Vec<u8>, offset: u64, size: u64) {
        self.blocks.push(BlockHandle {
            first_key,
            offset,
            size,
        });
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&BlockHandle> {
        self.blocks.get(idx)
    }

    /// The block that would hold `key`: the last one whose first key is
    /// `<= key`. None when `key` sorts before every block.
    pub fn find(&self, key: &[u8]) -> Option<usize> {
        let after = self
            .blocks
            .partition_point(|b| b.first_key.as_slice() <= key);
        after.checked_sub(1)
    }

    /// Blocks that may hold keys in `range`.
    pub fn range(&self, range: &KeyRange) -> Range<usize> {
        let start = match &range.start {
            Bound::Included(key) | Bound::Excluded(key) => self.find(key).unwrap_or(0),
            Bound::Unbounded => 0,
        };
        let end = match &range.end {
            Bound::Included(key) => self
                .blocks
                .partition_point(|b| b.first_key.as_slice() <= key.as_slice()),
            Bound::Excluded(key) => self
                .blocks
                .partition_point(|b| b.first_key.as_slice() < key.as_slice()),
            Bound::Unbounded => self.blocks.len(),
        };
        start..end.max(start)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        for block in &self.blocks {
            buffer.write_u16::<BigEndian>(block.first_key.len() as u16)?;
            buffer.write_all(&block.first_key)?;
            buffer.write_u64::<BigEndian>(block.offset)?;
            buffer.write_u64::<BigEndian>(block.size)?;
        }
        Ok(buffer)
    }
}

impl TryFrom<&[u8]> for Index {
    type Error = Error;

    fn try_from(buffer: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(buffer);
        let mut index = Index::new();

        while (cursor.position() as usize) < buffer.len() {
            let key_len = cursor
                .read_u16::<BigEndian>()
                .map_err(|e| Error::Decode("key length in index block", e))?
                as usize;
            let mut first_key = vec![0u8; key_len];
            cursor
                .read_exact(&mut first_key)
                .map_err(|e| Error::Decode("key in index block", e))?;
            let offset = cursor
                .read_u64::<BigEndian>()
                .map_err(|e| Error::Decode("block offset in index block", e))?;
            let size = cursor
                .read_u64::<BigEndian>()
                .map_err(|e| Error::Decode("block size in index block", e))?;
            index.push(first_key, offset, size);
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Index {
        let mut index = Index::new();
        index.push(b"b".to_vec(), 0, 10);
        index.push(b"f".to_vec(), 10, 10);
        index.push(b"k".to_vec(), 20, 10);
        index
    }

    #[test]
    fn test_find_block() {
        let index = sample();
        assert_eq!(index.find(b"a"), None);
        assert_eq!(index.find(b"b"), Some(0));
        assert_eq!(index.find(b"e"), Some(0));
        assert_eq!(index.find(b"f"), Some(1));
        assert_eq!(index.find(b"z"), Some(2));
    }

    #[test]
    fn test_range_blocks() {
        let index = sample();
        assert_eq!(index.range(&KeyRange::all()), 0..3);
        assert_eq!(index.range(&KeyRange::inclusive(b"c".to_vec(), b"g".to_vec())), 0..2);
        assert_eq!(index.range(&KeyRange::half_open(b"g".to_vec(), b"k".to_vec())), 1..2);
        assert_eq!(index.range(&KeyRange::inclusive(b"a".to_vec(), b"a".to_vec())), 0..0);
    }

    #[test]
    fn test_encode_decode() {
        let index = sample();
        let bytes = index.encode().unwrap();
        assert_eq!(Index::try_from(bytes.as_slice()).unwrap(), index);
        assert!(matches!(
            Index::try_from(&bytes[..bytes.len() - 3]),
            Err(Error::Decode(_, _))
        ));
    }
}
