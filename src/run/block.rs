//! Prefix-compressed data blocks.
//!
//! ```text
//! +---------+---------+-----+----------------------+--------------+
//! | entry 0 | entry 1 | ... | restarts: [u32; n]   | n: u32       |
//! +---------+---------+-----+----------------------+--------------+
//!
//! entry: shared u16 | unshared u16 | value_len u32 | key suffix | value
//! ```
//!
//! Every `RESTART_INTERVAL`th entry stores its full key so a reader can
//! binary-search the restart points before scanning.

use std::io::Cursor;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::Error;

const RESTART_INTERVAL: usize = 16;
const ENTRY_HEADER: usize = 8;

pub struct Builder {
    buffer: Vec<u8>,
    restart_positions: Vec<u32>,
    entry_count: usize,
    last_key: Vec<u8>,
}

impl Builder {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            restart_positions: Vec::new(),
            entry_count: 0,
            last_key: Vec::new(),
        }
    }

    /// Keys must arrive in ascending order.
    pub fn add_entry(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.len() > u16::MAX as usize || value.len() > u32::MAX as usize {
            return Err(Error::InvalidOperation(format!(
                "entry too large for a block: key {} bytes, value {} bytes",
                key.len(),
                value.len()
            )));
        }

        let shared = if self.entry_count % RESTART_INTERVAL == 0 {
            self.restart_positions.push(self.buffer.len() as u32);
            0
        } else {
            shared_prefix_length(&self.last_key, key)
        };
        let unshared = key.len() - shared;

        self.buffer.write_u16::<BigEndian>(shared as u16)?;
        self.buffer.write_u16::<BigEndian>(unshared as u16)?;
        self.buffer.write_u32::<BigEndian>(value.len() as u32)?;
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.entry_count += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<Vec<u8>> {
        for pos in &self.restart_positions {
            self.buffer.write_u32::<BigEndian>(*pos)?;
        }
        self.buffer
            .write_u32::<BigEndian>(self.restart_positions.len() as u32)?;
        Ok(self.buffer)
    }

    /// Bytes written so far, restart array excluded.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }
}

fn shared_prefix_length(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn corrupt(msg: impl Into<String>) -> Error {
    Error::Corruption(msg.into())
}

#[derive(Debug)]
pub struct Block {
    data: Vec<u8>,
    restart_positions: Vec<u32>,
}

impl Block {
    pub fn new(mut data: Vec<u8>) -> Result<Self> {
        if data.len() < 4 {
            return Err(corrupt("block shorter than its restart count"));
        }
        let count_offset = data.len() - 4;
        let num_restarts = Cursor::new(&data[count_offset..]).read_u32::<BigEndian>()? as usize;

        let restart_array_size = num_restarts
            .checked_mul(4)
            .ok_or_else(|| corrupt("restart count overflows"))?;
        if num_restarts == 0 || count_offset < restart_array_size {
            return Err(corrupt(format!(
                "block of {} bytes cannot hold {} restart points",
                data.len(),
                num_restarts
            )));
        }

        let restart_offset = count_offset - restart_array_size;
        let mut cursor = Cursor::new(&data[restart_offset..count_offset]);
        let mut restart_positions = Vec::with_capacity(num_restarts);
        for _ in 0..num_restarts {
            let pos = cursor.read_u32::<BigEndian>()?;
            if pos as usize >= restart_offset {
                return Err(corrupt(format!("restart point {} out of bounds", pos)));
            }
            restart_positions.push(pos);
        }

        data.truncate(restart_offset);
        Ok(Self {
            data,
            restart_positions,
        })
    }

    /// Decodes the entry at `offset`, given the previous key for prefix
    /// expansion. Returns the key, the value and the offset of the next entry.
    fn read_entry(&self, offset: usize, last_key: &[u8]) -> Result<(Vec<u8>, Vec<u8>, usize)> {
        let header = self
            .data
            .get(offset..offset + ENTRY_HEADER)
            .ok_or_else(|| corrupt(format!("truncated entry header at {}", offset)))?;
        let mut cursor = Cursor::new(header);
        let shared = cursor.read_u16::<BigEndian>()? as usize;
        let unshared = cursor.read_u16::<BigEndian>()? as usize;
        let value_len = cursor.read_u32::<BigEndian>()? as usize;

        if shared > last_key.len() {
            return Err(corrupt(format!(
                "entry at {} shares {} bytes of a {} byte key",
                offset,
                shared,
                last_key.len()
            )));
        }
        let key_start = offset + ENTRY_HEADER;
        let value_start = key_start + unshared;
        let end = value_start + value_len;
        if end > self.data.len() {
            return Err(corrupt(format!("entry at {} runs past block end", offset)));
        }

        let mut key = Vec::with_capacity(shared + unshared);
        key.extend_from_slice(&last_key[..shared]);
        key.extend_from_slice(&self.data[key_start..value_start]);
        Ok((key, self.data[value_start..end].to_vec(), end))
    }

    /// Index of the last restart point whose key is `<= target`.
    fn restart_before(&self, target: &[u8]) -> Result<usize> {
        let (mut low, mut high) = (0, self.restart_positions.len());
        while low < high {
            let mid = (low + high) / 2;
            let (key, _, _) = self.read_entry(self.restart_positions[mid] as usize, &[])?;
            if key.as_slice() <= target {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low.saturating_sub(1))
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let start = self.restart_positions[self.restart_before(key)?] as usize;
        for entry in BlockIter::at(self, start) {
            let (found, value) = entry?;
            match found.as_slice().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(value)),
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    pub fn iter(&self) -> BlockIter<'_> {
        BlockIter::at(self, 0)
    }

    /// Iterator that owns the block, for scans that outlive the reader call.
    pub fn into_owned_iter(self: Arc<Self>) -> OwnedBlockIter {
        OwnedBlockIter {
            block: self,
            offset: 0,
            last_key: Vec::new(),
            failed: false,
        }
    }
}

pub struct BlockIter<'a> {
    block: &'a Block,
    offset: usize,
    last_key: Vec<u8>,
    failed: bool,
}

impl<'a> BlockIter<'a> {
    fn at(block: &'a Block, offset: usize) -> Self {
        Self {
            block,
            offset,
            last_key: Vec::new(),
            failed: false,
        }
    }
}

impl Iterator for BlockIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        step(self.block, &mut self.offset, &mut self.last_key, &mut self.failed)
    }
}

pub struct OwnedBlockIter {
    block: Arc<Block>,
    offset: usize,
    last_key: Vec<u8>,
    failed: bool,
}

impl Iterator for OwnedBlockIter {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        step(&self.block, &mut self.offset, &mut self.last_key, &mut self.failed)
    }
}

fn step(
    block: &Block,
    offset: &mut usize,
    last_key: &mut Vec<u8>,
    failed: &mut bool,
) -> Option<Result<(Vec<u8>, Vec<u8>)>> {
    if *failed || *offset >= block.data.len() {
        return None;
    }
    match block.read_entry(*offset, last_key) {
        Ok((key, value, next)) => {
            *offset = next;
            last_key.clone_from(&key);
            Some(Ok((key, value)))
        }
        Err(e) => {
            *failed = true;
            Some(Err(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<(Vec<u8>, Vec<u8>)> {
        vec![
            (b"apple".to_vec(), b"fruit".to_vec()),
            (b"application".to_vec(), b"software".to_vec()),
            (b"banana".to_vec(), b"fruit".to_vec()),
            (b"band".to_vec(), b"music".to_vec()),
            (b"bandana".to_vec(), b"clothing".to_vec()),
        ]
    }

    fn build(entries: &[(Vec<u8>, Vec<u8>)]) -> Block {
        let mut builder = Builder::new();
        for (key, value) in entries {
            builder.add_entry(key, value).unwrap();
        }
        Block::new(builder.finish().unwrap()).expect("Failed to create block")
    }

    #[test]
    fn test_block_builder_and_reader() {
        let entries = sample();
        let block = build(&entries);

        for (key, value) in &entries {
            assert_eq!(block.get(key).unwrap().as_ref(), Some(value));
        }
        assert_eq!(block.get(b"unknown").unwrap(), None);
        assert_eq!(block.get(b"aaa").unwrap(), None);

        let scanned: Vec<(Vec<u8>, Vec<u8>)> = block.iter().map(|e| e.unwrap()).collect();
        assert_eq!(scanned, entries);
    }

    #[test]
    fn test_seek_across_restart_points() {
        let entries: Vec<(Vec<u8>, Vec<u8>)> = (0..100)
            .map(|i| (format!("key_{:03}", i).into_bytes(), vec![i as u8]))
            .collect();
        let block = build(&entries);
        assert_eq!(block.restart_positions.len(), 7);
        for (key, value) in &entries {
            assert_eq!(block.get(key).unwrap().as_ref(), Some(value));
        }
        let owned = Arc::new(block).into_owned_iter().count();
        assert_eq!(owned, 100);
    }

    #[test]
    fn test_truncated_block_is_corruption() {
        let mut builder = Builder::new();
        builder.add_entry(b"key", b"value").unwrap();
        let mut data = builder.finish().unwrap();
        // Drop the restart array but keep a count that claims one.
        data.drain(data.len() - 8..data.len() - 4);
        assert!(matches!(Block::new(data), Err(Error::Corruption(_))));
        assert!(matches!(Block::new(vec![0, 1]), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_bad_shared_prefix_is_corruption() {
        let mut builder = Builder::new();
        builder.add_entry(b"key", b"value").unwrap();
        let mut data = builder.finish().unwrap();
        data[1] = 9; // first entry claims to share 9 bytes with nothing
        let block = Block::new(data).unwrap();
        let first = block.iter().next().unwrap();
        assert!(matches!(first, Err(Error::Corruption(_))));
    }
}
