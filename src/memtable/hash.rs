//! Prefix hashing shared by the hash bucketed buffers.

use crate::config::BufferOptions;
use crate::filter::KeyRange;
use crate::hasher;

/// Maps keys to buckets by the CRC-64 of their leading `prefix_length` bytes.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BucketIndex {
    prefix_length: usize,
    bucket_count: usize,
}

impl BucketIndex {
    pub(crate) fn new(options: &BufferOptions) -> Self {
        Self {
            prefix_length: options.prefix_length,
            bucket_count: options.bucket_count.max(1),
        }
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// The hashed part of `key`: the whole key when it is shorter than the
    /// prefix or when no prefix length is configured.
    pub(crate) fn prefix<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        if self.prefix_length == 0 || key.len() < self.prefix_length {
            key
        } else {
            &key[..self.prefix_length]
        }
    }

    pub(crate) fn bucket_of(&self, key: &[u8]) -> usize {
        (hasher::checksum(self.prefix(key)) % self.bucket_count as u64) as usize
    }

    /// The single bucket that can hold every key of `range`, if there is one.
    /// Both bounds must be present and share a full prefix.
    pub(crate) fn single_bucket(&self, range: &KeyRange) -> Option<usize> {
        let (start, end) = (range.start_key()?, range.end_key()?);
        if self.prefix_length == 0 {
            return (start == end).then(|| self.bucket_of(start));
        }
        if start.len() < self.prefix_length || end.len() < self.prefix_length {
            return None;
        }
        (self.prefix(start) == self.prefix(end)).then(|| self.bucket_of(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket_index(prefix_length: usize) -> BucketIndex {
        BucketIndex::new(
            &BufferOptions::default()
                .prefix_length(prefix_length)
                .bucket_count(1024),
        )
    }

    #[test]
    fn test_prefix_groups_keys() {
        let index = bucket_index(4);
        assert_eq!(index.prefix(b"0000123456"), b"0000");
        assert_eq!(index.prefix(b"ab"), b"ab");
        assert_eq!(
            index.bucket_of(b"0000123456"),
            index.bucket_of(b"0000999999")
        );
        assert!(index.bucket_of(b"0000123456") < index.bucket_count());
    }

    #[test]
    fn test_zero_prefix_hashes_whole_key() {
        let index = bucket_index(0);
        assert_eq!(index.prefix(b"0000123456"), b"0000123456");
    }

    #[test]
    fn test_single_bucket_detection() {
        let index = bucket_index(4);
        let same = KeyRange::inclusive(b"0000100".to_vec(), b"0000900".to_vec());
        assert_eq!(index.single_bucket(&same), Some(index.bucket_of(b"0000100")));

        let spans = KeyRange::inclusive(b"0000100".to_vec(), b"0001900".to_vec());
        assert_eq!(index.single_bucket(&spans), None);
        assert_eq!(index.single_bucket(&KeyRange::all()), None);

        let point = KeyRange::inclusive(b"k".to_vec(), b"k".to_vec());
        assert!(bucket_index(0).single_bucket(&point).is_some());
    }
}
