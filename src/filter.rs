//! Key range helpers shared by buffers, runs and the merge iterator.

use std::ops::{Bound, RangeBounds};

use crate::entry::Entry;
use crate::error::Result;

/// An owned key range. Trait objects cannot take `impl RangeBounds`, so buffers
/// and runs receive this pair instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bound<Vec<u8>>,
    pub end: Bound<Vec<u8>>,
}

impl KeyRange {
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// `[low, high]`, both ends included.
    pub fn inclusive(low: impl Into<Vec<u8>>, high: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Bound::Included(low.into()),
            end: Bound::Included(high.into()),
        }
    }

    /// `[low, high)`.
    pub fn half_open(low: impl Into<Vec<u8>>, high: impl Into<Vec<u8>>) -> Self {
        Self {
            start: Bound::Included(low.into()),
            end: Bound::Excluded(high.into()),
        }
    }

    pub fn from_bounds<R: RangeBounds<Vec<u8>>>(range: &R) -> Self {
        Self {
            start: range.start_bound().cloned(),
            end: range.end_bound().cloned(),
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = match &self.start {
            Bound::Included(start) => key >= start.as_slice(),
            Bound::Excluded(start) => key > start.as_slice(),
            Bound::Unbounded => true,
        };
        after_start && !self.is_beyond_end(key)
    }

    /// True when no key at or after `key` can be in range.
    pub fn is_beyond_end(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Included(end) => key > end.as_slice(),
            Bound::Excluded(end) => key >= end.as_slice(),
            Bound::Unbounded => false,
        }
    }

    pub fn start_key(&self) -> Option<&[u8]> {
        match &self.start {
            Bound::Included(key) | Bound::Excluded(key) => Some(key.as_slice()),
            Bound::Unbounded => None,
        }
    }

    pub fn end_key(&self) -> Option<&[u8]> {
        match &self.end {
            Bound::Included(key) | Bound::Excluded(key) => Some(key.as_slice()),
            Bound::Unbounded => None,
        }
    }

    /// True when the range can hold no key at all.
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Bound::Included(s), Bound::Included(e)) => s > e,
            (Bound::Included(s), Bound::Excluded(e))
            | (Bound::Excluded(s), Bound::Included(e))
            | (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
            _ => false,
        }
    }
}

impl RangeBounds<Vec<u8>> for KeyRange {
    fn start_bound(&self) -> Bound<&Vec<u8>> {
        self.start.as_ref()
    }

    fn end_bound(&self) -> Bound<&Vec<u8>> {
        self.end.as_ref()
    }
}

/// Filters an ascending stream of entries down to a key range, stopping at
/// the first key past the end bound.
pub struct RangeFilter<I>
where
    I: Iterator<Item = Result<Entry>>,
{
    inner: I,
    range: KeyRange,
    done: bool,
}

impl<I> RangeFilter<I>
where
    I: Iterator<Item = Result<Entry>>,
{
    pub fn new(inner: I, range: KeyRange) -> Self {
        Self {
            inner,
            range,
            done: false,
        }
    }
}

impl<I> Iterator for RangeFilter<I>
where
    I: Iterator<Item = Result<Entry>>,
{
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.inner.next()? {
                Ok(entry) => {
                    if self.range.contains(&entry.key) {
                        return Some(Ok(entry));
                    }
                    if self.range.is_beyond_end(&entry.key) {
                        self.done = true;
                        return None;
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_bounds() {
        let range = KeyRange::inclusive(b"b".to_vec(), b"d".to_vec());
        assert!(!range.contains(b"a"));
        assert!(range.contains(b"b"));
        assert!(range.contains(b"d"));
        assert!(!range.contains(b"da"));

        let half = KeyRange::half_open(b"b".to_vec(), b"d".to_vec());
        assert!(!half.contains(b"d"));
        assert!(half.is_beyond_end(b"d"));
        assert!(KeyRange::all().contains(b""));
    }

    #[test]
    fn test_empty_ranges() {
        assert!(KeyRange::inclusive(b"z".to_vec(), b"a".to_vec()).is_empty());
        assert!(KeyRange::half_open(b"a".to_vec(), b"a".to_vec()).is_empty());
        assert!(!KeyRange::inclusive(b"a".to_vec(), b"a".to_vec()).is_empty());
    }

    #[test]
    fn test_range_filter_stops_past_end() {
        let entries: Vec<Result<Entry>> = ["a", "b", "c", "d", "e"]
            .iter()
            .enumerate()
            .map(|(i, k)| Ok(Entry::value(k.as_bytes().to_vec(), b"v".to_vec(), i as u64)))
            .collect();
        let keys: Vec<Vec<u8>> = RangeFilter::new(
            entries.into_iter(),
            KeyRange::inclusive(b"b".to_vec(), b"c".to_vec()),
        )
        .map(|e| e.unwrap().key)
        .collect();
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }
}
