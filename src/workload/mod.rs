//! Synthetic workloads: what operations to replay and in which order.
//!
//! A [`WorkloadSpec`] names a workload by its parameter tuple. Generation is
//! deterministic for equal specs, so every buffer strategy replays exactly the
//! same operations.

pub mod file;
pub mod generator;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hasher;
use crate::Error;

pub use file::{format_workload, parse_workload, read_workload, write_workload};
pub use generator::generate;

/// Width of an encoded key. Zero padding keeps byte order equal to numeric
/// order.
pub const KEY_WIDTH: usize = 10;

/// Largest key that encodes in [`KEY_WIDTH`] digits.
pub const MAX_KEY: u64 = 9_999_999_999;

/// Insert keys are drawn from `[0, KEY_SPACE_FACTOR * inserts)`.
pub const KEY_SPACE_FACTOR: u64 = 4;

/// Encodes a numeric workload key as the engine sees it.
pub fn encode_key(key: u64) -> Vec<u8> {
    format!("{:0width$}", key, width = KEY_WIDTH).into_bytes()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Insert { key: u64, value: String },
    Update { key: u64, value: String },
    Delete { key: u64 },
    PointQuery { key: u64 },
    /// Keys in `[start, end)`.
    RangeQuery { start: u64, end: u64 },
    /// Tombstones every key live in `[start, end)`.
    RangeDelete { start: u64, end: u64 },
}

impl Operation {
    /// The leading letter of the operation's workload line.
    pub fn code(&self) -> char {
        match self {
            Operation::Insert { .. } => 'I',
            Operation::Update { .. } => 'U',
            Operation::Delete { .. } => 'D',
            Operation::PointQuery { .. } => 'Q',
            Operation::RangeQuery { .. } => 'S',
            Operation::RangeDelete { .. } => 'R',
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert { key, value } | Operation::Update { key, value } => {
                write!(f, "{} {} {}", self.code(), key, value)
            }
            Operation::Delete { key } | Operation::PointQuery { key } => {
                write!(f, "{} {}", self.code(), key)
            }
            Operation::RangeQuery { start, end } | Operation::RangeDelete { start, end } => {
                write!(f, "{} {} {}", self.code(), start, end)
            }
        }
    }
}

/// Parameters of a generated workload. Fields missing from a plan file
/// take their default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadSpec {
    pub inserts: u64,
    pub updates: u64,
    pub point_queries: u64,
    pub range_queries: u64,
    pub deletes: u64,
    pub range_deletes: u64,
    /// Fraction of the inserted keys one range query or range delete covers.
    pub selectivity: f64,
    /// Bytes per entry, key included.
    pub entry_size: usize,
    /// Derived from the other parameters when unset.
    pub seed: Option<u64>,
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self {
            inserts: 0,
            updates: 0,
            point_queries: 0,
            range_queries: 0,
            deletes: 0,
            range_deletes: 0,
            selectivity: 0.0,
            entry_size: 64,
            seed: None,
        }
    }
}

impl WorkloadSpec {
    pub fn new(inserts: u64) -> Self {
        Self {
            inserts,
            ..Default::default()
        }
    }

    pub fn updates(mut self, n: u64) -> Self {
        self.updates = n;
        self
    }

    pub fn point_queries(mut self, n: u64) -> Self {
        self.point_queries = n;
        self
    }

    pub fn range_queries(mut self, n: u64, selectivity: f64) -> Self {
        self.range_queries = n;
        self.selectivity = selectivity;
        self
    }

    pub fn deletes(mut self, n: u64) -> Self {
        self.deletes = n;
        self
    }

    pub fn range_deletes(mut self, n: u64) -> Self {
        self.range_deletes = n;
        self
    }

    pub fn entry_size(mut self, bytes: usize) -> Self {
        self.entry_size = bytes;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Directory and log name of the workload in the result tree.
    pub fn name(&self) -> String {
        let mut name = format!(
            "I-{}-U-{}-Q-{}-S-{}-Y-{:?}-E-{}",
            self.inserts,
            self.updates,
            self.point_queries,
            self.range_queries,
            self.selectivity,
            self.entry_size
        );
        if self.deletes > 0 {
            name.push_str(&format!("-D-{}", self.deletes));
        }
        if self.range_deletes > 0 {
            name.push_str(&format!("-R-{}", self.range_deletes));
        }
        name
    }

    pub fn effective_seed(&self) -> u64 {
        self.seed
            .unwrap_or_else(|| hasher::checksum(self.name().as_bytes()))
    }

    pub fn total_operations(&self) -> u64 {
        self.inserts
            + self.updates
            + self.point_queries
            + self.range_queries
            + self.deletes
            + self.range_deletes
    }

    /// Checks that every generated key, range ends included, fits in
    /// [`KEY_WIDTH`] digits and that the selectivity is a fraction.
    pub fn validate(&self) -> Result<()> {
        let space = self.inserts.checked_mul(KEY_SPACE_FACTOR);
        if space.map_or(true, |space| space > MAX_KEY) {
            return Err(Error::InvalidConfig(format!(
                "{} inserts need a key space wider than {} digits",
                self.inserts, KEY_WIDTH
            )));
        }
        if !(0.0..=1.0).contains(&self.selectivity) {
            return Err(Error::InvalidConfig(format!(
                "selectivity must be within [0, 1], got {}",
                self.selectivity
            )));
        }
        Ok(())
    }

    /// Bytes of each generated value.
    pub fn value_len(&self) -> usize {
        self.entry_size.saturating_sub(KEY_WIDTH).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_key_keeps_numeric_order() {
        assert_eq!(encode_key(42), b"0000000042");
        assert!(encode_key(9) < encode_key(10));
        assert_eq!(encode_key(9_999_999_999).len(), KEY_WIDTH);
    }

    #[test]
    fn test_workload_name() {
        let spec = WorkloadSpec::new(10_000).point_queries(500);
        assert_eq!(spec.name(), "I-10000-U-0-Q-500-S-0-Y-0.0-E-64");

        let spec = WorkloadSpec::new(10).range_queries(100, 0.1).deletes(3);
        assert_eq!(spec.name(), "I-10-U-0-Q-0-S-100-Y-0.1-E-64-D-3");

        let spec = WorkloadSpec::new(10).range_deletes(2);
        assert_eq!(spec.name(), "I-10-U-0-Q-0-S-0-Y-0.0-E-64-R-2");
    }

    #[test]
    fn test_default_seed_follows_parameters() {
        let a = WorkloadSpec::new(100).updates(5);
        assert_eq!(a.effective_seed(), a.clone().effective_seed());
        assert_ne!(a.effective_seed(), WorkloadSpec::new(100).effective_seed());
        assert_eq!(a.clone().seed(7).effective_seed(), 7);
    }

    #[test]
    fn test_operation_lines() {
        let ops = [
            Operation::Insert { key: 1, value: "ab".into() },
            Operation::Delete { key: 2 },
            Operation::RangeQuery { start: 3, end: 9 },
            Operation::RangeDelete { start: 4, end: 6 },
        ];
        let lines: Vec<String> = ops.iter().map(|op| op.to_string()).collect();
        assert_eq!(lines, vec!["I 1 ab", "D 2", "S 3 9", "R 4 6"]);
    }

    #[test]
    fn test_key_space_must_fit_key_width() {
        assert!(WorkloadSpec::new(MAX_KEY / KEY_SPACE_FACTOR).validate().is_ok());
        assert!(matches!(
            WorkloadSpec::new(MAX_KEY / KEY_SPACE_FACTOR + 1).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(WorkloadSpec::new(u64::MAX).validate().is_err());
        assert!(WorkloadSpec::new(10).range_queries(1, 1.5).validate().is_err());
        assert!(WorkloadSpec::new(10).range_queries(1, f64::NAN).validate().is_err());
    }
}
