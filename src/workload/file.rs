//! The `workload.txt` format: one operation per line.
//!
//! ```text
//! I <key> <value>
//! U <key> <value>
//! D <key>
//! Q <key>
//! S <start> <end>
//! R <start> <end>
//! ```
//!
//! Keys are decimal integers of at most [`KEY_WIDTH`] digits and range ends
//! are exclusive. Blank lines and lines with an unknown operation code are
//! skipped.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{Operation, KEY_WIDTH, MAX_KEY};
use crate::error::Result;
use crate::Error;

pub fn format_workload(ops: &[Operation]) -> String {
    let mut out = String::with_capacity(ops.len() * 16);
    for op in ops {
        out.push_str(&op.to_string());
        out.push('\n');
    }
    out
}

pub fn write_workload(path: impl AsRef<Path>, ops: &[Operation]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for op in ops {
        writeln!(writer, "{}", op)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_workload(path: impl AsRef<Path>) -> Result<Vec<Operation>> {
    parse_workload(&std::fs::read_to_string(path)?)
}

pub fn parse_workload(text: &str) -> Result<Vec<Operation>> {
    let mut ops = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(code) = fields.next() else {
            continue;
        };
        let line_no = i + 1;
        let invalid = |reason: String| Error::InvalidWorkload {
            line: line_no,
            reason,
        };
        let mut key = |what: &str| -> Result<u64> {
            let field = fields
                .next()
                .ok_or_else(|| invalid(format!("missing {}", what)))?;
            let key = field
                .parse::<u64>()
                .map_err(|e| invalid(format!("bad {} {:?}: {}", what, field, e)))?;
            if key > MAX_KEY {
                return Err(invalid(format!(
                    "{} {} is wider than {} digits",
                    what, key, KEY_WIDTH
                )));
            }
            Ok(key)
        };

        let op = match code {
            "I" | "U" => {
                let k = key("key")?;
                let value = fields
                    .next()
                    .ok_or_else(|| invalid("missing value".into()))?
                    .to_string();
                if code == "I" {
                    Operation::Insert { key: k, value }
                } else {
                    Operation::Update { key: k, value }
                }
            }
            "D" => Operation::Delete { key: key("key")? },
            "Q" => Operation::PointQuery { key: key("key")? },
            "S" | "R" => {
                let start = key("start key")?;
                let end = key("end key")?;
                if code == "S" {
                    Operation::RangeQuery { start, end }
                } else {
                    Operation::RangeDelete { start, end }
                }
            }
            other => {
                tracing::warn!(line = line_no, code = other, "Skipping unknown operation");
                continue;
            }
        };

        if let Some(extra) = fields.next() {
            return Err(invalid(format!("unexpected trailing field {:?}", extra)));
        }
        ops.push(op);
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{generate, WorkloadSpec};
    use tempfile::tempdir;

    #[test]
    fn test_parse_all_operations() {
        let text = "I 5 abc\nU 5 xyz\n\nQ 5\nD 5\nS 1 9\nR 2 4";
        assert_eq!(
            parse_workload(text).unwrap(),
            vec![
                Operation::Insert { key: 5, value: "abc".into() },
                Operation::Update { key: 5, value: "xyz".into() },
                Operation::PointQuery { key: 5 },
                Operation::Delete { key: 5 },
                Operation::RangeQuery { start: 1, end: 9 },
                Operation::RangeDelete { start: 2, end: 4 },
            ]
        );
    }

    #[test]
    fn test_trailing_newline_is_tolerated() {
        assert_eq!(parse_workload("Q 1\n").unwrap().len(), 1);
        assert_eq!(parse_workload("Q 1\n\n\n").unwrap().len(), 1);
        assert!(parse_workload("").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_lines_name_the_line() {
        let cases = [
            ("Q 1\nI 3", 2),
            ("I 4", 1),
            ("Q 1\nQ 2\nQ abc", 3),
            ("S 1", 1),
            ("D 1 2", 1),
            ("R 5", 1),
            ("Q 1\nQ 10000000000", 2),
            ("S 0 10000000000", 1),
        ];
        for (text, expected) in cases {
            match parse_workload(text) {
                Err(Error::InvalidWorkload { line, .. }) => assert_eq!(line, expected, "{:?}", text),
                other => panic!("expected an invalid workload for {:?}, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_unknown_operations_are_skipped() {
        let ops = parse_workload("Q 1\nX 3\nM 1 2 3\nD 1").unwrap();
        assert_eq!(
            ops,
            vec![Operation::PointQuery { key: 1 }, Operation::Delete { key: 1 }]
        );
    }

    #[test]
    fn test_widest_key_is_accepted() {
        let ops = parse_workload("Q 9999999999").unwrap();
        assert_eq!(ops, vec![Operation::PointQuery { key: MAX_KEY }]);
    }

    #[test]
    fn test_file_round_trip_of_generated_workload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("workload.txt");
        let ops = generate(
            &WorkloadSpec::new(50)
                .updates(10)
                .range_queries(5, 0.2)
                .range_deletes(2),
        )
        .unwrap();

        write_workload(&path, &ops).unwrap();
        assert_eq!(read_workload(&path).unwrap(), ops);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), format_workload(&ops));
    }
}
