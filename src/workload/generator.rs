use rand::distributions::Alphanumeric;
use rand::rngs::SmallRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};

use super::{Operation, WorkloadSpec, KEY_SPACE_FACTOR};
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
enum Kind {
    Update,
    PointQuery,
    RangeQuery,
    Delete,
    RangeDelete,
}

/// Builds the operation sequence of `spec`: every insert first, then the
/// other operations interleaved uniformly.
///
/// Updates, deletes and point queries target inserted keys. A range query or
/// range delete covers `max(1, round(selectivity * inserts))` consecutive
/// inserted keys. Fails when `spec` does not validate.
pub fn generate(spec: &WorkloadSpec) -> Result<Vec<Operation>> {
    spec.validate()?;
    let mut rng = SmallRng::seed_from_u64(spec.effective_seed());
    let mut ops = Vec::with_capacity(spec.total_operations() as usize);

    let keys = insert_keys(&mut rng, spec.inserts);
    for &key in &keys {
        ops.push(Operation::Insert {
            key,
            value: random_value(&mut rng, spec.value_len()),
        });
    }

    let mut sorted = keys.clone();
    sorted.sort_unstable();
    if sorted.is_empty() {
        // Nothing inserted: target a small key space anyway so the
        // workload still has work to do.
        sorted = (0..KEY_SPACE_FACTOR).collect();
    }

    let mut kinds = Vec::with_capacity((spec.total_operations() - spec.inserts) as usize);
    let counts = [
        (Kind::Update, spec.updates),
        (Kind::PointQuery, spec.point_queries),
        (Kind::RangeQuery, spec.range_queries),
        (Kind::Delete, spec.deletes),
        (Kind::RangeDelete, spec.range_deletes),
    ];
    for (kind, n) in counts {
        kinds.extend(std::iter::repeat(kind).take(n as usize));
    }
    kinds.shuffle(&mut rng);

    let span = range_span(spec.selectivity, sorted.len());
    for kind in kinds {
        let op = match kind {
            Kind::Update => Operation::Update {
                key: pick(&mut rng, &sorted),
                value: random_value(&mut rng, spec.value_len()),
            },
            Kind::PointQuery => Operation::PointQuery {
                key: pick(&mut rng, &sorted),
            },
            Kind::Delete => Operation::Delete {
                key: pick(&mut rng, &sorted),
            },
            Kind::RangeQuery => {
                let (start, end) = pick_span(&mut rng, &sorted, span);
                Operation::RangeQuery { start, end }
            }
            Kind::RangeDelete => {
                let (start, end) = pick_span(&mut rng, &sorted, span);
                Operation::RangeDelete { start, end }
            }
        };
        ops.push(op);
    }
    Ok(ops)
}

/// `[start, end)` over `span` consecutive keys of `sorted`.
fn pick_span(rng: &mut SmallRng, sorted: &[u64], span: usize) -> (u64, u64) {
    let first = rng.gen_range(0..=sorted.len() - span);
    (sorted[first], sorted[first + span - 1] + 1)
}

/// `n` distinct keys in random order.
fn insert_keys(rng: &mut SmallRng, n: u64) -> Vec<u64> {
    if n == 0 {
        return Vec::new();
    }
    let space = (n * KEY_SPACE_FACTOR) as usize;
    index::sample(rng, space, n as usize)
        .into_iter()
        .map(|i| i as u64)
        .collect()
}

/// Number of keys a range query covers, clamped to `[1, available]`.
fn range_span(selectivity: f64, available: usize) -> usize {
    let span = (selectivity * available as f64).round() as usize;
    span.clamp(1, available.max(1))
}

fn pick(rng: &mut SmallRng, keys: &[u64]) -> u64 {
    keys[rng.gen_range(0..keys.len())]
}

fn random_value(rng: &mut SmallRng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn spec() -> WorkloadSpec {
        WorkloadSpec::new(1000)
            .updates(200)
            .point_queries(300)
            .range_queries(50, 0.1)
            .deletes(20)
            .range_deletes(10)
            .entry_size(32)
    }

    #[test]
    fn test_generation_is_deterministic() {
        assert_eq!(generate(&spec()).unwrap(), generate(&spec()).unwrap());
        assert_ne!(generate(&spec()).unwrap(), generate(&spec().seed(99)).unwrap());
    }

    #[test]
    fn test_operation_mix() {
        let ops = generate(&spec()).unwrap();
        assert_eq!(ops.len(), 1580);
        assert!(ops[..1000].iter().all(|op| op.code() == 'I'));

        let count = |code| ops.iter().filter(|op| op.code() == code).count();
        assert_eq!(count('U'), 200);
        assert_eq!(count('Q'), 300);
        assert_eq!(count('S'), 50);
        assert_eq!(count('D'), 20);
        assert_eq!(count('R'), 10);
    }

    #[test]
    fn test_keys_and_values() {
        let ops = generate(&spec()).unwrap();
        let mut inserted = HashSet::new();
        for op in &ops {
            match op {
                Operation::Insert { key, value } => {
                    assert!(*key < 1000 * KEY_SPACE_FACTOR);
                    assert!(inserted.insert(*key), "duplicate insert key {}", key);
                    assert_eq!(value.len(), 22);
                    assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
                }
                Operation::Update { key, .. }
                | Operation::Delete { key }
                | Operation::PointQuery { key } => assert!(inserted.contains(key)),
                Operation::RangeQuery { start, end } | Operation::RangeDelete { start, end } => {
                    let covered = inserted.iter().filter(|k| (*start..*end).contains(*k)).count();
                    assert_eq!(covered, 100);
                }
            }
        }
    }

    #[test]
    fn test_tiny_selectivity_still_covers_one_key() {
        let ops = generate(&WorkloadSpec::new(10).range_queries(5, 0.0)).unwrap();
        for op in &ops[10..] {
            let Operation::RangeQuery { start, end } = op else {
                panic!("expected a range query, got {}", op);
            };
            assert!(start < end);
        }
    }

    #[test]
    fn test_queries_without_inserts() {
        let ops = generate(&WorkloadSpec::new(0).point_queries(3)).unwrap();
        assert_eq!(ops.len(), 3);
        assert!(ops.iter().all(|op| op.code() == 'Q'));
    }

    #[test]
    fn test_oversized_key_space_is_rejected() {
        let spec = WorkloadSpec::new(u64::MAX / 2).point_queries(1);
        assert!(generate(&spec).is_err());
    }
}
