//! Build-side hash table for hash joins
//!
//! Keys are composite values. Buckets are chosen by a structural hash that
//! treats numerically equal numbers alike, and every probe re-checks the full
//! key with collation, so a hash collision never produces a false match.

use std::hash::Hasher;

use rustc_hash::{FxHashMap, FxHasher};
use serde_json::Value;

use crate::context::ExecContext;
use crate::execution::errors::ExecutionResult;
use crate::value::{collate_slices, estimate_size, AnnotatedValue};

#[derive(Debug)]
struct Entry {
    key: Vec<Value>,
    row: AnnotatedValue,
}

/// Multimap from composite key to build-side rows. Memory is charged to the
/// request quota on insert and released by [`HashTable::clear`].
#[derive(Debug, Default)]
pub struct HashTable {
    buckets: FxHashMap<u64, Vec<Entry>>,
    len: usize,
    tracked: usize,
}

fn hash_value(value: &Value, hasher: &mut FxHasher) {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(b) => {
            hasher.write_u8(1);
            hasher.write_u8(u8::from(*b));
        }
        Value::Number(n) => {
            hasher.write_u8(2);
            // equal numbers collate equal across int and float, and -0.0 with 0.0
            let f = n.as_f64().unwrap_or(0.0);
            hasher.write_u64(if f == 0.0 { 0 } else { f.to_bits() });
        }
        Value::String(s) => {
            hasher.write_u8(3);
            hasher.write(s.as_bytes());
            hasher.write_u8(0xff);
        }
        Value::Array(items) => {
            hasher.write_u8(4);
            hasher.write_usize(items.len());
            for item in items {
                hash_value(item, hasher);
            }
        }
        Value::Object(map) => {
            hasher.write_u8(5);
            hasher.write_usize(map.len());
            for (k, v) in map {
                hasher.write(k.as_bytes());
                hasher.write_u8(0xff);
                hash_value(v, hasher);
            }
        }
    }
}

fn hash_key(key: &[Value]) -> u64 {
    let mut hasher = FxHasher::default();
    for value in key {
        hash_value(value, &mut hasher);
    }
    hasher.finish()
}

impl HashTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes currently charged to the quota.
    pub fn tracked(&self) -> usize {
        self.tracked
    }

    pub fn insert(&mut self, key: Vec<Value>, row: AnnotatedValue, ctx: &ExecContext) -> ExecutionResult<()> {
        let size = row.size() + key.iter().map(estimate_size).sum::<usize>();
        ctx.track_memory(size)?;
        self.tracked += size;
        self.len += 1;
        self.buckets.entry(hash_key(&key)).or_default().push(Entry { key, row });
        Ok(())
    }

    /// Rows whose key collates equal to `key`.
    pub fn probe<'a>(&'a self, key: &'a [Value]) -> impl Iterator<Item = &'a AnnotatedValue> + 'a {
        self.buckets
            .get(&hash_key(key))
            .into_iter()
            .flatten()
            .filter(move |entry| collate_slices(&entry.key, key).is_eq())
            .map(|entry| &entry.row)
    }

    /// Drops every row and releases its quota.
    pub fn clear(&mut self, ctx: &ExecContext) {
        ctx.release_memory(self.tracked);
        self.tracked = 0;
        self.len = 0;
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PipelineConfig;
    use serde_json::json;

    fn row(v: Value) -> AnnotatedValue {
        AnnotatedValue::new(v)
    }

    #[test]
    fn test_probe_matches_full_key() {
        let ctx = ExecContext::default();
        let mut table = HashTable::new();
        table.insert(vec![json!(1), json!("a")], row(json!("x")), &ctx).unwrap();
        table.insert(vec![json!(1), json!("a")], row(json!("y")), &ctx).unwrap();
        table.insert(vec![json!(1), json!("b")], row(json!("z")), &ctx).unwrap();

        let hits: Vec<_> = table.probe(&[json!(1.0), json!("a")]).map(|r| r.value().clone()).collect();
        assert_eq!(hits, vec![json!("x"), json!("y")]);
        assert_eq!(table.probe(&[json!(2), json!("a")]).count(), 0);
        assert_eq!(table.len(), 3);
        table.clear(&ctx);
        assert_eq!(ctx.quota().used(), 0);
    }

    #[test]
    fn test_negative_zero_finds_zero() {
        let ctx = ExecContext::default();
        let mut table = HashTable::new();
        table.insert(vec![json!(0)], row(json!("int")), &ctx).unwrap();
        table.insert(vec![json!(0.0)], row(json!("float")), &ctx).unwrap();

        assert_eq!(table.probe(&[json!(-0.0)]).count(), 2);
    }

    #[test]
    fn test_insert_respects_quota() {
        let mut config = PipelineConfig::default();
        config.memory_quota = 8;
        let ctx = ExecContext::new(config);
        let mut table = HashTable::new();
        let err = table
            .insert(vec![json!("key")], row(json!({"large": "document body"})), &ctx)
            .unwrap_err();
        assert_eq!(err.code(), "AERO_EXEC_QUOTA_EXCEEDED");
        assert!(table.is_empty());
    }
}
