use super::numeric::Numeric;
use super::{NumericType, StoreConfig, UpdatePolicy};
use crate::error::{Result, StrataError};
use crate::pb::store_delta::Operation;
use crate::pb::StoreDelta;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::trace;

const SET_PREFIX: &[u8] = b"set:";
const SUM_PREFIX: &[u8] = b"sum:";

/// Prefixes deleted while a partial store was being built, in first-seen
/// order.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeletedPrefixes {
    pub(crate) list: Vec<String>,
    seen: HashSet<String>,
}

impl DeletedPrefixes {
    pub(crate) fn from_list(list: Vec<String>) -> Self {
        let seen = list.iter().cloned().collect();
        Self { list, seen }
    }

    fn record(&mut self, prefix: &str) {
        if self.seen.insert(prefix.to_string()) {
            self.list.push(prefix.to_string());
        }
    }
}

/// In-memory key/value state of one store module.
///
/// `kv` always reflects every delta of the current block. Deltas are the
/// block-local change log and are cleared by [`BaseStore::reset`].
#[derive(Debug, Clone)]
pub struct BaseStore {
    config: Arc<StoreConfig>,
    pub(crate) kv: HashMap<String, Vec<u8>>,
    deltas: Vec<StoreDelta>,
    last_ordinal: u64,
    pub(crate) total_size_bytes: u64,
    pub(crate) deleted_prefixes: Option<DeletedPrefixes>,
}

impl BaseStore {
    pub(crate) fn new(config: Arc<StoreConfig>, track_deleted_prefixes: bool) -> Self {
        Self {
            config,
            kv: HashMap::new(),
            deltas: Vec::new(),
            last_ordinal: 0,
            total_size_bytes: 0,
            deleted_prefixes: track_deleted_prefixes.then(DeletedPrefixes::default),
        }
    }

    /// Store configuration.
    pub fn config(&self) -> &Arc<StoreConfig> {
        &self.config
    }

    /// Module name.
    pub fn name(&self) -> &str {
        self.config.name()
    }

    /// Current snapshot.
    pub fn kv(&self) -> &HashMap<String, Vec<u8>> {
        &self.kv
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.kv.len()
    }

    /// True when the store holds no key.
    pub fn is_empty(&self) -> bool {
        self.kv.is_empty()
    }

    /// Sum of key and value sizes.
    pub fn total_size_bytes(&self) -> u64 {
        self.total_size_bytes
    }

    /// Highest ordinal written in the current block.
    pub fn last_ordinal(&self) -> u64 {
        self.last_ordinal
    }

    /// Deltas of the current block, ascending by ordinal.
    pub fn deltas(&self) -> &[StoreDelta] {
        &self.deltas
    }

    /// Drop the block-local deltas and ordinal; the kv is kept.
    pub fn reset(&mut self) {
        trace!(store = %self.name(), deltas = self.deltas.len(), keys = self.kv.len(), "resetting store");
        self.deltas.clear();
        self.last_ordinal = 0;
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Value at the start of the current block.
    pub fn get_first(&self, key: &str) -> Option<&[u8]> {
        self.get_first_raw(key).map(|v| self.strip(v))
    }

    /// Whether the key existed at the start of the current block.
    pub fn has_first(&self, key: &str) -> bool {
        self.get_first_raw(key).is_some()
    }

    /// Latest value, including every write of the current block.
    pub fn get_last(&self, key: &str) -> Option<&[u8]> {
        self.get_last_raw(key).map(|v| self.strip(v))
    }

    /// Whether the key currently exists.
    pub fn has_last(&self, key: &str) -> bool {
        self.get_last_raw(key).is_some()
    }

    /// Value as of ordinal `ord`: deltas with a higher ordinal are rewound.
    pub fn get_at(&self, ord: u64, key: &str) -> Option<&[u8]> {
        self.get_at_raw(ord, key).map(|v| self.strip(v))
    }

    /// Whether the key existed as of ordinal `ord`.
    pub fn has_at(&self, ord: u64, key: &str) -> bool {
        self.get_at_raw(ord, key).is_some()
    }

    fn strip<'a>(&self, value: &'a [u8]) -> &'a [u8] {
        if self.config.update_policy() == UpdatePolicy::SetSum
            && (value.starts_with(SET_PREFIX) || value.starts_with(SUM_PREFIX))
        {
            &value[SET_PREFIX.len()..]
        } else {
            value
        }
    }

    fn get_first_raw(&self, key: &str) -> Option<&[u8]> {
        if let Some(delta) = self.deltas.iter().find(|d| d.key == key) {
            return match delta.op() {
                Operation::Create => None,
                _ => Some(delta.old_value.as_slice()),
            };
        }
        self.kv.get(key).map(Vec::as_slice)
    }

    fn get_last_raw(&self, key: &str) -> Option<&[u8]> {
        if let Some(delta) = self.deltas.iter().rev().find(|d| d.key == key) {
            return match delta.op() {
                Operation::Delete => None,
                _ => Some(delta.new_value.as_slice()),
            };
        }
        self.kv.get(key).map(Vec::as_slice)
    }

    fn get_at_raw(&self, ord: u64, key: &str) -> Option<&[u8]> {
        let mut out = self.get_last_raw(key);
        for delta in self.deltas.iter().rev() {
            if delta.ordinal <= ord {
                break;
            }
            if delta.key != key {
                continue;
            }
            out = match delta.op() {
                Operation::Create => None,
                _ => Some(delta.old_value.as_slice()),
            };
        }
        out
    }

    // ---------------------------------------------------------------------
    // Policy-gated writes
    // ---------------------------------------------------------------------

    /// Write `value` under `key`, replacing any previous value.
    pub fn set(&mut self, ord: u64, key: impl AsRef<[u8]>, value: &[u8]) -> Result<()> {
        self.require("set", UpdatePolicy::Set, None)?;
        let key = self.validate_key("set", key.as_ref())?;
        self.write("set", ord, key, value.to_vec())
    }

    /// Write `value` under `key` unless the key already exists.
    pub fn set_if_not_exists(
        &mut self,
        ord: u64,
        key: impl AsRef<[u8]>,
        value: &[u8],
    ) -> Result<()> {
        let op = "set_if_not_exists";
        self.require(op, UpdatePolicy::SetIfNotExists, None)?;
        let key = self.validate_key(op, key.as_ref())?;
        if self.get_last_raw(&key).is_some() {
            return Ok(());
        }
        self.write(op, ord, key, value.to_vec())
    }

    /// Concatenate `value` to the current value of `key`.
    pub fn append(&mut self, ord: u64, key: impl AsRef<[u8]>, value: &[u8]) -> Result<()> {
        self.require("append", UpdatePolicy::Append, None)?;
        let key = self.validate_key("append", key.as_ref())?;
        let mut next = self.get_last_raw(&key).map(<[u8]>::to_vec).unwrap_or_default();
        next.extend_from_slice(value);
        let limit = self.config.limits().append_limit;
        if next.len() as u64 >= limit {
            return Err(self.fault(
                "append",
                format!(
                    "value for key '{key}' would reach {} bytes, append limit is {limit}",
                    next.len()
                ),
            ));
        }
        self.write("append", ord, key, next)
    }

    /// Delete every key starting with `prefix`, one DELETE delta per key.
    pub fn delete_prefix(&mut self, ord: u64, prefix: impl AsRef<[u8]>) -> Result<()> {
        let prefix = std::str::from_utf8(prefix.as_ref())
            .map_err(|_| self.fault("delete_prefix", "prefix is not valid UTF-8"))?
            .to_string();
        self.bump_ordinal("delete_prefix", ord)?;

        let mut keys: Vec<String> = self
            .kv
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        keys.sort();
        for key in keys {
            let old_value = self.kv.get(&key).cloned().unwrap_or_default();
            let delta = StoreDelta {
                operation: Operation::Delete as i32,
                ordinal: ord,
                key,
                old_value,
                new_value: Vec::new(),
            };
            self.apply_delta(&delta);
            self.deltas.push(delta);
        }
        if let Some(tracked) = self.deleted_prefixes.as_mut() {
            tracked.record(&prefix);
        }
        Ok(())
    }

    /// Add `value` to the current value of `key`.
    pub fn add(&mut self, ord: u64, key: impl AsRef<[u8]>, value: Numeric) -> Result<()> {
        self.combine("add", UpdatePolicy::Add, ord, key.as_ref(), value, |prev, next| {
            prev.add(&next).unwrap_or(next)
        })
    }

    /// Keep the smaller of `value` and the current value of `key`.
    pub fn set_min(&mut self, ord: u64, key: impl AsRef<[u8]>, value: Numeric) -> Result<()> {
        self.combine("set_min", UpdatePolicy::Min, ord, key.as_ref(), value, Numeric::min)
    }

    /// Keep the larger of `value` and the current value of `key`.
    pub fn set_max(&mut self, ord: u64, key: impl AsRef<[u8]>, value: Numeric) -> Result<()> {
        self.combine("set_max", UpdatePolicy::Max, ord, key.as_ref(), value, Numeric::max)
    }

    /// Add to an int64 store.
    pub fn add_int64(&mut self, ord: u64, key: impl AsRef<[u8]>, value: i64) -> Result<()> {
        self.add(ord, key, Numeric::Int64(value))
    }

    /// Add to a float64 store.
    pub fn add_float64(&mut self, ord: u64, key: impl AsRef<[u8]>, value: f64) -> Result<()> {
        self.add(ord, key, Numeric::Float64(value))
    }

    /// Add to a bigint store.
    pub fn add_bigint(
        &mut self,
        ord: u64,
        key: impl AsRef<[u8]>,
        value: num_bigint::BigInt,
    ) -> Result<()> {
        self.add(ord, key, Numeric::BigInt(value))
    }

    /// Add to a bigdecimal store.
    pub fn add_bigdecimal(
        &mut self,
        ord: u64,
        key: impl AsRef<[u8]>,
        value: bigdecimal::BigDecimal,
    ) -> Result<()> {
        self.add(ord, key, Numeric::BigDecimal(value))
    }

    /// Apply a `"set:N"` or `"sum:N"` update.
    ///
    /// `"set:"` replaces the value. `"sum:"` adds to the numeric part of the
    /// previous value and keeps its prefix, so a sum after a set stays a set.
    pub fn set_sum(&mut self, ord: u64, key: impl AsRef<[u8]>, value: &[u8]) -> Result<()> {
        let op = "set_sum";
        self.require(op, UpdatePolicy::SetSum, None)?;
        let ty = self.numeric_type(op)?;
        let key = self.validate_key(op, key.as_ref())?;

        let is_set = value.starts_with(SET_PREFIX);
        if !is_set && !value.starts_with(SUM_PREFIX) {
            return Err(self.fault(op, "value must start with 'set:' or 'sum:'"));
        }
        let next = Numeric::parse(ty, &value[SET_PREFIX.len()..]).ok_or_else(|| {
            self.fault(
                op,
                format!(
                    "cannot parse '{}' as {ty}",
                    String::from_utf8_lossy(&value[SET_PREFIX.len()..])
                ),
            )
        })?;

        let data = match self.get_at_raw(ord, &key) {
            Some(prev) if !is_set => {
                let (prev_prefix, prev_num) = split_set_sum(ty, prev);
                let mut data = prev_prefix.to_vec();
                data.extend(prev_num.add(&next).unwrap_or(next).to_bytes());
                data
            }
            _ => value.to_vec(),
        };
        self.write(op, ord, key, data)
    }

    fn combine(
        &mut self,
        op: &'static str,
        policy: UpdatePolicy,
        ord: u64,
        key: &[u8],
        value: Numeric,
        f: impl FnOnce(Numeric, Numeric) -> Numeric,
    ) -> Result<()> {
        let ty = value.numeric_type();
        self.require(op, policy, Some(ty))?;
        let key = self.validate_key(op, key)?;
        let next = match self.get_at_raw(ord, &key).and_then(|raw| Numeric::parse(ty, raw)) {
            Some(prev) => f(prev, value),
            None => value,
        };
        self.write(op, ord, key, next.to_bytes())
    }

    fn require(
        &self,
        op: &'static str,
        policy: UpdatePolicy,
        numeric: Option<NumericType>,
    ) -> Result<()> {
        let declared = self.config.update_policy();
        if declared != policy {
            return Err(self.fault(
                op,
                format!("store update policy is '{declared}', operation requires '{policy}'"),
            ));
        }
        if let Some(ty) = numeric {
            if self.config.value_type().numeric() != Some(ty) {
                return Err(self.fault(
                    op,
                    format!(
                        "store value type is '{}', operation requires '{ty}'",
                        self.config.value_type()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn numeric_type(&self, op: &'static str) -> Result<NumericType> {
        self.config.value_type().numeric().ok_or_else(|| {
            self.fault(
                op,
                format!("value type '{}' is not numeric", self.config.value_type()),
            )
        })
    }

    fn validate_key(&self, op: &'static str, key: &[u8]) -> Result<String> {
        match key.first() {
            None => Err(self.fault(op, "key must not be empty")),
            Some(0xFF) => Err(self.fault(op, "key must not start with reserved byte 0xFF")),
            Some(_) => String::from_utf8(key.to_vec())
                .map_err(|_| self.fault(op, "key is not valid UTF-8")),
        }
    }

    fn bump_ordinal(&mut self, op: &'static str, ord: u64) -> Result<()> {
        if ord < self.last_ordinal {
            return Err(self.fault(
                op,
                format!(
                    "ordinal {ord} is lower than previous ordinal {}",
                    self.last_ordinal
                ),
            ));
        }
        self.last_ordinal = ord;
        Ok(())
    }

    fn fault(&self, op: &str, reason: impl Into<String>) -> StrataError {
        StrataError::store_op(self.name(), op, reason)
    }

    /// Record a CREATE or UPDATE after every limit has been checked.
    fn write(&mut self, op: &'static str, ord: u64, key: String, value: Vec<u8>) -> Result<()> {
        let limits = self.config.limits();
        if value.len() as u64 > limits.item_size_limit {
            return Err(self.fault(
                op,
                format!(
                    "value for key '{key}' is {} bytes, item size limit is {}",
                    value.len(),
                    limits.item_size_limit
                ),
            ));
        }

        let previous = self.get_last_raw(&key).map(<[u8]>::to_vec);
        let projected = match &previous {
            Some(prev) => self.total_size_bytes - prev.len() as u64 + value.len() as u64,
            None => self.total_size_bytes + (key.len() + value.len()) as u64,
        };
        if projected > limits.total_size_limit {
            return Err(self.fault(
                op,
                format!(
                    "store would grow to {projected} bytes, limit is {}",
                    limits.total_size_limit
                ),
            ));
        }
        self.bump_ordinal(op, ord)?;

        let delta = match previous {
            Some(old_value) => StoreDelta {
                operation: Operation::Update as i32,
                ordinal: ord,
                key,
                old_value,
                new_value: value,
            },
            None => StoreDelta {
                operation: Operation::Create as i32,
                ordinal: ord,
                key,
                old_value: Vec::new(),
                new_value: value,
            },
        };
        self.apply_delta(&delta);
        self.deltas.push(delta);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Delta management
    // ---------------------------------------------------------------------

    /// Apply one delta to the kv, keeping the size accounting in sync.
    pub fn apply_delta(&mut self, delta: &StoreDelta) {
        let key_size = delta.key.len() as u64;
        let new_size = delta.new_value.len() as u64;
        let old_size = delta.old_value.len() as u64;
        match delta.op() {
            Operation::Update => {
                self.kv.insert(delta.key.clone(), delta.new_value.clone());
                self.total_size_bytes = (self.total_size_bytes + new_size).saturating_sub(old_size);
            }
            Operation::Create => {
                self.kv.insert(delta.key.clone(), delta.new_value.clone());
                self.total_size_bytes += key_size + new_size;
            }
            Operation::Delete => {
                self.kv.remove(&delta.key);
                self.total_size_bytes = self.total_size_bytes.saturating_sub(key_size + old_size);
            }
            Operation::Unset => {}
        }
    }

    /// Undo `deltas`, last one first.
    pub fn apply_deltas_reverse(&mut self, deltas: &[StoreDelta]) {
        for delta in deltas.iter().rev() {
            let key_size = delta.key.len() as u64;
            let new_size = delta.new_value.len() as u64;
            let old_size = delta.old_value.len() as u64;
            match delta.op() {
                Operation::Update => {
                    self.kv.insert(delta.key.clone(), delta.old_value.clone());
                    self.total_size_bytes =
                        (self.total_size_bytes + old_size).saturating_sub(new_size);
                }
                Operation::Create => {
                    self.kv.remove(&delta.key);
                    self.total_size_bytes =
                        self.total_size_bytes.saturating_sub(key_size + new_size);
                }
                Operation::Delete => {
                    self.kv.insert(delta.key.clone(), delta.old_value.clone());
                    self.total_size_bytes += key_size + old_size;
                }
                Operation::Unset => {}
            }
        }
    }

    /// Replace the block deltas with `deltas` (e.g. from a cached output) and
    /// apply them to the kv.
    pub fn set_deltas(&mut self, deltas: Vec<StoreDelta>) {
        for delta in &deltas {
            self.apply_delta(delta);
        }
        self.last_ordinal = deltas.last().map(|d| d.ordinal).unwrap_or(0);
        self.deltas = deltas;
    }

    /// Replace the whole snapshot, recomputing its size.
    pub(crate) fn replace_kv(&mut self, kv: HashMap<String, Vec<u8>>, size: u64) {
        self.kv = kv;
        self.total_size_bytes = size;
        self.deltas.clear();
        self.last_ordinal = 0;
    }

    /// Insert or overwrite without producing a delta.
    pub(crate) fn set_kv(&mut self, key: &str, value: Vec<u8>) {
        match self.kv.get(key) {
            Some(prev) => {
                self.total_size_bytes = self.total_size_bytes.saturating_sub(prev.len() as u64);
            }
            None => self.total_size_bytes += key.len() as u64,
        }
        self.total_size_bytes += value.len() as u64;
        self.kv.insert(key.to_string(), value);
    }

    /// Remove every key under `prefix` without producing deltas.
    pub(crate) fn remove_prefix(&mut self, prefix: &str) {
        let mut removed = 0u64;
        self.kv.retain(|k, v| {
            if k.starts_with(prefix) {
                removed += (k.len() + v.len()) as u64;
                false
            } else {
                true
            }
        });
        self.total_size_bytes = self.total_size_bytes.saturating_sub(removed);
    }
}

/// Split a stored set-sum value into its prefix and numeric part. Values
/// without a recognised prefix count as sums.
pub(crate) fn split_set_sum(ty: NumericType, raw: &[u8]) -> (&'static [u8], Numeric) {
    let prefix = if raw.starts_with(SET_PREFIX) {
        SET_PREFIX
    } else {
        SUM_PREFIX
    };
    let body = if raw.starts_with(SET_PREFIX) || raw.starts_with(SUM_PREFIX) {
        &raw[SET_PREFIX.len()..]
    } else {
        raw
    };
    let num = Numeric::parse(ty, body).unwrap_or_else(|| Numeric::zero(ty));
    (prefix, num)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::store_with;
    use crate::store::{StoreLimits, ValueType};

    fn set_store() -> BaseStore {
        store_with(UpdatePolicy::Set, ValueType::String)
    }

    #[test]
    fn set_creates_then_updates() {
        let mut s = set_store();
        s.set(1, "k", b"a").unwrap();
        s.set(2, "k", b"b").unwrap();

        let ops: Vec<_> = s.deltas().iter().map(StoreDelta::op).collect();
        assert_eq!(ops, vec![Operation::Create, Operation::Update]);
        assert_eq!(s.deltas()[1].old_value, b"a");
        assert_eq!(s.get_last("k"), Some(&b"b"[..]));
        assert_eq!(s.total_size_bytes(), 2);
    }

    #[test]
    fn get_first_and_get_at_rewind_deltas() {
        let mut s = set_store();
        s.set(0, "k", b"v0").unwrap();
        s.reset();

        s.set(10, "k", b"v10").unwrap();
        s.set(20, "k", b"v20").unwrap();

        assert_eq!(s.get_first("k"), Some(&b"v0"[..]));
        assert_eq!(s.get_at(5, "k"), Some(&b"v0"[..]));
        assert_eq!(s.get_at(10, "k"), Some(&b"v10"[..]));
        assert_eq!(s.get_at(25, "k"), Some(&b"v20"[..]));
        assert!(s.has_at(5, "k"));
    }

    #[test]
    fn get_at_before_create_is_absent() {
        let mut s = set_store();
        s.set(3, "k", b"v").unwrap();
        assert!(!s.has_first("k"));
        assert!(s.get_at(2, "k").is_none());
        assert!(s.has_last("k"));
    }

    #[test]
    fn ordinals_must_not_decrease() {
        let mut s = set_store();
        s.set(5, "a", b"1").unwrap();
        let err = s.set(4, "b", b"2").unwrap_err();
        assert!(err.is_module_fault());
        assert!(s.get_last("b").is_none());
        assert_eq!(s.deltas().len(), 1);
    }

    #[test]
    fn deltas_are_sorted_by_ordinal() {
        let mut s = set_store();
        for (i, key) in ["c", "a", "b", "a"].iter().enumerate() {
            s.set(i as u64 * 3, key, b"x").unwrap();
        }
        s.delete_prefix(20, "a").unwrap();
        let ords: Vec<_> = s.deltas().iter().map(|d| d.ordinal).collect();
        let mut sorted = ords.clone();
        sorted.sort();
        assert_eq!(ords, sorted);
    }

    #[test]
    fn key_rules() {
        let mut s = set_store();
        assert!(s.set(1, "", b"v").unwrap_err().is_module_fault());
        assert!(s.set(1, [0xFF, b'a'], b"v").unwrap_err().is_module_fault());
        assert!(s.is_empty());
        assert!(s.deltas().is_empty());
    }

    #[test]
    fn item_size_limit() {
        let mut s = store_with(UpdatePolicy::Set, ValueType::Bytes);
        let limit = s.config().limits().item_size_limit as usize;
        assert!(s.set(1, "k", &vec![0; limit]).is_ok());
        assert!(s.set(2, "k", &vec![0; limit + 1]).is_err());
        assert_eq!(s.get_last("k").map(<[u8]>::len), Some(limit));
    }

    #[test]
    fn total_size_limit() {
        let config = crate::store::testing::config_with(
            UpdatePolicy::Set,
            ValueType::String,
            StoreLimits {
                total_size_limit: 10,
                ..StoreLimits::default()
            },
        );
        let mut s = config.new_full_kv();
        s.set(1, "k", b"12345").unwrap();
        assert!(s.set(2, "j", b"12345").is_err());
        assert_eq!(s.total_size_bytes(), 6);
    }

    #[test]
    fn set_if_not_exists_keeps_first() {
        let mut s = store_with(UpdatePolicy::SetIfNotExists, ValueType::String);
        s.set_if_not_exists(1, "k", b"first").unwrap();
        s.set_if_not_exists(2, "k", b"second").unwrap();
        assert_eq!(s.get_last("k"), Some(&b"first"[..]));
        assert_eq!(s.deltas().len(), 1);
    }

    #[test]
    fn append_respects_limit() {
        let config = crate::store::testing::config_with(
            UpdatePolicy::Append,
            ValueType::Bytes,
            StoreLimits {
                append_limit: 10,
                ..StoreLimits::default()
            },
        );
        let mut s = config.new_full_kv();
        s.append(1, "k", b"abcd").unwrap();
        s.append(2, "k", b"efgh").unwrap();
        assert_eq!(s.get_last("k"), Some(&b"abcdefgh"[..]));
        let err = s.append(3, "k", b"ij").unwrap_err();
        assert!(err.to_string().contains("append limit"));
        assert_eq!(s.get_last("k"), Some(&b"abcdefgh"[..]));
    }

    #[test]
    fn delete_prefix_emits_one_delta_per_key() {
        let mut s = set_store();
        s.set(1, "pool:a", b"1").unwrap();
        s.set(2, "pool:b", b"2").unwrap();
        s.set(3, "token:a", b"3").unwrap();
        s.reset();

        s.delete_prefix(4, "pool:").unwrap();
        assert_eq!(s.deltas().len(), 2);
        assert!(s.deltas().iter().all(|d| d.op() == Operation::Delete));
        assert_eq!(s.deltas()[0].key, "pool:a");
        assert_eq!(s.deltas()[0].old_value, b"1");
        assert_eq!(s.len(), 1);
        assert!(s.get_last("pool:a").is_none());
        assert_eq!(s.get_first("pool:a"), Some(&b"1"[..]));
    }

    #[test]
    fn reverse_application_restores_kv() {
        let mut s = set_store();
        s.set(1, "a", b"1").unwrap();
        s.set(2, "b", b"2").unwrap();
        s.reset();
        let before = s.kv().clone();
        let size_before = s.total_size_bytes();

        s.set(3, "a", b"changed").unwrap();
        s.set(4, "c", b"new").unwrap();
        s.delete_prefix(5, "b").unwrap();
        let deltas = s.deltas().to_vec();
        s.apply_deltas_reverse(&deltas);
        s.reset();

        assert_eq!(s.kv(), &before);
        assert_eq!(s.total_size_bytes(), size_before);
    }

    #[test]
    fn set_deltas_applies_cached_changes() {
        let mut source = set_store();
        source.set(1, "a", b"1").unwrap();
        source.set(2, "a", b"2").unwrap();

        let mut replica = set_store();
        replica.set_deltas(source.deltas().to_vec());
        assert_eq!(replica.kv(), source.kv());
        assert_eq!(replica.deltas().len(), 2);
    }

    #[test]
    fn add_int64_sums() {
        let mut s = store_with(UpdatePolicy::Add, ValueType::Int64);
        s.add_int64(1, "n", 5).unwrap();
        s.add_int64(2, "n", -7).unwrap();
        assert_eq!(s.get_last("n"), Some(&b"-2"[..]));
    }

    #[test]
    fn add_falls_back_on_unparsable_previous_value() {
        let mut s = store_with(UpdatePolicy::Add, ValueType::BigInt);
        s.set_deltas(vec![StoreDelta {
            operation: Operation::Create as i32,
            ordinal: 0,
            key: "n".to_string(),
            old_value: vec![],
            new_value: b"garbage".to_vec(),
        }]);
        s.reset();
        s.add_bigint(1, "n", 3.into()).unwrap();
        assert_eq!(s.get_last("n"), Some(&b"3"[..]));
    }

    #[test]
    fn min_and_max() {
        let mut min = store_with(UpdatePolicy::Min, ValueType::Float64);
        min.set_min(1, "p", Numeric::Float64(2.5)).unwrap();
        min.set_min(2, "p", Numeric::Float64(1.5)).unwrap();
        min.set_min(3, "p", Numeric::Float64(9.0)).unwrap();
        assert_eq!(min.get_last("p"), Some(&b"1.5"[..]));

        let mut max = store_with(UpdatePolicy::Max, ValueType::Int64);
        max.set_max(1, "p", Numeric::Int64(3)).unwrap();
        max.set_max(2, "p", Numeric::Int64(1)).unwrap();
        assert_eq!(max.get_last("p"), Some(&b"3"[..]));
    }

    #[test]
    fn policy_mismatch_does_not_mutate() {
        let mut s = store_with(UpdatePolicy::Add, ValueType::Int64);
        assert!(s.set(1, "k", b"v").unwrap_err().is_module_fault());
        assert!(s.append(1, "k", b"v").is_err());
        assert!(s.add_float64(1, "k", 1.0).is_err());
        assert!(s.set_max(1, "k", Numeric::Int64(1)).is_err());
        assert!(s.is_empty());
        assert!(s.deltas().is_empty());
    }

    #[test]
    fn set_sum_prefix_semantics() {
        let mut s = store_with(UpdatePolicy::SetSum, ValueType::Int64);
        s.set_sum(1, "k", b"sum:3").unwrap();
        s.reset();
        s.set_sum(2, "k", b"set:10").unwrap();
        s.reset();
        s.set_sum(3, "k", b"sum:4").unwrap();

        assert_eq!(s.kv().get("k").map(Vec::as_slice), Some(&b"set:14"[..]));
        assert_eq!(s.get_at(u64::MAX, "k"), Some(&b"14"[..]));
        assert_eq!(s.get_first("k"), Some(&b"10"[..]));
    }

    #[test]
    fn set_sum_sums_without_set() {
        let mut s = store_with(UpdatePolicy::SetSum, ValueType::BigDecimal);
        s.set_sum(1, "k", b"sum:1.5").unwrap();
        s.set_sum(2, "k", b"sum:2.25").unwrap();
        assert_eq!(s.kv().get("k").map(Vec::as_slice), Some(&b"sum:3.75"[..]));
    }

    #[test]
    fn set_sum_rejects_bad_values() {
        let mut s = store_with(UpdatePolicy::SetSum, ValueType::Int64);
        assert!(s.set_sum(1, "k", b"add:3").is_err());
        assert!(s.set_sum(1, "k", b"sum:x").is_err());
        assert!(s.is_empty());
    }
}
