use super::kv::split_set_sum;
use super::numeric::Numeric;
use super::{FullKv, PartialKv, UpdatePolicy};
use crate::error::{Result, StrataError};
use tracing::debug;

impl FullKv {
    /// Fold the next contiguous segment into this store.
    ///
    /// Deleted prefixes of the partial are applied first, then each of its
    /// keys is combined with the current value according to the update
    /// policy. No deltas are produced.
    pub fn merge(&mut self, partial: &PartialKv) -> Result<()> {
        debug!(
            store = %self.name(),
            keys = self.len(),
            partial_keys = partial.len(),
            partial_start = partial.initial_block(),
            "merging partial store"
        );

        let policy = self.config().update_policy();
        if partial.config().update_policy() != policy {
            return Err(self.merge_error(format!(
                "incompatible update policies: '{policy}' cannot merge '{}'",
                partial.config().update_policy()
            )));
        }
        if partial.config().value_type() != self.config().value_type() {
            return Err(self.merge_error(format!(
                "incompatible value types: cannot merge '{}' and '{}'",
                self.config().value_type(),
                partial.config().value_type()
            )));
        }

        for prefix in partial.deleted_prefixes() {
            self.remove_prefix(prefix);
        }

        let mut keys: Vec<&String> = partial.kv().keys().collect();
        keys.sort();
        for key in keys {
            let value = &partial.kv()[key];
            let next = match policy {
                UpdatePolicy::Set => Some(value.clone()),
                UpdatePolicy::SetIfNotExists => {
                    (!self.kv().contains_key(key)).then(|| value.clone())
                }
                UpdatePolicy::Append => Some(self.merge_append(key, value)?),
                UpdatePolicy::Add => Some(self.merge_numeric(key, value, |a, b| {
                    a.add(&b).unwrap_or(b)
                })?),
                UpdatePolicy::Min => Some(self.merge_numeric(key, value, Numeric::min)?),
                UpdatePolicy::Max => Some(self.merge_numeric(key, value, Numeric::max)?),
                UpdatePolicy::SetSum => Some(self.merge_set_sum(key, value)?),
            };
            if let Some(next) = next {
                self.set_kv(key, next);
            }
        }
        Ok(())
    }

    fn merge_append(&self, key: &str, value: &[u8]) -> Result<Vec<u8>> {
        let Some(prev) = self.kv().get(key) else {
            return Ok(value.to_vec());
        };
        let limit = self.config().limits().append_limit;
        let len = (prev.len() + value.len()) as u64;
        if len >= limit {
            return Err(self.merge_error(format!(
                "append on key '{key}' would reach {len} bytes, limit is {limit}"
            )));
        }
        let mut next = Vec::with_capacity(len as usize);
        next.extend_from_slice(prev);
        next.extend_from_slice(value);
        Ok(next)
    }

    fn merge_numeric(
        &self,
        key: &str,
        value: &[u8],
        f: impl FnOnce(Numeric, Numeric) -> Numeric,
    ) -> Result<Vec<u8>> {
        let ty = self.config().value_type().numeric().ok_or_else(|| {
            self.merge_error(format!(
                "update policy '{}' not supported for value type '{}'",
                self.config().update_policy(),
                self.config().value_type()
            ))
        })?;
        let next = Numeric::parse(ty, value).unwrap_or_else(|| Numeric::zero(ty));
        let merged = match self.kv().get(key) {
            Some(prev) => f(
                Numeric::parse(ty, prev).unwrap_or_else(|| Numeric::zero(ty)),
                next,
            ),
            None => next,
        };
        Ok(merged.to_bytes())
    }

    fn merge_set_sum(&self, key: &str, value: &[u8]) -> Result<Vec<u8>> {
        let ty = self.config().value_type().numeric().ok_or_else(|| {
            self.merge_error(format!(
                "value type '{}' is not numeric",
                self.config().value_type()
            ))
        })?;
        let (next_prefix, next) = split_set_sum(ty, value);
        let merged = match self.kv().get(key) {
            Some(prev) if next_prefix != b"set:" => {
                let (prev_prefix, prev_num) = split_set_sum(ty, prev);
                let mut data = prev_prefix.to_vec();
                data.extend(prev_num.add(&next).unwrap_or(next).to_bytes());
                data
            }
            _ => value.to_vec(),
        };
        Ok(merged)
    }

    fn merge_error(&self, cause: String) -> StrataError {
        StrataError::StoreMerge {
            module: self.name().to_string(),
            cause,
        }
    }
}
