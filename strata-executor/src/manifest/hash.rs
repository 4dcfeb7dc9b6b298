//! Content-addressed module identities.
//!
//! A module hash covers its declaration, its binary and the hashes of every
//! module it depends on, so editing one module changes its hash and those of
//! its descendants only.

use super::graph::ModuleGraph;
use super::module::{Binary, Module, ModuleKind};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use strata_core::error::{Result, StrataError};

/// Memoized module hashes.
#[derive(Debug, Clone, Default)]
pub struct ModuleHashes {
    cache: HashMap<String, String>,
}

impl ModuleHashes {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex SHA-256 of `name`, computing ancestors first.
    pub fn hash_module(
        &mut self,
        graph: &ModuleGraph,
        binaries: &[Binary],
        name: &str,
    ) -> Result<String> {
        if let Some(hash) = self.cache.get(name) {
            return Ok(hash.clone());
        }

        let ancestors = graph.ancestors_of(name)?;
        let mut ancestor_hashes = Vec::with_capacity(ancestors.len());
        for ancestor in ancestors {
            let hash = match self.cache.get(&ancestor.name) {
                Some(hash) => hash.clone(),
                None => {
                    let hash = digest(ancestor, binaries, &self.ancestor_hashes(graph, ancestor)?)?;
                    self.cache.insert(ancestor.name.clone(), hash.clone());
                    hash
                }
            };
            ancestor_hashes.push(hash);
        }

        let module = graph.module(name)?;
        let hash = digest(module, binaries, &ancestor_hashes)?;
        self.cache.insert(name.to_string(), hash.clone());
        Ok(hash)
    }

    /// A previously computed hash.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.cache.get(name).map(String::as_str)
    }

    /// Every computed hash by module name.
    pub fn into_map(self) -> HashMap<String, String> {
        self.cache
    }

    /// Hashes of the ancestors of `module`; they are computed before it
    /// since ancestors come in execution order.
    fn ancestor_hashes(&self, graph: &ModuleGraph, module: &Module) -> Result<Vec<String>> {
        graph
            .ancestors_of(&module.name)?
            .into_iter()
            .map(|a| {
                self.cache
                    .get(&a.name)
                    .cloned()
                    .ok_or_else(|| StrataError::Internal {
                        cause: format!("hash of '{}' requested before its ancestor '{}'", module.name, a.name),
                    })
            })
            .collect()
    }
}

fn digest(module: &Module, binaries: &[Binary], ancestor_hashes: &[String]) -> Result<String> {
    let binary = binaries
        .get(module.binary_index)
        .ok_or_else(|| StrataError::InvalidRequest {
            cause: format!(
                "module '{}' references binary {} but the package has {}",
                module.name,
                module.binary_index,
                binaries.len()
            ),
        })?;

    let mut hasher = Sha256::new();
    hasher.update(b"initial_block");
    hasher.update(module.initial_block.to_le_bytes());

    hasher.update(b"kind");
    hasher.update(module.kind.as_str().as_bytes());
    if let ModuleKind::Store {
        update_policy,
        value_type,
    } = &module.kind
    {
        hasher.update(update_policy.as_str().as_bytes());
        hasher.update(value_type.to_string().as_bytes());
    }

    hasher.update(b"binary");
    hasher.update(binary.r#type.as_bytes());
    hasher.update(&binary.content);

    hasher.update(b"inputs");
    for input in &module.inputs {
        hasher.update(input.label().as_bytes());
    }

    if let Some(filter) = &module.block_filter {
        hasher.update(b"block_filter");
        hasher.update(filter.module.as_bytes());
        hasher.update(filter.query.as_bytes());
    }

    hasher.update(b"ancestors");
    for hash in ancestor_hashes {
        hasher.update(hash.as_bytes());
    }

    hasher.update(b"entrypoint");
    hasher.update(module.entrypoint.as_bytes());

    Ok(hex::encode(hasher.finalize()))
}
