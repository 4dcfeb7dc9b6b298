//! Stage and layer planning.
//!
//! Store state only exists at stage boundaries, so a module reading a store
//! must sit in a later stage than the store. Within a stage, layers alternate
//! between maps (and block indexes) and stores; every module of a layer only
//! depends on earlier layers.

use crate::manifest::Module;
use std::collections::HashSet;
use std::fmt;
use strata_core::error::{Result, StrataError};

/// Modules executable together.
pub type Layer = Vec<Module>;

/// Layers of one stage, in order.
pub type StageLayers = Vec<Layer>;

/// Ordered stages of a module set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStages {
    stages: Vec<StageLayers>,
}

impl ExecutionStages {
    /// Every stage.
    pub fn stages(&self) -> &[StageLayers] {
        &self.stages
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True when there is no stage.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Layers of stage `index`.
    pub fn stage(&self, index: usize) -> Option<&StageLayers> {
        self.stages.get(index)
    }

    /// Stage holding module `name`.
    pub fn stage_of(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|layers| {
            layers
                .iter()
                .any(|layer| layer.iter().any(|m| m.name == name))
        })
    }

    /// Modules of stage `index`, layer by layer.
    pub fn modules_of(&self, index: usize) -> Vec<&Module> {
        self.stages
            .get(index)
            .map(|layers| layers.iter().flatten().collect())
            .unwrap_or_default()
    }

    /// Modules of stages `0..=index`, in execution order.
    pub fn modules_through(&self, index: usize) -> Vec<&Module> {
        self.stages
            .iter()
            .take(index + 1)
            .flat_map(|layers| layers.iter().flatten())
            .collect()
    }

    /// Store modules of stage `index`.
    pub fn stores_of(&self, index: usize) -> Vec<&Module> {
        self.modules_of(index)
            .into_iter()
            .filter(|m| m.kind.is_store())
            .collect()
    }

    /// Module names of stage `index`.
    pub fn names_of(&self, index: usize) -> Vec<String> {
        self.modules_of(index)
            .into_iter()
            .map(|m| m.name.clone())
            .collect()
    }
}

impl fmt::Display for ExecutionStages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, layers) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str("[")?;
            for (j, layer) in layers.iter().enumerate() {
                if j > 0 {
                    f.write_str(" ")?;
                }
                let names: Vec<&str> = layer.iter().map(|m| m.name.as_str()).collect();
                write!(f, "[{}]", names.join(" "))?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

/// Split `modules` into stages and layers.
///
/// Layer `i` takes stores when `i` is even and maps or block indexes when it
/// is odd. A module joins a layer once all of its dependencies are placed in
/// earlier layers. A non-empty store layer closes the current stage; empty
/// layers are dropped. Modules keep their relative order within a layer.
pub fn compute_stages(modules: &[Module]) -> Result<ExecutionStages> {
    let mut placed: HashSet<&str> = HashSet::with_capacity(modules.len());
    let mut stages: Vec<StageLayers> = Vec::new();
    let mut current: StageLayers = Vec::new();
    let mut previous_empty = false;
    let mut layer_index = 0usize;

    while placed.len() < modules.len() {
        let stores_turn = layer_index % 2 == 0;
        let layer: Layer = modules
            .iter()
            .filter(|m| !placed.contains(m.name.as_str()))
            .filter(|m| m.kind.is_store() == stores_turn)
            .filter(|m| {
                m.dependencies()
                    .iter()
                    .all(|dep| placed.contains(dep) || !modules.iter().any(|o| o.name == *dep))
            })
            .cloned()
            .collect();

        if layer.is_empty() {
            if previous_empty {
                let stuck: Vec<&str> = modules
                    .iter()
                    .filter(|m| !placed.contains(m.name.as_str()))
                    .map(|m| m.name.as_str())
                    .collect();
                return Err(StrataError::ModuleCycle {
                    modules: stuck.join(", "),
                });
            }
            previous_empty = true;
        } else {
            previous_empty = false;
            for module in &layer {
                if let Some(m) = modules.iter().find(|m| m.name == module.name) {
                    placed.insert(m.name.as_str());
                }
            }
            current.push(layer);
            if stores_turn {
                stages.push(std::mem::take(&mut current));
            }
        }
        layer_index += 1;
    }

    if !current.is_empty() {
        stages.push(current);
    }
    Ok(ExecutionStages { stages })
}
