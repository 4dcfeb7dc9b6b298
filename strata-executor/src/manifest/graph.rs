//! Module dependency graph.

use super::module::{Input, Module, ModuleKind};
use std::collections::{HashMap, HashSet, VecDeque};
use strata_core::error::{Result, StrataError};

/// Validated, topologically sorted module DAG.
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    /// Modules in declaration order.
    modules: Vec<Module>,
    /// Module index by name.
    index: HashMap<String, usize>,
    /// Direct dependencies (inputs then block filter) by module index.
    parents: Vec<Vec<usize>>,
    /// Module indices in execution order.
    sorted: Vec<usize>,
}

impl ModuleGraph {
    /// Validate `modules` and sort them.
    ///
    /// Names must be unique, every reference must resolve to a module of the
    /// expected kind and the graph must be acyclic.
    pub fn new(modules: Vec<Module>) -> Result<Self> {
        let mut index = HashMap::with_capacity(modules.len());
        for (i, module) in modules.iter().enumerate() {
            if index.insert(module.name.clone(), i).is_some() {
                return Err(StrataError::DuplicateModule {
                    module: module.name.clone(),
                });
            }
        }

        let mut parents = Vec::with_capacity(modules.len());
        for module in &modules {
            validate_references(module, &modules, &index)?;
            let deps = module
                .dependencies()
                .into_iter()
                .filter_map(|dep| index.get(dep).copied())
                .collect();
            parents.push(deps);
        }

        let sorted = topological_sort(&modules, &parents)?;
        Ok(Self {
            modules,
            index,
            parents,
            sorted,
        })
    }

    /// Modules in declaration order.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// True when the graph holds no module.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module named `name`.
    pub fn module(&self, name: &str) -> Result<&Module> {
        self.index
            .get(name)
            .map(|&i| &self.modules[i])
            .ok_or_else(|| StrataError::ModuleNotFound {
                module: name.to_string(),
            })
    }

    /// True when `name` is declared.
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Modules in execution order: every module after its dependencies.
    pub fn topological_order(&self) -> impl Iterator<Item = &Module> {
        self.sorted.iter().map(|&i| &self.modules[i])
    }

    /// Direct dependencies of `name`.
    pub fn parents_of(&self, name: &str) -> Result<Vec<&Module>> {
        let i = self.position(name)?;
        Ok(self.parents[i].iter().map(|&p| &self.modules[p]).collect())
    }

    /// Transitive dependencies of `name`, in execution order, excluding
    /// `name` itself.
    pub fn ancestors_of(&self, name: &str) -> Result<Vec<&Module>> {
        let i = self.position(name)?;
        let mut cone = self.cone(&[i]);
        cone.remove(&i);
        Ok(self.in_order(&cone))
    }

    /// Every module needed to compute `targets`, targets included, in
    /// execution order.
    pub fn modules_down_to(&self, targets: &[&str]) -> Result<Vec<&Module>> {
        let starts = targets
            .iter()
            .map(|t| self.position(t))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.in_order(&self.cone(&starts)))
    }

    /// Store modules needed to compute `targets`, targets included.
    pub fn stores_down_to(&self, targets: &[&str]) -> Result<Vec<&Module>> {
        Ok(self
            .modules_down_to(targets)?
            .into_iter()
            .filter(|m| m.kind.is_store())
            .collect())
    }

    /// Store modules `name` transitively depends on.
    pub fn ancestor_stores_of(&self, name: &str) -> Result<Vec<&Module>> {
        Ok(self
            .ancestors_of(name)?
            .into_iter()
            .filter(|m| m.kind.is_store())
            .collect())
    }

    fn position(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StrataError::ModuleNotFound {
                module: name.to_string(),
            })
    }

    fn cone(&self, starts: &[usize]) -> HashSet<usize> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = starts.iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            if seen.insert(i) {
                queue.extend(self.parents[i].iter().copied());
            }
        }
        seen
    }

    fn in_order(&self, selected: &HashSet<usize>) -> Vec<&Module> {
        self.sorted
            .iter()
            .filter(|i| selected.contains(i))
            .map(|&i| &self.modules[i])
            .collect()
    }
}

/// Lowest initial block among `modules`, `0` when empty.
pub fn lowest_initial_block<'a>(modules: impl IntoIterator<Item = &'a Module>) -> u64 {
    modules
        .into_iter()
        .map(|m| m.initial_block)
        .min()
        .unwrap_or(0)
}

fn validate_references(
    module: &Module,
    modules: &[Module],
    index: &HashMap<String, usize>,
) -> Result<()> {
    let lookup = |name: &str| -> Result<&Module> {
        index
            .get(name)
            .map(|&i| &modules[i])
            .ok_or_else(|| StrataError::UnknownInput {
                module: module.name.clone(),
                input: name.to_string(),
            })
    };
    let invalid = |input: &Input, cause: String| StrataError::InvalidInput {
        module: module.name.clone(),
        input: input.label(),
        cause,
    };

    for input in &module.inputs {
        match input {
            Input::Map { module: upstream } => {
                let target = lookup(upstream)?;
                if !target.kind.is_map() {
                    return Err(invalid(
                        input,
                        format!("'{upstream}' is a {} module, expected map", target.kind),
                    ));
                }
            }
            Input::Store { module: upstream, .. } => {
                let target = lookup(upstream)?;
                if !target.kind.is_store() {
                    return Err(invalid(
                        input,
                        format!("'{upstream}' is a {} module, expected store", target.kind),
                    ));
                }
                if upstream == &module.name {
                    return Err(invalid(input, "a store cannot read itself".to_string()));
                }
            }
            Input::Source { .. } | Input::Params { .. } => {}
        }
    }

    if let Some(filter) = &module.block_filter {
        let target = lookup(&filter.module)?;
        if !matches!(target.kind, ModuleKind::BlockIndex { .. }) {
            return Err(StrataError::InvalidInput {
                module: module.name.clone(),
                input: format!("block_filter:{}", filter.module),
                cause: format!("'{}' is a {} module, expected block_index", filter.module, target.kind),
            });
        }
    }
    Ok(())
}

/// Kahn's algorithm; leftovers form a cycle.
fn topological_sort(modules: &[Module], parents: &[Vec<usize>]) -> Result<Vec<usize>> {
    let mut in_degree: Vec<usize> = parents.iter().map(Vec::len).collect();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); modules.len()];
    for (child, deps) in parents.iter().enumerate() {
        for &parent in deps {
            children[parent].push(child);
        }
    }

    let mut queue: VecDeque<usize> = (0..modules.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(modules.len());
    while let Some(i) = queue.pop_front() {
        sorted.push(i);
        for &child in &children[i] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if sorted.len() != modules.len() {
        let stuck: Vec<&str> = (0..modules.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| modules[i].name.as_str())
            .collect();
        return Err(StrataError::ModuleCycle {
            modules: stuck.join(", "),
        });
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::store::{UpdatePolicy, ValueType};

    fn store(name: &str) -> Module {
        Module::store(name, UpdatePolicy::Set, ValueType::String)
    }

    fn graph() -> ModuleGraph {
        ModuleGraph::new(vec![
            Module::map("events").with_input(Input::source("block")),
            store("balances").with_input(Input::map("events")),
            Module::map("prices").with_input(Input::source("block")),
            store("totals")
                .with_input(Input::map("prices"))
                .with_input(Input::store_get("balances")),
            Module::map("output")
                .with_input(Input::map("events"))
                .with_input(Input::store_deltas("totals")),
        ])
        .unwrap()
    }

    fn names(modules: Vec<&Module>) -> Vec<&str> {
        modules.into_iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn sorts_dependencies_first() {
        let graph = graph();
        let order: Vec<&str> = graph.topological_order().map(|m| m.name.as_str()).collect();
        let pos = |n: &str| order.iter().position(|o| *o == n).unwrap();
        assert!(pos("events") < pos("balances"));
        assert!(pos("balances") < pos("totals"));
        assert!(pos("prices") < pos("totals"));
        assert!(pos("totals") < pos("output"));
    }

    #[test]
    fn cones() {
        let graph = graph();
        assert_eq!(
            names(graph.ancestors_of("totals").unwrap()),
            vec!["events", "prices", "balances"]
        );
        assert_eq!(
            names(graph.stores_down_to(&["output"]).unwrap()),
            vec!["balances", "totals"]
        );
        assert_eq!(names(graph.ancestor_stores_of("balances").unwrap()), Vec::<&str>::new());
        assert_eq!(names(graph.modules_down_to(&["prices"]).unwrap()), vec!["prices"]);
        assert_eq!(names(graph.parents_of("output").unwrap()), vec!["events", "totals"]);
    }

    #[test]
    fn rejects_duplicates_and_unknown_inputs() {
        let err = ModuleGraph::new(vec![Module::map("a"), Module::map("a")]).unwrap_err();
        assert_eq!(err.code(), "E201");

        let err = ModuleGraph::new(vec![Module::map("a").with_input(Input::map("nope"))]).unwrap_err();
        assert_eq!(err.code(), "E202");
    }

    #[test]
    fn rejects_wrong_input_kinds() {
        let err = ModuleGraph::new(vec![
            store("s"),
            Module::map("m").with_input(Input::map("s")),
        ])
        .unwrap_err();
        assert_eq!(err.code(), "E204");

        let err = ModuleGraph::new(vec![
            Module::map("a"),
            Module::map("m").with_block_filter("a", "key"),
        ])
        .unwrap_err();
        assert_eq!(err.code(), "E204");
    }

    #[test]
    fn detects_cycles() {
        let err = ModuleGraph::new(vec![
            Module::map("a").with_input(Input::map("c")),
            Module::map("b").with_input(Input::map("a")),
            Module::map("c").with_input(Input::map("b")),
            Module::map("d"),
        ])
        .unwrap_err();
        assert_eq!(err.code(), "E203");
        assert!(err.to_string().contains("a, b, c"));
    }

    #[test]
    fn lowest_initial() {
        let modules = [Module::map("a").with_initial_block(50), Module::map("b").with_initial_block(20)];
        assert_eq!(lowest_initial_block(&modules), 20);
        assert_eq!(lowest_initial_block(&[]), 0);
    }
}
