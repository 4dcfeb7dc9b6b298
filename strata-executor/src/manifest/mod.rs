//! Module packages, their dependency graph and their hashes.
//!
//! A [`Package`] declares map, store and block index modules. The
//! [`ModuleGraph`] validates and orders them, [`ModuleHashes`] gives each one
//! a content-addressed identity and [`OutputGraph`] narrows the package to
//! what one request needs.

mod graph;
mod hash;
mod module;
mod output_graph;

pub use graph::{lowest_initial_block, ModuleGraph};
pub use hash::ModuleHashes;
pub use module::{BlockFilter, Binary, Input, Module, ModuleKind, Package, StoreMode};
pub use output_graph::OutputGraph;
