//! Pipeline runner: executes the modules of a request on every block.
//!
//! Per block, modules run in plan order. Each one is served from the output
//! cache when an earlier run already produced it, skipped when its initial
//! block or block filter says so, and otherwise called into WASM. Outputs
//! land in an [`ExecOutputBuffer`](strata_core::execout::ExecOutputBuffer)
//! where downstream modules pick them up.
//!
//! Reversible blocks are kept by the [`ForkHandler`] until the chain
//! finalizes or undoes them; only final blocks reach exec-output files,
//! index files and store snapshots.

mod arguments;
mod cache;
mod executor;
mod fork;
mod gate;
mod runner;

pub use arguments::{collect_arguments, resolve_inputs, ArgumentSource};
pub use cache::OutputCache;
pub use executor::{ExecutorKind, ModuleExecutor, ModuleOutput, ModuleRun};
pub use fork::{ForkHandler, ReversibleBlock, Undone};
pub use gate::OutputGate;
pub use runner::{
    build_executors, Pipeline, PipelineBuilder, PipelineOptions, ResponseSender,
};
