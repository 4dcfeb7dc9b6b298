//! Strata Executor - block-stream execution engine.
//!
//! This crate runs packages of WASM modules over a blockchain:
//! - Module graph resolution, hashing and stage planning
//! - WASM host with the `state`, `env` and `logger` imports
//! - Pipeline runner with fork handling, output caching and snapshots
//! - Tier-2 segment jobs and the Tier-1 orchestrator and back-filler
//! - Tier-1 request serving over a [`BlockSource`](service::BlockSource)
//! - Structured logging and Prometheus metrics

#![warn(clippy::all)]

pub mod config;
pub mod manifest;
pub mod metrics;
pub mod observability;
pub mod orchestrator;
pub mod pipeline;
pub mod plan;
pub mod service;
pub mod testing;
pub mod wasm;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use crate::manifest::{Binary, Input, Module, ModuleKind, OutputGraph, Package};
    pub use crate::metrics::Metrics;
    pub use crate::observability::{init_logging, LogConfig};
    pub use crate::orchestrator::{FailureRecorder, LiveBackFiller, Orchestrator, WorkerPool};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, PipelineOptions};
    pub use crate::plan::{compute_stages, ExecutionStages, RequestPlan};
    pub use crate::service::{
        BlockSource, BlocksRequest, InProcessTier2Client, ProcessRangeRequest, Tier1Service,
        Tier2Client, Tier2Service,
    };
    pub use crate::wasm::{WasmRuntime, WasmRuntimeConfig};
}
