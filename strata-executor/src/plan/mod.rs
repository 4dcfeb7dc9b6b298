//! Execution planning.
//!
//! [`compute_stages`] splits the schedulable modules into stages and layers;
//! [`RequestPlan`] decides which ranges are built by segment jobs and which
//! are streamed live.

mod request_plan;
mod stages;

pub use request_plan::RequestPlan;
pub use stages::{compute_stages, ExecutionStages, Layer, StageLayers};
