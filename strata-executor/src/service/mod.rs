//! Request serving.
//!
//! [`Tier1Service`] answers client streams: it plans the request, farms the
//! historical part out to [`Tier2Service`] through a [`Tier2Client`], replays
//! cached outputs and runs the live pipeline. Blocks come from a
//! [`BlockSource`].

mod client;
mod request;
mod source;
mod status;
mod tier1;
mod tier2;

pub use client::{InProcessTier2Client, ResponseStream, Tier2Client};
pub use request::{BlocksRequest, ProcessRangeRequest};
pub use source::{BlockSource, BlockStream, EventStream};
pub use status::{status_code, to_status};
pub use tier1::Tier1Service;
pub use tier2::Tier2Service;
