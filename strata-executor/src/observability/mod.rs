//! Structured logging.
//!
//! Every Tier-1 request runs in a `request` span carrying `tier` and
//! `request_id` (the session trace id sent to the client). Every Tier-2 job
//! runs in a `segment` span carrying `tier`, `stage` and `segment`. Events
//! logged inside inherit those fields.

mod logging;

pub use logging::{init_logging, subscriber, LogConfig, LogFormat};

/// Span around one module call.
#[macro_export]
macro_rules! module_span {
    ($module:expr, $block:expr) => {
        tracing::debug_span!("module_call", module = %$module, block_num = $block)
    };
}
