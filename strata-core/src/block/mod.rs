//! Discrete math over contiguous block intervals.

mod range;
mod segmenter;

pub use range::BlockRange;
pub use segmenter::{is_boundary, next_boundary, previous_boundary, Segmenter};
