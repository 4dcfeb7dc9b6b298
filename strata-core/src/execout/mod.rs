//! Exec-output cache.
//!
//! Outputs of cached modules are persisted per segment in
//! `{hash}/outputs/{start:010}-{end:010}.output`, keyed by block id so that a
//! forked block never hits the cache of its sibling.

mod buffer;
mod config;
mod file;
mod walker;
mod writer;

pub use buffer::{ExecOutputBuffer, CLOCK_TYPE};
pub use config::{output_file_name, parse_output_file_name, ExecOutputConfig};
pub use file::{ExecOutputFile, OutputFileWriter};
pub use walker::FileWalker;
pub use writer::ExecOutputWriter;
