use super::buffer::ExecOutputBuffer;
use super::config::ExecOutputConfig;
use super::file::{ExecOutputFile, OutputFileWriter};
use crate::block::{next_boundary, BlockRange};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Rotating writer of the output files of the cached modules.
///
/// Every module gets one open file; when a block lands past the end of that
/// file, the file is handed back for writing and the next one is opened.
#[derive(Debug, Default)]
pub struct ExecOutputWriter {
    files: BTreeMap<String, ExecOutputFile>,
}

impl ExecOutputWriter {
    /// Open the first file of every module in `configs`.
    ///
    /// Files cover `interval`-aligned segments starting at
    /// `max(start_block, module initial block)`, clipped to `exclusive_end`.
    pub fn new(
        configs: &[Arc<ExecOutputConfig>],
        start_block: u64,
        exclusive_end: u64,
        interval: u64,
    ) -> Self {
        let mut files = BTreeMap::new();
        for config in configs {
            let start = start_block.max(config.initial_block());
            if start >= exclusive_end {
                continue;
            }
            let end = next_boundary(start, interval).min(exclusive_end);
            let file = config.new_file(BlockRange::new(start, end), interval, exclusive_end);
            files.insert(config.module_name().to_string(), file);
        }
        Self { files }
    }

    /// Modules with an open file.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Record the outputs of the final block in `buffer`.
    pub fn write(&mut self, buffer: &ExecOutputBuffer) {
        let clock = buffer.clock();
        for (name, file) in self.files.iter_mut() {
            if !file.range().contains(clock.number) {
                continue;
            }
            if buffer.is_skipped(name) {
                file.set(clock, &[], true);
            } else if let Some(value) = buffer.get(name) {
                file.set(clock, value, false);
            }
        }
    }

    /// Close every file that ends at or before `block_num` and open its
    /// successor. Returns the writers of the closed, non-empty files.
    pub fn maybe_rotate(&mut self, block_num: u64) -> Vec<OutputFileWriter> {
        let mut writers = Vec::new();
        let names: Vec<String> = self.files.keys().cloned().collect();
        for name in names {
            let Some(mut current) = self.files.remove(&name) else {
                continue;
            };
            while block_num >= current.range().exclusive_end {
                debug!(module = %name, range = %current.range(), "rotating output file");
                writers.extend(current.save());
                match current.next_file() {
                    Some(next) => current = next,
                    None => break,
                }
            }
            if block_num < current.range().exclusive_end {
                self.files.insert(name, current);
            }
        }
        writers
    }

    /// Close every remaining file.
    pub fn close(&mut self) -> Vec<OutputFileWriter> {
        std::mem::take(&mut self.files)
            .into_values()
            .filter_map(|file| file.save())
            .collect()
    }
}
