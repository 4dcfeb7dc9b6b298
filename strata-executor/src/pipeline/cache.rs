//! Read side of the exec-output cache.

use std::collections::BTreeMap;
use std::sync::Arc;
use strata_core::block::{next_boundary, previous_boundary, BlockRange};
use strata_core::error::Result;
use strata_core::execout::{ExecOutputConfig, ExecOutputFile};
use strata_core::pb::{Clock, Item};
use tracing::debug;

/// Outputs cached by earlier runs, loaded one segment at a time.
#[derive(Debug)]
pub struct OutputCache {
    interval: u64,
    exclusive_end: u64,
    configs: BTreeMap<String, Arc<ExecOutputConfig>>,
    files: BTreeMap<String, ExecOutputFile>,
}

impl OutputCache {
    /// Cache over `interval`-aligned files, the last one ending at
    /// `exclusive_end`.
    pub fn new(interval: u64, exclusive_end: u64) -> Self {
        Self {
            interval,
            exclusive_end,
            configs: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    /// Read cached outputs of the module of `config`.
    pub fn with_module(mut self, config: Arc<ExecOutputConfig>) -> Self {
        self.configs.insert(config.module_name().to_string(), config);
        self
    }

    /// Whether no module is cached.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Make sure the file covering `block_num` is loaded for every module.
    pub async fn prepare(&mut self, block_num: u64) -> Result<()> {
        if self.interval == 0 {
            return Ok(());
        }
        for (name, config) in &self.configs {
            if block_num < config.initial_block() {
                continue;
            }
            if self
                .files
                .get(name)
                .is_some_and(|file| file.range().contains(block_num))
            {
                continue;
            }
            let start = previous_boundary(block_num, self.interval).max(config.initial_block());
            let end = next_boundary(block_num, self.interval).min(self.exclusive_end.max(block_num + 1));
            let mut file = config.new_file(BlockRange::new(start, end), self.interval, end);
            let loaded = file.load().await?;
            debug!(module = %name, range = %file.range(), loaded, "prepared output cache");
            self.files.insert(name.clone(), file);
        }
        Ok(())
    }

    /// Cached output of `module` for exactly `clock`.
    pub fn get(&self, module: &str, clock: &Clock) -> Option<&Item> {
        self.files.get(module).and_then(|file| file.get(clock))
    }
}
