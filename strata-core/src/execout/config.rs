use super::file::ExecOutputFile;
use crate::block::BlockRange;
use crate::error::Result;
use crate::storage::{retry, ObjectStore, RetryConfig};
use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock};

fn output_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)-(\d+)\.output$").unwrap_or_else(|e| {
            panic!("static regex for output file names failed to compile: {e}")
        })
    })
}

/// `{start:010}-{end:010}.output`
pub fn output_file_name(range: &BlockRange) -> String {
    format!("{:010}-{:010}.output", range.start, range.exclusive_end)
}

/// Parse an output file name into its range.
pub fn parse_output_file_name(filename: &str) -> Option<BlockRange> {
    let caps = output_file_regex().captures(filename)?;
    let start = caps.get(1)?.as_str().parse().ok()?;
    let end = caps.get(2)?.as_str().parse().ok()?;
    Some(BlockRange::new(start, end))
}

/// Where the cached outputs of one module live.
pub struct ExecOutputConfig {
    module_name: String,
    module_hash: String,
    initial_block: u64,
    object_store: Arc<dyn ObjectStore>,
}

impl ExecOutputConfig {
    /// Outputs are rooted at `{module_hash}/outputs` below `base`.
    pub fn new(
        module_name: impl Into<String>,
        module_hash: impl Into<String>,
        initial_block: u64,
        base: &Arc<dyn ObjectStore>,
    ) -> Self {
        let module_hash = module_hash.into();
        let object_store = base.sub_store(&format!("{module_hash}/outputs"));
        Self {
            module_name: module_name.into(),
            module_hash,
            initial_block,
            object_store,
        }
    }

    /// Module name.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Module hash.
    pub fn module_hash(&self) -> &str {
        &self.module_hash
    }

    /// First block the module runs on.
    pub fn initial_block(&self) -> u64 {
        self.initial_block
    }

    /// Object store scoped to `{hash}/outputs`.
    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.object_store
    }

    /// An empty file over `range`. `next_file` continues by `interval`
    /// blocks until `upper_bound`.
    pub fn new_file(&self, range: BlockRange, interval: u64, upper_bound: u64) -> ExecOutputFile {
        ExecOutputFile::new(
            self.module_name.clone(),
            range,
            interval,
            upper_bound,
            Arc::clone(&self.object_store),
        )
    }

    /// Ranges of every output file already written, ascending by start.
    pub async fn list_existing_files(&self) -> Result<Vec<BlockRange>> {
        let names = retry(RetryConfig::listings(), "list output files", || {
            self.object_store.list_files("")
        })
        .await?;
        let mut ranges: Vec<BlockRange> = names
            .iter()
            .filter_map(|n| parse_output_file_name(n))
            .collect();
        ranges.sort();
        Ok(ranges)
    }
}

impl fmt::Debug for ExecOutputConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecOutputConfig")
            .field("module_name", &self.module_name)
            .field("module_hash", &self.module_hash)
            .field("initial_block", &self.initial_block)
            .field("object_store", &self.object_store.base_url())
            .finish()
    }
}
