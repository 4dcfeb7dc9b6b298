use crate::block::BlockRange;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

fn state_file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)-(\d+)(?:\.([^.]+))?\.(kv|partial)$").unwrap_or_else(|e| {
            panic!("static regex for state file names failed to compile: {e}")
        })
    })
}

/// A store snapshot file: its name and the range it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Object name relative to `{hash}/states`.
    pub filename: String,
    /// Covered range. Full files start at the module initial block.
    pub range: BlockRange,
    /// True for `.partial` files.
    pub partial: bool,
    /// Trace id embedded by legacy writers.
    pub trace_id: Option<String>,
}

impl FileInfo {
    /// A full snapshot from `initial_block` up to `exclusive_end`.
    pub fn full(initial_block: u64, exclusive_end: u64) -> Self {
        let range = BlockRange::new(initial_block, exclusive_end);
        Self {
            filename: full_file_name(&range),
            range,
            partial: false,
            trace_id: None,
        }
    }

    /// A partial snapshot over `[start, exclusive_end)`.
    pub fn partial(start: u64, exclusive_end: u64) -> Self {
        let range = BlockRange::new(start, exclusive_end);
        Self {
            filename: partial_file_name(&range),
            range,
            partial: true,
            trace_id: None,
        }
    }
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.filename)
    }
}

/// `{end:010}-{start:010}.kv`
pub fn full_file_name(range: &BlockRange) -> String {
    format!("{:010}-{:010}.kv", range.exclusive_end, range.start)
}

/// `{end:010}-{start:010}.partial`
pub fn partial_file_name(range: &BlockRange) -> String {
    format!("{:010}-{:010}.partial", range.exclusive_end, range.start)
}

/// Parse a snapshot file name. Accepts the legacy
/// `{end}-{start}.{trace_id}.partial` shape as well.
pub fn parse_file_name(filename: &str) -> Option<FileInfo> {
    let caps = state_file_regex().captures(filename)?;
    let end: u64 = caps.get(1)?.as_str().parse().ok()?;
    let start: u64 = caps.get(2)?.as_str().parse().ok()?;
    Some(FileInfo {
        filename: filename.to_string(),
        range: BlockRange::new(start, end),
        partial: caps.get(4)?.as_str() == "partial",
        trace_id: caps.get(3).map(|m| m.as_str().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_zero_padded_end_first() {
        let r = BlockRange::new(0, 10);
        assert_eq!(full_file_name(&r), "0000000010-0000000000.kv");
        assert_eq!(partial_file_name(&r), "0000000010-0000000000.partial");
        assert_eq!(FileInfo::partial(20, 30).filename, "0000000030-0000000020.partial");
    }

    #[test]
    fn parse_roundtrips() {
        let info = parse_file_name("0000000030-0000000020.partial").unwrap();
        assert_eq!(info.range, BlockRange::new(20, 30));
        assert!(info.partial);
        assert_eq!(info.trace_id, None);

        let full = parse_file_name("0000000100-0000000000.kv").unwrap();
        assert!(!full.partial);
        assert_eq!(full, FileInfo::full(0, 100));
    }

    #[test]
    fn parse_accepts_legacy_trace_id() {
        let info = parse_file_name("0000000030-0000000020.abc123.partial").unwrap();
        assert_eq!(info.trace_id.as_deref(), Some("abc123"));
        assert_eq!(info.range, BlockRange::new(20, 30));
    }

    #[test]
    fn parse_rejects_other_files() {
        assert!(parse_file_name("0000000100-0000000110.output").is_none());
        assert!(parse_file_name("notes.txt").is_none());
        assert!(parse_file_name("0000000030-0000000020.partial.tmp-write").is_none());
    }
}
