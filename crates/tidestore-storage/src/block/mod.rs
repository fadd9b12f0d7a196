//! Block File Set
//!
//! A block is the unit of persistence for one shard over one time window.
//! It materializes as four files under `<root>/<shard>/`:
//!
//! ```text
//! <root>/<shard>/<block_id>.info        info header (single proto record)
//! <root>/<shard>/<block_id>.index       varint-length-prefixed index entries
//! <root>/<shard>/<block_id>.data        framed payload records
//! <root>/<shard>/<block_id>.checkpoint  zero-byte completion sentinel
//! ```
//!
//! `<block_id>` is the block start (nanoseconds) on the write path and an
//! opaque version tag chosen by the catalog on the read path.
//!
//! ## Data Record Framing
//!
//! ```text
//! ┌────────────┬──────────────┬───────────────┐
//! │ Marker     │ Idx          │ Payload       │
//! │ (4 bytes)  │ (8 bytes BE) │ (entry.size)  │
//! └────────────┴──────────────┴───────────────┘
//! ```
//!
//! The marker is a fixed magic constant shared by writer and reader;
//! changing it is a format-breaking change. The idx is the record ordinal
//! and must match the index entry it was read through, giving every read a
//! cheap self-check against index/data skew.
//!
//! ## Durability Contract
//!
//! The checkpoint file is created only after the info, index, and data
//! files have been fully written and closed, in that order. A block
//! without a checkpoint is incomplete: crashed writers never produce one,
//! and the catalog must ignore or recover such blocks. Readers themselves
//! do not consult the checkpoint; visibility is the catalog's concern.

mod reader;
mod writer;

pub use reader::BlockReader;
pub use writer::BlockWriter;

use std::path::{Path, PathBuf};

/// Magic prefix on every data record.
pub const RECORD_MARKER: [u8; 4] = *b"TSRC";

/// Byte length of the big-endian record ordinal in a data frame.
pub const IDX_LEN: usize = 8;

pub const INFO_FILE_SUFFIX: &str = "info";
pub const INDEX_FILE_SUFFIX: &str = "index";
pub const DATA_FILE_SUFFIX: &str = "data";
pub const CHECKPOINT_FILE_SUFFIX: &str = "checkpoint";

/// A half-open nanosecond interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

pub(crate) fn shard_dir_path(root: &Path, shard: u32) -> PathBuf {
    root.join(shard.to_string())
}

pub(crate) fn block_file_path(shard_dir: &Path, block_id: i64, suffix: &str) -> PathBuf {
    shard_dir.join(format!("{}.{}", block_id, suffix))
}

/// Whether the checkpoint sentinel for `(shard, block_id)` exists under
/// `root`. This is the catalog's visibility predicate: a block is complete
/// and consistent iff its checkpoint is present.
pub async fn checkpoint_exists(root: &Path, shard: u32, block_id: i64) -> bool {
    let path = block_file_path(&shard_dir_path(root, shard), block_id, CHECKPOINT_FILE_SUFFIX);
    tokio::fs::metadata(path).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_dir_path() {
        let dir = shard_dir_path(Path::new("/data/blocks"), 7);
        assert_eq!(dir, PathBuf::from("/data/blocks/7"));
    }

    #[test]
    fn test_block_file_path() {
        let dir = shard_dir_path(Path::new("/data/blocks"), 7);
        let path = block_file_path(&dir, 1_650_000_000_000_000_000, INFO_FILE_SUFFIX);
        assert_eq!(
            path,
            PathBuf::from("/data/blocks/7/1650000000000000000.info")
        );
    }

    #[test]
    fn test_marker_is_four_bytes() {
        assert_eq!(RECORD_MARKER.len(), 4);
    }

    #[test]
    fn test_time_range() {
        let range = TimeRange {
            start: 100,
            end: 200,
        };
        assert_eq!(range.end - range.start, 100);
    }
}
