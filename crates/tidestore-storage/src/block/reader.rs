//! Block Reader - Streaming a Finalized Block Back
//!
//! `BlockReader` opens a previously finalized block file set and returns
//! its `(key, payload)` entries in the order they were written.
//!
//! ## Lifecycle
//!
//! 1. `open(shard, version)` - open info/index/data read-only, decode the
//!    info header, and slurp the index file into memory. The reader
//!    expects all three files to exist; checkpoint presence is checked by
//!    the catalog, not here.
//! 2. `read()` repeatedly - one entry per call, in append order.
//! 3. `close()` - release the descriptors.
//!
//! ## Validation
//!
//! Every record is framed as `marker || idx_be64 || payload` in the data
//! file. `read()` verifies that the frame starts with the expected marker
//! (`MarkerNotFound` otherwise) and that the framed ordinal matches the
//! index entry (`WrongIdx` otherwise), so index/data file skew is caught
//! on the first affected record rather than surfacing as garbage
//! payloads. A frame shorter than the index entry declares is a
//! `ShortRead`; an index cursor that yields a zero-byte varint is a
//! `ZeroSizeIndexEntry`.

use bytes::Bytes;
use prost::Message;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::info;

use tidestore_core::{varint, Error, Result};

use crate::config::BlockConfig;
use crate::schema::{IndexEntry, IndexInfo};

use super::{
    block_file_path, shard_dir_path, TimeRange, DATA_FILE_SUFFIX, IDX_LEN, INDEX_FILE_SUFFIX,
    INFO_FILE_SUFFIX, RECORD_MARKER,
};

/// Reads one block file set.
pub struct BlockReader {
    config: BlockConfig,

    info_file: Option<File>,
    index_file: Option<File>,
    data_file: Option<File>,

    /// Block start, nanoseconds
    start: i64,

    /// Block time window, nanoseconds
    window: i64,

    entries: i64,
    entries_read: i64,

    /// Unconsumed remainder of the in-memory index file
    index_unread: Bytes,
}

impl BlockReader {
    pub fn new(config: BlockConfig) -> Self {
        Self {
            config,
            info_file: None,
            index_file: None,
            data_file: None,
            start: 0,
            window: 0,
            entries: 0,
            entries_read: 0,
            index_unread: Bytes::new(),
        }
    }

    /// Open the block identified by `(shard, version)`. On any failure the
    /// descriptors opened so far are released before the error is
    /// returned.
    pub async fn open(&mut self, shard: u32, version: i64) -> Result<()> {
        let shard_dir = shard_dir_path(&self.config.root, shard);

        for (suffix, slot) in [
            (INFO_FILE_SUFFIX, 0usize),
            (INDEX_FILE_SUFFIX, 1),
            (DATA_FILE_SUFFIX, 2),
        ] {
            let path = block_file_path(&shard_dir, version, suffix);
            match File::open(&path).await {
                Ok(file) => match slot {
                    0 => self.info_file = Some(file),
                    1 => self.index_file = Some(file),
                    _ => self.data_file = Some(file),
                },
                Err(e) => {
                    self.close().await?;
                    return Err(e.into());
                }
            }
        }

        if let Err(e) = self.read_info().await {
            self.close().await?;
            return Err(e);
        }
        if let Err(e) = self.read_index().await {
            self.close().await?;
            return Err(e);
        }

        info!(shard, version, entries = self.entries, "block reader opened");
        Ok(())
    }

    async fn read_info(&mut self) -> Result<()> {
        let info_file = self.info_file.as_mut().ok_or_else(not_open)?;
        let mut buf = Vec::new();
        info_file.read_to_end(&mut buf).await?;
        let info = IndexInfo::decode(buf.as_slice())?;

        self.start = info.start;
        self.window = info.window;
        self.entries = info.entries;
        self.entries_read = 0;
        Ok(())
    }

    async fn read_index(&mut self) -> Result<()> {
        let index_file = self.index_file.as_mut().ok_or_else(not_open)?;
        let mut buf = Vec::new();
        index_file.read_to_end(&mut buf).await?;
        self.index_unread = Bytes::from(buf);
        Ok(())
    }

    /// Return the next `(key, payload)` entry.
    pub async fn read(&mut self) -> Result<(String, Bytes)> {
        let (size, consumed) = varint::decode_u64(&self.index_unread).unwrap_or((0, 0));
        if consumed < 1 {
            return Err(Error::ZeroSizeIndexEntry);
        }
        self.index_unread = self.index_unread.slice(consumed..);

        let size = size as usize;
        if size > self.index_unread.len() {
            return Err(Error::ShortRead);
        }
        let entry = IndexEntry::decode(&self.index_unread[..size])?;
        self.index_unread = self.index_unread.slice(size..);

        let expected = RECORD_MARKER.len() + IDX_LEN + entry.size as usize;
        let mut frame = vec![0u8; expected];
        let data_file = self.data_file.as_mut().ok_or_else(not_open)?;
        if let Err(e) = data_file.read_exact(&mut frame).await {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                return Err(Error::ShortRead);
            }
            return Err(e.into());
        }

        if frame[..RECORD_MARKER.len()] != RECORD_MARKER {
            return Err(Error::MarkerNotFound);
        }

        let mut idx_bytes = [0u8; IDX_LEN];
        idx_bytes.copy_from_slice(&frame[RECORD_MARKER.len()..RECORD_MARKER.len() + IDX_LEN]);
        let idx = u64::from_be_bytes(idx_bytes) as i64;
        if idx != entry.idx {
            return Err(Error::WrongIdx {
                expected: entry.idx,
                actual: idx,
            });
        }

        self.entries_read += 1;

        let mut frame = Bytes::from(frame);
        let payload = frame.split_off(RECORD_MARKER.len() + IDX_LEN);
        Ok((entry.key, payload))
    }

    /// The block's time window `[start, start + window)`.
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.start + self.window,
        }
    }

    /// Total entries in the block per the info header.
    pub fn entries(&self) -> i64 {
        self.entries
    }

    /// Entries returned by `read` so far.
    pub fn entries_read(&self) -> i64 {
        self.entries_read
    }

    /// Release all descriptors. Safe to call at any point.
    pub async fn close(&mut self) -> Result<()> {
        self.info_file.take();
        self.index_file.take();
        self.data_file.take();
        Ok(())
    }
}

fn not_open() -> Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "block reader is not open").into()
}
