//! Block Writer - Persisting a Batch of Keyed Payloads
//!
//! `BlockWriter` persists one shard's data for one time window as an
//! info/index/data file triple plus a checkpoint sentinel.
//!
//! ## Lifecycle
//!
//! 1. `open(shard, block_start)` - create the shard directory and open the
//!    three files write-create-truncate. No checkpoint yet.
//! 2. `write(key, payload)` zero or more times - append one framed record
//!    per call. Record ordinals start at zero and advance only on
//!    successful, non-empty appends.
//! 3. `close()` - write the info header, close the three files in order,
//!    then create the checkpoint.
//!
//! Payloads are opaque: the encoder pipeline produces them and the writer
//! never parses them.
//!
//! ## Failure Behavior
//!
//! Any I/O error from `write` is terminal for the block. `close` must
//! still be called to release the descriptors, but it will then skip the
//! info header and checkpoint, leaving the block invisible to any reader
//! that honors the checkpoint contract. The same applies when `close` is
//! never called (writer crash): no checkpoint, no visibility.
//!
//! ## Thread Safety
//!
//! A writer is owned by a single logical actor; it holds no internal
//! synchronization.

use prost::Message;
use tokio::fs::{DirBuilder, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use tidestore_core::{varint, Result};

use crate::config::BlockConfig;
use crate::schema::{IndexEntry, IndexInfo};

use super::{
    block_file_path, shard_dir_path, CHECKPOINT_FILE_SUFFIX, DATA_FILE_SUFFIX, IDX_LEN,
    INDEX_FILE_SUFFIX, INFO_FILE_SUFFIX, RECORD_MARKER,
};

/// Writes one block file set.
pub struct BlockWriter {
    /// Block time window, nanoseconds
    window: i64,

    config: BlockConfig,

    info_file: Option<File>,
    index_file: Option<File>,
    data_file: Option<File>,
    checkpoint_path: Option<std::path::PathBuf>,

    /// Block start, nanoseconds
    start: i64,

    /// Ordinal of the next record
    curr_idx: i64,

    /// Byte cursor into the data file
    curr_offset: i64,

    /// Scratch buffer for varint-prefixed index entries
    index_buf: Vec<u8>,

    /// Set after the first write error; the block is then invalid
    failed: bool,
}

impl BlockWriter {
    pub fn new(window: i64, config: BlockConfig) -> Self {
        Self {
            window,
            config,
            info_file: None,
            index_file: None,
            data_file: None,
            checkpoint_path: None,
            start: 0,
            curr_idx: 0,
            curr_offset: 0,
            index_buf: Vec::with_capacity(64),
            failed: false,
        }
    }

    /// Create the shard directory if needed and open the block's files for
    /// writing. Descriptors already opened are released if a later open
    /// fails.
    pub async fn open(&mut self, shard: u32, block_start: i64) -> Result<()> {
        let shard_dir = shard_dir_path(&self.config.root, shard);
        DirBuilder::new()
            .recursive(true)
            .mode(self.config.dir_mode)
            .create(&shard_dir)
            .await?;

        self.start = block_start;
        self.curr_idx = 0;
        self.curr_offset = 0;
        self.failed = false;
        self.checkpoint_path = Some(block_file_path(
            &shard_dir,
            block_start,
            CHECKPOINT_FILE_SUFFIX,
        ));

        for (suffix, slot) in [
            (INFO_FILE_SUFFIX, 0usize),
            (INDEX_FILE_SUFFIX, 1),
            (DATA_FILE_SUFFIX, 2),
        ] {
            let path = block_file_path(&shard_dir, block_start, suffix);
            match self.open_writable(&path).await {
                Ok(file) => match slot {
                    0 => self.info_file = Some(file),
                    1 => self.index_file = Some(file),
                    _ => self.data_file = Some(file),
                },
                Err(e) => {
                    self.release_files().await;
                    return Err(e);
                }
            }
        }

        info!(shard, block_start, "block writer opened");
        Ok(())
    }

    async fn open_writable(&self, path: &std::path::Path) -> Result<File> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(self.config.file_mode)
            .open(path)
            .await?;
        Ok(file)
    }

    /// Append one record. An empty payload is a no-op and does not advance
    /// the record ordinal.
    pub async fn write(&mut self, key: &str, payload: &[u8]) -> Result<()> {
        self.write_all(key, &[payload]).await
    }

    /// Append one record whose payload is the concatenation of `chunks`.
    pub async fn write_all(&mut self, key: &str, chunks: &[&[u8]]) -> Result<()> {
        let size: i64 = chunks.iter().map(|c| c.len() as i64).sum();
        if size == 0 {
            return Ok(());
        }

        let res = self.write_record(key, chunks, size).await;
        if res.is_err() {
            self.failed = true;
        }
        res
    }

    async fn write_record(&mut self, key: &str, chunks: &[&[u8]], size: i64) -> Result<()> {
        let entry = IndexEntry {
            idx: self.curr_idx,
            size,
            offset: self.curr_offset,
            key: key.to_string(),
        };
        let entry_bytes = entry.encode_to_vec();

        self.write_data(&RECORD_MARKER).await?;
        let idx_be: [u8; IDX_LEN] = (self.curr_idx as u64).to_be_bytes();
        self.write_data(&idx_be).await?;
        for chunk in chunks {
            self.write_data(chunk).await?;
        }

        self.index_buf.clear();
        varint::encode_u64(&mut self.index_buf, entry_bytes.len() as u64);
        self.index_buf.extend_from_slice(&entry_bytes);
        let index_file = self.index_file.as_mut().ok_or_else(not_open)?;
        index_file.write_all(&self.index_buf).await?;

        self.curr_idx += 1;
        Ok(())
    }

    async fn write_data(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let data_file = self.data_file.as_mut().ok_or_else(not_open)?;
        data_file.write_all(data).await?;
        self.curr_offset += data.len() as i64;
        Ok(())
    }

    /// Number of records written so far.
    pub fn entries(&self) -> i64 {
        self.curr_idx
    }

    /// Finalize the block: info header, ordered file closes, checkpoint.
    /// After a failed write this only releases descriptors, leaving the
    /// block without a checkpoint.
    pub async fn close(&mut self) -> Result<()> {
        if self.info_file.is_none() {
            return Ok(());
        }

        if self.failed {
            warn!(
                entries = self.curr_idx,
                "closing failed block writer without checkpoint"
            );
            self.release_files().await;
            return Ok(());
        }

        let info_file = self.info_file.as_mut().ok_or_else(not_open)?;
        info_file.set_len(0).await?;
        let info = IndexInfo {
            start: self.start,
            window: self.window,
            entries: self.curr_idx,
        };
        info_file.write_all(&info.encode_to_vec()).await?;

        // Close in order: info, index, data. Only then the checkpoint.
        for file in [
            self.info_file.take(),
            self.index_file.take(),
            self.data_file.take(),
        ]
        .into_iter()
        .flatten()
        {
            let mut file = file;
            file.flush().await?;
        }

        if let Some(path) = &self.checkpoint_path {
            let checkpoint = self.open_writable(path).await?;
            drop(checkpoint);
        }

        info!(
            start = self.start,
            entries = self.curr_idx,
            "block finalized"
        );
        Ok(())
    }

    async fn release_files(&mut self) {
        for file in [
            self.info_file.take(),
            self.index_file.take(),
            self.data_file.take(),
        ]
        .into_iter()
        .flatten()
        {
            let mut file = file;
            let _ = file.flush().await;
        }
    }
}

fn not_open() -> tidestore_core::Error {
    std::io::Error::new(std::io::ErrorKind::NotConnected, "block writer is not open").into()
}
