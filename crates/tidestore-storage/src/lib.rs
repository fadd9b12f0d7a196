//! TideStore Storage Layer
//!
//! This crate persists batches of `(key, payload)` entries as block file
//! sets - the on-disk unit of one shard's data for one time window.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────┐
//! │ Encoder pipeline │  (tidestore-encoding, or any payload producer)
//! └────────┬─────────┘
//!          │ opaque payload bytes
//!          ▼
//! ┌──────────────────┐
//! │   BlockWriter    │  info + index + data, checkpoint on close
//! └────────┬─────────┘
//!          │ <root>/<shard>/<block_id>.{info,index,data,checkpoint}
//!          ▼
//! ┌──────────────────┐
//! │   BlockReader    │  marker/idx-verified reads in append order
//! └──────────────────┘
//! ```
//!
//! The catalog layer above this crate supplies `(shard, block_start)` on
//! the write path and `(shard, version)` on the read path, and uses
//! [`block::checkpoint_exists`] to decide which blocks are visible.
//!
//! ## Main Components
//!
//! ### BlockWriter
//! Appends framed records to the data file and varint-prefixed entries to
//! the index file, then finalizes with the info header and the checkpoint
//! sentinel. A crash at any earlier point leaves no checkpoint, so partial
//! blocks are detected by their absence.
//!
//! ### BlockReader
//! Decodes the info header, slurps the index, and streams entries back in
//! write order, validating the record marker and ordinal on every read.

pub mod block;
pub mod config;
pub mod schema;

pub use block::{checkpoint_exists, BlockReader, BlockWriter, TimeRange};
pub use config::BlockConfig;
pub use schema::{IndexEntry, IndexInfo};
pub use tidestore_core::{Error, Result};
