//! Error Types for TideStore
//!
//! This module defines all error types that can occur across the codec and
//! block-file layers.
//!
//! ## Error Categories
//!
//! ### I/O Errors
//! - File system operations on the block file set
//!
//! ### Stream Errors
//! - `EndOfStream`: the bit stream ran out of bytes mid-read
//! - `Oversized`: a varint-declared length exceeds its configured ceiling
//!
//! ### Block Framing Errors
//! - `ZeroSizeIndexEntry`: the varint at the index cursor consumed zero bytes
//! - `ShortRead`: the data file returned fewer bytes than the index declared
//! - `MarkerNotFound`: a data record did not begin with the record marker
//! - `WrongIdx`: the framed record ordinal disagreed with the index entry
//!
//! ### Proto Stream Errors
//! - `DictOutOfRange`: a decoded dictionary index was past the end
//! - `SchemaRequired`: an iterator was advanced without a schema set
//! - `UnknownFieldType`: a field-type tag outside the recognized set
//! - `UnsupportedVersion`: the stream was written by an unknown codec version
//! - `Proto`: protobuf decode failure
//!
//! All functions return `Result<T>` aliased to `Result<T, Error>` so `?`
//! propagation works throughout. Errors are terminal for the in-flight
//! operation: there are no internal retries, and a reader or iterator that
//! has reported an error must be closed and discarded.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of stream")]
    EndOfStream,

    #[error("next index entry is encoded as zero size")]
    ZeroSizeIndexEntry,

    #[error("next read not expected size")]
    ShortRead,

    #[error("expected marker not found")]
    MarkerNotFound,

    #[error("expected idx {expected} but found idx {actual}")]
    WrongIdx { expected: i64, actual: i64 },

    #[error("length {size} exceeds maximum {limit}")]
    Oversized { size: u64, limit: u64 },

    #[error("bytes dictionary index {index} out of range for dictionary of size {len}")]
    DictOutOfRange { index: usize, len: usize },

    #[error("schema is required")]
    SchemaRequired,

    #[error("unknown custom field type: {0}")]
    UnknownFieldType(u64),

    #[error("unsupported encoding version: {0}")]
    UnsupportedVersion(u64),

    #[error("protobuf error: {0}")]
    Proto(#[from] prost::DecodeError),
}

pub type Result<T> = std::result::Result<T, Error>;
