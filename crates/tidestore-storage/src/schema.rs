//! Block File Wire Schema
//!
//! The info header and index entries are ordinary protobuf messages so the
//! on-disk format stays self-describing and schema-evolvable. The messages
//! are small enough that they are derived here directly instead of going
//! through a build-time protoc run.

use prost::Message;

/// The single header record stored in a block's info file.
#[derive(Clone, PartialEq, Message)]
pub struct IndexInfo {
    /// Block start, nanoseconds since epoch
    #[prost(int64, tag = "1")]
    pub start: i64,

    /// Block time window, nanoseconds
    #[prost(int64, tag = "2")]
    pub window: i64,

    /// Number of entries in the block
    #[prost(int64, tag = "3")]
    pub entries: i64,
}

/// One entry in a block's index file.
#[derive(Clone, PartialEq, Message)]
pub struct IndexEntry {
    /// Ordinal of the record, starting at zero
    #[prost(int64, tag = "1")]
    pub idx: i64,

    /// Payload length in bytes
    #[prost(int64, tag = "2")]
    pub size: i64,

    /// Byte offset of the record frame in the data file
    #[prost(int64, tag = "3")]
    pub offset: i64,

    /// Series key
    #[prost(string, tag = "4")]
    pub key: ::prost::alloc::string::String,
}
