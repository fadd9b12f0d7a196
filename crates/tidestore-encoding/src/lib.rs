//! TideStore Value Encoding
//!
//! Bit-level compression for time-series values, in three layers:
//!
//! 1. **TSZ primitives** ([`tsz`]) - Gorilla-style float XOR blocks,
//!    delta-of-delta timestamps, and the integer significant-bits tracker,
//!    plus a standalone datapoint codec built from them.
//! 2. **Custom field state** ([`fields`]) - per-field state machines used
//!    when individual protobuf fields are compressed out-of-band,
//!    including the LRU byte dictionary.
//! 3. **Proto-diff codec** ([`proto`]) - differential framing for streams
//!    of schema-identical dynamic protobuf messages.
//!
//! All encoders and iterators are single-owner; none are thread-safe.

pub mod fields;
pub mod proto;
pub mod tsz;

pub use proto::{ProtoEncoder, ProtoIterator};
pub use tsz::{TszEncoder, TszIterator};
