//! Differential Protobuf Stream Codec
//!
//! This module frames a stream of schema-identical dynamic protobuf
//! messages, one timestamped record per message.
//!
//! ## Stream Layout
//!
//! ```text
//! Header (once):
//! ┌─────────────────┬────────────────────┬──────────────────────┬─────────────────┐
//! │ version varint  │ dict LRU size L    │ max custom field N   │ N x 3-bit tags  │
//! └─────────────────┴────────────────────┴──────────────────────┴─────────────────┘
//!
//! Per record:
//! ┌───────────────┬───────────┬─────────────────┬──────────────────────────────┐
//! │ more-data bit │ timestamp │ custom fields   │ proto diff (see below)       │
//! └───────────────┴───────────┴─────────────────┴──────────────────────────────┘
//!
//! Proto diff:
//! ┌─────────────┬──────────────┬──────────────────┬─────────────┬─────┬───────┐
//! │ changes bit │ defaults bit │ [clear bitset]   │ len varint  │ pad │ bytes │
//! └─────────────┴──────────────┴──────────────────┴─────────────┴─────┴───────┘
//! ```
//!
//! Fields whose types support it (floats, integers, bytes/strings) are
//! "custom" encoded bit-by-bit ahead of the diff; everything else (bools,
//! enums, nested messages, repeated fields, maps) travels as an ordinary
//! protobuf-encoded message containing only the fields that changed to a
//! non-default value, plus a bitset naming fields that changed *to* their
//! default and must be cleared.
//!
//! A zero more-data bit terminates the stream.
//!
//! ## Ownership
//!
//! Encoder and iterator are single-owner and not thread-safe. The iterator
//! embeds a timestamp reader that advances the iterator's own stream; the
//! stream is passed down by reference, never cloned into the child.

mod encoder;
mod iterator;

pub use encoder::ProtoEncoder;
pub use iterator::ProtoIterator;

use prost_reflect::SetFieldError;
use tidestore_core::Error;

/// Current stream encoding version. Streams declaring any other version
/// are rejected.
pub const ENCODING_VERSION: u64 = 1;

/// Default capacity of the per-field byte dictionary.
pub const DEFAULT_DICT_LRU_SIZE: usize = 4;

/// Ceiling on a single marshaled diff message.
pub const MAX_MARSHALED_MESSAGE_SIZE: u64 = 1 << 24;

/// Ceiling on the clear bitset, in bits.
pub const MAX_BITSET_LENGTH_BITS: u64 = 1 << 16;

/// Unmarshal scratch buffers larger than this are not retained across
/// resets.
const MAX_UNMARSHAL_BUF_RETAIN: usize = 1024;

fn set_field_err(err: SetFieldError) -> Error {
    Error::Proto(prost::DecodeError::new(err.to_string()))
}
