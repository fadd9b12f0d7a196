//! TideStore Core Types
//!
//! Shared primitives for the TideStore storage engine: the datapoint type,
//! the crate-wide error enum, LEB128 varints, and the bit-oriented streams
//! the value codecs are built on.

pub mod bitstream;
pub mod datapoint;
pub mod error;
pub mod varint;

pub use bitstream::{IStream, OStream};
pub use datapoint::DataPoint;
pub use error::{Error, Result};
