//! Datapoint Structure
//!
//! This module defines the core `DataPoint` type - a single sample in a
//! time series.
//!
//! ## Structure
//! Each datapoint contains:
//! - **timestamp**: nanoseconds since epoch
//! - **value**: the sampled value as an IEEE-754 double
//!
//! ## Design Decisions
//! - Timestamps are `i64` nanoseconds to match the block time windows
//! - Implements `Serialize`/`Deserialize` for metadata and test fixtures
//! - `Copy` because a datapoint is two machine words

use serde::{Deserialize, Serialize};

/// A single sample in a time series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Timestamp in nanoseconds since epoch
    pub timestamp: i64,

    /// Sampled value
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new() {
        let dp = DataPoint::new(1_700_000_000_000_000_000, 42.5);
        assert_eq!(dp.timestamp, 1_700_000_000_000_000_000);
        assert_eq!(dp.value, 42.5);
    }

    #[test]
    fn test_negative_timestamp() {
        let dp = DataPoint::new(-1, f64::MIN);
        assert_eq!(dp.timestamp, -1);
        assert_eq!(dp.value, f64::MIN);
    }

    #[test]
    fn test_serde_roundtrip() {
        let dp = DataPoint::new(1_000, 3.25);
        let json = serde_json::to_string(&dp).expect("serialize");
        let back: DataPoint = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(dp, back);
    }
}
