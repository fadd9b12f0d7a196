//! Custom Field State
//!
//! Per-field state machines for the custom (out-of-band) encodings used by
//! the proto-diff codec. A custom field bypasses standard protobuf wire
//! bytes entirely: floats go through the XOR path, integers through the
//! significant-bits delta path, and byte/string values through an LRU
//! dictionary that allows repeated values to be referenced by index.
//!
//! The dictionary semantics are load-bearing for stream compatibility:
//! insertion is at the tail, a hit is promoted to the tail by successive
//! adjacent swaps, and eviction shifts the whole dictionary left, dropping
//! index 0. Encoder and decoder replay the identical moves so both sides
//! hold bytewise-equal dictionaries after every record.

use bytes::Bytes;
use prost_reflect::{FieldDescriptor, Kind, MessageDescriptor};
use tidestore_core::{Error, Result};

use crate::tsz::{IntSigTracker, XorState};

/// Absolute ceiling on the custom field numbers a stream header may
/// declare.
pub const MAX_CUSTOM_FIELD_NUMBER: u64 = 10_000;

/// Width of a field-type tag in the stream header.
pub const FIELD_TYPE_TAG_BITS: usize = 3;

/// Wire tags for the custom encodings. `NotCustom` marks fields that are
/// carried in the standard protobuf diff instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    NotCustom = 0,
    SignedInt64 = 1,
    SignedInt32 = 2,
    UnsignedInt64 = 3,
    UnsignedInt32 = 4,
    Float64 = 5,
    Float32 = 6,
    Bytes = 7,
}

impl FieldType {
    pub fn from_tag(tag: u64) -> Result<FieldType> {
        match tag {
            0 => Ok(FieldType::NotCustom),
            1 => Ok(FieldType::SignedInt64),
            2 => Ok(FieldType::SignedInt32),
            3 => Ok(FieldType::UnsignedInt64),
            4 => Ok(FieldType::UnsignedInt32),
            5 => Ok(FieldType::Float64),
            6 => Ok(FieldType::Float32),
            7 => Ok(FieldType::Bytes),
            other => Err(Error::UnknownFieldType(other)),
        }
    }

    pub fn tag(self) -> u64 {
        self as u64
    }

    pub fn is_float(self) -> bool {
        matches!(self, FieldType::Float64 | FieldType::Float32)
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            FieldType::SignedInt64
                | FieldType::SignedInt32
                | FieldType::UnsignedInt64
                | FieldType::UnsignedInt32
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, FieldType::UnsignedInt64 | FieldType::UnsignedInt32)
    }
}

/// Map a protobuf field to its custom encoding, if any. Repeated and map
/// fields always ride in the standard proto diff.
pub fn field_type_of(field: &FieldDescriptor) -> FieldType {
    if field.is_list() || field.is_map() {
        return FieldType::NotCustom;
    }
    match field.kind() {
        Kind::Double => FieldType::Float64,
        Kind::Float => FieldType::Float32,
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => FieldType::SignedInt64,
        Kind::Uint64 | Kind::Fixed64 => FieldType::UnsignedInt64,
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => FieldType::SignedInt32,
        Kind::Uint32 | Kind::Fixed32 => FieldType::UnsignedInt32,
        Kind::Bytes | Kind::String => FieldType::Bytes,
        _ => FieldType::NotCustom,
    }
}

/// State for one custom-encoded field. The variant carries only the
/// members that encoding needs.
#[derive(Debug, Clone)]
pub enum FieldState {
    Float(XorState),
    Int(IntState),
    Bytes(BytesDict),
}

/// Predictor state for integer fields: the previous value widened into 64
/// bits plus the current significant-bit width.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntState {
    pub prev_bits: u64,
    pub sig: IntSigTracker,
}

impl IntState {
    /// Sign and magnitude of the step from the previous value to
    /// `cur_bits`. Unsigned types diff in the u64 domain, signed types in
    /// the i64 domain; both wrap.
    pub fn diff_to(&self, field_type: FieldType, cur_bits: u64) -> (bool, u64) {
        if field_type.is_unsigned() {
            if cur_bits >= self.prev_bits {
                (false, cur_bits - self.prev_bits)
            } else {
                (true, self.prev_bits - cur_bits)
            }
        } else {
            let diff = (cur_bits as i64).wrapping_sub(self.prev_bits as i64);
            (diff < 0, diff.unsigned_abs())
        }
    }

    /// Apply a decoded diff to the previous value and return the new bits.
    pub fn apply(&mut self, field_type: FieldType, magnitude: u64, negative: bool) -> u64 {
        let next = if field_type.is_unsigned() {
            if negative {
                self.prev_bits.wrapping_sub(magnitude)
            } else {
                self.prev_bits.wrapping_add(magnitude)
            }
        } else {
            let diff = magnitude as i64;
            let diff = if negative { diff.wrapping_neg() } else { diff };
            (self.prev_bits as i64).wrapping_add(diff) as u64
        };
        self.prev_bits = next;
        next
    }
}

/// The per-field LRU dictionary of recent byte values, most recently used
/// last.
#[derive(Debug, Clone, Default)]
pub struct BytesDict {
    entries: Vec<Bytes>,
}

impl BytesDict {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most recently used value.
    pub fn tail(&self) -> Option<&Bytes> {
        self.entries.last()
    }

    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.entries.get(index)
    }

    pub fn position(&self, value: &[u8]) -> Option<usize> {
        self.entries.iter().position(|e| e.as_ref() == value)
    }

    /// Promote the entry at `index` to the MRU (tail) position by swapping
    /// it with each successor in turn.
    pub fn promote(&mut self, index: usize) {
        for j in index..self.entries.len() {
            let next = j + 1;
            if next >= self.entries.len() {
                break;
            }
            self.entries.swap(j, next);
        }
    }

    /// Append a new value at the tail. When the dictionary is at
    /// `lru_size`, every entry shifts left one slot first, evicting the
    /// least recently used entry at index 0.
    pub fn push(&mut self, value: Bytes, lru_size: usize) {
        if self.entries.len() < lru_size {
            self.entries.push(value);
            return;
        }

        for i in 0..self.entries.len() {
            let next = i + 1;
            if next >= self.entries.len() {
                break;
            }
            self.entries[i] = self.entries[next].clone();
        }

        if let Some(last) = self.entries.last_mut() {
            *last = value;
        }
    }

    pub fn entries(&self) -> &[Bytes] {
        &self.entries
    }
}

/// Per-field, per-stream custom encoding state.
#[derive(Debug, Clone)]
pub struct CustomFieldState {
    pub field_num: u32,
    pub field_type: FieldType,
    pub state: FieldState,
}

impl CustomFieldState {
    pub fn new(field_num: u32, field_type: FieldType) -> Self {
        let state = if field_type.is_float() {
            FieldState::Float(XorState::default())
        } else if field_type.is_int() {
            FieldState::Int(IntState::default())
        } else {
            FieldState::Bytes(BytesDict::default())
        };
        Self {
            field_num,
            field_type,
            state,
        }
    }
}

/// Build the custom field states for a schema, ascending by field number.
pub fn custom_fields(schema: &MessageDescriptor) -> Vec<CustomFieldState> {
    let mut fields: Vec<CustomFieldState> = schema
        .fields()
        .filter_map(|f| {
            let ft = field_type_of(&f);
            if ft == FieldType::NotCustom {
                None
            } else {
                Some(CustomFieldState::new(f.number(), ft))
            }
        })
        .collect();
    fields.sort_by_key(|f| f.field_num);
    fields
}

/// Number of bits needed to address a dictionary of `lru_size` entries.
pub fn num_bits_for_dict_index(lru_size: usize) -> usize {
    if lru_size <= 1 {
        return 0;
    }
    (usize::BITS - (lru_size - 1).leading_zeros()) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict_of(values: &[&str]) -> BytesDict {
        let mut d = BytesDict::default();
        for v in values {
            d.push(Bytes::copy_from_slice(v.as_bytes()), usize::MAX);
        }
        d
    }

    fn entries_of(d: &BytesDict) -> Vec<&str> {
        d.entries()
            .iter()
            .map(|b| std::str::from_utf8(b).unwrap())
            .collect()
    }

    // ---------------------------------------------------------------
    // Field type tags
    // ---------------------------------------------------------------

    #[test]
    fn test_tag_roundtrip_all_variants() {
        for tag in 0..8u64 {
            let ft = FieldType::from_tag(tag).unwrap();
            assert_eq!(ft.tag(), tag);
        }
    }

    #[test]
    fn test_tag_out_of_range() {
        assert!(matches!(
            FieldType::from_tag(8),
            Err(Error::UnknownFieldType(8))
        ));
    }

    #[test]
    fn test_type_predicates() {
        assert!(FieldType::Float32.is_float());
        assert!(FieldType::Float64.is_float());
        assert!(FieldType::SignedInt32.is_int());
        assert!(FieldType::UnsignedInt64.is_int());
        assert!(FieldType::UnsignedInt64.is_unsigned());
        assert!(!FieldType::SignedInt64.is_unsigned());
        assert!(!FieldType::Bytes.is_int());
        assert!(!FieldType::Bytes.is_float());
    }

    // ---------------------------------------------------------------
    // Dictionary promotion
    // ---------------------------------------------------------------

    #[test]
    fn test_promote_head_to_tail() {
        let mut d = dict_of(&["a", "b", "c"]);
        d.promote(0);
        assert_eq!(entries_of(&d), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_promote_middle() {
        let mut d = dict_of(&["a", "b", "c"]);
        d.promote(1);
        assert_eq!(entries_of(&d), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_promote_tail_is_noop() {
        let mut d = dict_of(&["a", "b", "c"]);
        d.promote(2);
        assert_eq!(entries_of(&d), vec!["a", "b", "c"]);
    }

    // ---------------------------------------------------------------
    // Dictionary insertion and eviction
    // ---------------------------------------------------------------

    #[test]
    fn test_push_below_capacity() {
        let mut d = BytesDict::default();
        d.push(Bytes::from_static(b"a"), 3);
        d.push(Bytes::from_static(b"b"), 3);
        assert_eq!(entries_of(&d), vec!["a", "b"]);
        assert_eq!(d.tail().unwrap().as_ref(), b"b");
    }

    #[test]
    fn test_push_evicts_lru() {
        let mut d = dict_of(&["a", "b", "c"]);
        d.push(Bytes::from_static(b"d"), 3);
        assert_eq!(entries_of(&d), vec!["b", "c", "d"]);
    }

    #[test]
    fn test_position() {
        let d = dict_of(&["a", "b", "c"]);
        assert_eq!(d.position(b"a"), Some(0));
        assert_eq!(d.position(b"c"), Some(2));
        assert_eq!(d.position(b"z"), None);
    }

    // ---------------------------------------------------------------
    // Integer diffs
    // ---------------------------------------------------------------

    #[test]
    fn test_int_diff_signed_roundtrip() {
        let values: [i64; 7] = [0, 5, -5, i64::MAX, i64::MIN, -1, 1];
        let mut enc = IntState::default();
        let mut dec = IntState::default();
        for &v in &values {
            let bits = v as u64;
            let (neg, mag) = enc.diff_to(FieldType::SignedInt64, bits);
            enc.prev_bits = bits;
            assert_eq!(dec.apply(FieldType::SignedInt64, mag, neg), bits);
        }
    }

    #[test]
    fn test_int_diff_unsigned_wraparound() {
        let values: [u64; 5] = [0, u64::MAX, 1, u64::MAX - 1, 0];
        let mut enc = IntState::default();
        let mut dec = IntState::default();
        for &v in &values {
            let (neg, mag) = enc.diff_to(FieldType::UnsignedInt64, v);
            enc.prev_bits = v;
            assert_eq!(dec.apply(FieldType::UnsignedInt64, mag, neg), v);
        }
    }

    #[test]
    fn test_int_diff_signed_32_sign_extended() {
        let values: [i32; 4] = [0, -1, i32::MIN, i32::MAX];
        let mut enc = IntState::default();
        let mut dec = IntState::default();
        for &v in &values {
            let bits = v as i64 as u64;
            let (neg, mag) = enc.diff_to(FieldType::SignedInt32, bits);
            enc.prev_bits = bits;
            let out = dec.apply(FieldType::SignedInt32, mag, neg);
            assert_eq!(out as i64 as i32, v);
        }
    }

    // ---------------------------------------------------------------
    // Index width
    // ---------------------------------------------------------------

    #[test]
    fn test_num_bits_for_dict_index() {
        assert_eq!(num_bits_for_dict_index(0), 0);
        assert_eq!(num_bits_for_dict_index(1), 0);
        assert_eq!(num_bits_for_dict_index(2), 1);
        assert_eq!(num_bits_for_dict_index(3), 2);
        assert_eq!(num_bits_for_dict_index(4), 2);
        assert_eq!(num_bits_for_dict_index(5), 3);
        assert_eq!(num_bits_for_dict_index(8), 3);
        assert_eq!(num_bits_for_dict_index(9), 4);
    }
}
