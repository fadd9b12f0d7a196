//! Differential proto stream encoder.

use bytes::Bytes;
use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor, Value};
use tidestore_core::{Error, OStream, Result};

use crate::fields::{
    custom_fields, num_bits_for_dict_index, BytesDict, CustomFieldState, FieldState, FieldType,
    IntState, FIELD_TYPE_TAG_BITS,
};
use crate::tsz::{num_sig, TimestampEncoder};

use super::{set_field_err, DEFAULT_DICT_LRU_SIZE, ENCODING_VERSION, MAX_MARSHALED_MESSAGE_SIZE};

/// Streaming encoder for timestamped dynamic protobuf messages.
///
/// Every message must use the schema supplied at construction; changing
/// schemas mid-stream is not supported.
#[derive(Debug)]
pub struct ProtoEncoder {
    schema: MessageDescriptor,
    stream: OStream,
    timestamps: TimestampEncoder,
    custom_fields: Vec<CustomFieldState>,
    last_encoded: DynamicMessage,
    dict_lru_size: usize,
    header_written: bool,
    wrote_first: bool,
}

impl ProtoEncoder {
    pub fn new(schema: MessageDescriptor) -> Self {
        Self::with_dict_lru_size(schema, DEFAULT_DICT_LRU_SIZE)
    }

    pub fn with_dict_lru_size(schema: MessageDescriptor, dict_lru_size: usize) -> Self {
        let custom = custom_fields(&schema);
        let last_encoded = DynamicMessage::new(schema.clone());
        Self {
            schema,
            stream: OStream::new(),
            timestamps: TimestampEncoder::new(),
            custom_fields: custom,
            last_encoded,
            dict_lru_size,
            header_written: false,
            wrote_first: false,
        }
    }

    /// Append one record to the stream.
    pub fn encode(&mut self, timestamp: i64, msg: &DynamicMessage) -> Result<()> {
        if !self.header_written {
            self.write_header();
            self.header_written = true;
        }

        self.stream.write_bit(1);

        if !self.wrote_first {
            self.timestamps.write_first(&mut self.stream, timestamp);
        } else {
            self.timestamps.write_next(&mut self.stream, timestamp);
        }

        self.write_custom_values(msg)?;
        self.write_proto_values(msg)?;

        self.last_encoded = msg.clone();
        self.wrote_first = true;
        Ok(())
    }

    /// Number of whole bytes in the underlying stream.
    pub fn len(&self) -> usize {
        self.stream.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.wrote_first
    }

    /// Dictionary contents for a custom bytes field, for coherence checks.
    pub fn bytes_dict(&self, field_num: u32) -> Option<&[Bytes]> {
        self.custom_fields
            .iter()
            .find(|cf| cf.field_num == field_num)
            .and_then(|cf| match &cf.state {
                FieldState::Bytes(dict) => Some(dict.entries()),
                _ => None,
            })
    }

    /// Terminate the stream and return the encoded bytes.
    pub fn finish(mut self) -> Bytes {
        if self.header_written {
            self.stream.write_bit(0);
        }
        self.stream.into_bytes()
    }

    fn write_header(&mut self) {
        self.stream.write_varint(ENCODING_VERSION);
        self.stream.write_varint(self.dict_lru_size as u64);

        let max_field = self
            .custom_fields
            .iter()
            .map(|cf| cf.field_num)
            .max()
            .unwrap_or(0);
        self.stream.write_varint(max_field as u64);

        for num in 1..=max_field {
            let tag = self
                .custom_fields
                .iter()
                .find(|cf| cf.field_num == num)
                .map(|cf| cf.field_type.tag())
                .unwrap_or(FieldType::NotCustom.tag());
            self.stream.write_bits(tag, FIELD_TYPE_TAG_BITS);
        }
    }

    fn write_custom_values(&mut self, msg: &DynamicMessage) -> Result<()> {
        let first = !self.wrote_first;
        let stream = &mut self.stream;
        let dict_lru_size = self.dict_lru_size;

        for cf in self.custom_fields.iter_mut() {
            let value = msg
                .get_field_by_number(cf.field_num)
                .map(|v| v.into_owned())
                .ok_or_else(|| {
                    Error::Proto(prost::DecodeError::new(format!(
                        "message has no field number {}",
                        cf.field_num
                    )))
                })?;

            match &mut cf.state {
                FieldState::Float(xor) => {
                    let bits = float_bits(&value, cf.field_type)?;
                    if first {
                        xor.write_first(stream, bits);
                    } else {
                        xor.write_next(stream, bits);
                    }
                }
                FieldState::Int(state) => {
                    let bits = int_bits(&value, cf.field_type)?;
                    write_int_value(stream, state, cf.field_type, bits, first);
                }
                FieldState::Bytes(dict) => {
                    let bytes = bytes_of(&value)?;
                    write_bytes_value(stream, dict, dict_lru_size, bytes);
                }
            }
        }

        Ok(())
    }

    fn write_proto_values(&mut self, msg: &DynamicMessage) -> Result<()> {
        let mut changes = DynamicMessage::new(self.schema.clone());
        let mut cleared: Vec<u32> = Vec::new();
        let mut any_change = false;

        for field in self.schema.fields() {
            if self
                .custom_fields
                .iter()
                .any(|cf| cf.field_num == field.number())
            {
                continue;
            }

            let cur = msg.get_field(&field).into_owned();
            let prev = self.last_encoded.get_field(&field).into_owned();
            if cur == prev {
                continue;
            }

            any_change = true;
            if cur == Value::default_value_for_field(&field) {
                // Changed back to the default: handled by the clear bitset,
                // a default value never survives marshaling.
                cleared.push(field.number());
            } else {
                changes.try_set_field(&field, cur).map_err(set_field_err)?;
            }
        }

        if !any_change {
            self.stream.write_bit(0);
            return Ok(());
        }
        self.stream.write_bit(1);

        if cleared.is_empty() {
            self.stream.write_bit(0);
        } else {
            self.stream.write_bit(1);
            self.write_bitset(&cleared);
        }

        let marshaled = changes.encode_to_vec();
        if marshaled.len() as u64 > MAX_MARSHALED_MESSAGE_SIZE {
            return Err(Error::Oversized {
                size: marshaled.len() as u64,
                limit: MAX_MARSHALED_MESSAGE_SIZE,
            });
        }

        self.stream.write_varint(marshaled.len() as u64);
        self.stream.pad_to_next_byte();
        self.stream.write_bytes(&marshaled);
        Ok(())
    }

    // The bitset length is the highest cleared field number; bit i (from 0)
    // stands for field number i+1.
    fn write_bitset(&mut self, cleared: &[u32]) {
        let max = cleared.iter().copied().max().unwrap_or(0);
        self.stream.write_varint(max as u64);
        for num in 1..=max {
            self.stream.write_bit(cleared.contains(&num) as u8);
        }
    }
}

fn float_bits(value: &Value, field_type: FieldType) -> Result<u64> {
    match (value, field_type) {
        (Value::F64(v), FieldType::Float64) => Ok(v.to_bits()),
        (Value::F32(v), FieldType::Float32) => Ok((*v as f64).to_bits()),
        _ => Err(type_mismatch(field_type)),
    }
}

fn int_bits(value: &Value, field_type: FieldType) -> Result<u64> {
    match (value, field_type) {
        (Value::I64(v), FieldType::SignedInt64) => Ok(*v as u64),
        (Value::I32(v), FieldType::SignedInt32) => Ok(*v as i64 as u64),
        (Value::U64(v), FieldType::UnsignedInt64) => Ok(*v),
        (Value::U32(v), FieldType::UnsignedInt32) => Ok(*v as u64),
        _ => Err(type_mismatch(field_type)),
    }
}

fn bytes_of(value: &Value) -> Result<Bytes> {
    match value {
        Value::Bytes(b) => Ok(b.clone()),
        Value::String(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
        _ => Err(type_mismatch(FieldType::Bytes)),
    }
}

fn type_mismatch(field_type: FieldType) -> Error {
    Error::Proto(prost::DecodeError::new(format!(
        "field value does not match custom field type {:?}",
        field_type
    )))
}

fn write_int_value(
    stream: &mut OStream,
    state: &mut IntState,
    field_type: FieldType,
    cur_bits: u64,
    first: bool,
) {
    if !first {
        if cur_bits == state.prev_bits {
            stream.write_bit(0);
            return;
        }
        stream.write_bit(1);
    }

    let (negative, magnitude) = state.diff_to(field_type, cur_bits);
    let sig = num_sig(magnitude);
    state.sig.write_sig(stream, sig);
    state.sig.write_diff(stream, magnitude, negative);
    state.prev_bits = cur_bits;
}

fn write_bytes_value(stream: &mut OStream, dict: &mut BytesDict, lru_size: usize, cur: Bytes) {
    if dict.tail().map(|t| t.as_ref() == cur.as_ref()).unwrap_or(false) {
        stream.write_bit(0);
        return;
    }
    stream.write_bit(1);

    if let Some(index) = dict.position(&cur) {
        stream.write_bit(1);
        stream.write_bits(index as u64, num_bits_for_dict_index(lru_size));
        dict.promote(index);
        return;
    }

    stream.write_bit(0);
    stream.write_varint(cur.len() as u64);
    stream.pad_to_next_byte();
    stream.write_bytes(&cur);
    dict.push(cur, lru_size);
}
