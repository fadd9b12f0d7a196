//! Differential proto stream decoder.

use bytes::Bytes;
use prost::Message;
use prost_reflect::{DynamicMessage, Kind, MessageDescriptor, Value};
use tidestore_core::{Error, IStream, Result};

use crate::fields::{
    custom_fields, num_bits_for_dict_index, BytesDict, CustomFieldState, FieldState, FieldType,
    FIELD_TYPE_TAG_BITS, MAX_CUSTOM_FIELD_NUMBER,
};
use crate::tsz::TimestampIterator;

use super::{
    set_field_err, ENCODING_VERSION, MAX_BITSET_LENGTH_BITS, MAX_MARSHALED_MESSAGE_SIZE,
    MAX_UNMARSHAL_BUF_RETAIN,
};

/// Streaming decoder for a stream produced by
/// [`ProtoEncoder`](super::ProtoEncoder).
///
/// The iterator maintains a cumulative `last_message`; each record applies
/// custom-field updates and the marshaled diff on top of it. Output order
/// mirrors record order. An iterator that has returned an error is done and
/// must be discarded (or [`reset`](Self::reset) with fresh data).
#[derive(Debug)]
pub struct ProtoIterator {
    schema: Option<MessageDescriptor>,
    stream: IStream,
    timestamps: TimestampIterator,
    custom_fields: Vec<CustomFieldState>,
    last_message: Option<DynamicMessage>,
    last_annotation: Vec<u8>,
    dict_lru_size: usize,
    bitset_values: Vec<u32>,
    unmarshal_buf: Vec<u8>,
    consumed_first: bool,
    done: bool,
}

impl ProtoIterator {
    /// Create an iterator without a schema. Advancing before
    /// [`set_schema`](Self::set_schema) fails with `SchemaRequired`.
    pub fn new(data: Bytes) -> Self {
        Self {
            schema: None,
            stream: IStream::new(data),
            timestamps: TimestampIterator::new(),
            custom_fields: Vec::new(),
            last_message: None,
            last_annotation: Vec::new(),
            dict_lru_size: 0,
            bitset_values: Vec::new(),
            unmarshal_buf: Vec::new(),
            consumed_first: false,
            done: false,
        }
    }

    pub fn with_schema(data: Bytes, schema: MessageDescriptor) -> Self {
        let mut it = Self::new(data);
        it.set_schema(schema);
        it
    }

    pub fn set_schema(&mut self, schema: MessageDescriptor) {
        self.custom_fields = custom_fields(&schema);
        self.last_message = Some(DynamicMessage::new(schema.clone()));
        self.schema = Some(schema);
    }

    /// Advance to the next record. Returns the record's timestamp and the
    /// marshaled cumulative message, or `None` once the stream terminates.
    pub fn try_next(&mut self) -> Result<Option<(i64, Bytes)>> {
        if self.done {
            return Ok(None);
        }
        let schema = self.schema.clone().ok_or(Error::SchemaRequired)?;

        match self.advance(&schema) {
            Ok(Some(timestamp)) => Ok(Some((
                timestamp,
                Bytes::copy_from_slice(&self.last_annotation),
            ))),
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    /// The cumulative message as of the most recent record.
    pub fn last_message(&self) -> Option<&DynamicMessage> {
        self.last_message.as_ref()
    }

    /// Marshaled form of [`last_message`](Self::last_message).
    pub fn annotation(&self) -> &[u8] {
        &self.last_annotation
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

    /// Start over on a new stream, recycling internal buffers. The
    /// unmarshal scratch buffer is dropped if it has grown past the
    /// retention threshold.
    pub fn reset(&mut self, data: Bytes) {
        self.stream.reset(data);
        self.timestamps = TimestampIterator::new();
        self.custom_fields = self
            .schema
            .as_ref()
            .map(custom_fields)
            .unwrap_or_default();
        self.last_message = self.schema.clone().map(DynamicMessage::new);
        self.last_annotation.clear();
        self.dict_lru_size = 0;
        self.bitset_values.clear();
        self.consumed_first = false;
        self.done = false;
        if self.unmarshal_buf.capacity() > MAX_UNMARSHAL_BUF_RETAIN {
            self.unmarshal_buf = Vec::new();
        } else {
            self.unmarshal_buf.clear();
        }
    }

    fn advance(&mut self, schema: &MessageDescriptor) -> Result<Option<i64>> {
        if !self.consumed_first {
            match self.read_header() {
                Ok(()) => {}
                // An empty stream terminates cleanly before the header.
                Err(Error::EndOfStream) => return Ok(None),
                Err(e) => return Err(e),
            }
        }

        match self.stream.read_bit() {
            Ok(1) => {}
            Ok(_) => return Ok(None),
            Err(Error::EndOfStream) => return Ok(None),
            Err(e) => return Err(e),
        }

        let timestamp = if !self.consumed_first {
            self.timestamps.read_first(&mut self.stream)?
        } else {
            self.timestamps.read_next(&mut self.stream)?
        };

        if self.last_message.is_none() {
            self.last_message = Some(DynamicMessage::new(schema.clone()));
        }

        self.read_custom_values(schema)?;
        self.read_proto_values(schema)?;

        // Keep the marshaled form of the cumulative message current so it
        // can be handed out without re-marshaling on access.
        self.last_annotation = self
            .last_message
            .as_ref()
            .map(|m| m.encode_to_vec())
            .unwrap_or_default();

        self.consumed_first = true;
        Ok(Some(timestamp))
    }

    fn read_header(&mut self) -> Result<()> {
        let version = self.stream.read_varint()?;
        if version != ENCODING_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        self.dict_lru_size = self.stream.read_varint()? as usize;

        let max_field = self.stream.read_varint()?;
        if max_field > MAX_CUSTOM_FIELD_NUMBER {
            return Err(Error::Oversized {
                size: max_field,
                limit: MAX_CUSTOM_FIELD_NUMBER,
            });
        }

        // The header, not the schema, is authoritative for which fields
        // are custom encoded in this stream.
        self.custom_fields.clear();
        for num in 1..=max_field {
            let tag = self.stream.read_bits(FIELD_TYPE_TAG_BITS)?;
            let field_type = FieldType::from_tag(tag)?;
            if field_type == FieldType::NotCustom {
                continue;
            }
            self.custom_fields
                .push(CustomFieldState::new(num as u32, field_type));
        }

        Ok(())
    }

    fn read_custom_values(&mut self, schema: &MessageDescriptor) -> Result<()> {
        let first = !self.consumed_first;
        let stream = &mut self.stream;
        let dict_lru_size = self.dict_lru_size;
        let last = self
            .last_message
            .as_mut()
            .expect("last_message initialized in advance");

        for cf in self.custom_fields.iter_mut() {
            match &mut cf.state {
                FieldState::Float(xor) => {
                    let bits = if first {
                        xor.read_first(stream)?
                    } else {
                        xor.read_next(stream)?
                    };
                    set_numeric_field(last, cf.field_num, cf.field_type, bits)?;
                }
                FieldState::Int(state) => {
                    if !first && stream.read_bit()? == 0 {
                        continue;
                    }
                    state.sig.read_sig(stream)?;
                    let (magnitude, negative) = state.sig.read_diff(stream)?;
                    let bits = state.apply(cf.field_type, magnitude, negative);
                    set_numeric_field(last, cf.field_num, cf.field_type, bits)?;
                }
                FieldState::Bytes(dict) => {
                    read_bytes_value(stream, dict, dict_lru_size, last, schema, cf.field_num)?;
                }
            }
        }

        Ok(())
    }

    fn read_proto_values(&mut self, schema: &MessageDescriptor) -> Result<()> {
        if self.stream.read_bit()? == 0 {
            // No non-custom field changed since the previous record.
            return Ok(());
        }

        let has_cleared_fields = self.stream.read_bit()? == 1;
        if has_cleared_fields {
            self.read_bitset()?;
        }

        let marshaled_len = self.stream.read_varint()?;
        if marshaled_len > MAX_MARSHALED_MESSAGE_SIZE {
            return Err(Error::Oversized {
                size: marshaled_len,
                limit: MAX_MARSHALED_MESSAGE_SIZE,
            });
        }

        self.stream.skip_to_next_byte();
        self.unmarshal_buf.resize(marshaled_len as usize, 0);
        let n = self.stream.read(&mut self.unmarshal_buf);
        if n != marshaled_len as usize {
            return Err(Error::EndOfStream);
        }

        let diff = DynamicMessage::decode(schema.clone(), self.unmarshal_buf.as_slice())?;
        let last = self
            .last_message
            .as_mut()
            .expect("last_message initialized in advance");

        // A field may come out of the diff with its default value merely
        // because it did not change; only non-default values are merged.
        // Fields that truly changed to a default are in the clear bitset.
        for field in schema.fields() {
            let value = diff.get_field(&field);
            if value.as_ref() == &Value::default_value_for_field(&field) {
                continue;
            }
            last.try_set_field(&field, value.into_owned())
                .map_err(set_field_err)?;
        }

        if has_cleared_fields {
            for &num in &self.bitset_values {
                let field = schema.get_field(num).ok_or_else(|| {
                    Error::Proto(prost::DecodeError::new(format!(
                        "cannot clear unknown field number {}",
                        num
                    )))
                })?;
                last.clear_field(&field);
            }
        }

        Ok(())
    }

    fn read_bitset(&mut self) -> Result<()> {
        self.bitset_values.clear();

        let length_bits = self.stream.read_varint()?;
        if length_bits > MAX_BITSET_LENGTH_BITS {
            return Err(Error::Oversized {
                size: length_bits,
                limit: MAX_BITSET_LENGTH_BITS,
            });
        }

        for i in 0..length_bits {
            if self.stream.read_bit()? == 1 {
                // Bit i stands for 1-indexed field number i + 1.
                self.bitset_values.push(i as u32 + 1);
            }
        }

        Ok(())
    }
}

fn set_numeric_field(
    msg: &mut DynamicMessage,
    field_num: u32,
    field_type: FieldType,
    bits: u64,
) -> Result<()> {
    let value = match field_type {
        FieldType::Float64 => Value::F64(f64::from_bits(bits)),
        FieldType::Float32 => Value::F32(f64::from_bits(bits) as f32),
        FieldType::SignedInt64 => Value::I64(bits as i64),
        FieldType::SignedInt32 => Value::I32(bits as i64 as i32),
        FieldType::UnsignedInt64 => Value::U64(bits),
        FieldType::UnsignedInt32 => Value::U32(bits as u32),
        FieldType::Bytes | FieldType::NotCustom => {
            return Err(Error::UnknownFieldType(field_type.tag()))
        }
    };
    msg.try_set_field_by_number(field_num, value)
        .map_err(set_field_err)
}

fn read_bytes_value(
    stream: &mut IStream,
    dict: &mut BytesDict,
    lru_size: usize,
    last: &mut DynamicMessage,
    schema: &MessageDescriptor,
    field_num: u32,
) -> Result<()> {
    if stream.read_bit()? == 0 {
        // No change to the bytes value.
        return Ok(());
    }

    if stream.read_bit()? == 1 {
        let index = stream.read_bits(num_bits_for_dict_index(lru_size))? as usize;
        let value = dict.get(index).cloned().ok_or(Error::DictOutOfRange {
            index,
            len: dict.len(),
        })?;
        set_bytes_field(last, schema, field_num, value)?;
        dict.promote(index);
        return Ok(());
    }

    // New value that was not in the dictionary.
    let len = stream.read_varint()?;
    stream.skip_to_next_byte();
    let mut buf = Vec::new();
    for _ in 0..len {
        buf.push(stream.read_byte()?);
    }
    let value = Bytes::from(buf);
    set_bytes_field(last, schema, field_num, value.clone())?;
    dict.push(value, lru_size);
    Ok(())
}

fn set_bytes_field(
    msg: &mut DynamicMessage,
    schema: &MessageDescriptor,
    field_num: u32,
    value: Bytes,
) -> Result<()> {
    let field = schema.get_field(field_num).ok_or_else(|| {
        Error::Proto(prost::DecodeError::new(format!(
            "schema has no field number {}",
            field_num
        )))
    })?;

    let value = match field.kind() {
        Kind::String => {
            let s = String::from_utf8(value.to_vec())
                .map_err(|_| Error::Proto(prost::DecodeError::new("invalid utf-8 in string field")))?;
            Value::String(s)
        }
        _ => Value::Bytes(value),
    };

    msg.try_set_field(&field, value).map_err(set_field_err)
}
