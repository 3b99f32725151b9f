//! Deterministic binary encoding.
//!
//! Fields and resolved extensions are written in field number order, followed by the unknown
//! fields in the order they were decoded. Packed fields are written as one record and map
//! entries are sorted by key, so a message always encodes to the same bytes.

use bytes::{BufMut, BytesMut};
use snafu::Snafu;
use std::cmp::Ordering;

use crate::decode::*;
use crate::reflect::check_field;
use crate::registry::*;

/// Error raised when a message value does not fit its declared layout.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum EncodeError
{
    /// A value is of a different kind than the field type.
    #[snafu(display("Field '{}' of '{}' expects {:?}", field, message, expected))]
    TypeMismatch
    {
        /// Message or extension holding the field.
        message: String,

        /// Field name.
        field: String,

        /// Declared field type.
        expected: ValueType,
    },

    /// A repeated field holds a single value or the other way around.
    #[snafu(display(
        "Field '{}' of '{}' has the wrong arity (repeated: {})",
        field,
        message,
        repeated
    ))]
    ArityMismatch
    {
        /// Message or extension holding the field.
        message: String,

        /// Field name.
        field: String,

        /// True, if the field is declared repeated.
        repeated: bool,
    },

    /// The field number is not declared on the message.
    #[snafu(display("Message '{}' has no field {}", message, number))]
    UndeclaredField
    {
        /// Message name.
        message: String,

        /// Field number.
        number: u64,
    },

    /// A message value is of a different message type than the field.
    #[snafu(display("Field '{}' expects message '{}', got '{}'", field, expected, actual))]
    ForeignMessage
    {
        /// Field name.
        field: String,

        /// Declared message type.
        expected: String,

        /// Message type of the value.
        actual: String,
    },

    /// An extension is attached to a message it does not extend.
    #[snafu(display("Extension '{}' does not extend '{}'", extension, message))]
    DetachedExtension
    {
        /// Extension name.
        extension: String,

        /// Message the extension was attached to.
        message: String,
    },
}

/// A stored value paired with its field layout.
pub(crate) struct LayoutEntry<'a>
{
    pub field: &'a MessageField,
    pub value: &'a FieldValue,
    pub extension: Option<&'a ExtensionInfo>,
}

impl MessageValue
{
    /// Encodes the message.
    pub fn encode(&self, registry: &TypeRegistry) -> Result<BytesMut, EncodeError>
    {
        let mut buf = BytesMut::new();
        self.write(&mut buf, registry)?;
        Ok(buf)
    }

    fn write(&self, buf: &mut BytesMut, registry: &TypeRegistry) -> Result<(), EncodeError>
    {
        for entry in self.layout(registry)? {
            write_field(buf, entry.field, entry.value, registry)?;
        }

        for unknown in &self.unknown {
            unknown.write(buf);
        }

        Ok(())
    }

    /// Pairs every stored value with its field layout, ordered by field number.
    ///
    /// Implicit-presence fields holding their default value are left out.
    pub(crate) fn layout<'a>(
        &'a self,
        registry: &'a TypeRegistry,
    ) -> Result<Vec<LayoutEntry<'a>>, EncodeError>
    {
        let info = registry.resolve_message(self.msg_ref);
        let mut entries = Vec::with_capacity(self.fields.len() + self.extensions.len());

        for (number, value) in &self.fields {
            let field = info
                .get_field(*number)
                .ok_or_else(|| EncodeError::UndeclaredField {
                    message: info.full_name.clone(),
                    number: *number,
                })?;
            check_field(&info.full_name, field, value, registry)?;
            if let (Multiplicity::Single, FieldValue::Single(v)) = (field.multiplicity, value) {
                if v.is_default() {
                    continue;
                }
            }
            entries.push(LayoutEntry {
                field,
                value,
                extension: None,
            });
        }

        for ext_value in self.extensions.values() {
            let ext = registry.resolve_extension(ext_value.ext_ref);
            if ext.extendee != self.msg_ref {
                return Err(EncodeError::DetachedExtension {
                    extension: ext.full_name.clone(),
                    message: info.full_name.clone(),
                });
            }
            check_field(&ext.full_name, &ext.field, &ext_value.value, registry)?;
            entries.push(LayoutEntry {
                field: &ext.field,
                value: &ext_value.value,
                extension: Some(ext),
            });
        }

        entries.sort_by_key(|e| e.field.number);
        Ok(entries)
    }
}

fn write_field(
    buf: &mut BytesMut,
    field: &MessageField,
    value: &FieldValue,
    registry: &TypeRegistry,
) -> Result<(), EncodeError>
{
    let values = match value {
        FieldValue::Single(v) => return write_value(buf, field, v, registry),
        FieldValue::Repeated(values) => values,
    };

    if field.multiplicity == Multiplicity::RepeatedPacked {
        if values.is_empty() {
            return Ok(());
        }

        let mut packed = BytesMut::new();
        for v in values {
            write_scalar(&mut packed, v);
        }
        write_tag(buf, field.number, WIRE_LEN);
        write_varint(buf, packed.len() as u64);
        buf.put(packed);
        return Ok(());
    }

    if is_map_field(field, registry) {
        let mut sorted: Vec<&Value> = values.iter().collect();
        sorted.sort_by(|a, b| compare_map_keys(a, b));
        for v in sorted {
            write_value(buf, field, v, registry)?;
        }
        return Ok(());
    }

    for v in values {
        write_value(buf, field, v, registry)?;
    }
    Ok(())
}

fn write_value(
    buf: &mut BytesMut,
    field: &MessageField,
    value: &Value,
    registry: &TypeRegistry,
) -> Result<(), EncodeError>
{
    match (value, &field.field_type) {
        (Value::Message(msg), ValueType::Group(..)) => {
            write_tag(buf, field.number, WIRE_START_GROUP);
            msg.write(buf, registry)?;
            write_tag(buf, field.number, WIRE_END_GROUP);
        }
        (Value::Message(msg), _) => {
            let inner = msg.encode(registry)?;
            write_tag(buf, field.number, WIRE_LEN);
            write_varint(buf, inner.len() as u64);
            buf.put(inner);
        }
        (v, vt) => {
            write_tag(buf, field.number, vt.wire_type());
            write_scalar(buf, v);
        }
    }
    Ok(())
}

/// Writes a scalar value without its tag.
fn write_scalar(buf: &mut BytesMut, value: &Value)
{
    match value {
        Value::Double(v) => buf.put_f64_le(*v),
        Value::Float(v) => buf.put_f32_le(*v),

        // Negative int32 values are sign extended to ten bytes.
        Value::Int32(v) => write_varint(buf, i64::from(*v) as u64),
        Value::Int64(v) => write_varint(buf, *v as u64),
        Value::UInt32(v) => write_varint(buf, u64::from(*v)),
        Value::UInt64(v) => write_varint(buf, *v),
        Value::SInt32(v) => write_varint(buf, u64::from(((v << 1) ^ (v >> 31)) as u32)),
        Value::SInt64(v) => write_varint(buf, ((v << 1) ^ (v >> 63)) as u64),
        Value::Fixed32(v) => buf.put_u32_le(*v),
        Value::Fixed64(v) => buf.put_u64_le(*v),
        Value::SFixed32(v) => buf.put_i32_le(*v),
        Value::SFixed64(v) => buf.put_i64_le(*v),
        Value::Bool(v) => write_varint(buf, u64::from(*v)),
        Value::String(v) | Value::Bytes(v) => {
            write_varint(buf, v.len() as u64);
            buf.put_slice(v);
        }
        Value::Enum(e) => write_varint(buf, e.value as u64),
        Value::Message(..) => unreachable!("Message values are written by write_value"),
    }
}

impl UnknownField
{
    fn write(&self, buf: &mut BytesMut)
    {
        match &self.value {
            UnknownValue::Varint(v) => {
                write_tag(buf, self.number, WIRE_VARINT);
                write_varint(buf, *v);
            }
            UnknownValue::Fixed64(v) => {
                write_tag(buf, self.number, WIRE_FIXED64);
                buf.put_u64_le(*v);
            }
            UnknownValue::VariableLength(v) => {
                write_tag(buf, self.number, WIRE_LEN);
                write_varint(buf, v.len() as u64);
                buf.put_slice(v);
            }
            UnknownValue::Group(v) => {
                write_tag(buf, self.number, WIRE_START_GROUP);
                buf.put_slice(v);
                write_tag(buf, self.number, WIRE_END_GROUP);
            }
            UnknownValue::Fixed32(v) => {
                write_tag(buf, self.number, WIRE_FIXED32);
                buf.put_u32_le(*v);
            }
        }
    }
}

pub(crate) fn is_map_field(field: &MessageField, registry: &TypeRegistry) -> bool
{
    match field.field_type {
        ValueType::Message(m) => field.is_repeated() && registry.resolve_message(m).map_entry,
        _ => false,
    }
}

/// Orders map entries by their key field.
pub(crate) fn compare_map_keys(a: &Value, b: &Value) -> Ordering
{
    let key = |v: &Value| match v {
        Value::Message(entry) => entry.fields.get(&1).and_then(|k| k.values().first().cloned()),
        _ => None,
    };

    match (key(a), key(b)) {
        (Some(a), Some(b)) => compare_scalars(&a, &b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_scalars(a: &Value, b: &Value) -> Ordering
{
    match (a, b) {
        (Value::Int32(a), Value::Int32(b))
        | (Value::SInt32(a), Value::SInt32(b))
        | (Value::SFixed32(a), Value::SFixed32(b)) => a.cmp(b),
        (Value::Int64(a), Value::Int64(b))
        | (Value::SInt64(a), Value::SInt64(b))
        | (Value::SFixed64(a), Value::SFixed64(b)) => a.cmp(b),
        (Value::UInt32(a), Value::UInt32(b)) | (Value::Fixed32(a), Value::Fixed32(b)) => a.cmp(b),
        (Value::UInt64(a), Value::UInt64(b)) | (Value::Fixed64(a), Value::Fixed64(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

fn write_tag(buf: &mut BytesMut, number: u64, wire_type: u8)
{
    write_varint(buf, number << 3 | u64::from(wire_type));
}

pub(crate) fn write_varint(buf: &mut BytesMut, mut value: u64)
{
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}
