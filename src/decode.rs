//! Protocol buffer binary payload decoding.
//!
//! Decoding is driven by a [`TypeRegistry`]: the registry supplies the field layout of every
//! message and the decoder interprets the wire records against it. Records the layout does not
//! describe are kept as [`UnknownField`]s so they survive re-encoding.

use crate::registry::*;
use bytes::Bytes;
use snafu::{ResultExt, Snafu};
use std::collections::BTreeMap;
use std::convert::TryInto;

/// Nesting limit for messages and groups.
pub const MAX_DEPTH: usize = 100;

pub(crate) const WIRE_VARINT: u8 = 0;
pub(crate) const WIRE_FIXED64: u8 = 1;
pub(crate) const WIRE_LEN: u8 = 2;
pub(crate) const WIRE_START_GROUP: u8 = 3;
pub(crate) const WIRE_END_GROUP: u8 = 4;
pub(crate) const WIRE_FIXED32: u8 = 5;

/// Decoded protocol buffer value.
#[derive(Debug, PartialEq, Clone)]
pub enum Value
{
    /// `double` value.
    Double(f64),
    /// `float` value.
    Float(f32),
    /// `int32` value.
    Int32(i32),
    /// `int64` value.
    Int64(i64),
    /// `uint32` value.
    UInt32(u32),
    /// `uint64` value.
    UInt64(u64),
    /// `sint32` value.
    SInt32(i32),
    /// `sint64` value.
    SInt64(i64),
    /// `fixed32` value.
    Fixed32(u32),
    /// `fixed64` value.
    Fixed64(u64),
    /// `sfixed32` value.
    SFixed32(i32),
    /// `sfixed64` value.
    SFixed64(i64),
    /// `bool` value.
    Bool(bool),

    /// `string` value.
    ///
    /// Kept as bytes: proto2 strings are not required to be valid UTF-8.
    String(Bytes),

    /// `bytes` value.
    Bytes(Bytes),

    /// Message or group value.
    Message(Box<MessageValue>),

    /// Enum type value.
    Enum(EnumValue),
}

/// Value of a field that the message layout did not describe.
///
/// The wire type allows the decoder to tell how large an unknown value is, so the value is kept
/// as-is and written back unchanged on encoding.
#[derive(Debug, PartialEq, Clone)]
pub enum UnknownValue
{
    /// Unknown varint (wire type = 0).
    Varint(u64),

    /// Unknown 64-bit value (wire type = 1).
    Fixed64(u64),

    /// Unknown variable length value (wire type = 2).
    VariableLength(Bytes),

    /// Unknown group (wire type = 3). Holds the bytes between the start and end group tags.
    Group(Bytes),

    /// Unknown 32-bit value (wire type = 5).
    Fixed32(u32),
}

/// Enum value.
#[derive(Debug, PartialEq, Clone)]
pub struct EnumValue
{
    /// Reference to the enum type.
    pub enum_ref: EnumRef,

    /// Value.
    pub value: i64,
}

/// Message value.
#[derive(Debug, PartialEq, Clone)]
pub struct MessageValue
{
    /// Reference to the message type.
    pub msg_ref: MessageRef,

    /// Values of declared fields by field number.
    pub fields: BTreeMap<u64, FieldValue>,

    /// Values of resolved extensions by field number.
    pub extensions: BTreeMap<u64, ExtensionValue>,

    /// Fields not described by the message layout, in wire order.
    pub unknown: Vec<UnknownField>,
}

/// Value of one field.
#[derive(Debug, PartialEq, Clone)]
pub enum FieldValue
{
    /// Value of a singular field.
    Single(Value),

    /// Values of a repeated field, in wire order.
    Repeated(Vec<Value>),
}

/// Extension value attached to a message.
#[derive(Debug, PartialEq, Clone)]
pub struct ExtensionValue
{
    /// The resolved extension.
    pub ext_ref: ExtensionRef,

    /// Extension value.
    pub value: FieldValue,
}

/// Field record not described by the message layout.
#[derive(Debug, PartialEq, Clone)]
pub struct UnknownField
{
    /// Field number.
    pub number: u64,

    /// Raw value.
    pub value: UnknownValue,
}

/// Wire format decoding error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum DecodeError
{
    /// The input ended in the middle of a value.
    #[snafu(display("Unexpected end of input while reading {}", context))]
    Truncated
    {
        /// What was being read.
        context: &'static str,
    },

    /// A varint was longer than ten bytes or overflowed 64 bits.
    #[snafu(display("Varint overflows 64 bits"))]
    VarintOverflow,

    /// A tag carried wire type 6 or 7.
    #[snafu(display("Invalid wire type {} for field {}", wire_type, number))]
    InvalidWireType
    {
        /// Field number of the tag.
        number: u64,

        /// Wire type of the tag.
        wire_type: u8,
    },

    /// A tag carried field number 0.
    #[snafu(display("Invalid field number 0"))]
    InvalidFieldNumber,

    /// Start and end group tags did not pair up.
    #[snafu(display("Unbalanced group for field {}", number))]
    UnbalancedGroup
    {
        /// Field number of the unmatched tag.
        number: u64,
    },

    /// A string that must be UTF-8 was not.
    #[snafu(display("Invalid UTF-8 in field '{}': {}", field, source))]
    InvalidUtf8
    {
        /// Field name.
        field: String,

        /// Source error.
        source: std::str::Utf8Error,
    },

    /// Messages were nested too deep.
    #[snafu(display("Message nesting exceeds {} levels", MAX_DEPTH))]
    RecursionLimit,
}

impl FieldValue
{
    /// All values of the field. A singular field yields one value.
    pub fn values(&self) -> &[Value]
    {
        match self {
            FieldValue::Single(v) => std::slice::from_ref(v),
            FieldValue::Repeated(v) => v,
        }
    }

    fn push(slot: &mut Option<FieldValue>, value: Value)
    {
        match slot {
            Some(FieldValue::Repeated(values)) => values.push(value),
            _ => *slot = Some(FieldValue::Repeated(vec![value])),
        }
    }
}

/// Binary decoder.
///
/// A decoder is tied to the registry whose layouts it decodes against. Extension resolution is
/// off by default: extension records are then kept as unknown fields like any other undeclared
/// field number.
#[derive(Debug, Clone, Copy)]
pub struct Decoder<'a>
{
    registry: &'a TypeRegistry,
    resolve_extensions: bool,
}

impl<'a> Decoder<'a>
{
    /// Creates a decoder for messages of `registry`.
    pub fn new(registry: &'a TypeRegistry) -> Self
    {
        Decoder {
            registry,
            resolve_extensions: false,
        }
    }

    /// Enables or disables extension resolution.
    ///
    /// With resolution enabled, a record whose number is not a declared field but is a
    /// registered extension of the message is decoded with the extension's type.
    pub fn resolve_extensions(mut self, enabled: bool) -> Self
    {
        self.resolve_extensions = enabled;
        self
    }

    /// Decodes a message of type `msg_ref`.
    pub fn decode(&self, msg_ref: MessageRef, data: &[u8]) -> Result<MessageValue, DecodeError>
    {
        let mut msg = MessageValue::new(msg_ref);
        self.merge(&mut msg, data, 0)?;
        Ok(msg)
    }

    fn merge(&self, msg: &mut MessageValue, mut data: &[u8], depth: usize)
        -> Result<(), DecodeError>
    {
        if depth > MAX_DEPTH {
            return Err(DecodeError::RecursionLimit);
        }

        let info = self.registry.resolve_message(msg.msg_ref);
        while !data.is_empty() {
            let (number, wire_type) = read_tag(&mut data)?;
            if wire_type == WIRE_END_GROUP {
                return Err(DecodeError::UnbalancedGroup { number });
            }

            if let Some(field) = info.get_field(number) {
                let mut slot = msg.fields.remove(&number);
                let result = self.decode_known(&mut slot, field, wire_type, &mut data, depth);
                if let Some(value) = slot {
                    msg.fields.insert(number, value);
                }

                if result? {
                    if let Some(oneof) = field.oneof.and_then(|o| info.get_oneof(o)) {
                        for other in oneof.fields.iter().filter(|n| **n != number) {
                            msg.fields.remove(other);
                        }
                    }
                    continue;
                }
            } else if let Some(ext) = self.find_extension(info.self_ref, number) {
                let mut slot = msg.extensions.remove(&number).map(|e| e.value);
                let result = self.decode_known(&mut slot, &ext.field, wire_type, &mut data, depth);
                if let Some(value) = slot {
                    msg.extensions.insert(
                        number,
                        ExtensionValue {
                            ext_ref: ext.self_ref,
                            value,
                        },
                    );
                }

                if result? {
                    continue;
                }
            }

            let value = read_unknown(number, wire_type, &mut data, depth)?;
            msg.unknown.push(UnknownField { number, value });
        }

        Ok(())
    }

    fn find_extension(&self, extendee: MessageRef, number: u64) -> Option<&'a ExtensionInfo>
    {
        match self.resolve_extensions {
            true => self.registry.find_extension(extendee, number),
            false => None,
        }
    }

    /// Decodes one record of a known field into `slot`.
    ///
    /// Returns false without consuming anything when the wire type does not fit the field.
    fn decode_known(
        &self,
        slot: &mut Option<FieldValue>,
        field: &MessageField,
        wire_type: u8,
        data: &mut &[u8],
        depth: usize,
    ) -> Result<bool, DecodeError>
    {
        let vt = &field.field_type;
        let repeated = field.is_repeated();

        // Repeated scalars are accepted both packed and unpacked.
        if repeated && vt.is_packable() && wire_type == WIRE_LEN {
            let mut array = read_length_delimited(data)?;
            while !array.is_empty() {
                FieldValue::push(slot, read_scalar(&mut array, vt, field)?);
            }
            return Ok(true);
        }

        if wire_type != vt.wire_type() {
            return Ok(false);
        }

        match vt {
            ValueType::Message(mref) | ValueType::Group(mref) => {
                let content = match vt {
                    ValueType::Group(..) => read_group(data, field.number, depth)?,
                    _ => read_length_delimited(data)?,
                };

                if repeated {
                    let mut msg = MessageValue::new(*mref);
                    self.merge(&mut msg, content, depth + 1)?;
                    FieldValue::push(slot, Value::Message(Box::new(msg)));
                } else {
                    // A singular message seen twice merges into the earlier value.
                    let mut msg = match slot.take() {
                        Some(FieldValue::Single(Value::Message(m))) => *m,
                        _ => MessageValue::new(*mref),
                    };
                    self.merge(&mut msg, content, depth + 1)?;
                    *slot = Some(FieldValue::Single(Value::Message(Box::new(msg))));
                }
            }
            _ => {
                let value = read_scalar(data, vt, field)?;
                if repeated {
                    FieldValue::push(slot, value);
                } else if field.multiplicity == Multiplicity::Single && value.is_default() {
                    *slot = None;
                } else {
                    *slot = Some(FieldValue::Single(value));
                }
            }
        }

        Ok(true)
    }
}

impl MessageRef
{
    /// Decode a message without extension resolution.
    ///
    /// Will **panic** if the message defined by the `MessageRef` does not exist in this registry.
    pub fn decode(self, data: &[u8], registry: &TypeRegistry) -> Result<MessageValue, DecodeError>
    {
        Decoder::new(registry).decode(self, data)
    }
}

impl MessageInfo
{
    /// Decode a message without extension resolution.
    pub fn decode(&self, data: &[u8], registry: &TypeRegistry) -> Result<MessageValue, DecodeError>
    {
        Decoder::new(registry).decode(self.self_ref, data)
    }
}

impl Value
{
    /// True for the zero value of the scalar types, which implicit-presence fields never store.
    pub fn is_default(&self) -> bool
    {
        match self {
            Value::Double(v) => *v == 0.0 && v.is_sign_positive(),
            Value::Float(v) => *v == 0.0 && v.is_sign_positive(),
            Value::Int32(v) | Value::SInt32(v) | Value::SFixed32(v) => *v == 0,
            Value::Int64(v) | Value::SInt64(v) | Value::SFixed64(v) => *v == 0,
            Value::UInt32(v) | Value::Fixed32(v) => *v == 0,
            Value::UInt64(v) | Value::Fixed64(v) => *v == 0,
            Value::Bool(v) => !*v,
            Value::String(v) | Value::Bytes(v) => v.is_empty(),
            Value::Enum(e) => e.value == 0,
            Value::Message(..) => false,
        }
    }
}

fn read_scalar(data: &mut &[u8], vt: &ValueType, field: &MessageField)
    -> Result<Value, DecodeError>
{
    Ok(match vt {
        ValueType::Double => Value::Double(f64::from_le_bytes(read_array(data, "double")?)),
        ValueType::Float => Value::Float(f32::from_le_bytes(read_array(data, "float")?)),

        // Varints are truncated to the declared width like other protobuf runtimes do.
        ValueType::Int32 => Value::Int32(read_varint(data)? as i32),
        ValueType::Int64 => Value::Int64(read_varint(data)? as i64),
        ValueType::UInt32 => Value::UInt32(read_varint(data)? as u32),
        ValueType::UInt64 => Value::UInt64(read_varint(data)?),
        ValueType::SInt32 => {
            let u = read_varint(data)? as u32;
            Value::SInt32((u >> 1) as i32 ^ -((u & 1) as i32))
        }
        ValueType::SInt64 => {
            let u = read_varint(data)?;
            Value::SInt64((u >> 1) as i64 ^ -((u & 1) as i64))
        }
        ValueType::Fixed32 => Value::Fixed32(u32::from_le_bytes(read_array(data, "fixed32")?)),
        ValueType::Fixed64 => Value::Fixed64(u64::from_le_bytes(read_array(data, "fixed64")?)),
        ValueType::SFixed32 => Value::SFixed32(i32::from_le_bytes(read_array(data, "sfixed32")?)),
        ValueType::SFixed64 => Value::SFixed64(i64::from_le_bytes(read_array(data, "sfixed64")?)),
        ValueType::Bool => Value::Bool(read_varint(data)? != 0),
        ValueType::String => {
            let bytes = read_length_delimited(data)?;
            if field.validate_utf8 {
                std::str::from_utf8(bytes).context(InvalidUtf8 {
                    field: field.name.as_str(),
                })?;
            }
            Value::String(Bytes::copy_from_slice(bytes))
        }
        ValueType::Bytes => Value::Bytes(Bytes::copy_from_slice(read_length_delimited(data)?)),
        ValueType::Enum(eref) => Value::Enum(EnumValue {
            enum_ref: *eref,
            value: i64::from(read_varint(data)? as i32),
        }),
        ValueType::Message(..) | ValueType::Group(..) => {
            unreachable!("Message type {:?} read as a scalar", vt)
        }
    })
}

fn read_unknown(number: u64, wire_type: u8, data: &mut &[u8], depth: usize)
    -> Result<UnknownValue, DecodeError>
{
    Ok(match wire_type {
        WIRE_VARINT => UnknownValue::Varint(read_varint(data)?),
        WIRE_FIXED64 => UnknownValue::Fixed64(u64::from_le_bytes(read_array(data, "fixed64")?)),
        WIRE_LEN => UnknownValue::VariableLength(Bytes::copy_from_slice(read_length_delimited(
            data,
        )?)),
        WIRE_START_GROUP => {
            UnknownValue::Group(Bytes::copy_from_slice(read_group(data, number, depth)?))
        }
        WIRE_FIXED32 => UnknownValue::Fixed32(u32::from_le_bytes(read_array(data, "fixed32")?)),
        WIRE_END_GROUP => return Err(DecodeError::UnbalancedGroup { number }),
        _ => return Err(DecodeError::InvalidWireType { number, wire_type }),
    })
}

/// Reads up to and including the end tag of the group `number`, returning the group content.
fn read_group<'d>(data: &mut &'d [u8], number: u64, depth: usize)
    -> Result<&'d [u8], DecodeError>
{
    if depth > MAX_DEPTH {
        return Err(DecodeError::RecursionLimit);
    }

    let original = *data;
    loop {
        if data.is_empty() {
            return Err(DecodeError::UnbalancedGroup { number });
        }

        let before_tag = *data;
        let (inner, wire_type) = read_tag(data)?;
        match wire_type {
            WIRE_END_GROUP if inner == number => {
                return Ok(&original[..original.len() - before_tag.len()]);
            }
            WIRE_END_GROUP => return Err(DecodeError::UnbalancedGroup { number: inner }),
            _ => {
                read_unknown(inner, wire_type, data, depth + 1)?;
            }
        }
    }
}

fn read_tag(data: &mut &[u8]) -> Result<(u64, u8), DecodeError>
{
    let tag = read_varint(data)?;
    let number = tag >> 3;
    if number == 0 {
        return Err(DecodeError::InvalidFieldNumber);
    }
    Ok((number, (tag & 0x07) as u8))
}

pub(crate) fn read_varint(data: &mut &[u8]) -> Result<u64, DecodeError>
{
    let mut result = 0u64;
    for idx in 0..10 {
        let b = *data.get(idx).ok_or(DecodeError::Truncated { context: "varint" })?;

        // The tenth byte may only carry the single remaining bit.
        if idx == 9 && b > 1 {
            return Err(DecodeError::VarintOverflow);
        }

        result |= u64::from(b & 0x7f) << (idx * 7);
        if b & 0x80 == 0 {
            *data = &data[idx + 1..];
            return Ok(result);
        }
    }
    Err(DecodeError::VarintOverflow)
}

fn read_length_delimited<'d>(data: &mut &'d [u8]) -> Result<&'d [u8], DecodeError>
{
    let length = read_varint(data)?;
    let length = match usize::try_from(length) {
        Ok(length) if length <= data.len() => length,
        _ => {
            return Err(DecodeError::Truncated {
                context: "length-delimited value",
            })
        }
    };

    let (consumed, remainder) = data.split_at(length);
    *data = remainder;
    Ok(consumed)
}

fn read_array<const N: usize>(data: &mut &[u8], context: &'static str)
    -> Result<[u8; N], DecodeError>
{
    if data.len() < N {
        return Err(DecodeError::Truncated { context });
    }

    let (consumed, remainder) = data.split_at(N);
    *data = remainder;
    consumed
        .try_into()
        .map_err(|_| DecodeError::Truncated { context })
}
