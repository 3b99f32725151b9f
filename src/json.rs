//! Proto JSON structured text form.
//!
//! Output is multi-line and tab-indented with the proper field names as keys, so it diffs well
//! under version control. Fields appear in field number order and extensions are keyed by their
//! full name in brackets, e.g. `"[my.pkg.ext]"`. Unknown fields have no JSON form and are dropped.

use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use bytes::Bytes;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{Error as _, SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::ser::PrettyFormatter;
use snafu::{ResultExt, Snafu};
use std::cmp::Ordering;
use std::fmt;

use crate::decode::*;
use crate::encode::{compare_map_keys, is_map_field};
use crate::reflect::default_value;
use crate::registry::*;

/// Structured text error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum JsonError
{
    /// The input is not well formed JSON.
    #[snafu(display("Invalid JSON: {}", source))]
    Syntax
    {
        /// Source error.
        source: serde_json::Error,
    },

    /// The message could not be rendered.
    #[snafu(display("Failed to render JSON: {}", source))]
    Render
    {
        /// Source error.
        source: serde_json::Error,
    },

    /// A message was given as something other than a JSON object.
    #[snafu(display("Expected an object for message '{}'", message))]
    ExpectedObject
    {
        /// Message name.
        message: String,
    },

    /// An object key names no field or extension of the message.
    #[snafu(display("Message '{}' has no field '{}'", message, name))]
    UnknownField
    {
        /// Message name.
        message: String,

        /// Key in the input.
        name: String,
    },

    /// A field was given twice, possibly under both of its names.
    #[snafu(display("Field '{}' of '{}' is set twice", field, message))]
    DuplicateField
    {
        /// Message name.
        message: String,

        /// Field name.
        field: String,
    },

    /// More than one member of a `oneof` was given.
    #[snafu(display("Oneof '{}' of '{}' is set twice", oneof, message))]
    DuplicateOneof
    {
        /// Message name.
        message: String,

        /// Oneof name.
        oneof: String,
    },

    /// A value does not fit the field type.
    #[snafu(display("Invalid value for field '{}': {}", field, reason))]
    InvalidValue
    {
        /// Field name.
        field: String,

        /// What was wrong with the value.
        reason: &'static str,
    },

    /// An enum name is not declared by the enum.
    #[snafu(display("Enum '{}' has no value '{}'", enum_name, name))]
    UnknownEnumValue
    {
        /// Enum name.
        enum_name: String,

        /// Value name in the input.
        name: String,
    },

    /// Messages were nested too deep.
    #[snafu(display("Message nesting exceeds {} levels", MAX_DEPTH))]
    RecursionLimit,
}

/// Renders a message as indented proto JSON.
pub fn encode(msg: &MessageValue, registry: &TypeRegistry) -> Result<Vec<u8>, JsonError>
{
    let mut out = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"\t"));
    MessageView { msg, registry }
        .serialize(&mut ser)
        .context(Render)?;
    Ok(out)
}

/// Parses proto JSON into a message of type `msg_ref`.
///
/// Extension keys are resolved with `registry`; an extension of a different message is treated as
/// an unknown key.
pub fn decode(
    msg_ref: MessageRef,
    data: &[u8],
    registry: &TypeRegistry,
) -> Result<MessageValue, JsonError>
{
    JsonDecoder::new(registry).decode(msg_ref, data)
}

/// Proto JSON decoder.
///
/// Extension keys are resolved by default. With resolution disabled they are skipped, which
/// allows reading the descriptors of a request before its extensions are known.
#[derive(Debug, Clone, Copy)]
pub struct JsonDecoder<'a>
{
    registry: &'a TypeRegistry,
    resolve_extensions: bool,
}

struct MessageView<'a>
{
    msg: &'a MessageValue,
    registry: &'a TypeRegistry,
}

struct FieldView<'a>
{
    field: &'a MessageField,
    value: &'a FieldValue,
    registry: &'a TypeRegistry,
}

struct ValueView<'a>
{
    field: &'a MessageField,
    value: &'a Value,
    registry: &'a TypeRegistry,
}

struct MapView<'a>
{
    field: &'a MessageField,
    entries: &'a [Value],
    registry: &'a TypeRegistry,
}

impl Serialize for MessageView<'_>
{
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error>
    {
        let entries: Vec<_> = self
            .msg
            .layout(self.registry)
            .map_err(S::Error::custom)?
            .into_iter()
            .filter(|e| !matches!(e.value, FieldValue::Repeated(v) if v.is_empty()))
            .collect();

        let mut map = s.serialize_map(Some(entries.len()))?;
        for entry in entries {
            match entry.extension {
                Some(ext) => map.serialize_key(&format!("[{}]", ext.full_name))?,
                None => map.serialize_key(&entry.field.name)?,
            }
            map.serialize_value(&FieldView {
                field: entry.field,
                value: entry.value,
                registry: self.registry,
            })?;
        }
        map.end()
    }
}

impl Serialize for FieldView<'_>
{
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error>
    {
        let values = match self.value {
            FieldValue::Single(value) => {
                return ValueView {
                    field: self.field,
                    value,
                    registry: self.registry,
                }
                .serialize(s)
            }
            FieldValue::Repeated(values) => values,
        };

        if is_map_field(self.field, self.registry) {
            return MapView {
                field: self.field,
                entries: values,
                registry: self.registry,
            }
            .serialize(s);
        }

        let mut seq = s.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&ValueView {
                field: self.field,
                value,
                registry: self.registry,
            })?;
        }
        seq.end()
    }
}

impl Serialize for ValueView<'_>
{
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error>
    {
        match self.value {
            Value::Double(v) => serialize_float(s, *v),

            // Through the shortest decimal form, so 0.1f32 renders as 0.1.
            Value::Float(v) => match v.to_string().parse::<f64>() {
                Ok(f) if v.is_finite() => s.serialize_f64(f),
                _ => serialize_float(s, f64::from(*v)),
            },
            Value::Int32(v) | Value::SInt32(v) | Value::SFixed32(v) => s.serialize_i32(*v),
            Value::UInt32(v) | Value::Fixed32(v) => s.serialize_u32(*v),

            // 64-bit integers do not survive JSON number parsing in every reader.
            Value::Int64(v) | Value::SInt64(v) | Value::SFixed64(v) => {
                s.serialize_str(&v.to_string())
            }
            Value::UInt64(v) | Value::Fixed64(v) => s.serialize_str(&v.to_string()),
            Value::Bool(v) => s.serialize_bool(*v),
            Value::String(v) => match std::str::from_utf8(v) {
                Ok(text) => s.serialize_str(text),
                Err(e) => Err(S::Error::custom(format!(
                    "Invalid UTF-8 in field '{}': {}",
                    self.field.name, e
                ))),
            },
            Value::Bytes(v) => s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(v)),
            Value::Enum(e) => match self
                .registry
                .resolve_enum(e.enum_ref)
                .get_field_by_value(e.value)
            {
                Some(field) => s.serialize_str(&field.name),
                None => s.serialize_i64(e.value),
            },
            Value::Message(msg) => MessageView {
                msg,
                registry: self.registry,
            }
            .serialize(s),
        }
    }
}

impl Serialize for MapView<'_>
{
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error>
    {
        let entry_ref = match self.field.field_type {
            ValueType::Message(m) => m,
            _ => return Err(S::Error::custom("Map field is not a message field")),
        };
        let info = self.registry.resolve_message(entry_ref);
        let (key_field, value_field) = match (info.get_field(1), info.get_field(2)) {
            (Some(k), Some(v)) => (k, v),
            _ => return Err(S::Error::custom("Map entry lacks a key or a value field")),
        };

        let mut sorted: Vec<&Value> = self.entries.iter().collect();
        sorted.sort_by(|a, b| compare_map_keys(a, b));

        let mut map = s.serialize_map(Some(sorted.len()))?;
        for entry in sorted {
            let entry = match entry {
                Value::Message(entry) => entry,
                _ => return Err(S::Error::custom("Map entry is not a message")),
            };

            let key = match entry.fields.get(&1).and_then(|k| k.values().first()) {
                Some(key) => map_key(key),
                None => map_key(&default_value(&key_field.field_type)),
            }
            .map_err(|e| {
                S::Error::custom(format!(
                    "Invalid UTF-8 in a key of map '{}': {}",
                    self.field.name, e
                ))
            })?;

            let default;
            let value = match entry.fields.get(&2).and_then(|v| v.values().first()) {
                Some(value) => value,
                None => {
                    default = default_value(&value_field.field_type);
                    &default
                }
            };

            map.serialize_entry(
                &key,
                &ValueView {
                    field: value_field,
                    value,
                    registry: self.registry,
                },
            )?;
        }
        map.end()
    }
}

fn serialize_float<S: Serializer>(s: S, v: f64) -> Result<S::Ok, S::Error>
{
    if v.is_nan() {
        s.serialize_str("NaN")
    } else if v.is_infinite() {
        s.serialize_str(if v > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        s.serialize_f64(v)
    }
}

fn map_key(key: &Value) -> Result<String, std::str::Utf8Error>
{
    Ok(match key {
        Value::String(v) => std::str::from_utf8(v)?.to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Int32(v) | Value::SInt32(v) | Value::SFixed32(v) => v.to_string(),
        Value::Int64(v) | Value::SInt64(v) | Value::SFixed64(v) => v.to_string(),
        Value::UInt32(v) | Value::Fixed32(v) => v.to_string(),
        Value::UInt64(v) | Value::Fixed64(v) => v.to_string(),
        _ => String::new(),
    })
}

/// Parsed JSON input.
///
/// Objects keep every entry in input order, so a key given twice can be reported.
#[derive(Debug, Clone, PartialEq)]
enum Json
{
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Array(Vec<Json>),
    Object(Vec<(String, Json)>),
}

impl Json
{
    fn is_null(&self) -> bool
    {
        matches!(self, Json::Null)
    }

    fn as_bool(&self) -> Option<bool>
    {
        match self {
            Json::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str>
    {
        match self {
            Json::String(s) => Some(s),
            _ => None,
        }
    }

    fn as_array(&self) -> Option<&[Json]>
    {
        match self {
            Json::Array(items) => Some(items),
            _ => None,
        }
    }

    fn as_object(&self) -> Option<&[(String, Json)]>
    {
        match self {
            Json::Object(entries) => Some(entries),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for Json
{
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error>
    {
        d.deserialize_any(JsonVisitor)
    }
}

struct JsonVisitor;

impl<'de> Visitor<'de> for JsonVisitor
{
    type Value = Json;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.write_str("a JSON value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Json, E>
    {
        Ok(Json::Null)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Json, E>
    {
        Ok(Json::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Json, E>
    {
        Ok(Json::Number(v.into()))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Json, E>
    {
        Ok(Json::Number(v.into()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Json, E>
    {
        serde_json::Number::from_f64(v)
            .map(Json::Number)
            .ok_or_else(|| E::custom("non-finite number"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Json, E>
    {
        Ok(Json::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Json, E>
    {
        Ok(Json::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Json, A::Error>
    {
        let mut items = vec![];
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Json::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Json, A::Error>
    {
        let mut entries = vec![];
        while let Some(entry) = map.next_entry::<String, Json>()? {
            entries.push(entry);
        }
        Ok(Json::Object(entries))
    }
}

impl<'a> JsonDecoder<'a>
{
    /// Creates a decoder for messages of `registry`.
    pub fn new(registry: &'a TypeRegistry) -> Self
    {
        JsonDecoder {
            registry,
            resolve_extensions: true,
        }
    }

    /// Enables or disables extension resolution.
    pub fn resolve_extensions(mut self, enabled: bool) -> Self
    {
        self.resolve_extensions = enabled;
        self
    }

    /// Parses a message of type `msg_ref`.
    pub fn decode(&self, msg_ref: MessageRef, data: &[u8]) -> Result<MessageValue, JsonError>
    {
        let json: Json = serde_json::from_slice(data).context(Syntax)?;
        self.message(msg_ref, &json, 0)
    }

    fn message(&self, msg_ref: MessageRef, json: &Json, depth: usize)
        -> Result<MessageValue, JsonError>
    {
        if depth > MAX_DEPTH {
            return Err(JsonError::RecursionLimit);
        }

        let info = self.registry.resolve_message(msg_ref);
        let object = json.as_object().ok_or_else(|| JsonError::ExpectedObject {
            message: info.full_name.clone(),
        })?;

        let mut msg = MessageValue::new(msg_ref);
        let mut seen = vec![];
        let mut seen_extensions = vec![];
        let mut oneofs = vec![];
        for (key, value) in object {
            let unknown = || JsonError::UnknownField {
                message: info.full_name.clone(),
                name: key.clone(),
            };

            if let Some(name) = key.strip_prefix('[').and_then(|k| k.strip_suffix(']')) {
                if !self.resolve_extensions {
                    continue;
                }
                let ext = self
                    .registry
                    .get_extension(name)
                    .filter(|ext| ext.extendee == msg_ref)
                    .ok_or_else(unknown)?;
                if seen_extensions.contains(&ext.field.number) {
                    return Err(JsonError::DuplicateField {
                        message: info.full_name.clone(),
                        field: ext.full_name.clone(),
                    });
                }
                seen_extensions.push(ext.field.number);
                if value.is_null() {
                    continue;
                }
                if let Some(value) = self.field(&ext.field, value, depth)? {
                    msg.extensions.insert(
                        ext.field.number,
                        ExtensionValue {
                            ext_ref: ext.self_ref,
                            value,
                        },
                    );
                }
                continue;
            }

            let field = info
                .get_field_by_name(key)
                .or_else(|| info.get_field_by_json_name(key))
                .ok_or_else(unknown)?;
            if seen.contains(&field.number) {
                return Err(JsonError::DuplicateField {
                    message: info.full_name.clone(),
                    field: field.name.clone(),
                });
            }
            seen.push(field.number);

            if value.is_null() {
                continue;
            }

            if let Some(oneof) = field.oneof.and_then(|o| info.get_oneof(o)) {
                if oneofs.contains(&oneof.self_ref) {
                    return Err(JsonError::DuplicateOneof {
                        message: info.full_name.clone(),
                        oneof: oneof.name.clone(),
                    });
                }
                oneofs.push(oneof.self_ref);
            }

            if let Some(value) = self.field(field, value, depth)? {
                msg.fields.insert(field.number, value);
            }
        }

        Ok(msg)
    }

    fn field(&self, field: &MessageField, json: &Json, depth: usize)
        -> Result<Option<FieldValue>, JsonError>
    {
        if !field.is_repeated() {
            let value = self.value(field, &field.field_type, json, depth)?;
            if field.multiplicity == Multiplicity::Single && value.is_default() {
                return Ok(None);
            }
            return Ok(Some(FieldValue::Single(value)));
        }

        let values = match is_map_field(field, self.registry) {
            true => self.map(field, json, depth)?,
            false => json
                .as_array()
                .ok_or_else(|| invalid(field, "expected an array"))?
                .iter()
                .map(|item| self.value(field, &field.field_type, item, depth))
                .collect::<Result<Vec<_>, _>>()?,
        };

        match values.is_empty() {
            true => Ok(None),
            false => Ok(Some(FieldValue::Repeated(values))),
        }
    }

    fn map(&self, field: &MessageField, json: &Json, depth: usize)
        -> Result<Vec<Value>, JsonError>
    {
        let entry_ref = match field.field_type {
            ValueType::Message(m) => m,
            _ => return Err(invalid(field, "map field is not a message field")),
        };
        let info = self.registry.resolve_message(entry_ref);
        let (key_field, value_field) = match (info.get_field(1), info.get_field(2)) {
            (Some(k), Some(v)) => (k, v),
            _ => return Err(invalid(field, "map entry lacks a key or a value field")),
        };
        let object = json
            .as_object()
            .ok_or_else(|| invalid(field, "expected an object"))?;

        let mut entries = Vec::with_capacity(object.len());
        for (key, value) in object {
            let key = match key_field.field_type {
                ValueType::String => Value::String(Bytes::copy_from_slice(key.as_bytes())),
                ValueType::Bool => match key.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    _ => return Err(invalid(field, "expected a boolean map key")),
                },
                ref vt => self.value(key_field, vt, &Json::String(key.clone()), depth)?,
            };
            let value = self.value(value_field, &value_field.field_type, value, depth + 1)?;

            let mut entry = MessageValue::new(entry_ref);
            entry.fields.insert(1, FieldValue::Single(key));
            entry.fields.insert(2, FieldValue::Single(value));
            entries.push(Value::Message(Box::new(entry)));
        }

        entries.sort_by(compare_map_keys);
        if entries
            .windows(2)
            .any(|w| compare_map_keys(&w[0], &w[1]) == Ordering::Equal)
        {
            return Err(invalid(field, "duplicate map key"));
        }
        Ok(entries)
    }

    fn value(&self, field: &MessageField, vt: &ValueType, json: &Json, depth: usize)
        -> Result<Value, JsonError>
    {
        Ok(match vt {
            ValueType::Double => Value::Double(float(field, json)?),
            ValueType::Float => {
                let v = float(field, json)?;
                if v.is_finite() && v.abs() > f64::from(f32::MAX) {
                    return Err(invalid(field, "float out of range"));
                }
                Value::Float(v as f32)
            }
            ValueType::Int32 => Value::Int32(integer(field, json)?),
            ValueType::Int64 => Value::Int64(integer(field, json)?),
            ValueType::UInt32 => Value::UInt32(integer(field, json)?),
            ValueType::UInt64 => Value::UInt64(integer(field, json)?),
            ValueType::SInt32 => Value::SInt32(integer(field, json)?),
            ValueType::SInt64 => Value::SInt64(integer(field, json)?),
            ValueType::Fixed32 => Value::Fixed32(integer(field, json)?),
            ValueType::Fixed64 => Value::Fixed64(integer(field, json)?),
            ValueType::SFixed32 => Value::SFixed32(integer(field, json)?),
            ValueType::SFixed64 => Value::SFixed64(integer(field, json)?),
            ValueType::Bool => Value::Bool(
                json.as_bool()
                    .ok_or_else(|| invalid(field, "expected a boolean"))?,
            ),
            ValueType::String => Value::String(Bytes::copy_from_slice(
                json.as_str()
                    .ok_or_else(|| invalid(field, "expected a string"))?
                    .as_bytes(),
            )),
            ValueType::Bytes => {
                let text = json
                    .as_str()
                    .ok_or_else(|| invalid(field, "expected a base64 string"))?;
                Value::Bytes(Bytes::from(
                    decode_base64(text).ok_or_else(|| invalid(field, "invalid base64"))?,
                ))
            }
            ValueType::Enum(e) => {
                let info = self.registry.resolve_enum(*e);
                let value = match json.as_str() {
                    Some(name) => {
                        info.get_field_by_name(name)
                            .ok_or_else(|| JsonError::UnknownEnumValue {
                                enum_name: info.full_name.clone(),
                                name: name.to_string(),
                            })?
                            .value
                    }
                    None => i64::from(integer::<i32>(field, json)?),
                };
                Value::Enum(EnumValue {
                    enum_ref: *e,
                    value,
                })
            }
            ValueType::Message(m) | ValueType::Group(m) => {
                Value::Message(Box::new(self.message(*m, json, depth + 1)?))
            }
        })
    }
}

fn invalid(field: &MessageField, reason: &'static str) -> JsonError
{
    JsonError::InvalidValue {
        field: field.name.clone(),
        reason,
    }
}

/// Reads an integer given as a JSON number or a decimal string.
fn integer<T: TryFrom<i128>>(field: &MessageField, json: &Json) -> Result<T, JsonError>
{
    let n: Option<i128> = match json {
        Json::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| n.as_f64().and_then(integral)),
        Json::String(s) => s
            .parse::<i128>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().and_then(integral)),
        _ => return Err(invalid(field, "expected an integer")),
    };

    let n = n.ok_or_else(|| invalid(field, "expected an integer"))?;
    T::try_from(n).map_err(|_| invalid(field, "integer out of range"))
}

fn integral(f: f64) -> Option<i128>
{
    match f.is_finite() && f.fract() == 0.0 && f.abs() < 2f64.powi(64) {
        true => Some(f as i128),
        false => None,
    }
}

fn float(field: &MessageField, json: &Json) -> Result<f64, JsonError>
{
    match json {
        Json::Number(n) => n.as_f64().ok_or_else(|| invalid(field, "expected a number")),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            s => s.parse().map_err(|_| invalid(field, "expected a number")),
        },
        _ => Err(invalid(field, "expected a number")),
    }
}

/// Decodes standard or URL-safe base64, with or without padding.
fn decode_base64(text: &str) -> Option<Vec<u8>>
{
    let config = GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true);

    GeneralPurpose::new(&base64::alphabet::STANDARD, config)
        .decode(text)
        .or_else(|_| GeneralPurpose::new(&base64::alphabet::URL_SAFE, config).decode(text))
        .ok()
}

#[cfg(test)]
mod test
{
    use super::*;

    fn registry() -> TypeRegistry
    {
        TypeRegistry::parse(vec![(
            "j.proto",
            r#"
            syntax = "proto3";
            package j;
            enum Color { RED = 0; GREEN = 1; }
            message M {
                int32 small = 1;
                int64 big = 2;
                bytes data = 3;
                Color color = 4;
                double ratio = 5;
                float share = 6;
                map<int32, string> names = 7;
                repeated M children = 8;
                oneof kind {
                    string text = 9;
                    uint32 count = 10;
                }
                string field_name = 11;
            }
        "#,
        )])
        .unwrap()
    }

    fn roundtrip(reg: &TypeRegistry, text: &str) -> String
    {
        let m = reg.get_message("j.M").unwrap().self_ref;
        let msg = decode(m, text.as_bytes(), reg).unwrap();
        String::from_utf8(encode(&msg, reg).unwrap()).unwrap()
    }

    #[test]
    fn indented_with_tabs()
    {
        let reg = registry();
        assert_eq!(
            roundtrip(&reg, r#"{"big": 7, "small": 1}"#),
            "{\n\t\"small\": 1,\n\t\"big\": \"7\"\n}"
        );
        assert_eq!(roundtrip(&reg, "{}"), "{}");
    }

    #[test]
    fn scalar_forms()
    {
        let reg = registry();
        let out = roundtrip(
            &reg,
            r#"{"data": "AQI", "color": 1, "ratio": "-Infinity", "share": 0.1, "small": "-3"}"#,
        );
        assert!(out.contains("\"small\": -3"), "{}", out);
        assert!(out.contains("\"data\": \"AQI=\""), "{}", out);
        assert!(out.contains("\"color\": \"GREEN\""), "{}", out);
        assert!(out.contains("\"ratio\": \"-Infinity\""), "{}", out);
        assert!(out.contains("\"share\": 0.1"), "{}", out);
    }

    #[test]
    fn json_names_are_accepted()
    {
        let reg = registry();
        let out = roundtrip(&reg, r#"{"fieldName": "x"}"#);
        assert!(out.contains("\"field_name\": \"x\""), "{}", out);
    }

    #[test]
    fn maps_sort_by_key()
    {
        let reg = registry();
        let out = roundtrip(&reg, r#"{"names": {"10": "ten", "9": "nine"}}"#);
        let nine = out.find("\"9\"").unwrap();
        let ten = out.find("\"10\"").unwrap();
        assert!(nine < ten, "{}", out);
    }

    #[test]
    fn defaults_and_nulls_are_skipped()
    {
        let reg = registry();
        let m = reg.get_message("j.M").unwrap().self_ref;
        let msg = decode(m, br#"{"small": 0, "text": null, "children": []}"#, &reg).unwrap();
        assert!(msg.fields.is_empty());
    }

    #[test]
    fn rejects_bad_input()
    {
        let reg = registry();
        let m = reg.get_message("j.M").unwrap().self_ref;
        let fails = |text: &str| decode(m, text.as_bytes(), &reg).unwrap_err();

        assert!(matches!(fails("{"), JsonError::Syntax { .. }));
        assert!(matches!(fails("[]"), JsonError::ExpectedObject { .. }));
        assert!(matches!(fails(r#"{"nope": 1}"#), JsonError::UnknownField { .. }));
        assert!(matches!(
            fails(r#"{"field_name": "a", "fieldName": "b"}"#),
            JsonError::DuplicateField { .. }
        ));
        assert!(matches!(
            fails(r#"{"text": "a", "count": 1}"#),
            JsonError::DuplicateOneof { .. }
        ));
        assert!(matches!(
            fails(r#"{"small": 3000000000}"#),
            JsonError::InvalidValue { .. }
        ));
        assert!(matches!(
            fails(r#"{"color": "BLUE"}"#),
            JsonError::UnknownEnumValue { .. }
        ));
    }

    #[test]
    fn duplicate_keys_are_rejected()
    {
        let reg = registry();
        let m = reg.get_message("j.M").unwrap().self_ref;
        let fails = |text: &str| decode(m, text.as_bytes(), &reg).unwrap_err();

        assert!(matches!(
            fails(r#"{"small": 1, "small": 2}"#),
            JsonError::DuplicateField { .. }
        ));
        assert!(matches!(
            fails(r#"{"small": null, "small": 2}"#),
            JsonError::DuplicateField { .. }
        ));
        assert!(matches!(
            fails(r#"{"names": {"1": "a", "01": "b"}}"#),
            JsonError::InvalidValue {
                reason: "duplicate map key",
                ..
            }
        ));
    }

    #[test]
    fn invalid_utf8_is_not_rendered()
    {
        let reg = TypeRegistry::parse(vec![(
            "p.proto",
            r#"
            syntax = "proto2";
            message P {
                optional string s = 1;
                map<string, int32> m = 2;
            }
        "#,
        )])
        .unwrap();
        let p = reg.get_message("P").unwrap();
        let entry_ref = match p.get_field(2).unwrap().field_type {
            ValueType::Message(e) => e,
            ref t => panic!("Unexpected type {:?}", t),
        };

        let mut msg = MessageValue::new(p.self_ref);
        msg.fields.insert(
            1,
            FieldValue::Single(Value::String(Bytes::from_static(b"a\xffb"))),
        );
        assert!(matches!(encode(&msg, &reg), Err(JsonError::Render { .. })));

        let mut entry = MessageValue::new(entry_ref);
        entry.fields.insert(
            1,
            FieldValue::Single(Value::String(Bytes::from_static(b"\xfe"))),
        );
        let mut msg = MessageValue::new(p.self_ref);
        msg.fields.insert(
            2,
            FieldValue::Repeated(vec![Value::Message(Box::new(entry))]),
        );
        assert!(matches!(encode(&msg, &reg), Err(JsonError::Render { .. })));
    }

    #[test]
    fn extension_keys_can_be_skipped()
    {
        let reg = registry();
        let m = reg.get_message("j.M").unwrap().self_ref;
        let text = br#"{"[j.nope]": 1, "small": 2}"#;

        assert!(matches!(
            decode(m, text, &reg),
            Err(JsonError::UnknownField { .. })
        ));
        let msg = JsonDecoder::new(&reg)
            .resolve_extensions(false)
            .decode(m, text)
            .unwrap();
        assert_eq!(msg.get_field(1), Some(&FieldValue::Single(Value::Int32(2))));
        assert!(msg.extensions.is_empty());
    }

    #[test]
    fn undeclared_enum_numbers_render_as_numbers()
    {
        let reg = registry();
        let out = roundtrip(&reg, r#"{"color": 5}"#);
        assert!(out.contains("\"color\": 5"), "{}", out);
    }

    #[test]
    fn recursion_limit()
    {
        let reg = registry();
        let m = reg.get_message("j.M").unwrap().self_ref;
        let mut text = String::new();
        for _ in 0..(MAX_DEPTH + 2) {
            text.push_str(r#"{"children": ["#);
        }
        for _ in 0..(MAX_DEPTH + 2) {
            text.push_str("]}");
        }
        let err = decode(m, text.as_bytes(), &reg).unwrap_err();
        assert!(
            matches!(err, JsonError::RecursionLimit | JsonError::Syntax { .. }),
            "{}",
            err
        );
    }
}
