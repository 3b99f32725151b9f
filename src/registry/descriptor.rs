//! Registry input from decoded `google.protobuf.FileDescriptorProto` messages.

use tracing::debug;

use super::builder::*;
use super::*;
use crate::decode::{MessageValue, Value};

const MAX_FIELD_NUMBER: i64 = (1 << 29) - 1;

mod file
{
    pub const NAME: u64 = 1;
    pub const PACKAGE: u64 = 2;
    pub const MESSAGE_TYPE: u64 = 4;
    pub const ENUM_TYPE: u64 = 5;
    pub const EXTENSION: u64 = 7;
    pub const SYNTAX: u64 = 12;
    pub const EDITION: u64 = 14;
}

mod message
{
    pub const NAME: u64 = 1;
    pub const FIELD: u64 = 2;
    pub const NESTED_TYPE: u64 = 3;
    pub const ENUM_TYPE: u64 = 4;
    pub const EXTENSION: u64 = 6;
    pub const OPTIONS: u64 = 7;
    pub const ONEOF_DECL: u64 = 8;

    pub const OPTIONS_MAP_ENTRY: u64 = 7;
}

mod field
{
    pub const NAME: u64 = 1;
    pub const EXTENDEE: u64 = 2;
    pub const NUMBER: u64 = 3;
    pub const LABEL: u64 = 4;
    pub const TYPE: u64 = 5;
    pub const TYPE_NAME: u64 = 6;
    pub const OPTIONS: u64 = 8;
    pub const ONEOF_INDEX: u64 = 9;
    pub const JSON_NAME: u64 = 10;
    pub const PROTO3_OPTIONAL: u64 = 17;

    pub const OPTIONS_PACKED: u64 = 2;
    pub const OPTIONS_FEATURES: u64 = 21;
    pub const FEATURES_REPEATED_FIELD_ENCODING: u64 = 3;
    pub const ENCODING_EXPANDED: i64 = 2;

    pub const TYPE_GROUP: i64 = 10;
    pub const TYPE_MESSAGE: i64 = 11;
    pub const TYPE_ENUM: i64 = 14;
}

mod enumeration
{
    pub const NAME: u64 = 1;
    pub const VALUE: u64 = 2;

    pub const VALUE_NAME: u64 = 1;
    pub const VALUE_NUMBER: u64 = 2;
}

const FILE_DESCRIPTOR: &str = "google.protobuf.FileDescriptorProto";

impl PackageBuilder
{
    /// Reads one `FileDescriptorProto`.
    pub fn from_descriptor(
        descriptor: &MessageValue,
        schema: &TypeRegistry,
    ) -> Result<Self, DescriptorError>
    {
        let is_file = schema
            .get_message(FILE_DESCRIPTOR)
            .map(|m| m.self_ref == descriptor.msg_ref)
            .unwrap_or(false);
        if !is_file {
            return Err(DescriptorError::MalformedDescriptor {
                context: schema.resolve_message(descriptor.msg_ref).full_name.clone(),
                reason: "not a file descriptor",
            });
        }

        let file_name = string(descriptor, file::NAME).unwrap_or_default();
        let mut package = PackageBuilder::new(&file_name);
        package.name = string(descriptor, file::PACKAGE).filter(|p| !p.is_empty());
        package.syntax = match string(descriptor, file::SYNTAX).as_deref() {
            Some("proto3") => Syntax::Proto3,
            Some("editions") => Syntax::Editions,
            Some("proto2") | Some("") => Syntax::Proto2,
            None if descriptor.fields.contains_key(&file::EDITION) => Syntax::Editions,
            None => Syntax::Proto2,
            Some(_) => {
                return Err(DescriptorError::MalformedDescriptor {
                    context: file_name,
                    reason: "unknown syntax",
                })
            }
        };
        debug!(file = %file_name, syntax = ?package.syntax, "reading file descriptor");

        let syntax = package.syntax;
        let context = package.name.clone().unwrap_or_default();
        for m in messages(descriptor, file::MESSAGE_TYPE) {
            package
                .types
                .push(ProtobufTypeBuilder::Message(MessageBuilder::from_descriptor(
                    m, syntax, &context,
                )?));
        }
        for e in messages(descriptor, file::ENUM_TYPE) {
            package
                .types
                .push(ProtobufTypeBuilder::Enum(EnumBuilder::from_descriptor(e, &context)?));
        }
        for ext in messages(descriptor, file::EXTENSION) {
            let (field, _) = FieldBuilder::from_descriptor(ext, syntax, &context)?;
            package.extensions.push(field);
        }

        Ok(package)
    }
}

impl MessageBuilder
{
    fn from_descriptor(
        descriptor: &MessageValue,
        syntax: Syntax,
        parent: &str,
    ) -> Result<Self, DescriptorError>
    {
        let name = required_name(descriptor, message::NAME, parent, "message without a name")?;
        let context = scoped(parent, &name);

        let mut builder = MessageBuilder {
            name,
            map_entry: messages(descriptor, message::OPTIONS)
                .last()
                .and_then(|o| boolean(o, message::OPTIONS_MAP_ENTRY))
                .unwrap_or(false),
            ..Default::default()
        };

        builder.oneofs = messages(descriptor, message::ONEOF_DECL)
            .map(|o| {
                Ok(OneofBuilder {
                    name: required_name(o, 1, &context, "oneof without a name")?,
                    fields: vec![],
                })
            })
            .collect::<Result<_, DescriptorError>>()?;

        for f in messages(descriptor, message::FIELD) {
            let (field, oneof_index) = FieldBuilder::from_descriptor(f, syntax, &context)?;
            match oneof_index {
                None => builder.fields.push(field),
                Some(idx) => match usize::try_from(idx)
                    .ok()
                    .and_then(|idx| builder.oneofs.get_mut(idx))
                {
                    Some(oneof) => oneof.fields.push(field),
                    None => {
                        return Err(DescriptorError::MalformedDescriptor {
                            context: scoped(&context, &field.name),
                            reason: "oneof index out of range",
                        })
                    }
                },
            }
        }

        for m in messages(descriptor, message::NESTED_TYPE) {
            builder
                .inner_types
                .push(ProtobufTypeBuilder::Message(MessageBuilder::from_descriptor(
                    m, syntax, &context,
                )?));
        }
        for e in messages(descriptor, message::ENUM_TYPE) {
            builder
                .inner_types
                .push(ProtobufTypeBuilder::Enum(EnumBuilder::from_descriptor(e, &context)?));
        }
        for ext in messages(descriptor, message::EXTENSION) {
            let (field, _) = FieldBuilder::from_descriptor(ext, syntax, &context)?;
            builder.extensions.push(field);
        }

        Ok(builder)
    }
}

impl EnumBuilder
{
    fn from_descriptor(descriptor: &MessageValue, parent: &str) -> Result<Self, DescriptorError>
    {
        let name = required_name(descriptor, enumeration::NAME, parent, "enum without a name")?;
        let context = scoped(parent, &name);

        let fields = messages(descriptor, enumeration::VALUE)
            .map(|v| {
                Ok(EnumField {
                    name: required_name(
                        v,
                        enumeration::VALUE_NAME,
                        &context,
                        "enum value without a name",
                    )?,
                    value: integer(v, enumeration::VALUE_NUMBER).unwrap_or(0),
                    options: vec![],
                })
            })
            .collect::<Result<_, DescriptorError>>()?;

        Ok(EnumBuilder { name, fields })
    }
}

impl FieldBuilder
{
    /// Reads a `FieldDescriptorProto`, returning the field and its `oneof_index`.
    fn from_descriptor(
        descriptor: &MessageValue,
        syntax: Syntax,
        parent: &str,
    ) -> Result<(Self, Option<i64>), DescriptorError>
    {
        let name = required_name(descriptor, field::NAME, parent, "field without a name")?;
        let malformed = |reason| DescriptorError::MalformedDescriptor {
            context: scoped(parent, &name),
            reason,
        };

        let number = integer(descriptor, field::NUMBER).ok_or_else(|| malformed("no field number"))?;
        if !(1..=MAX_FIELD_NUMBER).contains(&number) {
            return Err(malformed("field number out of range"));
        }

        let proto3_optional = boolean(descriptor, field::PROTO3_OPTIONAL).unwrap_or(false);
        let label = match integer(descriptor, field::LABEL).unwrap_or(1) {
            1 if syntax == Syntax::Proto3 && !proto3_optional => Label::None,
            1 => Label::Optional,
            2 => Label::Required,
            3 => Label::Repeated,
            _ => return Err(malformed("unknown label")),
        };

        let type_name = string(descriptor, field::TYPE_NAME);
        let field_type = match (integer(descriptor, field::TYPE), type_name) {
            (Some(field::TYPE_GROUP), Some(n)) => FieldTypeBuilder::Group(n),
            (Some(field::TYPE_MESSAGE), Some(n)) => FieldTypeBuilder::Message(n),
            (Some(field::TYPE_ENUM), Some(n)) => FieldTypeBuilder::Enum(n),
            (None, Some(n)) => FieldTypeBuilder::Unknown(n),
            (Some(code), _) => FieldTypeBuilder::Builtin(
                scalar_type(code).ok_or_else(|| malformed("unknown field type"))?,
            ),
            (None, None) => return Err(malformed("field without a type")),
        };

        let mut builder = FieldBuilder::new(&name, number as u64, label, field_type);
        builder.json_name = string(descriptor, field::JSON_NAME);
        builder.extendee = string(descriptor, field::EXTENDEE);
        if let Some(options) = messages(descriptor, field::OPTIONS).last() {
            builder.options = field_options(options);
        }

        Ok((builder, integer(descriptor, field::ONEOF_INDEX)))
    }
}

/// Collects the field options that affect the wire layout.
fn field_options(options: &MessageValue) -> Vec<ProtoOption>
{
    let expanded = messages(options, field::OPTIONS_FEATURES)
        .last()
        .and_then(|f| integer(f, field::FEATURES_REPEATED_FIELD_ENCODING))
        .map(|encoding| encoding == field::ENCODING_EXPANDED);

    match boolean(options, field::OPTIONS_PACKED).or_else(|| expanded.map(|e| !e)) {
        Some(packed) => vec![ProtoOption {
            name: "packed".to_string(),
            value: Constant::Bool(packed),
        }],
        None => vec![],
    }
}

fn scalar_type(code: i64) -> Option<ValueType>
{
    Some(match code {
        1 => ValueType::Double,
        2 => ValueType::Float,
        3 => ValueType::Int64,
        4 => ValueType::UInt64,
        5 => ValueType::Int32,
        6 => ValueType::Fixed64,
        7 => ValueType::Fixed32,
        8 => ValueType::Bool,
        9 => ValueType::String,
        12 => ValueType::Bytes,
        13 => ValueType::UInt32,
        15 => ValueType::SFixed32,
        16 => ValueType::SFixed64,
        17 => ValueType::SInt32,
        18 => ValueType::SInt64,
        _ => return None,
    })
}

fn scoped(parent: &str, name: &str) -> String
{
    match parent.is_empty() {
        true => name.to_string(),
        false => format!("{}.{}", parent, name),
    }
}

fn required_name(
    msg: &MessageValue,
    number: u64,
    context: &str,
    reason: &'static str,
) -> Result<String, DescriptorError>
{
    string(msg, number)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| DescriptorError::MalformedDescriptor {
            context: context.to_string(),
            reason,
        })
}

fn last(msg: &MessageValue, number: u64) -> Option<&Value>
{
    msg.fields.get(&number).and_then(|f| f.values().last())
}

fn string(msg: &MessageValue, number: u64) -> Option<String>
{
    match last(msg, number)? {
        Value::String(s) => Some(String::from_utf8_lossy(s).into_owned()),
        _ => None,
    }
}

fn integer(msg: &MessageValue, number: u64) -> Option<i64>
{
    match last(msg, number)? {
        Value::Int32(i) => Some(i64::from(*i)),
        Value::Int64(i) => Some(*i),
        Value::Enum(e) => Some(e.value),
        _ => None,
    }
}

fn boolean(msg: &MessageValue, number: u64) -> Option<bool>
{
    match last(msg, number)? {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

fn messages(msg: &MessageValue, number: u64) -> impl Iterator<Item = &MessageValue>
{
    msg.fields
        .get(&number)
        .map(|f| f.values())
        .unwrap_or_default()
        .iter()
        .filter_map(|v| match v {
            Value::Message(m) => Some(&**m),
            _ => None,
        })
}
