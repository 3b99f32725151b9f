//! Generic field access on dynamic messages.
//!
//! Every message, whatever its schema, is a [`MessageValue`]. The operations here give the
//! capabilities a generated message type would have (presence checks, getters, setters and field
//! enumeration) by consulting the message layout in a [`TypeRegistry`].

use crate::decode::*;
use crate::encode::EncodeError;
use crate::registry::*;

impl MessageValue
{
    /// Creates an empty message of the given type.
    pub fn new(msg_ref: MessageRef) -> Self
    {
        MessageValue {
            msg_ref,
            fields: Default::default(),
            extensions: Default::default(),
            unknown: vec![],
        }
    }

    /// True, if the field has a value.
    pub fn has_field(&self, number: u64) -> bool
    {
        self.fields.contains_key(&number)
    }

    /// Gets a field value by field number.
    pub fn get_field(&self, number: u64) -> Option<&FieldValue>
    {
        self.fields.get(&number)
    }

    /// Gets a field value by the proper field name.
    pub fn get_field_by_name(&self, name: &str, registry: &TypeRegistry) -> Option<&FieldValue>
    {
        let field = registry
            .resolve_message(self.msg_ref)
            .get_field_by_name(name)?;
        self.get_field(field.number)
    }

    /// Sets a field value, replacing the earlier value.
    ///
    /// The value must match the declared field type. Setting a `oneof` member clears the other
    /// members. Returns the replaced value.
    pub fn set_field(
        &mut self,
        number: u64,
        value: FieldValue,
        registry: &TypeRegistry,
    ) -> Result<Option<FieldValue>, EncodeError>
    {
        let info = registry.resolve_message(self.msg_ref);
        let field = info
            .get_field(number)
            .ok_or_else(|| EncodeError::UndeclaredField {
                message: info.full_name.clone(),
                number,
            })?;
        check_field(&info.full_name, field, &value, registry)?;

        if let Some(oneof) = field.oneof.and_then(|o| info.get_oneof(o)) {
            for other in oneof.fields.iter().filter(|n| **n != number) {
                self.fields.remove(other);
            }
        }
        Ok(self.fields.insert(number, value))
    }

    /// Removes a field value.
    pub fn clear_field(&mut self, number: u64) -> Option<FieldValue>
    {
        self.fields.remove(&number)
    }

    /// Iterates the set fields in field number order.
    pub fn iter_fields(&self) -> impl Iterator<Item = (u64, &FieldValue)>
    {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    /// Gets an extension value.
    pub fn get_extension(&self, ext: &ExtensionInfo) -> Option<&FieldValue>
    {
        self.extensions
            .get(&ext.field.number)
            .filter(|e| e.ext_ref == ext.self_ref)
            .map(|e| &e.value)
    }

    /// Gets an extension value by the full extension name.
    pub fn get_extension_by_name(
        &self,
        full_name: &str,
        registry: &TypeRegistry,
    ) -> Option<&FieldValue>
    {
        self.get_extension(registry.get_extension(full_name)?)
    }

    /// Attaches an extension value, replacing the earlier value.
    pub fn set_extension(
        &mut self,
        ext: &ExtensionInfo,
        value: FieldValue,
        registry: &TypeRegistry,
    ) -> Result<Option<FieldValue>, EncodeError>
    {
        if ext.extendee != self.msg_ref {
            return Err(EncodeError::DetachedExtension {
                extension: ext.full_name.clone(),
                message: registry.resolve_message(self.msg_ref).full_name.clone(),
            });
        }
        check_field(&ext.full_name, &ext.field, &value, registry)?;

        Ok(self
            .extensions
            .insert(
                ext.field.number,
                ExtensionValue {
                    ext_ref: ext.self_ref,
                    value,
                },
            )
            .map(|e| e.value))
    }

    /// Removes an extension value.
    pub fn clear_extension(&mut self, ext: &ExtensionInfo) -> Option<FieldValue>
    {
        match self.get_extension(ext) {
            Some(_) => self.extensions.remove(&ext.field.number).map(|e| e.value),
            None => None,
        }
    }
}

/// Checks that `value` fits the layout of `field`.
///
/// `owner` names the message or extension in errors.
pub(crate) fn check_field(
    owner: &str,
    field: &MessageField,
    value: &FieldValue,
    registry: &TypeRegistry,
) -> Result<(), EncodeError>
{
    let values = match (value, field.is_repeated()) {
        (FieldValue::Single(v), false) => std::slice::from_ref(v),
        (FieldValue::Repeated(v), true) => &v[..],
        (_, repeated) => {
            return Err(EncodeError::ArityMismatch {
                message: owner.to_string(),
                field: field.name.clone(),
                repeated,
            })
        }
    };

    for v in values {
        check_value(owner, field, v, registry)?;
    }
    Ok(())
}

fn check_value(
    owner: &str,
    field: &MessageField,
    value: &Value,
    registry: &TypeRegistry,
) -> Result<(), EncodeError>
{
    let fits = match (&field.field_type, value) {
        (ValueType::Double, Value::Double(..))
        | (ValueType::Float, Value::Float(..))
        | (ValueType::Int32, Value::Int32(..))
        | (ValueType::Int64, Value::Int64(..))
        | (ValueType::UInt32, Value::UInt32(..))
        | (ValueType::UInt64, Value::UInt64(..))
        | (ValueType::SInt32, Value::SInt32(..))
        | (ValueType::SInt64, Value::SInt64(..))
        | (ValueType::Fixed32, Value::Fixed32(..))
        | (ValueType::Fixed64, Value::Fixed64(..))
        | (ValueType::SFixed32, Value::SFixed32(..))
        | (ValueType::SFixed64, Value::SFixed64(..))
        | (ValueType::Bool, Value::Bool(..))
        | (ValueType::String, Value::String(..))
        | (ValueType::Bytes, Value::Bytes(..)) => true,
        (ValueType::Enum(expected), Value::Enum(e)) => *expected == e.enum_ref,
        (ValueType::Message(expected), Value::Message(m))
        | (ValueType::Group(expected), Value::Message(m)) => {
            if *expected != m.msg_ref {
                return Err(EncodeError::ForeignMessage {
                    field: field.name.clone(),
                    expected: registry.resolve_message(*expected).full_name.clone(),
                    actual: registry.resolve_message(m.msg_ref).full_name.clone(),
                });
            }
            true
        }
        _ => false,
    };

    match fits {
        true => Ok(()),
        false => Err(EncodeError::TypeMismatch {
            message: owner.to_string(),
            field: field.name.clone(),
            expected: field.field_type.clone(),
        }),
    }
}

/// The value an unset field reads as.
pub fn default_value(vt: &ValueType) -> Value
{
    match vt {
        ValueType::Double => Value::Double(0.0),
        ValueType::Float => Value::Float(0.0),
        ValueType::Int32 => Value::Int32(0),
        ValueType::Int64 => Value::Int64(0),
        ValueType::UInt32 => Value::UInt32(0),
        ValueType::UInt64 => Value::UInt64(0),
        ValueType::SInt32 => Value::SInt32(0),
        ValueType::SInt64 => Value::SInt64(0),
        ValueType::Fixed32 => Value::Fixed32(0),
        ValueType::Fixed64 => Value::Fixed64(0),
        ValueType::SFixed32 => Value::SFixed32(0),
        ValueType::SFixed64 => Value::SFixed64(0),
        ValueType::Bool => Value::Bool(false),
        ValueType::String => Value::String(Default::default()),
        ValueType::Bytes => Value::Bytes(Default::default()),
        ValueType::Message(m) | ValueType::Group(m) => Value::Message(Box::new(MessageValue::new(*m))),
        ValueType::Enum(e) => Value::Enum(EnumValue {
            enum_ref: *e,
            value: 0,
        }),
    }
}

#[cfg(test)]
mod test
{
    use super::*;
    use bytes::Bytes;

    fn registry() -> TypeRegistry
    {
        TypeRegistry::parse(vec![(
            "r.proto",
            r#"
            syntax = "proto2";
            package r;
            message M {
                optional string name = 1;
                repeated int32 values = 2;
                oneof kind {
                    int32 a = 3;
                    string b = 4;
                }
                optional M child = 5;
                extensions 100 to 200;
            }
            message Other {}
            extend M { optional int32 tag = 100; }
            extend Other { optional int32 foreign = 100; }
        "#,
        )])
        .unwrap()
    }

    #[test]
    fn set_get_clear()
    {
        let reg = registry();
        let mut msg = MessageValue::new(reg.get_message("r.M").unwrap().self_ref);

        let name = FieldValue::Single(Value::String(Bytes::from_static(b"x")));
        assert_eq!(msg.set_field(1, name.clone(), &reg).unwrap(), None);
        assert!(msg.has_field(1));
        assert_eq!(msg.get_field_by_name("name", &reg), Some(&name));

        assert_eq!(msg.clear_field(1), Some(name));
        assert!(!msg.has_field(1));
    }

    #[test]
    fn set_checks_layout()
    {
        let reg = registry();
        let mut msg = MessageValue::new(reg.get_message("r.M").unwrap().self_ref);
        let other = reg.get_message("r.Other").unwrap().self_ref;

        assert!(matches!(
            msg.set_field(1, FieldValue::Single(Value::Int32(1)), &reg),
            Err(EncodeError::TypeMismatch { .. })
        ));
        assert!(matches!(
            msg.set_field(2, FieldValue::Single(Value::Int32(1)), &reg),
            Err(EncodeError::ArityMismatch { repeated: true, .. })
        ));
        assert!(matches!(
            msg.set_field(9, FieldValue::Single(Value::Int32(1)), &reg),
            Err(EncodeError::UndeclaredField { number: 9, .. })
        ));
        assert!(matches!(
            msg.set_field(
                5,
                FieldValue::Single(Value::Message(Box::new(MessageValue::new(other)))),
                &reg
            ),
            Err(EncodeError::ForeignMessage { .. })
        ));
    }

    #[test]
    fn oneof_members_replace_each_other()
    {
        let reg = registry();
        let mut msg = MessageValue::new(reg.get_message("r.M").unwrap().self_ref);

        msg.set_field(3, FieldValue::Single(Value::Int32(1)), &reg)
            .unwrap();
        msg.set_field(
            4,
            FieldValue::Single(Value::String(Bytes::from_static(b"b"))),
            &reg,
        )
        .unwrap();

        let set: Vec<_> = msg.iter_fields().map(|(n, _)| n).collect();
        assert_eq!(set, vec![4]);
    }

    #[test]
    fn extensions()
    {
        let reg = registry();
        let mut msg = MessageValue::new(reg.get_message("r.M").unwrap().self_ref);
        let tag = reg.get_extension("r.tag").unwrap();
        let foreign = reg.get_extension("r.foreign").unwrap();

        msg.set_extension(tag, FieldValue::Single(Value::Int32(7)), &reg)
            .unwrap();
        assert_eq!(
            msg.get_extension_by_name("r.tag", &reg),
            Some(&FieldValue::Single(Value::Int32(7)))
        );
        assert_eq!(msg.get_extension(foreign), None);
        assert!(matches!(
            msg.set_extension(foreign, FieldValue::Single(Value::Int32(7)), &reg),
            Err(EncodeError::DetachedExtension { .. })
        ));

        assert_eq!(
            msg.clear_extension(tag),
            Some(FieldValue::Single(Value::Int32(7)))
        );
        assert!(msg.extensions.is_empty());
    }
}
