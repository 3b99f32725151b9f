use super::*;

impl TypeRegistry
{
    /// Gets type info by name.
    pub fn get_type(&self, full_name: &str) -> Option<&TypeInfo>
    {
        self.types_by_name
            .get(full_name)
            .map(|idx| &self.types[*idx])
    }

    /// Gets a message type info by name.
    pub fn get_message(&self, full_name: &str) -> Option<&MessageInfo>
    {
        match self.get_type(full_name) {
            Some(TypeInfo::Message(m)) => Some(m),
            _ => None,
        }
    }

    /// Gets an enum type info by name.
    pub fn get_enum(&self, full_name: &str) -> Option<&EnumInfo>
    {
        match self.get_type(full_name) {
            Some(TypeInfo::Enum(e)) => Some(e),
            _ => None,
        }
    }

    /// Gets an extension by its full name.
    pub fn get_extension(&self, full_name: &str) -> Option<&ExtensionInfo>
    {
        self.extensions_by_name
            .get(full_name)
            .map(|idx| &self.extensions[*idx])
    }

    /// Finds the extension with the given field number on the extended message.
    pub fn find_extension(&self, extendee: MessageRef, number: u64) -> Option<&ExtensionInfo>
    {
        self.extensions_by_number
            .get(&(extendee, number))
            .map(|idx| &self.extensions[*idx])
    }

    /// Iterates all extensions attached to the given message.
    pub fn extensions_of(&self, extendee: MessageRef) -> impl Iterator<Item = &ExtensionInfo>
    {
        self.extensions
            .iter()
            .filter(move |e| e.extendee == extendee)
    }

    /// Number of message and enum types.
    pub fn type_count(&self) -> usize
    {
        self.types.len()
    }

    /// Number of extensions.
    pub fn extension_count(&self) -> usize
    {
        self.extensions.len()
    }

    fn resolve_type(&self, tr: InternalRef) -> Option<&TypeInfo>
    {
        self.types.get(tr.0)
    }

    /// Resolves a message reference.
    ///
    /// Will **panic** if the message defined by the `MessageRef` does not exist in this registry.
    /// Such panic means the `MessageRef` came from a different registry. The panic is not
    /// guaranteed, as a message with an equal `MessageRef` may exist in multiple registries.
    pub fn resolve_message(&self, tr: MessageRef) -> &MessageInfo
    {
        match self.resolve_type(tr.0) {
            Some(TypeInfo::Message(msg)) => msg,
            _ => panic!("Message did not exist in this registry"),
        }
    }

    /// Resolves a enum reference.
    ///
    /// Will **panic** if the enum defined by the `EnumRef` does not exist in this registry.
    pub fn resolve_enum(&self, tr: EnumRef) -> &EnumInfo
    {
        match self.resolve_type(tr.0) {
            Some(TypeInfo::Enum(e)) => e,
            _ => panic!("Enum did not exist in this registry"),
        }
    }

    /// Resolves an extension reference.
    ///
    /// Will **panic** if the extension does not exist in this registry.
    pub fn resolve_extension(&self, er: ExtensionRef) -> &ExtensionInfo
    {
        &self.extensions[er.0 .0]
    }
}

impl TypeInfo
{
    /// Get the name of the type.
    pub fn name(&self) -> &str
    {
        match self {
            TypeInfo::Message(m) => &m.name,
            TypeInfo::Enum(e) => &e.name,
        }
    }

    /// Get the full name of the type.
    pub fn full_name(&self) -> &str
    {
        match self {
            TypeInfo::Message(m) => &m.full_name,
            TypeInfo::Enum(e) => &e.full_name,
        }
    }
}

impl MessageInfo
{
    /// Iterates all message fields.
    pub fn iter_fields(&self) -> impl Iterator<Item = &MessageField>
    {
        self.fields.values()
    }

    /// Get a field by its number.
    pub fn get_field(&self, number: u64) -> Option<&MessageField>
    {
        self.fields.get(&number)
    }

    /// Get a field by its name.
    pub fn get_field_by_name(&self, name: &str) -> Option<&MessageField>
    {
        self.fields_by_name
            .get(name)
            .and_then(|id| self.get_field(*id))
    }

    /// Get a field by its JSON name.
    pub fn get_field_by_json_name(&self, name: &str) -> Option<&MessageField>
    {
        self.fields_by_json_name
            .get(name)
            .and_then(|id| self.get_field(*id))
    }

    /// Gets a oneof by a oneof reference.
    pub fn get_oneof(&self, oneof: OneofRef) -> Option<&Oneof>
    {
        self.oneofs.iter().find(|oo| oo.self_ref == oneof)
    }
}

impl EnumInfo
{
    /// Gets a field by value.
    ///
    /// If the value is aliased, the first declared name is returned.
    pub fn get_field_by_value(&self, value: i64) -> Option<&EnumField>
    {
        self.fields_by_value.get(&value)
    }

    /// Gets a field by name.
    pub fn get_field_by_name(&self, name: &str) -> Option<&EnumField>
    {
        self.fields_by_name
            .get(name)
            .and_then(|v| self.fields_by_value.get(v))
    }
}

impl MessageField
{
    /// True, if the field holds a sequence of values.
    pub fn is_repeated(&self) -> bool
    {
        matches!(
            self.multiplicity,
            Multiplicity::Repeated | Multiplicity::RepeatedPacked
        )
    }
}

impl ValueType
{
    pub(crate) fn wire_type(&self) -> u8
    {
        match self {
            Self::Double => 1,
            Self::Float => 5,
            Self::Int32 => 0,
            Self::Int64 => 0,
            Self::UInt32 => 0,
            Self::UInt64 => 0,
            Self::SInt32 => 0,
            Self::SInt64 => 0,
            Self::Fixed32 => 5,
            Self::Fixed64 => 1,
            Self::SFixed32 => 5,
            Self::SFixed64 => 1,
            Self::Bool => 0,
            Self::String => 2,
            Self::Bytes => 2,
            Self::Message(..) => 2,
            Self::Group(..) => 3,
            Self::Enum(..) => 0,
        }
    }

    /// True for the scalar types that may use the packed repeated encoding.
    pub(crate) fn is_packable(&self) -> bool
    {
        !matches!(
            self,
            Self::String | Self::Bytes | Self::Message(..) | Self::Group(..)
        )
    }

    /// Parses a scalar type name in `.proto` syntax.
    pub(crate) fn from_builtin(name: &str) -> Option<Self>
    {
        Some(match name {
            "double" => Self::Double,
            "float" => Self::Float,
            "int32" => Self::Int32,
            "int64" => Self::Int64,
            "uint32" => Self::UInt32,
            "uint64" => Self::UInt64,
            "sint32" => Self::SInt32,
            "sint64" => Self::SInt64,
            "fixed32" => Self::Fixed32,
            "fixed64" => Self::Fixed64,
            "sfixed32" => Self::SFixed32,
            "sfixed64" => Self::SFixed64,
            "bool" => Self::Bool,
            "string" => Self::String,
            "bytes" => Self::Bytes,
            _ => return None,
        })
    }
}
