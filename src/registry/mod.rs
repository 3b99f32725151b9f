//! Type registry built from schema descriptors.
//!
//! A [`TypeRegistry`] holds every message, enum and extension declared by a set of schema
//! files. It is built once per decode operation, either from the `.proto` text of the built-in
//! compiler schema or from the `FileDescriptorProto` messages embedded in a code generation
//! request, and is never modified afterwards.

use bytes::Bytes;
use snafu::Snafu;
use std::collections::{BTreeMap, HashMap};

mod api;
mod builder;
mod descriptor;
mod parse;

pub(crate) use builder::{PackageBuilder, RegistryBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct InternalRef(usize);

/// A reference to a message. Can be resolved to `MessageInfo` through a `TypeRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageRef(InternalRef);

/// A reference to an enum. Can be resolved to `EnumInfo` through a `TypeRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnumRef(InternalRef);

/// A reference to an extension. Can be resolved to `ExtensionInfo` through a `TypeRegistry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionRef(InternalRef);

/// A reference to a `oneof` within its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OneofRef(InternalRef);

/// Registry construction error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum DescriptorError
{
    /// Syntax error in a `.proto` source.
    #[snafu(display("Parsing error in '{}': {}", file, source))]
    SyntaxError
    {
        /// Name of the file that failed to parse.
        file: String,

        /// Source error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Two declarations share a fully qualified name.
    #[snafu(display("Duplicate type: {}", name))]
    DuplicateType
    {
        /// Type.
        name: String,
    },

    /// Unknown type reference.
    #[snafu(display("Unknown type '{}' in '{}'", name, context))]
    TypeNotFound
    {
        /// Type name.
        name: String,
        /// Declaration that referred to the unknown type.
        context: String,
    },

    /// Wrong kind of type used in a specific context.
    #[snafu(display(
        "Invalid type '{}' ({:?}) for {}, expected {:?}",
        type_name,
        actual,
        context,
        expected
    ))]
    InvalidTypeKind
    {
        /// Type that is of the wrong kind.
        type_name: String,

        /// The context where the type was used.
        context: &'static str,

        /// Expected item type.
        expected: ItemType,

        /// Actual item type.
        actual: ItemType,
    },

    /// Two extensions claim the same field number of one message.
    #[snafu(display("Extension number {} of '{}' is declared twice", number, extendee))]
    DuplicateExtension
    {
        /// Extended message.
        extendee: String,

        /// Field number.
        number: u64,
    },

    /// A descriptor message is missing required data or holds invalid data.
    #[snafu(display("Malformed descriptor '{}': {}", context, reason))]
    MalformedDescriptor
    {
        /// Declaration being read.
        context: String,

        /// What was wrong with it.
        reason: &'static str,
    },
}

/// Type reference that references either message or enum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeRef
{
    /// Message type reference.
    Message(MessageRef),

    /// Enum type reference.
    Enum(EnumRef),
}

/// Protobuf item type
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ItemType
{
    /// `message` item
    Message,

    /// `enum` item
    Enum,

    /// `extend` field
    Extension,
}

/// Schema language revision of a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syntax
{
    /// `syntax = "proto2"`, also used when the syntax is not declared.
    Proto2,

    /// `syntax = "proto3"`
    Proto3,

    /// `edition = "..."`
    Editions,
}

/// Run-time type registry.
///
/// Contains type information built from schema files. Required for decoding and encoding
/// dynamic messages. References handed out by a registry are only valid for that registry.
#[derive(Default, Debug, PartialEq)]
pub struct TypeRegistry
{
    types: Vec<TypeInfo>,
    types_by_name: HashMap<String, usize>,
    extensions: Vec<ExtensionInfo>,
    extensions_by_name: HashMap<String, usize>,
    extensions_by_number: HashMap<(MessageRef, u64), usize>,
}

/// Message or enum type.
#[derive(Debug, PartialEq)]
pub enum TypeInfo
{
    /// Message.
    Message(MessageInfo),

    /// Enum.
    Enum(EnumInfo),
}

/// Message details
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub struct MessageInfo
{
    /// Message name.
    pub name: String,

    /// Full message name, including package and parent type names.
    pub full_name: String,

    /// `MessageRef` that references this message.
    pub self_ref: MessageRef,

    /// `oneof` structures defined within the message.
    pub oneofs: Vec<Oneof>,

    /// References to the inner types defined within this message.
    pub inner_types: Vec<TypeRef>,

    /// True for the synthesized entry type of a `map<K, V>` field.
    pub map_entry: bool,

    // Using BTreeMap here to ensure ordering.
    fields: BTreeMap<u64, MessageField>,
    fields_by_name: BTreeMap<String, u64>,
    fields_by_json_name: BTreeMap<String, u64>,
}

/// Enum details
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub struct EnumInfo
{
    /// Enum name.
    pub name: String,

    /// Full enum name, including package and parent type names.
    pub full_name: String,

    /// `EnumRef` that references this enum.
    pub self_ref: EnumRef,

    fields_by_value: BTreeMap<i64, EnumField>,
    fields_by_name: BTreeMap<String, i64>,
}

/// Extension details.
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub struct ExtensionInfo
{
    /// Full extension name, including the scope it was declared in.
    pub full_name: String,

    /// `ExtensionRef` that references this extension.
    pub self_ref: ExtensionRef,

    /// The message this extension is attached to.
    pub extendee: MessageRef,

    /// Field layout of the extension.
    pub field: MessageField,
}

/// Message field details.
#[derive(Debug, PartialEq, Clone)]
#[non_exhaustive]
pub struct MessageField
{
    /// Field name.
    pub name: String,

    /// Field name in JSON.
    pub json_name: String,

    /// Field number.
    pub number: u64,

    /// Field type
    pub field_type: ValueType,

    /// Presence and repetition of the field.
    pub multiplicity: Multiplicity,

    /// Field options.
    pub options: Vec<ProtoOption>,

    /// Index to the ´oneof` structure in the parent type if this field is part of a `oneof`.
    pub oneof: Option<OneofRef>,

    /// True, if string values must be valid UTF-8.
    pub validate_utf8: bool,
}

/// Defines the multiplicity of the field values.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Multiplicity
{
    /// Field is not repeated and has no presence; the default value is never stored.
    Single,

    /// Field is not repeated and tracks presence.
    Optional,

    /// Field may be repeated.
    Repeated,

    /// Field is repeated by packing.
    RepeatedPacked,
}

/// Message `oneof` details.
#[derive(Debug, PartialEq)]
#[non_exhaustive]
pub struct Oneof
{
    /// Name of the `oneof` structure.
    pub name: String,

    /// Self reference of the `Oneof` in the owning type.
    pub self_ref: OneofRef,

    /// Field numbers of the fields contained in the `oneof`.
    pub fields: Vec<u64>,
}

/// Enum field details.
#[derive(Debug, PartialEq, Clone)]
#[non_exhaustive]
pub struct EnumField
{
    /// Enum field name.
    pub name: String,

    /// Enum field value.
    pub value: i64,

    /// Options.
    pub options: Vec<ProtoOption>,
}

/// Field value types.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueType
{
    /// `double`
    Double,

    /// `float`
    Float,

    /// `int32`
    Int32,

    /// `int64`
    Int64,

    /// `uint32`
    UInt32,

    /// `uint64`
    UInt64,

    /// `sint32`
    SInt32,

    /// `sint64`
    SInt64,

    /// `fixed32`
    Fixed32,

    /// `fixed64`
    Fixed64,

    /// `sfixed32`
    SFixed32,

    /// `sfixed64`
    SFixed64,

    /// `bool`
    Bool,

    /// `string`
    String,

    /// `bytes`
    Bytes,

    /// A message type.
    Message(MessageRef),

    /// A proto2 group, delimited by start and end group tags.
    Group(MessageRef),

    /// An enum type.
    Enum(EnumRef),
}

/// A single option.
#[derive(Debug, PartialEq, Clone)]
pub struct ProtoOption
{
    /// Option name.
    pub name: String,

    /// Option value.
    pub value: Constant,
}

/// Constant value, used for options.
#[derive(Debug, PartialEq, Clone)]
pub enum Constant
{
    /// An ident `foo.bar.baz`.
    Ident(String),

    /// An integer constant.
    Integer(i64),

    /// A floating point constant.
    Float(f64),

    /// A string constant.
    ///
    /// The string isn't guaranteed to be well formed UTF-8 so it's stored as
    /// Bytes here.
    String(Bytes),

    /// A boolean constant.
    Bool(bool),

    /// A message literal `{ ... }`, kept as source text.
    Aggregate(String),
}

impl TypeRegistry
{
    /// Builds a registry from `.proto` source text.
    ///
    /// Each item is a `(file name, source)` pair. The file name is only used in error messages.
    pub fn parse<T, N, S>(files: T) -> Result<Self, DescriptorError>
    where
        T: IntoIterator<Item = (N, S)>,
        N: AsRef<str>,
        S: AsRef<str>,
    {
        let packages = files
            .into_iter()
            .map(|(name, source)| PackageBuilder::parse_str(name.as_ref(), source.as_ref()))
            .collect::<Result<_, _>>()?;

        RegistryBuilder::new(packages).build()
    }

    /// Builds the registry of the built-in compiler schema.
    ///
    /// This is the statically known layout of the plugin request and response messages.
    pub fn bootstrap() -> Result<Self, DescriptorError>
    {
        RegistryBuilder::new(crate::schema::packages()?).build()
    }

    /// Builds a registry from decoded `FileDescriptorProto` messages.
    ///
    /// The `descriptors` must have been decoded with `schema`, a registry that knows the
    /// `google.protobuf` descriptor types. The built-in compiler schema is layered beneath the
    /// descriptors: a built-in declaration is used only where the descriptors do not declare
    /// the same fully qualified name themselves.
    pub fn from_descriptors(
        descriptors: &[crate::decode::MessageValue],
        schema: &TypeRegistry,
    ) -> Result<Self, DescriptorError>
    {
        let mut packages = descriptors
            .iter()
            .map(|file| PackageBuilder::from_descriptor(file, schema))
            .collect::<Result<Vec<_>, _>>()?;

        for mut builtin in crate::schema::packages()? {
            builtin.shadowable = true;
            packages.push(builtin);
        }

        RegistryBuilder::new(packages).build()
    }
}
