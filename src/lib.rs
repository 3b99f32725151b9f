//!
//! Protocapture captures, replays and converts the messages a protobuf compiler exchanges with
//! its code generator plugins. The messages are handled as dynamic values: their layout comes
//! from a [`TypeRegistry`] built at run time, either from `.proto` text or from the file
//! descriptors that a code generation request carries.
//!
//! ```
//! use protocapture::{FieldValue, TypeRegistry, Value};
//!
//! let registry = TypeRegistry::parse(vec![(
//!     "fish.proto",
//!     r#"
//!   syntax = "proto3";
//!   package Proto;
//!
//!   message Request { string kind = 1; int32 distance = 2; }
//! "#,
//! )])
//! .unwrap();
//!
//! let request = registry.get_message("Proto.Request").unwrap();
//! let value = request.decode(b"\x10\xa9\x46\x0a\x05Perch", &registry).unwrap();
//! assert_eq!(
//!     value.get_field_by_name("kind", &registry),
//!     Some(&FieldValue::Single(Value::String("Perch".into())))
//! );
//! assert_eq!(value.get_field(2), Some(&FieldValue::Single(Value::Int32(9001))));
//!
//! // Re-encoding orders the fields by number.
//! let bytes = value.encode(&registry).unwrap();
//! assert_eq!(&bytes[..], b"\x0a\x05Perch\x10\xa9\x46");
//! ```
//!
//! A captured code generation request is decoded with [`plugin::decode_request`], which resolves
//! the extensions declared by the descriptors inside the request. The [`pipeline`] puts decoding,
//! encoding and response wrapping together the way the `protoc-gen-capture` binary uses them.
#![warn(missing_docs)]
#![allow(clippy::match_bool)]

pub mod decode;
pub mod encode;
pub mod json;
pub mod pipeline;
pub mod plugin;
pub mod reflect;
pub mod registry;
pub mod schema;

pub use decode::{
    DecodeError, Decoder, EnumValue, ExtensionValue, FieldValue, MessageValue, UnknownField,
    UnknownValue, Value,
};
pub use encode::EncodeError;
pub use json::JsonError;
pub use registry::{
    DescriptorError, EnumInfo, ExtensionInfo, MessageField, MessageInfo, MessageRef,
    Multiplicity, TypeRegistry, ValueType,
};
