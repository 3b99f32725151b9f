//! Compiler plugin messages.
//!
//! A code generation request carries the descriptors of every file it mentions. Those
//! descriptors may declare extensions that are set in the request itself, for example custom
//! options on a field. Resolving them takes two passes over the same input: the first decodes
//! with the built-in compiler schema only and recovers the descriptors, the second decodes
//! again with a registry built from them. Requests in proto JSON form are read the same way.

use bytes::Bytes;
use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::decode::*;
use crate::json::{JsonDecoder, JsonError};
use crate::registry::*;

/// Full name of the plugin request message.
pub const REQUEST_TYPE: &str = "google.protobuf.compiler.CodeGeneratorRequest";

/// Full name of the plugin response message.
pub const RESPONSE_TYPE: &str = "google.protobuf.compiler.CodeGeneratorResponse";

/// `CodeGeneratorResponse.Feature.FEATURE_PROTO3_OPTIONAL`
pub const FEATURE_PROTO3_OPTIONAL: u64 = 1;

/// Field numbers of `CodeGeneratorRequest`.
pub mod request
{
    /// `file_to_generate`
    pub const FILE_TO_GENERATE: u64 = 1;
    /// `parameter`
    pub const PARAMETER: u64 = 2;
    /// `compiler_version`
    pub const COMPILER_VERSION: u64 = 3;
    /// `proto_file`
    pub const PROTO_FILE: u64 = 15;
    /// `source_file_descriptors`
    pub const SOURCE_FILE_DESCRIPTORS: u64 = 17;
}

/// Field numbers of `CodeGeneratorResponse`.
pub mod response
{
    /// `error`
    pub const ERROR: u64 = 1;
    /// `supported_features`
    pub const SUPPORTED_FEATURES: u64 = 2;
    /// `minimum_edition`
    pub const MINIMUM_EDITION: u64 = 3;
    /// `maximum_edition`
    pub const MAXIMUM_EDITION: u64 = 4;
    /// `file`
    pub const FILE: u64 = 15;

    /// Field numbers of `CodeGeneratorResponse.File`.
    pub mod file
    {
        /// `name`
        pub const NAME: u64 = 1;
        /// `insertion_point`
        pub const INSERTION_POINT: u64 = 2;
        /// `content`
        pub const CONTENT: u64 = 15;
        /// `generated_code_info`
        pub const GENERATED_CODE_INFO: u64 = 16;
    }
}

/// The two plugin message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind
{
    /// `CodeGeneratorRequest`, sent by the compiler to the plugin.
    Request,

    /// `CodeGeneratorResponse`, sent by the plugin to the compiler.
    Response,
}

impl MessageKind
{
    /// Full name of the message type.
    pub fn type_name(self) -> &'static str
    {
        match self {
            MessageKind::Request => REQUEST_TYPE,
            MessageKind::Response => RESPONSE_TYPE,
        }
    }
}

impl std::fmt::Display for MessageKind
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self {
            MessageKind::Request => write!(f, "request"),
            MessageKind::Response => write!(f, "response"),
        }
    }
}

/// Error decoding a code generation request.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum RequestError
{
    /// The request is not valid wire data.
    #[snafu(display("Invalid request in pass {}: {}", pass, source))]
    Wire
    {
        /// Decoding pass, 1 or 2.
        pass: u8,

        /// Source error.
        source: DecodeError,
    },

    /// The request is not valid proto JSON.
    #[snafu(display("Invalid JSON request in pass {}: {}", pass, source))]
    Text
    {
        /// Decoding pass, 1 or 2.
        pass: u8,

        /// Source error.
        source: JsonError,
    },

    /// The embedded descriptors could not be turned into a registry.
    #[snafu(display("Invalid descriptors: {}", source))]
    Descriptors
    {
        /// Source error.
        source: DescriptorError,
    },
}

/// Handles to the plugin messages within one registry.
#[derive(Debug, Clone, Copy)]
pub struct PluginSchema
{
    /// `CodeGeneratorRequest`
    pub request: MessageRef,

    /// `CodeGeneratorResponse`
    pub response: MessageRef,

    /// `CodeGeneratorResponse.File`
    pub response_file: MessageRef,
}

impl PluginSchema
{
    /// Looks up the plugin messages.
    ///
    /// Every registry built by this crate layers the built-in compiler schema underneath, so a
    /// lookup only fails if a descriptor replaced one of the messages with an enum.
    pub fn resolve(registry: &TypeRegistry) -> Result<Self, DescriptorError>
    {
        let find = |name: &str| {
            registry
                .get_message(name)
                .map(|m| m.self_ref)
                .ok_or_else(|| DescriptorError::TypeNotFound {
                    name: name.to_string(),
                    context: "plugin schema".to_string(),
                })
        };

        Ok(PluginSchema {
            request: find(REQUEST_TYPE)?,
            response: find(RESPONSE_TYPE)?,
            response_file: find("google.protobuf.compiler.CodeGeneratorResponse.File")?,
        })
    }

    /// Handle to the message of the given kind.
    pub fn message(&self, kind: MessageKind) -> MessageRef
    {
        match kind {
            MessageKind::Request => self.request,
            MessageKind::Response => self.response,
        }
    }

    /// Builds a response holding `content` as its only file.
    ///
    /// The response advertises proto3 `optional` support, as a plugin would.
    pub fn wrap(&self, content: impl Into<Bytes>, name: &str) -> MessageValue
    {
        let mut file = MessageValue::new(self.response_file);
        file.fields.insert(
            response::file::NAME,
            FieldValue::Single(Value::String(Bytes::copy_from_slice(name.as_bytes()))),
        );
        file.fields.insert(
            response::file::CONTENT,
            FieldValue::Single(Value::String(content.into())),
        );

        let mut msg = MessageValue::new(self.response);
        msg.fields.insert(
            response::SUPPORTED_FEATURES,
            FieldValue::Single(Value::UInt64(FEATURE_PROTO3_OPTIONAL)),
        );
        msg.fields.insert(
            response::FILE,
            FieldValue::Repeated(vec![Value::Message(Box::new(file))]),
        );
        msg
    }
}

/// A decoded message together with the registry it was decoded against.
#[derive(Debug)]
pub struct DecodedMessage
{
    /// The registry the message references point into.
    pub registry: TypeRegistry,

    /// The message.
    pub value: MessageValue,
}

/// Decodes a code generation request with its extensions resolved.
pub fn decode_request(data: &[u8]) -> Result<DecodedMessage, RequestError>
{
    let bootstrap = TypeRegistry::bootstrap().context(Descriptors)?;
    let request_ref = PluginSchema::resolve(&bootstrap)
        .context(Descriptors)?
        .request;

    // Pass 1: known fields only. Extensions stay unknown.
    let first = Decoder::new(&bootstrap)
        .decode(request_ref, data)
        .context(Wire { pass: 1u8 })?;
    let registry = request_registry(first, &bootstrap)?;

    // Pass 2: from scratch, resolving the extensions the descriptors declare.
    let request_ref = PluginSchema::resolve(&registry)
        .context(Descriptors)?
        .request;
    let value = Decoder::new(&registry)
        .resolve_extensions(true)
        .decode(request_ref, data)
        .context(Wire { pass: 2u8 })?;
    debug!(
        unknown = value.unknown.len(),
        extensions = value.extensions.len(),
        "Decoded request"
    );

    Ok(DecodedMessage { registry, value })
}

/// Decodes a code generation request in proto JSON form with its extensions resolved.
pub fn decode_request_text(data: &[u8]) -> Result<DecodedMessage, RequestError>
{
    let bootstrap = TypeRegistry::bootstrap().context(Descriptors)?;
    let request_ref = PluginSchema::resolve(&bootstrap)
        .context(Descriptors)?
        .request;

    // Pass 1: extension keys are skipped.
    let first = JsonDecoder::new(&bootstrap)
        .resolve_extensions(false)
        .decode(request_ref, data)
        .context(Text { pass: 1u8 })?;
    let registry = request_registry(first, &bootstrap)?;

    let request_ref = PluginSchema::resolve(&registry)
        .context(Descriptors)?
        .request;
    let value = JsonDecoder::new(&registry)
        .decode(request_ref, data)
        .context(Text { pass: 2u8 })?;
    debug!(extensions = value.extensions.len(), "Decoded JSON request");

    Ok(DecodedMessage { registry, value })
}

/// Builds the registry of the descriptors in a first-pass request.
fn request_registry(mut first: MessageValue, bootstrap: &TypeRegistry)
    -> Result<TypeRegistry, RequestError>
{
    let descriptors: Vec<MessageValue> = match first.fields.remove(&request::PROTO_FILE) {
        Some(FieldValue::Repeated(files)) => files
            .into_iter()
            .filter_map(|v| match v {
                Value::Message(m) => Some(*m),
                _ => None,
            })
            .collect(),
        _ => vec![],
    };
    debug!(files = descriptors.len(), "Read request descriptors");

    let registry = TypeRegistry::from_descriptors(&descriptors, bootstrap).context(Descriptors)?;
    debug!(
        types = registry.type_count(),
        extensions = registry.extension_count(),
        "Built request registry"
    );
    Ok(registry)
}

/// Decodes a message of either kind against the built-in compiler schema only.
pub fn decode_static(kind: MessageKind, data: &[u8]) -> Result<DecodedMessage, RequestError>
{
    let registry = TypeRegistry::bootstrap().context(Descriptors)?;
    let msg_ref = PluginSchema::resolve(&registry)
        .context(Descriptors)?
        .message(kind);
    let value = Decoder::new(&registry)
        .decode(msg_ref, data)
        .context(Wire { pass: 1u8 })?;
    Ok(DecodedMessage { registry, value })
}

#[cfg(test)]
mod test
{
    use super::*;

    #[test]
    fn wrap_layout()
    {
        let reg = TypeRegistry::bootstrap().unwrap();
        let schema = PluginSchema::resolve(&reg).unwrap();
        let msg = schema.wrap(&b"\x00\xff"[..], "foo.msg");

        assert_eq!(
            msg.get_field(response::SUPPORTED_FEATURES),
            Some(&FieldValue::Single(Value::UInt64(1)))
        );

        let files = msg.get_field(response::FILE).unwrap().values();
        assert_eq!(files.len(), 1);
        let file = match &files[0] {
            Value::Message(m) => m,
            v => panic!("Unexpected value {:?}", v),
        };
        assert_eq!(
            file.get_field_by_name("name", &reg),
            Some(&FieldValue::Single(Value::String(Bytes::from_static(
                b"foo.msg"
            ))))
        );
        assert_eq!(
            file.get_field_by_name("content", &reg),
            Some(&FieldValue::Single(Value::String(Bytes::from_static(
                b"\x00\xff"
            ))))
        );

        // The content field is a proto2 string, so binary content encodes as is.
        assert!(msg.encode(&reg).is_ok());
    }

    #[test]
    fn empty_request()
    {
        let decoded = decode_request(b"").unwrap();
        assert!(decoded.value.fields.is_empty());
        assert_eq!(
            decoded.registry.resolve_message(decoded.value.msg_ref).full_name,
            REQUEST_TYPE
        );
    }

    #[test]
    fn truncated_request()
    {
        match decode_request(b"\x7a\x05ab") {
            Err(RequestError::Wire { pass: 1, .. }) => {}
            r => panic!("Unexpected result {:?}", r),
        }
    }

    #[test]
    fn text_request()
    {
        let decoded = decode_request_text(br#"{"parameter": "x", "[a.b]": 1}"#);
        match decoded {
            Err(RequestError::Text { pass: 2, .. }) => {}
            r => panic!("Unexpected result {:?}", r),
        }

        match decode_request_text(b"{") {
            Err(RequestError::Text { pass: 1, .. }) => {}
            r => panic!("Unexpected result {:?}", r),
        }

        let decoded = decode_request_text(br#"{"parameter": "x"}"#).unwrap();
        assert_eq!(
            decoded.value.get_field(request::PARAMETER),
            Some(&FieldValue::Single(Value::String(Bytes::from_static(b"x"))))
        );
    }

    #[test]
    fn static_response()
    {
        let decoded = decode_static(MessageKind::Response, b"\x0a\x03bad").unwrap();
        assert_eq!(
            decoded.value.get_field(response::ERROR),
            Some(&FieldValue::Single(Value::String(Bytes::from_static(b"bad"))))
        );
    }
}
