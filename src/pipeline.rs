//! The capture pipeline.
//!
//! One input is read in full, decoded, encoded and optionally wrapped into a plugin response.
//! Output is buffered until every stage has succeeded, so a failed run writes nothing.

use snafu::{ResultExt, Snafu};
use std::io::{Read, Write};
use tracing::debug;

use crate::decode::MessageValue;
use crate::plugin::{self, DecodedMessage, MessageKind, PluginSchema};
use crate::registry::{DescriptorError, TypeRegistry};

/// Artifact name used when wrapping, unless one is given.
pub const DEFAULT_ARTIFACT_NAME: &str = "out.proto.msg";

/// Serialized form of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form
{
    /// Protobuf wire format.
    Binary,

    /// Proto JSON.
    Text,
}

impl std::fmt::Display for Form
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self {
            Form::Binary => write!(f, "proto"),
            Form::Text => write!(f, "json"),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options
{
    /// Kind of the input message.
    pub message_kind: MessageKind,

    /// Form of the input.
    pub input_form: Form,

    /// Form of the output.
    pub output_form: Form,

    /// Embed the output in a plugin response as a single file.
    pub wrap: bool,

    /// File name of the embedded output when wrapping.
    pub artifact_name: String,
}

impl Default for Options
{
    fn default() -> Self
    {
        Options {
            message_kind: MessageKind::Request,
            input_form: Form::Binary,
            output_form: Form::Binary,
            wrap: true,
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
        }
    }
}

/// Pipeline error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error
{
    /// The input could not be read.
    #[snafu(display("Input could not be read: {}", source))]
    InputRead
    {
        /// Source error.
        source: std::io::Error,
    },

    /// The input is not a valid message of the selected kind and form.
    #[snafu(display("{} {} unmarshal error: {}", form, kind, source))]
    Parse
    {
        /// Input form.
        form: Form,

        /// Input message kind.
        kind: MessageKind,

        /// Source error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The descriptors embedded in a request are malformed.
    #[snafu(display("Descriptor error: {}", source))]
    Descriptor
    {
        /// Source error.
        source: DescriptorError,
    },

    /// The decoded message could not be encoded.
    #[snafu(display("{} marshal error: {}", form, source))]
    Marshal
    {
        /// Output form.
        form: Form,

        /// Source error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The wrapping response could not be encoded.
    #[snafu(display("Code generation response error: {}", source))]
    Wrap
    {
        /// Source error.
        source: Box<Error>,
    },

    /// The output could not be written.
    #[snafu(display("Output error: {}", source))]
    OutputWrite
    {
        /// Source error.
        source: std::io::Error,
    },
}

/// Runs the pipeline over an in-memory input.
pub fn run(input: &[u8], options: &Options) -> Result<Vec<u8>, Error>
{
    debug!(
        bytes = input.len(),
        kind = %options.message_kind,
        form = %options.input_form,
        "Decoding input"
    );
    let decoded = decode(input, options)?;

    let out = encode(&decoded.value, &decoded.registry, options.output_form)?;
    debug!(bytes = out.len(), form = %options.output_form, "Encoded message");
    if !options.wrap {
        return Ok(out);
    }

    let schema = PluginSchema::resolve(&decoded.registry).context(Descriptor)?;
    let response = schema.wrap(out, &options.artifact_name);
    let out = encode(&response, &decoded.registry, options.output_form)
        .map_err(|e| Error::Wrap { source: Box::new(e) })?;
    debug!(bytes = out.len(), name = %options.artifact_name, "Wrapped message");
    Ok(out)
}

/// Reads all of `input`, runs the pipeline and writes the result to `output`.
///
/// Nothing is written if any stage fails.
pub fn run_io<R: Read, W: Write>(mut input: R, mut output: W, options: &Options)
    -> Result<(), Error>
{
    let mut data = Vec::new();
    input.read_to_end(&mut data).context(InputRead)?;

    let out = run(&data, options)?;
    output.write_all(&out).context(OutputWrite)?;
    output.flush().context(OutputWrite)
}

fn decode(input: &[u8], options: &Options) -> Result<DecodedMessage, Error>
{
    let kind = options.message_kind;
    let form = options.input_form;
    let parse = |e: Box<dyn std::error::Error + Send + Sync>| Error::Parse {
        form,
        kind,
        source: e,
    };

    let request = |decoded: Result<DecodedMessage, plugin::RequestError>| match decoded {
        Ok(decoded) => Ok(decoded),
        Err(plugin::RequestError::Descriptors { source }) => Err(Error::Descriptor { source }),
        Err(e) => Err(parse(e.into())),
    };

    match (form, kind) {
        (Form::Binary, MessageKind::Request) => request(plugin::decode_request(input)),
        (Form::Text, MessageKind::Request) => request(plugin::decode_request_text(input)),
        (Form::Binary, MessageKind::Response) => {
            plugin::decode_static(kind, input).map_err(|e| parse(e.into()))
        }
        (Form::Text, MessageKind::Response) => {
            let registry = TypeRegistry::bootstrap().context(Descriptor)?;
            let msg_ref = PluginSchema::resolve(&registry)
                .context(Descriptor)?
                .message(kind);
            let value =
                crate::json::decode(msg_ref, input, &registry).map_err(|e| parse(e.into()))?;
            Ok(DecodedMessage { registry, value })
        }
    }
}

fn encode(msg: &MessageValue, registry: &TypeRegistry, form: Form) -> Result<Vec<u8>, Error>
{
    let out: Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>> = match form {
        Form::Binary => msg.encode(registry).map(|b| b.to_vec()).map_err(|e| e.into()),
        Form::Text => crate::json::encode(msg, registry).map_err(|e| e.into()),
    };
    out.map_err(|source| Error::Marshal { form, source })
}
