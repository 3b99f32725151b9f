use clap::{ArgAction, Parser};
use protocapture::pipeline::{self, Form, Options};
use protocapture::plugin::MessageKind;
use tracing::error;

const USAGE: &str = "\
Call it as a protoc plugin to capture code generation requests:
  protoc --capture_out=. ...
  will create a file out.proto.msg in the current directory.

To support usage as a plugin, --wrap is true by default.
Unset it if you do not want to convert input requests to responses,
like when you intend to pipe it to test your plugin.

Test a plugin independent of protoc (result as json):
  < cgreq.proto.msg \\
  PLUGIN \\
  | protoc-gen-capture --req-in=false --wrap=false --json-out \\
  > generation-response.json

Convert the code generation request to json:
  < cgreq.proto.msg \\
  protoc-gen-capture --wrap=false --json-out \\
  > generation-request.json

This enables you to diff results of various program versions.

NOTE:
This program might not be lossless. It always decodes and re-encodes.
Unknown message parts are not visible in json and might get dropped.

Decoding of responses is shallow. Included files, even if they are
protobuf messages, are not decoded.";

/// Support capture, replaying and manipulation of protoc requests.
#[derive(Parser, Debug)]
#[command(name = "protoc-gen-capture", version, after_help = USAGE)]
struct Args
{
    /// Only if wrap is true: file name inside the code generator response
    #[arg(long, value_name = "NAME", default_value = pipeline::DEFAULT_ARTIFACT_NAME)]
    file: String,

    /// Input is json, else binary proto
    #[arg(long)]
    json_in: bool,

    /// Output is json, else deterministic binary proto
    #[arg(long)]
    json_out: bool,

    /// Input is a request, not a response
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    req_in: bool,

    /// Wrap the output in a response as a single file
    #[arg(long, value_name = "BOOL", default_value_t = true, action = ArgAction::Set)]
    wrap: bool,

    /// Log debug details to stderr
    #[arg(short, long)]
    verbose: bool,
}

impl Args
{
    fn options(&self) -> Options
    {
        let form = |json| match json {
            true => Form::Text,
            false => Form::Binary,
        };

        Options {
            message_kind: match self.req_in {
                true => MessageKind::Request,
                false => MessageKind::Response,
            },
            input_form: form(self.json_in),
            output_form: form(self.json_out),
            wrap: self.wrap,
            artifact_name: self.file.clone(),
        }
    }
}

fn main()
{
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(match args.verbose {
            true => tracing::Level::DEBUG,
            false => tracing::Level::WARN,
        })
        .init();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    if let Err(e) = pipeline::run_io(stdin.lock(), stdout.lock(), &args.options()) {
        error!("{}", e);
        std::process::exit(1);
    }
}
