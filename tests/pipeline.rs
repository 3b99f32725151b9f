mod common;

use common::*;
use protocapture::pipeline::{self, Error, Form, Options};
use protocapture::plugin::{self, response, MessageKind};
use protocapture::{FieldValue, Value};

fn unwrapped(output_form: Form) -> Options
{
    Options {
        wrap: false,
        output_form,
        ..Options::default()
    }
}

fn sample_request() -> Vec<u8>
{
    let file = extension_file().message(
        4,
        message(
            "Holder",
            vec![typed_field("n", 1, LABEL_REPEATED, TYPE_MESSAGE, ".t.N")],
        ),
    );
    request(vec![file])
        .message(3, Wire::new().varint(1, 3).varint(2, 21).string(4, "rc1"))
        .finish()
}

#[test]
fn request_roundtrips_unwrapped()
{
    let data = sample_request();
    let out = pipeline::run(&data, &unwrapped(Form::Binary)).unwrap();

    // Fields are already in number order except compiler_version, which is moved ahead.
    let again = pipeline::run(&out, &unwrapped(Form::Binary)).unwrap();
    assert_eq!(out, again);
    assert_eq!(out.len(), data.len());
}

#[test]
fn wrap_binary()
{
    let data = sample_request();
    let inner = pipeline::run(&data, &unwrapped(Form::Binary)).unwrap();
    let out = pipeline::run(&data, &Options::default()).unwrap();

    let decoded = plugin::decode_static(MessageKind::Response, &out).unwrap();
    let resp = &decoded.value;
    assert_eq!(
        resp.get_field(response::SUPPORTED_FEATURES),
        Some(&FieldValue::Single(Value::UInt64(
            plugin::FEATURE_PROTO3_OPTIONAL
        )))
    );

    let files = resp.get_field(response::FILE).unwrap().values();
    assert_eq!(files.len(), 1);
    let file = match &files[0] {
        Value::Message(file) => file,
        v => panic!("Unexpected value {:?}", v),
    };
    assert_eq!(
        file.get_field(response::file::NAME),
        Some(&FieldValue::Single(Value::String("out.proto.msg".into())))
    );
    assert_eq!(
        file.get_field(response::file::CONTENT),
        Some(&FieldValue::Single(Value::String(inner.into())))
    );
}

#[test]
fn wrap_text()
{
    let data = sample_request();
    let options = Options {
        output_form: Form::Text,
        artifact_name: "foo.msg".to_string(),
        ..Options::default()
    };
    let inner = pipeline::run(&data, &unwrapped(Form::Text)).unwrap();
    let out = pipeline::run(&data, &options).unwrap();

    let json: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(json["supported_features"], "1");
    assert_eq!(json["file"].as_array().unwrap().len(), 1);
    assert_eq!(json["file"][0]["name"], "foo.msg");
    assert_eq!(
        json["file"][0]["content"].as_str().unwrap().as_bytes(),
        &inner[..]
    );
}

#[test]
fn text_input()
{
    let data = sample_request();
    let text = pipeline::run(&data, &unwrapped(Form::Text)).unwrap();

    let options = Options {
        input_form: Form::Text,
        ..unwrapped(Form::Binary)
    };
    assert_eq!(
        pipeline::run(&text, &options).unwrap(),
        pipeline::run(&data, &unwrapped(Form::Binary)).unwrap()
    );
}

#[test]
fn response_passthrough()
{
    let data = Wire::new()
        .string(1, "bad input")
        .varint(2, 1)
        .message(15, Wire::new().string(1, "a.rs").string(15, "fn main() {}"))
        .finish();
    let options = Options {
        message_kind: MessageKind::Response,
        wrap: false,
        ..Options::default()
    };
    assert_eq!(pipeline::run(&data, &options).unwrap(), data);

    let options = Options {
        output_form: Form::Text,
        ..options
    };
    let text = String::from_utf8(pipeline::run(&data, &options).unwrap()).unwrap();
    assert_eq!(
        text,
        "{\n\t\"error\": \"bad input\",\n\t\"supported_features\": \"1\",\n\t\"file\": [\n\t\t{\n\t\t\t\"name\": \"a.rs\",\n\t\t\t\"content\": \"fn main() {}\"\n\t\t}\n\t]\n}"
    );
}

#[test]
fn malformed_input_writes_nothing()
{
    let inputs: &[&[u8]] = &[
        // Length past the end.
        b"\x7a\x05ab",
        // Wire type 7.
        b"\x0f",
        // Truncated varint.
        b"\x10\x80",
        // Field number 0.
        b"\x00\x01",
    ];

    for input in inputs {
        for message_kind in [MessageKind::Request, MessageKind::Response] {
            let options = Options {
                message_kind,
                ..Options::default()
            };
            let mut out = vec![];
            match pipeline::run_io(*input, &mut out, &options) {
                Err(Error::Parse {
                    form: Form::Binary,
                    kind,
                    ..
                }) => assert_eq!(kind, message_kind),
                r => panic!("Unexpected result {:?} for {:?}", r, input),
            }
            assert!(out.is_empty());
        }
    }

    let texts: &[&[u8]] = &[
        br#"{"file_to_generate": 1}"#,
        // The same key twice.
        br#"{"parameter": "a", "parameter": "b"}"#,
    ];
    for text in texts {
        for message_kind in [MessageKind::Request, MessageKind::Response] {
            let options = Options {
                message_kind,
                input_form: Form::Text,
                ..Options::default()
            };
            let mut out = vec![];
            match pipeline::run_io(*text, &mut out, &options) {
                Err(Error::Parse {
                    form: Form::Text, ..
                }) => {}
                r => panic!("Unexpected result {:?} for {:?}", r, text),
            }
            assert!(out.is_empty());
        }
    }
}

#[test]
fn non_utf8_strings_have_no_text_form()
{
    // `parameter` is a proto2 string, so the binary form accepts any bytes.
    let data = Wire::new()
        .string(1, "t.proto")
        .bytes(2, b"a\xffb")
        .finish();
    assert_eq!(pipeline::run(&data, &unwrapped(Form::Binary)).unwrap(), data);

    for wrap in [false, true] {
        let options = Options {
            output_form: Form::Text,
            wrap,
            ..Options::default()
        };
        let mut out = vec![];
        match pipeline::run_io(&data[..], &mut out, &options) {
            Err(Error::Marshal {
                form: Form::Text, ..
            }) => {}
            r => panic!("Unexpected result {:?}", r),
        }
        assert!(out.is_empty());
    }
}

#[test]
fn text_input_resolves_request_extensions()
{
    let option_field =
        field("f", 1, LABEL_OPTIONAL, TYPE_INT32).message(8, Wire::new().string(50000, "x"));
    let file = file("opts.proto", "opts", "proto2")
        .message(4, message("M", vec![option_field]))
        .message(
            7,
            extension("label", 50000, TYPE_STRING, ".google.protobuf.FieldOptions"),
        )
        .message(
            7,
            extension(
                "marker",
                100,
                TYPE_STRING,
                ".google.protobuf.compiler.CodeGeneratorRequest",
            ),
        );
    let data = request(vec![file]).string(100, "hello").finish();

    let text = pipeline::run(&data, &unwrapped(Form::Text)).unwrap();
    let rendered = String::from_utf8(text.clone()).unwrap();
    assert!(rendered.contains("\"[opts.label]\": \"x\""), "{}", rendered);
    assert!(rendered.contains("\"[opts.marker]\": \"hello\""), "{}", rendered);

    let options = Options {
        input_form: Form::Text,
        ..unwrapped(Form::Binary)
    };
    assert_eq!(
        pipeline::run(&text, &options).unwrap(),
        pipeline::run(&data, &unwrapped(Form::Binary)).unwrap()
    );

    let options = Options {
        input_form: Form::Text,
        ..unwrapped(Form::Text)
    };
    assert_eq!(pipeline::run(&text, &options).unwrap(), text);
}

#[test]
fn malformed_descriptors()
{
    let file = file("d.proto", "d", "proto2").message(7, extension("x", 1, TYPE_INT32, ".d.Nope"));
    let data = request(vec![file]).finish();

    let mut out = vec![];
    assert!(matches!(
        pipeline::run_io(&data[..], &mut out, &Options::default()),
        Err(Error::Descriptor { .. })
    ));
    assert!(out.is_empty());
}

#[test]
fn run_io_writes_output()
{
    let data = sample_request();
    let mut out = vec![];
    pipeline::run_io(&data[..], &mut out, &Options::default()).unwrap();
    assert_eq!(out, pipeline::run(&data, &Options::default()).unwrap());
}
