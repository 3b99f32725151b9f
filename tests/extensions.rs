mod common;

use common::*;
use protocapture::plugin::{self, MessageKind};
use protocapture::{
    json, DescriptorError, Decoder, FieldValue, MessageValue, TypeRegistry, UnknownField,
    UnknownValue, Value,
};

fn registry_of(files: Vec<Wire>) -> Result<TypeRegistry, DescriptorError>
{
    let bootstrap = TypeRegistry::bootstrap().unwrap();
    let file_type = bootstrap
        .get_message("google.protobuf.FileDescriptorProto")
        .unwrap();
    let descriptors: Vec<_> = files
        .into_iter()
        .map(|f| file_type.decode(&f.finish(), &bootstrap).unwrap())
        .collect();
    TypeRegistry::from_descriptors(&descriptors, &bootstrap)
}

fn first_message(msg: &MessageValue, number: u64) -> &MessageValue
{
    match msg.get_field(number).map(|f| f.values()) {
        Some([Value::Message(m), ..]) => &**m,
        v => panic!("No message in field {}: {:?}", number, v),
    }
}

#[test]
fn extension_needs_registry()
{
    let registry = registry_of(vec![extension_file()]).unwrap();
    let n = registry.get_message("t.N").unwrap().self_ref;
    let payload = Wire::new().varint(1, 7).string(100, "hello").finish();

    let resolved = Decoder::new(&registry)
        .resolve_extensions(true)
        .decode(n, &payload)
        .unwrap();
    assert_eq!(
        resolved.get_extension_by_name("t.ext", &registry),
        Some(&FieldValue::Single(Value::String("hello".into())))
    );
    assert!(resolved.unknown.is_empty());

    let text = String::from_utf8(json::encode(&resolved, &registry).unwrap()).unwrap();
    assert_eq!(text, "{\n\t\"id\": 7,\n\t\"[t.ext]\": \"hello\"\n}");

    let generic = Decoder::new(&registry).decode(n, &payload).unwrap();
    assert!(generic.extensions.is_empty());
    assert_eq!(
        generic.unknown,
        vec![UnknownField {
            number: 100,
            value: UnknownValue::VariableLength("hello".into()),
        }]
    );

    let text = String::from_utf8(json::encode(&generic, &registry).unwrap()).unwrap();
    assert!(!text.contains("hello"), "{}", text);
    assert!(!text.contains("t.ext"), "{}", text);

    // Both forms carry the same data on the wire.
    assert_eq!(
        resolved.encode(&registry).unwrap(),
        generic.encode(&registry).unwrap()
    );
    assert_eq!(&resolved.encode(&registry).unwrap()[..], &payload[..]);
}

#[test]
fn extension_text_roundtrip()
{
    let registry = registry_of(vec![extension_file()]).unwrap();
    let n = registry.get_message("t.N").unwrap().self_ref;

    let msg = json::decode(n, br#"{"[t.ext]": "hello"}"#, &registry).unwrap();
    assert_eq!(
        msg.get_extension_by_name("t.ext", &registry),
        Some(&FieldValue::Single(Value::String("hello".into())))
    );
    assert_eq!(&msg.encode(&registry).unwrap()[..], b"\xa2\x06\x05hello");
    assert!(matches!(
        json::decode(n, br#"{"[t.ext]": "a", "[t.ext]": "b"}"#, &registry),
        Err(json::JsonError::DuplicateField { .. })
    ));

    // The extension does not extend the request.
    let request = registry
        .get_message(plugin::REQUEST_TYPE)
        .unwrap()
        .self_ref;
    assert!(matches!(
        json::decode(request, br#"{"[t.ext]": "hello"}"#, &registry),
        Err(json::JsonError::UnknownField { .. })
    ));
}

#[test]
fn request_extension_two_pass()
{
    let file = file("t.proto", "t", "proto2").message(
        7,
        extension(
            "marker",
            100,
            TYPE_STRING,
            ".google.protobuf.compiler.CodeGeneratorRequest",
        ),
    );
    let data = request(vec![file]).string(100, "hello").finish();

    let decoded = plugin::decode_request(&data).unwrap();
    assert_eq!(
        decoded
            .value
            .get_extension_by_name("t.marker", &decoded.registry),
        Some(&FieldValue::Single(Value::String("hello".into())))
    );
    let text = String::from_utf8(json::encode(&decoded.value, &decoded.registry).unwrap()).unwrap();
    assert!(text.contains("\"[t.marker]\": \"hello\""), "{}", text);

    let generic = plugin::decode_static(MessageKind::Request, &data).unwrap();
    assert!(generic.value.extensions.is_empty());
    assert_eq!(generic.value.unknown.len(), 1);
    let text = String::from_utf8(json::encode(&generic.value, &generic.registry).unwrap()).unwrap();
    assert!(!text.contains("[t.marker]"), "{}", text);
}

#[test]
fn custom_field_option()
{
    let mut option_field = field("f", 1, LABEL_OPTIONAL, TYPE_INT32);
    option_field = option_field.message(8, Wire::new().string(50000, "x"));

    let file = file("opts.proto", "opts", "proto3")
        .message(4, message("M", vec![option_field]))
        .message(
            7,
            extension("label", 50000, TYPE_STRING, ".google.protobuf.FieldOptions"),
        );
    let data = request(vec![file]).finish();

    let decoded = plugin::decode_request(&data).unwrap();
    let options = first_message(
        first_message(first_message(first_message(&decoded.value, 15), 4), 2),
        8,
    );
    assert_eq!(
        options.get_extension_by_name("opts.label", &decoded.registry),
        Some(&FieldValue::Single(Value::String("x".into())))
    );
    assert!(options.unknown.is_empty());

    // The first pass leaves it as unknown data.
    let generic = plugin::decode_static(MessageKind::Request, &data).unwrap();
    let options = first_message(
        first_message(first_message(first_message(&generic.value, 15), 4), 2),
        8,
    );
    assert!(options.extensions.is_empty());
    assert_eq!(options.unknown[0].number, 50000);
}

#[test]
fn nested_extension_scope()
{
    let outer = message("Outer", vec![]).message(6, extension("inner", 101, TYPE_BOOL, ".t.N"));
    let registry = registry_of(vec![extension_file().message(4, outer)]).unwrap();

    let inner = registry.get_extension("t.Outer.inner").unwrap();
    assert_eq!(inner.extendee, registry.get_message("t.N").unwrap().self_ref);
    assert_eq!(inner.field.number, 101);
    assert_eq!(registry.extensions_of(inner.extendee).count(), 2);
    assert!(registry
        .find_extension(inner.extendee, 100)
        .map(|e| e.full_name == "t.ext")
        .unwrap_or(false));
}

#[test]
fn descriptor_errors()
{
    let twice = || file("a.proto", "t", "proto2").message(4, message("N", vec![]));
    match registry_of(vec![twice(), twice()]) {
        Err(DescriptorError::DuplicateType { name }) => assert_eq!(name, "t.N"),
        r => panic!("Unexpected result {:?}", r.map(|_| ())),
    }

    let dangling = file("d.proto", "d", "proto2").message(7, extension("x", 1, TYPE_INT32, ".d.Nope"));
    assert!(matches!(
        registry_of(vec![dangling]),
        Err(DescriptorError::TypeNotFound { .. })
    ));

    let duplicate = extension_file().message(7, extension("again", 100, TYPE_INT32, ".t.N"));
    assert!(matches!(
        registry_of(vec![duplicate]),
        Err(DescriptorError::DuplicateExtension { number: 100, .. })
    ));

    let unnamed = file("u.proto", "u", "proto2").message(4, Wire::new());
    assert!(matches!(
        registry_of(vec![unnamed]),
        Err(DescriptorError::MalformedDescriptor { .. })
    ));
}

#[test]
fn descriptors_shadow_builtin_schema()
{
    // A request built by protoc carries its own copy of descriptor.proto.
    let own = file("google/protobuf/descriptor.proto", "google.protobuf", "proto2").message(
        4,
        message(
            "FileDescriptorProto",
            vec![field("name", 1, LABEL_OPTIONAL, TYPE_STRING)],
        ),
    );
    let registry = registry_of(vec![own]).unwrap();

    let file_type = registry
        .get_message("google.protobuf.FileDescriptorProto")
        .unwrap();
    assert_eq!(file_type.iter_fields().count(), 1);

    // The built-in plugin schema refers to the shadowing declaration.
    let request = registry.get_message(plugin::REQUEST_TYPE).unwrap();
    let proto_file = request.get_field_by_name("proto_file").unwrap();
    assert_eq!(
        proto_file.field_type,
        protocapture::ValueType::Message(file_type.self_ref)
    );
}
