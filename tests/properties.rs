mod common;

use common::*;
use proptest::prelude::*;
use protocapture::pipeline::{self, Error, Form, Options};
use protocapture::{FieldValue, MessageValue, TypeRegistry, Value, ValueType};

fn unwrapped(input_form: Form, output_form: Form) -> Options
{
    Options {
        input_form,
        output_form,
        wrap: false,
        ..Options::default()
    }
}

fn arb_field() -> impl Strategy<Value = (u64, u64)>
{
    (
        prop_oneof![Just(LABEL_OPTIONAL), Just(LABEL_REPEATED)],
        prop_oneof![Just(TYPE_INT32), Just(TYPE_BOOL), Just(TYPE_STRING)],
    )
}

fn arb_file(index: usize) -> impl Strategy<Value = Wire>
{
    (
        prop_oneof![Just("proto2"), Just("proto3")],
        prop::collection::vec(prop::collection::vec(arb_field(), 0..4), 0..3),
    )
        .prop_map(move |(syntax, messages)| {
            messages.into_iter().enumerate().fold(
                file(&format!("f{}.proto", index), &format!("p{}", index), syntax),
                |f, (m, fields)| {
                    let fields = fields
                        .into_iter()
                        .enumerate()
                        .map(|(i, (label, field_type))| {
                            field(&format!("f{}", i), i as u64 + 1, label, field_type)
                        })
                        .collect();
                    f.message(4, message(&format!("M{}", m), fields))
                },
            )
        })
}

fn arb_request() -> impl Strategy<Value = Vec<u8>>
{
    (
        prop::collection::vec("[a-z/]{1,8}\\.proto", 0..3),
        prop::option::of(prop_oneof![
            "[ -~]{0,16}".prop_map(String::into_bytes),
            prop::collection::vec(any::<u8>(), 0..16),
        ]),
        prop::option::of((any::<i32>(), any::<i32>(), "[a-z0-9]{0,4}")),
        0usize..3,
    )
        .prop_flat_map(|(targets, parameter, version, file_count)| {
            let files: Vec<_> = (0..file_count).map(arb_file).collect();
            (Just(targets), Just(parameter), Just(version), files)
        })
        .prop_map(|(targets, parameter, version, files)| {
            let mut req = Wire::new();
            for target in &targets {
                req = req.string(1, target);
            }
            if let Some(parameter) = parameter {
                req = req.bytes(2, &parameter);
            }
            if let Some((major, minor, suffix)) = version {
                req = req.message(
                    3,
                    Wire::new()
                        .varint(1, major as i64 as u64)
                        .varint(2, minor as i64 as u64)
                        .string(4, &suffix),
                );
            }
            files
                .into_iter()
                .fold(req, |r, f| r.message(15, f))
                .finish()
        })
}

proptest! {
    #[test]
    fn binary_output_is_deterministic(data in arb_request())
    {
        let options = unwrapped(Form::Binary, Form::Binary);
        let first = pipeline::run(&data, &options).unwrap();
        let second = pipeline::run(&data, &options).unwrap();
        prop_assert_eq!(&first, &second);

        // Re-encoding the output is a fixed point.
        prop_assert_eq!(pipeline::run(&first, &options).unwrap(), first);
    }

    #[test]
    fn text_and_binary_agree(data in arb_request())
    {
        let binary = pipeline::run(&data, &unwrapped(Form::Binary, Form::Binary)).unwrap();
        let text = match pipeline::run(&data, &unwrapped(Form::Binary, Form::Text)) {
            Ok(text) => text,

            // Strings that are not UTF-8 have no JSON form.
            Err(Error::Marshal { form: Form::Text, .. }) => return Ok(()),
            Err(e) => return Err(TestCaseError::fail(e.to_string())),
        };

        prop_assert_eq!(
            pipeline::run(&text, &unwrapped(Form::Text, Form::Binary)).unwrap(),
            pipeline::run(&binary, &unwrapped(Form::Binary, Form::Binary)).unwrap()
        );
        prop_assert_eq!(
            pipeline::run(&text, &unwrapped(Form::Text, Form::Text)).unwrap(),
            text
        );
    }

    #[test]
    fn map_order_does_not_change_output(
        entries in prop::collection::btree_map("[a-z]{0,6}", any::<i32>(), 0..8),
        values in prop::collection::vec(any::<i64>(), 0..8),
    )
    {
        let registry = TypeRegistry::parse(vec![(
            "m.proto",
            "syntax = \"proto3\"; message M { map<string, int32> m = 1; repeated sint64 v = 2; }",
        )])
        .unwrap();
        let m = registry.get_message("M").unwrap();
        let entry_ref = match m.get_field(1).unwrap().field_type {
            ValueType::Message(e) => e,
            _ => unreachable!(),
        };

        let build = |entries: Vec<(&String, &i32)>| {
            let entries = entries
                .into_iter()
                .map(|(k, v)| {
                    let mut entry = MessageValue::new(entry_ref);
                    entry.fields.insert(1, FieldValue::Single(Value::String(k.clone().into())));
                    entry.fields.insert(2, FieldValue::Single(Value::Int32(*v)));
                    Value::Message(Box::new(entry))
                })
                .collect();

            let mut msg = MessageValue::new(m.self_ref);
            msg.set_field(1, FieldValue::Repeated(entries), &registry).unwrap();
            msg.set_field(
                2,
                FieldValue::Repeated(values.iter().map(|v| Value::SInt64(*v)).collect()),
                &registry,
            )
            .unwrap();
            msg
        };

        let forward = build(entries.iter().collect());
        let backward = build(entries.iter().rev().collect());
        let bytes = forward.encode(&registry).unwrap();
        prop_assert_eq!(&bytes, &backward.encode(&registry).unwrap());

        // Decoding keeps the sorted order, so it matches the forward message.
        let decoded = m.decode(&bytes, &registry).unwrap();
        let mut expected = forward;
        if entries.is_empty() {
            expected.clear_field(1);
        }
        if values.is_empty() {
            expected.clear_field(2);
        }
        prop_assert_eq!(decoded, expected);
    }
}
