#![allow(dead_code)]

use bytes::{BufMut, BytesMut};

pub const LABEL_OPTIONAL: u64 = 1;
pub const LABEL_REPEATED: u64 = 3;

pub const TYPE_INT32: u64 = 5;
pub const TYPE_BOOL: u64 = 8;
pub const TYPE_STRING: u64 = 9;
pub const TYPE_MESSAGE: u64 = 11;
pub const TYPE_ENUM: u64 = 14;

/// Wire format message builder.
#[derive(Default, Clone, Debug)]
pub struct Wire(BytesMut);

impl Wire
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn varint(mut self, number: u64, value: u64) -> Self
    {
        put_varint(&mut self.0, number << 3);
        put_varint(&mut self.0, value);
        self
    }

    pub fn bytes(mut self, number: u64, value: &[u8]) -> Self
    {
        put_varint(&mut self.0, number << 3 | 2);
        put_varint(&mut self.0, value.len() as u64);
        self.0.put_slice(value);
        self
    }

    pub fn string(self, number: u64, value: &str) -> Self
    {
        self.bytes(number, value.as_bytes())
    }

    pub fn message(self, number: u64, msg: Wire) -> Self
    {
        self.bytes(number, &msg.0)
    }

    pub fn raw(mut self, data: &[u8]) -> Self
    {
        self.0.put_slice(data);
        self
    }

    pub fn finish(self) -> Vec<u8>
    {
        self.0.to_vec()
    }
}

fn put_varint(buf: &mut BytesMut, mut value: u64)
{
    while value >= 0x80 {
        buf.put_u8(value as u8 | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// `FileDescriptorProto` with a name, package and syntax.
pub fn file(name: &str, package: &str, syntax: &str) -> Wire
{
    Wire::new()
        .string(1, name)
        .string(2, package)
        .string(12, syntax)
}

/// `FieldDescriptorProto` of a scalar field.
pub fn field(name: &str, number: u64, label: u64, field_type: u64) -> Wire
{
    Wire::new()
        .string(1, name)
        .varint(3, number)
        .varint(4, label)
        .varint(5, field_type)
}

/// `FieldDescriptorProto` of a message or enum field.
pub fn typed_field(name: &str, number: u64, label: u64, field_type: u64, type_name: &str)
    -> Wire
{
    field(name, number, label, field_type).string(6, type_name)
}

/// `FieldDescriptorProto` of an extension.
pub fn extension(name: &str, number: u64, field_type: u64, extendee: &str) -> Wire
{
    field(name, number, LABEL_OPTIONAL, field_type).string(2, extendee)
}

/// `DescriptorProto` with the given fields.
pub fn message(name: &str, fields: Vec<Wire>) -> Wire
{
    fields
        .into_iter()
        .fold(Wire::new().string(1, name), |m, f| m.message(2, f))
}

/// A proto2 file declaring `t.N` and the string extension `t.ext = 100` of `t.N`.
pub fn extension_file() -> Wire
{
    file("t.proto", "t", "proto2")
        .message(
            4,
            message("N", vec![field("id", 1, LABEL_OPTIONAL, TYPE_INT32)])
                // extension_range { start: 100, end: 201 }
                .message(5, Wire::new().varint(1, 100).varint(2, 201)),
        )
        .message(7, extension("ext", 100, TYPE_STRING, ".t.N"))
}

/// `CodeGeneratorRequest` holding the given descriptors.
pub fn request(files: Vec<Wire>) -> Wire
{
    files.into_iter().fold(
        Wire::new().string(1, "t.proto").string(2, "paths=source_relative"),
        |r, f| r.message(15, f),
    )
}
