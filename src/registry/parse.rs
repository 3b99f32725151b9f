use bytes::{BufMut, Bytes, BytesMut};
use pest::{iterators::Pair, iterators::Pairs, Parser};
use snafu::ResultExt;
use std::iter::Peekable;

use super::builder::*;
use super::*;

#[derive(pest_derive::Parser)]
#[grammar = "proto.pest"]
struct ProtoParser;

type ParseError = Box<dyn std::error::Error + Send + Sync>;

const MAX_FIELD_NUMBER: u64 = (1 << 29) - 1;

impl PackageBuilder
{
    /// Parses one `.proto` source file.
    pub fn parse_str(file: &str, input: &str) -> Result<Self, DescriptorError>
    {
        let input = input.strip_prefix('\u{FEFF}').unwrap_or(input);
        Self::parse_proto(file, input).context(SyntaxError { file })
    }

    fn parse_proto(file: &str, input: &str) -> Result<Self, ParseError>
    {
        let pairs = ProtoParser::parse(Rule::proto, input)?;
        let mut current = PackageBuilder::new(file);
        for pair in pairs {
            for inner in pair.into_inner() {
                match inner.as_rule() {
                    Rule::syntax => {
                        let value = parse_string_literal(first(inner))?;
                        current.syntax = match &value[..] {
                            b"proto2" => Syntax::Proto2,
                            b"proto3" => Syntax::Proto3,
                            _ => {
                                return Err(format!(
                                    "Unsupported syntax '{}'",
                                    String::from_utf8_lossy(&value)
                                )
                                .into())
                            }
                        };
                    }
                    Rule::edition => current.syntax = Syntax::Editions,
                    Rule::package => current.name = Some(first(inner).as_str().to_string()),
                    Rule::topLevelDef => {
                        let def = first(inner);
                        match def.as_rule() {
                            Rule::message => current
                                .types
                                .push(ProtobufTypeBuilder::Message(MessageBuilder::parse(def)?)),
                            Rule::enum_ => current
                                .types
                                .push(ProtobufTypeBuilder::Enum(EnumBuilder::parse(def)?)),
                            Rule::extend => current.extensions.append(&mut parse_extend(def)?),
                            Rule::service => {}
                            r => unreachable!("{:?}: {:?}", r, def),
                        }
                    }
                    Rule::import | Rule::option | Rule::emptyStatement | Rule::EOI => {}
                    r => unreachable!("{:?}: {:?}", r, inner),
                }
            }
        }

        Ok(current)
    }
}

impl MessageBuilder
{
    fn parse(p: Pair<Rule>) -> Result<Self, ParseError>
    {
        let mut inner = p.into_inner();
        let name = next(&mut inner).as_str().to_string();
        Self::parse_body(name, next(&mut inner))
    }

    fn parse_body(name: String, body: Pair<Rule>) -> Result<Self, ParseError>
    {
        let mut message = MessageBuilder {
            name,
            ..Default::default()
        };

        for p in body.into_inner() {
            match p.as_rule() {
                Rule::field => message.fields.push(FieldBuilder::parse(p)?),
                Rule::message => message
                    .inner_types
                    .push(ProtobufTypeBuilder::Message(MessageBuilder::parse(p)?)),
                Rule::enum_ => message
                    .inner_types
                    .push(ProtobufTypeBuilder::Enum(EnumBuilder::parse(p)?)),
                Rule::extend => message.extensions.append(&mut parse_extend(p)?),
                Rule::oneof => message.oneofs.push(OneofBuilder::parse(p)?),
                Rule::mapField => {
                    let (field, entry) = FieldBuilder::parse_map(p)?;
                    message.fields.push(field);
                    message
                        .inner_types
                        .push(ProtobufTypeBuilder::Message(entry));
                }
                Rule::group => {
                    let (field, group) = FieldBuilder::parse_group(p)?;
                    message.fields.push(field);
                    message
                        .inner_types
                        .push(ProtobufTypeBuilder::Message(group));
                }
                Rule::option => {
                    let option = ProtoOption::parse(p)?;
                    if option.name == "map_entry" {
                        message.map_entry = option.value == Constant::Bool(true);
                    }
                }
                Rule::extensions | Rule::reserved | Rule::emptyStatement => {}
                r => unreachable!("{:?}: {:?}", r, p),
            }
        }

        Ok(message)
    }
}

impl EnumBuilder
{
    fn parse(p: Pair<Rule>) -> Result<Self, ParseError>
    {
        let mut inner = p.into_inner();
        let name = next(&mut inner).as_str().to_string();

        let mut fields = vec![];
        let body = next(&mut inner);
        for p in body.into_inner() {
            match p.as_rule() {
                Rule::enumField => {
                    let mut inner = p.into_inner().peekable();
                    let name = next(&mut inner).as_str().to_string();
                    let value = parse_int_literal(next(&mut inner))?;
                    if i32::try_from(value).is_err() {
                        return Err(format!("Enum value {} out of range", value).into());
                    }
                    fields.push(EnumField {
                        name,
                        value,
                        options: ProtoOption::parse_options(&mut inner)?,
                    })
                }
                Rule::option | Rule::reserved | Rule::emptyStatement => {}
                r => unreachable!("{:?}: {:?}", r, p),
            }
        }

        Ok(EnumBuilder { name, fields })
    }
}

impl FieldBuilder
{
    fn parse(p: Pair<Rule>) -> Result<Self, ParseError>
    {
        let mut inner = p.into_inner().peekable();
        let label = match inner.peek().map(|p| p.as_rule()) {
            Some(Rule::label) => match next(&mut inner).as_str() {
                "optional" => Label::Optional,
                "required" => Label::Required,
                "repeated" => Label::Repeated,
                l => unreachable!("Label {}", l),
            },
            _ => Label::None,
        };
        Self::parse_rest(label, &mut inner)
    }

    fn parse_oneof(p: Pair<Rule>) -> Result<Self, ParseError>
    {
        Self::parse_rest(Label::None, &mut p.into_inner().peekable())
    }

    /// Parses `type name = number [options]` following the label.
    fn parse_rest(label: Label, inner: &mut Peekable<Pairs<Rule>>)
        -> Result<Self, ParseError>
    {
        let field_type = parse_field_type(next(inner).as_str());
        let name = next(inner).as_str();
        let number = parse_field_number(next(inner))?;

        let mut field = FieldBuilder::new(name, number, label, field_type);
        field.options = ProtoOption::parse_options(inner)?;
        field.json_name = field
            .options
            .iter()
            .find(|o| o.name == "json_name")
            .and_then(|o| match &o.value {
                Constant::String(s) => Some(String::from_utf8_lossy(s).into_owned()),
                _ => None,
            });

        Ok(field)
    }

    /// Parses a `map<K, V>` field into the repeated field and its synthesized entry message.
    fn parse_map(p: Pair<Rule>) -> Result<(Self, MessageBuilder), ParseError>
    {
        let mut inner = p.into_inner().peekable();
        let key_type = parse_field_type(next(&mut inner).as_str());
        let value_type = parse_field_type(next(&mut inner).as_str());
        let name = next(&mut inner).as_str();
        let number = parse_field_number(next(&mut inner))?;

        let entry_name = map_entry_name(name);
        let entry = MessageBuilder {
            name: entry_name.clone(),
            fields: vec![
                FieldBuilder::new("key", 1, Label::Optional, key_type),
                FieldBuilder::new("value", 2, Label::Optional, value_type),
            ],
            map_entry: true,
            ..Default::default()
        };

        let mut field = FieldBuilder::new(
            name,
            number,
            Label::Repeated,
            FieldTypeBuilder::Unknown(entry_name),
        );
        field.options = ProtoOption::parse_options(&mut inner)?;

        Ok((field, entry))
    }
}

impl FieldBuilder
{
    /// Parses a proto2 `group` into its field and the message type it declares.
    fn parse_group(p: Pair<Rule>) -> Result<(Self, MessageBuilder), ParseError>
    {
        let mut inner = p.into_inner().peekable();
        let label = match next(&mut inner).as_str() {
            "optional" => Label::Optional,
            "required" => Label::Required,
            _ => Label::Repeated,
        };
        let type_name = next(&mut inner).as_str().to_string();
        let number = parse_field_number(next(&mut inner))?;

        let mut field = FieldBuilder::new(
            &type_name.to_lowercase(),
            number,
            label,
            FieldTypeBuilder::Group(type_name.clone()),
        );
        field.options = ProtoOption::parse_options(&mut inner)?;

        let group = MessageBuilder::parse_body(type_name, next(&mut inner))?;
        Ok((field, group))
    }
}

impl OneofBuilder
{
    fn parse(p: Pair<Rule>) -> Result<Self, ParseError>
    {
        let mut inner = p.into_inner();
        let name = next(&mut inner).as_str().to_string();
        let mut fields = vec![];
        for p in inner {
            match p.as_rule() {
                Rule::oneofField => fields.push(FieldBuilder::parse_oneof(p)?),
                Rule::option | Rule::emptyStatement => {}
                r => unreachable!("{:?}: {:?}", r, p),
            }
        }
        Ok(OneofBuilder { name, fields })
    }
}

fn parse_extend(p: Pair<Rule>) -> Result<Vec<FieldBuilder>, ParseError>
{
    let mut inner = p.into_inner();
    let extendee = next(&mut inner).as_str().to_string();
    let mut fields = vec![];
    for p in inner {
        match p.as_rule() {
            Rule::field => {
                let mut field = FieldBuilder::parse(p)?;
                field.extendee = Some(extendee.clone());
                fields.push(field);
            }
            Rule::emptyStatement => {}
            r => unreachable!("{:?}: {:?}", r, p),
        }
    }
    Ok(fields)
}

impl ProtoOption
{
    fn parse(p: Pair<Rule>) -> Result<Self, ParseError>
    {
        let mut inner = p.into_inner();
        Ok(Self {
            name: next(&mut inner).as_str().to_string(),
            value: Constant::parse(next(&mut inner))?,
        })
    }

    /// Parses the trailing `[ ... ]` options if the next pair holds them.
    fn parse_options(inner: &mut Peekable<Pairs<Rule>>) -> Result<Vec<Self>, ParseError>
    {
        match inner.peek().map(|p| p.as_rule()) {
            Some(Rule::fieldOptions) => next(inner)
                .into_inner()
                .map(ProtoOption::parse)
                .collect(),
            _ => Ok(vec![]),
        }
    }
}

impl Constant
{
    fn parse(p: Pair<Rule>) -> Result<Self, ParseError>
    {
        let p = first(p);
        Ok(match p.as_rule() {
            Rule::fullIdent => Constant::Ident(p.as_str().to_string()),
            Rule::intLit => match parse_int_literal(p.clone()) {
                Ok(i) => Constant::Integer(i),

                // Out of the i64 range; uint64 values above i64::MAX end up here.
                Err(_) => Constant::Float(p.as_str().parse::<f64>()?),
            },
            Rule::floatLit => Constant::Float(parse_float_literal(p.as_str())?),
            Rule::strLit => Constant::String(parse_string_literal(p)?),
            Rule::boolLit => Constant::Bool(p.as_str() == "true"),
            Rule::aggregate => Constant::Aggregate(p.as_str().to_string()),
            r => unreachable!("{:?}: {:?}", r, p),
        })
    }
}

fn parse_field_type(t: &str) -> FieldTypeBuilder
{
    match ValueType::from_builtin(t) {
        Some(vt) => FieldTypeBuilder::Builtin(vt),
        None => FieldTypeBuilder::Unknown(t.to_string()),
    }
}

/// Name of the entry message protoc synthesizes for a map field: `my_map` becomes `MyMapEntry`.
fn map_entry_name(field_name: &str) -> String
{
    let mut camel = to_json_name(field_name);
    if let Some(first) = camel.get(..1) {
        let upper = first.to_uppercase();
        camel.replace_range(..1, &upper);
    }
    camel + "Entry"
}

fn parse_field_number(p: Pair<Rule>) -> Result<u64, ParseError>
{
    let number = parse_int_literal(p)?;
    if number < 1 || number as u64 > MAX_FIELD_NUMBER {
        return Err(format!("Field number {} out of range", number).into());
    }
    Ok(number as u64)
}

fn parse_int_literal(p: Pair<Rule>) -> Result<i64, ParseError>
{
    let s = p.as_str();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };

    let magnitude = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None if digits.len() > 1 && digits.starts_with('0') => u64::from_str_radix(digits, 8)?,
        None => digits.parse::<u64>()?,
    };

    let value = match negative {
        true if magnitude <= i64::MAX as u64 + 1 => (magnitude as i64).wrapping_neg(),
        false if magnitude <= i64::MAX as u64 => magnitude as i64,
        _ => return Err(format!("Integer {} out of range", s).into()),
    };
    Ok(value)
}

fn parse_float_literal(s: &str) -> Result<f64, ParseError>
{
    Ok(match s {
        "inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        "nan" | "-nan" => f64::NAN,
        s => s.parse()?,
    })
}

fn parse_string_literal(p: Pair<Rule>) -> Result<Bytes, ParseError>
{
    let s = p.as_str();
    let body = &s[1..s.len() - 1];
    let mut output = BytesMut::with_capacity(body.len());

    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            let mut buf = [0u8; 4];
            output.put(c.encode_utf8(&mut buf).as_bytes());
            continue;
        }

        let escape = chars.next().ok_or("Unterminated escape sequence")?;
        match escape {
            'a' => output.put_u8(0x07),
            'b' => output.put_u8(0x08),
            'f' => output.put_u8(0x0C),
            'n' => output.put_u8(0x0A),
            'r' => output.put_u8(0x0D),
            't' => output.put_u8(0x09),
            'v' => output.put_u8(0x0B),
            '\\' | '\'' | '"' | '?' => output.put_u8(escape as u8),
            'x' | 'X' => {
                let mut value = 0u32;
                let mut count = 0;
                while let Some(d) = chars.peek().and_then(|c| c.to_digit(16)) {
                    if count == 2 {
                        break;
                    }
                    value = value * 16 + d;
                    count += 1;
                    chars.next();
                }
                if count == 0 {
                    return Err("Empty hex escape".into());
                }
                output.put_u8(value as u8);
            }
            '0'..='7' => {
                let mut value = escape as u32 - '0' as u32;
                for _ in 0..2 {
                    match chars.peek().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                if value > 0xFF {
                    return Err(format!("Octal escape \\{:o} out of range", value).into());
                }
                output.put_u8(value as u8);
            }
            o => return Err(format!("Invalid escape sequence \\{}", o).into()),
        }
    }

    Ok(output.freeze())
}

/// Takes the next pair of a rule. The grammar guarantees its presence.
fn next<'a, I>(inner: &mut I) -> Pair<'a, Rule>
where
    I: Iterator<Item = Pair<'a, Rule>>,
{
    inner.next().unwrap()
}

fn first(p: Pair<Rule>) -> Pair<Rule>
{
    next(&mut p.into_inner())
}
