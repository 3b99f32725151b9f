use std::borrow::Cow;
use std::collections::BTreeMap;

use tracing::trace;

use super::*;

pub(crate) struct RegistryBuilder
{
    pub(crate) packages: Vec<PackageBuilder>,
}

/// One schema file.
#[derive(Debug, PartialEq)]
pub(crate) struct PackageBuilder
{
    pub(crate) file: String,
    pub(crate) name: Option<String>,
    pub(crate) syntax: Syntax,
    pub(crate) types: Vec<ProtobufTypeBuilder>,
    pub(crate) extensions: Vec<FieldBuilder>,

    /// Declarations of a shadowable file give way to equally named declarations elsewhere.
    pub(crate) shadowable: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub(crate) enum ProtobufTypeBuilder
{
    Message(MessageBuilder),
    Enum(EnumBuilder),
}

#[derive(Default, Debug, PartialEq, Clone)]
pub(crate) struct MessageBuilder
{
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldBuilder>,
    pub(crate) oneofs: Vec<OneofBuilder>,
    pub(crate) inner_types: Vec<ProtobufTypeBuilder>,
    pub(crate) extensions: Vec<FieldBuilder>,
    pub(crate) map_entry: bool,
}

#[derive(Default, Debug, PartialEq, Clone)]
pub(crate) struct EnumBuilder
{
    pub(crate) name: String,
    pub(crate) fields: Vec<EnumField>,
}

#[derive(Debug, PartialEq, Clone)]
pub(crate) struct FieldBuilder
{
    pub(crate) label: Label,
    pub(crate) field_type: FieldTypeBuilder,
    pub(crate) name: String,
    pub(crate) number: u64,
    pub(crate) json_name: Option<String>,
    pub(crate) options: Vec<ProtoOption>,

    /// Extended type for fields declared in an `extend` block.
    pub(crate) extendee: Option<String>,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub(crate) enum Label
{
    /// No label; implicit presence in proto3.
    None,
    Optional,
    Required,
    Repeated,
}

#[derive(Default, Debug, PartialEq, Clone)]
pub(crate) struct OneofBuilder
{
    pub(crate) name: String,
    pub(crate) fields: Vec<FieldBuilder>,
}

#[derive(Debug, PartialEq, Clone)]
pub(crate) enum FieldTypeBuilder
{
    Builtin(ValueType),

    /// Named type of unknown kind, as written in `.proto` text.
    Unknown(String),

    /// Named types with the kind given by a descriptor.
    Message(String),
    Group(String),
    Enum(String),
}

impl RegistryBuilder
{
    pub fn new(packages: Vec<PackageBuilder>) -> Self
    {
        RegistryBuilder { packages }
    }

    pub fn build(mut self) -> Result<TypeRegistry, DescriptorError>
    {
        let mut cache = BuildCache::default();
        for (i, p) in self.packages.iter().enumerate() {
            p.populate(&mut cache, &mut vec![i])?;
        }

        // Iterate the types through the cache, since the cache has enough
        // details to find the original type, the types don't have details
        // to find the cache data without re-building the full path.
        let mut types = vec![];
        for cache_data in &cache.types {
            let ty = self.take_type(&cache_data.idx_path);
            let mut t = ty.build(cache_data, &cache)?;
            match &mut t {
                TypeInfo::Message(m) => m.self_ref = MessageRef(InternalRef(types.len())),
                TypeInfo::Enum(e) => e.self_ref = EnumRef(InternalRef(types.len())),
            }
            trace!(name = t.full_name(), "registered type");
            types.push(t);
        }

        let types_by_name = types
            .iter()
            .enumerate()
            .map(|(idx, t)| (t.full_name().to_string(), idx))
            .collect();

        let mut extensions: Vec<ExtensionInfo> = vec![];
        let mut extensions_by_number = HashMap::new();
        for ext in &cache.extensions {
            let info = ext.build(InternalRef(extensions.len()), &cache)?;
            if extensions_by_number
                .insert((info.extendee, info.field.number), extensions.len())
                .is_some()
            {
                return Err(DescriptorError::DuplicateExtension {
                    extendee: types[info.extendee.0 .0].full_name().to_string(),
                    number: info.field.number,
                });
            }
            trace!(name = %info.full_name, "registered extension");
            extensions.push(info);
        }

        let extensions_by_name = extensions
            .iter()
            .enumerate()
            .map(|(idx, e)| (e.full_name.clone(), idx))
            .collect();

        Ok(TypeRegistry {
            types,
            types_by_name,
            extensions,
            extensions_by_name,
            extensions_by_number,
        })
    }

    fn take_type(&mut self, idx: &[usize]) -> ProtobufTypeBuilder
    {
        self.packages[idx[0]].take_type(&idx[1..])
    }
}

impl PackageBuilder
{
    pub fn new(file: &str) -> Self
    {
        PackageBuilder {
            file: file.to_string(),
            name: None,
            syntax: Syntax::Proto2,
            types: vec![],
            extensions: vec![],
            shadowable: false,
        }
    }

    fn populate(&self, cache: &mut BuildCache, idx: &mut Vec<usize>) -> Result<(), DescriptorError>
    {
        trace!(file = %self.file, shadowable = self.shadowable, "populating file");
        let mut path = match &self.name {
            Some(name) => name.split('.').collect(),
            None => vec![],
        };
        let scope = FileScope {
            syntax: self.syntax,
            shadowable: self.shadowable,
        };

        for ext in &self.extensions {
            cache.add_extension(ext, &path, scope)?;
        }

        idx.push(0);
        for (i, t) in self.types.iter().enumerate() {
            *idx.last_mut().unwrap() = i;
            t.populate(cache, &mut path, idx, scope)?;
        }
        idx.pop();

        Ok(())
    }

    fn take_type(&mut self, idx: &[usize]) -> ProtobufTypeBuilder
    {
        self.types[idx[0]].take_type(&idx[1..])
    }
}

impl ProtobufTypeBuilder
{
    fn name(&self) -> &str
    {
        match self {
            ProtobufTypeBuilder::Message(m) => &m.name,
            ProtobufTypeBuilder::Enum(e) => &e.name,
        }
    }

    fn populate<'a>(
        &'a self,
        cache: &mut BuildCache,
        path: &mut Vec<&'a str>,
        idx: &mut Vec<usize>,
        scope: FileScope,
    ) -> Result<(), DescriptorError>
    {
        match self {
            ProtobufTypeBuilder::Message(m) => m.populate(cache, path, idx, scope),
            ProtobufTypeBuilder::Enum(e) => e.populate(cache, path, idx, scope),
        }
    }

    fn take_type(&mut self, idx: &[usize]) -> ProtobufTypeBuilder
    {
        match self {
            ProtobufTypeBuilder::Message(m) => m.take_type(idx),
            ProtobufTypeBuilder::Enum(e) => e.take_type(idx),
        }
    }

    fn clone_name(&self) -> ProtobufTypeBuilder
    {
        match self {
            ProtobufTypeBuilder::Message(m) => ProtobufTypeBuilder::Message(MessageBuilder {
                name: m.name.clone(),
                ..Default::default()
            }),
            ProtobufTypeBuilder::Enum(e) => ProtobufTypeBuilder::Enum(EnumBuilder {
                name: e.name.clone(),
                ..Default::default()
            }),
        }
    }

    fn build(self, self_data: &CacheData, cache: &BuildCache) -> Result<TypeInfo, DescriptorError>
    {
        Ok(match self {
            ProtobufTypeBuilder::Message(m) => TypeInfo::Message(m.build(self_data, cache)?),
            ProtobufTypeBuilder::Enum(e) => TypeInfo::Enum(e.build(self_data)),
        })
    }
}

impl MessageBuilder
{
    /// Lists types found in this message builder recursively into the build cache.
    ///
    /// On error the `path` and `idx` will be left in an undefined state.
    fn populate<'a>(
        &'a self,
        cache: &mut BuildCache,
        path: &mut Vec<&'a str>,
        idx: &mut Vec<usize>,
        scope: FileScope,
    ) -> Result<(), DescriptorError>
    {
        path.push(&self.name);
        cache.add_type(ItemType::Message, path.join("."), idx, scope)?;

        for ext in &self.extensions {
            cache.add_extension(ext, path, scope)?;
        }

        idx.push(0);
        for (i, t) in self.inner_types.iter().enumerate() {
            *idx.last_mut().unwrap() = i;
            t.populate(cache, path, idx, scope)?;
        }

        idx.pop();
        path.pop();

        Ok(())
    }

    fn take_type(&mut self, idx: &[usize]) -> ProtobufTypeBuilder
    {
        if idx.is_empty() {
            ProtobufTypeBuilder::Message(MessageBuilder {
                name: self.name.clone(),
                fields: std::mem::take(&mut self.fields),
                oneofs: std::mem::take(&mut self.oneofs),
                inner_types: self
                    .inner_types
                    .iter()
                    .map(ProtobufTypeBuilder::clone_name)
                    .collect(),
                extensions: vec![],
                map_entry: self.map_entry,
            })
        } else {
            self.inner_types[idx[0]].take_type(&idx[1..])
        }
    }

    fn build(self, self_data: &CacheData, cache: &BuildCache)
        -> Result<MessageInfo, DescriptorError>
    {
        // Inner types shadowed by another declaration of a different kind are left out.
        let inner_types: Vec<_> = self
            .inner_types
            .iter()
            .filter_map(|inner| {
                let data =
                    cache.type_by_full_name(&format!("{}.{}", self_data.full_name, inner.name()))?;
                match data.item_type {
                    ItemType::Message => Some(TypeRef::Message(MessageRef::from(data))),
                    ItemType::Enum => Some(TypeRef::Enum(EnumRef::from(data))),
                    ItemType::Extension => None,
                }
            })
            .collect();

        let mut fields: Vec<_> = self
            .fields
            .into_iter()
            .map(|field| field.build(&self_data.full_name, self_data.scope, cache, None))
            .collect::<Result<_, _>>()?;

        let mut oneofs: Vec<_> = self
            .oneofs
            .into_iter()
            .enumerate()
            .map(|(idx, oneof)| {
                let oneof_ref = OneofRef(InternalRef(idx));
                let mut new_fields: Vec<_> = oneof
                    .fields
                    .into_iter()
                    .map(|field| {
                        field.build(&self_data.full_name, self_data.scope, cache, Some(oneof_ref))
                    })
                    .collect::<Result<_, _>>()?;
                fields.append(&mut new_fields);
                Ok(Oneof {
                    name: oneof.name,
                    self_ref: oneof_ref,
                    fields: vec![],
                })
            })
            .collect::<Result<_, DescriptorError>>()?;

        // Sort the fields by number just for sanity.
        let fields: BTreeMap<u64, MessageField> =
            fields.into_iter().map(|f| (f.number, f)).collect();
        for oneof in oneofs.iter_mut() {
            let self_ref = oneof.self_ref;
            oneof.fields = fields
                .iter()
                .filter_map(|(num, f)| match f.oneof == Some(self_ref) {
                    true => Some(*num),
                    false => None,
                })
                .collect();
        }

        let fields_by_name = fields
            .values()
            .map(|f| (f.name.clone(), f.number))
            .collect();
        let fields_by_json_name = fields
            .values()
            .map(|f| (f.json_name.clone(), f.number))
            .collect();

        Ok(MessageInfo {
            name: self.name,
            full_name: self_data.full_name.clone(),
            self_ref: MessageRef(InternalRef(0)),
            oneofs,
            inner_types,
            map_entry: self.map_entry,
            fields,
            fields_by_name,
            fields_by_json_name,
        })
    }
}

impl FieldBuilder
{
    pub fn new(name: &str, number: u64, label: Label, field_type: FieldTypeBuilder) -> Self
    {
        FieldBuilder {
            label,
            field_type,
            name: name.to_string(),
            number,
            json_name: None,
            options: vec![],
            extendee: None,
        }
    }

    /// Builds the field. Type names are resolved starting from the `context` scope.
    fn build(
        self,
        context: &str,
        scope: FileScope,
        cache: &BuildCache,
        oneof: Option<OneofRef>,
    ) -> Result<MessageField, DescriptorError>
    {
        let field_type = self.field_type.build(context, cache)?;
        let multiplicity = resolve_multiplicity(
            self.label,
            &field_type,
            &self.options,
            scope.syntax,
            oneof.is_some() || self.extendee.is_some(),
        );
        let validate_utf8 = field_type == ValueType::String && scope.syntax != Syntax::Proto2;
        let json_name = self
            .json_name
            .unwrap_or_else(|| to_json_name(&self.name));

        Ok(MessageField {
            name: self.name,
            json_name,
            number: self.number,
            field_type,
            multiplicity,
            options: self.options,
            oneof,
            validate_utf8,
        })
    }
}

fn resolve_multiplicity(
    label: Label,
    field_type: &ValueType,
    options: &[ProtoOption],
    syntax: Syntax,
    force_presence: bool,
) -> Multiplicity
{
    if label != Label::Repeated {
        // Only plain proto3 scalars lack presence. Messages, oneof members and extensions
        // always track it.
        return match (syntax, label, field_type) {
            (_, _, ValueType::Message(..)) | (_, _, ValueType::Group(..)) => {
                Multiplicity::Optional
            }
            (Syntax::Proto3, Label::None, _) if !force_presence => Multiplicity::Single,
            _ => Multiplicity::Optional,
        };
    }

    // Non-scalar fields are always repeated.
    if !field_type.is_packable() {
        return Multiplicity::Repeated;
    }

    // Check the options.
    if let Some(opt) = options.iter().find(|o| o.name == "packed") {
        return match opt.value {
            Constant::Bool(true) => Multiplicity::RepeatedPacked,
            _ => Multiplicity::Repeated,
        };
    }

    match syntax {
        Syntax::Proto2 => Multiplicity::Repeated,
        Syntax::Proto3 | Syntax::Editions => Multiplicity::RepeatedPacked,
    }
}

/// Derives the default JSON name of a field: underscores are dropped and the letter following
/// an underscore is capitalized.
pub(crate) fn to_json_name(name: &str) -> String
{
    let mut out = String::with_capacity(name.len());
    let mut capitalize = false;
    for c in name.chars() {
        if c == '_' {
            capitalize = true;
        } else if capitalize {
            out.extend(c.to_uppercase());
            capitalize = false;
        } else {
            out.push(c);
        }
    }
    out
}

impl FieldTypeBuilder
{
    fn build(self, context: &str, cache: &BuildCache) -> Result<ValueType, DescriptorError>
    {
        let (name, expected, group) = match self {
            FieldTypeBuilder::Builtin(vt) => return Ok(vt),
            FieldTypeBuilder::Unknown(s) => (s, None, false),
            FieldTypeBuilder::Message(s) => (s, Some(ItemType::Message), false),
            FieldTypeBuilder::Group(s) => (s, Some(ItemType::Message), true),
            FieldTypeBuilder::Enum(s) => (s, Some(ItemType::Enum), false),
        };

        let t = cache
            .resolve_type(&name, context)
            .ok_or_else(|| DescriptorError::TypeNotFound {
                name: name.clone(),
                context: context.to_string(),
            })?;

        if let Some(expected) = expected {
            if t.item_type != expected {
                return Err(DescriptorError::InvalidTypeKind {
                    type_name: name,
                    context: "field type",
                    expected,
                    actual: t.item_type,
                });
            }
        }

        Ok(match t.item_type {
            ItemType::Message if group => ValueType::Group(MessageRef::from(t)),
            ItemType::Message => ValueType::Message(MessageRef::from(t)),
            ItemType::Enum => ValueType::Enum(EnumRef::from(t)),
            ItemType::Extension => unreachable!("Extension in type cache"),
        })
    }
}

impl EnumBuilder
{
    /// Adds the enum to the build cache.
    fn populate<'a>(
        &'a self,
        cache: &mut BuildCache,
        path: &mut Vec<&'a str>,
        idx: &mut Vec<usize>,
        scope: FileScope,
    ) -> Result<(), DescriptorError>
    {
        path.push(&self.name);
        let result = cache.add_type(ItemType::Enum, path.join("."), idx, scope);
        path.pop();
        result
    }

    fn build(self, self_data: &CacheData) -> EnumInfo
    {
        let mut fields_by_value = BTreeMap::new();
        let mut fields_by_name = BTreeMap::new();
        for f in self.fields {
            fields_by_name.insert(f.name.clone(), f.value);
            fields_by_value.entry(f.value).or_insert(f);
        }

        EnumInfo {
            name: self.name,
            full_name: self_data.full_name.to_string(),
            self_ref: EnumRef(InternalRef(0)),
            fields_by_value,
            fields_by_name,
        }
    }

    fn take_type(&mut self, idx: &[usize]) -> ProtobufTypeBuilder
    {
        if !idx.is_empty() {
            panic!("Trying to take an inner type from an enum");
        }

        ProtobufTypeBuilder::Enum(std::mem::take(self))
    }
}

impl MessageRef
{
    fn from(data: &CacheData) -> Self
    {
        if data.item_type != ItemType::Message {
            panic!("Trying to create MessageRef for {:?}", data.item_type);
        }
        MessageRef(InternalRef(data.final_idx))
    }
}

impl EnumRef
{
    fn from(data: &CacheData) -> Self
    {
        if data.item_type != ItemType::Enum {
            panic!("Trying to create EnumRef for {:?}", data.item_type);
        }
        EnumRef(InternalRef(data.final_idx))
    }
}

#[derive(Clone, Copy)]
struct FileScope
{
    syntax: Syntax,
    shadowable: bool,
}

#[derive(Default)]
struct BuildCache
{
    items: BTreeMap<String, (ItemType, usize)>,
    types: Vec<CacheData>,
    extensions: Vec<ExtensionData>,
}

struct CacheData
{
    item_type: ItemType,
    idx_path: Vec<usize>,
    final_idx: usize,
    full_name: String,
    scope: FileScope,
}

struct ExtensionData
{
    full_name: String,
    context: String,
    scope: FileScope,
    field: FieldBuilder,
}

impl BuildCache
{
    /// Claims `full_name` for a declaration.
    ///
    /// Returns false when a shadowable declaration lost to an existing one.
    fn claim(
        &mut self,
        full_name: &str,
        item_type: ItemType,
        idx: usize,
        scope: FileScope,
    ) -> Result<bool, DescriptorError>
    {
        if self.items.contains_key(full_name) {
            if scope.shadowable {
                trace!(name = full_name, "built-in declaration shadowed");
                return Ok(false);
            }
            return Err(DescriptorError::DuplicateType {
                name: full_name.to_string(),
            });
        }

        self.items
            .insert(full_name.to_string(), (item_type, idx));
        Ok(true)
    }

    fn add_type(
        &mut self,
        item_type: ItemType,
        full_name: String,
        idx: &[usize],
        scope: FileScope,
    ) -> Result<(), DescriptorError>
    {
        let cache_idx = self.types.len();
        if self.claim(&full_name, item_type, cache_idx, scope)? {
            self.types.push(CacheData {
                item_type,
                full_name,
                idx_path: idx.to_vec(),
                final_idx: cache_idx,
                scope,
            });
        }
        Ok(())
    }

    fn add_extension(
        &mut self,
        field: &FieldBuilder,
        path: &[&str],
        scope: FileScope,
    ) -> Result<(), DescriptorError>
    {
        let context = path.join(".");
        let full_name = match context.is_empty() {
            true => field.name.clone(),
            false => format!("{}.{}", context, field.name),
        };

        let cache_idx = self.extensions.len();
        if self.claim(&full_name, ItemType::Extension, cache_idx, scope)? {
            self.extensions.push(ExtensionData {
                full_name,
                context,
                scope,
                field: field.clone(),
            });
        }
        Ok(())
    }

    fn resolve_type(&self, relative_name: &str, mut current_path: &str) -> Option<&CacheData>
    {
        if let Some(absolute) = relative_name.strip_prefix('.') {
            return self.type_by_full_name(absolute);
        }

        loop {
            let lookup: Cow<str> = match current_path.is_empty() {
                true => relative_name.into(),
                false => format!("{}.{}", current_path, relative_name).into(),
            };

            if let Some(t) = self.type_by_full_name(&lookup) {
                return Some(t);
            }

            if current_path.is_empty() {
                return None;
            }

            match current_path.rfind('.') {
                Some(i) => {
                    let (start, _) = current_path.split_at(i);
                    current_path = start;
                }
                None => {
                    current_path = "";
                }
            }
        }
    }

    fn type_by_full_name(&self, full_name: &str) -> Option<&CacheData>
    {
        match self.items.get(full_name) {
            Some((ItemType::Message, i)) | Some((ItemType::Enum, i)) => self.types.get(*i),
            _ => None,
        }
    }
}

impl ExtensionData
{
    fn build(
        &self,
        self_ref: InternalRef,
        cache: &BuildCache,
    ) -> Result<ExtensionInfo, DescriptorError>
    {
        let extendee_name = self.field.extendee.as_deref().unwrap_or_default();
        let extendee = cache
            .resolve_type(extendee_name, &self.context)
            .ok_or_else(|| DescriptorError::TypeNotFound {
                name: extendee_name.to_string(),
                context: self.full_name.clone(),
            })?;
        if extendee.item_type != ItemType::Message {
            return Err(DescriptorError::InvalidTypeKind {
                type_name: extendee.full_name.clone(),
                context: "extendee",
                expected: ItemType::Message,
                actual: extendee.item_type,
            });
        }
        let extendee = MessageRef::from(extendee);

        let field = self
            .field
            .clone()
            .build(&self.context, self.scope, cache, None)?;

        Ok(ExtensionInfo {
            full_name: self.full_name.clone(),
            self_ref: ExtensionRef(self_ref),
            extendee,
            field,
        })
    }
}
