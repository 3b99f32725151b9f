//! The built-in compiler schema.
//!
//! The plugin request and response layouts are known without reading any descriptors. They are
//! described by the bundled `descriptor.proto` and `plugin.proto`, which are parsed like any
//! other schema source.

use crate::registry::{DescriptorError, PackageBuilder};

/// Bundled schema sources as `(import path, source)` pairs.
pub const SOURCES: &[(&str, &str)] = &[
    (
        "google/protobuf/descriptor.proto",
        include_str!("../proto/google/protobuf/descriptor.proto"),
    ),
    (
        "google/protobuf/compiler/plugin.proto",
        include_str!("../proto/google/protobuf/compiler/plugin.proto"),
    ),
];

pub(crate) fn packages() -> Result<Vec<PackageBuilder>, DescriptorError>
{
    SOURCES
        .iter()
        .map(|(name, source)| PackageBuilder::parse_str(name, source))
        .collect()
}
