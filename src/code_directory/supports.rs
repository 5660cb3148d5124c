// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of CodeDirectory format versions.
//!
//! The CodeDirectory header grew over the years: each darwin release that
//! extended it bumped the version field, and a directory at version N
//! carries the header fields of every version up to and including N, in
//! version order. Each version is described here by a descriptor record
//! holding the decode and encode hooks for its fields, and the ordered
//! registry of descriptors drives the whole codec.

use {
    super::{
        linkage::Linkage, runtime::Runtime, scatter::ScatterSet, BlobReader, CodeDirectoryBlob,
        ExecSegment,
    },
    crate::error::CodesignError,
    once_cell::sync::Lazy,
    std::{
        fmt::{Display, Formatter},
        io::Write,
        sync::RwLock,
    },
};

/// A CodeDirectory format version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SupportsVersion(pub u32);

impl SupportsVersion {
    pub const BASE: SupportsVersion = SupportsVersion(0x0);
    pub const SCATTER: SupportsVersion = SupportsVersion(0x0201_00);
    pub const TEAM_ID: SupportsVersion = SupportsVersion(0x0202_00);
    pub const CODE_LIMIT_64: SupportsVersion = SupportsVersion(0x0203_00);
    pub const EXEC_SEGMENT: SupportsVersion = SupportsVersion(0x0204_00);
    pub const RUNTIME: SupportsVersion = SupportsVersion(0x0205_00);
    pub const LINKAGE: SupportsVersion = SupportsVersion(0x0206_00);
}

impl Display for SupportsVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let names = descriptors()
            .iter()
            .filter(|meta| *self >= SupportsVersion(meta.version))
            .map(|meta| meta.full_name)
            .collect::<Vec<_>>();

        write!(f, "0x{:x} ({})", self.0, names.join(","))
    }
}

/// Version specific payload attached to a [CodeDirectoryBlob].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SupportsData {
    TeamId(String),
    Scatter(ScatterSet),
    CodeLimit64(u64),
    ExecSegment(ExecSegment),
    Runtime(Runtime),
    Linkage(Linkage),
}

/// Decodes one version's fields into the directory under construction.
///
/// The reader is positioned at this version's header fields; out of line
/// data is fetched through absolute reads. `Ok(None)` means the version
/// contributes no payload for this directory.
pub type SupportsDecoder =
    fn(&mut CodeDirectoryBlob, &mut BlobReader<'_>) -> Result<Option<SupportsData>, CodesignError>;

/// Computes the `(header, body)` byte sizes one version will occupy.
pub type SupportsSizeCalculator =
    fn(Option<&SupportsData>, &CodeDirectoryBlob) -> Result<(u32, u32), CodesignError>;

/// Writes one version's fixed header fields.
///
/// `data_offset_start` is the offset of the first body byte in the encoded
/// blob; `data_offset_current` is the offset where this version's own body
/// will land.
pub type SupportsHeaderEncoder = fn(
    Option<&SupportsData>,
    &CodeDirectoryBlob,
    &mut dyn Write,
    u32,
    u32,
) -> Result<u64, CodesignError>;

/// Writes one version's out of line body data.
pub type SupportsBodyEncoder =
    fn(Option<&SupportsData>, &CodeDirectoryBlob, &mut dyn Write) -> Result<u64, CodesignError>;

/// Descriptor record for one CodeDirectory format version.
#[derive(Clone, Copy)]
pub struct SupportsMetadata {
    /// The version value as stored in the CodeDirectory header.
    pub version: u32,
    /// The name of this version as defined in the darwin kernel.
    pub full_name: &'static str,
    /// A shorter name usable in error logs.
    pub short_name: &'static str,
    pub decoder: SupportsDecoder,
    pub size_calculator: SupportsSizeCalculator,
    pub header_encoder: SupportsHeaderEncoder,
    pub body_encoder: Option<SupportsBodyEncoder>,
}

/// Ordered collection of version descriptors.
#[derive(Default)]
pub struct SupportsVersionRegistry {
    entries: Vec<SupportsMetadata>,
}

impl SupportsVersionRegistry {
    /// Register a version descriptor, panicking if the version is taken.
    pub fn register(&mut self, metadata: SupportsMetadata) -> SupportsVersion {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|existing| existing.version == metadata.version)
        {
            panic!(
                "version 0x{:x} already registered to '{}'",
                existing.version, existing.full_name
            );
        }

        let version = SupportsVersion(metadata.version);

        self.entries.push(metadata);
        self.entries.sort_by_key(|meta| meta.version);

        version
    }

    pub fn snapshot(&self) -> Vec<SupportsMetadata> {
        self.entries.clone()
    }
}

static SUPPORTS_VERSIONS: Lazy<RwLock<SupportsVersionRegistry>> = Lazy::new(|| {
    let mut registry = SupportsVersionRegistry::default();

    registry.register(super::base::METADATA);
    registry.register(super::scatter::METADATA);
    registry.register(super::team_id::METADATA);
    registry.register(super::code_limit_64::METADATA);
    registry.register(super::exec_segment::METADATA);
    registry.register(super::runtime::METADATA);
    registry.register(super::linkage::METADATA);

    RwLock::new(registry)
});

/// Register a version descriptor process-wide.
///
/// Panics if the version is already registered. Registration must complete
/// before any decoding starts; the built-in versions are always present.
pub fn register_supports_version(metadata: SupportsMetadata) -> SupportsVersion {
    SUPPORTS_VERSIONS
        .write()
        .expect("supports version registry lock poisoned")
        .register(metadata)
}

/// All registered descriptors in ascending version order.
pub(crate) fn descriptors() -> Vec<SupportsMetadata> {
    SUPPORTS_VERSIONS
        .read()
        .expect("supports version registry lock poisoned")
        .snapshot()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_versions_sorted() {
        let versions = descriptors()
            .iter()
            .map(|meta| meta.version)
            .collect::<Vec<_>>();

        assert_eq!(
            versions,
            vec![0x0, 0x020100, 0x020200, 0x020300, 0x020400, 0x020500, 0x020600]
        );
    }

    #[test]
    fn duplicate_version_panics() {
        let mut registry = SupportsVersionRegistry::default();
        registry.register(super::super::base::METADATA);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.register(super::super::base::METADATA);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn version_display() {
        assert_eq!(
            SupportsVersion::BASE.to_string(),
            "0x0 (CODEDIRECTORY_SUPPORTS_BASE)"
        );
        assert_eq!(
            SupportsVersion::TEAM_ID.to_string(),
            "0x20200 (CODEDIRECTORY_SUPPORTS_BASE,CODEDIRECTORY_SUPPORTS_SCATTER,CODEDIRECTORY_SUPPORTS_TEAMID)"
        );
    }
}
