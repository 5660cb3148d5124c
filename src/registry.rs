// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-wide registry of blob types, keyed by magic.
//!
//! Each entry pairs a magic value with a name and optional decode/encode
//! hooks. Unknown magics are not an error: decoding falls back to
//! [GenericBlob], which carries the raw bytes through unmodified.
//!
//! The registry is seeded with the built-in types on first use and is
//! intended to be fully populated before any decoding begins. Registering a
//! magic twice is a programmer error and aborts the process.

use {
    crate::{
        blob::{Blob, BlobHeader, Magic},
        code_directory, error::CodesignError, generic, generic::GenericBlob, super_blob,
    },
    once_cell::sync::Lazy,
    std::{collections::HashMap, io::Write, sync::RwLock},
};

/// Decodes a specific blob type from its raw form.
///
/// The slice spans the entire blob, header included, and is exactly
/// `header.length` bytes long.
pub type BlobDecoder = fn(BlobHeader, &[u8]) -> Result<Blob, CodesignError>;

/// Encodes a specific blob type to its raw form, returning bytes written.
pub type BlobEncoder = fn(&Blob, &mut dyn Write) -> Result<u64, CodesignError>;

/// Everything the registry knows about one blob type.
#[derive(Clone, Copy)]
pub struct BlobTypeMetadata {
    pub magic: u32,
    pub name: &'static str,
    pub decoder: Option<BlobDecoder>,
    pub encoder: Option<BlobEncoder>,
}

impl BlobTypeMetadata {
    /// Metadata for a data-only blob type that decodes to [GenericBlob].
    pub const fn data_only(magic: u32, name: &'static str) -> Self {
        Self {
            magic,
            name,
            decoder: None,
            encoder: None,
        }
    }
}

/// Lookup table mapping magic values to [BlobTypeMetadata].
#[derive(Default)]
pub struct BlobTypeRegistry {
    types: HashMap<u32, BlobTypeMetadata>,
}

impl BlobTypeRegistry {
    /// Register a blob type, panicking if the magic is already taken.
    pub fn register(&mut self, metadata: BlobTypeMetadata) -> Magic {
        if let Some(existing) = self.types.get(&metadata.magic) {
            panic!(
                "magic 0x{:x} already registered to blob type '{}'",
                existing.magic, existing.name
            );
        }

        let magic = Magic(metadata.magic);
        self.types.insert(metadata.magic, metadata);
        magic
    }

    pub fn get(&self, magic: Magic) -> Option<BlobTypeMetadata> {
        self.types.get(&magic.0).copied()
    }
}

static BLOB_TYPES: Lazy<RwLock<BlobTypeRegistry>> = Lazy::new(|| {
    let mut registry = BlobTypeRegistry::default();

    registry.register(code_directory::METADATA);
    registry.register(super_blob::METADATA);

    // Blob types without a structured representation; their bodies are
    // opaque and ride through as GenericBlob.
    registry.register(BlobTypeMetadata::data_only(0xfade0c00, "CSMAGIC_REQUIREMENT"));
    registry.register(BlobTypeMetadata::data_only(0xfade0c01, "CSMAGIC_REQUIREMENTS"));
    registry.register(BlobTypeMetadata::data_only(
        0xfade0b02,
        "CSMAGIC_EMBEDDED_SIGNATURE_OLD",
    ));
    registry.register(BlobTypeMetadata::data_only(
        0xfade7171,
        "CSMAGIC_EMBEDDED_ENTITLEMENTS",
    ));
    registry.register(BlobTypeMetadata::data_only(
        0xfade7172,
        "CSMAGIC_EMBEDDED_DER_ENTITLEMENTS",
    ));
    registry.register(BlobTypeMetadata::data_only(
        0xfade0cc1,
        "CSMAGIC_DETACHED_SIGNATURE",
    ));
    registry.register(BlobTypeMetadata::data_only(0xfade0b01, "CSMAGIC_BLOBWRAPPER"));
    registry.register(BlobTypeMetadata::data_only(
        0xfade8181,
        "CSMAGIC_EMBEDDED_LAUNCH_CONSTRAINT",
    ));

    RwLock::new(registry)
});

/// Register a blob type process-wide.
///
/// Panics if the magic is already registered. Registration must complete
/// before any decoding starts; the built-in types are always present.
pub fn register_blob_type(metadata: BlobTypeMetadata) -> Magic {
    BLOB_TYPES
        .write()
        .expect("blob type registry lock poisoned")
        .register(metadata)
}

fn lookup(magic: Magic) -> Option<BlobTypeMetadata> {
    BLOB_TYPES
        .read()
        .expect("blob type registry lock poisoned")
        .get(magic)
}

/// The registered name for a magic, if any.
pub fn name(magic: Magic) -> Option<&'static str> {
    lookup(magic).map(|metadata| metadata.name)
}

/// Dispatch a blob body to the decoder registered for its magic.
///
/// Magics without a registered decoder degrade to [GenericBlob].
pub fn decode(header: BlobHeader, data: &[u8]) -> Result<Blob, CodesignError> {
    if let Some(decoder) = lookup(header.magic).and_then(|metadata| metadata.decoder) {
        decoder(header, data)
    } else {
        GenericBlob::decode(header, data)
    }
}

/// Dispatch a blob to the encoder registered for its magic.
///
/// A [Blob::Generic] without a registered encoder uses the generic encoder;
/// any other unregistered blob is an error.
pub fn encode(blob: &Blob, dst: &mut dyn Write) -> Result<u64, CodesignError> {
    let magic = blob.magic();

    if let Some(encoder) = lookup(magic).and_then(|metadata| metadata.encoder) {
        return encoder(blob, dst);
    }

    if matches!(blob, Blob::Generic(_)) {
        return generic::encode(blob, dst);
    }

    Err(CodesignError::EncoderMissing(magic.0))
}

/// Top-level blob reader: parse the header, bound the body to exactly
/// `header.length` bytes, and dispatch by magic.
pub fn parse_blob(data: &[u8]) -> Result<Blob, CodesignError> {
    let header = BlobHeader::parse(data)?;

    if (data.len() as u64) < header.length as u64 {
        return Err(CodesignError::LengthInvalid(header.length));
    }

    log::debug!("decoding {} blob of {} bytes", header.magic, header.length);

    decode(header, &data[..header.length as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_magic_decodes_to_generic() {
        let data = [0xca, 0xfe, 0xd0, 0x0d, 0x00, 0x00, 0x00, 0x0a, 0xaa, 0xbb];

        let blob = parse_blob(&data).unwrap();
        match &blob {
            Blob::Generic(generic) => {
                assert_eq!(generic.magic(), Magic(0xcafed00d));
                assert_eq!(generic.raw_bytes(), &data[..]);
            }
            other => panic!("expected generic blob, got {}", other.variant_name()),
        }
    }

    #[test]
    fn duplicate_registration_panics() {
        let mut registry = BlobTypeRegistry::default();
        registry.register(BlobTypeMetadata::data_only(0x1, "first"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.register(BlobTypeMetadata::data_only(0x1, "second"));
        }));
        assert!(result.is_err());
    }

    #[test]
    fn truncated_input_is_rejected() {
        // Header advertises 16 bytes but only 10 are present.
        let data = [0xca, 0xfe, 0xd0, 0x0d, 0x00, 0x00, 0x00, 0x10, 0xaa, 0xbb];
        assert!(matches!(
            parse_blob(&data),
            Err(CodesignError::LengthInvalid(16))
        ));
    }

    #[test]
    fn custom_types_extend_decoding() {
        fn decode_marker(header: BlobHeader, data: &[u8]) -> Result<Blob, CodesignError> {
            GenericBlob::decode(header, data)
        }

        register_blob_type(BlobTypeMetadata {
            magic: 0xfadef00d,
            name: "CSMAGIC_TEST_MARKER",
            decoder: Some(decode_marker),
            encoder: None,
        });

        assert_eq!(name(Magic(0xfadef00d)), Some("CSMAGIC_TEST_MARKER"));

        let data = [0xfa, 0xde, 0xf0, 0x0d, 0x00, 0x00, 0x00, 0x08];
        assert!(matches!(parse_blob(&data).unwrap(), Blob::Generic(_)));
    }

    #[test]
    fn built_in_names_resolve() {
        assert_eq!(
            name(Magic::CODE_DIRECTORY),
            Some("CSMAGIC_CODEDIRECTORY")
        );
        assert_eq!(
            name(Magic::EMBEDDED_SIGNATURE),
            Some("CSMAGIC_EMBEDDED_SIGNATURE")
        );
        assert_eq!(name(Magic(0xdeadbeef)), None);
    }
}
