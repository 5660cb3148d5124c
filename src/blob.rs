// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Blob primitives: the magic tag, the 8 byte header, and the blob sum type.
//!
//! Every code signature structure is a *blob*: a big-endian `{magic, length}`
//! header followed by a magic-specific body. `length` covers the header
//! itself and bounds every read performed while decoding the blob.

use {
    crate::{
        code_directory::CodeDirectoryBlob, error::CodesignError, generic::GenericBlob,
        registry, super_blob::SuperBlob,
    },
    byteorder::{WriteBytesExt, BE},
    scroll::Pread,
    std::{
        fmt::{Display, Formatter},
        io::Write,
    },
};

/// 32-bit tag identifying a blob type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Magic(pub u32);

impl Magic {
    pub const CODE_DIRECTORY: Magic = Magic(0xfade0c02);
    pub const EMBEDDED_SIGNATURE: Magic = Magic(0xfade0cc0);
    pub const REQUIREMENT: Magic = Magic(0xfade0c00);
    pub const REQUIREMENT_SET: Magic = Magic(0xfade0c01);
    pub const EMBEDDED_SIGNATURE_OLD: Magic = Magic(0xfade0b02);
    pub const ENTITLEMENTS: Magic = Magic(0xfade7171);
    pub const ENTITLEMENTS_DER: Magic = Magic(0xfade7172);
    pub const DETACHED_SIGNATURE: Magic = Magic(0xfade0cc1);
    pub const BLOB_WRAPPER: Magic = Magic(0xfade0b01);
    pub const LAUNCH_CONSTRAINT: Magic = Magic(0xfade8181);
}

impl Display for Magic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match registry::name(*self) {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:x}", self.0),
        }
    }
}

impl From<u32> for Magic {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<Magic> for u32 {
    fn from(magic: Magic) -> Self {
        magic.0
    }
}

/// Size in bytes of an encoded [BlobHeader].
pub const BLOB_HEADER_SIZE: u32 = 8;

/// The `{magic, length}` prefix common to all blobs.
///
/// `length` includes the header itself, so it can never be below 8.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlobHeader {
    pub magic: Magic,
    pub length: u32,
}

impl BlobHeader {
    /// Decode a header from the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, CodesignError> {
        let magic = Magic(data.pread_with::<u32>(0, scroll::BE)?);
        let length = data.pread_with::<u32>(4, scroll::BE)?;

        if length < BLOB_HEADER_SIZE {
            return Err(CodesignError::LengthInvalid(length));
        }

        Ok(Self { magic, length })
    }

    /// Encode this header to a writer.
    pub fn write_to(&self, dst: &mut dyn Write) -> Result<u64, CodesignError> {
        if self.length < BLOB_HEADER_SIZE {
            return Err(CodesignError::LengthInvalid(self.length));
        }

        dst.write_u32::<BE>(self.magic.0)?;
        dst.write_u32::<BE>(self.length)?;

        Ok(BLOB_HEADER_SIZE as u64)
    }
}

/// A decoded code signature blob.
///
/// Blob types with a structured representation get their own variant;
/// everything else rides along verbatim as [GenericBlob].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Blob {
    CodeDirectory(CodeDirectoryBlob),
    SuperBlob(SuperBlob),
    Generic(GenericBlob),
}

impl Blob {
    /// The magic tag identifying this blob's type.
    pub fn magic(&self) -> Magic {
        match self {
            Self::CodeDirectory(cd) => cd.magic(),
            Self::SuperBlob(sb) => sb.magic(),
            Self::Generic(generic) => generic.magic(),
        }
    }

    /// The size of this blob in its encoded form, header included.
    pub fn length(&self) -> Result<u32, CodesignError> {
        match self {
            Self::CodeDirectory(cd) => cd.length(),
            Self::SuperBlob(sb) => sb.length(),
            Self::Generic(generic) => Ok(generic.length()),
        }
    }

    /// Encode this blob through the blob-type registry.
    pub fn write_to(&self, dst: &mut dyn Write) -> Result<u64, CodesignError> {
        registry::encode(self, dst)
    }

    pub(crate) fn variant_name(&self) -> &'static str {
        match self {
            Self::CodeDirectory(_) => "code directory",
            Self::SuperBlob(_) => "super blob",
            Self::Generic(_) => "generic blob",
        }
    }
}

impl TryFrom<Blob> for CodeDirectoryBlob {
    type Error = CodesignError;

    fn try_from(blob: Blob) -> Result<Self, Self::Error> {
        match blob {
            Blob::CodeDirectory(cd) => Ok(cd),
            other => Err(CodesignError::TypeMismatch {
                expected: "code directory",
                got: other.variant_name(),
            }),
        }
    }
}

impl TryFrom<Blob> for SuperBlob {
    type Error = CodesignError;

    fn try_from(blob: Blob) -> Result<Self, Self::Error> {
        match blob {
            Blob::SuperBlob(sb) => Ok(sb),
            other => Err(CodesignError::TypeMismatch {
                expected: "super blob",
                got: other.variant_name(),
            }),
        }
    }
}

impl TryFrom<Blob> for GenericBlob {
    type Error = CodesignError;

    fn try_from(blob: Blob) -> Result<Self, Self::Error> {
        match blob {
            Blob::Generic(generic) => Ok(generic),
            other => Err(CodesignError::TypeMismatch {
                expected: "generic blob",
                got: other.variant_name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = BlobHeader {
            magic: Magic::REQUIREMENT,
            length: 12,
        };

        let mut encoded = Vec::new();
        assert_eq!(header.write_to(&mut encoded).unwrap(), 8);
        assert_eq!(encoded, vec![0xfa, 0xde, 0x0c, 0x00, 0x00, 0x00, 0x00, 0x0c]);

        assert_eq!(BlobHeader::parse(&encoded).unwrap(), header);
    }

    #[test]
    fn header_rejects_short_length() {
        let data = [0xfa, 0xde, 0x0c, 0x00, 0x00, 0x00, 0x00, 0x07];
        assert!(matches!(
            BlobHeader::parse(&data),
            Err(CodesignError::LengthInvalid(7))
        ));

        let header = BlobHeader {
            magic: Magic::REQUIREMENT,
            length: 4,
        };
        assert!(matches!(
            header.write_to(&mut Vec::<u8>::new()),
            Err(CodesignError::LengthInvalid(4))
        ));
    }

    #[test]
    fn magic_renders_registered_names() {
        assert_eq!(Magic::CODE_DIRECTORY.to_string(), "CSMAGIC_CODEDIRECTORY");
        assert_eq!(Magic(0xdeadbeef).to_string(), "0xdeadbeef");
    }
}
