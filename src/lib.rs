// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Reading and writing of Apple code signature blobs.
//!
//! Code signatures on Apple platforms are stored as *blobs*: type-length
//! framed binary structures identified by a 32 bit magic. This crate
//! decodes and encodes the blob formats found embedded in Mach-O binaries,
//! disk images, and flat packages:
//!
//! * [SuperBlob] is the container holding the individual signature
//!   components, indexed by [Slot].
//! * [CodeDirectoryBlob] describes the signed content: its identity, page
//!   digests, and a versioned series of header extensions.
//! * [GenericBlob] carries any payload the crate has no structured decoder
//!   for, preserving its bytes exactly.
//!
//! Decoding dispatches through a runtime registry keyed by magic, so
//! embedders can teach the crate additional blob types
//! ([register_blob_type]) and digest algorithms ([register_hash_type])
//! without forking it.
//!
//! Container plumbing is included for the places signatures live: the
//! `LC_CODE_SIGNATURE` region of thin Mach-O binaries ([macho]), the
//! signature area of UDIF disk images ([dmg]), and notarization ticket
//! stapling for XAR flat packages ([xar]).

pub mod blob;
pub mod code_directory;
pub mod dmg;
pub mod error;
pub mod generic;
pub mod hash;
pub mod macho;
pub mod registry;
pub mod super_blob;
pub mod xar;

pub use {
    blob::{Blob, BlobHeader, Magic, BLOB_HEADER_SIZE},
    code_directory::{
        register_supports_version, CodeDirectoryBlob, CodeDirectoryFlags, ExecSegment,
        ExecSegmentFlags, Linkage, Runtime, RuntimeVersion, Scatter, ScatterSet, SupportsData,
        SupportsVersion,
    },
    dmg::{read_blob_from_dmg, write_blob_to_dmg, UdifTrailer},
    error::CodesignError,
    generic::GenericBlob,
    hash::{register_hash_type, HashType, HashTypeMetadata},
    macho::{find_code_signature, find_code_signature_in_file, CodeSignatureCmd},
    registry::{register_blob_type, BlobDecoder, BlobEncoder, BlobTypeMetadata},
    super_blob::{Slot, SuperBlob, SuperBlobEntry},
    xar::{package_ticket_trailer, staple_ticket_to_pkg},
};

use std::io::{Read, Seek, Write};

/// Decode a blob of the expected type from a byte slice.
///
/// The slice must start with a blob header whose declared length fits
/// within it; trailing bytes are ignored.
pub fn read_blob<T>(data: &[u8]) -> Result<T, CodesignError>
where
    T: TryFrom<Blob, Error = CodesignError>,
{
    T::try_from(registry::parse_blob(data)?)
}

/// [read_blob] over a reader, consuming it to the end.
pub fn read_blob_from<T, R>(src: &mut R) -> Result<T, CodesignError>
where
    T: TryFrom<Blob, Error = CodesignError>,
    R: Read,
{
    let mut data = Vec::new();
    src.read_to_end(&mut data)?;

    read_blob(&data)
}

/// Encode a blob to a writer, returning the number of bytes written.
pub fn write_blob(blob: &Blob, dst: &mut dyn Write) -> Result<u64, CodesignError> {
    blob.write_to(dst)
}

/// Encode a blob to a temporary file, rewound and ready for reading.
///
/// Returns the file and the encoded size.
pub fn write_blob_to_temp(blob: &Blob) -> Result<(tempfile::NamedTempFile, u64), CodesignError> {
    let mut file = tempfile::NamedTempFile::new()?;

    let size = blob.write_to(file.as_file_mut())?;
    file.rewind()?;

    Ok((file, size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_blob_dispatches_on_type() {
        let mut encoded = Vec::new();
        Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"abc"))
            .write_to(&mut encoded)
            .unwrap();

        let generic: GenericBlob = read_blob(&encoded).unwrap();
        assert_eq!(generic.payload(), b"abc");

        assert!(matches!(
            read_blob::<SuperBlob>(&encoded),
            Err(CodesignError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn read_blob_from_reader() {
        let directory = CodeDirectoryBlob {
            identity: "com.example.app".into(),
            ..Default::default()
        };

        let mut encoded = Vec::new();
        Blob::CodeDirectory(directory.clone())
            .write_to(&mut encoded)
            .unwrap();

        let decoded: CodeDirectoryBlob = read_blob_from(&mut encoded.as_slice()).unwrap();
        assert_eq!(decoded.identity, directory.identity);
        assert_eq!(decoded.version(), SupportsVersion::BASE);
    }

    #[test]
    fn temp_file_is_rewound() {
        let blob = Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"abc"));
        let (mut file, size) = write_blob_to_temp(&blob).unwrap();
        assert_eq!(size, 11);

        let read_back: GenericBlob = read_blob_from(file.as_file_mut()).unwrap();
        assert_eq!(read_back.payload(), b"abc");
    }
}
