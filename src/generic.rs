// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Opaque carrier for blob types without a structured representation.

use {
    crate::{
        blob::{Blob, BlobHeader, Magic, BLOB_HEADER_SIZE},
        error::CodesignError,
    },
    sha2::{Digest, Sha256},
    std::{
        fmt::{Display, Formatter},
        io::Write,
    },
};

/// A blob carried verbatim, header included.
///
/// Used for every magic without a registered decoder, and for blob types
/// whose body is opaque by nature (requirements, entitlements, CMS
/// signatures, notarization tickets).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenericBlob {
    header: BlobHeader,
    raw: Vec<u8>,
}

impl GenericBlob {
    /// Construct a generic blob wrapping `payload` under `magic`.
    pub fn new(magic: Magic, payload: impl AsRef<[u8]>) -> Self {
        let payload = payload.as_ref();
        let header = BlobHeader {
            magic,
            length: BLOB_HEADER_SIZE + payload.len() as u32,
        };

        let mut raw = Vec::with_capacity(header.length as usize);
        raw.extend_from_slice(&header.magic.0.to_be_bytes());
        raw.extend_from_slice(&header.length.to_be_bytes());
        raw.extend_from_slice(payload);

        Self { header, raw }
    }

    /// Decoder hook: copy exactly `header.length` bytes verbatim.
    pub(crate) fn decode(header: BlobHeader, data: &[u8]) -> Result<Blob, CodesignError> {
        if data.len() as u64 != header.length as u64 {
            return Err(CodesignError::LengthInvalid(header.length));
        }

        Ok(Blob::Generic(Self {
            header,
            raw: data.to_vec(),
        }))
    }

    pub fn magic(&self) -> Magic {
        self.header.magic
    }

    pub fn length(&self) -> u32 {
        self.header.length
    }

    /// The body bytes following the 8 byte header.
    pub fn payload(&self) -> &[u8] {
        &self.raw[BLOB_HEADER_SIZE as usize..]
    }

    /// The verbatim bytes of the whole blob, header included.
    pub fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }
}

impl Display for GenericBlob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let digest = Sha256::digest(&self.raw);
        write!(
            f,
            "Generic{{length: {}, hash: {}}}",
            self.header.length,
            hex::encode(digest)
        )
    }
}

/// Encoder hook: write the stored bytes verbatim.
pub(crate) fn encode(blob: &Blob, dst: &mut dyn Write) -> Result<u64, CodesignError> {
    let Blob::Generic(generic) = blob else {
        return Err(CodesignError::TypeMismatch {
            expected: "generic blob",
            got: blob.variant_name(),
        });
    };

    dst.write_all(&generic.raw)?;
    Ok(generic.raw.len() as u64)
}

#[cfg(test)]
mod tests {
    use {super::*, crate::registry};

    #[test]
    fn requirement_blob_round_trips() {
        let input = [
            0xfa, 0xde, 0x0c, 0x00, 0x00, 0x00, 0x00, 0x0c, 0xde, 0xad, 0xbe, 0xef,
        ];

        let blob = registry::parse_blob(&input).unwrap();
        let Blob::Generic(generic) = &blob else {
            panic!("requirement blob should decode as generic");
        };
        assert_eq!(generic.magic(), Magic::REQUIREMENT);
        assert_eq!(generic.length(), 12);
        assert_eq!(generic.raw_bytes(), &input[..]);
        assert_eq!(generic.payload(), &[0xde, 0xad, 0xbe, 0xef]);

        let mut encoded = Vec::new();
        assert_eq!(blob.write_to(&mut encoded).unwrap(), 12);
        assert_eq!(encoded, input);
    }

    #[test]
    fn construction_matches_decode() {
        let built = GenericBlob::new(Magic::ENTITLEMENTS, b"abc");
        assert_eq!(built.length(), 11);

        let decoded = registry::parse_blob(built.raw_bytes()).unwrap();
        let Blob::Generic(decoded) = decoded else {
            panic!("expected generic blob");
        };
        assert_eq!(decoded, built);
    }
}
