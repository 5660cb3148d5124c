// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The runtime (version 0x020500) CodeDirectory fields: the hardened
//! runtime version and the optional pre-encryption hash vector.

use {
    super::{
        supports::{SupportsData, SupportsMetadata},
        BlobReader, CodeDirectoryBlob,
    },
    crate::error::CodesignError,
    byteorder::{WriteBytesExt, BE},
    std::{
        fmt::{Display, Formatter},
        io::Write,
    },
};

pub(crate) const METADATA: SupportsMetadata = SupportsMetadata {
    version: 0x0205_00,
    full_name: "CODEDIRECTORY_SUPPORTS_RUNTIME",
    short_name: "runtime",
    decoder: decode,
    size_calculator: calculate_size,
    header_encoder: encode_header,
    body_encoder: Some(encode_body),
};

const HEADER_SIZE: u32 = 8;

/// An OS version packed into 32 bits as `major.minor.patch`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RuntimeVersion {
    pub major: u16,
    pub minor: u8,
    pub patch: u8,
}

impl RuntimeVersion {
    fn packed(&self) -> u32 {
        (self.major as u32) << 16 | (self.minor as u32) << 8 | self.patch as u32
    }

    fn unpack(raw: u32) -> Self {
        Self {
            major: (raw >> 16) as u16,
            minor: (raw >> 8) as u8,
            patch: raw as u8,
        }
    }
}

impl Display for RuntimeVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.major)?;

        if self.minor > 0 {
            write!(f, ".{}", self.minor)?;
        }

        if self.patch > 0 {
            write!(f, ".{}", self.patch)?;
        }

        Ok(())
    }
}

/// Hardened runtime data: the version and, for encrypted binaries, the
/// page hashes taken before encryption.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Runtime {
    pub version: RuntimeVersion,
    /// One hash per code slot, or empty when the binary is not encrypted.
    pub pre_encrypt_slots: Vec<Vec<u8>>,
}

fn decode(
    cd: &mut CodeDirectoryBlob,
    reader: &mut BlobReader<'_>,
) -> Result<Option<SupportsData>, CodesignError> {
    let raw_version = reader.read_u32()?;
    let offset = reader.read_u32()?;

    let mut runtime = Runtime {
        version: RuntimeVersion::unpack(raw_version),
        pre_encrypt_slots: Vec::new(),
    };

    if offset == 0 {
        // A zero version with no slot vector is what the encoder emits
        // for an active version with no payload.
        if raw_version == 0 {
            return Ok(None);
        }

        return Ok(Some(SupportsData::Runtime(runtime)));
    }

    let slot_size = cd.hash_type.slot_size() as u32;
    let slots = cd.code_slots.len() as u32;
    let length = reader.length();

    if (length as u64) < offset as u64 + slot_size as u64 * slots as u64 {
        return Err(CodesignError::OffsetOutOfBounds {
            context: "pre-encrypt slots",
            offset,
            length,
        });
    }

    runtime.pre_encrypt_slots = (0..slots)
        .map(|slot| {
            let slot_offset = offset + slot_size * slot;
            Ok(reader
                .bytes_at(slot_offset, slot_size as usize, "pre-encrypt slot")?
                .to_vec())
        })
        .collect::<Result<Vec<_>, CodesignError>>()?;

    Ok(Some(SupportsData::Runtime(runtime)))
}

fn calculate_size(
    data: Option<&SupportsData>,
    cd: &CodeDirectoryBlob,
) -> Result<(u32, u32), CodesignError> {
    let mut body = 0u32;

    if let Some(SupportsData::Runtime(runtime)) = data {
        if !runtime.pre_encrypt_slots.is_empty() {
            if runtime.pre_encrypt_slots.len() != cd.code_slots.len() {
                return Err(CodesignError::PreEncryptCountMismatch);
            }

            let slot_size = cd.hash_type.slot_size();

            for (index, slot) in runtime.pre_encrypt_slots.iter().enumerate() {
                if slot.len() < slot_size as usize {
                    return Err(CodesignError::SlotTooSmall {
                        context: "pre-encrypt",
                        index,
                    });
                }

                body += slot_size as u32;
            }
        }
    }

    Ok((HEADER_SIZE, body))
}

fn encode_header(
    data: Option<&SupportsData>,
    _cd: &CodeDirectoryBlob,
    dst: &mut dyn Write,
    _data_offset_start: u32,
    data_offset_current: u32,
) -> Result<u64, CodesignError> {
    let (version, has_slots) = match data {
        Some(SupportsData::Runtime(runtime)) => {
            (runtime.version, !runtime.pre_encrypt_slots.is_empty())
        }
        _ => (RuntimeVersion::default(), false),
    };

    dst.write_u32::<BE>(version.packed())?;
    dst.write_u32::<BE>(if has_slots { data_offset_current } else { 0 })?;

    Ok(HEADER_SIZE as u64)
}

fn encode_body(
    data: Option<&SupportsData>,
    cd: &CodeDirectoryBlob,
    dst: &mut dyn Write,
) -> Result<u64, CodesignError> {
    let Some(SupportsData::Runtime(runtime)) = data else {
        return Ok(0);
    };

    let slot_size = cd.hash_type.slot_size() as usize;
    let mut written = 0u64;

    for slot in &runtime.pre_encrypt_slots {
        dst.write_all(&slot[..slot_size])?;
        written += slot_size as u64;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_rendering() {
        let version = RuntimeVersion {
            major: 13,
            minor: 4,
            patch: 1,
        };
        assert_eq!(version.to_string(), "13.4.1");

        let version = RuntimeVersion {
            major: 11,
            minor: 0,
            patch: 0,
        };
        assert_eq!(version.to_string(), "11");
    }

    #[test]
    fn version_packing() {
        let version = RuntimeVersion {
            major: 10,
            minor: 15,
            patch: 6,
        };

        assert_eq!(version.packed(), 0x000a0f06);
        assert_eq!(RuntimeVersion::unpack(0x000a0f06), version);
    }
}
