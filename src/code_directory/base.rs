// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The base (version 0x0) CodeDirectory fields.
//!
//! The base header is 36 bytes on the wire and owns the string and hash
//! heap: the identity, the team identifier (which later versions declare
//! but which is physically interleaved here, between the identity and the
//! special slot hashes), the special slot hashes in descending slot order,
//! and the code slot hashes in ascending page order.

use {
    super::{
        flags::CodeDirectoryFlags,
        supports::{SupportsData, SupportsMetadata, SupportsVersion},
        BlobReader, CodeDirectoryBlob,
    },
    crate::{error::CodesignError, hash::HashType},
    byteorder::{WriteBytesExt, BE},
    std::io::Write,
};

pub(crate) const METADATA: SupportsMetadata = SupportsMetadata {
    version: 0x0,
    full_name: "CODEDIRECTORY_SUPPORTS_BASE",
    short_name: "base",
    decoder: decode,
    size_calculator: calculate_size,
    header_encoder: encode_header,
    body_encoder: Some(encode_body),
};

/// Size in bytes of the encoded base header, blob header excluded.
pub(crate) const BASE_HEADER_SIZE: u32 = 36;

fn decode(
    cd: &mut CodeDirectoryBlob,
    reader: &mut BlobReader<'_>,
) -> Result<Option<SupportsData>, CodesignError> {
    let version = reader.read_u32()?;
    let flags = reader.read_u32()?;
    let hashes_offset = reader.read_u32()?;
    let identity_offset = reader.read_u32()?;
    let special_slots = reader.read_u32()?;
    let code_slots = reader.read_u32()?;
    let code_limit = reader.read_u32()?;
    let hash_size = reader.read_u8()?;
    let hash_type = HashType(reader.read_u8()?);
    let platform = reader.read_u8()?;
    let page_size_log2 = reader.read_u8()?;
    let _reserved = reader.read_u32()?;

    // The version field marks the effective format version even when none
    // of the later versions carry a payload for this directory. Base
    // version needs no marker.
    if version != METADATA.version {
        cd.supports_data.insert(SupportsVersion(version), None);
    }

    cd.flags = unsafe { CodeDirectoryFlags::from_bits_unchecked(flags) };
    cd.code_limit = code_limit;
    cd.platform = platform;
    cd.page_size = 1u32
        .checked_shl(page_size_log2 as u32)
        .ok_or(CodesignError::PageSizeInvalid(page_size_log2 as u32))?;

    if identity_offset != 0 {
        cd.identity = reader.cstr_at(identity_offset, "identity")?.to_string();
    }

    decode_hashes(
        cd,
        reader,
        hashes_offset,
        special_slots,
        code_slots,
        hash_size,
        hash_type,
    )?;

    Ok(None)
}

fn decode_hashes(
    cd: &mut CodeDirectoryBlob,
    reader: &BlobReader<'_>,
    hashes_offset: u32,
    special_slots: u32,
    code_slots: u32,
    hash_size: u8,
    hash_type: HashType,
) -> Result<(), CodesignError> {
    if !hash_type.valid() {
        return Err(CodesignError::UnsupportedHashType(hash_type.0));
    }

    let slot_size = hash_type.slot_size();
    if hash_size != slot_size {
        return Err(CodesignError::HashSizeMismatch {
            wire: hash_size,
            registered: slot_size,
        });
    }

    let length = reader.length();
    if length < hashes_offset {
        return Err(CodesignError::OffsetOutOfBounds {
            context: "hashes",
            offset: hashes_offset,
            length,
        });
    }

    if hashes_offset / (slot_size as u32) < special_slots {
        return Err(CodesignError::SlotOverflow("special"));
    }

    if (length - hashes_offset) / (slot_size as u32) < code_slots {
        return Err(CodesignError::SlotOverflow("code"));
    }

    // Special slots sit below the hashes offset, highest slot number first.
    cd.special_slots = (1..=special_slots)
        .map(|slot| {
            let offset = hashes_offset - slot_size as u32 * slot;
            Ok(reader
                .bytes_at(offset, slot_size as usize, "special slot")?
                .to_vec())
        })
        .collect::<Result<Vec<_>, CodesignError>>()?;

    cd.code_slots = (0..code_slots)
        .map(|slot| {
            let offset = hashes_offset + slot_size as u32 * slot;
            Ok(reader
                .bytes_at(offset, slot_size as usize, "code slot")?
                .to_vec())
        })
        .collect::<Result<Vec<_>, CodesignError>>()?;

    cd.hash_type = hash_type;

    Ok(())
}

fn calculate_size(
    _data: Option<&SupportsData>,
    cd: &CodeDirectoryBlob,
) -> Result<(u32, u32), CodesignError> {
    let mut body = 0u32;

    if !cd.identity.is_empty() {
        body += cd.identity.len() as u32 + 1;
    }

    // The team identifier is written by this descriptor's body encoder, so
    // its bytes count here. This keeps every later descriptor's declared
    // body offset equal to the position its body is actually written at.
    if let Some(team_id) = cd.team_id() {
        body += team_id.len() as u32 + 1;
    }

    let slot_size = cd.hash_type.slot_size() as usize;

    for (index, slot) in cd.special_slots.iter().enumerate() {
        if slot.len() < slot_size {
            return Err(CodesignError::SlotTooSmall {
                context: "special",
                index,
            });
        }

        body += slot_size as u32;
    }

    for (index, slot) in cd.code_slots.iter().enumerate() {
        if slot.len() < slot_size {
            return Err(CodesignError::SlotTooSmall {
                context: "code",
                index,
            });
        }

        body += slot_size as u32;
    }

    Ok((BASE_HEADER_SIZE, body))
}

fn encode_header(
    _data: Option<&SupportsData>,
    cd: &CodeDirectoryBlob,
    dst: &mut dyn Write,
    data_offset_start: u32,
    _data_offset_current: u32,
) -> Result<u64, CodesignError> {
    if !cd.page_size.is_power_of_two() {
        return Err(CodesignError::PageSizeInvalid(cd.page_size));
    }

    let mut data_offset = data_offset_start;

    let identity_offset = if cd.identity.is_empty() {
        0
    } else {
        let offset = data_offset;
        data_offset += cd.identity.len() as u32 + 1;
        offset
    };

    if let Some(team_id) = cd.team_id() {
        data_offset += team_id.len() as u32 + 1;
    }

    let slot_size = cd.hash_type.slot_size();
    let hashes_offset = data_offset + cd.special_slots.len() as u32 * slot_size as u32;

    dst.write_u32::<BE>(cd.version().0)?;
    dst.write_u32::<BE>(cd.flags.bits())?;
    dst.write_u32::<BE>(hashes_offset)?;
    dst.write_u32::<BE>(identity_offset)?;
    dst.write_u32::<BE>(cd.special_slots.len() as u32)?;
    dst.write_u32::<BE>(cd.code_slots.len() as u32)?;
    dst.write_u32::<BE>(cd.code_limit)?;
    dst.write_u8(slot_size)?;
    dst.write_u8(cd.hash_type.0)?;
    dst.write_u8(cd.platform)?;
    dst.write_u8(cd.page_size.trailing_zeros() as u8)?;
    dst.write_u32::<BE>(0)?;

    Ok(BASE_HEADER_SIZE as u64)
}

fn encode_body(
    _data: Option<&SupportsData>,
    cd: &CodeDirectoryBlob,
    dst: &mut dyn Write,
) -> Result<u64, CodesignError> {
    let mut written = 0u64;

    if !cd.identity.is_empty() {
        dst.write_all(cd.identity.as_bytes())?;
        dst.write_u8(0)?;
        written += cd.identity.len() as u64 + 1;
    }

    // The team identifier lives between the identity and the special slot
    // hashes, matching the layout `codesign` produces.
    if let Some(team_id) = cd.team_id() {
        dst.write_all(team_id.as_bytes())?;
        dst.write_u8(0)?;
        written += team_id.len() as u64 + 1;
    }

    let slot_size = cd.hash_type.slot_size() as usize;

    for slot in cd.special_slots.iter().rev() {
        dst.write_all(&slot[..slot_size])?;
        written += slot_size as u64;
    }

    for slot in &cd.code_slots {
        dst.write_all(&slot[..slot_size])?;
        written += slot_size as u64;
    }

    Ok(written)
}
