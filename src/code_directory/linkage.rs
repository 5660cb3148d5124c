// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The linkage (version 0x020600) CodeDirectory fields: an application
//! specific payload tied to a hash type. A zero hash type on the wire
//! means the linkage record is absent.

use {
    super::{
        supports::{SupportsData, SupportsMetadata},
        BlobReader, CodeDirectoryBlob,
    },
    crate::{error::CodesignError, hash::HashType},
    byteorder::{WriteBytesExt, BE},
    std::io::Write,
};

pub(crate) const METADATA: SupportsMetadata = SupportsMetadata {
    version: 0x0206_00,
    full_name: "CODEDIRECTORY_SUPPORTS_LINKAGE",
    short_name: "linkage",
    decoder: decode,
    size_calculator: calculate_size,
    header_encoder: encode_header,
    body_encoder: Some(encode_body),
};

const HEADER_SIZE: u32 = 12;

/// Application defined linkage payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Linkage {
    pub hash_type: HashType,
    pub application_type: u8,
    pub application_sub_type: u16,
    pub data: Vec<u8>,
}

fn decode(
    _cd: &mut CodeDirectoryBlob,
    reader: &mut BlobReader<'_>,
) -> Result<Option<SupportsData>, CodesignError> {
    let hash_type = HashType(reader.read_u8()?);
    let application_type = reader.read_u8()?;
    let application_sub_type = reader.read_u16()?;
    let offset = reader.read_u32()?;
    let size = reader.read_u32()?;

    if hash_type == HashType::INVALID {
        return Ok(None);
    }

    let length = reader.length();
    if length < offset || (length as u64) < offset as u64 + size as u64 {
        return Err(CodesignError::OffsetOutOfBounds {
            context: "linkage",
            offset,
            length,
        });
    }

    let data = reader.bytes_at(offset, size as usize, "linkage")?.to_vec();

    Ok(Some(SupportsData::Linkage(Linkage {
        hash_type,
        application_type,
        application_sub_type,
        data,
    })))
}

fn calculate_size(
    data: Option<&SupportsData>,
    _cd: &CodeDirectoryBlob,
) -> Result<(u32, u32), CodesignError> {
    let body = match data {
        Some(SupportsData::Linkage(linkage)) => linkage.data.len() as u32,
        _ => 0,
    };

    Ok((HEADER_SIZE, body))
}

fn encode_header(
    data: Option<&SupportsData>,
    _cd: &CodeDirectoryBlob,
    dst: &mut dyn Write,
    _data_offset_start: u32,
    data_offset_current: u32,
) -> Result<u64, CodesignError> {
    match data {
        Some(SupportsData::Linkage(linkage)) if linkage.hash_type != HashType::INVALID => {
            dst.write_u8(linkage.hash_type.0)?;
            dst.write_u8(linkage.application_type)?;
            dst.write_u16::<BE>(linkage.application_sub_type)?;
            dst.write_u32::<BE>(data_offset_current)?;
            dst.write_u32::<BE>(linkage.data.len() as u32)?;
        }
        _ => {
            dst.write_u32::<BE>(0)?;
            dst.write_u32::<BE>(0)?;
            dst.write_u32::<BE>(0)?;
        }
    }

    Ok(HEADER_SIZE as u64)
}

fn encode_body(
    data: Option<&SupportsData>,
    _cd: &CodeDirectoryBlob,
    dst: &mut dyn Write,
) -> Result<u64, CodesignError> {
    let Some(SupportsData::Linkage(linkage)) = data else {
        return Ok(0);
    };

    if linkage.hash_type == HashType::INVALID {
        return Ok(0);
    }

    dst.write_all(&linkage.data)?;

    Ok(linkage.data.len() as u64)
}
