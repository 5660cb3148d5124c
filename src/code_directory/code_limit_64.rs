// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The code_limit_64 (version 0x020300) CodeDirectory fields: a reserved
//! word followed by a 64-bit code limit for files beyond 4GiB.

use {
    super::{
        supports::{SupportsData, SupportsMetadata},
        BlobReader, CodeDirectoryBlob,
    },
    crate::error::CodesignError,
    byteorder::{WriteBytesExt, BE},
    std::io::Write,
};

pub(crate) const METADATA: SupportsMetadata = SupportsMetadata {
    version: 0x0203_00,
    full_name: "CODEDIRECTORY_SUPPORTS_CODELIMIT64",
    short_name: "code_limit_64",
    decoder: decode,
    size_calculator: calculate_size,
    header_encoder: encode_header,
    body_encoder: None,
};

const HEADER_SIZE: u32 = 12;

fn decode(
    _cd: &mut CodeDirectoryBlob,
    reader: &mut BlobReader<'_>,
) -> Result<Option<SupportsData>, CodesignError> {
    let _reserved = reader.read_u32()?;
    let limit = reader.read_u64()?;

    // A zero limit is what the encoder emits for an active version with no
    // payload; it carries no data.
    if limit == 0 {
        return Ok(None);
    }

    Ok(Some(SupportsData::CodeLimit64(limit)))
}

fn calculate_size(
    _data: Option<&SupportsData>,
    _cd: &CodeDirectoryBlob,
) -> Result<(u32, u32), CodesignError> {
    Ok((HEADER_SIZE, 0))
}

fn encode_header(
    data: Option<&SupportsData>,
    _cd: &CodeDirectoryBlob,
    dst: &mut dyn Write,
    _data_offset_start: u32,
    _data_offset_current: u32,
) -> Result<u64, CodesignError> {
    let limit = match data {
        Some(SupportsData::CodeLimit64(limit)) => *limit,
        _ => 0,
    };

    dst.write_u32::<BE>(0)?;
    dst.write_u64::<BE>(limit)?;

    Ok(HEADER_SIZE as u64)
}
