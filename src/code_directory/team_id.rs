// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The team_id (version 0x020200) CodeDirectory fields.
//!
//! A single offset to a NUL terminated team identifier. The string itself
//! is interleaved into the base descriptor's heap, directly after the
//! identity, so this descriptor declares a zero body size and only points
//! into data the base body encoder writes.

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
    version: 0x0202_00,
    full_name: "CODEDIRECTORY_SUPPORTS_TEAMID",
    short_name: "team_id",
    decoder: decode,
    size_calculator: calculate_size,
    header_encoder: encode_header,
    body_encoder: None,
};

fn decode(
    _cd: &mut CodeDirectoryBlob,
    reader: &mut BlobReader<'_>,
) -> Result<Option<SupportsData>, CodesignError> {
    let offset = reader.read_u32()?;

    if offset == 0 {
        return Ok(None);
    }

    let team_id = reader.cstr_at(offset, "team id")?;

    Ok(Some(SupportsData::TeamId(team_id.to_string())))
}

fn calculate_size(
    _data: Option<&SupportsData>,
    _cd: &CodeDirectoryBlob,
) -> Result<(u32, u32), CodesignError> {
    Ok((4, 0))
}

fn encode_header(
    data: Option<&SupportsData>,
    cd: &CodeDirectoryBlob,
    dst: &mut dyn Write,
    data_offset_start: u32,
    _data_offset_current: u32,
) -> Result<u64, CodesignError> {
    let offset = if data.is_some() {
        let identity_end = if cd.identity.is_empty() {
            0
        } else {
            cd.identity.len() as u32 + 1
        };

        data_offset_start + identity_end
    } else {
        0
    };

    dst.write_u32::<BE>(offset)?;

    Ok(4)
}
