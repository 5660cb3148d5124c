// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The exec_seg (version 0x020400) CodeDirectory fields: the bounds and
//! policy flags of the executable segment.

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
    version: 0x0204_00,
    full_name: "CODEDIRECTORY_SUPPORTS_EXECSEG",
    short_name: "exec_seg",
    decoder: decode,
    size_calculator: calculate_size,
    header_encoder: encode_header,
    body_encoder: None,
};

const HEADER_SIZE: u32 = 24;

bitflags::bitflags! {
    /// Policy flags applied to the executable segment.
    pub struct ExecSegmentFlags: u64 {
        /// Executable segment denotes main binary.
        const MAIN_BINARY = 0x01;
        /// Allow unsigned pages (for debugging).
        const ALLOW_UNSIGNED = 0x10;
        /// Main binary is debugger.
        const DEBUGGER = 0x20;
        /// JIT enabled.
        const JIT = 0x40;
        /// Skip library validation.
        const SKIP_LIBRARY_VALIDATION = 0x80;
        /// Can bless cdhash for execution.
        const CAN_LOAD_CD_HASH = 0x100;
        /// Can execute blessed cdhash.
        const CAN_EXEC_CD_HASH = 0x200;
    }
}

/// Bounds and flags of the executable segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecSegment {
    /// File offset of the executable segment.
    pub base: u64,
    /// Limit of the executable segment.
    pub limit: u64,
    pub flags: ExecSegmentFlags,
}

fn decode(
    _cd: &mut CodeDirectoryBlob,
    reader: &mut BlobReader<'_>,
) -> Result<Option<SupportsData>, CodesignError> {
    let base = reader.read_u64()?;
    let limit = reader.read_u64()?;
    let flags = unsafe { ExecSegmentFlags::from_bits_unchecked(reader.read_u64()?) };

    // All-zero fields are what the encoder emits for an active version
    // with no payload.
    if base == 0 && limit == 0 && flags.is_empty() {
        return Ok(None);
    }

    Ok(Some(SupportsData::ExecSegment(ExecSegment {
        base,
        limit,
        flags,
    })))
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
    let segment = match data {
        Some(SupportsData::ExecSegment(segment)) => *segment,
        _ => ExecSegment {
            base: 0,
            limit: 0,
            flags: ExecSegmentFlags::empty(),
        },
    };

    dst.write_u64::<BE>(segment.base)?;
    dst.write_u64::<BE>(segment.limit)?;
    dst.write_u64::<BE>(segment.flags.bits())?;

    Ok(HEADER_SIZE as u64)
}
