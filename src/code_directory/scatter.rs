// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The scatter (version 0x020100) CodeDirectory fields.
//!
//! A scatter vector maps runs of hashed pages to their positions in the
//! signed file. On the wire the vector is terminated by a sentinel entry
//! with a zero count; the decoded form drops the sentinel and the encoder
//! restores it.

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
    version: 0x0201_00,
    full_name: "CODEDIRECTORY_SUPPORTS_SCATTER",
    short_name: "scatter",
    decoder: decode,
    size_calculator: calculate_size,
    header_encoder: encode_header,
    body_encoder: Some(encode_body),
};

/// Size in bytes of one encoded scatter entry.
const SCATTER_SIZE: u32 = 24;

/// One run of hashed pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Scatter {
    /// Number of pages in this run; zero marks the sentinel.
    pub count: u32,
    /// Index of the first code slot covered by this run.
    pub base: u32,
    /// Byte offset of the run in the signed file.
    pub target_offset: u64,
}

/// A decoded scatter vector, sentinel excluded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScatterSet(pub Vec<Scatter>);

impl ScatterSet {
    /// Total number of pages covered by the vector.
    pub fn total_count(&self) -> u64 {
        self.0.iter().map(|scatter| scatter.count as u64).sum()
    }
}

fn check_page_count(set: &ScatterSet, cd: &CodeDirectoryBlob) -> Result<(), CodesignError> {
    let pages = set.total_count();

    if pages != cd.code_slots.len() as u64 {
        return Err(CodesignError::ScatterCountMismatch {
            pages,
            code_slots: cd.code_slots.len() as u64,
        });
    }

    Ok(())
}

fn decode(
    cd: &mut CodeDirectoryBlob,
    reader: &mut BlobReader<'_>,
) -> Result<Option<SupportsData>, CodesignError> {
    let offset = reader.read_u32()?;

    if offset == 0 {
        return Ok(None);
    }

    let length = reader.length();
    if length < offset {
        return Err(CodesignError::OffsetOutOfBounds {
            context: "scatter",
            offset,
            length,
        });
    }

    // The entry count is not stored anywhere; walk entries until the
    // sentinel or the end of the blob.
    let mut position = offset;
    let mut set = ScatterSet::default();

    while length - position > SCATTER_SIZE {
        let raw = reader.bytes_at(position, SCATTER_SIZE as usize, "scatter")?;

        let count = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        if count == 0 {
            break;
        }

        set.0.push(Scatter {
            count,
            base: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
            target_offset: u64::from_be_bytes([
                raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15],
            ]),
        });

        position += SCATTER_SIZE;
    }

    check_page_count(&set, cd)?;

    Ok(Some(SupportsData::Scatter(set)))
}

fn calculate_size(
    data: Option<&SupportsData>,
    cd: &CodeDirectoryBlob,
) -> Result<(u32, u32), CodesignError> {
    let mut body = 0;

    if let Some(SupportsData::Scatter(set)) = data {
        check_page_count(set, cd)?;

        // One extra entry for the sentinel.
        body = (set.0.len() as u32 + 1) * SCATTER_SIZE;
    }

    Ok((4, body))
}

fn encode_header(
    data: Option<&SupportsData>,
    _cd: &CodeDirectoryBlob,
    dst: &mut dyn Write,
    _data_offset_start: u32,
    data_offset_current: u32,
) -> Result<u64, CodesignError> {
    let offset = if data.is_some() {
        data_offset_current
    } else {
        0
    };

    dst.write_u32::<BE>(offset)?;

    Ok(4)
}

fn encode_body(
    data: Option<&SupportsData>,
    _cd: &CodeDirectoryBlob,
    dst: &mut dyn Write,
) -> Result<u64, CodesignError> {
    let Some(SupportsData::Scatter(set)) = data else {
        return Ok(0);
    };

    let sentinel = Scatter {
        count: 0,
        base: 0,
        target_offset: 0,
    };

    let mut written = 0u64;

    for scatter in set.0.iter().chain(std::iter::once(&sentinel)) {
        dst.write_u32::<BE>(scatter.count)?;
        dst.write_u32::<BE>(scatter.base)?;
        dst.write_u64::<BE>(scatter.target_offset)?;
        dst.write_u64::<BE>(0)?;

        written += SCATTER_SIZE as u64;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_count() {
        let set = ScatterSet(vec![
            Scatter {
                count: 3,
                base: 0,
                target_offset: 0,
            },
            Scatter {
                count: u32::MAX,
                base: 3,
                target_offset: 0x1000,
            },
        ]);

        assert_eq!(set.total_count(), 3 + u32::MAX as u64);
    }
}
