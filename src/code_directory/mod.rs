// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CodeDirectory blobs.
//!
//! A CodeDirectory is the core of a code signature: it records the
//! identity of the signed code and a hash per page of the signed content.
//! Its header is versioned; the fields for each version are handled by a
//! descriptor registered in [supports]. Encoding walks the active
//! descriptors twice, once for the fixed header fields and once for the
//! out of line bodies, so every offset written in a header points at data
//! produced later in the same pass.

mod base;
mod code_limit_64;
mod exec_segment;
mod flags;
mod linkage;
mod runtime;
mod scatter;
pub mod supports;
mod team_id;

pub use {
    exec_segment::{ExecSegment, ExecSegmentFlags},
    flags::CodeDirectoryFlags,
    linkage::Linkage,
    runtime::{Runtime, RuntimeVersion},
    scatter::{Scatter, ScatterSet},
    supports::{register_supports_version, SupportsData, SupportsVersion},
};

use {
    crate::{
        blob::{Blob, BlobHeader, Magic, BLOB_HEADER_SIZE},
        error::CodesignError,
        hash::HashType,
        registry::BlobTypeMetadata,
    },
    scroll::Pread,
    std::{
        collections::BTreeMap,
        fmt::{Display, Formatter},
        io::Write,
    },
    supports::SupportsMetadata,
};

pub(crate) const METADATA: BlobTypeMetadata = BlobTypeMetadata {
    magic: 0xfade0c02,
    name: "CSMAGIC_CODEDIRECTORY",
    decoder: Some(decode),
    encoder: Some(encode),
};

/// Bounded reader over a single encoded blob, header included.
///
/// Sequential reads feed the fixed header fields; absolute reads fetch
/// heap data the header fields point at. All offsets are relative to the
/// start of the blob.
pub struct BlobReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BlobReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            position: BLOB_HEADER_SIZE as usize,
        }
    }

    /// The length of the blob in bytes.
    pub fn length(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn read_u8(&mut self) -> Result<u8, CodesignError> {
        Ok(self.data.gread_with(&mut self.position, scroll::BE)?)
    }

    pub fn read_u16(&mut self) -> Result<u16, CodesignError> {
        Ok(self.data.gread_with(&mut self.position, scroll::BE)?)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodesignError> {
        Ok(self.data.gread_with(&mut self.position, scroll::BE)?)
    }

    pub fn read_u64(&mut self) -> Result<u64, CodesignError> {
        Ok(self.data.gread_with(&mut self.position, scroll::BE)?)
    }

    /// Borrow `len` bytes at an absolute offset.
    pub fn bytes_at(
        &self,
        offset: u32,
        len: usize,
        context: &'static str,
    ) -> Result<&'a [u8], CodesignError> {
        let start = offset as usize;

        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(&self.data[start..end]),
            _ => Err(CodesignError::OffsetOutOfBounds {
                context,
                offset,
                length: self.length(),
            }),
        }
    }

    /// Borrow a NUL terminated string at an absolute offset.
    pub fn cstr_at(&self, offset: u32, context: &'static str) -> Result<&'a str, CodesignError> {
        if self.length() < offset {
            return Err(CodesignError::OffsetOutOfBounds {
                context,
                offset,
                length: self.length(),
            });
        }

        let tail = &self.data[offset as usize..];
        let nul = tail
            .iter()
            .position(|b| *b == 0)
            .ok_or(CodesignError::StringNotTerminated { context, offset })?;

        std::str::from_utf8(&tail[..nul])
            .map_err(|_| CodesignError::StringNotUtf8 { context, offset })
    }
}

/// A decoded CodeDirectory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeDirectoryBlob {
    pub flags: CodeDirectoryFlags,
    pub identity: String,
    pub hash_type: HashType,
    /// One hash per page of signed content, ascending page order.
    pub code_slots: Vec<Vec<u8>>,
    /// Hashes of auxiliary blobs, indexed by special slot number - 1.
    pub special_slots: Vec<Vec<u8>>,
    pub code_limit: u32,
    pub platform: u8,
    /// Page granularity in bytes; must be a power of two.
    pub page_size: u32,
    /// Payload per format version. A `None` value marks a version that is
    /// declared by the header but carries no data for this directory.
    pub supports_data: BTreeMap<SupportsVersion, Option<SupportsData>>,
}

impl Default for CodeDirectoryBlob {
    fn default() -> Self {
        Self {
            flags: CodeDirectoryFlags::empty(),
            identity: String::new(),
            hash_type: HashType::SHA256,
            code_slots: Vec::new(),
            special_slots: Vec::new(),
            code_limit: 0,
            platform: 0,
            page_size: 4096,
            supports_data: BTreeMap::new(),
        }
    }
}

impl CodeDirectoryBlob {
    pub fn magic(&self) -> Magic {
        Magic::CODE_DIRECTORY
    }

    /// The effective format version: the highest version with an entry in
    /// [Self::supports_data], or the base version when there is none.
    pub fn version(&self) -> SupportsVersion {
        self.supports_data
            .keys()
            .next_back()
            .copied()
            .unwrap_or(SupportsVersion::BASE)
    }

    /// The registered team identifier, if any.
    pub fn team_id(&self) -> Option<&str> {
        match self.supports_data.get(&SupportsVersion::TEAM_ID) {
            Some(Some(SupportsData::TeamId(team_id))) => Some(team_id.as_str()),
            _ => None,
        }
    }

    /// Attach a team identifier, raising the effective version if needed.
    pub fn set_team_id(&mut self, team_id: impl Into<String>) {
        self.supports_data.insert(
            SupportsVersion::TEAM_ID,
            Some(SupportsData::TeamId(team_id.into())),
        );
    }

    /// The size of this directory in its encoded form, header included.
    pub fn length(&self) -> Result<u32, CodesignError> {
        let (_, header_size, body_size) = self.calculate_sizes()?;

        Ok(BLOB_HEADER_SIZE + header_size + body_size)
    }

    /// The digest of the encoded directory, the `cdhash`.
    pub fn hash(&self) -> Result<Vec<u8>, CodesignError> {
        let mut encoded = Vec::new();
        self.write_to(&mut encoded)?;

        self.hash_type.digest_data(&encoded)
    }

    /// Encode this directory to a writer, returning bytes written.
    pub fn write_to(&self, dst: &mut dyn Write) -> Result<u64, CodesignError> {
        let (sizes, header_size, body_size) = self.calculate_sizes()?;
        let header_size = header_size + BLOB_HEADER_SIZE;

        let header = BlobHeader {
            magic: Magic::CODE_DIRECTORY,
            length: header_size + body_size,
        };

        let mut written = header.write_to(dst)?;

        for (meta, body_offset) in &sizes {
            written += (meta.header_encoder)(
                self.data_for(meta),
                self,
                dst,
                header_size,
                header_size + body_offset,
            )?;
        }

        for (meta, _) in &sizes {
            if let Some(body_encoder) = meta.body_encoder {
                written += body_encoder(self.data_for(meta), self, dst)?;
            }
        }

        Ok(written)
    }

    fn data_for(&self, meta: &SupportsMetadata) -> Option<&SupportsData> {
        self.supports_data
            .get(&SupportsVersion(meta.version))
            .and_then(|data| data.as_ref())
    }

    /// Per-descriptor body offsets plus total header and body sizes, for
    /// every descriptor active at the effective version.
    fn calculate_sizes(&self) -> Result<(Vec<(SupportsMetadata, u32)>, u32, u32), CodesignError> {
        let version = self.version();

        let mut sizes = Vec::new();
        let mut header_size = 0u32;
        let mut body_size = 0u32;

        for meta in supports::descriptors() {
            if version.0 < meta.version {
                break;
            }

            let (ver_header, ver_body) = (meta.size_calculator)(self.data_for(&meta), self)?;

            sizes.push((meta, body_size));

            header_size += ver_header;
            body_size += ver_body;
        }

        Ok((sizes, header_size, body_size))
    }
}

impl Display for CodeDirectoryBlob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "CodeDirectory{{version: {}, identity: {}, flags: {}, hash_type: {}, hashes: {}+{}, ",
            self.version(),
            self.identity,
            self.flags,
            self.hash_type,
            self.code_slots.len(),
            self.special_slots.len(),
        )?;

        match self.hash() {
            Ok(hash) => write!(f, "cd_hash: {}}}", hex::encode(hash)),
            Err(err) => write!(f, "cd_hash: ERR({err})}}"),
        }
    }
}

fn decode(header: BlobHeader, data: &[u8]) -> Result<Blob, CodesignError> {
    if header.magic != Magic::CODE_DIRECTORY {
        return Err(CodesignError::MagicMismatch {
            context: "code directory",
            got: header.magic.0,
            expected: Magic::CODE_DIRECTORY.0,
        });
    }

    // The version field leads the payload; it picks the descriptors to run
    // even when the later ones end up contributing no data.
    let wire_version = data.pread_with::<u32>(BLOB_HEADER_SIZE as usize, scroll::BE)?;

    let mut cd = CodeDirectoryBlob {
        page_size: 0,
        ..Default::default()
    };
    let mut reader = BlobReader::new(data);

    for meta in supports::descriptors() {
        if wire_version < meta.version {
            break;
        }

        if let Some(data) = (meta.decoder)(&mut cd, &mut reader)? {
            cd.supports_data
                .insert(SupportsVersion(meta.version), Some(data));
        }
    }

    Ok(Blob::CodeDirectory(cd))
}

fn encode(blob: &Blob, dst: &mut dyn Write) -> Result<u64, CodesignError> {
    let Blob::CodeDirectory(cd) = blob else {
        return Err(CodesignError::TypeMismatch {
            expected: "code directory",
            got: blob.variant_name(),
        });
    };

    cd.write_to(dst)
}
