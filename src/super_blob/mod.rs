// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! SuperBlobs: the container blob holding an entire embedded signature.
//!
//! A SuperBlob is an index of `{slot, offset}` pairs followed by the
//! child blobs at their declared offsets. Slots are unique, and of the
//! code directories in a SuperBlob the one with the highest hash type
//! priority is the directory that seals the signature. Two directories
//! sharing a priority would make that choice ambiguous, so they are
//! rejected.

mod slot;

pub use slot::Slot;

use {
    crate::{
        blob::{Blob, BlobHeader, Magic, BLOB_HEADER_SIZE},
        code_directory::CodeDirectoryBlob,
        error::CodesignError,
        registry::{self, BlobTypeMetadata},
    },
    byteorder::{WriteBytesExt, BE},
    scroll::Pread,
    std::{
        fmt::{Display, Formatter},
        io::Write,
    },
};

pub(crate) const METADATA: BlobTypeMetadata = BlobTypeMetadata {
    magic: 0xfade0cc0,
    name: "CSMAGIC_EMBEDDED_SIGNATURE",
    decoder: Some(decode),
    encoder: Some(encode),
};

/// Size in bytes of one encoded index entry.
const INDEX_SIZE: u32 = 8;

/// One slot of a [SuperBlob].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuperBlobEntry {
    pub slot: Slot,
    pub blob: Blob,
}

impl Display for SuperBlobEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Index{{type: {}, magic: {}}}",
            self.slot,
            self.blob.magic()
        )
    }
}

/// A blob containing other blobs, one per slot.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SuperBlob {
    entries: Vec<SuperBlobEntry>,
    best_cd: Option<usize>,
}

impl SuperBlob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn magic(&self) -> Magic {
        Magic::EMBEDDED_SIGNATURE
    }

    /// The size of this blob in its encoded form, header included.
    pub fn length(&self) -> Result<u32, CodesignError> {
        let (length, _) = self.calculate_indexes()?;

        Ok(length)
    }

    /// The number of blobs stored in this SuperBlob.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// The entry at the given index position, if it exists.
    pub fn get_at(&self, position: usize) -> Option<&SuperBlobEntry> {
        self.entries.get(position)
    }

    /// The entry occupying the given slot, if any.
    pub fn get(&self, slot: Slot) -> Option<&SuperBlobEntry> {
        self.entries.iter().find(|entry| entry.slot == slot)
    }

    /// The code directory whose hash type has the highest priority.
    pub fn best_code_directory(&self) -> Option<&CodeDirectoryBlob> {
        match self.best_cd.map(|position| &self.entries[position].blob) {
            Some(Blob::CodeDirectory(cd)) => Some(cd),
            _ => None,
        }
    }

    /// Insert a blob into the given slot.
    ///
    /// The slot must be vacant. A code directory slot additionally
    /// requires a [Blob::CodeDirectory] with a hash type priority no
    /// other code directory in this SuperBlob holds.
    pub fn add(&mut self, slot: Slot, blob: Blob) -> Result<(), CodesignError> {
        if self.get(slot).is_some() {
            return Err(CodesignError::DuplicateSlot(slot));
        }

        self.entries.push(SuperBlobEntry { slot, blob });

        if slot.is_code_directory() {
            if let Err(err) = self.arbitrate_code_directory(self.entries.len() - 1) {
                self.entries.pop();
                return Err(err);
            }
        }

        Ok(())
    }

    /// Encode this SuperBlob and its children, returning bytes written.
    pub fn write_to(&self, dst: &mut dyn Write) -> Result<u64, CodesignError> {
        let (length, indexes) = self.calculate_indexes()?;

        let header = BlobHeader {
            magic: Magic::EMBEDDED_SIGNATURE,
            length,
        };

        let mut written = header.write_to(dst)?;

        dst.write_u32::<BE>(self.entries.len() as u32)?;
        written += 4;

        for (slot, offset) in &indexes {
            dst.write_u32::<BE>(slot.0)?;
            dst.write_u32::<BE>(*offset)?;
            written += INDEX_SIZE as u64;
        }

        for entry in &self.entries {
            written += entry.blob.write_to(dst)?;
        }

        Ok(written)
    }

    /// Index entries with their body offsets, plus the total length.
    fn calculate_indexes(&self) -> Result<(u32, Vec<(Slot, u32)>), CodesignError> {
        let mut offset = BLOB_HEADER_SIZE + 4 + INDEX_SIZE * self.entries.len() as u32;

        let indexes = self
            .entries
            .iter()
            .map(|entry| {
                let index = (entry.slot, offset);
                offset += entry.blob.length()?;

                Ok(index)
            })
            .collect::<Result<Vec<_>, CodesignError>>()?;

        Ok((offset, indexes))
    }

    /// Validate the code directory at `position` and update the best
    /// directory choice.
    fn arbitrate_code_directory(&mut self, position: usize) -> Result<(), CodesignError> {
        let Blob::CodeDirectory(cd) = &self.entries[position].blob else {
            return Err(CodesignError::TypeMismatch {
                expected: "code directory",
                got: self.entries[position].blob.variant_name(),
            });
        };

        let priority = cd.hash_type.priority();

        for (index, entry) in self.entries.iter().enumerate() {
            if index == position || !entry.slot.is_code_directory() {
                continue;
            }

            if let Blob::CodeDirectory(other) = &entry.blob {
                if other.hash_type.priority() == priority {
                    return Err(CodesignError::DuplicateCodeDirectoryPriority(priority));
                }
            }
        }

        let best_priority = match self.best_cd.map(|best| &self.entries[best].blob) {
            Some(Blob::CodeDirectory(best)) => Some(best.hash_type.priority()),
            _ => None,
        };

        if best_priority.map_or(true, |best| best < priority) {
            self.best_cd = Some(position);
        }

        Ok(())
    }
}

impl Display for SuperBlob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SuperBlob{{magic: {}, entries: {}}}",
            self.magic(),
            self.entries.len()
        )
    }
}

fn decode(header: BlobHeader, data: &[u8]) -> Result<Blob, CodesignError> {
    if header.magic != Magic::EMBEDDED_SIGNATURE {
        return Err(CodesignError::MagicMismatch {
            context: "super blob",
            got: header.magic.0,
            expected: Magic::EMBEDDED_SIGNATURE.0,
        });
    }

    let mut position = BLOB_HEADER_SIZE as usize;
    let count = data.gread_with::<u32>(&mut position, scroll::BE)?;

    if header.length / INDEX_SIZE < count {
        return Err(CodesignError::SlotOverflow("super blob index"));
    }

    let mut super_blob = SuperBlob::new();

    for _ in 0..count {
        let slot = Slot(data.gread_with::<u32>(&mut position, scroll::BE)?);
        let offset = data.gread_with::<u32>(&mut position, scroll::BE)?;

        if header.length < offset {
            return Err(CodesignError::OffsetOutOfBounds {
                context: "super blob index",
                offset,
                length: header.length,
            });
        }

        let blob = registry::parse_blob(&data[offset as usize..])?;

        super_blob.add(slot, blob)?;
    }

    Ok(Blob::SuperBlob(super_blob))
}

fn encode(blob: &Blob, dst: &mut dyn Write) -> Result<u64, CodesignError> {
    let Blob::SuperBlob(super_blob) = blob else {
        return Err(CodesignError::TypeMismatch {
            expected: "super blob",
            got: blob.variant_name(),
        });
    };

    super_blob.write_to(dst)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{code_directory::CodeDirectoryBlob, generic::GenericBlob, hash::HashType},
    };

    fn decode_super(data: &[u8]) -> SuperBlob {
        match registry::parse_blob(data).unwrap() {
            Blob::SuperBlob(super_blob) => super_blob,
            other => panic!("expected a super blob, got {}", other.variant_name()),
        }
    }

    fn code_directory(hash_type: HashType) -> Blob {
        let slot_size = hash_type.slot_size() as usize;

        Blob::CodeDirectory(CodeDirectoryBlob {
            identity: "com.example.app".to_string(),
            hash_type,
            code_slots: vec![vec![0xcd; slot_size]],
            ..Default::default()
        })
    }

    #[test]
    fn single_entry_layout() {
        let mut super_blob = SuperBlob::new();
        super_blob
            .add(
                Slot::ENTITLEMENTS,
                Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"abc")),
            )
            .unwrap();

        let mut encoded = Vec::new();
        let written = super_blob.write_to(&mut encoded).unwrap();

        // Header + count + one index = 20, child blob 11 bytes.
        assert_eq!(written, 31);
        assert_eq!(super_blob.length().unwrap(), 31);

        assert_eq!(&encoded[0..4], &[0xfa, 0xde, 0x0c, 0xc0]);
        assert_eq!(&encoded[4..8], &31u32.to_be_bytes());
        assert_eq!(&encoded[8..12], &1u32.to_be_bytes());
        assert_eq!(&encoded[12..16], &5u32.to_be_bytes());
        assert_eq!(&encoded[16..20], &20u32.to_be_bytes());
        assert_eq!(&encoded[20..24], &[0xfa, 0xde, 0x71, 0x71]);
        assert_eq!(&encoded[24..28], &11u32.to_be_bytes());
        assert_eq!(&encoded[28..31], b"abc");

        let decoded = decode_super(&encoded);
        assert_eq!(decoded.count(), 1);
        assert_eq!(decoded, super_blob);
        assert!(decoded.get(Slot::ENTITLEMENTS).is_some());
        assert!(decoded.get(Slot::REQUIREMENTS).is_none());
    }

    #[test]
    fn best_code_directory_by_priority() {
        let mut super_blob = SuperBlob::new();
        super_blob
            .add(Slot::CODE_DIRECTORY, code_directory(HashType::SHA1))
            .unwrap();
        super_blob
            .add(
                Slot::ALTERNATE_CODE_DIRECTORY_0,
                code_directory(HashType::SHA256),
            )
            .unwrap();

        assert_eq!(
            super_blob.best_code_directory().unwrap().hash_type,
            HashType::SHA256
        );

        let mut encoded = Vec::new();
        super_blob.write_to(&mut encoded).unwrap();

        let decoded = decode_super(&encoded);
        assert_eq!(decoded.count(), 2);
        assert_eq!(
            decoded.best_code_directory().unwrap().hash_type,
            HashType::SHA256
        );
    }

    #[test]
    fn rejects_duplicate_hash_priority() {
        let mut super_blob = SuperBlob::new();
        super_blob
            .add(Slot::CODE_DIRECTORY, code_directory(HashType::SHA256))
            .unwrap();

        // Equal priority on a non-best directory is also ambiguous.
        super_blob
            .add(
                Slot::ALTERNATE_CODE_DIRECTORY_0,
                code_directory(HashType::SHA1),
            )
            .unwrap();

        let err = super_blob
            .add(Slot(0x1001), code_directory(HashType::SHA1))
            .unwrap_err();

        assert!(matches!(
            err,
            CodesignError::DuplicateCodeDirectoryPriority(1)
        ));
        assert_eq!(super_blob.count(), 2);
    }

    #[test]
    fn rejects_duplicate_slot() {
        let mut super_blob = SuperBlob::new();
        super_blob
            .add(
                Slot::REQUIREMENTS,
                Blob::Generic(GenericBlob::new(Magic::REQUIREMENT_SET, b"")),
            )
            .unwrap();

        assert!(matches!(
            super_blob.add(
                Slot::REQUIREMENTS,
                Blob::Generic(GenericBlob::new(Magic::REQUIREMENT_SET, b"")),
            ),
            Err(CodesignError::DuplicateSlot(Slot::REQUIREMENTS))
        ));
    }

    #[test]
    fn rejects_duplicate_slot_on_decode() {
        let mut super_blob = SuperBlob::new();
        super_blob
            .add(
                Slot::ENTITLEMENTS,
                Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"abc")),
            )
            .unwrap();
        super_blob
            .add(
                Slot::REQUIREMENTS,
                Blob::Generic(GenericBlob::new(Magic::REQUIREMENT_SET, b"def")),
            )
            .unwrap();

        let mut encoded = Vec::new();
        super_blob.write_to(&mut encoded).unwrap();

        // Point the second index at the first entry's slot.
        encoded[20..24].copy_from_slice(&Slot::ENTITLEMENTS.0.to_be_bytes());

        assert!(matches!(
            registry::parse_blob(&encoded),
            Err(CodesignError::DuplicateSlot(Slot::ENTITLEMENTS))
        ));
    }

    #[test]
    fn rejects_non_directory_in_directory_slot() {
        let mut super_blob = SuperBlob::new();

        assert!(matches!(
            super_blob.add(
                Slot::CODE_DIRECTORY,
                Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"abc")),
            ),
            Err(CodesignError::TypeMismatch { .. })
        ));
        assert_eq!(super_blob.count(), 0);
    }

    #[test]
    fn rejects_index_count_overflow() {
        let mut encoded = Vec::new();
        SuperBlob::new().write_to(&mut encoded).unwrap();

        // Claim more indexes than the blob could hold.
        encoded[8..12].copy_from_slice(&100u32.to_be_bytes());

        assert!(matches!(
            registry::parse_blob(&encoded),
            Err(CodesignError::SlotOverflow("super blob index"))
        ));
    }

    #[test]
    fn rejects_index_offset_overflow() {
        let mut super_blob = SuperBlob::new();
        super_blob
            .add(
                Slot::ENTITLEMENTS,
                Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"abc")),
            )
            .unwrap();

        let mut encoded = Vec::new();
        super_blob.write_to(&mut encoded).unwrap();

        encoded[16..20].copy_from_slice(&1000u32.to_be_bytes());

        assert!(matches!(
            registry::parse_blob(&encoded),
            Err(CodesignError::OffsetOutOfBounds {
                context: "super blob index",
                ..
            })
        ));
    }

    #[test]
    fn nested_super_blob_round_trip() {
        let mut inner = SuperBlob::new();
        inner
            .add(
                Slot::ENTITLEMENTS,
                Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"abc")),
            )
            .unwrap();

        let mut outer = SuperBlob::new();
        outer.add(Slot::TICKET, Blob::SuperBlob(inner)).unwrap();

        let mut encoded = Vec::new();
        outer.write_to(&mut encoded).unwrap();

        let decoded = decode_super(&encoded);
        assert_eq!(decoded, outer);
    }
}
