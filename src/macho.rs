// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Locating embedded code signatures in Mach-O binaries.
//!
//! A signed Mach-O carries an `LC_CODE_SIGNATURE` load command pointing at
//! the signature blob in the `__LINKEDIT` segment. Only thin binaries are
//! handled; universal/fat binaries must be sliced first.

use {
    crate::{blob::Blob, error::CodesignError, registry},
    goblin::mach::{load_command::CommandVariant, Mach},
    log::debug,
    std::path::Path,
};

/// Coordinates of the code signature as recorded by `LC_CODE_SIGNATURE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CodeSignatureCmd {
    pub cmd: u32,
    pub cmdsize: u32,
    /// File offset of the signature blob.
    pub offset: u32,
    /// Size in bytes of the signature blob.
    pub size: u32,
}

/// Find and decode the embedded code signature of a thin Mach-O binary.
///
/// Returns the decoded blob, the raw signature bytes, and the load command
/// that located them. The blob is required to be a code directory or a
/// super blob; anything else at the signature offset is an error.
pub fn find_code_signature(data: &[u8]) -> Result<(Blob, Vec<u8>, CodeSignatureCmd), CodesignError> {
    let macho = match Mach::parse(data)? {
        Mach::Fat(_) => {
            return Err(CodesignError::UnsupportedContainer("fat mach-o"));
        }
        Mach::Binary(macho) => macho,
    };

    let linkedit = macho
        .load_commands
        .iter()
        .find_map(|command| {
            if let CommandVariant::CodeSignature(linkedit) = command.command {
                Some(linkedit)
            } else {
                None
            }
        })
        .ok_or(CodesignError::CodeSignatureMissing)?;

    let cmd = CodeSignatureCmd {
        cmd: linkedit.cmd,
        cmdsize: linkedit.cmdsize,
        offset: linkedit.dataoff,
        size: linkedit.datasize,
    };

    debug!("code signature: {} bytes at offset {}", cmd.size, cmd.offset);

    let end = cmd.offset as u64 + cmd.size as u64;
    if end > data.len() as u64 {
        return Err(CodesignError::OffsetOutOfBounds {
            context: "mach-o code signature",
            offset: cmd.offset,
            length: data.len() as u32,
        });
    }

    let raw = data[cmd.offset as usize..end as usize].to_vec();

    let blob = registry::parse_blob(&raw)?;

    match blob {
        Blob::CodeDirectory(_) | Blob::SuperBlob(_) => Ok((blob, raw, cmd)),
        other => Err(CodesignError::TypeMismatch {
            expected: "super blob",
            got: other.variant_name(),
        }),
    }
}

/// [find_code_signature] over a file on disk.
pub fn find_code_signature_in_file(
    path: impl AsRef<Path>,
) -> Result<(Blob, Vec<u8>, CodeSignatureCmd), CodesignError> {
    let data = std::fs::read(path)?;

    find_code_signature(&data)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            blob::Magic,
            generic::GenericBlob,
            super_blob::{Slot, SuperBlob},
        },
    };

    const LC_CODE_SIGNATURE: u32 = 0x1d;

    /// A minimal arm64 Mach-O executable with a single load command
    /// pointing at `signature`.
    fn thin_macho(signature: &[u8]) -> Vec<u8> {
        let sig_offset = 32 + 16_u32;

        let mut data = Vec::new();
        data.extend_from_slice(&0xfeedfacf_u32.to_le_bytes()); // MH_MAGIC_64
        data.extend_from_slice(&0x0100000c_u32.to_le_bytes()); // CPU_TYPE_ARM64
        data.extend_from_slice(&0_u32.to_le_bytes()); // cpusubtype
        data.extend_from_slice(&2_u32.to_le_bytes()); // MH_EXECUTE
        data.extend_from_slice(&1_u32.to_le_bytes()); // ncmds
        data.extend_from_slice(&16_u32.to_le_bytes()); // sizeofcmds
        data.extend_from_slice(&0_u32.to_le_bytes()); // flags
        data.extend_from_slice(&0_u32.to_le_bytes()); // reserved

        data.extend_from_slice(&LC_CODE_SIGNATURE.to_le_bytes());
        data.extend_from_slice(&16_u32.to_le_bytes()); // cmdsize
        data.extend_from_slice(&sig_offset.to_le_bytes());
        data.extend_from_slice(&(signature.len() as u32).to_le_bytes());

        data.extend_from_slice(signature);

        data
    }

    fn embedded_signature() -> Vec<u8> {
        let mut super_blob = SuperBlob::new();
        super_blob
            .add(
                Slot::ENTITLEMENTS,
                Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"<plist/>")),
            )
            .unwrap();

        let mut encoded = Vec::new();
        super_blob.write_to(&mut encoded).unwrap();
        encoded
    }

    #[test]
    fn finds_embedded_signature() {
        let signature = embedded_signature();
        let macho = thin_macho(&signature);

        let (blob, raw, cmd) = find_code_signature(&macho).unwrap();

        assert_eq!(raw, signature);
        assert_eq!(cmd.cmd, LC_CODE_SIGNATURE);
        assert_eq!(cmd.offset, 48);
        assert_eq!(cmd.size, signature.len() as u32);

        let Blob::SuperBlob(super_blob) = blob else {
            panic!("expected a super blob");
        };
        assert_eq!(super_blob.count(), 1);
    }

    #[test]
    fn rejects_unsigned_binary() {
        let mut data = thin_macho(&[]);
        // Retype the load command so no signature command remains.
        data[32..36].copy_from_slice(&0x26_u32.to_le_bytes()); // LC_FUNCTION_STARTS

        assert!(matches!(
            find_code_signature(&data),
            Err(CodesignError::CodeSignatureMissing)
        ));
    }

    #[test]
    fn rejects_fat_binary() {
        let signature = embedded_signature();
        let thin = thin_macho(&signature);

        let mut fat = Vec::new();
        fat.extend_from_slice(&0xcafebabe_u32.to_be_bytes()); // FAT_MAGIC
        fat.extend_from_slice(&1_u32.to_be_bytes()); // nfat_arch
        fat.extend_from_slice(&0x0100000c_u32.to_be_bytes()); // cputype
        fat.extend_from_slice(&0_u32.to_be_bytes()); // cpusubtype
        fat.extend_from_slice(&4096_u32.to_be_bytes()); // offset
        fat.extend_from_slice(&(thin.len() as u32).to_be_bytes()); // size
        fat.extend_from_slice(&12_u32.to_be_bytes()); // align
        fat.resize(4096, 0);
        fat.extend_from_slice(&thin);

        assert!(matches!(
            find_code_signature(&fat),
            Err(CodesignError::UnsupportedContainer("fat mach-o"))
        ));
    }

    #[test]
    fn rejects_non_signature_blob() {
        let mut payload = Vec::new();
        Blob::Generic(GenericBlob::new(Magic::ENTITLEMENTS, b"x"))
            .write_to(&mut payload)
            .unwrap();
        let macho = thin_macho(&payload);

        assert!(matches!(
            find_code_signature(&macho),
            Err(CodesignError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_truncated_signature_bounds() {
        let signature = embedded_signature();
        let mut macho = thin_macho(&signature);
        // Inflate the recorded size past the end of the file.
        macho[44..48].copy_from_slice(&0x1000_u32.to_le_bytes());

        assert!(matches!(
            find_code_signature(&macho),
            Err(CodesignError::OffsetOutOfBounds { .. })
        ));
    }
}
