// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Unified error type for code signature blob handling.
#[derive(Debug, Error)]
pub enum CodesignError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("data structure parse error: {0}")]
    Scroll(#[from] scroll::Error),

    #[error("binary parsing error: {0}")]
    Goblin(#[from] goblin::error::Error),

    #[error("bad magic in {context}: 0x{got:08x} != 0x{expected:08x}")]
    MagicMismatch {
        context: &'static str,
        got: u32,
        expected: u32,
    },

    #[error("blob header contains invalid length: {0}")]
    LengthInvalid(u32),

    #[error("offset {offset} in {context} overflows blob length {length}")]
    OffsetOutOfBounds {
        context: &'static str,
        offset: u32,
        length: u32,
    },

    #[error("{0} slot table overflows the blob bounds")]
    SlotOverflow(&'static str),

    #[error("{context} slot {index} holds a digest smaller than the hash type's slot size")]
    SlotTooSmall { context: &'static str, index: usize },

    #[error("unsupported hash type: 0x{0:02x}")]
    UnsupportedHashType(u8),

    #[error("hash size mismatch: wire size {wire} != registered slot size {registered}")]
    HashSizeMismatch { wire: u8, registered: u8 },

    #[error("duplicate blob for slot {0}")]
    DuplicateSlot(crate::super_blob::Slot),

    #[error("multiple code directories share hash priority {0}")]
    DuplicateCodeDirectoryPriority(i32),

    #[error("decoded blob is a {got}, expected a {expected}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    #[error("unsupported container: {0}")]
    UnsupportedContainer(&'static str),

    #[error("mach-o binary has no code signature load command")]
    CodeSignatureMissing,

    #[error("code signature coordinates exceed 32 bits: offset {offset}, length {length}")]
    SignatureOutOfRange { offset: u64, length: u64 },

    #[error("no encoder registered for blob magic 0x{0:08x}")]
    EncoderMissing(u32),

    #[error("NUL terminated string not found at offset {offset} in {context}")]
    StringNotTerminated { context: &'static str, offset: u32 },

    #[error("string at offset {offset} in {context} is not valid UTF-8")]
    StringNotUtf8 { context: &'static str, offset: u32 },

    #[error("page size {0} is not an expressible power of two")]
    PageSizeInvalid(u32),

    #[error("scatter pages ({pages}) do not match the number of code slots ({code_slots})")]
    ScatterCountMismatch { pages: u64, code_slots: u64 },

    #[error("pre-encrypt slot count does not match code slot count")]
    PreEncryptCountMismatch,
}
