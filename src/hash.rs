// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Digest algorithm registry.
//!
//! Code signature hash types are small integers with associated metadata:
//! a globally unique priority rank, a slot width, and a digest width. The
//! two widths differ for truncated variants (SHA256_TRUNCATED stores the
//! first 20 bytes of a 32 byte digest).

use {
    crate::error::CodesignError,
    digest::DynDigest,
    once_cell::sync::Lazy,
    sha1::Sha1,
    sha2::{Sha256, Sha384, Sha512},
    std::{
        fmt::{Display, Formatter},
        sync::RwLock,
    },
};

/// Identifier of a digest algorithm as stored on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HashType(pub u8);

impl HashType {
    pub const INVALID: HashType = HashType(0);
    pub const SHA1: HashType = HashType(1);
    pub const SHA256: HashType = HashType(2);
    pub const SHA256_TRUNCATED: HashType = HashType(3);
    pub const SHA384: HashType = HashType(4);
    pub const SHA512: HashType = HashType(5);
}

/// Registry metadata describing one hash type.
#[derive(Clone, Copy)]
pub struct HashTypeMetadata {
    /// Rank used to pick the "best" hash type in a set; higher wins.
    /// Zero or below means the type must not be used.
    pub priority: i32,
    pub name: &'static str,
    /// Width in bytes of a slot holding this digest.
    pub slot_size: u8,
    /// Width in bytes of the raw digest output.
    pub digest_size: u8,
    pub new_digest: Option<fn() -> Box<dyn DynDigest>>,
}

fn new_sha1() -> Box<dyn DynDigest> {
    Box::new(Sha1::default())
}

fn new_sha256() -> Box<dyn DynDigest> {
    Box::new(Sha256::default())
}

fn new_sha384() -> Box<dyn DynDigest> {
    Box::new(Sha384::default())
}

fn new_sha512() -> Box<dyn DynDigest> {
    Box::new(Sha512::default())
}

/// Fixed-size table of hash types, indexed by id.
pub struct HashTypeRegistry {
    entries: [Option<HashTypeMetadata>; 256],
}

impl Default for HashTypeRegistry {
    fn default() -> Self {
        Self {
            entries: [None; 256],
        }
    }
}

impl HashTypeRegistry {
    /// Register a hash type, panicking on id reuse or priority conflict.
    pub fn register(&mut self, id: u8, metadata: HashTypeMetadata) -> HashType {
        if let Some(existing) = self.entries[id as usize] {
            panic!(
                "hash type 0x{:x} already registered to '{}'",
                id, existing.name
            );
        }

        if let Some(conflict) = self
            .entries
            .iter()
            .flatten()
            .find(|existing| existing.priority == metadata.priority)
        {
            panic!("priority conflict with hash type '{}'", conflict.name);
        }

        self.entries[id as usize] = Some(metadata);
        HashType(id)
    }

    pub fn get(&self, id: u8) -> Option<HashTypeMetadata> {
        self.entries[id as usize]
    }
}

static HASH_TYPES: Lazy<RwLock<HashTypeRegistry>> = Lazy::new(|| {
    let mut registry = HashTypeRegistry::default();

    registry.register(
        0,
        HashTypeMetadata {
            priority: -1,
            name: "INVALID",
            slot_size: 0,
            digest_size: 0,
            new_digest: None,
        },
    );
    registry.register(
        1,
        HashTypeMetadata {
            priority: 1,
            name: "SHA1",
            slot_size: 20,
            digest_size: 20,
            new_digest: Some(new_sha1),
        },
    );
    registry.register(
        2,
        HashTypeMetadata {
            priority: 3,
            name: "SHA256",
            slot_size: 32,
            digest_size: 32,
            new_digest: Some(new_sha256),
        },
    );
    registry.register(
        3,
        HashTypeMetadata {
            priority: 2,
            name: "SHA256_TRUNCATED",
            slot_size: 20,
            digest_size: 32,
            new_digest: Some(new_sha256),
        },
    );
    registry.register(
        4,
        HashTypeMetadata {
            priority: 4,
            name: "SHA384",
            slot_size: 48,
            digest_size: 48,
            new_digest: Some(new_sha384),
        },
    );
    registry.register(
        5,
        HashTypeMetadata {
            priority: 5,
            name: "SHA512",
            slot_size: 64,
            digest_size: 64,
            new_digest: Some(new_sha512),
        },
    );

    RwLock::new(registry)
});

/// Register a hash type process-wide.
///
/// Panics on id reuse or priority conflict. Registration must complete
/// before any decoding starts; the built-in types are always present.
pub fn register_hash_type(id: u8, metadata: HashTypeMetadata) -> HashType {
    HASH_TYPES
        .write()
        .expect("hash type registry lock poisoned")
        .register(id, metadata)
}

impl HashType {
    fn metadata(&self) -> Option<HashTypeMetadata> {
        HASH_TYPES
            .read()
            .expect("hash type registry lock poisoned")
            .get(self.0)
    }

    /// The rank of this hash type; -1 when unregistered.
    pub fn priority(&self) -> i32 {
        self.metadata().map(|meta| meta.priority).unwrap_or(-1)
    }

    /// Whether this is a registered, usable hash type.
    pub fn valid(&self) -> bool {
        *self != Self::INVALID && self.metadata().is_some()
    }

    /// Width of a slot holding this digest; 0 when unregistered.
    pub fn slot_size(&self) -> u8 {
        self.metadata().map(|meta| meta.slot_size).unwrap_or(0)
    }

    /// Width of the raw digest output; 0 when unregistered.
    pub fn digest_size(&self) -> u8 {
        self.metadata().map(|meta| meta.digest_size).unwrap_or(0)
    }

    /// Obtain a streaming digest producer for this hash type.
    pub fn new_digest(&self) -> Result<Box<dyn DynDigest>, CodesignError> {
        self.metadata()
            .and_then(|meta| meta.new_digest)
            .map(|new_digest| new_digest())
            .ok_or(CodesignError::UnsupportedHashType(self.0))
    }

    /// Digest `data` and truncate the result to the slot width.
    pub fn digest_data(&self, data: &[u8]) -> Result<Vec<u8>, CodesignError> {
        let mut hasher = self.new_digest()?;
        hasher.update(data);

        let mut digest = hasher.finalize().into_vec();
        digest.truncate(self.slot_size() as usize);

        Ok(digest)
    }
}

impl Display for HashType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.metadata() {
            Some(meta) => f.write_str(meta.name),
            None => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_priorities() {
        assert_eq!(HashType::INVALID.priority(), -1);
        assert_eq!(HashType::SHA1.priority(), 1);
        assert_eq!(HashType::SHA256_TRUNCATED.priority(), 2);
        assert_eq!(HashType::SHA256.priority(), 3);
        assert_eq!(HashType::SHA384.priority(), 4);
        assert_eq!(HashType::SHA512.priority(), 5);
        assert_eq!(HashType(0x42).priority(), -1);
    }

    #[test]
    fn validity() {
        assert!(!HashType::INVALID.valid());
        assert!(HashType::SHA256.valid());
        assert!(!HashType(0x42).valid());
    }

    #[test]
    fn truncated_sha256_digest() {
        let full = HashType::SHA256.digest_data(b"hello").unwrap();
        let truncated = HashType::SHA256_TRUNCATED.digest_data(b"hello").unwrap();

        assert_eq!(full.len(), 32);
        assert_eq!(truncated.len(), 20);
        assert_eq!(&full[..20], &truncated[..]);
    }

    #[test]
    fn duplicate_id_panics() {
        let mut registry = HashTypeRegistry::default();
        let metadata = HashTypeMetadata {
            priority: 10,
            name: "TEST",
            slot_size: 4,
            digest_size: 4,
            new_digest: None,
        };
        registry.register(0x40, metadata);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.register(0x40, metadata);
        }));
        assert!(result.is_err());
    }

    #[test]
    fn priority_conflict_panics() {
        let mut registry = HashTypeRegistry::default();
        let metadata = HashTypeMetadata {
            priority: 10,
            name: "TEST",
            slot_size: 4,
            digest_size: 4,
            new_digest: None,
        };
        registry.register(0x40, metadata);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.register(
                0x41,
                HashTypeMetadata {
                    name: "OTHER",
                    ..metadata
                },
            );
        }));
        assert!(result.is_err());
    }
}
