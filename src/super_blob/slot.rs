// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::{Display, Formatter};

/// Index of a blob inside a superblob.
///
/// Low values identify well-known payload slots. Values in
/// `[0x1000, 0x1005)` are alternate code directories. Values at
/// `0x10000` and above carry out-of-band data such as the CMS signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(pub u32);

impl Slot {
    pub const CODE_DIRECTORY: Slot = Slot(0);
    pub const INFO: Slot = Slot(1);
    pub const REQUIREMENTS: Slot = Slot(2);
    pub const RESOURCE_DIR: Slot = Slot(3);
    pub const APPLICATION: Slot = Slot(4);
    pub const ENTITLEMENTS: Slot = Slot(5);
    pub const DER_ENTITLEMENTS: Slot = Slot(7);
    pub const LAUNCH_CONSTRAINT_SELF: Slot = Slot(8);
    pub const LAUNCH_CONSTRAINT_PARENT: Slot = Slot(9);
    pub const LAUNCH_CONSTRAINT_RESPONSIBLE: Slot = Slot(0xa);

    pub const ALTERNATE_CODE_DIRECTORY_0: Slot = Slot(0x1000);
    pub const ALTERNATE_CODE_DIRECTORY_LIMIT: Slot = Slot(0x1005);

    pub const SIGNATURE: Slot = Slot(0x10000);
    pub const IDENTIFICATION: Slot = Slot(0x10001);
    pub const TICKET: Slot = Slot(0x10002);

    /// Whether this slot holds an alternate code directory.
    pub fn is_alternate_code_directory(&self) -> bool {
        *self >= Self::ALTERNATE_CODE_DIRECTORY_0 && *self < Self::ALTERNATE_CODE_DIRECTORY_LIMIT
    }

    /// Whether this slot holds a code directory, primary or alternate.
    pub fn is_code_directory(&self) -> bool {
        *self == Self::CODE_DIRECTORY || self.is_alternate_code_directory()
    }
}

impl From<u32> for Slot {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl From<Slot> for u32 {
    fn from(v: Slot) -> Self {
        v.0
    }
}

impl Display for Slot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::CODE_DIRECTORY => f.write_str("CSSLOT_CODEDIRECTORY"),
            Self::INFO => f.write_str("CSSLOT_INFOSLOT"),
            Self::REQUIREMENTS => f.write_str("CSSLOT_REQUIREMENTS"),
            Self::RESOURCE_DIR => f.write_str("CSSLOT_RESOURCEDIR"),
            Self::APPLICATION => f.write_str("CSSLOT_APPLICATION"),
            Self::ENTITLEMENTS => f.write_str("CSSLOT_ENTITLEMENTS"),
            Self::DER_ENTITLEMENTS => f.write_str("CSSLOT_DER_ENTITLEMENTS"),
            Self::LAUNCH_CONSTRAINT_SELF => f.write_str("CSSLOT_LAUNCH_CONSTRAINT_SELF"),
            Self::LAUNCH_CONSTRAINT_PARENT => f.write_str("CSSLOT_LAUNCH_CONSTRAINT_PARENT"),
            Self::LAUNCH_CONSTRAINT_RESPONSIBLE => {
                f.write_str("CSSLOT_LAUNCH_CONSTRAINT_RESPONSIBLE")
            }
            Self::SIGNATURE => f.write_str("CSSLOT_SIGNATURESLOT"),
            Self::IDENTIFICATION => f.write_str("CSSLOT_IDENTIFICATIONSLOT"),
            Self::TICKET => f.write_str("CSSLOT_TICKETSLOT"),
            slot if slot.is_alternate_code_directory() => {
                f.write_str("CSSLOT_ALTERNATE_CODEDIRECTORY")
            }
            slot => write!(f, "0x{:x}", slot.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternates() {
        assert!(!Slot::CODE_DIRECTORY.is_alternate_code_directory());
        assert!(Slot(0x1000).is_alternate_code_directory());
        assert!(Slot(0x1004).is_alternate_code_directory());
        assert!(!Slot(0x1005).is_alternate_code_directory());

        assert!(Slot::CODE_DIRECTORY.is_code_directory());
        assert!(Slot(0x1002).is_code_directory());
        assert!(!Slot::ENTITLEMENTS.is_code_directory());
    }

    #[test]
    fn display() {
        assert_eq!(Slot::CODE_DIRECTORY.to_string(), "CSSLOT_CODEDIRECTORY");
        assert_eq!(Slot(0x1001).to_string(), "CSSLOT_ALTERNATE_CODEDIRECTORY");
        assert_eq!(Slot(0x7777).to_string(), "0x7777");
    }
}
