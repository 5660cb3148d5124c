// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt::{Display, Formatter};

bitflags::bitflags! {
    /// Code signature flags, as stored in the CodeDirectory header.
    ///
    /// Flag values and meanings are defined by the darwin kernel's
    /// `cs_blobs.h`. Bits the kernel has not assigned yet are preserved
    /// verbatim across a decode / encode cycle.
    pub struct CodeDirectoryFlags: u32 {
        /// Dynamically valid.
        const VALID = 0x0000_0001;
        /// Ad hoc signed.
        const ADHOC = 0x0000_0002;
        /// Has get-task-allow entitlement.
        const GET_TASK_ALLOW = 0x0000_0004;
        /// Has installer entitlement.
        const INSTALLER = 0x0000_0008;
        /// Library validation required by hardened system policy.
        const FORCED_LV = 0x0000_0010;
        /// (macOS only) page invalidation allowed by task port policy.
        const INVALID_ALLOWED = 0x0000_0020;
        /// Don't load invalid pages.
        const HARD = 0x0000_0100;
        /// Kill process if it becomes invalid.
        const KILL = 0x0000_0200;
        /// Force expiration checking.
        const CHECK_EXPIRATION = 0x0000_0400;
        /// Tell dyld to treat restricted.
        const RESTRICT = 0x0000_0800;
        /// Require enforcement.
        const ENFORCEMENT = 0x0000_1000;
        /// Require library validation.
        const REQUIRE_LV = 0x0000_2000;
        /// Code signature permits restricted entitlements.
        const ENTITLEMENTS_VALIDATED = 0x0000_4000;
        /// Has com.apple.rootless.restricted-nvram-variables.heritable entitlement.
        const NVRAM_UNRESTRICTED = 0x0000_8000;
        /// Apply hardened runtime policies.
        const RUNTIME = 0x0001_0000;
        /// Automatically signed by the linker.
        const LINKER_SIGNED = 0x0002_0000;
        /// Set HARD on any exec'ed process.
        const EXEC_SET_HARD = 0x0010_0000;
        /// Set KILL on any exec'ed process.
        const EXEC_SET_KILL = 0x0020_0000;
        /// Set ENFORCEMENT on any exec'ed process.
        const EXEC_SET_ENFORCEMENT = 0x0040_0000;
        /// Set INSTALLER on any exec'ed process.
        const EXEC_INHERIT_SIP = 0x0080_0000;
        /// Was killed by kernel for invalidity.
        const KILLED = 0x0100_0000;
        /// Kernel did not load a non-platform-binary dyld or Rosetta runtime.
        const NO_UNTRUSTED_HELPERS = 0x0200_0000;
        /// This is a platform binary.
        const PLATFORM_BINARY = 0x0400_0000;
        /// Platform binary by the fact of path (macOS only).
        const PLATFORM_PATH = 0x0800_0000;
        /// Process is or has been debugged and allowed to run with invalid pages.
        const DEBUGGED = 0x1000_0000;
        /// Process has a signature (may have gone invalid).
        const SIGNED = 0x2000_0000;
        /// Code is dev signed, cannot be loaded into prod signed code.
        const DEV_CODE = 0x4000_0000;
        /// Has Data Vault controller entitlement.
        const DATAVAULT_CONTROLLER = 0x8000_0000;
    }
}

const FLAG_NAMES: &[(CodeDirectoryFlags, &str)] = &[
    (CodeDirectoryFlags::VALID, "valid"),
    (CodeDirectoryFlags::ADHOC, "adhoc"),
    (CodeDirectoryFlags::GET_TASK_ALLOW, "get_task_allow"),
    (CodeDirectoryFlags::INSTALLER, "installer"),
    (CodeDirectoryFlags::FORCED_LV, "forced_lv"),
    (CodeDirectoryFlags::INVALID_ALLOWED, "invalid_allowed"),
    (CodeDirectoryFlags::HARD, "hard"),
    (CodeDirectoryFlags::KILL, "kill"),
    (CodeDirectoryFlags::CHECK_EXPIRATION, "check_expiration"),
    (CodeDirectoryFlags::RESTRICT, "restrict"),
    (CodeDirectoryFlags::ENFORCEMENT, "enforcement"),
    (CodeDirectoryFlags::REQUIRE_LV, "require_lv"),
    (
        CodeDirectoryFlags::ENTITLEMENTS_VALIDATED,
        "entitlements_validated",
    ),
    (CodeDirectoryFlags::NVRAM_UNRESTRICTED, "nvram_unrestricted"),
    (CodeDirectoryFlags::RUNTIME, "runtime"),
    (CodeDirectoryFlags::LINKER_SIGNED, "linker_signed"),
    (CodeDirectoryFlags::EXEC_SET_HARD, "set_hard"),
    (CodeDirectoryFlags::EXEC_SET_KILL, "set_kill"),
    (CodeDirectoryFlags::EXEC_SET_ENFORCEMENT, "set_enforcement"),
    (CodeDirectoryFlags::EXEC_INHERIT_SIP, "inherit_sip"),
    (CodeDirectoryFlags::KILLED, "killed"),
    (
        CodeDirectoryFlags::NO_UNTRUSTED_HELPERS,
        "no_untrusted_helpers",
    ),
    (CodeDirectoryFlags::PLATFORM_BINARY, "platform_binary"),
    (CodeDirectoryFlags::PLATFORM_PATH, "platform_path"),
    (CodeDirectoryFlags::DEBUGGED, "debugged"),
    (CodeDirectoryFlags::SIGNED, "signed"),
    (CodeDirectoryFlags::DEV_CODE, "dev_code"),
    (
        CodeDirectoryFlags::DATAVAULT_CONTROLLER,
        "data_vault_controller",
    ),
];

impl Display for CodeDirectoryFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "0x{:x} (none)", self.bits());
        }

        let names = FLAG_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();

        write!(f, "0x{:x} ({})", self.bits(), names.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(CodeDirectoryFlags::empty().to_string(), "0x0 (none)");
        assert_eq!(
            (CodeDirectoryFlags::ADHOC | CodeDirectoryFlags::RUNTIME).to_string(),
            "0x10002 (adhoc,runtime)"
        );
    }

    #[test]
    fn unknown_bits_preserved() {
        let flags = unsafe { CodeDirectoryFlags::from_bits_unchecked(0x0004_0040) };
        assert_eq!(flags.bits(), 0x0004_0040);
    }
}
