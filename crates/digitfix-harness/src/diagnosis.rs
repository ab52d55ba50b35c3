//! Final verdict from behaviour, patch state and runtime identity.

use serde::Serialize;

use crate::runtime::RuntimeProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Diagnosis {
    /// Correct without the patch.
    NoPatchNecessary,
    /// Patched and correct, but on a runtime the patch was not meant for.
    FixedUnexpectedRuntime,
    Fixed,
    /// Patched yet still wrong.
    BadPatch,
    /// Installed on an expected runtime, but the patch did not apply.
    NotFixedUnsupported,
    /// Not installed on an expected runtime.
    NotFixedExpected,
    /// Wrong, unpatched, on a runtime the patch was not meant for.
    Bad,
}

/// Bit 0: cases passed. Bit 1: patch applied. Bit 2: expected runtime.
pub const fn result_code(behavior_ok: bool, applied: bool, java8: bool) -> u8 {
    (behavior_ok as u8) | ((applied as u8) << 1) | ((java8 as u8) << 2)
}

impl Diagnosis {
    pub const fn from_code(code: u8, installed: bool) -> Self {
        match code & 0b111 {
            1 | 5 => Self::NoPatchNecessary,
            3 => Self::FixedUnexpectedRuntime,
            7 => Self::Fixed,
            2 | 6 => Self::BadPatch,
            4 if installed => Self::NotFixedUnsupported,
            4 => Self::NotFixedExpected,
            _ => Self::Bad,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, Self::NoPatchNecessary | Self::Fixed)
    }

    pub fn message(self, runtime: &RuntimeProfile) -> String {
        match self {
            Self::NoPatchNecessary => "OK (no patch necessary)".to_owned(),
            Self::FixedUnexpectedRuntime => {
                "FIXED (WARNING: unexpected Java version/vendor)".to_owned()
            }
            Self::Fixed => "FIXED".to_owned(),
            Self::BadPatch => format!(
                "BAD PATCH (!) on {} Java {}",
                runtime.vendor, runtime.version
            ),
            Self::NotFixedUnsupported => {
                "NOT FIXED (patch not supported on this Java version/vendor?)".to_owned()
            }
            Self::NotFixedExpected => "NOT FIXED (expected on Java 1.8 < u40)".to_owned(),
            Self::Bad => "BAD (maybe a different bug in this version of Java?)".to_owned(),
        }
    }
}
