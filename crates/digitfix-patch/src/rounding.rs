//! The `java.math.RoundingMode` enumeration as seen by the patched switch.

use std::fmt;
use std::str::FromStr;

use digitfix_error::DigitfixError;
use serde::{Deserialize, Serialize};

/// Internal name of the enumeration class.
pub const ROUNDING_MODE_CLASS: &str = "java/math/RoundingMode";
pub const ROUNDING_MODE_DESCRIPTOR: &str = "Ljava/math/RoundingMode;";

/// Rounding modes in ordinal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundingMode {
    Up,
    Down,
    Ceiling,
    Floor,
    HalfUp,
    HalfDown,
    HalfEven,
    Unnecessary,
}

impl RoundingMode {
    /// Number of constants; a dense switch over the enum has at most this
    /// many case positions.
    pub const COUNT: usize = 8;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Up,
        Self::Down,
        Self::Ceiling,
        Self::Floor,
        Self::HalfUp,
        Self::HalfDown,
        Self::HalfEven,
        Self::Unnecessary,
    ];

    pub const fn ordinal(self) -> usize {
        self as usize
    }

    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::ALL.get(ordinal).copied()
    }

    /// Constant name as declared in Java.
    pub const fn java_name(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Ceiling => "CEILING",
            Self::Floor => "FLOOR",
            Self::HalfUp => "HALF_UP",
            Self::HalfDown => "HALF_DOWN",
            Self::HalfEven => "HALF_EVEN",
            Self::Unnecessary => "UNNECESSARY",
        }
    }

    pub fn from_java_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.java_name() == name)
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.java_name())
    }
}

impl FromStr for RoundingMode {
    type Err = DigitfixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::from_java_name(&normalized)
            .ok_or_else(|| DigitfixError::config(format!("unknown rounding mode {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordinals_match_java() {
        assert_eq!(RoundingMode::Up.ordinal(), 0);
        assert_eq!(RoundingMode::HalfUp.ordinal(), 4);
        assert_eq!(RoundingMode::HalfDown.ordinal(), 5);
        assert_eq!(RoundingMode::Unnecessary.ordinal(), 7);
        for (i, mode) in RoundingMode::ALL.iter().enumerate() {
            assert_eq!(RoundingMode::from_ordinal(i), Some(*mode));
        }
        assert_eq!(RoundingMode::from_ordinal(RoundingMode::COUNT), None);
    }

    #[test]
    fn test_parse_names() {
        assert_eq!("HALF_UP".parse::<RoundingMode>().expect("parse"), RoundingMode::HalfUp);
        assert_eq!("half-even".parse::<RoundingMode>().expect("parse"), RoundingMode::HalfEven);
        assert!("HALF_SIDEWAYS".parse::<RoundingMode>().is_err());
    }

    #[test]
    fn test_serde_uses_java_names() {
        #[derive(Deserialize)]
        struct Holder {
            mode: RoundingMode,
        }
        let holder: Holder = toml::from_str("mode = \"HALF_DOWN\"").expect("toml");
        assert_eq!(holder.mode, RoundingMode::HalfDown);
    }
}
