//! Identity of the runtime the self test reports against.

use digitfix_classfile::ClassReader;
use digitfix_error::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeProfile {
    pub version: String,
    pub vendor: String,
    pub home: String,
}

impl RuntimeProfile {
    pub fn new(
        version: impl Into<String>,
        vendor: impl Into<String>,
        home: impl Into<String>,
    ) -> Self {
        Self {
            version: version.into(),
            vendor: vendor.into(),
            home: home.into(),
        }
    }

    /// Profile implied by a class file major version: 52 is `1.8.0`, 55 is
    /// `11`.
    pub fn for_class_version(major: u16) -> Self {
        let version = if major <= 52 {
            format!("1.{}.0", major.saturating_sub(44))
        } else {
            (major - 44).to_string()
        };
        Self::new(version, "OpenJDK", "(simulated)")
    }

    pub fn for_class(bytes: &[u8]) -> Result<Self> {
        let reader = ClassReader::new(bytes)?;
        Ok(Self::for_class_version(reader.header().major_version))
    }

    /// Whether the patch is expected to apply: an Oracle or OpenJDK build of
    /// the `1.x` line at `1.8` or later. Later version schemes are not
    /// recognised.
    pub fn is_java8_or_newer(&self) -> bool {
        let vendor = self.vendor.to_lowercase();
        if !vendor.contains("oracle") && !vendor.contains("openjdk") {
            return false;
        }
        let mut parts: Vec<&str> = self.version.split(|c: char| !c.is_ascii_digit()).collect();
        while parts.last() == Some(&"") {
            parts.pop();
        }
        if parts.len() < 2 || parts[0] != "1" {
            return false;
        }
        match parts[1].parse::<u32>() {
            Ok(minor) => minor >= 8,
            Err(e) => {
                warn!(version = %self.version, error = %e, "unparseable runtime version");
                false
            }
        }
    }
}
