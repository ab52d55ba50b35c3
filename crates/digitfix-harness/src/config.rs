//! Self-test configuration.

use digitfix_error::{DigitfixError, Result};
use digitfix_vm::VmConfig;
use serde::{Deserialize, Serialize};

use crate::runtime::RuntimeProfile;

/// Every key is optional; runtime identity defaults to what the class file
/// version implies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Report exact binary values for every case.
    pub print_actuals: bool,
    pub java_version: Option<String>,
    pub java_vendor: Option<String>,
    pub java_home: Option<String>,
    pub vm: VmConfig,
}

impl HarnessConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| DigitfixError::config(format!("harness config: {e}")))
    }

    /// `implied` with any configured overrides applied.
    pub fn runtime(&self, implied: RuntimeProfile) -> RuntimeProfile {
        RuntimeProfile {
            version: self.java_version.clone().unwrap_or(implied.version),
            vendor: self.java_vendor.clone().unwrap_or(implied.vendor),
            home: self.java_home.clone().unwrap_or(implied.home),
        }
    }
}
