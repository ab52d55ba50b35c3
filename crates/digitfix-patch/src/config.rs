//! Patcher configuration.

use std::path::{Path, PathBuf};

use digitfix_error::{DigitfixError, Result};
use serde::{Deserialize, Serialize};

use crate::rounding::RoundingMode;

/// What to patch and where the replacement comes from.
///
/// Every key is optional in TOML; missing keys keep the defaults, which
/// describe the `java.text.DigitList` fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Internal name of the class to rewrite.
    pub target_class: String,
    pub method_name: String,
    pub method_descriptor: String,
    /// Name of the transplanted method; its descriptor is `method_descriptor`.
    pub replacement_method: String,
    /// Internal name of the template class holding the replacement.
    pub template_class: String,
    /// Compiled template on disk. `None` uses the built-in template.
    pub template_path: Option<PathBuf>,
    /// Ordinal whose case gets redirected.
    pub buggy_mode: RoundingMode,
    /// Ordinal whose case shares the body once the bug is fixed upstream.
    pub sibling_mode: RoundingMode,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            target_class: "java/text/DigitList".to_owned(),
            method_name: "shouldRoundUp".to_owned(),
            method_descriptor: "(IZZ)Z".to_owned(),
            replacement_method: "__patched__shouldRoundUp_HALF_UP".to_owned(),
            template_class: crate::template::TEMPLATE_CLASS.to_owned(),
            template_path: None,
            buggy_mode: RoundingMode::HalfUp,
            sibling_mode: RoundingMode::HalfDown,
        }
    }
}

impl PatchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| DigitfixError::config(format!("patch config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("target_class", &self.target_class),
            ("method_name", &self.method_name),
            ("replacement_method", &self.replacement_method),
            ("template_class", &self.template_class),
        ] {
            if value.is_empty() || value.contains('.') || value.contains(';') {
                return Err(DigitfixError::config(format!(
                    "{key} must be a non-empty internal name, got {value:?}"
                )));
            }
        }
        let descriptor = digitfix_classfile::MethodDescriptor::parse(&self.method_descriptor)
            .map_err(|e| DigitfixError::config(format!("method_descriptor: {e}")))?;
        if descriptor.ret.is_none() {
            return Err(DigitfixError::config("method_descriptor must not return void"));
        }
        if self.replacement_method == self.method_name {
            return Err(DigitfixError::config(
                "replacement_method must differ from method_name",
            ));
        }
        if self.buggy_mode == self.sibling_mode {
            return Err(DigitfixError::config(format!(
                "buggy_mode and sibling_mode are both {}",
                self.buggy_mode
            )));
        }
        if self.target_class == self.template_class {
            return Err(DigitfixError::config(
                "template_class must differ from target_class",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PatchConfig::default();
        config.validate().expect("valid");
        assert_eq!(config.buggy_mode.ordinal(), 4);
        assert_eq!(config.sibling_mode.ordinal(), 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PatchConfig::from_toml_str(
            "replacement_method = \"fixedShouldRoundUp\"\ntemplate_path = \"/opt/t.class\"\n",
        )
        .expect("parse");
        assert_eq!(config.replacement_method, "fixedShouldRoundUp");
        assert_eq!(config.template_path.as_deref(), Some(Path::new("/opt/t.class")));
        assert_eq!(config.target_class, "java/text/DigitList");
    }

    #[test]
    fn test_rejects_inconsistent_values() {
        assert!(PatchConfig::from_toml_str("target_class = \"java.text.DigitList\"").is_err());
        assert!(PatchConfig::from_toml_str("method_descriptor = \"(IZZ)V\"").is_err());
        assert!(PatchConfig::from_toml_str("sibling_mode = \"HALF_UP\"").is_err());
        assert!(PatchConfig::from_toml_str("buggy_mode = 4").is_err());
    }
}
