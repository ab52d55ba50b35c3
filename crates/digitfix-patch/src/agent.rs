//! Host installer contract.
//!
//! A host that loads classes offers each one to its registered transformers
//! before defining it. [`premain`] registers the digit-list transformer and
//! marks the patcher as installed.

use std::path::PathBuf;
use std::sync::Arc;

use digitfix_error::{DigitfixError, Result};
use tracing::info;

use crate::config::PatchConfig;
use crate::state::PatchState;
use crate::transformer::{ClassFileTransformer, DigitListTransformer};

pub trait Instrumentation {
    fn add_transformer(&mut self, transformer: Arc<dyn ClassFileTransformer>);
}

/// Options passed on the agent command line as `key=value` pairs separated by
/// commas, e.g. `template=/opt/fix.class,config=/etc/digitfix.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentArgs {
    pub template: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

impl AgentArgs {
    pub fn parse(args: Option<&str>) -> Result<Self> {
        let mut out = Self::default();
        let Some(args) = args else {
            return Ok(out);
        };
        for pair in args.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DigitfixError::config(format!("agent argument {pair:?} is not key=value"))
            })?;
            match key {
                "template" => out.template = Some(PathBuf::from(value)),
                "config" => out.config = Some(PathBuf::from(value)),
                other => {
                    return Err(DigitfixError::config(format!(
                        "unknown agent argument {other:?}"
                    )));
                }
            }
        }
        Ok(out)
    }

    /// Configuration these arguments select, starting from `base`.
    pub fn apply(&self, base: PatchConfig) -> Result<PatchConfig> {
        let mut config = match &self.config {
            Some(path) => PatchConfig::load(path)?,
            None => base,
        };
        if let Some(template) = &self.template {
            config.template_path = Some(template.clone());
        }
        Ok(config)
    }
}

/// Register the transformer with `inst`.
pub fn premain(
    inst: &mut dyn Instrumentation,
    config: PatchConfig,
    state: Arc<PatchState>,
) -> Result<Arc<DigitListTransformer>> {
    let transformer = Arc::new(DigitListTransformer::new(config, Arc::clone(&state))?);
    inst.add_transformer(Arc::clone(&transformer) as Arc<dyn ClassFileTransformer>);
    state.mark_installed();
    info!(
        target_class = %transformer.config().target_class,
        replacement = %transformer.config().replacement_method,
        "digit list patch installed"
    );
    Ok(transformer)
}

/// [`premain`] driven by agent argument text.
pub fn premain_with_args(
    args: Option<&str>,
    inst: &mut dyn Instrumentation,
    state: Arc<PatchState>,
) -> Result<Arc<DigitListTransformer>> {
    let config = AgentArgs::parse(args)?.apply(PatchConfig::default())?;
    premain(inst, config, state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording {
        transformers: Vec<Arc<dyn ClassFileTransformer>>,
    }

    impl Instrumentation for Recording {
        fn add_transformer(&mut self, transformer: Arc<dyn ClassFileTransformer>) {
            self.transformers.push(transformer);
        }
    }

    #[test]
    fn test_premain_registers_and_marks_installed() {
        let mut host = Recording::default();
        let state = Arc::new(PatchState::new());
        premain(&mut host, PatchConfig::default(), Arc::clone(&state)).expect("premain");
        assert_eq!(host.transformers.len(), 1);
        assert!(state.installed());
        assert!(!state.applied());
    }

    #[test]
    fn test_each_install_writes_only_its_own_state() {
        let mut host = Recording::default();
        let first = Arc::new(PatchState::new());
        let second = Arc::new(PatchState::new());
        premain(&mut host, PatchConfig::default(), Arc::clone(&first)).expect("premain");
        assert!(first.installed());
        assert!(!second.installed());
        premain(&mut host, PatchConfig::default(), Arc::clone(&second)).expect("premain");
        assert!(second.installed());
        assert_eq!(host.transformers.len(), 2);
    }

    #[test]
    fn test_invalid_config_installs_nothing() {
        let mut host = Recording::default();
        let state = Arc::new(PatchState::new());
        let config = PatchConfig {
            method_descriptor: "nonsense".to_owned(),
            ..PatchConfig::default()
        };
        assert!(premain(&mut host, config, Arc::clone(&state)).is_err());
        assert!(host.transformers.is_empty());
        assert!(!state.installed());
    }

    #[test]
    fn test_agent_args() {
        assert_eq!(AgentArgs::parse(None).expect("none"), AgentArgs::default());
        let args = AgentArgs::parse(Some("template=/t/a.class, ")).expect("parse");
        assert_eq!(args.template, Some(PathBuf::from("/t/a.class")));
        let config = args.apply(PatchConfig::default()).expect("apply");
        assert_eq!(config.template_path, Some(PathBuf::from("/t/a.class")));
        assert!(AgentArgs::parse(Some("verbose")).is_err());
        assert!(AgentArgs::parse(Some("color=red")).is_err());
    }

    #[test]
    fn test_agent_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("digitfix.toml");
        std::fs::write(&path, "replacement_method = \"fixRounding\"\n").expect("write");
        let arg = format!("config={}", path.display());
        let config = AgentArgs::parse(Some(&arg))
            .and_then(|a| a.apply(PatchConfig::default()))
            .expect("config");
        assert_eq!(config.replacement_method, "fixRounding");
    }
}
