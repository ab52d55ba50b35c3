//! Stand-in for the host that defines classes.
//!
//! Offers every class it defines to the registered transformers in
//! registration order, the way a runtime with an installed agent does.

use std::fmt;
use std::sync::Arc;

use digitfix_patch::{ClassFileTransformer, Instrumentation, digest};
use tracing::{debug, info};

#[derive(Default)]
pub struct BootHost {
    transformers: Vec<Arc<dyn ClassFileTransformer>>,
}

impl fmt::Debug for BootHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootHost")
            .field("transformers", &self.transformers.len())
            .finish()
    }
}

impl BootHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transformer_count(&self) -> usize {
        self.transformers.len()
    }

    /// Bytes the host would define for `class_name` after every transformer
    /// had its turn.
    pub fn define_class(&self, class_name: &str, bytes: Vec<u8>) -> Vec<u8> {
        let mut current = bytes;
        for transformer in &self.transformers {
            if let Some(rewritten) = transformer.transform(class_name, &current) {
                debug!(
                    class = class_name,
                    before = %digest(&current),
                    after = %digest(&rewritten),
                    "class rewritten by transformer"
                );
                current = rewritten;
            }
        }
        info!(class = class_name, digest = %digest(&current), "class defined");
        current
    }
}

impl Instrumentation for BootHost {
    fn add_transformer(&mut self, transformer: Arc<dyn ClassFileTransformer>) {
        self.transformers.push(transformer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digitfix_patch::{DIGIT_LIST_CLASS, PatchConfig, PatchState, SpecimenKind, premain, specimen};

    struct Append(u8);

    impl ClassFileTransformer for Append {
        fn transform(&self, _: &str, bytes: &[u8]) -> Option<Vec<u8>> {
            let mut out = bytes.to_vec();
            out.push(self.0);
            Some(out)
        }
    }

    struct Decline;

    impl ClassFileTransformer for Decline {
        fn transform(&self, _: &str, _: &[u8]) -> Option<Vec<u8>> {
            None
        }
    }

    #[test]
    fn test_transformers_chain_in_order() {
        let mut host = BootHost::new();
        host.add_transformer(Arc::new(Append(1)));
        host.add_transformer(Arc::new(Decline));
        host.add_transformer(Arc::new(Append(2)));
        assert_eq!(host.transformer_count(), 3);
        assert_eq!(host.define_class("a/B", vec![0]), vec![0, 1, 2]);
    }

    #[test]
    fn test_no_agent_defines_bytes_unchanged() {
        let host = BootHost::new();
        let bytes = specimen(SpecimenKind::Affected).expect("specimen");
        assert_eq!(host.define_class(DIGIT_LIST_CLASS, bytes.clone()), bytes);
    }

    #[test]
    fn test_agent_rewrites_target_only() {
        let mut host = BootHost::new();
        let state = Arc::new(PatchState::new());
        premain(&mut host, PatchConfig::default(), Arc::clone(&state)).expect("premain");
        assert!(state.installed());
        let bytes = specimen(SpecimenKind::Affected).expect("specimen");
        assert_eq!(host.define_class("java/text/Other", bytes.clone()), bytes);
        assert!(!state.applied());
        assert_ne!(host.define_class(DIGIT_LIST_CLASS, bytes.clone()), bytes);
        assert!(state.applied());
    }
}
