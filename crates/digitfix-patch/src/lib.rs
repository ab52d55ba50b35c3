//! Load-time patch for the `java.text.DigitList` `HALF_UP` rounding defect.
//!
//! The patcher confirms the buggy shape of `shouldRoundUp` structurally
//! before touching anything: the `HALF_UP` and `HALF_DOWN` cases of its
//! rounding-mode switch must resolve to different code. Only then does the
//! `HALF_UP` case get redirected to a corrected method transplanted from a
//! template class. Every other outcome leaves the class bytes as they were.

pub mod agent;
pub mod config;
pub mod decision;
pub mod injector;
pub mod matcher;
pub mod rounding;
pub mod specimen;
pub mod state;
pub mod template;
pub mod transformer;
pub mod transplant;

pub use agent::{AgentArgs, Instrumentation, premain, premain_with_args};
pub use config::PatchConfig;
pub use decision::{DecisionState, PatchDecision, Verdict};
pub use injector::InjectionPlan;
pub use matcher::{CaseLabels, MatchStep, StructuralMatcher};
pub use rounding::RoundingMode;
pub use specimen::{DIGIT_LIST_CLASS, SpecimenKind, specimen};
pub use state::{PatchState, PatchStateSnapshot};
pub use template::{EmbeddedTemplate, FileTemplate, TEMPLATE_CLASS, TemplateSource, template_source};
pub use transformer::{
    ClassFileTransformer, DigitListTransformer, TransformOutcome, TransformReport, digest,
};
pub use transplant::{TransplantPlan, transplant};
