//! Load-time transformer for the target class.
//!
//! One call handles one class: every class but the target passes through
//! untouched, and every failure inside the target is contained here. The
//! host either receives a completely rewritten class or keeps its bytes.

use std::sync::Arc;

use digitfix_classfile::{
    ClassHeader, ClassReader, ClassVisitor, ClassWriter, Frame, Insn, Label, LocalVariable, Member,
    MethodAccess, MethodVisitor, MethodWriter, RawAttribute, TryCatch,
};
use digitfix_error::{DigitfixError, Result};
use serde::Serialize;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::config::PatchConfig;
use crate::decision::{PatchDecision, Verdict};
use crate::injector::InjectionPlan;
use crate::state::PatchState;
use crate::template::{TemplateSource, template_source};
use crate::transplant::{TransplantPlan, transplant};

/// Host-facing transformation hook.
///
/// `None` means "keep the bytes you have".
pub trait ClassFileTransformer: Send + Sync {
    fn transform(&self, class_name: &str, bytes: &[u8]) -> Option<Vec<u8>>;
}

/// Result of one transformation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformOutcome {
    /// Some other class.
    NotTarget,
    /// The buggy case now delegates to the transplanted method.
    Modified,
    /// The class already shares one body for both cases.
    AlreadyFixed,
    /// The replacement method is already present.
    AlreadyPatched,
    /// The expected method or switch shape is absent.
    Unmatched,
    /// A structural assumption or the template failed; bytes kept.
    Rejected { detail: String },
}

impl TransformOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotTarget => "not_target",
            Self::Modified => "modified",
            Self::AlreadyFixed => "already_fixed",
            Self::AlreadyPatched => "already_patched",
            Self::Unmatched => "unmatched",
            Self::Rejected { .. } => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformReport {
    pub class_name: String,
    pub outcome: TransformOutcome,
    /// xxh3 of the bytes offered by the host.
    pub input_digest: String,
    pub output_digest: Option<String>,
    /// Rewritten class, present only for [`TransformOutcome::Modified`].
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
}

impl TransformReport {
    pub fn modified(&self) -> bool {
        self.bytes.is_some()
    }
}

pub fn digest(bytes: &[u8]) -> String {
    format!("{:016x}", xxh3_64(bytes))
}

/// Patches `java/text/DigitList` (or whatever [`PatchConfig`] names).
#[derive(Debug)]
pub struct DigitListTransformer {
    config: PatchConfig,
    template: Box<dyn TemplateSource>,
    state: Arc<PatchState>,
}

impl DigitListTransformer {
    pub fn new(config: PatchConfig, state: Arc<PatchState>) -> Result<Self> {
        let template = template_source(&config);
        Self::with_template(config, template, state)
    }

    pub fn with_template(
        config: PatchConfig,
        template: Box<dyn TemplateSource>,
        state: Arc<PatchState>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            template,
            state,
        })
    }

    pub const fn config(&self) -> &PatchConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<PatchState> {
        &self.state
    }

    pub fn transform_with_report(&self, class_name: &str, bytes: &[u8]) -> TransformReport {
        let input_digest = digest(bytes);
        if class_name != self.config.target_class {
            return TransformReport {
                class_name: class_name.to_owned(),
                outcome: TransformOutcome::NotTarget,
                input_digest,
                output_digest: None,
                bytes: None,
            };
        }

        let (outcome, out) = match self.rewrite(bytes) {
            Ok((Verdict::Modified, Some(out))) => (TransformOutcome::Modified, Some(out)),
            Ok((Verdict::Modified, None)) => (
                TransformOutcome::Rejected {
                    detail: "modified verdict without output".to_owned(),
                },
                None,
            ),
            Ok((Verdict::AlreadyFixed, _)) => (TransformOutcome::AlreadyFixed, None),
            Ok((Verdict::Unmatched, _)) => (TransformOutcome::Unmatched, None),
            Err(Declined::AlreadyPatched) => (TransformOutcome::AlreadyPatched, None),
            Err(Declined::Failed(err)) => (
                TransformOutcome::Rejected {
                    detail: err.to_string(),
                },
                None,
            ),
        };

        let output_digest = out.as_deref().map(digest);
        match &outcome {
            TransformOutcome::Modified => {
                self.state.mark_applied();
                info!(
                    class = class_name,
                    input_digest = %input_digest,
                    output_digest = output_digest.as_deref().unwrap_or_default(),
                    replacement = %self.config.replacement_method,
                    "patched rounding decision"
                );
            }
            TransformOutcome::Rejected { detail } => {
                warn!(class = class_name, input_digest = %input_digest, detail = %detail, "failed to patch");
                self.state
                    .record_error(format!("failed to patch {class_name}: {detail}"));
            }
            other => debug!(class = class_name, outcome = other.as_str(), "left unchanged"),
        }

        TransformReport {
            class_name: class_name.to_owned(),
            outcome,
            input_digest,
            output_digest,
            bytes: out,
        }
    }

    fn rewrite(&self, bytes: &[u8]) -> Result<(Verdict, Option<Vec<u8>>), Declined> {
        let config = &self.config;
        let reader = ClassReader::new(bytes)?;
        if reader.name() != config.target_class {
            return Err(DigitfixError::violation(format!(
                "offered as {} but declares {}",
                config.target_class,
                reader.name()
            ))
            .into());
        }
        if reader.has_method(&config.replacement_method, &config.method_descriptor) {
            return Err(Declined::AlreadyPatched);
        }
        let Some(target) = reader
            .methods()
            .find(|m| m.name == config.method_name && m.descriptor == config.method_descriptor)
        else {
            debug!(
                method = %config.method_name,
                descriptor = %config.method_descriptor,
                "target method not declared"
            );
            return Ok((Verdict::Unmatched, None));
        };
        let plan = InjectionPlan::new(
            &config.target_class,
            &config.replacement_method,
            MethodAccess::from_bits_retain(target.access_flags),
            &config.method_descriptor,
        )?;

        let mut writer = ClassWriter::from_reader(&reader);
        let mut adapter = TargetClassAdapter {
            writer: &mut writer,
            config,
            plan,
            decision: PatchDecision::new(config.buggy_mode, config.sibling_mode),
            verdict: None,
        };
        reader.accept(&mut adapter)?;
        let verdict = adapter.verdict.unwrap_or(Verdict::Unmatched);
        if verdict != Verdict::Modified {
            return Ok((verdict, None));
        }

        let template = self.template.load()?;
        transplant(
            &mut writer,
            &reader,
            &template,
            &self.template.describe(),
            &TransplantPlan {
                template_class: &config.template_class,
                target_class: &config.target_class,
                method_name: &config.replacement_method,
                descriptor: &config.method_descriptor,
            },
        )?;
        let out = writer.into_bytes()?;
        ClassReader::new(&out)
            .map_err(|e| DigitfixError::internal(format!("rewritten class does not parse: {e}")))?;
        Ok((Verdict::Modified, Some(out)))
    }
}

impl ClassFileTransformer for DigitListTransformer {
    fn transform(&self, class_name: &str, bytes: &[u8]) -> Option<Vec<u8>> {
        self.transform_with_report(class_name, bytes).bytes
    }
}

/// Reasons `rewrite` hands back no verdict.
enum Declined {
    AlreadyPatched,
    Failed(DigitfixError),
}

impl From<DigitfixError> for Declined {
    fn from(err: DigitfixError) -> Self {
        Self::Failed(err)
    }
}

// ---------------------------------------------------------------------------
// Visitor adapters
// ---------------------------------------------------------------------------

/// Copies the class and routes the target method through the injector.
struct TargetClassAdapter<'w> {
    writer: &'w mut ClassWriter,
    config: &'w PatchConfig,
    plan: InjectionPlan,
    decision: PatchDecision,
    verdict: Option<Verdict>,
}

impl ClassVisitor for TargetClassAdapter<'_> {
    fn visit_header(&mut self, header: &ClassHeader) -> Result<()> {
        self.writer.visit_header(header)
    }

    fn visit_field(&mut self, field: &Member<'_>) -> Result<()> {
        self.writer.copy_field(field)
    }

    fn visit_method(&mut self, method: &Member<'_>) -> Result<Option<Box<dyn MethodVisitor + '_>>> {
        if method.name != self.config.method_name
            || method.descriptor != self.config.method_descriptor
        {
            self.writer.copy_method(method)?;
            return Ok(None);
        }
        let out = self.writer.begin_method(
            MethodAccess::from_bits_retain(method.access_flags),
            method.name,
            method.descriptor,
        );
        Ok(Some(Box::new(TargetMethodAdapter {
            writer: &mut *self.writer,
            out: Some(out),
            plan: &self.plan,
            decision: &mut self.decision,
            verdict: &mut self.verdict,
            pending: false,
            case_had_frame: false,
            frame_owed: false,
            injected: false,
            saw_frame: false,
        })))
    }

    fn visit_attribute(&mut self, attr: &RawAttribute) -> Result<()> {
        self.writer.visit_attribute(attr)
    }
}

/// Re-emits the target method, injecting the forwarding call at the patched
/// case. The injection waits for the case label's frame and line number so
/// the branch target keeps them.
struct TargetMethodAdapter<'a> {
    writer: &'a mut ClassWriter,
    out: Option<MethodWriter>,
    plan: &'a InjectionPlan,
    decision: &'a mut PatchDecision,
    verdict: &'a mut Option<Verdict>,
    pending: bool,
    case_had_frame: bool,
    /// A frame is needed for the code after the injected return.
    frame_owed: bool,
    injected: bool,
    saw_frame: bool,
}

impl TargetMethodAdapter<'_> {
    fn out(&mut self) -> Result<&mut MethodWriter> {
        self.out
            .as_mut()
            .ok_or_else(|| DigitfixError::internal("method already committed"))
    }

    fn inject(&mut self) -> Result<()> {
        let insns = self.plan.insns();
        let out = self.out()?;
        for insn in insns {
            out.emit(insn);
        }
        self.pending = false;
        self.injected = true;
        self.frame_owed = self.case_had_frame;
        Ok(())
    }
}

impl MethodVisitor for TargetMethodAdapter<'_> {
    fn visit_code(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        let required = self.plan.required_stack();
        self.out()?.visit_code(max_stack.max(required), max_locals)
    }

    fn visit_attribute(&mut self, attr: RawAttribute) -> Result<()> {
        self.out()?.visit_attribute(attr)
    }

    fn visit_try_catch(&mut self, block: TryCatch) -> Result<()> {
        self.out()?.visit_try_catch(block)
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        if self.pending {
            self.inject()?;
        }
        self.out()?.visit_label(label)?;
        if self.decision.take_injection(label) {
            self.pending = true;
            self.case_had_frame = false;
        }
        Ok(())
    }

    fn visit_frame(&mut self, frame: Frame) -> Result<()> {
        self.saw_frame = true;
        if self.pending {
            self.case_had_frame = true;
        }
        self.frame_owed = false;
        self.out()?.visit_frame(frame)
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        self.out()?.visit_line_number(line, start)
    }

    fn visit_insn(&mut self, insn: Insn) -> Result<()> {
        if self.pending {
            self.inject()?;
        }
        if self.frame_owed {
            self.frame_owed = false;
            self.out()?.frame(Frame::Same);
        }
        self.decision.on_insn(&insn)?;
        self.out()?.visit_insn(insn)
    }

    fn visit_local_variable(&mut self, var: LocalVariable) -> Result<()> {
        self.out()?.visit_local_variable(var)
    }

    fn visit_end(&mut self) -> Result<()> {
        if self.pending {
            return Err(DigitfixError::violation(
                "patched case label is not followed by code",
            ));
        }
        if self.injected && self.saw_frame && !self.case_had_frame {
            return Err(DigitfixError::violation(
                "patched case has no stack map frame",
            ));
        }
        let out = self
            .out
            .take()
            .ok_or_else(|| DigitfixError::internal("method already committed"))?;
        let emitted = self.writer.commit(out)?;
        *self.verdict = Some(self.decision.finish(&emitted)?);
        Ok(())
    }
}
