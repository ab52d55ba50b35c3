//! Patch decision engine.
//!
//! ```text
//! Scanning --switch--> Found --label A--> Patched --finalize--> VerifiedNeeded
//!    |                   |                                  \--> VerifiedNotNeeded
//!    +--> Unmatched      +--> (end without injection: violation)
//! ```
//!
//! Injection happens while the method is still being emitted, when label
//! offsets are not known yet. The verdict is taken after the writer has laid
//! the method out: if the patched case and its sibling resolve to the same
//! offset, the upstream code already shares one body for both and the
//! rewrite is retracted.

use digitfix_classfile::{EmittedMethod, Insn, Label};
use digitfix_error::{DigitfixError, Result};
use tracing::debug;

use crate::matcher::{CaseLabels, MatchStep, StructuralMatcher};
use crate::rounding::RoundingMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionState {
    Scanning,
    Found(CaseLabels),
    Patched(CaseLabels),
    VerifiedNeeded,
    VerifiedNotNeeded,
    Unmatched,
}

/// Final answer for one target method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The injection stays; the replacement method must be transplanted.
    Modified,
    /// Both cases share one body upstream. Keep the original bytes.
    AlreadyFixed,
    /// The expected construct is not there. Keep the original bytes.
    Unmatched,
}

#[derive(Debug, Clone)]
pub struct PatchDecision {
    matcher: StructuralMatcher,
    state: DecisionState,
}

impl PatchDecision {
    pub fn new(patched: RoundingMode, sibling: RoundingMode) -> Self {
        Self {
            matcher: StructuralMatcher::new(patched, sibling),
            state: DecisionState::Scanning,
        }
    }

    pub const fn state(&self) -> DecisionState {
        self.state
    }

    /// True once the injection point has been used.
    pub const fn applied(&self) -> bool {
        matches!(
            self.state,
            DecisionState::Patched(_) | DecisionState::VerifiedNeeded
        )
    }

    pub fn on_insn(&mut self, insn: &Insn) -> Result<()> {
        let step = self.matcher.observe(insn)?;
        if self.state != DecisionState::Scanning {
            return Ok(());
        }
        match step {
            MatchStep::Continue => {}
            MatchStep::Captured(labels) => self.state = DecisionState::Found(labels),
            MatchStep::Unmatched { positions } => {
                debug!(positions, "switch too small for the patched case");
                self.state = DecisionState::Unmatched;
            }
        }
        Ok(())
    }

    /// Called for every label bound in the method. Returns true exactly once,
    /// the first time the patched case's label is reached.
    pub fn take_injection(&mut self, label: Label) -> bool {
        match self.state {
            DecisionState::Found(labels) if labels.patched == label => {
                self.state = DecisionState::Patched(labels);
                true
            }
            _ => false,
        }
    }

    /// Resolve the verdict from the laid-out method.
    pub fn finish(&mut self, emitted: &EmittedMethod) -> Result<Verdict> {
        match self.state {
            DecisionState::Scanning | DecisionState::Unmatched => {
                self.state = DecisionState::Unmatched;
                Ok(Verdict::Unmatched)
            }
            DecisionState::Found(labels) => Err(DigitfixError::violation(format!(
                "case label {} never bound in {}",
                labels.patched, emitted.name
            ))),
            DecisionState::Patched(labels) => {
                let offset = |label: Label| {
                    emitted.label_offset(label).ok_or_else(|| {
                        DigitfixError::internal(format!("label {label} has no offset"))
                    })
                };
                let patched = offset(labels.patched)?;
                let sibling = offset(labels.sibling)?;
                if patched == sibling {
                    self.state = DecisionState::VerifiedNotNeeded;
                    Ok(Verdict::AlreadyFixed)
                } else {
                    self.state = DecisionState::VerifiedNeeded;
                    Ok(Verdict::Modified)
                }
            }
            DecisionState::VerifiedNeeded | DecisionState::VerifiedNotNeeded => Err(
                DigitfixError::internal("decision finalized twice"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digitfix_classfile::{ClassAccess, ClassHeader, ClassWriter, MethodAccess, MethodVisitor, opcodes};

    fn decision() -> PatchDecision {
        PatchDecision::new(RoundingMode::HalfUp, RoundingMode::HalfDown)
    }

    /// Lay out `switch` with case bodies bound as given and return the result.
    fn emitted(bind_sibling_with_patched: bool) -> (EmittedMethod, Vec<Label>) {
        let mut cw = ClassWriter::new(ClassHeader {
            minor_version: 0,
            major_version: 52,
            access: ClassAccess::PUBLIC,
            name: "t/T".to_owned(),
            super_name: Some("java/lang/Object".to_owned()),
            interfaces: Vec::new(),
        });
        let mut mw = cw.begin_method(MethodAccess::PUBLIC, "m", "(I)I");
        mw.visit_code(1, 2).expect("code");
        let labels: Vec<Label> = (0..8).map(|_| mw.new_label()).collect();
        let default = mw.new_label();
        mw.emit(Insn::var(opcodes::ILOAD, 1));
        mw.emit(Insn::TableSwitch {
            low: 0,
            high: 7,
            default,
            targets: labels.clone(),
        });
        for (i, label) in labels.iter().enumerate() {
            mw.bind(*label);
            if i == 4 && bind_sibling_with_patched {
                continue;
            }
            mw.emit(Insn::push_int(i as i32));
            mw.emit(Insn::simple(opcodes::IRETURN));
        }
        mw.bind(default);
        mw.emit(Insn::simple(opcodes::ICONST_M1));
        mw.emit(Insn::simple(opcodes::IRETURN));
        (cw.commit(mw).expect("commit"), labels)
    }

    fn drive(d: &mut PatchDecision, labels: &[Label]) {
        d.on_insn(&Insn::TableSwitch {
            low: 0,
            high: 7,
            default: Label::synthetic(99),
            targets: labels.to_vec(),
        })
        .expect("switch");
        assert!(matches!(d.state(), DecisionState::Found(_)));
        assert!(!d.take_injection(labels[3]));
        assert!(d.take_injection(labels[4]));
        assert!(!d.take_injection(labels[4]), "injection fires only once");
        assert!(d.applied());
    }

    #[test]
    fn test_distinct_offsets_mean_modified() {
        let (method, labels) = emitted(false);
        let mut d = decision();
        drive(&mut d, &labels);
        assert_eq!(d.finish(&method).expect("verdict"), Verdict::Modified);
        assert_eq!(d.state(), DecisionState::VerifiedNeeded);
    }

    #[test]
    fn test_shared_offset_means_already_fixed() {
        let (method, labels) = emitted(true);
        let mut d = decision();
        drive(&mut d, &labels);
        assert_eq!(d.finish(&method).expect("verdict"), Verdict::AlreadyFixed);
        assert!(!d.applied());
    }

    #[test]
    fn test_no_switch_is_unmatched() {
        let (method, _) = emitted(false);
        let mut d = decision();
        d.on_insn(&Insn::simple(opcodes::NOP)).expect("nop");
        assert_eq!(d.finish(&method).expect("verdict"), Verdict::Unmatched);
    }

    #[test]
    fn test_found_without_injection_is_violation() {
        let (method, labels) = emitted(false);
        let mut d = decision();
        d.on_insn(&Insn::TableSwitch {
            low: 0,
            high: 7,
            default: Label::synthetic(99),
            targets: labels,
        })
        .expect("switch");
        assert!(d.finish(&method).is_err());
    }
}
