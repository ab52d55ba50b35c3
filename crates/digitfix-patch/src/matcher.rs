//! Structural matcher for the rounding-mode switch.
//!
//! The target method dispatches on `roundingMode.ordinal()` through one dense
//! `tableswitch`, so case position `k` is the branch taken for ordinal `k`.
//! The matcher watches the instruction stream and captures the labels of the
//! two cases the patch cares about.

use digitfix_classfile::{Insn, Label, opcodes};
use digitfix_error::{DigitfixError, Result};

use crate::rounding::RoundingMode;

/// Case labels captured from the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseLabels {
    /// Entry of the case that gets redirected.
    pub patched: Label,
    /// Entry of its sibling; sharing an offset with `patched` means the
    /// class was fixed upstream.
    pub sibling: Label,
}

/// What the matcher concluded from one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStep {
    /// Not a switch, nothing changes.
    Continue,
    Captured(CaseLabels),
    /// The switch is too small to hold both cases.
    Unmatched { positions: usize },
}

#[derive(Debug, Clone)]
pub struct StructuralMatcher {
    patched: RoundingMode,
    sibling: RoundingMode,
    switches_seen: usize,
}

impl StructuralMatcher {
    pub fn new(patched: RoundingMode, sibling: RoundingMode) -> Self {
        Self {
            patched,
            sibling,
            switches_seen: 0,
        }
    }

    pub const fn switches_seen(&self) -> usize {
        self.switches_seen
    }

    /// Inspect one instruction of the target method.
    ///
    /// Cases are picked by their position in the jump table, not by key, so
    /// `low` is ignored. javac's `$SwitchMap` keys start at 1.
    ///
    /// Keeps checking after a capture so that a second switch is still
    /// reported.
    pub fn observe(&mut self, insn: &Insn) -> Result<MatchStep> {
        match insn {
            Insn::LookupSwitch { .. } => Err(DigitfixError::violation(
                "expected switch() case as a TABLESWITCH; was LOOKUPSWITCH",
            )),
            Insn::TableSwitch { targets, .. } => {
                self.switches_seen += 1;
                if self.switches_seen > 1 {
                    return Err(DigitfixError::violation(format!(
                        "expected exactly one {}; found another",
                        opcodes::mnemonic(opcodes::TABLESWITCH)
                    )));
                }
                self.capture(targets)
            }
            _ => Ok(MatchStep::Continue),
        }
    }

    fn capture(&self, targets: &[Label]) -> Result<MatchStep> {
        let positions = targets.len();
        if positions > RoundingMode::COUNT {
            return Err(DigitfixError::violation(format!(
                "switch has {positions} cases but {} declares only {}",
                crate::rounding::ROUNDING_MODE_CLASS,
                RoundingMode::COUNT
            )));
        }
        let needed = self.patched.ordinal().max(self.sibling.ordinal());
        if positions <= needed {
            return Ok(MatchStep::Unmatched { positions });
        }
        Ok(MatchStep::Captured(CaseLabels {
            patched: targets[self.patched.ordinal()],
            sibling: targets[self.sibling.ordinal()],
        }))
    }
}
