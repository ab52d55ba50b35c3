//! Who decides whether a dropped digit rounds the kept ones up.

use digitfix_error::{DigitfixError, Result};
use digitfix_patch::RoundingMode;
use digitfix_patch::rounding::ROUNDING_MODE_CLASS;
use digitfix_vm::{ObjRef, Value, Vm, VmConfig};
use tracing::trace;

use crate::digit_list::DigitList;

pub const SHOULD_ROUND_UP: &str = "shouldRoundUp";
pub const SHOULD_ROUND_UP_DESCRIPTOR: &str = "(IZZ)Z";

/// Message of the exception `UNNECESSARY` raises when rounding is needed.
pub const ROUNDING_NEEDED: &str =
    "Rounding needed with the rounding mode being set to RoundingMode.UNNECESSARY";

pub trait RoundingOracle {
    fn should_round_up(
        &mut self,
        list: &DigitList,
        maximum_digits: i32,
        already_rounded: bool,
        exact: bool,
    ) -> Result<bool>;
}

/// Runs a rounding method of a loaded class in the interpreter.
///
/// Each call allocates a fresh receiver carrying the digit list fields; the
/// receiver only gets the fields its class declares. Everything a call
/// allocates is released once it returns, so the heap holds only the
/// rounding mode constants between calls.
#[derive(Debug)]
pub struct BytecodeOracle {
    vm: Vm,
    modes: Vec<ObjRef>,
    method: String,
    descriptor: String,
}

impl BytecodeOracle {
    /// Oracle over `shouldRoundUp(IZZ)Z` of `class_bytes`.
    pub fn new(class_bytes: Vec<u8>, config: VmConfig) -> Result<Self> {
        Self::with_method(
            class_bytes,
            config,
            SHOULD_ROUND_UP,
            SHOULD_ROUND_UP_DESCRIPTOR,
        )
    }

    pub fn with_method(
        class_bytes: Vec<u8>,
        config: VmConfig,
        method: &str,
        descriptor: &str,
    ) -> Result<Self> {
        let mut vm = Vm::new(class_bytes, config)?;
        let names: Vec<&str> = RoundingMode::ALL.iter().map(|m| m.java_name()).collect();
        let modes = vm.define_enum(ROUNDING_MODE_CLASS, &names)?;
        Ok(Self {
            vm,
            modes,
            method: method.to_owned(),
            descriptor: descriptor.to_owned(),
        })
    }

    pub const fn vm(&self) -> &Vm {
        &self.vm
    }

    fn receiver(&mut self, list: &DigitList) -> Result<ObjRef> {
        let chars: Vec<u16> = list.digits.iter().map(|&d| u16::from(d)).collect();
        let digits = self.vm.alloc_chars(&chars)?;
        let mode = self.modes[list.rounding_mode.ordinal()];
        let fields = [
            ("digits", Value::obj(digits)),
            ("count", Value::Int(list.count as i32)),
            ("decimalAt", Value::Int(list.decimal_at)),
            ("isNegative", Value::bool(list.is_negative)),
            ("roundingMode", Value::obj(mode)),
        ];
        let declared: Vec<(&str, Value)> = fields
            .into_iter()
            .filter(|(name, _)| self.vm.declares_field(name))
            .collect();
        self.vm.new_instance(&declared)
    }
}

impl RoundingOracle for BytecodeOracle {
    fn should_round_up(
        &mut self,
        list: &DigitList,
        maximum_digits: i32,
        already_rounded: bool,
        exact: bool,
    ) -> Result<bool> {
        let mark = self.vm.heap().len();
        let out = self.receiver(list).and_then(|this| {
            self.vm.invoke_virtual(
                this,
                &self.method,
                &self.descriptor,
                &[
                    Value::Int(maximum_digits),
                    Value::bool(already_rounded),
                    Value::bool(exact),
                ],
            )
        });
        self.vm.heap_mut().truncate(mark);
        let out = out?;
        let answer = out
            .ok_or_else(|| {
                DigitfixError::execution(format!("{}{} returned void", self.method, self.descriptor))
            })?
            .as_bool()?;
        trace!(
            digits = list.significant(),
            mode = %list.rounding_mode,
            maximum_digits,
            already_rounded,
            exact,
            answer,
            steps = self.vm.steps(),
            "rounding decision"
        );
        Ok(answer)
    }
}

/// Native rounding decisions of a corrected runtime, for every mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceOracle;

impl RoundingOracle for ReferenceOracle {
    fn should_round_up(
        &mut self,
        list: &DigitList,
        maximum_digits: i32,
        already_rounded: bool,
        exact: bool,
    ) -> Result<bool> {
        let Ok(max) = usize::try_from(maximum_digits) else {
            return Ok(false);
        };
        if max >= list.count {
            return Ok(false);
        }
        let digits = &list.digits[..list.count];
        let dropped_nonzero = digits[max..].iter().any(|&d| d != b'0');
        let last = max == list.count - 1;
        let decision = match list.rounding_mode {
            RoundingMode::Up => dropped_nonzero,
            RoundingMode::Down => false,
            RoundingMode::Ceiling => dropped_nonzero && !list.is_negative,
            RoundingMode::Floor => dropped_nonzero && list.is_negative,
            mode @ (RoundingMode::HalfUp | RoundingMode::HalfDown) => match digits[max] {
                d if d > b'5' => true,
                b'5' if !last => true,
                b'5' if exact => mode == RoundingMode::HalfUp,
                b'5' => !already_rounded,
                _ => false,
            },
            RoundingMode::HalfEven => match digits[max] {
                d if d > b'5' => true,
                b'5' if !last => digits[max + 1..].iter().any(|&d| d != b'0'),
                b'5' if already_rounded => false,
                b'5' if !exact => true,
                b'5' => max > 0 && (digits[max - 1] - b'0') % 2 != 0,
                _ => false,
            },
            RoundingMode::Unnecessary => {
                if dropped_nonzero {
                    return Err(DigitfixError::execution(format!(
                        "uncaught java.lang.ArithmeticException: {ROUNDING_NEEDED}"
                    )));
                }
                false
            }
        };
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digitfix_patch::{SpecimenKind, specimen};

    fn list(digits: &str, mode: RoundingMode) -> DigitList {
        DigitList {
            digits: digits.as_bytes().to_vec(),
            count: digits.len(),
            decimal_at: 1,
            is_negative: false,
            rounding_mode: mode,
        }
    }

    #[test]
    fn test_reference_half_up_tie_cases() {
        let mut oracle = ReferenceOracle;
        let tie = list("125", RoundingMode::HalfUp);
        assert!(oracle.should_round_up(&tie, 2, false, true).expect("decide"));
        assert!(oracle.should_round_up(&tie, 2, false, false).expect("decide"));
        assert!(!oracle.should_round_up(&tie, 2, true, false).expect("decide"));
        let down = list("125", RoundingMode::HalfDown);
        assert!(!oracle.should_round_up(&down, 2, false, true).expect("decide"));
        assert!(oracle.should_round_up(&list("1251", RoundingMode::HalfDown), 2, true, false)
            .expect("decide"));
    }

    #[test]
    fn test_reference_unnecessary() {
        let mut oracle = ReferenceOracle;
        let err = oracle
            .should_round_up(&list("15", RoundingMode::Unnecessary), 1, false, false)
            .expect_err("rounding needed");
        assert!(err.to_string().contains(ROUNDING_NEEDED));
        assert!(!oracle
            .should_round_up(&list("100", RoundingMode::Unnecessary), 1, false, true)
            .expect("nothing dropped"));
    }

    #[test]
    fn test_reference_nothing_dropped() {
        let mut oracle = ReferenceOracle;
        for mode in RoundingMode::ALL {
            assert!(!oracle.should_round_up(&list("99", mode), 2, false, false).expect("decide"));
            assert!(!oracle.should_round_up(&list("99", mode), -1, false, false).expect("decide"));
        }
    }

    #[test]
    fn test_bytecode_oracle_runs_loaded_class() {
        let fixed = specimen(SpecimenKind::Fixed).expect("specimen");
        let mut oracle = BytecodeOracle::new(fixed, VmConfig::default()).expect("oracle");
        let l = list("99999", RoundingMode::HalfUp);
        assert!(oracle.should_round_up(&l, 4, true, false).expect("decide"));
        assert!(oracle.vm().steps() > 0);

        let affected = specimen(SpecimenKind::Affected).expect("specimen");
        let mut oracle = BytecodeOracle::new(affected, VmConfig::default()).expect("oracle");
        assert!(!oracle.should_round_up(&l, 4, true, false).expect("decide"));
    }

    #[test]
    fn test_bytecode_oracle_releases_call_allocations() {
        let fixed = specimen(SpecimenKind::Fixed).expect("specimen");
        let mut oracle = BytecodeOracle::new(fixed, VmConfig::default()).expect("oracle");
        let baseline = oracle.vm().heap().len();
        for _ in 0..3 {
            oracle
                .should_round_up(&list("125", RoundingMode::HalfUp), 2, false, true)
                .expect("decide");
            assert_eq!(oracle.vm().heap().len(), baseline);
        }
        oracle
            .should_round_up(&list("15", RoundingMode::Unnecessary), 1, false, false)
            .expect_err("rounding needed");
        assert_eq!(oracle.vm().heap().len(), baseline);
        assert!(oracle
            .should_round_up(&list("99999", RoundingMode::HalfUp), 4, true, false)
            .expect("decide after failure"));
    }
}
