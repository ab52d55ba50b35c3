use std::sync::Arc;

use digitfix_patch::rounding::ROUNDING_MODE_CLASS;
use digitfix_patch::{
    ClassFileTransformer, DIGIT_LIST_CLASS, DigitListTransformer, PatchConfig, PatchState,
    RoundingMode, SpecimenKind, specimen,
};
use digitfix_vm::{Value, Vm, VmConfig};
use proptest::prelude::*;

struct Input<'a> {
    digits: &'a str,
    decimal_at: i32,
    negative: bool,
    mode: RoundingMode,
    max: i32,
    already_rounded: bool,
    exact: bool,
}

impl<'a> Input<'a> {
    fn half_up(digits: &'a str, max: i32) -> Self {
        Self {
            digits,
            decimal_at: 0,
            negative: false,
            mode: RoundingMode::HalfUp,
            max,
            already_rounded: false,
            exact: false,
        }
    }
}

fn patched() -> Vec<u8> {
    let transformer =
        DigitListTransformer::new(PatchConfig::default(), Arc::new(PatchState::new()))
            .expect("transformer");
    let input = specimen(SpecimenKind::Affected).expect("specimen");
    transformer
        .transform(DIGIT_LIST_CLASS, &input)
        .expect("affected specimen is patched")
}

fn should_round_up(class: &[u8], input: &Input<'_>) -> digitfix_error::Result<bool> {
    let mut vm = Vm::new(class.to_vec(), VmConfig::default())?;
    let names: Vec<&str> = RoundingMode::ALL.iter().map(|m| m.java_name()).collect();
    let modes = vm.define_enum(ROUNDING_MODE_CLASS, &names)?;
    let chars: Vec<u16> = input.digits.encode_utf16().collect();
    let digits = vm.alloc_chars(&chars)?;
    let this = vm.new_instance(&[
        ("digits", Value::obj(digits)),
        ("count", Value::Int(chars.len() as i32)),
        ("decimalAt", Value::Int(input.decimal_at)),
        ("isNegative", Value::bool(input.negative)),
        ("roundingMode", Value::obj(modes[input.mode.ordinal()])),
    ])?;
    let out = vm.invoke_virtual(
        this,
        "shouldRoundUp",
        "(IZZ)Z",
        &[
            Value::Int(input.max),
            Value::bool(input.already_rounded),
            Value::bool(input.exact),
        ],
    )?;
    out.ok_or_else(|| digitfix_error::DigitfixError::internal("void result"))?
        .as_bool()
}

#[test]
fn test_already_rounded_trailing_nine_differs_between_builds() {
    // 99.999 with two fraction digits: shortest digits 99999 sit above the
    // binary value, so alreadyRounded is set.
    let input = Input {
        decimal_at: 2,
        already_rounded: true,
        ..Input::half_up("99999", 4)
    };
    let affected = specimen(SpecimenKind::Affected).expect("specimen");
    let fixed = specimen(SpecimenKind::Fixed).expect("specimen");
    assert!(!should_round_up(&affected, &input).expect("run"));
    assert!(should_round_up(&fixed, &input).expect("run"));
    assert!(should_round_up(&patched(), &input).expect("run"));
}

#[test]
fn test_exact_tie_rounds_up_only_in_half_up() {
    let fixed = specimen(SpecimenKind::Fixed).expect("specimen");
    let patched = patched();
    let half_up = Input {
        exact: true,
        ..Input::half_up("125", 2)
    };
    let half_down = Input {
        mode: RoundingMode::HalfDown,
        exact: true,
        ..Input::half_up("125", 2)
    };
    for class in [&fixed, &patched] {
        assert!(should_round_up(class, &half_up).expect("run"));
        assert!(!should_round_up(class, &half_down).expect("run"));
    }
}

#[test]
fn test_half_even_uses_parity_of_previous_digit() {
    let affected = specimen(SpecimenKind::Affected).expect("specimen");
    let mk = |digits| Input {
        mode: RoundingMode::HalfEven,
        exact: true,
        ..Input::half_up(digits, 1)
    };
    assert!(!should_round_up(&affected, &mk("25")).expect("run"));
    assert!(should_round_up(&affected, &mk("35")).expect("run"));
    assert!(should_round_up(&affected, &mk("251")).expect("run"));
}

#[test]
fn test_ceiling_and_floor_follow_sign() {
    let affected = specimen(SpecimenKind::Affected).expect("specimen");
    for (mode, negative, expected) in [
        (RoundingMode::Ceiling, false, true),
        (RoundingMode::Ceiling, true, false),
        (RoundingMode::Floor, false, false),
        (RoundingMode::Floor, true, true),
    ] {
        let input = Input {
            mode,
            negative,
            ..Input::half_up("103", 1)
        };
        assert_eq!(
            should_round_up(&affected, &input).expect("run"),
            expected,
            "{mode} negative={negative}"
        );
    }
}

#[test]
fn test_nothing_to_round_when_max_reaches_count() {
    let patched = patched();
    for mode in RoundingMode::ALL {
        let input = Input {
            mode,
            ..Input::half_up("999", 3)
        };
        assert!(!should_round_up(&patched, &input).expect("run"), "{mode}");
    }
}

#[test]
fn test_unnecessary_throws_arithmetic_exception() {
    let input = Input {
        mode: RoundingMode::Unnecessary,
        ..Input::half_up("15", 1)
    };
    let err = should_round_up(&specimen(SpecimenKind::Fixed).expect("specimen"), &input)
        .expect_err("throws");
    assert!(
        err.to_string()
            .contains("uncaught java.lang.ArithmeticException: Rounding needed"),
        "{err}"
    );
    let zeros = Input {
        mode: RoundingMode::Unnecessary,
        ..Input::half_up("1000", 1)
    };
    assert!(!should_round_up(&patched(), &zeros).expect("run"));
}

proptest! {
    #[test]
    fn prop_patched_class_agrees_with_fixed_class(
        digits in "[0-9]{1,8}",
        max in 0_i32..10,
        mode in 0_usize..RoundingMode::COUNT,
        negative in any::<bool>(),
        already_rounded in any::<bool>(),
        exact in any::<bool>(),
    ) {
        let input = Input {
            digits: &digits,
            decimal_at: 1,
            negative,
            mode: RoundingMode::ALL[mode],
            max,
            already_rounded,
            exact,
        };
        let fixed = specimen(SpecimenKind::Fixed).expect("specimen");
        let expected = should_round_up(&fixed, &input).map_err(|e| e.to_string());
        let actual = should_round_up(&patched(), &input).map_err(|e| e.to_string());
        prop_assert_eq!(actual, expected);
    }
}

fn is_zero(class: &[u8], digits: &str) -> digitfix_error::Result<bool> {
    let mut vm = Vm::new(class.to_vec(), VmConfig::default())?;
    let chars: Vec<u16> = digits.encode_utf16().collect();
    let array = vm.alloc_chars(&chars)?;
    let this = vm.new_instance(&[
        ("digits", Value::obj(array)),
        ("count", Value::Int(chars.len() as i32)),
    ])?;
    vm.invoke_virtual(this, "isZero", "()Z", &[])?
        .ok_or_else(|| digitfix_error::DigitfixError::internal("void result"))?
        .as_bool()
}

#[test]
fn test_is_zero_reads_count_from_receiver() {
    let classes = [
        specimen(SpecimenKind::Affected).expect("affected"),
        specimen(SpecimenKind::Fixed).expect("fixed"),
        patched(),
    ];
    for class in &classes {
        assert!(is_zero(class, "").expect("empty"));
        assert!(is_zero(class, "000").expect("zeros"));
        assert!(!is_zero(class, "0010").expect("nonzero"));
    }
}
