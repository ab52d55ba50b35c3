use digitfix_harness::{BytecodeOracle, DigitList, NumberFormat, ReferenceOracle, RoundingOracle};
use digitfix_patch::{EmbeddedTemplate, PatchConfig, RoundingMode, SpecimenKind, specimen};
use digitfix_vm::VmConfig;
use proptest::prelude::*;

fn template_oracle() -> BytecodeOracle {
    let config = PatchConfig::default();
    let template = EmbeddedTemplate::from_config(&config)
        .assemble()
        .expect("template");
    BytecodeOracle::with_method(
        template,
        VmConfig::default(),
        &config.replacement_method,
        &config.method_descriptor,
    )
    .expect("oracle")
}

fn list(digits: &str, negative: bool, mode: RoundingMode) -> DigitList {
    DigitList {
        digits: digits.as_bytes().to_vec(),
        count: digits.len(),
        decimal_at: 1,
        is_negative: negative,
        rounding_mode: mode,
    }
}

#[test]
fn test_template_decides_published_cases() {
    let mut oracle = template_oracle();
    // 99.999 at two fraction digits, 0.15 at one.
    assert!(oracle
        .should_round_up(&list("99999", false, RoundingMode::HalfUp), 4, true, false)
        .expect("decide"));
    assert!(!oracle
        .should_round_up(&list("15", false, RoundingMode::HalfUp), 1, true, false)
        .expect("decide"));
}

proptest! {
    #[test]
    fn prop_template_matches_reference_half_up(
        digits in "[1-9][0-9]{0,7}",
        max_seed in any::<usize>(),
        already_rounded in any::<bool>(),
        exact in any::<bool>(),
    ) {
        // The replacement is only reached once `max < count` holds.
        let max = (max_seed % digits.len()) as i32;
        let l = list(&digits, false, RoundingMode::HalfUp);
        let expected = ReferenceOracle.should_round_up(&l, max, already_rounded, exact)
            .expect("reference");
        let actual = template_oracle()
            .should_round_up(&l, max, already_rounded, exact)
            .expect("template");
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn prop_fixed_class_formats_like_reference(
        value in -10_000.0_f64..10_000.0,
        fraction in 0_i32..8,
        mode in 0_usize..RoundingMode::COUNT,
        grouping in any::<bool>(),
    ) {
        let format = NumberFormat::default()
            .with_maximum_fraction_digits(fraction)
            .with_grouping(grouping)
            .with_rounding_mode(RoundingMode::ALL[mode]);
        let mut fixed = BytecodeOracle::new(
            specimen(SpecimenKind::Fixed).expect("specimen"),
            VmConfig::default(),
        )
        .expect("oracle");
        let expected = format.format(value, &mut ReferenceOracle).map_err(|e| e.to_string());
        let actual = format.format(value, &mut fixed).map_err(|e| e.to_string());
        prop_assert_eq!(actual, expected);
    }
}
