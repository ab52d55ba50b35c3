use std::sync::Arc;

use digitfix_classfile::opcodes::{
    ALOAD, GETFIELD, ICONST_0, ICONST_1, ILOAD, INVOKEVIRTUAL, IRETURN,
};
use digitfix_classfile::{
    ClassAccess, ClassHeader, ClassReader, ClassWriter, FieldAccess, Frame, Insn, Label,
    MethodAccess, MethodEvent, MethodRecorder, MethodVisitor, MethodWriter, VType,
};
use digitfix_error::ErrorCategory;
use digitfix_patch::{
    ClassFileTransformer, DIGIT_LIST_CLASS, DigitListTransformer, EmbeddedTemplate, FileTemplate,
    PatchConfig, PatchState, SpecimenKind, TransformOutcome, specimen,
};
use smallvec::smallvec;

const REPLACEMENT: &str = "__patched__shouldRoundUp_HALF_UP";

fn transformer() -> DigitListTransformer {
    DigitListTransformer::new(PatchConfig::default(), Arc::new(PatchState::new()))
        .expect("transformer")
}

fn decode(bytes: &[u8], name: &str, desc: &str) -> MethodRecorder {
    let reader = ClassReader::new(bytes).expect("parse");
    let mut rec = MethodRecorder::new();
    assert!(reader.decode_method(name, desc, &mut rec).expect("decode"), "{name}");
    rec
}

fn switch_targets(rec: &MethodRecorder) -> Vec<Label> {
    rec.insns()
        .find_map(|i| match i {
            Insn::TableSwitch { targets, .. } => Some(targets.clone()),
            _ => None,
        })
        .expect("tableswitch")
}

fn forwarding_call() -> Vec<Insn> {
    vec![
        Insn::var(ALOAD, 0),
        Insn::var(ILOAD, 1),
        Insn::var(ILOAD, 2),
        Insn::var(ILOAD, 3),
        Insn::method(INVOKEVIRTUAL, DIGIT_LIST_CLASS, REPLACEMENT, "(IZZ)Z"),
        Insn::simple(IRETURN),
    ]
}

#[test]
fn test_half_up_case_forwards_to_replacement() {
    let input = specimen(SpecimenKind::Affected).expect("specimen");
    let output = transformer()
        .transform(DIGIT_LIST_CLASS, &input)
        .expect("modified");

    let rec = decode(&output, "shouldRoundUp", "(IZZ)Z");
    let half_up = switch_targets(&rec)[4];
    let at = rec
        .events
        .iter()
        .position(|e| *e == MethodEvent::Label(half_up))
        .expect("case label");
    // label, its frame, its line number, then the injected call
    assert!(matches!(rec.events[at + 1], MethodEvent::Frame(Frame::Full { .. })));
    assert!(matches!(rec.events[at + 2], MethodEvent::LineNumber { .. }));
    let injected: Vec<Insn> = rec.events[at + 3..at + 9]
        .iter()
        .map(|e| match e {
            MethodEvent::Insn(i) => i.clone(),
            other => panic!("expected instruction, got {other:?}"),
        })
        .collect();
    assert_eq!(injected, forwarding_call());
    // dead original body keeps a frame
    assert!(matches!(rec.events[at + 9], MethodEvent::Label(_)));
    assert_eq!(rec.events[at + 10], MethodEvent::Frame(Frame::Same));

    let max_stack = rec.events.iter().find_map(|e| match e {
        MethodEvent::Code { max_stack, .. } => Some(*max_stack),
        _ => None,
    });
    assert_eq!(max_stack, Some(4));
}

#[test]
fn test_only_the_half_up_case_changes() {
    let input = specimen(SpecimenKind::Affected).expect("specimen");
    let output = transformer()
        .transform(DIGIT_LIST_CLASS, &input)
        .expect("modified");
    let before = decode(&input, "shouldRoundUp", "(IZZ)Z");
    let after = decode(&output, "shouldRoundUp", "(IZZ)Z");
    let before: Vec<&Insn> = before.insns().collect();
    let after: Vec<&Insn> = after.insns().collect();
    assert_eq!(after.len(), before.len() + forwarding_call().len());
    let calls = after
        .iter()
        .filter(|i| matches!(i, Insn::Method { name, .. } if name == REPLACEMENT))
        .count();
    assert_eq!(calls, 1);
}

#[test]
fn test_untouched_members_are_copied_verbatim() {
    let input = specimen(SpecimenKind::Affected).expect("specimen");
    let output = transformer()
        .transform(DIGIT_LIST_CLASS, &input)
        .expect("modified");
    let original = ClassReader::new(&input).expect("parse");
    let patched = ClassReader::new(&output).expect("parse");
    let raw = |r: &ClassReader<'_>, name: &str| {
        r.methods()
            .find(|m| m.name == name)
            .map(|m| m.raw.to_vec())
            .expect("method")
    };
    assert_eq!(raw(&original, "isZero"), raw(&patched, "isZero"));
    assert_eq!(raw(&original, "<init>"), raw(&patched, "<init>"));
    assert_eq!(original.fields().count(), patched.fields().count());
    assert_eq!(patched.methods().count(), original.methods().count() + 1);
}

#[test]
fn test_transplanted_method_names_only_the_target() {
    let input = specimen(SpecimenKind::Affected).expect("specimen");
    let output = transformer()
        .transform(DIGIT_LIST_CLASS, &input)
        .expect("modified");
    let patched = ClassReader::new(&output).expect("parse");
    for (_, entry) in patched.pool().entries() {
        if let digitfix_classfile::CpEntry::Utf8(text) = entry {
            assert!(!text.contains("digitfix/template"), "template name leaked: {text}");
        }
    }
    let rec = decode(&output, REPLACEMENT, "(IZZ)Z");
    assert!(rec.insns().any(|i| matches!(
        i,
        Insn::Field { owner, name, .. } if owner == DIGIT_LIST_CLASS && name == "count"
    )));
}

#[test]
fn test_transform_is_idempotent() {
    let t = transformer();
    let input = specimen(SpecimenKind::Affected).expect("specimen");
    let once = t.transform(DIGIT_LIST_CLASS, &input).expect("modified");
    let report = t.transform_with_report(DIGIT_LIST_CLASS, &once);
    assert_eq!(report.outcome, TransformOutcome::AlreadyPatched);
    assert!(report.bytes.is_none());
}

#[test]
fn test_fixed_class_is_left_alone() {
    let t = transformer();
    let input = specimen(SpecimenKind::Fixed).expect("specimen");
    assert!(t.transform(DIGIT_LIST_CLASS, &input).is_none());
    assert!(!t.state().applied());
    assert_eq!(t.state().last_error(), None);
}

#[test]
fn test_template_read_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("DigitList.class");
    std::fs::write(&path, EmbeddedTemplate::default().assemble().expect("template"))
        .expect("write");
    let config = PatchConfig {
        template_path: Some(path),
        ..PatchConfig::default()
    };
    let t = DigitListTransformer::new(config, Arc::new(PatchState::new())).expect("transformer");
    let input = specimen(SpecimenKind::Affected).expect("specimen");
    assert!(t.transform(DIGIT_LIST_CLASS, &input).is_some());
}

#[test]
fn test_missing_template_file_keeps_bytes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let state = Arc::new(PatchState::new());
    let t = DigitListTransformer::with_template(
        PatchConfig::default(),
        Box::new(FileTemplate::new(dir.path().join("gone.class"))),
        Arc::clone(&state),
    )
    .expect("transformer");
    let input = specimen(SpecimenKind::Affected).expect("specimen");
    let report = t.transform_with_report(DIGIT_LIST_CLASS, &input);
    let TransformOutcome::Rejected { detail } = &report.outcome else {
        panic!("expected rejection, got {:?}", report.outcome);
    };
    assert!(detail.contains("gone.class"));
    assert!(!state.applied());
    assert!(state.last_error().is_some_and(|e| e.contains("template unavailable")));
}

#[test]
fn test_renamed_replacement_from_toml() {
    let config = PatchConfig::from_toml_str("replacement_method = \"roundHalfUpFixed\"\n")
        .expect("config");
    let t = DigitListTransformer::new(config, Arc::new(PatchState::new())).expect("transformer");
    let input = specimen(SpecimenKind::Affected).expect("specimen");
    let output = t.transform(DIGIT_LIST_CLASS, &input).expect("modified");
    let reader = ClassReader::new(&output).expect("parse");
    assert!(reader.has_method("roundHalfUpFixed", "(IZZ)Z"));
    assert!(!reader.has_method(REPLACEMENT, "(IZZ)Z"));
}

// ---------------------------------------------------------------------------
// Hand-built shapes of the target method
// ---------------------------------------------------------------------------

/// `DigitList` whose `shouldRoundUp` body is produced by `body`.
fn digit_list_with(body: impl FnOnce(&mut MethodWriter)) -> Vec<u8> {
    let mut cw = ClassWriter::new(ClassHeader {
        minor_version: 0,
        major_version: 52,
        access: ClassAccess::FINAL | ClassAccess::SUPER,
        name: DIGIT_LIST_CLASS.to_owned(),
        super_name: Some("java/lang/Object".to_owned()),
        interfaces: Vec::new(),
    });
    cw.add_field(FieldAccess::PUBLIC, "count", "I").expect("field");
    cw.add_field(FieldAccess::PUBLIC, "digits", "[C").expect("field");
    let mut mw = cw.begin_method(MethodAccess::PRIVATE, "shouldRoundUp", "(IZZ)Z");
    mw.visit_code(2, 4).expect("code");
    body(&mut mw);
    cw.commit(mw).expect("commit");
    cw.into_bytes().expect("serialize")
}

/// `switch (maximumDigits) { k cases }` where every case returns its index.
fn dense_switch(cases: u32) -> Vec<u8> {
    digit_list_with(|mw| {
        let labels: Vec<Label> = (0..cases).map(|_| mw.new_label()).collect();
        let default = mw.new_label();
        mw.emit(Insn::var(ILOAD, 1));
        mw.emit(Insn::TableSwitch {
            low: 0,
            high: cases as i32 - 1,
            default,
            targets: labels.clone(),
        });
        for label in labels {
            mw.bind(label);
            mw.frame(Frame::Same);
            mw.emit(Insn::simple(ICONST_1));
            mw.emit(Insn::simple(IRETURN));
        }
        mw.bind(default);
        mw.frame(Frame::Same);
        mw.emit(Insn::simple(ICONST_0));
        mw.emit(Insn::simple(IRETURN));
    })
}

#[test]
fn test_too_few_cases_is_silent_mismatch() {
    let t = transformer();
    let report = t.transform_with_report(DIGIT_LIST_CLASS, &dense_switch(5));
    assert_eq!(report.outcome, TransformOutcome::Unmatched);
    assert_eq!(t.state().last_error(), None);
}

#[test]
fn test_too_many_cases_is_rejected() {
    let t = transformer();
    let report = t.transform_with_report(DIGIT_LIST_CLASS, &dense_switch(9));
    assert!(matches!(report.outcome, TransformOutcome::Rejected { .. }));
    assert!(t.state().last_error().is_some());
}

#[test]
fn test_six_cases_is_enough() {
    let report = transformer().transform_with_report(DIGIT_LIST_CLASS, &dense_switch(6));
    assert_eq!(report.outcome, TransformOutcome::Modified);
}

#[test]
fn test_lookupswitch_is_rejected() {
    let bytes = digit_list_with(|mw| {
        let case = mw.new_label();
        let default = mw.new_label();
        mw.emit(Insn::var(ILOAD, 1));
        mw.emit(Insn::LookupSwitch {
            default,
            pairs: vec![(4, case)],
        });
        mw.bind(case);
        mw.frame(Frame::Same);
        mw.emit(Insn::simple(ICONST_1));
        mw.emit(Insn::simple(IRETURN));
        mw.bind(default);
        mw.frame(Frame::Same);
        mw.emit(Insn::simple(ICONST_0));
        mw.emit(Insn::simple(IRETURN));
    });
    let report = transformer().transform_with_report(DIGIT_LIST_CLASS, &bytes);
    let TransformOutcome::Rejected { detail } = report.outcome else {
        panic!("expected rejection");
    };
    assert!(detail.contains("LOOKUPSWITCH"));
}

#[test]
fn test_case_without_frame_in_framed_method_is_rejected() {
    let bytes = digit_list_with(|mw| {
        let labels: Vec<Label> = (0..8).map(|_| mw.new_label()).collect();
        let default = mw.new_label();
        mw.emit(Insn::var(ILOAD, 1));
        mw.emit(Insn::TableSwitch {
            low: 0,
            high: 7,
            default,
            targets: labels.clone(),
        });
        for (i, label) in labels.into_iter().enumerate() {
            mw.bind(label);
            if i != 4 {
                mw.frame(Frame::Full {
                    locals: smallvec![
                        VType::object(DIGIT_LIST_CLASS),
                        VType::Integer,
                        VType::Integer,
                        VType::Integer
                    ],
                    stack: smallvec![],
                });
            }
            mw.emit(Insn::var(ALOAD, 0));
            mw.emit(Insn::field(GETFIELD, DIGIT_LIST_CLASS, "count", "I"));
            mw.emit(Insn::simple(IRETURN));
        }
        mw.bind(default);
        mw.frame(Frame::Same);
        mw.emit(Insn::simple(ICONST_0));
        mw.emit(Insn::simple(IRETURN));
    });
    let t = transformer();
    let report = t.transform_with_report(DIGIT_LIST_CLASS, &bytes);
    assert!(matches!(report.outcome, TransformOutcome::Rejected { .. }));
}

#[test]
fn test_method_without_switch_is_unmatched() {
    let bytes = digit_list_with(|mw| {
        mw.emit(Insn::simple(ICONST_0));
        mw.emit(Insn::simple(IRETURN));
    });
    let report = transformer().transform_with_report(DIGIT_LIST_CLASS, &bytes);
    assert_eq!(report.outcome, TransformOutcome::Unmatched);
}

#[test]
fn test_static_target_is_rejected() {
    let mut cw = ClassWriter::new(ClassHeader {
        minor_version: 0,
        major_version: 52,
        access: ClassAccess::SUPER,
        name: DIGIT_LIST_CLASS.to_owned(),
        super_name: Some("java/lang/Object".to_owned()),
        interfaces: Vec::new(),
    });
    let mut mw = cw.begin_method(MethodAccess::STATIC, "shouldRoundUp", "(IZZ)Z");
    mw.visit_code(1, 3).expect("code");
    mw.emit(Insn::simple(ICONST_0));
    mw.emit(Insn::simple(IRETURN));
    cw.commit(mw).expect("commit");
    let bytes = cw.into_bytes().expect("serialize");
    let report = transformer().transform_with_report(DIGIT_LIST_CLASS, &bytes);
    assert!(matches!(report.outcome, TransformOutcome::Rejected { .. }));
}

#[test]
fn test_violation_errors_are_structural() {
    let err = digitfix_error::DigitfixError::violation("x");
    assert_eq!(err.category(), ErrorCategory::Structural);
}
