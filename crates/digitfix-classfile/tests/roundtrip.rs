use digitfix_classfile::opcodes::*;
use digitfix_classfile::{
    ClassAccess, ClassHeader, ClassReader, ClassVisitor, ClassWriter, FieldAccess, Frame, Insn,
    Label, LocalTable, LocalVariable, Member, MethodAccess, MethodEvent, MethodRecorder,
    MethodVisitor, MethodWriter, VType,
};
use digitfix_error::Result;
use smallvec::smallvec;

fn header(name: &str) -> ClassHeader {
    ClassHeader {
        minor_version: 0,
        major_version: 52,
        access: ClassAccess::PUBLIC | ClassAccess::SUPER,
        name: name.to_owned(),
        super_name: Some("java/lang/Object".to_owned()),
        interfaces: Vec::new(),
    }
}

struct Sample {
    bytes: Vec<u8>,
    shared_offsets: (u32, u32),
}

/// `int pick(int)` with a three-way switch whose last two cases share code.
fn sample_class() -> Sample {
    let mut cw = ClassWriter::new(header("t/Sample"));
    cw.add_field(FieldAccess::PRIVATE, "count", "I").expect("field");

    let mut mw = cw.begin_method(MethodAccess::PUBLIC, "pick", "(I)I");
    mw.visit_code(1, 2).expect("code");
    let l0 = mw.new_label();
    let l1 = mw.new_label();
    let l2 = mw.new_label();
    let ld = mw.new_label();
    mw.emit(Insn::var(ILOAD, 1));
    mw.emit(Insn::TableSwitch {
        low: 0,
        high: 2,
        default: ld,
        targets: vec![l0, l1, l2],
    });
    mw.bind(l0);
    mw.frame(Frame::Full {
        locals: smallvec![VType::object("t/Sample"), VType::Integer],
        stack: smallvec![],
    });
    mw.visit_line_number(10, l0).expect("line");
    mw.emit(Insn::Simple(ICONST_1));
    mw.emit(Insn::Simple(IRETURN));
    mw.bind(l1);
    mw.bind(l2);
    mw.frame(Frame::Same);
    mw.emit(Insn::Simple(ICONST_2));
    mw.emit(Insn::Simple(IRETURN));
    mw.bind(ld);
    mw.frame(Frame::Same);
    mw.emit(Insn::Simple(ICONST_M1));
    mw.emit(Insn::Simple(IRETURN));
    let emitted = cw.commit(mw).expect("commit");
    let shared_offsets = (
        emitted.label_offset(l1).expect("l1 bound"),
        emitted.label_offset(l2).expect("l2 bound"),
    );
    assert!(emitted.label_offset(Label::synthetic(99)).is_none());

    Sample {
        bytes: cw.into_bytes().expect("serialize"),
        shared_offsets,
    }
}

#[test]
fn test_shared_case_labels_resolve_to_same_offset() {
    let sample = sample_class();
    assert_eq!(sample.shared_offsets.0, sample.shared_offsets.1);
}

#[test]
fn test_reader_sees_written_members() {
    let sample = sample_class();
    let reader = ClassReader::new(&sample.bytes).expect("parse");
    assert_eq!(reader.name(), "t/Sample");
    assert_eq!(reader.header().major_version, 52);
    assert!(reader.has_field("count", "I"));
    assert!(reader.has_method("pick", "(I)I"));
    assert!(!reader.has_method("pick", "(J)I"));
    assert_eq!(reader.methods_named("pick").count(), 1);
}

#[test]
fn test_decoded_switch_shares_target_labels() {
    let sample = sample_class();
    let reader = ClassReader::new(&sample.bytes).expect("parse");
    let mut rec = MethodRecorder::new();
    assert!(reader.decode_method("pick", "(I)I", &mut rec).expect("decode"));

    let insns: Vec<&Insn> = rec.insns().collect();
    assert_eq!(insns[0], &Insn::var(ILOAD, 1));
    let Insn::TableSwitch {
        low,
        high,
        targets,
        default,
    } = insns[1]
    else {
        panic!("expected tableswitch, got {:?}", insns[1]);
    };
    assert_eq!((*low, *high), (0, 2));
    assert_eq!(targets[1], targets[2]);
    assert_ne!(targets[0], targets[1]);
    assert_ne!(*default, targets[0]);

    // label, frame and line number come before the instruction they anchor
    let pos = rec
        .events
        .iter()
        .position(|e| *e == MethodEvent::Label(targets[0]))
        .expect("label event");
    assert!(matches!(rec.events[pos + 1], MethodEvent::Frame(Frame::Full { .. })));
    assert_eq!(
        rec.events[pos + 2],
        MethodEvent::LineNumber {
            line: 10,
            start: targets[0]
        }
    );
    assert_eq!(rec.events[pos + 3], MethodEvent::Insn(Insn::Simple(ICONST_1)));
    assert_eq!(rec.events.last(), Some(&MethodEvent::End));
}

#[test]
fn test_identity_copy_is_byte_exact() {
    let sample = sample_class();
    let reader = ClassReader::new(&sample.bytes).expect("parse");
    let mut writer = ClassWriter::from_reader(&reader);
    reader.accept(&mut writer).expect("accept");
    assert_eq!(writer.into_bytes().expect("serialize"), sample.bytes);
}

/// Rewrites every method through a `MethodWriter` without changing it.
struct Reencode {
    writer: ClassWriter,
}

struct Commit<'w> {
    writer: &'w mut ClassWriter,
    method: Option<MethodWriter>,
}

impl MethodVisitor for Commit<'_> {
    fn visit_code(&mut self, s: u16, l: u16) -> Result<()> {
        self.method.as_mut().map_or(Ok(()), |m| m.visit_code(s, l))
    }
    fn visit_label(&mut self, label: Label) -> Result<()> {
        self.method.as_mut().map_or(Ok(()), |m| m.visit_label(label))
    }
    fn visit_frame(&mut self, frame: Frame) -> Result<()> {
        self.method.as_mut().map_or(Ok(()), |m| m.visit_frame(frame))
    }
    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        self.method
            .as_mut()
            .map_or(Ok(()), |m| m.visit_line_number(line, start))
    }
    fn visit_insn(&mut self, insn: Insn) -> Result<()> {
        self.method.as_mut().map_or(Ok(()), |m| m.visit_insn(insn))
    }
    fn visit_end(&mut self) -> Result<()> {
        if let Some(method) = self.method.take() {
            self.writer.commit(method)?;
        }
        Ok(())
    }
}

impl ClassVisitor for Reencode {
    fn visit_field(&mut self, field: &Member<'_>) -> Result<()> {
        self.writer.copy_field(field)
    }

    fn visit_method(&mut self, method: &Member<'_>) -> Result<Option<Box<dyn MethodVisitor + '_>>> {
        let mw = self.writer.begin_method(
            MethodAccess::from_bits_retain(method.access_flags),
            method.name,
            method.descriptor,
        );
        Ok(Some(Box::new(Commit {
            writer: &mut self.writer,
            method: Some(mw),
        })))
    }
}

#[test]
fn test_decode_then_reencode_is_byte_exact() {
    let sample = sample_class();
    let reader = ClassReader::new(&sample.bytes).expect("parse");
    let mut adapter = Reencode {
        writer: ClassWriter::from_reader(&reader),
    };
    reader.accept(&mut adapter).expect("accept");
    assert_eq!(adapter.writer.into_bytes().expect("serialize"), sample.bytes);
}

#[test]
fn test_long_frame_delta_escalates_and_reads_back() {
    let mut cw = ClassWriter::new(header("t/Far"));
    let mut mw = cw.begin_method(MethodAccess::STATIC, "far", "()V");
    mw.visit_code(0, 0).expect("code");
    let target = mw.new_label();
    mw.emit(Insn::jump(GOTO, target));
    for _ in 0..100 {
        mw.emit(Insn::Simple(NOP));
    }
    mw.bind(target);
    mw.frame(Frame::Same);
    mw.emit(Insn::Simple(RETURN));
    let emitted = cw.commit(mw).expect("commit");
    assert_eq!(emitted.label_offset(target), Some(103));
    let bytes = cw.into_bytes().expect("serialize");

    let reader = ClassReader::new(&bytes).expect("parse");
    let mut rec = MethodRecorder::new();
    reader.decode_method("far", "()V", &mut rec).expect("decode");
    let at = Label::at_offset(103);
    let pos = rec
        .events
        .iter()
        .position(|e| *e == MethodEvent::Label(at))
        .expect("target label");
    assert_eq!(rec.events[pos + 1], MethodEvent::Frame(Frame::Same));
    assert_eq!(rec.insns().next(), Some(&Insn::jump(GOTO, at)));
}

#[test]
fn test_unbound_label_is_an_error() {
    let mut cw = ClassWriter::new(header("t/Broken"));
    let mut mw = cw.begin_method(MethodAccess::STATIC, "broken", "()V");
    mw.visit_code(0, 0).expect("code");
    let nowhere = mw.new_label();
    mw.emit(Insn::jump(GOTO, nowhere));
    assert!(cw.commit(mw).is_err());
}

#[test]
fn test_copy_from_foreign_pool_is_refused() {
    let sample = sample_class();
    let reader = ClassReader::new(&sample.bytes).expect("parse");
    let mut fresh = ClassWriter::new(header("t/Other"));
    let method = reader.methods().next().expect("one method");
    assert!(fresh.copy_method(&method).is_err());
}

#[test]
fn test_local_variable_table_reads_back() {
    let mut cw = ClassWriter::new(header("t/Locals"));
    let mut mw = cw.begin_method(MethodAccess::PUBLIC, "id", "(I)I");
    mw.visit_code(1, 2).expect("code");
    let start = mw.new_label();
    let end = mw.new_label();
    mw.bind(start);
    mw.emit(Insn::var(ILOAD, 1));
    mw.bind(end);
    mw.emit(Insn::Simple(IRETURN));
    mw.visit_local_variable(LocalVariable {
        name: "value".to_owned(),
        descriptor: "I".to_owned(),
        start,
        end,
        index: 1,
        table: LocalTable::Descriptor,
    })
    .expect("local");
    cw.commit(mw).expect("commit");
    let bytes = cw.into_bytes().expect("serialize");

    let reader = ClassReader::new(&bytes).expect("parse");
    let mut rec = MethodRecorder::new();
    assert!(reader.decode_method("id", "(I)I", &mut rec).expect("decode"));
    let locals: Vec<&LocalVariable> = rec
        .events
        .iter()
        .filter_map(|e| match e {
            MethodEvent::LocalVariable(v) => Some(v),
            _ => None,
        })
        .collect();
    assert_eq!(locals.len(), 1);
    assert_eq!(locals[0].name, "value");
    assert_eq!(locals[0].index, 1);
    assert_eq!(locals[0].table, LocalTable::Descriptor);
    assert_ne!(locals[0].start, locals[0].end);
}

#[test]
fn test_duplicate_methods_are_rejected() {
    let mut cw = ClassWriter::new(header("t/Twice"));
    for name in ["dupA", "dupB"] {
        let mut mw = cw.begin_method(MethodAccess::STATIC, name, "()V");
        mw.visit_code(0, 0).expect("code");
        mw.emit(Insn::Simple(RETURN));
        cw.commit(mw).expect("commit");
    }
    let mut bytes = cw.into_bytes().expect("serialize");
    let at = bytes
        .windows(4)
        .position(|w| w == b"dupB")
        .expect("second name in pool");
    bytes[at + 3] = b'A';

    let error = ClassReader::new(&bytes).expect_err("duplicate");
    assert!(error.to_string().contains("duplicate method dupA()V"), "{error}");
}
