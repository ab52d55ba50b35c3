//! Method transplanter.
//!
//! Copies one method body out of the template class into the class being
//! written, renaming every reference to the template class so the copy
//! reads and calls the target's own members. Line numbers and the method's
//! own attributes are dropped: both refer to the template's source and pool.

use digitfix_classfile::{
    ClassReader, ClassWriter, Constant, EmittedMethod, Frame, Insn, Label, LocalVariable,
    MethodAccess, MethodVisitor, MethodWriter, RawAttribute, TryCatch, VType, remap_class_operand,
    remap_descriptor,
};
use digitfix_error::{DigitfixError, Result};
use tracing::debug;

/// Names involved in one transplant.
#[derive(Debug, Clone, Copy)]
pub struct TransplantPlan<'a> {
    pub template_class: &'a str,
    pub target_class: &'a str,
    pub method_name: &'a str,
    pub descriptor: &'a str,
}

/// Copy `plan.method_name` from `template` into `writer`.
///
/// `target` is the class being rewritten; every renamed member reference
/// must resolve in it.
pub fn transplant(
    writer: &mut ClassWriter,
    target: &ClassReader<'_>,
    template: &[u8],
    source: &str,
    plan: &TransplantPlan<'_>,
) -> Result<EmittedMethod> {
    let template_reader = ClassReader::new(template)
        .map_err(|e| DigitfixError::template_unavailable(format!("{source}: {e}")))?;
    if template_reader.name() != plan.template_class {
        return Err(DigitfixError::template_unavailable(format!(
            "{source} declares {}, expected {}",
            template_reader.name(),
            plan.template_class
        )));
    }

    let method = template_reader
        .methods_named(plan.method_name)
        .find(|m| m.descriptor == plan.descriptor);
    let Some(method) = method else {
        let other = template_reader
            .methods_named(plan.method_name)
            .next()
            .map(|m| m.descriptor.to_owned());
        return Err(DigitfixError::template_unavailable(match other {
            Some(found) => format!(
                "{}.{} has descriptor {found}, expected {}",
                plan.template_class, plan.method_name, plan.descriptor
            ),
            None => format!(
                "{source} has no method {}{}",
                plan.method_name, plan.descriptor
            ),
        }));
    };
    let access = MethodAccess::from_bits_retain(method.access_flags);
    if access.contains(MethodAccess::STATIC) || !access.has_code() {
        return Err(DigitfixError::template_unavailable(format!(
            "{}.{} must be a concrete instance method (flags {:#06x})",
            plan.template_class, plan.method_name, method.access_flags
        )));
    }
    if writer.has_method(plan.method_name, plan.descriptor) {
        return Err(DigitfixError::template_mismatch(format!(
            "{} already declares {}{}",
            plan.target_class, plan.method_name, plan.descriptor
        )));
    }

    let mut renamer = Renamer {
        out: writer.begin_method(access, plan.method_name, plan.descriptor),
        target,
        plan,
        dropped_lines: 0,
        dropped_attributes: 0,
    };
    template_reader
        .decode_method(plan.method_name, plan.descriptor, &mut renamer)
        .map_err(|e| match e {
            DigitfixError::TemplateMismatch { .. } => e,
            other => DigitfixError::template_unavailable(format!("{source}: {other}")),
        })?;
    debug!(
        method = plan.method_name,
        from = plan.template_class,
        to = plan.target_class,
        dropped_lines = renamer.dropped_lines,
        dropped_attributes = renamer.dropped_attributes,
        "transplanting template method"
    );
    writer.commit(renamer.out)
}

/// Forwards a template method into a [`MethodWriter`] under the target
/// class name.
struct Renamer<'a> {
    out: MethodWriter,
    target: &'a ClassReader<'a>,
    plan: &'a TransplantPlan<'a>,
    dropped_lines: usize,
    dropped_attributes: usize,
}

impl Renamer<'_> {
    fn class(&self, name: &str) -> String {
        remap_class_operand(name, self.plan.template_class, self.plan.target_class)
    }

    fn descriptor(&self, descriptor: &str) -> String {
        remap_descriptor(descriptor, self.plan.template_class, self.plan.target_class)
    }

    fn vtype(&self, ty: VType) -> VType {
        match ty {
            VType::Object(name) => VType::Object(self.class(&name)),
            other => other,
        }
    }

    fn frame(&self, frame: Frame) -> Frame {
        match frame {
            Frame::SameLocals1(ty) => Frame::SameLocals1(self.vtype(ty)),
            Frame::Append(added) => Frame::Append(added.into_iter().map(|t| self.vtype(t)).collect()),
            Frame::Full { locals, stack } => Frame::Full {
                locals: locals.into_iter().map(|t| self.vtype(t)).collect(),
                stack: stack.into_iter().map(|t| self.vtype(t)).collect(),
            },
            other => other,
        }
    }

    fn check_field(&self, owner: &str, name: &str, descriptor: &str) -> Result<()> {
        if owner == self.plan.target_class && !self.target.has_field(name, descriptor) {
            return Err(DigitfixError::template_mismatch(format!(
                "{} has no field {name} {descriptor}",
                self.plan.target_class
            )));
        }
        Ok(())
    }

    fn check_method(&self, owner: &str, name: &str, descriptor: &str) -> Result<()> {
        let is_self_call = name == self.plan.method_name && descriptor == self.plan.descriptor;
        if owner == self.plan.target_class
            && !is_self_call
            && !self.target.has_method(name, descriptor)
        {
            return Err(DigitfixError::template_mismatch(format!(
                "{} has no method {name}{descriptor}",
                self.plan.target_class
            )));
        }
        Ok(())
    }

    fn insn(&self, insn: Insn) -> Result<Insn> {
        Ok(match insn {
            Insn::Field {
                opcode,
                owner,
                name,
                descriptor,
            } => {
                let owner = self.class(&owner);
                let descriptor = self.descriptor(&descriptor);
                self.check_field(&owner, &name, &descriptor)?;
                Insn::Field {
                    opcode,
                    owner,
                    name,
                    descriptor,
                }
            }
            Insn::Method {
                opcode,
                owner,
                name,
                descriptor,
                interface,
            } => {
                let owner = self.class(&owner);
                let descriptor = self.descriptor(&descriptor);
                self.check_method(&owner, &name, &descriptor)?;
                Insn::Method {
                    opcode,
                    owner,
                    name,
                    descriptor,
                    interface,
                }
            }
            Insn::Type { opcode, class } => Insn::Type {
                opcode,
                class: self.class(&class),
            },
            Insn::MultiANewArray { class, dimensions } => Insn::MultiANewArray {
                class: self.class(&class),
                dimensions,
            },
            Insn::Ldc(Constant::Class(name)) => Insn::Ldc(Constant::Class(self.class(&name))),
            Insn::Ldc(Constant::Pooled(index)) => {
                return Err(DigitfixError::template_mismatch(format!(
                    "constant #{index} only resolves in the template pool"
                )));
            }
            Insn::InvokeDynamic { pool_index } => {
                return Err(DigitfixError::template_mismatch(format!(
                    "invokedynamic #{pool_index} only resolves in the template pool"
                )));
            }
            other => other,
        })
    }
}

impl MethodVisitor for Renamer<'_> {
    fn visit_code(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        self.out.visit_code(max_stack, max_locals)
    }

    fn visit_attribute(&mut self, _attr: RawAttribute) -> Result<()> {
        self.dropped_attributes += 1;
        Ok(())
    }

    fn visit_try_catch(&mut self, block: TryCatch) -> Result<()> {
        let catch_type = block.catch_type.map(|name| self.class(&name));
        self.out.visit_try_catch(TryCatch { catch_type, ..block })
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        self.out.visit_label(label)
    }

    fn visit_frame(&mut self, frame: Frame) -> Result<()> {
        let frame = self.frame(frame);
        self.out.visit_frame(frame)
    }

    fn visit_line_number(&mut self, _line: u16, _start: Label) -> Result<()> {
        self.dropped_lines += 1;
        Ok(())
    }

    fn visit_insn(&mut self, insn: Insn) -> Result<()> {
        let insn = self.insn(insn)?;
        self.out.visit_insn(insn)
    }

    fn visit_local_variable(&mut self, var: LocalVariable) -> Result<()> {
        let descriptor = self.descriptor(&var.descriptor);
        self.out
            .visit_local_variable(LocalVariable { descriptor, ..var })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specimen::{DIGIT_LIST_CLASS, SpecimenKind, specimen};
    use crate::template::{EmbeddedTemplate, TEMPLATE_CLASS};
    use digitfix_classfile::{MethodEvent, MethodRecorder};

    const METHOD: &str = "__patched__shouldRoundUp_HALF_UP";

    fn plan() -> TransplantPlan<'static> {
        TransplantPlan {
            template_class: TEMPLATE_CLASS,
            target_class: DIGIT_LIST_CLASS,
            method_name: METHOD,
            descriptor: "(IZZ)Z",
        }
    }

    fn copy_target(bytes: &[u8]) -> (ClassReader<'_>, ClassWriter) {
        let reader = ClassReader::new(bytes).expect("parse target");
        let mut writer = ClassWriter::from_reader(&reader);
        reader.accept(&mut writer).expect("copy");
        (reader, writer)
    }

    #[test]
    fn test_transplant_renames_every_template_reference() {
        let target = specimen(SpecimenKind::Affected).expect("specimen");
        let template = EmbeddedTemplate::default().assemble().expect("template");
        let (reader, mut writer) = copy_target(&target);
        transplant(&mut writer, &reader, &template, "built-in", &plan()).expect("transplant");
        let out = writer.into_bytes().expect("serialize");

        let patched = ClassReader::new(&out).expect("parse output");
        let mut rec = MethodRecorder::new();
        assert!(patched.decode_method(METHOD, "(IZZ)Z", &mut rec).expect("decode"));
        let mut saw_full_frame = false;
        for event in &rec.events {
            match event {
                MethodEvent::Insn(Insn::Field { owner, .. }) => assert_eq!(owner, DIGIT_LIST_CLASS),
                MethodEvent::Frame(Frame::Full { locals, .. }) => {
                    saw_full_frame = true;
                    assert_eq!(locals[0], VType::object(DIGIT_LIST_CLASS));
                }
                MethodEvent::LineNumber { .. } => panic!("line numbers must be stripped"),
                MethodEvent::LocalVariable(var) if var.name == "this" => {
                    assert_eq!(var.descriptor, "Ljava/text/DigitList;");
                }
                _ => {}
            }
        }
        assert!(saw_full_frame);
    }

    #[test]
    fn test_template_without_method_is_unavailable() {
        let target = specimen(SpecimenKind::Affected).expect("specimen");
        let template = EmbeddedTemplate::new(TEMPLATE_CLASS, "somethingElse", "(IZZ)Z")
            .assemble()
            .expect("template");
        let (reader, mut writer) = copy_target(&target);
        let err = transplant(&mut writer, &reader, &template, "t", &plan()).expect_err("missing");
        assert!(matches!(err, DigitfixError::TemplateUnavailable { .. }));
    }

    #[test]
    fn test_descriptor_mismatch_is_unavailable() {
        let target = specimen(SpecimenKind::Affected).expect("specimen");
        let template = EmbeddedTemplate::default().assemble().expect("template");
        let (reader, mut writer) = copy_target(&target);
        let wrong = TransplantPlan {
            descriptor: "(IZ)Z",
            ..plan()
        };
        let err = transplant(&mut writer, &reader, &template, "t", &wrong).expect_err("mismatch");
        assert!(err.to_string().contains("has descriptor (IZZ)Z"));
    }

    #[test]
    fn test_garbage_template_is_unavailable() {
        let target = specimen(SpecimenKind::Affected).expect("specimen");
        let (reader, mut writer) = copy_target(&target);
        let err = transplant(&mut writer, &reader, b"not a class", "t", &plan()).expect_err("junk");
        assert!(matches!(err, DigitfixError::TemplateUnavailable { .. }));
    }

    #[test]
    fn test_field_missing_from_target_is_mismatch() {
        // A target without `count`.
        let mut cw = ClassWriter::new(digitfix_classfile::ClassHeader {
            minor_version: 0,
            major_version: 52,
            access: digitfix_classfile::ClassAccess::SUPER,
            name: DIGIT_LIST_CLASS.to_owned(),
            super_name: Some("java/lang/Object".to_owned()),
            interfaces: Vec::new(),
        });
        cw.add_field(digitfix_classfile::FieldAccess::empty(), "digits", "[C")
            .expect("field");
        let target = cw.into_bytes().expect("serialize");
        let template = EmbeddedTemplate::default().assemble().expect("template");
        let (reader, mut writer) = copy_target(&target);
        let err = transplant(&mut writer, &reader, &template, "t", &plan()).expect_err("no count");
        assert!(matches!(err, DigitfixError::TemplateMismatch { .. }));
        assert!(err.to_string().contains("count"));
    }
}
