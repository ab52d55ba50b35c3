//! Template artifact holding the replacement method.
//!
//! The replacement is kept as a compiled class rather than a hand-built
//! instruction list; the transplanter copies its method body and renames the
//! class. The built-in template is assembled here from the corrected
//! `HALF_UP` decision:
//!
//! ```text
//! boolean __patched__shouldRoundUp_HALF_UP(int maximumDigits,
//!         boolean alreadyRounded, boolean valueExactAsDecimal) {
//!     if (digits[maximumDigits] > '5') return true;
//!     if (digits[maximumDigits] != '5') return false;
//!     if (maximumDigits != count - 1) return true;
//!     if (valueExactAsDecimal) return true;
//!     return !alreadyRounded;
//! }
//! ```

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use digitfix_classfile::opcodes::{
    ALOAD, BIPUSH, CALOAD, GETFIELD, ICONST_0, ICONST_1, IF_ICMPEQ, IF_ICMPLE, IF_ICMPNE, IFEQ,
    IFNE, ILOAD, INVOKESPECIAL, IRETURN, ISUB, RETURN,
};
use digitfix_classfile::{
    ClassAccess, ClassHeader, ClassWriter, FieldAccess, Frame, Insn, LocalTable, LocalVariable,
    MethodAccess, MethodVisitor, MethodWriter, VType,
};
use digitfix_error::{DigitfixError, Result};
use smallvec::smallvec;

use crate::config::PatchConfig;

/// Internal name of the built-in template class.
pub const TEMPLATE_CLASS: &str = "digitfix/template/DigitList";

/// Where template bytes come from.
pub trait TemplateSource: Send + Sync + fmt::Debug {
    fn load(&self) -> Result<Cow<'_, [u8]>>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// Template assembled in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedTemplate {
    class_name: String,
    method_name: String,
    descriptor: String,
}

impl EmbeddedTemplate {
    pub fn new(class_name: &str, method_name: &str, descriptor: &str) -> Self {
        Self {
            class_name: class_name.to_owned(),
            method_name: method_name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
    }

    pub fn from_config(config: &PatchConfig) -> Self {
        Self::new(
            &config.template_class,
            &config.replacement_method,
            &config.method_descriptor,
        )
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn assemble(&self) -> Result<Vec<u8>> {
        if self.descriptor != "(IZZ)Z" {
            return Err(DigitfixError::template_unavailable(format!(
                "built-in template only provides (IZZ)Z, not {}",
                self.descriptor
            )));
        }
        assemble_template(&self.class_name, &self.method_name)
    }
}

impl Default for EmbeddedTemplate {
    fn default() -> Self {
        Self::from_config(&PatchConfig::default())
    }
}

impl TemplateSource for EmbeddedTemplate {
    fn load(&self) -> Result<Cow<'_, [u8]>> {
        self.assemble().map(Cow::Owned)
    }

    fn describe(&self) -> String {
        format!("built-in {}", self.class_name)
    }
}

/// Compiled template class read from disk on first use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTemplate {
    path: PathBuf,
}

impl FileTemplate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemplateSource for FileTemplate {
    fn load(&self) -> Result<Cow<'_, [u8]>> {
        std::fs::read(&self.path).map(Cow::Owned).map_err(|e| {
            DigitfixError::template_unavailable(format!("{}: {e}", self.path.display()))
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Template source selected by `config`.
pub fn template_source(config: &PatchConfig) -> Box<dyn TemplateSource> {
    match &config.template_path {
        Some(path) => Box::new(FileTemplate::new(path)),
        None => Box::new(EmbeddedTemplate::from_config(config)),
    }
}

fn assemble_template(class: &str, method: &str) -> Result<Vec<u8>> {
    let mut cw = ClassWriter::new(ClassHeader {
        minor_version: 0,
        major_version: 52,
        access: ClassAccess::SUPER | ClassAccess::ABSTRACT,
        name: class.to_owned(),
        super_name: Some("java/lang/Object".to_owned()),
        interfaces: Vec::new(),
    });
    cw.add_field(FieldAccess::empty(), "digits", "[C")?;
    cw.add_field(FieldAccess::empty(), "count", "I")?;

    let mut init = cw.begin_method(MethodAccess::empty(), "<init>", "()V");
    init.visit_code(1, 1)?;
    init.emit(Insn::var(ALOAD, 0));
    init.emit(Insn::method(INVOKESPECIAL, "java/lang/Object", "<init>", "()V"));
    init.emit(Insn::simple(RETURN));
    cw.commit(init)?;

    let this = format!("L{class};");
    let mut mw = cw.begin_method(MethodAccess::empty(), method, "(IZZ)Z");
    mw.visit_code(3, 4)?;
    let start = mw.new_label();
    let not_above = mw.new_label();
    let last = mw.new_label();
    let inexact = mw.new_label();
    let round_down = mw.new_label();
    let end = mw.new_label();

    let digit_vs_five = |mw: &mut MethodWriter| {
        mw.emit(Insn::var(ALOAD, 0));
        mw.emit(Insn::field(GETFIELD, class, "digits", "[C"));
        mw.emit(Insn::var(ILOAD, 1));
        mw.emit(Insn::simple(CALOAD));
        mw.emit(Insn::Int {
            opcode: BIPUSH,
            operand: i32::from(b'5'),
        });
    };
    let ret = |mw: &mut MethodWriter, value: bool| {
        mw.emit(Insn::simple(if value { ICONST_1 } else { ICONST_0 }));
        mw.emit(Insn::simple(IRETURN));
    };

    mw.bind(start);
    mw.visit_line_number(40, start)?;
    digit_vs_five(&mut mw);
    mw.emit(Insn::jump(IF_ICMPLE, not_above));
    ret(&mut mw, true);

    mw.bind(not_above);
    mw.frame(Frame::Same);
    mw.visit_line_number(41, not_above)?;
    digit_vs_five(&mut mw);
    mw.emit(Insn::jump(IF_ICMPNE, round_down));
    mw.emit(Insn::var(ILOAD, 1));
    mw.emit(Insn::var(ALOAD, 0));
    mw.emit(Insn::field(GETFIELD, class, "count", "I"));
    mw.emit(Insn::simple(ICONST_1));
    mw.emit(Insn::simple(ISUB));
    mw.emit(Insn::jump(IF_ICMPEQ, last));
    ret(&mut mw, true);

    mw.bind(last);
    mw.frame(Frame::Same);
    mw.visit_line_number(43, last)?;
    mw.emit(Insn::var(ILOAD, 3));
    mw.emit(Insn::jump(IFEQ, inexact));
    ret(&mut mw, true);

    mw.bind(inexact);
    mw.frame(Frame::Full {
        locals: smallvec![
            VType::object(class),
            VType::Integer,
            VType::Integer,
            VType::Integer
        ],
        stack: smallvec![],
    });
    mw.visit_line_number(44, inexact)?;
    mw.emit(Insn::var(ILOAD, 2));
    mw.emit(Insn::jump(IFNE, round_down));
    ret(&mut mw, true);

    mw.bind(round_down);
    mw.frame(Frame::Same);
    ret(&mut mw, false);
    mw.bind(end);

    for (index, name, descriptor) in [
        (0, "this", this.as_str()),
        (1, "maximumDigits", "I"),
        (2, "alreadyRounded", "Z"),
        (3, "valueExactAsDecimal", "Z"),
    ] {
        mw.visit_local_variable(LocalVariable {
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            start,
            end,
            index,
            table: LocalTable::Descriptor,
        })?;
    }
    cw.commit(mw)?;
    cw.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use digitfix_classfile::{ClassReader, MethodRecorder};

    #[test]
    fn test_embedded_template_parses() {
        let template = EmbeddedTemplate::default();
        let bytes = template.load().expect("assemble");
        let reader = ClassReader::new(&bytes).expect("parse");
        assert_eq!(reader.name(), TEMPLATE_CLASS);
        assert!(reader.has_field("digits", "[C"));
        assert!(reader.has_field("count", "I"));
        assert!(reader.has_method("__patched__shouldRoundUp_HALF_UP", "(IZZ)Z"));
        assert!(reader.has_method("<init>", "()V"));

        let mut rec = MethodRecorder::new();
        reader
            .decode_method("__patched__shouldRoundUp_HALF_UP", "(IZZ)Z", &mut rec)
            .expect("decode");
        let owners: Vec<&str> = rec
            .insns()
            .filter_map(|i| match i {
                Insn::Field { owner, .. } => Some(owner.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(owners.len(), 3);
        assert!(owners.iter().all(|o| *o == TEMPLATE_CLASS));
    }

    #[test]
    fn test_embedded_template_refuses_other_shapes() {
        let template = EmbeddedTemplate::new(TEMPLATE_CLASS, "m", "(I)Z");
        let err = template.load().expect_err("shape");
        assert!(matches!(err, DigitfixError::TemplateUnavailable { .. }));
    }

    #[test]
    fn test_missing_file_is_template_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = FileTemplate::new(dir.path().join("absent.class"));
        let err = template.load().expect_err("missing");
        assert!(matches!(err, DigitfixError::TemplateUnavailable { .. }));
        assert!(template.describe().ends_with("absent.class"));
    }

    #[test]
    fn test_source_follows_config() {
        let mut config = PatchConfig::default();
        assert!(template_source(&config).describe().starts_with("built-in"));
        config.template_path = Some(PathBuf::from("/tmp/t.class"));
        assert_eq!(template_source(&config).describe(), "/tmp/t.class");
    }
}
