//! Visitor traits driven by [`crate::ClassReader::accept`].
//!
//! Adapters wrap a downstream visitor and forward events, changing only what
//! they need to. Every method has a no-op default so an adapter names just
//! the events it cares about.

use digitfix_error::Result;

use crate::access::ClassAccess;
use crate::insn::{Frame, Insn, Label, LocalVariable, RawAttribute, TryCatch};

/// Class-level facts visited before any member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    pub minor_version: u16,
    pub major_version: u16,
    pub access: ClassAccess,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
}

/// Field or method as it appears in the class file.
///
/// `raw` is the complete `field_info` / `method_info` structure; it is only
/// meaningful together with the pool identified by `pool_fingerprint`.
#[derive(Debug, Clone, Copy)]
pub struct Member<'a> {
    pub access_flags: u16,
    pub name: &'a str,
    pub descriptor: &'a str,
    pub raw: &'a [u8],
    pub pool_fingerprint: u64,
}

pub trait MethodVisitor {
    /// Start of the `Code` attribute. Not called for abstract or native
    /// methods.
    fn visit_code(&mut self, _max_stack: u16, _max_locals: u16) -> Result<()> {
        Ok(())
    }

    /// Non-`Code` attribute of the method itself.
    fn visit_attribute(&mut self, _attr: RawAttribute) -> Result<()> {
        Ok(())
    }

    fn visit_try_catch(&mut self, _block: TryCatch) -> Result<()> {
        Ok(())
    }

    fn visit_label(&mut self, _label: Label) -> Result<()> {
        Ok(())
    }

    /// Frame for the position of the most recent label.
    fn visit_frame(&mut self, _frame: Frame) -> Result<()> {
        Ok(())
    }

    fn visit_line_number(&mut self, _line: u16, _start: Label) -> Result<()> {
        Ok(())
    }

    fn visit_insn(&mut self, _insn: Insn) -> Result<()> {
        Ok(())
    }

    fn visit_local_variable(&mut self, _var: LocalVariable) -> Result<()> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait ClassVisitor {
    fn visit_header(&mut self, _header: &ClassHeader) -> Result<()> {
        Ok(())
    }

    fn visit_field(&mut self, _field: &Member<'_>) -> Result<()> {
        Ok(())
    }

    /// Return a visitor to receive the method body, or `None` to skip it.
    ///
    /// Returning `None` from a writer means "copy unchanged".
    fn visit_method(&mut self, _method: &Member<'_>) -> Result<Option<Box<dyn MethodVisitor + '_>>> {
        Ok(None)
    }

    /// Class-level attribute, carried through unparsed.
    fn visit_attribute(&mut self, _attr: &RawAttribute) -> Result<()> {
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One recorded method event.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodEvent {
    Code { max_stack: u16, max_locals: u16 },
    Attribute(RawAttribute),
    TryCatch(TryCatch),
    Label(Label),
    Frame(Frame),
    LineNumber { line: u16, start: Label },
    Insn(Insn),
    LocalVariable(LocalVariable),
    End,
}

/// Method visitor that keeps every event in order.
#[derive(Debug, Clone, Default)]
pub struct MethodRecorder {
    pub events: Vec<MethodEvent>,
}

impl MethodRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insns(&self) -> impl Iterator<Item = &Insn> {
        self.events.iter().filter_map(|e| match e {
            MethodEvent::Insn(insn) => Some(insn),
            _ => None,
        })
    }

    /// Replay the recorded events into another visitor.
    pub fn replay(&self, target: &mut dyn MethodVisitor) -> Result<()> {
        for event in &self.events {
            match event.clone() {
                MethodEvent::Code {
                    max_stack,
                    max_locals,
                } => target.visit_code(max_stack, max_locals)?,
                MethodEvent::Attribute(a) => target.visit_attribute(a)?,
                MethodEvent::TryCatch(t) => target.visit_try_catch(t)?,
                MethodEvent::Label(l) => target.visit_label(l)?,
                MethodEvent::Frame(f) => target.visit_frame(f)?,
                MethodEvent::LineNumber { line, start } => target.visit_line_number(line, start)?,
                MethodEvent::Insn(i) => target.visit_insn(i)?,
                MethodEvent::LocalVariable(v) => target.visit_local_variable(v)?,
                MethodEvent::End => target.visit_end()?,
            }
        }
        Ok(())
    }
}

impl MethodVisitor for MethodRecorder {
    fn visit_code(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        self.events.push(MethodEvent::Code {
            max_stack,
            max_locals,
        });
        Ok(())
    }

    fn visit_attribute(&mut self, attr: RawAttribute) -> Result<()> {
        self.events.push(MethodEvent::Attribute(attr));
        Ok(())
    }

    fn visit_try_catch(&mut self, block: TryCatch) -> Result<()> {
        self.events.push(MethodEvent::TryCatch(block));
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        self.events.push(MethodEvent::Label(label));
        Ok(())
    }

    fn visit_frame(&mut self, frame: Frame) -> Result<()> {
        self.events.push(MethodEvent::Frame(frame));
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        self.events.push(MethodEvent::LineNumber { line, start });
        Ok(())
    }

    fn visit_insn(&mut self, insn: Insn) -> Result<()> {
        self.events.push(MethodEvent::Insn(insn));
        Ok(())
    }

    fn visit_local_variable(&mut self, var: LocalVariable) -> Result<()> {
        self.events.push(MethodEvent::LocalVariable(var));
        Ok(())
    }

    fn visit_end(&mut self) -> Result<()> {
        self.events.push(MethodEvent::End);
        Ok(())
    }
}
