//! Decoded method bodies ready for interpretation.

use digitfix_classfile::{ClassReader, Insn, Label, MethodAccess, MethodEvent, MethodRecorder};
use digitfix_error::{DigitfixError, Result};
use hashbrown::HashMap;

/// Instructions of one method with every label resolved to an index.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
    pub max_stack: u16,
    pub max_locals: u16,
    insns: Vec<Insn>,
    labels: HashMap<Label, usize>,
}

impl Program {
    /// Decode `name` / `descriptor` from `reader`.
    ///
    /// Exception tables are refused: the interpreter has no catch support and
    /// silently ignoring a handler would change behaviour.
    pub fn load(reader: &ClassReader<'_>, name: &str, descriptor: &str) -> Result<Self> {
        let access = reader
            .methods()
            .find(|m| m.name == name && m.descriptor == descriptor)
            .map(|m| MethodAccess::from_bits_retain(m.access_flags))
            .ok_or_else(|| {
                DigitfixError::execution(format!(
                    "no method {}.{name}{descriptor}",
                    reader.name()
                ))
            })?;
        let mut recorder = MethodRecorder::new();
        reader.decode_method(name, descriptor, &mut recorder)?;
        Self::from_events(name, descriptor, access.contains(MethodAccess::STATIC), &recorder)
    }

    pub fn from_events(
        name: &str,
        descriptor: &str,
        is_static: bool,
        recorder: &MethodRecorder,
    ) -> Result<Self> {
        let mut code = None;
        let mut insns = Vec::new();
        let mut labels = HashMap::new();
        for event in &recorder.events {
            match event {
                MethodEvent::Code {
                    max_stack,
                    max_locals,
                } => code = Some((*max_stack, *max_locals)),
                MethodEvent::Label(label) => {
                    labels.insert(*label, insns.len());
                }
                MethodEvent::Insn(insn) => insns.push(insn.clone()),
                MethodEvent::TryCatch(_) => {
                    return Err(DigitfixError::unsupported(format!(
                        "exception handlers in {name}{descriptor}"
                    )));
                }
                _ => {}
            }
        }
        let (max_stack, max_locals) = code.ok_or_else(|| {
            DigitfixError::unsupported(format!("{name}{descriptor} has no code"))
        })?;
        let program = Self {
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            is_static,
            max_stack,
            max_locals,
            insns,
            labels,
        };
        program.check_targets()?;
        Ok(program)
    }

    fn check_targets(&self) -> Result<()> {
        for insn in &self.insns {
            for target in insn.targets() {
                self.target(target)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.insns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insns.is_empty()
    }

    pub fn insn(&self, index: usize) -> Option<&Insn> {
        self.insns.get(index)
    }

    pub fn target(&self, label: Label) -> Result<usize> {
        self.labels.get(&label).copied().ok_or_else(|| {
            DigitfixError::malformed(format!(
                "{}{} branches to unbound {label}",
                self.name, self.descriptor
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use digitfix_classfile::opcodes::{GOTO, ICONST_1, IRETURN};

    fn recorder(events: Vec<MethodEvent>) -> MethodRecorder {
        MethodRecorder { events }
    }

    #[test]
    fn test_labels_resolve_to_following_insn() {
        let l = Label::at_offset(1);
        let rec = recorder(vec![
            MethodEvent::Code {
                max_stack: 1,
                max_locals: 1,
            },
            MethodEvent::Insn(Insn::jump(GOTO, l)),
            MethodEvent::Label(l),
            MethodEvent::Insn(Insn::simple(ICONST_1)),
            MethodEvent::Insn(Insn::simple(IRETURN)),
            MethodEvent::End,
        ]);
        let program = Program::from_events("m", "()I", false, &rec).expect("program");
        assert_eq!(program.len(), 3);
        assert_eq!(program.target(l).expect("bound"), 1);
        assert_eq!(program.max_stack, 1);
    }

    #[test]
    fn test_unbound_branch_is_malformed() {
        let rec = recorder(vec![
            MethodEvent::Code {
                max_stack: 1,
                max_locals: 1,
            },
            MethodEvent::Insn(Insn::jump(GOTO, Label::at_offset(9))),
        ]);
        let err = Program::from_events("m", "()V", false, &rec).expect_err("unbound");
        assert!(err.to_string().contains("unbound"));
    }

    #[test]
    fn test_method_without_code() {
        let rec = recorder(vec![MethodEvent::End]);
        let err = Program::from_events("m", "()V", false, &rec).expect_err("no code");
        assert!(matches!(err, DigitfixError::Unsupported { .. }));
    }
}
