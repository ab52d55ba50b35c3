//! Instruction injector.
//!
//! At the redirected case the method forwards its own arguments to the
//! replacement method and returns its result:
//!
//! ```text
//! aload_0
//! iload_1; iload_2; iload_3      // one typed load per declared parameter
//! invokevirtual <target>.<replacement>(IZZ)Z
//! ireturn
//! ```
//!
//! The original case body stays in place behind the return.

use digitfix_classfile::{Insn, MethodAccess, MethodDescriptor, opcodes};
use digitfix_error::{DigitfixError, Result};
use smallvec::SmallVec;

/// Call emitted at the injection point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionPlan {
    owner: String,
    name: String,
    descriptor: String,
    signature: MethodDescriptor,
}

impl InjectionPlan {
    /// Plan a call from a method with `access` and `descriptor` to a
    /// replacement of the same shape on `owner`.
    pub fn new(owner: &str, name: &str, access: MethodAccess, descriptor: &str) -> Result<Self> {
        if access.contains(MethodAccess::STATIC) {
            return Err(DigitfixError::violation(format!(
                "target method {descriptor} is static; no receiver to forward"
            )));
        }
        let signature = MethodDescriptor::parse(descriptor)?;
        if signature.ret.is_none() {
            return Err(DigitfixError::violation(format!(
                "target method {descriptor} returns void"
            )));
        }
        Ok(Self {
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            signature,
        })
    }

    /// Operand stack depth the forwarded call needs.
    pub fn required_stack(&self) -> u16 {
        1 + self.signature.param_slots()
    }

    pub fn insns(&self) -> SmallVec<[Insn; 8]> {
        let mut out = SmallVec::new();
        out.push(Insn::var(opcodes::ALOAD, 0));
        let mut slot = 1;
        for param in &self.signature.params {
            out.push(Insn::var(param.load_opcode(), slot));
            slot += param.slots();
        }
        out.push(Insn::method(
            opcodes::INVOKEVIRTUAL,
            &self.owner,
            &self.name,
            &self.descriptor,
        ));
        out.push(Insn::simple(self.signature.return_opcode()));
        out
    }
}
