//! Binary container model for JVM class files.
//!
//! This crate covers exactly what the digitfix patcher and its harness
//! consume: a constant pool that can be grown without disturbing existing
//! indices, a reader that drives visitor callbacks, and a writer that copies
//! untouched members verbatim while laying out rewritten ones with
//! label-resolved branch offsets and re-encoded stack map frames.
//!
//! It is not a general bytecode framework. Method bodies that carry code
//! attributes other than line numbers, local variable tables and stack maps
//! are refused when they would need rewriting.

pub mod access;
pub mod bytes;
pub mod descriptor;
pub mod insn;
pub mod opcodes;
pub mod pool;
pub mod reader;
pub mod visitor;
pub mod writer;

pub use access::{ClassAccess, FieldAccess, MethodAccess};
pub use descriptor::{FieldType, MethodDescriptor, remap_class_operand, remap_descriptor};
pub use insn::{
    Constant, Frame, Insn, Label, LocalTable, LocalVariable, Locals, RawAttribute, Stack, TryCatch,
    VType,
};
pub use pool::{ConstantPool, CpEntry, MemberKind, MemberRef, PoolBuilder};
pub use reader::ClassReader;
pub use visitor::{ClassHeader, ClassVisitor, Member, MethodEvent, MethodRecorder, MethodVisitor};
pub use writer::{ClassWriter, EmittedMethod, MethodWriter};
