//! Bounded interpreter for the JVM bytecode subset used by `DigitList`
//! rounding.
//!
//! The harness runs the `shouldRoundUp` body of a class *as loaded* (patched
//! or not) through this interpreter. Coverage is deliberately narrow: `int`
//! and reference values, `char[]`/`int[]` arrays, instance fields, calls
//! within the loaded class, enum constants registered with
//! [`Vm::define_enum`], and `athrow` surfacing as an execution error. Every
//! invocation is bounded by [`VmConfig::step_budget`] so a malformed class
//! cannot hang the caller.

pub mod interp;
pub mod program;
pub mod value;

pub use interp::{ExecMetrics, Vm, VmConfig};
pub use program::Program;
pub use value::{Heap, HeapObject, ObjRef, Value};
