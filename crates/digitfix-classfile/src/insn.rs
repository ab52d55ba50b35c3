//! Symbolic instruction stream.
//!
//! Instructions reference other code positions through [`Label`]s, never raw
//! offsets. A label is an identity while a method is being built; its byte
//! offset only exists once the writer has finalized the method.

use std::fmt;

use smallvec::SmallVec;

use crate::opcodes;

/// Identity of a code position.
///
/// Labels produced by the reader use the original bytecode offset as their
/// id. Labels allocated while assembling new code carry the high bit so the
/// two spaces never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

impl Label {
    const SYNTHETIC: u32 = 1 << 31;

    pub const fn at_offset(offset: u32) -> Self {
        Self(offset & !Self::SYNTHETIC)
    }

    pub const fn synthetic(seq: u32) -> Self {
        Self(seq | Self::SYNTHETIC)
    }

    pub const fn id(self) -> u32 {
        self.0
    }

    pub const fn is_synthetic(self) -> bool {
        self.0 & Self::SYNTHETIC != 0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_synthetic() {
            write!(f, "L#{}", self.0 & !Self::SYNTHETIC)
        } else {
            write!(f, "L@{}", self.0)
        }
    }
}

/// Operand of `ldc`, `ldc_w` and `ldc2_w`.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    /// Class literal by internal name.
    Class(String),
    /// Method handle, method type or dynamic constant left as a pool index.
    Pooled(u16),
}

impl Constant {
    pub const fn is_wide(&self) -> bool {
        matches!(self, Self::Long(_) | Self::Double(_))
    }
}

/// One instruction with symbolic operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Insn {
    /// Instruction without operands (`iconst_0`, `caload`, `ireturn`, ...).
    Simple(u8),
    /// `bipush`, `sipush` or `newarray`.
    Int { opcode: u8, operand: i32 },
    /// Local-variable access in long form (`iload`, `astore`, `ret`).
    /// The writer picks the short or `wide` encoding.
    Var { opcode: u8, index: u16 },
    Iinc { index: u16, delta: i16 },
    /// `new`, `anewarray`, `checkcast` or `instanceof`.
    Type { opcode: u8, class: String },
    Field {
        opcode: u8,
        owner: String,
        name: String,
        descriptor: String,
    },
    Method {
        opcode: u8,
        owner: String,
        name: String,
        descriptor: String,
        interface: bool,
    },
    /// `invokedynamic`; the call site index is only valid in its own pool.
    InvokeDynamic { pool_index: u16 },
    Ldc(Constant),
    Jump { opcode: u8, target: Label },
    TableSwitch {
        low: i32,
        high: i32,
        default: Label,
        targets: Vec<Label>,
    },
    LookupSwitch {
        default: Label,
        pairs: Vec<(i32, Label)>,
    },
    MultiANewArray { class: String, dimensions: u8 },
}

impl Insn {
    pub const fn simple(opcode: u8) -> Self {
        Self::Simple(opcode)
    }

    pub const fn var(opcode: u8, index: u16) -> Self {
        Self::Var { opcode, index }
    }

    pub const fn jump(opcode: u8, target: Label) -> Self {
        Self::Jump { opcode, target }
    }

    pub fn push_int(value: i32) -> Self {
        match value {
            -1..=5 => Self::Simple((opcodes::ICONST_0 as i32 + value) as u8),
            -128..=127 => Self::Int {
                opcode: opcodes::BIPUSH,
                operand: value,
            },
            -32768..=32767 => Self::Int {
                opcode: opcodes::SIPUSH,
                operand: value,
            },
            _ => Self::Ldc(Constant::Integer(value)),
        }
    }

    pub fn field(opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        Self::Field {
            opcode,
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
    }

    pub fn method(opcode: u8, owner: &str, name: &str, descriptor: &str) -> Self {
        Self::Method {
            opcode,
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            interface: opcode == opcodes::INVOKEINTERFACE,
        }
    }

    pub fn type_insn(opcode: u8, class: &str) -> Self {
        Self::Type {
            opcode,
            class: class.to_owned(),
        }
    }

    /// The primary opcode (long form for `Var`).
    pub const fn opcode(&self) -> u8 {
        match self {
            Self::Simple(op)
            | Self::Int { opcode: op, .. }
            | Self::Var { opcode: op, .. }
            | Self::Type { opcode: op, .. }
            | Self::Field { opcode: op, .. }
            | Self::Method { opcode: op, .. }
            | Self::Jump { opcode: op, .. } => *op,
            Self::Iinc { .. } => opcodes::IINC,
            Self::InvokeDynamic { .. } => opcodes::INVOKEDYNAMIC,
            Self::Ldc(c) => {
                if c.is_wide() {
                    opcodes::LDC2_W
                } else {
                    opcodes::LDC
                }
            }
            Self::TableSwitch { .. } => opcodes::TABLESWITCH,
            Self::LookupSwitch { .. } => opcodes::LOOKUPSWITCH,
            Self::MultiANewArray { .. } => opcodes::MULTIANEWARRAY,
        }
    }

    /// Every label this instruction branches to.
    pub fn targets(&self) -> SmallVec<[Label; 2]> {
        match self {
            Self::Jump { target, .. } => SmallVec::from_slice(&[*target]),
            Self::TableSwitch {
                default, targets, ..
            } => {
                let mut out = SmallVec::from_slice(&[*default]);
                out.extend(targets.iter().copied());
                out
            }
            Self::LookupSwitch { default, pairs } => {
                let mut out = SmallVec::from_slice(&[*default]);
                out.extend(pairs.iter().map(|(_, l)| *l));
                out
            }
            _ => SmallVec::new(),
        }
    }
}

/// Verification type of a local or stack slot in a stack map frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Internal class name or array descriptor.
    Object(String),
    /// Result of the `new` instruction at the given label.
    Uninitialized(Label),
}

impl VType {
    pub fn object(name: &str) -> Self {
        Self::Object(name.to_owned())
    }
}

/// Locals list of a frame; the digit-list methods never need more inline.
pub type Locals = SmallVec<[VType; 8]>;
pub type Stack = SmallVec<[VType; 4]>;

/// Stack map frame anchored at the position where it is visited.
///
/// Compressed forms describe a change relative to the previous frame; the
/// writer recomputes offset deltas and picks the encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Same,
    SameLocals1(VType),
    /// Drop the last 1 to 3 locals.
    Chop(u8),
    /// Add 1 to 3 locals.
    Append(SmallVec<[VType; 3]>),
    Full { locals: Locals, stack: Stack },
}

/// Exception table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryCatch {
    pub start: Label,
    pub end: Label,
    pub handler: Label,
    /// `None` catches everything (`finally`).
    pub catch_type: Option<String>,
}

/// Which debug table a local variable entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalTable {
    /// `LocalVariableTable` (descriptor).
    Descriptor,
    /// `LocalVariableTypeTable` (generic signature).
    Signature,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub name: String,
    pub descriptor: String,
    pub start: Label,
    pub end: Label,
    pub index: u16,
    pub table: LocalTable,
}

/// Attribute carried through unparsed. Its bytes may hold pool indices, so it
/// is only valid in the pool it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAttribute {
    pub name: String,
    pub info: Vec<u8>,
}
