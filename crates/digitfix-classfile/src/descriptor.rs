//! Field and method descriptor parsing.

use std::fmt;

use digitfix_error::{DigitfixError, Result};

use crate::opcodes;

/// One field type from a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    /// Internal class name, e.g. `java/lang/String`.
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Local-variable and operand-stack slots occupied by a value.
    pub const fn slots(&self) -> u16 {
        match self {
            Self::Double | Self::Long => 2,
            _ => 1,
        }
    }

    /// Long-form load opcode for a value of this type.
    pub const fn load_opcode(&self) -> u8 {
        match self {
            Self::Byte | Self::Char | Self::Int | Self::Short | Self::Boolean => opcodes::ILOAD,
            Self::Long => opcodes::LLOAD,
            Self::Float => opcodes::FLOAD,
            Self::Double => opcodes::DLOAD,
            Self::Object(_) | Self::Array(_) => opcodes::ALOAD,
        }
    }

    /// Return opcode for a method returning this type.
    pub const fn return_opcode(&self) -> u8 {
        match self {
            Self::Byte | Self::Char | Self::Int | Self::Short | Self::Boolean => opcodes::IRETURN,
            Self::Long => opcodes::LRETURN,
            Self::Float => opcodes::FRETURN,
            Self::Double => opcodes::DRETURN,
            Self::Object(_) | Self::Array(_) => opcodes::ARETURN,
        }
    }

    pub fn parse(descriptor: &str) -> Result<Self> {
        let (ty, rest) = parse_field_type(descriptor)?;
        if !rest.is_empty() {
            return Err(bad(descriptor, "trailing characters"));
        }
        Ok(ty)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte => f.write_str("B"),
            Self::Char => f.write_str("C"),
            Self::Double => f.write_str("D"),
            Self::Float => f.write_str("F"),
            Self::Int => f.write_str("I"),
            Self::Long => f.write_str("J"),
            Self::Short => f.write_str("S"),
            Self::Boolean => f.write_str("Z"),
            Self::Object(name) => write!(f, "L{name};"),
            Self::Array(inner) => write!(f, "[{inner}"),
        }
    }
}

/// Parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for `void`.
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn parse(descriptor: &str) -> Result<Self> {
        let body = descriptor
            .strip_prefix('(')
            .ok_or_else(|| bad(descriptor, "missing '('"))?;
        let mut rest = body;
        let mut params = Vec::new();
        loop {
            if let Some(after) = rest.strip_prefix(')') {
                rest = after;
                break;
            }
            if rest.is_empty() {
                return Err(bad(descriptor, "missing ')'"));
            }
            let (ty, after) = parse_field_type(rest).map_err(|_| bad(descriptor, "bad parameter"))?;
            params.push(ty);
            rest = after;
        }
        let ret = if rest == "V" {
            None
        } else {
            Some(FieldType::parse(rest).map_err(|_| bad(descriptor, "bad return type"))?)
        };
        Ok(Self { params, ret })
    }

    /// Slots taken by the declared parameters, excluding `this`.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(FieldType::slots).sum()
    }

    pub fn return_opcode(&self) -> u8 {
        self.ret
            .as_ref()
            .map_or(opcodes::RETURN, FieldType::return_opcode)
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for p in &self.params {
            write!(f, "{p}")?;
        }
        f.write_str(")")?;
        match &self.ret {
            Some(ty) => write!(f, "{ty}"),
            None => f.write_str("V"),
        }
    }
}

fn parse_field_type(input: &str) -> Result<(FieldType, &str)> {
    let Some(c) = input.chars().next() else {
        return Err(bad(input, "empty type"));
    };
    let rest = &input[c.len_utf8()..];
    let ty = match c {
        'B' => FieldType::Byte,
        'C' => FieldType::Char,
        'D' => FieldType::Double,
        'F' => FieldType::Float,
        'I' => FieldType::Int,
        'J' => FieldType::Long,
        'S' => FieldType::Short,
        'Z' => FieldType::Boolean,
        'L' => {
            let end = rest
                .find(';')
                .ok_or_else(|| bad(input, "unterminated class type"))?;
            if end == 0 {
                return Err(bad(input, "empty class name"));
            }
            return Ok((FieldType::Object(rest[..end].to_owned()), &rest[end + 1..]));
        }
        '[' => {
            let (inner, after) = parse_field_type(rest)?;
            return Ok((FieldType::Array(Box::new(inner)), after));
        }
        other => return Err(bad(input, &format!("unknown type tag {other:?}"))),
    };
    Ok((ty, rest))
}

fn bad(descriptor: &str, why: &str) -> DigitfixError {
    DigitfixError::malformed(format!("invalid descriptor {descriptor:?}: {why}"))
}

/// Replace every `L<from>;` occurrence in a descriptor or signature.
pub fn remap_descriptor(descriptor: &str, from: &str, to: &str) -> String {
    let needle = format!("L{from};");
    if !descriptor.contains(&needle) {
        return descriptor.to_owned();
    }
    descriptor.replace(&needle, &format!("L{to};"))
}

/// Rename a class operand, which may be a plain internal name or an array
/// descriptor.
pub fn remap_class_operand(name: &str, from: &str, to: &str) -> String {
    if name == from {
        to.to_owned()
    } else if name.starts_with('[') {
        remap_descriptor(name, from, to)
    } else {
        name.to_owned()
    }
}
