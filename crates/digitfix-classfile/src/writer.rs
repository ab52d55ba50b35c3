//! Class file writer.
//!
//! A [`ClassWriter`] seeded from a reader keeps the reader's constant pool
//! byte-for-byte, so members it is not asked to rewrite are copied verbatim.
//! Rewritten or new methods go through a [`MethodWriter`], which records the
//! symbolic stream and only lays out bytes in [`ClassWriter::commit`]. Label
//! offsets are known after that point and are reported through
//! [`EmittedMethod`].

use digitfix_error::{DigitfixError, Result};
use hashbrown::HashMap;
use tracing::trace;

use crate::access::{FieldAccess, MethodAccess};
use crate::bytes::{count_u2, len_u4, put_i4, put_u1, put_u2, put_u4, write_i2_at, write_i4_at};
use crate::descriptor::MethodDescriptor;
use crate::insn::{Frame, Insn, Label, LocalTable, LocalVariable, RawAttribute, TryCatch, VType};
use crate::opcodes;
use crate::pool::PoolBuilder;
use crate::reader::{ClassReader, MAGIC, switch_padding};
use crate::visitor::{ClassHeader, ClassVisitor, Member, MethodVisitor};

/// Largest code array the JVM accepts.
pub const MAX_CODE_LENGTH: usize = 65535;

#[derive(Debug, Clone, PartialEq)]
enum Item {
    Label(Label),
    Frame(Frame),
    Insn(Insn),
}

/// Records one method body for later layout.
#[derive(Debug, Clone)]
pub struct MethodWriter {
    access: MethodAccess,
    name: String,
    descriptor: String,
    code: Option<(u16, u16)>,
    items: Vec<Item>,
    lines: Vec<(u16, Label)>,
    try_catches: Vec<TryCatch>,
    locals: Vec<LocalVariable>,
    attributes: Vec<RawAttribute>,
    next_label: u32,
}

impl MethodWriter {
    pub fn new(access: MethodAccess, name: &str, descriptor: &str) -> Self {
        Self {
            access,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            code: None,
            items: Vec::new(),
            lines: Vec::new(),
            try_catches: Vec::new(),
            locals: Vec::new(),
            attributes: Vec::new(),
            next_label: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Fresh label that cannot collide with labels read from a class file.
    pub fn new_label(&mut self) -> Label {
        let label = Label::synthetic(self.next_label);
        self.next_label += 1;
        label
    }

    /// Convenience for assembling code by hand.
    pub fn emit(&mut self, insn: Insn) {
        self.items.push(Item::Insn(insn));
    }

    pub fn bind(&mut self, label: Label) {
        self.items.push(Item::Label(label));
    }

    pub fn frame(&mut self, frame: Frame) {
        self.items.push(Item::Frame(frame));
    }

    fn finish(self, pool: &mut PoolBuilder) -> Result<(Vec<u8>, EmittedMethod)> {
        let name_index = pool.utf8(&self.name)?;
        let descriptor_index = pool.utf8(&self.descriptor)?;
        let mut attributes: Vec<Vec<u8>> = Vec::new();
        let mut label_offsets = HashMap::new();
        let mut code_length = 0;

        if let Some((max_stack, max_locals)) = self.code {
            let mut layout = Layout::default();
            for item in &self.items {
                match item {
                    Item::Label(label) => {
                        let pc = layout.pc()?;
                        if layout.labels.insert(*label, pc).is_some() {
                            return Err(DigitfixError::internal(format!(
                                "label {label} bound twice in {}",
                                self.name
                            )));
                        }
                    }
                    Item::Frame(frame) => {
                        let pc = layout.pc()?;
                        if layout.frames.last().is_some_and(|(prev, _)| *prev == pc) {
                            return Err(DigitfixError::internal(format!(
                                "two stack map frames at offset {pc} in {}",
                                self.name
                            )));
                        }
                        layout.frames.push((pc, frame.clone()));
                    }
                    Item::Insn(insn) => layout.encode(insn, pool)?,
                }
            }
            layout.resolve_fixups()?;
            code_length = layout.pc()?;
            if code_length == 0 {
                return Err(DigitfixError::internal(format!(
                    "method {} has empty code",
                    self.name
                )));
            }
            attributes.push(self.code_attribute(pool, &layout, max_stack, max_locals)?);
            label_offsets = layout.labels;
        }

        if !self.attributes.is_empty() && pool.origin().is_none() {
            return Err(DigitfixError::unsupported(format!(
                "raw attributes on {} have no source pool",
                self.name
            )));
        }
        for attr in &self.attributes {
            attributes.push(raw_attribute(pool, attr)?);
        }

        let mut out = Vec::new();
        put_u2(&mut out, self.access.bits());
        put_u2(&mut out, name_index);
        put_u2(&mut out, descriptor_index);
        put_u2(&mut out, count_u2(attributes.len(), "method attributes")?);
        for attr in attributes {
            out.extend_from_slice(&attr);
        }
        trace!(method = %self.name, code_length, "laid out method");
        Ok((
            out,
            EmittedMethod {
                name: self.name,
                descriptor: self.descriptor,
                code_length,
                label_offsets,
            },
        ))
    }

    fn code_attribute(
        &self,
        pool: &mut PoolBuilder,
        layout: &Layout,
        max_stack: u16,
        max_locals: u16,
    ) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        put_u2(&mut body, max_stack);
        put_u2(&mut body, max_locals);
        put_u4(&mut body, len_u4(layout.code.len(), "code")?);
        body.extend_from_slice(&layout.code);

        put_u2(&mut body, count_u2(self.try_catches.len(), "exception handlers")?);
        for block in &self.try_catches {
            put_u2(&mut body, layout.offset_u2(block.start)?);
            put_u2(&mut body, layout.offset_u2(block.end)?);
            put_u2(&mut body, layout.offset_u2(block.handler)?);
            let catch_type = match &block.catch_type {
                Some(name) => pool.class(name)?,
                None => 0,
            };
            put_u2(&mut body, catch_type);
        }

        let mut code_attrs: Vec<Vec<u8>> = Vec::new();
        if !self.lines.is_empty() {
            let mut info = Vec::new();
            put_u2(&mut info, count_u2(self.lines.len(), "line numbers")?);
            for (line, start) in &self.lines {
                put_u2(&mut info, layout.offset_u2(*start)?);
                put_u2(&mut info, *line);
            }
            code_attrs.push(named_attribute(pool, "LineNumberTable", &info)?);
        }
        for (table, attr_name) in [
            (LocalTable::Descriptor, "LocalVariableTable"),
            (LocalTable::Signature, "LocalVariableTypeTable"),
        ] {
            let vars: Vec<&LocalVariable> =
                self.locals.iter().filter(|v| v.table == table).collect();
            if vars.is_empty() {
                continue;
            }
            let mut info = Vec::new();
            put_u2(&mut info, count_u2(vars.len(), "local variables")?);
            for var in vars {
                let start = layout.offset_u2(var.start)?;
                let end = layout.offset_u2(var.end)?;
                let length = end.checked_sub(start).ok_or_else(|| {
                    DigitfixError::internal(format!("local {} ends before it starts", var.name))
                })?;
                put_u2(&mut info, start);
                put_u2(&mut info, length);
                put_u2(&mut info, pool.utf8(&var.name)?);
                put_u2(&mut info, pool.utf8(&var.descriptor)?);
                put_u2(&mut info, var.index);
            }
            code_attrs.push(named_attribute(pool, attr_name, &info)?);
        }
        if !layout.frames.is_empty() {
            let info = layout.stack_map(pool)?;
            code_attrs.push(named_attribute(pool, "StackMapTable", &info)?);
        }

        put_u2(&mut body, count_u2(code_attrs.len(), "code attributes")?);
        for attr in code_attrs {
            body.extend_from_slice(&attr);
        }
        named_attribute(pool, "Code", &body)
    }
}

impl MethodVisitor for MethodWriter {
    fn visit_code(&mut self, max_stack: u16, max_locals: u16) -> Result<()> {
        self.code = Some((max_stack, max_locals));
        Ok(())
    }

    fn visit_attribute(&mut self, attr: RawAttribute) -> Result<()> {
        self.attributes.push(attr);
        Ok(())
    }

    fn visit_try_catch(&mut self, block: TryCatch) -> Result<()> {
        self.try_catches.push(block);
        Ok(())
    }

    fn visit_label(&mut self, label: Label) -> Result<()> {
        self.bind(label);
        Ok(())
    }

    fn visit_frame(&mut self, frame: Frame) -> Result<()> {
        self.frame(frame);
        Ok(())
    }

    fn visit_line_number(&mut self, line: u16, start: Label) -> Result<()> {
        self.lines.push((line, start));
        Ok(())
    }

    fn visit_insn(&mut self, insn: Insn) -> Result<()> {
        self.emit(insn);
        Ok(())
    }

    fn visit_local_variable(&mut self, var: LocalVariable) -> Result<()> {
        self.locals.push(var);
        Ok(())
    }
}

/// Layout facts of a committed method.
#[derive(Debug, Clone)]
pub struct EmittedMethod {
    pub name: String,
    pub descriptor: String,
    pub code_length: u32,
    label_offsets: HashMap<Label, u32>,
}

impl EmittedMethod {
    /// Resolved byte offset of a label bound in this method.
    pub fn label_offset(&self, label: Label) -> Option<u32> {
        self.label_offsets.get(&label).copied()
    }
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    insn_pc: u32,
    at: usize,
    wide: bool,
    target: Label,
}

#[derive(Debug, Default)]
struct Layout {
    code: Vec<u8>,
    labels: HashMap<Label, u32>,
    frames: Vec<(u32, Frame)>,
    fixups: Vec<Fixup>,
}

impl Layout {
    fn pc(&self) -> Result<u32> {
        if self.code.len() > MAX_CODE_LENGTH {
            return Err(DigitfixError::unsupported(format!(
                "method code exceeds {MAX_CODE_LENGTH} bytes"
            )));
        }
        Ok(self.code.len() as u32)
    }

    fn offset(&self, label: Label) -> Result<u32> {
        self.labels
            .get(&label)
            .copied()
            .ok_or_else(|| DigitfixError::internal(format!("unbound label {label}")))
    }

    fn offset_u2(&self, label: Label) -> Result<u16> {
        Ok(self.offset(label)? as u16)
    }

    fn fixup(&mut self, insn_pc: u32, wide: bool, target: Label) {
        let at = self.code.len();
        self.fixups.push(Fixup {
            insn_pc,
            at,
            wide,
            target,
        });
        if wide {
            put_i4(&mut self.code, 0);
        } else {
            put_u2(&mut self.code, 0);
        }
    }

    fn encode(&mut self, insn: &Insn, pool: &mut PoolBuilder) -> Result<()> {
        let pc = self.pc()?;
        let code = &mut self.code;
        match insn {
            Insn::Simple(op) => put_u1(code, *op),
            Insn::Int { opcode, operand } => {
                put_u1(code, *opcode);
                match *opcode {
                    opcodes::BIPUSH => {
                        let v = i8::try_from(*operand).map_err(|_| operand_range("bipush", *operand))?;
                        put_u1(code, v as u8);
                    }
                    opcodes::SIPUSH => {
                        let v = i16::try_from(*operand).map_err(|_| operand_range("sipush", *operand))?;
                        put_u2(code, v as u16);
                    }
                    opcodes::NEWARRAY => {
                        let v = u8::try_from(*operand).map_err(|_| operand_range("newarray", *operand))?;
                        put_u1(code, v);
                    }
                    other => {
                        return Err(DigitfixError::internal(format!(
                            "opcode {other:#04x} is not an int-operand instruction"
                        )));
                    }
                }
            }
            Insn::Var { opcode, index } => encode_var(code, *opcode, *index)?,
            Insn::Iinc { index, delta } => {
                if let (Ok(index), Ok(delta)) = (u8::try_from(*index), i8::try_from(*delta)) {
                    put_u1(code, opcodes::IINC);
                    put_u1(code, index);
                    put_u1(code, delta as u8);
                } else {
                    put_u1(code, opcodes::WIDE);
                    put_u1(code, opcodes::IINC);
                    put_u2(code, *index);
                    put_u2(code, *delta as u16);
                }
            }
            Insn::Type { opcode, class } => {
                let idx = pool.class(class)?;
                put_u1(code, *opcode);
                put_u2(code, idx);
            }
            Insn::Field {
                opcode,
                owner,
                name,
                descriptor,
            } => {
                let idx = pool.field_ref(owner, name, descriptor)?;
                put_u1(code, *opcode);
                put_u2(code, idx);
            }
            Insn::Method {
                opcode,
                owner,
                name,
                descriptor,
                interface,
            } => {
                let idx = pool.method_ref(owner, name, descriptor, *interface)?;
                put_u1(code, *opcode);
                put_u2(code, idx);
                if *opcode == opcodes::INVOKEINTERFACE {
                    let slots = MethodDescriptor::parse(descriptor)?.param_slots() + 1;
                    put_u1(code, slots as u8);
                    put_u1(code, 0);
                }
            }
            Insn::InvokeDynamic { pool_index } => {
                if pool.origin().is_none() || *pool_index >= pool.count() {
                    return Err(DigitfixError::unsupported(
                        "invokedynamic call site outside its class",
                    ));
                }
                put_u1(code, opcodes::INVOKEDYNAMIC);
                put_u2(code, *pool_index);
                put_u2(code, 0);
            }
            Insn::Ldc(constant) => {
                let idx = pool.constant(constant)?;
                if constant.is_wide() {
                    put_u1(code, opcodes::LDC2_W);
                    put_u2(code, idx);
                } else if let Ok(short) = u8::try_from(idx) {
                    put_u1(code, opcodes::LDC);
                    put_u1(code, short);
                } else {
                    put_u1(code, opcodes::LDC_W);
                    put_u2(code, idx);
                }
            }
            Insn::Jump { opcode, target } => {
                let wide = matches!(*opcode, opcodes::GOTO_W | opcodes::JSR_W);
                put_u1(code, *opcode);
                self.fixup(pc, wide, *target);
            }
            Insn::TableSwitch {
                low,
                high,
                default,
                targets,
            } => {
                let expected = i64::from(*high) - i64::from(*low) + 1;
                if expected != targets.len() as i64 {
                    return Err(DigitfixError::internal(format!(
                        "tableswitch {low}..={high} with {} targets",
                        targets.len()
                    )));
                }
                put_u1(code, opcodes::TABLESWITCH);
                code.resize(code.len() + switch_padding(pc), 0);
                self.fixup(pc, true, *default);
                put_i4(&mut self.code, *low);
                put_i4(&mut self.code, *high);
                for target in targets {
                    self.fixup(pc, true, *target);
                }
            }
            Insn::LookupSwitch { default, pairs } => {
                put_u1(code, opcodes::LOOKUPSWITCH);
                code.resize(code.len() + switch_padding(pc), 0);
                self.fixup(pc, true, *default);
                put_i4(&mut self.code, pairs.len() as i32);
                for (key, target) in pairs {
                    put_i4(&mut self.code, *key);
                    self.fixup(pc, true, *target);
                }
            }
            Insn::MultiANewArray { class, dimensions } => {
                let idx = pool.class(class)?;
                put_u1(code, opcodes::MULTIANEWARRAY);
                put_u2(code, idx);
                put_u1(code, *dimensions);
            }
        }
        Ok(())
    }

    fn resolve_fixups(&mut self) -> Result<()> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self.offset(fixup.target)?;
            let rel = i64::from(target) - i64::from(fixup.insn_pc);
            if fixup.wide {
                write_i4_at(&mut self.code, fixup.at, rel as i32);
            } else {
                let short = i16::try_from(rel).map_err(|_| {
                    DigitfixError::unsupported(format!(
                        "branch at {} spans {rel} bytes",
                        fixup.insn_pc
                    ))
                })?;
                write_i2_at(&mut self.code, fixup.at, short);
            }
        }
        Ok(())
    }

    fn stack_map(&self, pool: &mut PoolBuilder) -> Result<Vec<u8>> {
        let mut info = Vec::new();
        put_u2(&mut info, count_u2(self.frames.len(), "stack map frames")?);
        let mut prev: Option<u32> = None;
        for (pc, frame) in &self.frames {
            let delta = match prev {
                None => *pc,
                Some(p) if *pc > p => pc - p - 1,
                Some(p) => {
                    return Err(DigitfixError::internal(format!(
                        "stack map frame at {pc} does not follow frame at {p}"
                    )));
                }
            };
            prev = Some(*pc);
            let delta16 = u16::try_from(delta)
                .map_err(|_| DigitfixError::unsupported("stack map delta exceeds u2"))?;
            match frame {
                Frame::Same if delta <= 63 => put_u1(&mut info, delta as u8),
                Frame::Same => {
                    put_u1(&mut info, 251);
                    put_u2(&mut info, delta16);
                }
                Frame::SameLocals1(ty) => {
                    if delta <= 63 {
                        put_u1(&mut info, 64 + delta as u8);
                    } else {
                        put_u1(&mut info, 247);
                        put_u2(&mut info, delta16);
                    }
                    self.vtype(&mut info, ty, pool)?;
                }
                Frame::Chop(k) => {
                    if !(1..=3).contains(k) {
                        return Err(DigitfixError::internal(format!("chop frame of {k} locals")));
                    }
                    put_u1(&mut info, 251 - k);
                    put_u2(&mut info, delta16);
                }
                Frame::Append(added) => {
                    if !(1..=3).contains(&added.len()) {
                        return Err(DigitfixError::internal(format!(
                            "append frame of {} locals",
                            added.len()
                        )));
                    }
                    put_u1(&mut info, 251 + added.len() as u8);
                    put_u2(&mut info, delta16);
                    for ty in added {
                        self.vtype(&mut info, ty, pool)?;
                    }
                }
                Frame::Full { locals, stack } => {
                    put_u1(&mut info, 255);
                    put_u2(&mut info, delta16);
                    put_u2(&mut info, count_u2(locals.len(), "frame locals")?);
                    for ty in locals {
                        self.vtype(&mut info, ty, pool)?;
                    }
                    put_u2(&mut info, count_u2(stack.len(), "frame stack")?);
                    for ty in stack {
                        self.vtype(&mut info, ty, pool)?;
                    }
                }
            }
        }
        Ok(info)
    }

    fn vtype(&self, out: &mut Vec<u8>, ty: &VType, pool: &mut PoolBuilder) -> Result<()> {
        match ty {
            VType::Top => put_u1(out, 0),
            VType::Integer => put_u1(out, 1),
            VType::Float => put_u1(out, 2),
            VType::Double => put_u1(out, 3),
            VType::Long => put_u1(out, 4),
            VType::Null => put_u1(out, 5),
            VType::UninitializedThis => put_u1(out, 6),
            VType::Object(name) => {
                put_u1(out, 7);
                put_u2(out, pool.class(name)?);
            }
            VType::Uninitialized(label) => {
                put_u1(out, 8);
                put_u2(out, self.offset_u2(*label)?);
            }
        }
        Ok(())
    }
}

fn operand_range(what: &str, value: i32) -> DigitfixError {
    DigitfixError::internal(format!("{what} operand {value} out of range"))
}

fn encode_var(code: &mut Vec<u8>, opcode: u8, index: u16) -> Result<()> {
    let short_base = match opcode {
        opcodes::ILOAD..=opcodes::ALOAD => Some(opcodes::ILOAD_0 + (opcode - opcodes::ILOAD) * 4),
        opcodes::ISTORE..=opcodes::ASTORE => {
            Some(opcodes::ISTORE_0 + (opcode - opcodes::ISTORE) * 4)
        }
        opcodes::RET => None,
        other => {
            return Err(DigitfixError::internal(format!(
                "opcode {other:#04x} is not a local-variable instruction"
            )));
        }
    };
    match (short_base, u8::try_from(index)) {
        (Some(base), _) if index <= 3 => put_u1(code, base + index as u8),
        (_, Ok(narrow)) => {
            put_u1(code, opcode);
            put_u1(code, narrow);
        }
        (_, Err(_)) => {
            put_u1(code, opcodes::WIDE);
            put_u1(code, opcode);
            put_u2(code, index);
        }
    }
    Ok(())
}

fn named_attribute(pool: &mut PoolBuilder, name: &str, info: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(info.len() + 6);
    put_u2(&mut out, pool.utf8(name)?);
    put_u4(&mut out, len_u4(info.len(), name)?);
    out.extend_from_slice(info);
    Ok(out)
}

fn raw_attribute(pool: &mut PoolBuilder, attr: &RawAttribute) -> Result<Vec<u8>> {
    named_attribute(pool, &attr.name, &attr.info)
}

/// Assembles a class file.
#[derive(Debug, Clone)]
pub struct ClassWriter {
    header: ClassHeader,
    pool: PoolBuilder,
    fields: Vec<Vec<u8>>,
    field_keys: Vec<(String, String)>,
    methods: Vec<Vec<u8>>,
    method_keys: Vec<(String, String)>,
    attributes: Vec<RawAttribute>,
}

impl ClassWriter {
    /// Writer for a class built from scratch.
    pub fn new(header: ClassHeader) -> Self {
        Self {
            header,
            pool: PoolBuilder::new(),
            fields: Vec::new(),
            field_keys: Vec::new(),
            methods: Vec::new(),
            method_keys: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Writer that shares `reader`'s constant pool, so members can be copied
    /// without decoding. Members arrive through [`ClassVisitor`] events.
    pub fn from_reader(reader: &ClassReader<'_>) -> Self {
        Self {
            header: reader.header().clone(),
            pool: PoolBuilder::from_pool(reader.pool()),
            fields: Vec::new(),
            field_keys: Vec::new(),
            methods: Vec::new(),
            method_keys: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub const fn header(&self) -> &ClassHeader {
        &self.header
    }

    pub fn pool_mut(&mut self) -> &mut PoolBuilder {
        &mut self.pool
    }

    pub fn has_method(&self, name: &str, descriptor: &str) -> bool {
        self.method_keys
            .iter()
            .any(|(n, d)| n == name && d == descriptor)
    }

    pub fn has_field(&self, name: &str, descriptor: &str) -> bool {
        self.field_keys
            .iter()
            .any(|(n, d)| n == name && d == descriptor)
    }

    fn check_origin(&self, member: &Member<'_>) -> Result<()> {
        if self.pool.origin() == Some(member.pool_fingerprint) {
            Ok(())
        } else {
            Err(DigitfixError::internal(format!(
                "cannot copy {}{} from a different constant pool",
                member.name, member.descriptor
            )))
        }
    }

    pub fn copy_field(&mut self, field: &Member<'_>) -> Result<()> {
        self.check_origin(field)?;
        self.fields.push(field.raw.to_vec());
        self.field_keys
            .push((field.name.to_owned(), field.descriptor.to_owned()));
        Ok(())
    }

    pub fn copy_method(&mut self, method: &Member<'_>) -> Result<()> {
        self.check_origin(method)?;
        self.push_method_key(method.name, method.descriptor)?;
        self.methods.push(method.raw.to_vec());
        Ok(())
    }

    fn push_method_key(&mut self, name: &str, descriptor: &str) -> Result<()> {
        if self.has_method(name, descriptor) {
            return Err(DigitfixError::internal(format!(
                "method {name}{descriptor} written twice"
            )));
        }
        self.method_keys
            .push((name.to_owned(), descriptor.to_owned()));
        Ok(())
    }

    pub fn add_field(&mut self, access: FieldAccess, name: &str, descriptor: &str) -> Result<()> {
        if self.has_field(name, descriptor) {
            return Err(DigitfixError::internal(format!("field {name} written twice")));
        }
        let mut out = Vec::new();
        put_u2(&mut out, access.bits());
        put_u2(&mut out, self.pool.utf8(name)?);
        put_u2(&mut out, self.pool.utf8(descriptor)?);
        put_u2(&mut out, 0);
        self.fields.push(out);
        self.field_keys.push((name.to_owned(), descriptor.to_owned()));
        Ok(())
    }

    pub fn begin_method(&self, access: MethodAccess, name: &str, descriptor: &str) -> MethodWriter {
        MethodWriter::new(access, name, descriptor)
    }

    /// Lay out `method` and append it to the class.
    pub fn commit(&mut self, method: MethodWriter) -> Result<EmittedMethod> {
        self.push_method_key(&method.name, &method.descriptor)?;
        let (bytes, emitted) = method.finish(&mut self.pool)?;
        self.methods.push(bytes);
        Ok(emitted)
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>> {
        let this_class = self.pool.class(&self.header.name)?;
        let super_class = match &self.header.super_name {
            Some(name) => self.pool.class(name)?,
            None => 0,
        };
        let mut interfaces = Vec::with_capacity(self.header.interfaces.len());
        for name in &self.header.interfaces {
            interfaces.push(self.pool.class(name)?);
        }
        if !self.attributes.is_empty() && self.pool.origin().is_none() {
            return Err(DigitfixError::unsupported(
                "raw class attributes have no source pool",
            ));
        }
        let mut attributes = Vec::with_capacity(self.attributes.len());
        for attr in &self.attributes {
            attributes.push(raw_attribute(&mut self.pool, attr)?);
        }

        let mut out = Vec::new();
        put_u4(&mut out, MAGIC);
        put_u2(&mut out, self.header.minor_version);
        put_u2(&mut out, self.header.major_version);
        put_u2(&mut out, self.pool.count());
        out.extend_from_slice(self.pool.serialized_entries());
        put_u2(&mut out, self.header.access.bits());
        put_u2(&mut out, this_class);
        put_u2(&mut out, super_class);
        put_u2(&mut out, count_u2(interfaces.len(), "interfaces")?);
        for idx in interfaces {
            put_u2(&mut out, idx);
        }
        put_u2(&mut out, count_u2(self.fields.len(), "fields")?);
        for field in &self.fields {
            out.extend_from_slice(field);
        }
        put_u2(&mut out, count_u2(self.methods.len(), "methods")?);
        for method in &self.methods {
            out.extend_from_slice(method);
        }
        put_u2(&mut out, count_u2(attributes.len(), "class attributes")?);
        for attr in attributes {
            out.extend_from_slice(&attr);
        }
        Ok(out)
    }
}

impl ClassVisitor for ClassWriter {
    fn visit_header(&mut self, header: &ClassHeader) -> Result<()> {
        self.header = header.clone();
        Ok(())
    }

    fn visit_field(&mut self, field: &Member<'_>) -> Result<()> {
        self.copy_field(field)
    }

    fn visit_method(&mut self, method: &Member<'_>) -> Result<Option<Box<dyn MethodVisitor + '_>>> {
        self.copy_method(method)?;
        Ok(None)
    }

    fn visit_attribute(&mut self, attr: &RawAttribute) -> Result<()> {
        self.attributes.push(attr.clone());
        Ok(())
    }
}
