//! Class file reader.
//!
//! Parsing happens in two stages. [`ClassReader::new`] validates the outer
//! structure and indexes members without looking into method bodies.
//! [`ClassReader::accept`] then drives a [`ClassVisitor`]; a method body is
//! only decoded when the visitor asks for it by returning a
//! [`MethodVisitor`].
//!
//! Within a body the reader emits, for each code position, the label (if
//! anything refers to the position), then its stack map frame, then its line
//! numbers, then the instruction. A label at the end of the code is emitted
//! after the last instruction.

use digitfix_error::{DigitfixError, Result};
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;
use tracing::trace;

use crate::access::ClassAccess;
use crate::bytes::ByteReader;
use crate::insn::{Frame, Insn, Label, LocalTable, LocalVariable, RawAttribute, TryCatch, VType};
use crate::opcodes::{self, is_jump, is_simple, is_var};
use crate::pool::{ConstantPool, MemberKind};
use crate::visitor::{ClassHeader, ClassVisitor, Member, MethodVisitor};

/// `0xCAFEBABE`.
pub const MAGIC: u32 = 0xcafe_babe;

/// Highest class file major version the reader accepts.
pub const MAX_MAJOR_VERSION: u16 = 69;

#[derive(Debug, Clone)]
struct AttributeRef<'a> {
    name: String,
    info: &'a [u8],
}

#[derive(Debug, Clone)]
struct MemberEntry<'a> {
    access_flags: u16,
    name: String,
    descriptor: String,
    raw: &'a [u8],
    attributes: Vec<AttributeRef<'a>>,
}

/// Parsed view over borrowed class file bytes.
#[derive(Debug, Clone)]
pub struct ClassReader<'a> {
    bytes: &'a [u8],
    pool: ConstantPool,
    header: ClassHeader,
    fields: Vec<MemberEntry<'a>>,
    methods: Vec<MemberEntry<'a>>,
    attributes: Vec<AttributeRef<'a>>,
}

impl<'a> ClassReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let magic = r.u4("magic")?;
        if magic != MAGIC {
            return Err(DigitfixError::malformed(format!(
                "bad magic {magic:#010x}"
            )));
        }
        let minor_version = r.u2("minor_version")?;
        let major_version = r.u2("major_version")?;
        if !(45..=MAX_MAJOR_VERSION).contains(&major_version) {
            return Err(DigitfixError::unsupported(format!(
                "class file major version {major_version}"
            )));
        }
        let pool = ConstantPool::parse(&mut r)?;
        let access = ClassAccess::from_bits_retain(r.u2("access_flags")?);
        let name = pool.class_name(r.u2("this_class")?)?.to_owned();
        let super_name = pool
            .optional_class_name(r.u2("super_class")?)?
            .map(str::to_owned);
        let interface_count = r.u2("interfaces_count")?;
        let mut interfaces = Vec::with_capacity(usize::from(interface_count));
        for _ in 0..interface_count {
            interfaces.push(pool.class_name(r.u2("interface")?)?.to_owned());
        }
        let fields = read_members(&mut r, &pool, "field")?;
        let methods = read_members(&mut r, &pool, "method")?;
        let attributes = read_attributes(&mut r, &pool)?;
        if r.remaining() != 0 {
            return Err(DigitfixError::malformed(format!(
                "{} trailing bytes after class file",
                r.remaining()
            )));
        }
        {
            let mut seen = HashSet::new();
            for m in &methods {
                if !seen.insert((m.name.as_str(), m.descriptor.as_str())) {
                    return Err(DigitfixError::malformed(format!(
                        "duplicate method {}{}",
                        m.name, m.descriptor
                    )));
                }
            }
        }
        Ok(Self {
            bytes,
            pool,
            header: ClassHeader {
                minor_version,
                major_version,
                access,
                name,
                super_name,
                interfaces,
            },
            fields,
            methods,
            attributes,
        })
    }

    pub const fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub const fn header(&self) -> &ClassHeader {
        &self.header
    }

    /// Internal name of this class.
    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub const fn pool(&self) -> &ConstantPool {
        &self.pool
    }

    fn member<'s>(&'s self, entry: &'s MemberEntry<'a>) -> Member<'s> {
        Member {
            access_flags: entry.access_flags,
            name: &entry.name,
            descriptor: &entry.descriptor,
            raw: entry.raw,
            pool_fingerprint: self.pool.fingerprint(),
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = Member<'_>> {
        self.fields.iter().map(|f| self.member(f))
    }

    pub fn methods(&self) -> impl Iterator<Item = Member<'_>> {
        self.methods.iter().map(|m| self.member(m))
    }

    pub fn has_field(&self, name: &str, descriptor: &str) -> bool {
        self.fields
            .iter()
            .any(|f| f.name == name && f.descriptor == descriptor)
    }

    pub fn has_method(&self, name: &str, descriptor: &str) -> bool {
        self.find_method_entry(name, descriptor).is_some()
    }

    /// Methods with the given name, any descriptor.
    pub fn methods_named<'s>(&'s self, name: &'s str) -> impl Iterator<Item = Member<'s>> + 's {
        self.methods
            .iter()
            .filter(move |m| m.name == name)
            .map(|m| self.member(m))
    }

    fn find_method_entry(&self, name: &str, descriptor: &str) -> Option<&MemberEntry<'a>> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Drive `visitor` over the whole class.
    pub fn accept(&self, visitor: &mut dyn ClassVisitor) -> Result<()> {
        visitor.visit_header(&self.header)?;
        for field in &self.fields {
            visitor.visit_field(&self.member(field))?;
        }
        for method in &self.methods {
            let member = self.member(method);
            if let Some(mut mv) = visitor.visit_method(&member)? {
                self.decode_member(method, mv.as_mut())?;
            }
        }
        for attr in &self.attributes {
            visitor.visit_attribute(&RawAttribute {
                name: attr.name.clone(),
                info: attr.info.to_vec(),
            })?;
        }
        visitor.visit_end()
    }

    /// Decode one method into `mv`. Returns `false` if the class has no such
    /// method.
    pub fn decode_method(
        &self,
        name: &str,
        descriptor: &str,
        mv: &mut dyn MethodVisitor,
    ) -> Result<bool> {
        match self.find_method_entry(name, descriptor) {
            Some(entry) => {
                self.decode_member(entry, mv)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn decode_member(&self, entry: &MemberEntry<'a>, mv: &mut dyn MethodVisitor) -> Result<()> {
        trace!(
            class = %self.header.name,
            method = %entry.name,
            descriptor = %entry.descriptor,
            "decoding method body"
        );
        let mut code = None;
        for attr in &entry.attributes {
            if attr.name == "Code" {
                if code.is_some() {
                    return Err(DigitfixError::malformed(format!(
                        "method {} has two Code attributes",
                        entry.name
                    )));
                }
                code = Some(attr.info);
            } else {
                mv.visit_attribute(RawAttribute {
                    name: attr.name.clone(),
                    info: attr.info.to_vec(),
                })?;
            }
        }
        if let Some(info) = code {
            CodeDecoder::new(&self.pool, info)?.emit(mv)?;
        }
        mv.visit_end()
    }
}

fn read_members<'a>(
    r: &mut ByteReader<'a>,
    pool: &ConstantPool,
    what: &str,
) -> Result<Vec<MemberEntry<'a>>> {
    let count = r.u2("member count")?;
    let mut out = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let start = r.position();
        let access_flags = r.u2("access_flags")?;
        let name = pool.utf8(r.u2("name_index")?)?.to_owned();
        let descriptor = pool.utf8(r.u2("descriptor_index")?)?.to_owned();
        let attributes = read_attributes(r, pool).map_err(|e| {
            DigitfixError::malformed(format!("{what} {name}{descriptor}: {e}"))
        })?;
        out.push(MemberEntry {
            access_flags,
            name,
            descriptor,
            raw: r.since(start),
            attributes,
        });
    }
    Ok(out)
}

fn read_attributes<'a>(r: &mut ByteReader<'a>, pool: &ConstantPool) -> Result<Vec<AttributeRef<'a>>> {
    let count = r.u2("attributes_count")?;
    let mut out = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name = pool.utf8(r.u2("attribute_name_index")?)?.to_owned();
        let len = r.u4("attribute_length")?;
        let info = r.take(len as usize, "attribute info")?;
        out.push(AttributeRef { name, info });
    }
    Ok(out)
}

struct CodeDecoder {
    max_stack: u16,
    max_locals: u16,
    code_length: u32,
    insns: Vec<(u32, Insn)>,
    try_catches: Vec<TryCatch>,
    frames: HashMap<u32, Frame>,
    lines: Vec<(u32, u16)>,
    locals: Vec<LocalVariable>,
    labels: HashSet<u32>,
}

impl CodeDecoder {
    fn new(pool: &ConstantPool, info: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(info);
        let max_stack = r.u2("max_stack")?;
        let max_locals = r.u2("max_locals")?;
        let code_length = r.u4("code_length")?;
        if code_length == 0 || code_length >= 65536 {
            return Err(DigitfixError::malformed(format!(
                "code_length {code_length} out of range"
            )));
        }
        let code = r.take(code_length as usize, "code")?;
        let mut decoder = Self {
            max_stack,
            max_locals,
            code_length,
            insns: Vec::new(),
            try_catches: Vec::new(),
            frames: HashMap::new(),
            lines: Vec::new(),
            locals: Vec::new(),
            labels: HashSet::new(),
        };
        decoder.decode_insns(pool, code)?;

        let handlers = r.u2("exception_table_length")?;
        for _ in 0..handlers {
            let start = decoder.label(u32::from(r.u2("start_pc")?));
            let end = decoder.label(u32::from(r.u2("end_pc")?));
            let handler = decoder.label(u32::from(r.u2("handler_pc")?));
            let catch_type = pool
                .optional_class_name(r.u2("catch_type")?)?
                .map(str::to_owned);
            decoder.try_catches.push(TryCatch {
                start,
                end,
                handler,
                catch_type,
            });
        }

        for attr in read_attributes(&mut r, pool)? {
            let mut a = ByteReader::new(attr.info);
            match attr.name.as_str() {
                "LineNumberTable" => {
                    for _ in 0..a.u2("line_number_table_length")? {
                        let pc = u32::from(a.u2("start_pc")?);
                        let line = a.u2("line_number")?;
                        decoder.label(pc);
                        decoder.lines.push((pc, line));
                    }
                }
                "LocalVariableTable" | "LocalVariableTypeTable" => {
                    let table = if attr.name == "LocalVariableTable" {
                        LocalTable::Descriptor
                    } else {
                        LocalTable::Signature
                    };
                    for _ in 0..a.u2("local_variable_table_length")? {
                        let start_pc = u32::from(a.u2("start_pc")?);
                        let length = u32::from(a.u2("length")?);
                        let name = pool.utf8(a.u2("name_index")?)?.to_owned();
                        let descriptor = pool.utf8(a.u2("descriptor_index")?)?.to_owned();
                        let index = a.u2("index")?;
                        let start = decoder.label(start_pc);
                        let end = decoder.label(start_pc + length);
                        decoder.locals.push(LocalVariable {
                            name,
                            descriptor,
                            start,
                            end,
                            index,
                            table,
                        });
                    }
                }
                "StackMapTable" => decoder.decode_frames(pool, &mut a)?,
                other => {
                    return Err(DigitfixError::unsupported(format!(
                        "Code attribute {other} in a rewritten method"
                    )));
                }
            }
        }

        let boundaries: HashSet<u32> = decoder.insns.iter().map(|(pc, _)| *pc).collect();
        for pc in &decoder.labels {
            if *pc != decoder.code_length && !boundaries.contains(pc) {
                return Err(DigitfixError::malformed(format!(
                    "code reference to offset {pc} is not an instruction boundary"
                )));
            }
        }
        if decoder.frames.contains_key(&decoder.code_length) {
            return Err(DigitfixError::malformed("stack map frame past end of code"));
        }
        Ok(decoder)
    }

    fn label(&mut self, pc: u32) -> Label {
        self.labels.insert(pc);
        Label::at_offset(pc)
    }

    fn target(&mut self, pc: u32, rel: i32) -> Result<Label> {
        let abs = i64::from(pc) + i64::from(rel);
        if abs < 0 || abs >= i64::from(self.code_length) {
            return Err(DigitfixError::malformed(format!(
                "branch at {pc} targets {abs}, outside code"
            )));
        }
        Ok(self.label(abs as u32))
    }

    fn decode_insns(&mut self, pool: &ConstantPool, code: &[u8]) -> Result<()> {
        let mut r = ByteReader::new(code);
        while r.remaining() > 0 {
            let pc = r.position() as u32;
            let insn = self.decode_one(pool, &mut r, pc)?;
            self.insns.push((pc, insn));
        }
        Ok(())
    }

    fn decode_one(&mut self, pool: &ConstantPool, r: &mut ByteReader<'_>, pc: u32) -> Result<Insn> {
        let op = r.u1("opcode")?;
        let insn = match op {
            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let n = op - opcodes::ILOAD_0;
                Insn::var(opcodes::ILOAD + n / 4, u16::from(n % 4))
            }
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let n = op - opcodes::ISTORE_0;
                Insn::var(opcodes::ISTORE + n / 4, u16::from(n % 4))
            }
            _ if is_simple(op) => Insn::Simple(op),
            opcodes::BIPUSH => Insn::Int {
                opcode: op,
                operand: i32::from(r.i1("bipush operand")?),
            },
            opcodes::SIPUSH => Insn::Int {
                opcode: op,
                operand: i32::from(r.i2("sipush operand")?),
            },
            opcodes::NEWARRAY => Insn::Int {
                opcode: op,
                operand: i32::from(r.u1("newarray type")?),
            },
            opcodes::LDC => Insn::Ldc(pool.loadable(u16::from(r.u1("ldc index")?))?),
            opcodes::LDC_W | opcodes::LDC2_W => Insn::Ldc(pool.loadable(r.u2("ldc index")?)?),
            _ if is_var(op) => Insn::var(op, u16::from(r.u1("local index")?)),
            opcodes::IINC => Insn::Iinc {
                index: u16::from(r.u1("iinc index")?),
                delta: i16::from(r.i1("iinc delta")?),
            },
            opcodes::GOTO_W | opcodes::JSR_W => {
                let rel = r.i4("branch offset")?;
                let opcode = if op == opcodes::GOTO_W {
                    opcodes::GOTO
                } else {
                    opcodes::JSR
                };
                Insn::jump(opcode, self.target(pc, rel)?)
            }
            _ if is_jump(op) => {
                let rel = i32::from(r.i2("branch offset")?);
                Insn::jump(op, self.target(pc, rel)?)
            }
            opcodes::TABLESWITCH => {
                r.skip(switch_padding(pc), "switch padding")?;
                let default = self.target(pc, r.i4("default")?)?;
                let low = r.i4("low")?;
                let high = r.i4("high")?;
                if high < low {
                    return Err(DigitfixError::malformed(format!(
                        "tableswitch at {pc}: high {high} < low {low}"
                    )));
                }
                let n = i64::from(high) - i64::from(low) + 1;
                if n * 4 > r.remaining() as i64 {
                    return Err(DigitfixError::malformed(format!(
                        "tableswitch at {pc}: {n} targets exceed code"
                    )));
                }
                let mut targets = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    targets.push(self.target(pc, r.i4("jump offset")?)?);
                }
                Insn::TableSwitch {
                    low,
                    high,
                    default,
                    targets,
                }
            }
            opcodes::LOOKUPSWITCH => {
                r.skip(switch_padding(pc), "switch padding")?;
                let default = self.target(pc, r.i4("default")?)?;
                let npairs = r.i4("npairs")?;
                if npairs < 0 || i64::from(npairs) * 8 > r.remaining() as i64 {
                    return Err(DigitfixError::malformed(format!(
                        "lookupswitch at {pc}: bad npairs {npairs}"
                    )));
                }
                let mut pairs = Vec::with_capacity(npairs as usize);
                for _ in 0..npairs {
                    let key = r.i4("match")?;
                    pairs.push((key, self.target(pc, r.i4("jump offset")?)?));
                }
                Insn::LookupSwitch { default, pairs }
            }
            opcodes::GETSTATIC..=opcodes::PUTFIELD => {
                let m = pool.member_ref(r.u2("field index")?)?;
                if m.kind != MemberKind::Field {
                    return Err(DigitfixError::malformed(format!(
                        "field instruction at {pc} references a method"
                    )));
                }
                Insn::field(op, m.owner, m.name, m.descriptor)
            }
            opcodes::INVOKEVIRTUAL | opcodes::INVOKESPECIAL | opcodes::INVOKESTATIC => {
                let m = pool.member_ref(r.u2("method index")?)?;
                if m.kind == MemberKind::Field {
                    return Err(DigitfixError::malformed(format!(
                        "invoke at {pc} references a field"
                    )));
                }
                Insn::Method {
                    opcode: op,
                    owner: m.owner.to_owned(),
                    name: m.name.to_owned(),
                    descriptor: m.descriptor.to_owned(),
                    interface: m.kind == MemberKind::InterfaceMethod,
                }
            }
            opcodes::INVOKEINTERFACE => {
                let m = pool.member_ref(r.u2("method index")?)?;
                r.skip(2, "invokeinterface count")?;
                Insn::Method {
                    opcode: op,
                    owner: m.owner.to_owned(),
                    name: m.name.to_owned(),
                    descriptor: m.descriptor.to_owned(),
                    interface: true,
                }
            }
            opcodes::INVOKEDYNAMIC => {
                let pool_index = r.u2("invokedynamic index")?;
                r.skip(2, "invokedynamic padding")?;
                Insn::InvokeDynamic { pool_index }
            }
            opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
                Insn::type_insn(op, pool.class_name(r.u2("class index")?)?)
            }
            opcodes::MULTIANEWARRAY => Insn::MultiANewArray {
                class: pool.class_name(r.u2("class index")?)?.to_owned(),
                dimensions: r.u1("dimensions")?,
            },
            opcodes::WIDE => {
                let inner = r.u1("wide opcode")?;
                if inner == opcodes::IINC {
                    Insn::Iinc {
                        index: r.u2("iinc index")?,
                        delta: r.i2("iinc delta")?,
                    }
                } else if is_var(inner) {
                    Insn::var(inner, r.u2("local index")?)
                } else {
                    return Err(DigitfixError::malformed(format!(
                        "wide prefix on opcode {inner:#04x} at {pc}"
                    )));
                }
            }
            other => {
                return Err(DigitfixError::malformed(format!(
                    "unknown opcode {other:#04x} at {pc}"
                )));
            }
        };
        Ok(insn)
    }

    fn decode_frames(&mut self, pool: &ConstantPool, r: &mut ByteReader<'_>) -> Result<()> {
        let count = r.u2("number_of_entries")?;
        let mut prev: Option<u32> = None;
        for _ in 0..count {
            let frame_type = r.u1("frame_type")?;
            let (delta, frame) = match frame_type {
                0..=63 => (u32::from(frame_type), Frame::Same),
                64..=127 => (
                    u32::from(frame_type - 64),
                    Frame::SameLocals1(self.decode_vtype(pool, r)?),
                ),
                247 => {
                    let delta = u32::from(r.u2("offset_delta")?);
                    (delta, Frame::SameLocals1(self.decode_vtype(pool, r)?))
                }
                248..=250 => (u32::from(r.u2("offset_delta")?), Frame::Chop(251 - frame_type)),
                251 => (u32::from(r.u2("offset_delta")?), Frame::Same),
                252..=254 => {
                    let delta = u32::from(r.u2("offset_delta")?);
                    let mut added = SmallVec::new();
                    for _ in 0..(frame_type - 251) {
                        added.push(self.decode_vtype(pool, r)?);
                    }
                    (delta, Frame::Append(added))
                }
                255 => {
                    let delta = u32::from(r.u2("offset_delta")?);
                    let mut locals = SmallVec::new();
                    for _ in 0..r.u2("number_of_locals")? {
                        locals.push(self.decode_vtype(pool, r)?);
                    }
                    let mut stack = SmallVec::new();
                    for _ in 0..r.u2("number_of_stack_items")? {
                        stack.push(self.decode_vtype(pool, r)?);
                    }
                    (delta, Frame::Full { locals, stack })
                }
                reserved => {
                    return Err(DigitfixError::malformed(format!(
                        "reserved stack map frame type {reserved}"
                    )));
                }
            };
            let pc = match prev {
                None => delta,
                Some(p) => p + delta + 1,
            };
            if pc >= self.code_length {
                return Err(DigitfixError::malformed(format!(
                    "stack map frame at {pc} past end of code"
                )));
            }
            self.label(pc);
            self.frames.insert(pc, frame);
            prev = Some(pc);
        }
        Ok(())
    }

    fn decode_vtype(&mut self, pool: &ConstantPool, r: &mut ByteReader<'_>) -> Result<VType> {
        Ok(match r.u1("verification type tag")? {
            0 => VType::Top,
            1 => VType::Integer,
            2 => VType::Float,
            3 => VType::Double,
            4 => VType::Long,
            5 => VType::Null,
            6 => VType::UninitializedThis,
            7 => VType::Object(pool.class_name(r.u2("cpool_index")?)?.to_owned()),
            8 => VType::Uninitialized(self.label(u32::from(r.u2("offset")?))),
            tag => {
                return Err(DigitfixError::malformed(format!(
                    "unknown verification type tag {tag}"
                )));
            }
        })
    }

    fn emit(mut self, mv: &mut dyn MethodVisitor) -> Result<()> {
        mv.visit_code(self.max_stack, self.max_locals)?;
        for block in std::mem::take(&mut self.try_catches) {
            mv.visit_try_catch(block)?;
        }
        let mut lines: HashMap<u32, SmallVec<[u16; 1]>> = HashMap::new();
        for (pc, line) in &self.lines {
            lines.entry(*pc).or_default().push(*line);
        }
        for (pc, insn) in std::mem::take(&mut self.insns) {
            if self.labels.contains(&pc) {
                let label = Label::at_offset(pc);
                mv.visit_label(label)?;
                if let Some(frame) = self.frames.remove(&pc) {
                    mv.visit_frame(frame)?;
                }
                if let Some(numbers) = lines.get(&pc) {
                    for line in numbers {
                        mv.visit_line_number(*line, label)?;
                    }
                }
            }
            mv.visit_insn(insn)?;
        }
        if self.labels.contains(&self.code_length) {
            mv.visit_label(Label::at_offset(self.code_length))?;
        }
        for var in std::mem::take(&mut self.locals) {
            mv.visit_local_variable(var)?;
        }
        Ok(())
    }
}

/// Bytes between a switch opcode at `pc` and its 4-aligned operands.
pub const fn switch_padding(pc: u32) -> usize {
    ((4 - ((pc + 1) % 4)) % 4) as usize
}
