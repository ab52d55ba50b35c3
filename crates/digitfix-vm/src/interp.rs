//! The interpreter loop.
//!
//! One [`Vm`] owns one loaded class, the object heap and a cache of decoded
//! method bodies. Calls into the loaded class recurse through [`Vm::execute`];
//! the few library behaviours the rounding routine relies on (enum
//! `ordinal()`, exception construction) are intrinsics. Anything else is
//! refused with [`DigitfixError::Unsupported`] rather than guessed at.

use std::rc::Rc;

use digitfix_classfile::opcodes::{
    self, ACONST_NULL, ALOAD, ALOAD_3, ARETURN, ARRAYLENGTH, ASTORE, ASTORE_3, ATHROW, CALOAD,
    CASTORE, CHECKCAST, DUP, DUP_X1, GETFIELD, GETSTATIC, GOTO, GOTO_W, I2C, IADD, IALOAD, IAND,
    IASTORE, ICONST_0, ICONST_5, ICONST_M1, IDIV, IF_ACMPEQ, IF_ACMPNE, IF_ICMPEQ, IF_ICMPGE,
    IF_ICMPGT, IF_ICMPLE, IF_ICMPLT, IF_ICMPNE, IFEQ, IFGE, IFGT, IFLE, IFLT, IFNE, IFNONNULL,
    IFNULL, ILOAD, ILOAD_0, IMUL, INEG, INSTANCEOF, INVOKEINTERFACE, INVOKESPECIAL, INVOKESTATIC,
    INVOKEVIRTUAL, IOR, IREM, IRETURN, ISHL, ISHR, ISTORE, ISTORE_0, ISUB, IUSHR, IXOR, NEW,
    NEWARRAY, NOP, POP, PUTFIELD, RETURN, SWAP, T_CHAR, T_INT,
};
use digitfix_classfile::{ClassReader, Constant, FieldType, Insn, Label, MethodDescriptor};
use digitfix_error::{DigitfixError, Result};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::program::Program;
use crate::value::{Heap, HeapObject, ObjRef, Value};

/// Largest array `newarray` may allocate.
const MAX_ARRAY_LENGTH: i32 = 1 << 16;

/// Interpreter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Instructions one top-level invocation may execute, nested calls
    /// included.
    pub step_budget: u64,
    /// Maximum call nesting below the top-level invocation.
    pub max_depth: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            step_budget: 10_000,
            max_depth: 16,
        }
    }
}

/// Counters accumulated over the lifetime of a [`Vm`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecMetrics {
    pub invocations: u64,
    pub executed_insns: u64,
    pub intrinsic_calls: u64,
}

enum Flow {
    Next,
    Jump(Label),
    Return(Option<Value>),
}

/// Locals and operand stack of one method activation.
struct Activation {
    program: Rc<Program>,
    locals: Vec<Value>,
    stack: SmallVec<[Value; 8]>,
    pc: usize,
}

impl Activation {
    fn new(program: Rc<Program>, args: &[Value]) -> Result<Self> {
        let max_locals = usize::from(program.max_locals);
        if args.len() > max_locals {
            return Err(DigitfixError::execution(format!(
                "{}{} takes {} argument slots but max_locals is {max_locals}",
                program.name,
                program.descriptor,
                args.len()
            )));
        }
        let mut locals = vec![Value::Int(0); max_locals];
        locals[..args.len()].copy_from_slice(args);
        Ok(Self {
            program,
            locals,
            stack: SmallVec::new(),
            pc: 0,
        })
    }

    fn push(&mut self, value: Value) -> Result<()> {
        if self.stack.len() >= usize::from(self.program.max_stack) {
            return Err(DigitfixError::execution(format!(
                "operand stack overflow in {}{} (max_stack {})",
                self.program.name, self.program.descriptor, self.program.max_stack
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| {
            DigitfixError::execution(format!(
                "operand stack underflow in {}{}",
                self.program.name, self.program.descriptor
            ))
        })
    }

    fn pop_int(&mut self) -> Result<i32> {
        self.pop()?.as_int()
    }

    fn pop_ref(&mut self) -> Result<Option<ObjRef>> {
        self.pop()?.as_reference()
    }

    fn peek(&self) -> Result<Value> {
        self.stack
            .last()
            .copied()
            .ok_or_else(|| DigitfixError::execution("operand stack underflow"))
    }

    fn load(&self, index: u16) -> Result<Value> {
        self.locals
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| self.bad_local(index))
    }

    fn store(&mut self, index: u16, value: Value) -> Result<()> {
        match self.locals.get_mut(usize::from(index)) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(self.bad_local(index)),
        }
    }

    fn bad_local(&self, index: u16) -> DigitfixError {
        DigitfixError::execution(format!(
            "local {index} out of range in {}{} (max_locals {})",
            self.program.name, self.program.descriptor, self.program.max_locals
        ))
    }
}

/// Interpreter bound to one class file.
#[derive(Debug)]
pub struct Vm {
    class_bytes: Vec<u8>,
    class_name: String,
    fields: HashMap<String, String>,
    methods: HashSet<(String, String)>,
    programs: HashMap<(String, String), Rc<Program>>,
    heap: Heap,
    config: VmConfig,
    steps: u64,
    metrics: ExecMetrics,
}

impl Vm {
    pub fn new(class_bytes: Vec<u8>, config: VmConfig) -> Result<Self> {
        let (class_name, fields, methods) = {
            let reader = ClassReader::new(&class_bytes)?;
            let fields = reader
                .fields()
                .map(|f| (f.name.to_owned(), f.descriptor.to_owned()))
                .collect();
            let methods = reader
                .methods()
                .map(|m| (m.name.to_owned(), m.descriptor.to_owned()))
                .collect();
            (reader.name().to_owned(), fields, methods)
        };
        debug!(class = %class_name, bytes = class_bytes.len(), "class loaded into interpreter");
        Ok(Self {
            class_bytes,
            class_name,
            fields,
            methods,
            programs: HashMap::new(),
            heap: Heap::new(),
            config,
            steps: 0,
            metrics: ExecMetrics::default(),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub const fn config(&self) -> &VmConfig {
        &self.config
    }

    pub const fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Instructions executed by the most recent top-level invocation.
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    pub const fn metrics(&self) -> ExecMetrics {
        self.metrics
    }

    pub fn define_enum(&mut self, class: &str, names: &[&str]) -> Result<Vec<ObjRef>> {
        self.heap.define_enum(class, names)
    }

    pub fn declares_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Allocate an instance of the loaded class. Declared fields start at
    /// their zero value; `fields` overrides them by name.
    pub fn new_instance(&mut self, fields: &[(&str, Value)]) -> Result<ObjRef> {
        let mut values: HashMap<String, Value> = self
            .fields
            .iter()
            .map(|(name, descriptor)| (name.clone(), Value::default_for(descriptor)))
            .collect();
        for (name, value) in fields {
            let slot = values.get_mut(*name).ok_or_else(|| {
                DigitfixError::execution(format!("{} declares no field {name}", self.class_name))
            })?;
            *slot = *value;
        }
        self.heap.alloc(HeapObject::Instance {
            class: self.class_name.clone(),
            fields: values,
        })
    }

    pub fn alloc_chars(&mut self, chars: &[u16]) -> Result<ObjRef> {
        self.heap.alloc(HeapObject::CharArray(chars.to_vec()))
    }

    /// Run an instance method of the loaded class on `receiver`.
    pub fn invoke_virtual(
        &mut self,
        receiver: ObjRef,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> Result<Option<Value>> {
        self.steps = 0;
        let program = self.program(name, descriptor)?;
        if program.is_static {
            return Err(DigitfixError::execution(format!(
                "{}.{name}{descriptor} is static",
                self.class_name
            )));
        }
        let mut call: SmallVec<[Value; 8]> = SmallVec::with_capacity(args.len() + 1);
        call.push(Value::obj(receiver));
        call.extend_from_slice(args);
        self.execute(program, &call, 0)
    }

    /// Run a static method of the loaded class.
    pub fn invoke_static(
        &mut self,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> Result<Option<Value>> {
        self.steps = 0;
        let program = self.program(name, descriptor)?;
        if !program.is_static {
            return Err(DigitfixError::execution(format!(
                "{}.{name}{descriptor} is not static",
                self.class_name
            )));
        }
        self.execute(program, args, 0)
    }

    fn program(&mut self, name: &str, descriptor: &str) -> Result<Rc<Program>> {
        let key = (name.to_owned(), descriptor.to_owned());
        if let Some(program) = self.programs.get(&key) {
            return Ok(Rc::clone(program));
        }
        let program = {
            let reader = ClassReader::new(&self.class_bytes)?;
            Rc::new(Program::load(&reader, name, descriptor)?)
        };
        self.programs.insert(key, Rc::clone(&program));
        Ok(program)
    }

    fn execute(&mut self, program: Rc<Program>, args: &[Value], depth: usize) -> Result<Option<Value>> {
        if depth > self.config.max_depth {
            return Err(DigitfixError::execution(format!(
                "call depth {depth} exceeds {} at {}{}",
                self.config.max_depth, program.name, program.descriptor
            )));
        }
        self.metrics.invocations = self.metrics.invocations.saturating_add(1);
        trace!(
            class = %self.class_name,
            method = %program.name,
            descriptor = %program.descriptor,
            depth,
            "invoke"
        );
        let mut act = Activation::new(Rc::clone(&program), args)?;
        loop {
            let Some(insn) = program.insn(act.pc) else {
                return Err(DigitfixError::execution(format!(
                    "execution fell off the end of {}{}",
                    program.name, program.descriptor
                )));
            };
            self.tick()?;
            act.pc += 1;
            match self.step(&mut act, insn, depth)? {
                Flow::Next => {}
                Flow::Jump(label) => act.pc = program.target(label)?,
                Flow::Return(value) => return Ok(value),
            }
        }
    }

    fn tick(&mut self) -> Result<()> {
        self.steps = self.steps.saturating_add(1);
        self.metrics.executed_insns = self.metrics.executed_insns.saturating_add(1);
        if self.steps > self.config.step_budget {
            debug!(
                class = %self.class_name,
                budget = self.config.step_budget,
                "step budget exhausted"
            );
            return Err(DigitfixError::execution(format!(
                "step budget of {} instructions exhausted",
                self.config.step_budget
            )));
        }
        Ok(())
    }

    fn step(&mut self, act: &mut Activation, insn: &Insn, depth: usize) -> Result<Flow> {
        match insn {
            Insn::Simple(op) => self.simple(act, *op),
            Insn::Int { opcode, operand } => {
                if *opcode == NEWARRAY {
                    let length = act.pop_int()?;
                    let array = self.new_array(*operand, length)?;
                    act.push(Value::obj(array))?;
                } else {
                    act.push(Value::Int(*operand))?;
                }
                Ok(Flow::Next)
            }
            Insn::Var { opcode, index } => {
                match *opcode {
                    ILOAD => {
                        let v = act.load(*index)?;
                        act.push(Value::Int(v.as_int()?))?;
                    }
                    ALOAD => {
                        let v = act.load(*index)?;
                        act.push(Value::Ref(v.as_reference()?))?;
                    }
                    ISTORE => {
                        let v = act.pop_int()?;
                        act.store(*index, Value::Int(v))?;
                    }
                    ASTORE => {
                        let v = act.pop_ref()?;
                        act.store(*index, Value::Ref(v))?;
                    }
                    other => return Err(unsupported_op(other)),
                }
                Ok(Flow::Next)
            }
            Insn::Iinc { index, delta } => {
                let v = act.load(*index)?.as_int()?;
                act.store(*index, Value::Int(v.wrapping_add(i32::from(*delta))))?;
                Ok(Flow::Next)
            }
            Insn::Type { opcode, class } => {
                match *opcode {
                    NEW => {
                        let obj = if *class == self.class_name {
                            self.new_instance(&[])?
                        } else {
                            self.heap.alloc(HeapObject::Instance {
                                class: class.clone(),
                                fields: HashMap::new(),
                            })?
                        };
                        act.push(Value::obj(obj))?;
                    }
                    CHECKCAST => {
                        act.peek()?.as_reference()?;
                    }
                    INSTANCEOF => {
                        let is = match act.pop_ref()? {
                            Some(r) => self.heap.get(r)?.class_name() == class,
                            None => false,
                        };
                        act.push(Value::bool(is))?;
                    }
                    other => return Err(unsupported_op(other)),
                }
                Ok(Flow::Next)
            }
            Insn::Field {
                opcode,
                owner,
                name,
                descriptor,
            } => {
                match *opcode {
                    GETFIELD => {
                        let obj = act.pop()?.as_obj("getfield")?;
                        let v = self
                            .heap
                            .field(obj, name)?
                            .unwrap_or_else(|| Value::default_for(descriptor));
                        act.push(v)?;
                    }
                    PUTFIELD => {
                        let v = act.pop()?;
                        let obj = act.pop()?.as_obj("putfield")?;
                        self.heap.set_field(obj, name, v)?;
                    }
                    GETSTATIC => {
                        let constant = self
                            .heap
                            .enum_constant(owner, name)
                            .filter(|_| descriptor.strip_prefix('L').and_then(|d| d.strip_suffix(';')) == Some(owner.as_str()))
                            .ok_or_else(|| {
                                DigitfixError::unsupported(format!("static field {owner}.{name}"))
                            })?;
                        act.push(Value::obj(constant))?;
                    }
                    other => return Err(unsupported_op(other)),
                }
                Ok(Flow::Next)
            }
            Insn::Method {
                opcode,
                owner,
                name,
                descriptor,
                ..
            } => {
                self.invoke(act, *opcode, owner, name, descriptor, depth)?;
                Ok(Flow::Next)
            }
            Insn::Ldc(constant) => {
                let v = match constant {
                    Constant::Integer(i) => Value::Int(*i),
                    Constant::String(s) => Value::obj(self.heap.alloc(HeapObject::Str(s.clone()))?),
                    other => {
                        return Err(DigitfixError::unsupported(format!("ldc of {other:?}")));
                    }
                };
                act.push(v)?;
                Ok(Flow::Next)
            }
            Insn::Jump { opcode, target } => {
                if branch_taken(act, *opcode)? {
                    Ok(Flow::Jump(*target))
                } else {
                    Ok(Flow::Next)
                }
            }
            Insn::TableSwitch {
                low,
                high,
                default,
                targets,
            } => {
                let index = act.pop_int()?;
                let target = if (*low..=*high).contains(&index) {
                    targets
                        .get(index.wrapping_sub(*low) as usize)
                        .copied()
                        .ok_or_else(|| DigitfixError::malformed("tableswitch target count"))?
                } else {
                    *default
                };
                Ok(Flow::Jump(target))
            }
            Insn::LookupSwitch { default, pairs } => {
                let key = act.pop_int()?;
                let target = pairs
                    .iter()
                    .find(|(k, _)| *k == key)
                    .map_or(*default, |(_, l)| *l);
                Ok(Flow::Jump(target))
            }
            other => Err(unsupported_op(other.opcode())),
        }
    }

    fn simple(&mut self, act: &mut Activation, op: u8) -> Result<Flow> {
        match op {
            NOP => {}
            ACONST_NULL => act.push(Value::NULL)?,
            ICONST_M1..=ICONST_5 => act.push(Value::Int(i32::from(op) - i32::from(ICONST_0)))?,
            ILOAD_0..=ALOAD_3 => {
                let n = op - ILOAD_0;
                let v = act.load(u16::from(n % 4))?;
                match n / 4 {
                    0 => act.push(Value::Int(v.as_int()?))?,
                    4 => act.push(Value::Ref(v.as_reference()?))?,
                    _ => return Err(unsupported_op(op)),
                }
            }
            ISTORE_0..=ASTORE_3 => {
                let n = op - ISTORE_0;
                let v = match n / 4 {
                    0 => Value::Int(act.pop_int()?),
                    4 => Value::Ref(act.pop_ref()?),
                    _ => return Err(unsupported_op(op)),
                };
                act.store(u16::from(n % 4), v)?;
            }
            IALOAD | CALOAD => {
                let index = act.pop_int()?;
                let array = act.pop()?.as_obj(opcodes::mnemonic(op))?;
                let v = self.array_load(array, index)?;
                act.push(Value::Int(v))?;
            }
            IASTORE | CASTORE => {
                let v = act.pop_int()?;
                let index = act.pop_int()?;
                let array = act.pop()?.as_obj(opcodes::mnemonic(op))?;
                self.array_store(array, index, v)?;
            }
            POP => {
                act.pop()?;
            }
            DUP => {
                let v = act.peek()?;
                act.push(v)?;
            }
            DUP_X1 => {
                let a = act.pop()?;
                let b = act.pop()?;
                act.push(a)?;
                act.push(b)?;
                act.push(a)?;
            }
            SWAP => {
                let a = act.pop()?;
                let b = act.pop()?;
                act.push(a)?;
                act.push(b)?;
            }
            IADD | ISUB | IMUL | IDIV | IREM | ISHL | ISHR | IUSHR | IAND | IOR | IXOR => {
                let b = act.pop_int()?;
                let a = act.pop_int()?;
                act.push(Value::Int(int_binop(op, a, b)?))?;
            }
            INEG => {
                let v = act.pop_int()?;
                act.push(Value::Int(v.wrapping_neg()))?;
            }
            I2C => {
                let v = act.pop_int()?;
                act.push(Value::Int(i32::from(v as u16)))?;
            }
            IRETURN => return Ok(Flow::Return(Some(Value::Int(act.pop_int()?)))),
            ARETURN => return Ok(Flow::Return(Some(Value::Ref(act.pop_ref()?)))),
            RETURN => return Ok(Flow::Return(None)),
            ARRAYLENGTH => {
                let array = act.pop()?.as_obj("arraylength")?;
                let len = match self.heap.get(array)? {
                    HeapObject::CharArray(a) => a.len(),
                    HeapObject::IntArray(a) => a.len(),
                    other => {
                        return Err(DigitfixError::execution(format!(
                            "arraylength on {}",
                            other.class_name()
                        )));
                    }
                };
                act.push(Value::Int(len as i32))?;
            }
            ATHROW => {
                let thrown = act.pop()?.as_obj("athrow")?;
                return Err(self.uncaught(thrown));
            }
            other => return Err(unsupported_op(other)),
        }
        Ok(Flow::Next)
    }

    fn invoke(
        &mut self,
        act: &mut Activation,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        depth: usize,
    ) -> Result<()> {
        let md = MethodDescriptor::parse(descriptor)?;
        let narrow = |t: &FieldType| !matches!(t, FieldType::Long | FieldType::Double | FieldType::Float);
        if !md.params.iter().all(narrow) || !md.ret.as_ref().is_none_or(narrow) {
            return Err(DigitfixError::unsupported(format!(
                "wide or floating-point call {owner}.{name}{descriptor}"
            )));
        }
        let mut args: SmallVec<[Value; 8]> = SmallVec::with_capacity(md.params.len() + 1);
        for _ in 0..md.params.len() {
            args.push(act.pop()?);
        }
        let result = match opcode {
            INVOKESTATIC => {
                args.reverse();
                if owner != self.class_name {
                    return Err(DigitfixError::unsupported(format!(
                        "static call {owner}.{name}{descriptor}"
                    )));
                }
                let program = self.program(name, descriptor)?;
                self.execute(program, &args, depth + 1)?
            }
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKEINTERFACE => {
                let receiver = act.pop()?.as_obj(name)?;
                args.push(Value::obj(receiver));
                args.reverse();
                self.invoke_instance(opcode, owner, name, descriptor, receiver, &args, depth)?
            }
            other => return Err(unsupported_op(other)),
        };
        match (md.ret.is_some(), result) {
            (true, Some(v)) => act.push(v),
            (false, None) => Ok(()),
            _ => Err(DigitfixError::execution(format!(
                "{owner}.{name}{descriptor} returned a value of the wrong shape"
            ))),
        }
    }

    /// `args[0]` is the receiver.
    #[allow(clippy::too_many_arguments)]
    fn invoke_instance(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        receiver: ObjRef,
        args: &[Value],
        depth: usize,
    ) -> Result<Option<Value>> {
        let declared = self.methods.contains(&(name.to_owned(), descriptor.to_owned()));
        let dispatches_here = owner == self.class_name
            || (opcode != INVOKESPECIAL
                && declared
                && self.heap.get(receiver)?.class_name() == self.class_name);
        if dispatches_here {
            let program = self.program(name, descriptor)?;
            return self.execute(program, args, depth + 1);
        }
        self.metrics.intrinsic_calls = self.metrics.intrinsic_calls.saturating_add(1);
        if name == "<init>" {
            // Foreign constructors only record a detail message.
            if descriptor == "(Ljava/lang/String;)V" {
                self.heap.set_field(receiver, "message", args[1])?;
            }
            return Ok(None);
        }
        let (enum_name, ordinal) = match self.heap.get(receiver)? {
            HeapObject::Enum { name, ordinal, .. } => (name.clone(), *ordinal),
            other => {
                return Err(DigitfixError::unsupported(format!(
                    "call to {owner}.{name}{descriptor} on {}",
                    other.class_name()
                )));
            }
        };
        match (name, descriptor) {
            ("ordinal", "()I") => Ok(Some(Value::Int(ordinal))),
            ("name" | "toString", "()Ljava/lang/String;") => {
                Ok(Some(Value::obj(self.heap.alloc(HeapObject::Str(enum_name))?)))
            }
            _ => Err(DigitfixError::unsupported(format!(
                "enum method {owner}.{name}{descriptor}"
            ))),
        }
    }

    fn new_array(&mut self, element: i32, length: i32) -> Result<ObjRef> {
        if !(0..=MAX_ARRAY_LENGTH).contains(&length) {
            return Err(DigitfixError::execution(format!(
                "array length {length} out of range"
            )));
        }
        let length = length as usize;
        let object = match u8::try_from(element) {
            Ok(T_CHAR) => HeapObject::CharArray(vec![0; length]),
            Ok(T_INT) => HeapObject::IntArray(vec![0; length]),
            _ => {
                return Err(DigitfixError::unsupported(format!(
                    "newarray element type {element}"
                )));
            }
        };
        self.heap.alloc(object)
    }

    fn array_load(&self, array: ObjRef, index: i32) -> Result<i32> {
        let i = usize::try_from(index).map_err(|_| out_of_bounds(index))?;
        let value = match self.heap.get(array)? {
            HeapObject::CharArray(a) => a.get(i).map(|c| i32::from(*c)),
            HeapObject::IntArray(a) => a.get(i).copied(),
            other => {
                return Err(DigitfixError::execution(format!(
                    "array load on {}",
                    other.class_name()
                )));
            }
        };
        value.ok_or_else(|| out_of_bounds(index))
    }

    fn array_store(&mut self, array: ObjRef, index: i32, value: i32) -> Result<()> {
        let i = usize::try_from(index).map_err(|_| out_of_bounds(index))?;
        let slot_ok = match self.heap.get_mut(array)? {
            HeapObject::CharArray(a) => a.get_mut(i).map(|c| *c = value as u16).is_some(),
            HeapObject::IntArray(a) => a.get_mut(i).map(|c| *c = value).is_some(),
            other => {
                return Err(DigitfixError::execution(format!(
                    "array store on {}",
                    other.class_name()
                )));
            }
        };
        if slot_ok { Ok(()) } else { Err(out_of_bounds(index)) }
    }

    fn uncaught(&self, thrown: ObjRef) -> DigitfixError {
        let Ok(object) = self.heap.get(thrown) else {
            return DigitfixError::internal(format!("thrown dangling reference {thrown}"));
        };
        let class = object.class_name().replace('/', ".");
        let message = match self.heap.field(thrown, "message") {
            Ok(Some(Value::Ref(Some(r)))) => self.heap.string(r).ok().map(str::to_owned),
            _ => None,
        };
        match message {
            Some(message) => DigitfixError::execution(format!("uncaught {class}: {message}")),
            None => DigitfixError::execution(format!("uncaught {class}")),
        }
    }
}

fn branch_taken(act: &mut Activation, opcode: u8) -> Result<bool> {
    Ok(match opcode {
        IFEQ..=IFLE => {
            let v = act.pop_int()?;
            match opcode {
                IFEQ => v == 0,
                IFNE => v != 0,
                IFLT => v < 0,
                IFGE => v >= 0,
                IFGT => v > 0,
                _ => v <= 0,
            }
        }
        IF_ICMPEQ..=IF_ICMPLE => {
            let b = act.pop_int()?;
            let a = act.pop_int()?;
            match opcode {
                IF_ICMPEQ => a == b,
                IF_ICMPNE => a != b,
                IF_ICMPLT => a < b,
                IF_ICMPGE => a >= b,
                IF_ICMPGT => a > b,
                _ => a <= b,
            }
        }
        IF_ACMPEQ | IF_ACMPNE => {
            let b = act.pop_ref()?;
            let a = act.pop_ref()?;
            (a == b) == (opcode == IF_ACMPEQ)
        }
        IFNULL => act.pop_ref()?.is_none(),
        IFNONNULL => act.pop_ref()?.is_some(),
        GOTO | GOTO_W => true,
        other => return Err(unsupported_op(other)),
    })
}

fn int_binop(op: u8, a: i32, b: i32) -> Result<i32> {
    Ok(match op {
        IADD => a.wrapping_add(b),
        ISUB => a.wrapping_sub(b),
        IMUL => a.wrapping_mul(b),
        IDIV | IREM if b == 0 => {
            return Err(DigitfixError::execution(
                "uncaught java.lang.ArithmeticException: / by zero",
            ));
        }
        IDIV => a.wrapping_div(b),
        IREM => a.wrapping_rem(b),
        ISHL => a.wrapping_shl(b as u32),
        ISHR => a.wrapping_shr(b as u32),
        IUSHR => (a as u32).wrapping_shr(b as u32) as i32,
        IAND => a & b,
        IOR => a | b,
        _ => a ^ b,
    })
}

fn out_of_bounds(index: i32) -> DigitfixError {
    DigitfixError::execution(format!(
        "uncaught java.lang.ArrayIndexOutOfBoundsException: {index}"
    ))
}

fn unsupported_op(opcode: u8) -> DigitfixError {
    DigitfixError::unsupported(format!(
        "opcode {} ({opcode:#04x})",
        opcodes::mnemonic(opcode)
    ))
}
