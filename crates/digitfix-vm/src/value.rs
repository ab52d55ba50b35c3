//! Values, heap objects and the object heap.

use std::fmt;

use digitfix_error::{DigitfixError, Result};
use hashbrown::HashMap;

/// Handle of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(u32);

impl ObjRef {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Operand stack or local variable slot.
///
/// `boolean`, `char`, `byte` and `short` all live in `Int`, as on the JVM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Int(i32),
    /// `None` is `null`.
    Ref(Option<ObjRef>),
}

impl Value {
    pub const NULL: Self = Self::Ref(None);

    pub const fn bool(value: bool) -> Self {
        Self::Int(if value { 1 } else { 0 })
    }

    pub const fn obj(r: ObjRef) -> Self {
        Self::Ref(Some(r))
    }

    /// Zero value for a field of the given descriptor.
    pub fn default_for(descriptor: &str) -> Self {
        match descriptor.as_bytes().first() {
            Some(b'L' | b'[') => Self::NULL,
            _ => Self::Int(0),
        }
    }

    pub fn as_int(self) -> Result<i32> {
        match self {
            Self::Int(v) => Ok(v),
            Self::Ref(_) => Err(DigitfixError::execution("expected int, found reference")),
        }
    }

    pub fn as_bool(self) -> Result<bool> {
        self.as_int().map(|v| v != 0)
    }

    pub fn as_reference(self) -> Result<Option<ObjRef>> {
        match self {
            Self::Ref(r) => Ok(r),
            Self::Int(_) => Err(DigitfixError::execution("expected reference, found int")),
        }
    }

    /// Non-null reference, or a `NullPointerException`-style failure.
    pub fn as_obj(self, what: &str) -> Result<ObjRef> {
        self.as_reference()?
            .ok_or_else(|| DigitfixError::execution(format!("null reference in {what}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapObject {
    Instance {
        class: String,
        fields: HashMap<String, Value>,
    },
    CharArray(Vec<u16>),
    IntArray(Vec<i32>),
    /// Constant of an enum class; only `ordinal()` and `name()` are modelled.
    Enum {
        class: String,
        name: String,
        ordinal: i32,
    },
    Str(String),
}

impl HeapObject {
    pub fn class_name(&self) -> &str {
        match self {
            Self::Instance { class, .. } | Self::Enum { class, .. } => class,
            Self::CharArray(_) => "[C",
            Self::IntArray(_) => "[I",
            Self::Str(_) => "java/lang/String",
        }
    }
}

/// Append-only object store. Nothing is collected; callers drop whole
/// allocation runs with [`Heap::truncate`].
#[derive(Debug, Default)]
pub struct Heap {
    objects: Vec<HeapObject>,
    enums: HashMap<(String, String), ObjRef>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn alloc(&mut self, object: HeapObject) -> Result<ObjRef> {
        let index = u32::try_from(self.objects.len())
            .map_err(|_| DigitfixError::execution("heap exhausted"))?;
        self.objects.push(object);
        Ok(ObjRef(index))
    }

    /// Drop every object allocated at or after `len`.
    ///
    /// References into the dropped range dangle afterwards.
    pub fn truncate(&mut self, len: usize) {
        self.objects.truncate(len);
        self.enums.retain(|_, r| r.index() < len);
    }

    pub fn get(&self, r: ObjRef) -> Result<&HeapObject> {
        self.objects
            .get(r.index())
            .ok_or_else(|| DigitfixError::internal(format!("dangling reference {r}")))
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Result<&mut HeapObject> {
        self.objects
            .get_mut(r.index())
            .ok_or_else(|| DigitfixError::internal(format!("dangling reference {r}")))
    }

    /// Allocate the constants of an enum class in declaration order.
    ///
    /// Defining the same class twice returns the existing constants.
    pub fn define_enum(&mut self, class: &str, names: &[&str]) -> Result<Vec<ObjRef>> {
        let mut out = Vec::with_capacity(names.len());
        for (ordinal, name) in names.iter().enumerate() {
            let key = (class.to_owned(), (*name).to_owned());
            if let Some(existing) = self.enums.get(&key) {
                out.push(*existing);
                continue;
            }
            let r = self.alloc(HeapObject::Enum {
                class: class.to_owned(),
                name: (*name).to_owned(),
                ordinal: i32::try_from(ordinal)
                    .map_err(|_| DigitfixError::execution("enum too large"))?,
            })?;
            self.enums.insert(key, r);
            out.push(r);
        }
        Ok(out)
    }

    pub fn enum_constant(&self, class: &str, name: &str) -> Option<ObjRef> {
        self.enums.get(&(class.to_owned(), name.to_owned())).copied()
    }

    pub fn field(&self, r: ObjRef, name: &str) -> Result<Option<Value>> {
        match self.get(r)? {
            HeapObject::Instance { fields, .. } => Ok(fields.get(name).copied()),
            other => Err(DigitfixError::execution(format!(
                "field {name} read on {}",
                other.class_name()
            ))),
        }
    }

    pub fn set_field(&mut self, r: ObjRef, name: &str, value: Value) -> Result<()> {
        match self.get_mut(r)? {
            HeapObject::Instance { fields, .. } => {
                fields.insert(name.to_owned(), value);
                Ok(())
            }
            other => Err(DigitfixError::execution(format!(
                "field {name} written on {}",
                other.class_name()
            ))),
        }
    }

    pub fn string(&self, r: ObjRef) -> Result<&str> {
        match self.get(r)? {
            HeapObject::Str(s) => Ok(s),
            other => Err(DigitfixError::execution(format!(
                "expected java/lang/String, found {}",
                other.class_name()
            ))),
        }
    }
}
