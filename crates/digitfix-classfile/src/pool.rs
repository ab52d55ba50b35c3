//! Constant pool model.
//!
//! [`ConstantPool`] is the parsed pool of one class file. [`PoolBuilder`]
//! grows a pool for the writer: when seeded from a reader it keeps the
//! original entry bytes verbatim, so every index used by copied members stays
//! valid, and appends new entries after them. Lookups are deduplicated so the
//! same symbol never gets two indices.

use digitfix_error::{DigitfixError, Result};
use hashbrown::HashMap;
use xxhash_rust::xxh3::xxh3_64;

use crate::bytes::{ByteReader, decode_modified_utf8, encode_modified_utf8, put_u1, put_u2};
use crate::insn::Constant;

pub const TAG_UTF8: u8 = 1;
pub const TAG_INTEGER: u8 = 3;
pub const TAG_FLOAT: u8 = 4;
pub const TAG_LONG: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_CLASS: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_FIELDREF: u8 = 9;
pub const TAG_METHODREF: u8 = 10;
pub const TAG_INTERFACE_METHODREF: u8 = 11;
pub const TAG_NAME_AND_TYPE: u8 = 12;
pub const TAG_METHOD_HANDLE: u8 = 15;
pub const TAG_METHOD_TYPE: u8 = 16;
pub const TAG_DYNAMIC: u8 = 17;
pub const TAG_INVOKE_DYNAMIC: u8 = 18;
pub const TAG_MODULE: u8 = 19;
pub const TAG_PACKAGE: u8 = 20;

/// One decoded pool entry. Floating point values are kept as raw bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CpEntry {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class { name: u16 },
    String { utf8: u16 },
    MemberRef {
        kind: MemberKind,
        class: u16,
        name_and_type: u16,
    },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType { descriptor: u16 },
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module { name: u16 },
    Package { name: u16 },
}

/// Which kind of member a reference entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Field,
    Method,
    InterfaceMethod,
}

impl MemberKind {
    const fn tag(self) -> u8 {
        match self {
            Self::Field => TAG_FIELDREF,
            Self::Method => TAG_METHODREF,
            Self::InterfaceMethod => TAG_INTERFACE_METHODREF,
        }
    }
}

/// Resolved view of a field or method reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'p> {
    pub kind: MemberKind,
    pub owner: &'p str,
    pub name: &'p str,
    pub descriptor: &'p str,
}

/// Parsed constant pool of one class file.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    /// Index 0 and the slot after each long/double are `None`.
    entries: Vec<Option<CpEntry>>,
    raw: Vec<u8>,
    fingerprint: u64,
}

impl ConstantPool {
    /// Parse the pool starting at the `constant_pool_count` field.
    pub fn parse(r: &mut ByteReader<'_>) -> Result<Self> {
        let count = r.u2("constant_pool_count")?;
        if count == 0 {
            return Err(DigitfixError::malformed("constant_pool_count is zero"));
        }
        let start = r.position();
        let mut entries = Vec::with_capacity(usize::from(count));
        entries.push(None);
        while entries.len() < usize::from(count) {
            let idx = entries.len();
            let tag = r.u1("constant tag")?;
            let entry = match tag {
                TAG_UTF8 => {
                    let len = r.u2("utf8 length")?;
                    let raw = r.take(usize::from(len), "utf8 bytes")?;
                    CpEntry::Utf8(decode_modified_utf8(raw).map_err(|e| {
                        DigitfixError::malformed(format!("constant #{idx}: {e}"))
                    })?)
                }
                TAG_INTEGER => CpEntry::Integer(r.i4("integer constant")?),
                TAG_FLOAT => CpEntry::Float(r.u4("float constant")?),
                TAG_LONG => CpEntry::Long(r.u8("long constant")? as i64),
                TAG_DOUBLE => CpEntry::Double(r.u8("double constant")?),
                TAG_CLASS => CpEntry::Class {
                    name: r.u2("class name index")?,
                },
                TAG_STRING => CpEntry::String {
                    utf8: r.u2("string index")?,
                },
                TAG_FIELDREF | TAG_METHODREF | TAG_INTERFACE_METHODREF => CpEntry::MemberRef {
                    kind: match tag {
                        TAG_FIELDREF => MemberKind::Field,
                        TAG_METHODREF => MemberKind::Method,
                        _ => MemberKind::InterfaceMethod,
                    },
                    class: r.u2("member class index")?,
                    name_and_type: r.u2("member name_and_type index")?,
                },
                TAG_NAME_AND_TYPE => CpEntry::NameAndType {
                    name: r.u2("name index")?,
                    descriptor: r.u2("descriptor index")?,
                },
                TAG_METHOD_HANDLE => CpEntry::MethodHandle {
                    kind: r.u1("reference kind")?,
                    reference: r.u2("reference index")?,
                },
                TAG_METHOD_TYPE => CpEntry::MethodType {
                    descriptor: r.u2("method type descriptor")?,
                },
                TAG_DYNAMIC => CpEntry::Dynamic {
                    bootstrap: r.u2("bootstrap index")?,
                    name_and_type: r.u2("dynamic name_and_type")?,
                },
                TAG_INVOKE_DYNAMIC => CpEntry::InvokeDynamic {
                    bootstrap: r.u2("bootstrap index")?,
                    name_and_type: r.u2("invokedynamic name_and_type")?,
                },
                TAG_MODULE => CpEntry::Module {
                    name: r.u2("module name")?,
                },
                TAG_PACKAGE => CpEntry::Package {
                    name: r.u2("package name")?,
                },
                other => {
                    return Err(DigitfixError::malformed(format!(
                        "unknown constant tag {other} at #{idx}"
                    )));
                }
            };
            let wide = matches!(entry, CpEntry::Long(_) | CpEntry::Double(_));
            entries.push(Some(entry));
            if wide {
                if entries.len() >= usize::from(count) {
                    return Err(DigitfixError::malformed(format!(
                        "8-byte constant #{idx} overruns the pool"
                    )));
                }
                entries.push(None);
            }
        }
        let raw = r.since(start).to_vec();
        let fingerprint = xxh3_64(&raw);
        Ok(Self {
            entries,
            raw,
            fingerprint,
        })
    }

    /// `constant_pool_count` as stored in the class file.
    pub fn count(&self) -> u16 {
        self.entries.len() as u16
    }

    /// Content hash of the serialized entries.
    pub const fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn raw_entries(&self) -> &[u8] {
        &self.raw
    }

    pub fn get(&self, index: u16) -> Result<&CpEntry> {
        self.entries
            .get(usize::from(index))
            .and_then(Option::as_ref)
            .ok_or_else(|| DigitfixError::malformed(format!("invalid constant pool index #{index}")))
    }

    pub fn entries(&self) -> impl Iterator<Item = (u16, &CpEntry)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i as u16, e)))
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            CpEntry::Utf8(text) => Ok(text),
            other => Err(wrong_kind(index, "Utf8", other)),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.get(index)? {
            CpEntry::Class { name } => self.utf8(*name),
            other => Err(wrong_kind(index, "Class", other)),
        }
    }

    /// Like [`Self::class_name`] but index 0 means "none".
    pub fn optional_class_name(&self, index: u16) -> Result<Option<&str>> {
        if index == 0 {
            Ok(None)
        } else {
            self.class_name(index).map(Some)
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.get(index)? {
            CpEntry::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(wrong_kind(index, "NameAndType", other)),
        }
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>> {
        match self.get(index)? {
            CpEntry::MemberRef {
                kind,
                class,
                name_and_type,
            } => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    kind: *kind,
                    owner: self.class_name(*class)?,
                    name,
                    descriptor,
                })
            }
            other => Err(wrong_kind(index, "member reference", other)),
        }
    }

    /// Resolve an `ldc` operand into a symbolic constant.
    ///
    /// Method handles, method types and dynamic constants stay as raw pool
    /// indices and are only meaningful inside this pool.
    pub fn loadable(&self, index: u16) -> Result<Constant> {
        Ok(match self.get(index)? {
            CpEntry::Integer(v) => Constant::Integer(*v),
            CpEntry::Float(bits) => Constant::Float(f32::from_bits(*bits)),
            CpEntry::Long(v) => Constant::Long(*v),
            CpEntry::Double(bits) => Constant::Double(f64::from_bits(*bits)),
            CpEntry::String { utf8 } => Constant::String(self.utf8(*utf8)?.to_owned()),
            CpEntry::Class { name } => Constant::Class(self.utf8(*name)?.to_owned()),
            CpEntry::MethodHandle { .. } | CpEntry::MethodType { .. } | CpEntry::Dynamic { .. } => {
                Constant::Pooled(index)
            }
            other => return Err(wrong_kind(index, "loadable constant", other)),
        })
    }
}

fn wrong_kind(index: u16, expected: &str, found: &CpEntry) -> DigitfixError {
    DigitfixError::malformed(format!(
        "constant #{index}: expected {expected}, found {found:?}"
    ))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MemberKey {
    kind: MemberKind,
    owner: String,
    name: String,
    descriptor: String,
}

/// Append-only pool used by the writer.
#[derive(Debug, Clone)]
pub struct PoolBuilder {
    bytes: Vec<u8>,
    next: u16,
    origin: Option<u64>,
    utf8: HashMap<String, u16>,
    classes: HashMap<String, u16>,
    strings: HashMap<String, u16>,
    integers: HashMap<i32, u16>,
    floats: HashMap<u32, u16>,
    longs: HashMap<i64, u16>,
    doubles: HashMap<u64, u16>,
    name_and_types: HashMap<(String, String), u16>,
    members: HashMap<MemberKey, u16>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolBuilder {
    /// Empty pool for a class assembled from scratch.
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            next: 1,
            origin: None,
            utf8: HashMap::new(),
            classes: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            floats: HashMap::new(),
            longs: HashMap::new(),
            doubles: HashMap::new(),
            name_and_types: HashMap::new(),
            members: HashMap::new(),
        }
    }

    /// Start from an existing pool, keeping its entries and indices.
    pub fn from_pool(pool: &ConstantPool) -> Self {
        let mut builder = Self::new();
        builder.bytes.extend_from_slice(pool.raw_entries());
        builder.next = pool.count();
        builder.origin = Some(pool.fingerprint());
        // First occurrence wins so lookups return the lowest index.
        for (idx, entry) in pool.entries() {
            match entry {
                CpEntry::Utf8(text) => {
                    builder.utf8.entry(text.clone()).or_insert(idx);
                }
                CpEntry::Integer(v) => {
                    builder.integers.entry(*v).or_insert(idx);
                }
                CpEntry::Float(bits) => {
                    builder.floats.entry(*bits).or_insert(idx);
                }
                CpEntry::Long(v) => {
                    builder.longs.entry(*v).or_insert(idx);
                }
                CpEntry::Double(bits) => {
                    builder.doubles.entry(*bits).or_insert(idx);
                }
                CpEntry::Class { name } => {
                    if let Ok(text) = pool.utf8(*name) {
                        builder.classes.entry(text.to_owned()).or_insert(idx);
                    }
                }
                CpEntry::String { utf8 } => {
                    if let Ok(text) = pool.utf8(*utf8) {
                        builder.strings.entry(text.to_owned()).or_insert(idx);
                    }
                }
                CpEntry::NameAndType { .. } => {
                    if let Ok((name, descriptor)) = pool.name_and_type(idx) {
                        builder
                            .name_and_types
                            .entry((name.to_owned(), descriptor.to_owned()))
                            .or_insert(idx);
                    }
                }
                CpEntry::MemberRef { .. } => {
                    if let Ok(m) = pool.member_ref(idx) {
                        builder
                            .members
                            .entry(MemberKey {
                                kind: m.kind,
                                owner: m.owner.to_owned(),
                                name: m.name.to_owned(),
                                descriptor: m.descriptor.to_owned(),
                            })
                            .or_insert(idx);
                    }
                }
                _ => {}
            }
        }
        builder
    }

    /// Fingerprint of the pool this builder was seeded from.
    pub const fn origin(&self) -> Option<u64> {
        self.origin
    }

    /// Value for the `constant_pool_count` field.
    pub const fn count(&self) -> u16 {
        self.next
    }

    pub fn serialized_entries(&self) -> &[u8] {
        &self.bytes
    }

    fn push(&mut self, slots: u16, encode: impl FnOnce(&mut Vec<u8>)) -> Result<u16> {
        let idx = self.next;
        let next = idx
            .checked_add(slots)
            .ok_or_else(|| DigitfixError::unsupported("constant pool exceeds 65535 entries"))?;
        encode(&mut self.bytes);
        self.next = next;
        Ok(idx)
    }

    pub fn utf8(&mut self, text: &str) -> Result<u16> {
        if let Some(idx) = self.utf8.get(text) {
            return Ok(*idx);
        }
        let raw = encode_modified_utf8(text);
        let len = u16::try_from(raw.len())
            .map_err(|_| DigitfixError::unsupported("utf8 constant longer than 65535 bytes"))?;
        let idx = self.push(1, |out| {
            put_u1(out, TAG_UTF8);
            put_u2(out, len);
            out.extend_from_slice(&raw);
        })?;
        self.utf8.insert(text.to_owned(), idx);
        Ok(idx)
    }

    pub fn class(&mut self, internal_name: &str) -> Result<u16> {
        if let Some(idx) = self.classes.get(internal_name) {
            return Ok(*idx);
        }
        let name = self.utf8(internal_name)?;
        let idx = self.push(1, |out| {
            put_u1(out, TAG_CLASS);
            put_u2(out, name);
        })?;
        self.classes.insert(internal_name.to_owned(), idx);
        Ok(idx)
    }

    pub fn string(&mut self, value: &str) -> Result<u16> {
        if let Some(idx) = self.strings.get(value) {
            return Ok(*idx);
        }
        let utf8 = self.utf8(value)?;
        let idx = self.push(1, |out| {
            put_u1(out, TAG_STRING);
            put_u2(out, utf8);
        })?;
        self.strings.insert(value.to_owned(), idx);
        Ok(idx)
    }

    pub fn integer(&mut self, value: i32) -> Result<u16> {
        if let Some(idx) = self.integers.get(&value) {
            return Ok(*idx);
        }
        let idx = self.push(1, |out| {
            put_u1(out, TAG_INTEGER);
            out.extend_from_slice(&value.to_be_bytes());
        })?;
        self.integers.insert(value, idx);
        Ok(idx)
    }

    pub fn float(&mut self, value: f32) -> Result<u16> {
        let bits = value.to_bits();
        if let Some(idx) = self.floats.get(&bits) {
            return Ok(*idx);
        }
        let idx = self.push(1, |out| {
            put_u1(out, TAG_FLOAT);
            out.extend_from_slice(&bits.to_be_bytes());
        })?;
        self.floats.insert(bits, idx);
        Ok(idx)
    }

    pub fn long(&mut self, value: i64) -> Result<u16> {
        if let Some(idx) = self.longs.get(&value) {
            return Ok(*idx);
        }
        let idx = self.push(2, |out| {
            put_u1(out, TAG_LONG);
            out.extend_from_slice(&value.to_be_bytes());
        })?;
        self.longs.insert(value, idx);
        Ok(idx)
    }

    pub fn double(&mut self, value: f64) -> Result<u16> {
        let bits = value.to_bits();
        if let Some(idx) = self.doubles.get(&bits) {
            return Ok(*idx);
        }
        let idx = self.push(2, |out| {
            put_u1(out, TAG_DOUBLE);
            out.extend_from_slice(&bits.to_be_bytes());
        })?;
        self.doubles.insert(bits, idx);
        Ok(idx)
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let key = (name.to_owned(), descriptor.to_owned());
        if let Some(idx) = self.name_and_types.get(&key) {
            return Ok(*idx);
        }
        let name_idx = self.utf8(name)?;
        let desc_idx = self.utf8(descriptor)?;
        let idx = self.push(1, |out| {
            put_u1(out, TAG_NAME_AND_TYPE);
            put_u2(out, name_idx);
            put_u2(out, desc_idx);
        })?;
        self.name_and_types.insert(key, idx);
        Ok(idx)
    }

    pub fn member_ref(
        &mut self,
        kind: MemberKind,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16> {
        let key = MemberKey {
            kind,
            owner: owner.to_owned(),
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        };
        if let Some(idx) = self.members.get(&key) {
            return Ok(*idx);
        }
        let class = self.class(owner)?;
        let nat = self.name_and_type(name, descriptor)?;
        let idx = self.push(1, |out| {
            put_u1(out, kind.tag());
            put_u2(out, class);
            put_u2(out, nat);
        })?;
        self.members.insert(key, idx);
        Ok(idx)
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        self.member_ref(MemberKind::Field, owner, name, descriptor)
    }

    pub fn method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16> {
        let kind = if interface {
            MemberKind::InterfaceMethod
        } else {
            MemberKind::Method
        };
        self.member_ref(kind, owner, name, descriptor)
    }

    /// Pool index for an `ldc` operand.
    pub fn constant(&mut self, constant: &Constant) -> Result<u16> {
        match constant {
            Constant::Integer(v) => self.integer(*v),
            Constant::Float(v) => self.float(*v),
            Constant::Long(v) => self.long(*v),
            Constant::Double(v) => self.double(*v),
            Constant::String(s) => self.string(s),
            Constant::Class(name) => self.class(name),
            Constant::Pooled(idx) => {
                if self.origin.is_none() || *idx >= self.next {
                    return Err(DigitfixError::unsupported(format!(
                        "pool-relative constant #{idx} used outside its class"
                    )));
                }
                Ok(*idx)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::put_u2;

    fn parse_builder(builder: &PoolBuilder) -> ConstantPool {
        let mut raw = Vec::new();
        put_u2(&mut raw, builder.count());
        raw.extend_from_slice(builder.serialized_entries());
        ConstantPool::parse(&mut ByteReader::new(&raw)).expect("reparse pool")
    }

    #[test]
    fn test_builder_deduplicates() {
        let mut pool = PoolBuilder::new();
        let a = pool
            .method_ref("java/text/DigitList", "shouldRoundUp", "(IZZ)Z", false)
            .expect("methodref");
        let b = pool
            .method_ref("java/text/DigitList", "shouldRoundUp", "(IZZ)Z", false)
            .expect("methodref");
        assert_eq!(a, b);
        let class = pool.class("java/text/DigitList").expect("class");
        let utf8 = pool.utf8("java/text/DigitList").expect("utf8");
        assert_ne!(class, utf8);
        // utf8 x3, class, nat, methodref
        assert_eq!(pool.count(), 7);
    }

    #[test]
    fn test_wide_constants_take_two_slots() {
        let mut pool = PoolBuilder::new();
        let l = pool.long(7).expect("long");
        let next = pool.integer(1).expect("int");
        assert_eq!(next, l + 2);
        let parsed = parse_builder(&pool);
        assert_eq!(parsed.loadable(l).expect("ldc2"), Constant::Long(7));
        assert!(parsed.get(l + 1).is_err());
    }

    #[test]
    fn test_seeded_builder_preserves_indices() {
        let mut first = PoolBuilder::new();
        let field = first.field_ref("a/B", "digits", "[C").expect("fieldref");
        let s = first.string("hello").expect("string");
        let parsed = parse_builder(&first);

        let mut seeded = PoolBuilder::from_pool(&parsed);
        assert_eq!(seeded.origin(), Some(parsed.fingerprint()));
        assert_eq!(seeded.field_ref("a/B", "digits", "[C").expect("dedupe"), field);
        assert_eq!(seeded.string("hello").expect("dedupe"), s);
        let fresh = seeded.utf8("new entry").expect("append");
        assert_eq!(fresh, parsed.count());

        let reparsed = parse_builder(&seeded);
        let m = reparsed.member_ref(field).expect("member");
        assert_eq!((m.owner, m.name, m.descriptor), ("a/B", "digits", "[C"));
        assert_eq!(reparsed.utf8(fresh).expect("utf8"), "new entry");
    }

    #[test]
    fn test_pooled_constant_requires_origin() {
        let mut pool = PoolBuilder::new();
        assert!(pool.constant(&Constant::Pooled(1)).is_err());
    }

    #[test]
    fn test_wrong_kind_is_malformed() {
        let mut builder = PoolBuilder::new();
        let idx = builder.utf8("x").expect("utf8");
        let parsed = parse_builder(&builder);
        let err = parsed.class_name(idx).expect_err("not a class");
        assert!(matches!(err, DigitfixError::MalformedClass { .. }));
    }
}
