//! Reference builds of `java/text/DigitList`.
//!
//! Two shapes of the class as shipped by Java 8 runtimes: the affected one,
//! whose `HALF_UP` case has its own (wrong) body, and the fixed one, where
//! `HALF_UP` and `HALF_DOWN` share a single case body. Only the members the
//! rounding decision touches are present.

use std::fmt;
use std::str::FromStr;

use digitfix_classfile::opcodes::{
    ALOAD, ATHROW, BIPUSH, CALOAD, DUP, GETFIELD, GETSTATIC, GOTO, IADD, ICONST_0, ICONST_1,
    ICONST_2, IF_ACMPNE, IF_ICMPEQ, IF_ICMPGE, IF_ICMPLE, IF_ICMPLT, IF_ICMPNE, IFEQ, IFLE, IFNE,
    ILOAD, INVOKESPECIAL, INVOKEVIRTUAL, IREM, IRETURN, ISTORE, ISUB, NEW, RETURN,
};
use digitfix_classfile::{
    ClassAccess, ClassHeader, ClassWriter, Constant, FieldAccess, Frame, Insn, Label, LocalTable,
    LocalVariable, MethodAccess, MethodVisitor, MethodWriter, VType,
};
use digitfix_error::{DigitfixError, Result};
use smallvec::smallvec;

use crate::rounding::{ROUNDING_MODE_CLASS, ROUNDING_MODE_DESCRIPTOR, RoundingMode};

pub const DIGIT_LIST_CLASS: &str = "java/text/DigitList";

const UNNECESSARY_MESSAGE: &str =
    "Rounding needed with the rounding mode being set to RoundingMode.UNNECESSARY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecimenKind {
    /// Java 8 before update 40.
    Affected,
    /// Java 8 update 40 and later.
    Fixed,
}

impl SpecimenKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Affected => "affected",
            Self::Fixed => "fixed",
        }
    }
}

impl fmt::Display for SpecimenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecimenKind {
    type Err = DigitfixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "affected" => Ok(Self::Affected),
            "fixed" => Ok(Self::Fixed),
            other => Err(DigitfixError::config(format!(
                "unknown specimen {other:?}; expected affected or fixed"
            ))),
        }
    }
}

/// Class file bytes of the given specimen.
pub fn specimen(kind: SpecimenKind) -> Result<Vec<u8>> {
    let mut cw = ClassWriter::new(ClassHeader {
        minor_version: 0,
        major_version: 52,
        access: ClassAccess::FINAL | ClassAccess::SUPER,
        name: DIGIT_LIST_CLASS.to_owned(),
        super_name: Some("java/lang/Object".to_owned()),
        interfaces: vec!["java/lang/Cloneable".to_owned()],
    });
    cw.add_field(FieldAccess::PUBLIC, "decimalAt", "I")?;
    cw.add_field(FieldAccess::PUBLIC, "count", "I")?;
    cw.add_field(FieldAccess::PUBLIC, "digits", "[C")?;
    cw.add_field(FieldAccess::PRIVATE, "roundingMode", ROUNDING_MODE_DESCRIPTOR)?;
    cw.add_field(FieldAccess::PRIVATE, "isNegative", "Z")?;

    let init = constructor(&cw)?;
    cw.commit(init)?;
    let is_zero = is_zero(&cw)?;
    cw.commit(is_zero)?;
    let round = should_round_up(&cw, kind)?;
    cw.commit(round)?;
    cw.into_bytes()
}

fn constructor(cw: &ClassWriter) -> Result<MethodWriter> {
    let mut mw = cw.begin_method(MethodAccess::empty(), "<init>", "()V");
    mw.visit_code(1, 1)?;
    mw.emit(Insn::var(ALOAD, 0));
    mw.emit(Insn::method(INVOKESPECIAL, "java/lang/Object", "<init>", "()V"));
    mw.emit(Insn::simple(RETURN));
    Ok(mw)
}

/// `for (int i = 0; i < count; ++i) if (digits[i] != '0') return false; return true;`
fn is_zero(cw: &ClassWriter) -> Result<MethodWriter> {
    let mut mw = cw.begin_method(MethodAccess::empty(), "isZero", "()Z");
    mw.visit_code(2, 2)?;
    let head = mw.new_label();
    let next = mw.new_label();
    let done = mw.new_label();
    mw.emit(Insn::simple(ICONST_0));
    mw.emit(Insn::var(ISTORE, 1));
    mw.bind(head);
    mw.frame(Frame::Append(smallvec![VType::Integer]));
    mw.emit(Insn::var(ILOAD, 1));
    mw.emit(this());
    mw.emit(count());
    mw.emit(Insn::jump(IF_ICMPGE, done));
    load_digit(&mut mw, 1);
    mw.emit(zero_char());
    mw.emit(Insn::jump(IF_ICMPEQ, next));
    ret(&mut mw, false);
    mw.bind(next);
    mw.frame(Frame::Same);
    mw.emit(Insn::Iinc { index: 1, delta: 1 });
    mw.emit(Insn::jump(GOTO, head));
    mw.bind(done);
    mw.frame(Frame::Chop(1));
    ret(&mut mw, true);
    Ok(mw)
}

// ---------------------------------------------------------------------------
// shouldRoundUp(int maximumDigits, boolean alreadyRounded,
//               boolean valueExactAsDecimal)
// ---------------------------------------------------------------------------

const MAX: u16 = 1;
const ALREADY_ROUNDED: u16 = 2;
const EXACT: u16 = 3;
const INDEX: u16 = 4;

fn this() -> Insn {
    Insn::var(ALOAD, 0)
}

fn count() -> Insn {
    Insn::field(GETFIELD, DIGIT_LIST_CLASS, "count", "I")
}

fn zero_char() -> Insn {
    Insn::Int {
        opcode: BIPUSH,
        operand: i32::from(b'0'),
    }
}

fn five_char() -> Insn {
    Insn::Int {
        opcode: BIPUSH,
        operand: i32::from(b'5'),
    }
}

/// Pushes `digits[local]`.
fn load_digit(mw: &mut MethodWriter, local: u16) {
    mw.emit(this());
    mw.emit(Insn::field(GETFIELD, DIGIT_LIST_CLASS, "digits", "[C"));
    mw.emit(Insn::var(ILOAD, local));
    mw.emit(Insn::simple(CALOAD));
}

/// Pushes `this.count - 1` after `maximumDigits`.
fn max_and_last_index(mw: &mut MethodWriter) {
    mw.emit(Insn::var(ILOAD, MAX));
    mw.emit(this());
    mw.emit(count());
    mw.emit(Insn::simple(ICONST_1));
    mw.emit(Insn::simple(ISUB));
}

fn ret(mw: &mut MethodWriter, value: bool) {
    mw.emit(Insn::simple(if value { ICONST_1 } else { ICONST_0 }));
    mw.emit(Insn::simple(IRETURN));
}

fn base_locals() -> Frame {
    Frame::Full {
        locals: smallvec![
            VType::object(DIGIT_LIST_CLASS),
            VType::Integer,
            VType::Integer,
            VType::Integer
        ],
        stack: smallvec![],
    }
}

fn loop_locals() -> Frame {
    Frame::Full {
        locals: smallvec![
            VType::object(DIGIT_LIST_CLASS),
            VType::Integer,
            VType::Integer,
            VType::Integer,
            VType::Integer
        ],
        stack: smallvec![],
    }
}

fn case_entry(mw: &mut MethodWriter, label: Label, line: u16) -> Result<()> {
    mw.bind(label);
    mw.frame(base_locals());
    mw.visit_line_number(line, label)
}

/// `for (int i = from; i < count; ++i) if (digits[i] != '0') { on_nonzero }`
/// falling through to `end` when every digit is zero.
fn scan_digits(
    mw: &mut MethodWriter,
    from_next: bool,
    end: Label,
    on_nonzero: impl FnOnce(&mut MethodWriter),
) {
    let head = mw.new_label();
    let next = mw.new_label();
    mw.emit(Insn::var(ILOAD, MAX));
    if from_next {
        mw.emit(Insn::simple(ICONST_1));
        mw.emit(Insn::simple(IADD));
    }
    mw.emit(Insn::var(ISTORE, INDEX));
    mw.bind(head);
    mw.frame(loop_locals());
    mw.emit(Insn::var(ILOAD, INDEX));
    mw.emit(this());
    mw.emit(count());
    mw.emit(Insn::jump(IF_ICMPGE, end));
    load_digit(mw, INDEX);
    mw.emit(zero_char());
    mw.emit(Insn::jump(IF_ICMPEQ, next));
    on_nonzero(mw);
    mw.bind(next);
    mw.frame(Frame::Same);
    mw.emit(Insn::Iinc {
        index: INDEX,
        delta: 1,
    });
    mw.emit(Insn::jump(GOTO, head));
}

/// Pushes `!isNegative` (`negate`) or `isNegative` and returns it.
fn return_sign(mw: &mut MethodWriter, negate: bool) {
    mw.emit(this());
    mw.emit(Insn::field(GETFIELD, DIGIT_LIST_CLASS, "isNegative", "Z"));
    if !negate {
        mw.emit(Insn::simple(IRETURN));
        return;
    }
    let push_false = mw.new_label();
    let done = mw.new_label();
    mw.emit(Insn::jump(IFNE, push_false));
    mw.emit(Insn::simple(ICONST_1));
    mw.emit(Insn::jump(GOTO, done));
    mw.bind(push_false);
    mw.frame(loop_locals());
    mw.emit(Insn::simple(ICONST_0));
    mw.bind(done);
    mw.frame(Frame::SameLocals1(VType::Integer));
    mw.emit(Insn::simple(IRETURN));
}

/// Affected `HALF_UP`: rounds up at or above '5' unless the rounding digit is
/// the last one and the digits were already rounded, whatever their value.
fn half_up_affected(mw: &mut MethodWriter, end: Label) {
    let round_up = mw.new_label();
    load_digit(mw, MAX);
    mw.emit(five_char());
    mw.emit(Insn::jump(IF_ICMPLT, end));
    max_and_last_index(mw);
    mw.emit(Insn::jump(IF_ICMPNE, round_up));
    mw.emit(Insn::var(ILOAD, ALREADY_ROUNDED));
    mw.emit(Insn::jump(IFEQ, round_up));
    ret(mw, false);
    mw.bind(round_up);
    mw.frame(Frame::Same);
    ret(mw, true);
}

/// Affected `HALF_DOWN`: a final '5' rounds down when exact or already
/// rounded up.
fn half_down_affected(mw: &mut MethodWriter, end: Label) {
    let check_tie = mw.new_label();
    let round_up = mw.new_label();
    let round_down = mw.new_label();
    load_digit(mw, MAX);
    mw.emit(five_char());
    mw.emit(Insn::jump(IF_ICMPLE, check_tie));
    ret(mw, true);
    mw.bind(check_tie);
    mw.frame(Frame::Same);
    load_digit(mw, MAX);
    mw.emit(five_char());
    mw.emit(Insn::jump(IF_ICMPNE, end));
    max_and_last_index(mw);
    mw.emit(Insn::jump(IF_ICMPNE, round_up));
    mw.emit(Insn::var(ILOAD, EXACT));
    mw.emit(Insn::jump(IFNE, round_down));
    mw.emit(Insn::var(ILOAD, ALREADY_ROUNDED));
    mw.emit(Insn::jump(IFEQ, round_up));
    mw.bind(round_down);
    mw.frame(Frame::Same);
    ret(mw, false);
    mw.bind(round_up);
    mw.frame(Frame::Same);
    ret(mw, true);
}

/// Fixed `HALF_UP`/`HALF_DOWN` body: an exact final '5' rounds up only in
/// `HALF_UP`; an inexact one follows the direction of the earlier rounding.
fn half_shared_fixed(mw: &mut MethodWriter, end: Label) {
    let check_tie = mw.new_label();
    let last = mw.new_label();
    let inexact = mw.new_label();
    let not_half_up = mw.new_label();
    let returned = mw.new_label();
    let round_down = mw.new_label();
    load_digit(mw, MAX);
    mw.emit(five_char());
    mw.emit(Insn::jump(IF_ICMPLE, check_tie));
    ret(mw, true);
    mw.bind(check_tie);
    mw.frame(Frame::Same);
    load_digit(mw, MAX);
    mw.emit(five_char());
    mw.emit(Insn::jump(IF_ICMPNE, end));
    max_and_last_index(mw);
    mw.emit(Insn::jump(IF_ICMPEQ, last));
    ret(mw, true);
    mw.bind(last);
    mw.frame(Frame::Same);
    mw.emit(Insn::var(ILOAD, EXACT));
    mw.emit(Insn::jump(IFEQ, inexact));
    mw.emit(this());
    mw.emit(Insn::field(
        GETFIELD,
        DIGIT_LIST_CLASS,
        "roundingMode",
        ROUNDING_MODE_DESCRIPTOR,
    ));
    mw.emit(Insn::field(
        GETSTATIC,
        ROUNDING_MODE_CLASS,
        RoundingMode::HalfUp.java_name(),
        ROUNDING_MODE_DESCRIPTOR,
    ));
    mw.emit(Insn::jump(IF_ACMPNE, not_half_up));
    mw.emit(Insn::simple(ICONST_1));
    mw.emit(Insn::jump(GOTO, returned));
    mw.bind(not_half_up);
    mw.frame(Frame::Same);
    mw.emit(Insn::simple(ICONST_0));
    mw.bind(returned);
    mw.frame(Frame::SameLocals1(VType::Integer));
    mw.emit(Insn::simple(IRETURN));
    mw.bind(inexact);
    mw.frame(Frame::Same);
    mw.emit(Insn::var(ILOAD, ALREADY_ROUNDED));
    mw.emit(Insn::jump(IFNE, round_down));
    ret(mw, true);
    mw.bind(round_down);
    mw.frame(Frame::Same);
    ret(mw, false);
}

/// `HALF_EVEN`: a final exact '5' rounds to the even neighbour; a '5' with
/// nonzero digits behind it rounds up.
fn half_even(mw: &mut MethodWriter, end: Label) {
    let check_tie = mw.new_label();
    let scan = mw.new_label();
    let check_exact = mw.new_label();
    let parity = mw.new_label();
    let round_down = mw.new_label();
    load_digit(mw, MAX);
    mw.emit(five_char());
    mw.emit(Insn::jump(IF_ICMPLE, check_tie));
    ret(mw, true);
    mw.bind(check_tie);
    mw.frame(Frame::Same);
    load_digit(mw, MAX);
    mw.emit(five_char());
    mw.emit(Insn::jump(IF_ICMPNE, end));
    max_and_last_index(mw);
    mw.emit(Insn::jump(IF_ICMPNE, scan));
    mw.emit(Insn::var(ILOAD, ALREADY_ROUNDED));
    mw.emit(Insn::jump(IFEQ, check_exact));
    ret(mw, false);
    mw.bind(check_exact);
    mw.frame(Frame::Same);
    mw.emit(Insn::var(ILOAD, EXACT));
    mw.emit(Insn::jump(IFNE, parity));
    ret(mw, true);
    mw.bind(parity);
    mw.frame(Frame::Same);
    mw.emit(Insn::var(ILOAD, MAX));
    mw.emit(Insn::jump(IFLE, round_down));
    mw.emit(this());
    mw.emit(Insn::field(GETFIELD, DIGIT_LIST_CLASS, "digits", "[C"));
    mw.emit(Insn::var(ILOAD, MAX));
    mw.emit(Insn::simple(ICONST_1));
    mw.emit(Insn::simple(ISUB));
    mw.emit(Insn::simple(CALOAD));
    mw.emit(Insn::simple(ICONST_2));
    mw.emit(Insn::simple(IREM));
    mw.emit(Insn::jump(IFEQ, round_down));
    ret(mw, true);
    mw.bind(round_down);
    mw.frame(Frame::Same);
    ret(mw, false);
    mw.bind(scan);
    mw.frame(Frame::Same);
    scan_digits(mw, true, end, |mw| ret(mw, true));
}

fn throw_unnecessary(mw: &mut MethodWriter) {
    mw.emit(Insn::type_insn(NEW, "java/lang/ArithmeticException"));
    mw.emit(Insn::simple(DUP));
    mw.emit(Insn::Ldc(Constant::String(UNNECESSARY_MESSAGE.to_owned())));
    mw.emit(Insn::method(
        INVOKESPECIAL,
        "java/lang/ArithmeticException",
        "<init>",
        "(Ljava/lang/String;)V",
    ));
    mw.emit(Insn::simple(ATHROW));
}

fn should_round_up(cw: &ClassWriter, kind: SpecimenKind) -> Result<MethodWriter> {
    let mut mw = cw.begin_method(MethodAccess::PRIVATE, "shouldRoundUp", "(IZZ)Z");
    mw.visit_code(3, 5)?;
    let start = mw.new_label();
    let end = mw.new_label();
    let finish = mw.new_label();
    let cases: Vec<Label> = RoundingMode::ALL.iter().map(|_| mw.new_label()).collect();
    let case = |mode: RoundingMode| cases[mode.ordinal()];
    let mut targets = cases.clone();
    if kind == SpecimenKind::Fixed {
        targets[RoundingMode::HalfDown.ordinal()] = case(RoundingMode::HalfUp);
    }

    mw.bind(start);
    mw.visit_line_number(500, start)?;
    mw.emit(Insn::var(ILOAD, MAX));
    mw.emit(this());
    mw.emit(count());
    mw.emit(Insn::jump(IF_ICMPGE, end));
    mw.emit(this());
    mw.emit(Insn::field(
        GETFIELD,
        DIGIT_LIST_CLASS,
        "roundingMode",
        ROUNDING_MODE_DESCRIPTOR,
    ));
    mw.emit(Insn::method(INVOKEVIRTUAL, ROUNDING_MODE_CLASS, "ordinal", "()I"));
    mw.emit(Insn::TableSwitch {
        low: 0,
        high: RoundingMode::COUNT as i32 - 1,
        default: end,
        targets,
    });

    case_entry(&mut mw, case(RoundingMode::Up), 503)?;
    scan_digits(&mut mw, false, end, |mw| ret(mw, true));

    case_entry(&mut mw, case(RoundingMode::Down), 510)?;
    mw.emit(Insn::jump(GOTO, end));

    case_entry(&mut mw, case(RoundingMode::Ceiling), 512)?;
    scan_digits(&mut mw, false, end, |mw| return_sign(mw, true));

    case_entry(&mut mw, case(RoundingMode::Floor), 519)?;
    scan_digits(&mut mw, false, end, |mw| return_sign(mw, false));

    match kind {
        SpecimenKind::Affected => {
            case_entry(&mut mw, case(RoundingMode::HalfUp), 526)?;
            half_up_affected(&mut mw, end);
            case_entry(&mut mw, case(RoundingMode::HalfDown), 536)?;
            half_down_affected(&mut mw, end);
        }
        SpecimenKind::Fixed => {
            case_entry(&mut mw, case(RoundingMode::HalfUp), 526)?;
            half_shared_fixed(&mut mw, end);
        }
    }

    case_entry(&mut mw, case(RoundingMode::HalfEven), 556)?;
    half_even(&mut mw, end);

    case_entry(&mut mw, case(RoundingMode::Unnecessary), 583)?;
    scan_digits(&mut mw, false, end, throw_unnecessary);

    mw.bind(end);
    mw.frame(base_locals());
    mw.visit_line_number(595, end)?;
    ret(&mut mw, false);
    mw.bind(finish);

    for (index, name, descriptor) in [
        (0, "this", "Ljava/text/DigitList;"),
        (MAX, "maximumDigits", "I"),
        (ALREADY_ROUNDED, "alreadyRounded", "Z"),
        (EXACT, "valueExactAsDecimal", "Z"),
    ] {
        mw.visit_local_variable(LocalVariable {
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
            start,
            end: finish,
            index,
            table: LocalTable::Descriptor,
        })?;
    }
    Ok(mw)
}
