//! Exact decimal facts about binary doubles.
//!
//! The digit list needs two bits the shortest representation alone does not
//! carry: whether those digits sit above the exact binary value (they were
//! rounded up) and whether they equal it. Both come from comparing the
//! decimal and binary values as integers.

use std::cmp::Ordering;

/// Unsigned integer in little-endian base 2^32 limbs; just enough to scale
/// and compare the two sides of one conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Big {
    limbs: Vec<u32>,
}

impl Big {
    fn from_u64(v: u64) -> Self {
        let mut out = Self {
            limbs: vec![v as u32, (v >> 32) as u32],
        };
        out.trim();
        out
    }

    fn trim(&mut self) {
        while self.limbs.last() == Some(&0) {
            self.limbs.pop();
        }
    }

    fn is_zero(&self) -> bool {
        self.limbs.is_empty()
    }

    fn mul_add_small(&mut self, m: u32, add: u32) {
        let mut carry = u64::from(add);
        for limb in &mut self.limbs {
            let v = u64::from(*limb) * u64::from(m) + carry;
            *limb = v as u32;
            carry = v >> 32;
        }
        if carry != 0 {
            self.limbs.push(carry as u32);
        }
        self.trim();
    }

    fn mul_pow5(&mut self, mut n: u32) {
        // 5^13 is the largest power of five below 2^32.
        const FIVE_13: u32 = 1_220_703_125;
        while n >= 13 {
            self.mul_add_small(FIVE_13, 0);
            n -= 13;
        }
        if n > 0 {
            self.mul_add_small(5_u32.pow(n), 0);
        }
    }

    fn shl(&mut self, bits: u32) {
        if self.is_zero() {
            return;
        }
        let words = (bits / 32) as usize;
        let bits = bits % 32;
        if bits > 0 {
            let mut carry = 0_u32;
            for limb in &mut self.limbs {
                let next = *limb >> (32 - bits);
                *limb = (*limb << bits) | carry;
                carry = next;
            }
            if carry != 0 {
                self.limbs.push(carry);
            }
        }
        if words > 0 {
            self.limbs.splice(0..0, std::iter::repeat_n(0, words));
        }
    }

    fn mul_pow10(&mut self, n: u32) {
        self.mul_pow5(n);
        self.shl(n);
    }

    /// Divide in place; returns the remainder.
    fn div_small(&mut self, d: u32) -> u32 {
        let mut rem = 0_u64;
        for limb in self.limbs.iter_mut().rev() {
            let cur = (rem << 32) | u64::from(*limb);
            *limb = (cur / u64::from(d)) as u32;
            rem = cur % u64::from(d);
        }
        self.trim();
        rem as u32
    }

    fn to_decimal(&self) -> String {
        if self.is_zero() {
            return "0".to_owned();
        }
        let mut n = self.clone();
        let mut chunks = Vec::new();
        while !n.is_zero() {
            chunks.push(n.div_small(1_000_000_000));
        }
        let mut out = String::new();
        for (i, chunk) in chunks.iter().rev().enumerate() {
            if i == 0 {
                out.push_str(&chunk.to_string());
            } else {
                out.push_str(&format!("{chunk:09}"));
            }
        }
        out
    }
}

impl Ord for Big {
    fn cmp(&self, other: &Self) -> Ordering {
        self.limbs
            .len()
            .cmp(&other.limbs.len())
            .then_with(|| self.limbs.iter().rev().cmp(other.limbs.iter().rev()))
    }
}

impl PartialOrd for Big {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// `v == mantissa * 2^exponent` for a finite double.
fn decompose(v: f64) -> (u64, i32) {
    let bits = v.abs().to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    let fraction = bits & ((1_u64 << 52) - 1);
    if biased == 0 {
        (fraction, -1074)
    } else {
        (fraction | (1_u64 << 52), biased - 1075)
    }
}

/// Shortest round-trip digits of a non-negative finite double.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortestDigits {
    /// ASCII digits without leading zeros; empty for zero.
    pub digits: Vec<u8>,
    /// Position of the decimal point relative to the first digit.
    pub decimal_at: i32,
    /// The digits are above the exact binary value.
    pub rounded_up: bool,
    /// The digits equal the exact binary value.
    pub exact: bool,
}

impl ShortestDigits {
    pub fn of(v: f64) -> Self {
        let v = v.abs();
        if v == 0.0 {
            return Self {
                digits: Vec::new(),
                decimal_at: 0,
                rounded_up: false,
                exact: true,
            };
        }
        // `{:e}` prints the shortest digits that round-trip: "9.9999e1".
        let sci = format!("{v:e}");
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        let exponent: i32 = exponent.parse().unwrap_or(0);
        let digits: Vec<u8> = mantissa.bytes().filter(u8::is_ascii_digit).collect();
        let decimal_at = exponent + 1;

        let mut decimal = Big::from_u64(0);
        for d in &digits {
            decimal.mul_add_small(10, u32::from(d - b'0'));
        }
        let (m, e) = decompose(v);
        let mut binary = Big::from_u64(m);
        let scale = decimal_at - digits.len() as i32;
        if scale >= 0 {
            decimal.mul_pow10(scale as u32);
        } else {
            binary.mul_pow10(scale.unsigned_abs());
        }
        if e >= 0 {
            binary.shl(e as u32);
        } else {
            decimal.shl(e.unsigned_abs());
        }
        let order = decimal.cmp(&binary);
        Self {
            digits,
            decimal_at,
            rounded_up: order == Ordering::Greater,
            exact: order == Ordering::Equal,
        }
    }
}

/// The exact value of a double as `java.math.BigDecimal(double).toString()`
/// prints it.
pub fn exact_decimal_string(v: f64) -> String {
    if !v.is_finite() {
        return v.to_string();
    }
    let sign = if v.is_sign_negative() && v != 0.0 { "-" } else { "" };
    let (mut m, mut e) = decompose(v);
    if m == 0 {
        return "0".to_owned();
    }
    while m % 2 == 0 && e < 0 {
        m >>= 1;
        e += 1;
    }
    let mut unscaled = Big::from_u64(m);
    if e >= 0 {
        unscaled.shl(e as u32);
        return format!("{sign}{}", unscaled.to_decimal());
    }
    let scale = e.unsigned_abs() as usize;
    unscaled.mul_pow5(e.unsigned_abs());
    let digits = unscaled.to_decimal();
    let adjusted = digits.len() as i64 - 1 - scale as i64;
    if adjusted < -6 {
        let (first, rest) = digits.split_at(1);
        let rest = if rest.is_empty() {
            String::new()
        } else {
            format!(".{rest}")
        };
        return format!("{sign}{first}{rest}E{adjusted}");
    }
    if digits.len() > scale {
        let (int, frac) = digits.split_at(digits.len() - scale);
        format!("{sign}{int}.{frac}")
    } else {
        format!("{sign}0.{}{digits}", "0".repeat(scale - digits.len()))
    }
}

/// `Double.toString` rendering used in harness output.
pub fn java_double_string(v: f64) -> String {
    if v.is_nan() {
        return "NaN".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0.0" } else { "0.0" }.to_owned();
    }
    let magnitude = v.abs();
    if (1e-3..1e7).contains(&magnitude) {
        let plain = v.to_string();
        if plain.contains('.') {
            plain
        } else {
            format!("{plain}.0")
        }
    } else {
        let sci = format!("{v:e}");
        let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
        if mantissa.contains('.') {
            format!("{mantissa}E{exponent}")
        } else {
            format!("{mantissa}.0E{exponent}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortest_digits_and_position() {
        let d = ShortestDigits::of(99.999);
        assert_eq!(d.digits, b"99999");
        assert_eq!(d.decimal_at, 2);
        let d = ShortestDigits::of(0.0009);
        assert_eq!(d.digits, b"9");
        assert_eq!(d.decimal_at, -3);
        let d = ShortestDigits::of(1200.0);
        assert_eq!(d.digits, b"12");
        assert_eq!(d.decimal_at, 4);
        assert!(d.exact);
    }

    #[test]
    fn test_rounding_direction_of_shortest_digits() {
        // 0.15 is stored as 0.1499999999999999944...
        let d = ShortestDigits::of(0.15);
        assert!(d.rounded_up);
        assert!(!d.exact);
        // 0.45 is stored as 0.4500000000000000111...
        let d = ShortestDigits::of(0.45);
        assert!(!d.rounded_up);
        assert!(!d.exact);
        let d = ShortestDigits::of(0.75);
        assert!(!d.rounded_up);
        assert!(d.exact);
        assert!(ShortestDigits::of(99.999).rounded_up);
        assert!(!ShortestDigits::of(6.2088).rounded_up);
        assert!(ShortestDigits::of(6.2089).rounded_up);
    }

    #[test]
    fn test_zero_has_no_digits() {
        let d = ShortestDigits::of(0.0);
        assert!(d.digits.is_empty());
        assert!(d.exact);
        assert_eq!(ShortestDigits::of(-0.0), d);
    }

    #[test]
    fn test_exact_decimal_string() {
        assert_eq!(
            exact_decimal_string(0.15),
            "0.1499999999999999944488848768742172978818416595458984375"
        );
        assert_eq!(exact_decimal_string(0.5), "0.5");
        assert_eq!(exact_decimal_string(2.0), "2");
        assert_eq!(exact_decimal_string(-0.25), "-0.25");
        assert_eq!(exact_decimal_string(0.0), "0");
        assert_eq!(exact_decimal_string(1e20), "100000000000000000000");
        assert_eq!(
            exact_decimal_string(1e-7),
            "9.99999999999999954748111825886258685613938723690807819366455078125E-8"
        );
    }

    #[test]
    fn test_java_double_string() {
        assert_eq!(java_double_string(99.9989), "99.9989");
        assert_eq!(java_double_string(0.9500006), "0.9500006");
        assert_eq!(java_double_string(100.0), "100.0");
        assert_eq!(java_double_string(0.0), "0.0");
        assert_eq!(java_double_string(-0.0), "-0.0");
        assert_eq!(java_double_string(1e-4), "1.0E-4");
        assert_eq!(java_double_string(1.5e10), "1.5E10");
        assert_eq!(java_double_string(f64::NAN), "NaN");
    }

    #[test]
    fn test_big_arithmetic() {
        let mut n = Big::from_u64(u64::MAX);
        n.mul_add_small(10, 5);
        assert_eq!(n.to_decimal(), "184467440737095516155");
        let mut p = Big::from_u64(1);
        p.mul_pow10(30);
        assert_eq!(p.to_decimal(), format!("1{}", "0".repeat(30)));
        assert!(p > n);
        let mut s = Big::from_u64(3);
        s.shl(70);
        assert_eq!(s.to_decimal(), "3541774862152233910272");
    }
}
