//! Fixed-point decimal formatting in the shape of an English-locale
//! `DecimalFormat`: optional `,` grouping every three integer digits, at
//! least one integer digit, no forced fraction digits.

use digitfix_error::Result;
use digitfix_patch::RoundingMode;
use serde::{Deserialize, Serialize};

use crate::digit_list::DigitList;
use crate::oracle::RoundingOracle;

const GROUPING_SIZE: usize = 3;
const MINIMUM_INTEGER_DIGITS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberFormat {
    pub maximum_fraction_digits: i32,
    pub grouping: bool,
    pub rounding_mode: RoundingMode,
}

impl Default for NumberFormat {
    /// `NumberFormat.getInstance(Locale.ENGLISH)`.
    fn default() -> Self {
        Self {
            maximum_fraction_digits: 3,
            grouping: true,
            rounding_mode: RoundingMode::HalfEven,
        }
    }
}

impl NumberFormat {
    #[must_use]
    pub const fn with_maximum_fraction_digits(mut self, digits: i32) -> Self {
        self.maximum_fraction_digits = digits;
        self
    }

    #[must_use]
    pub const fn with_grouping(mut self, grouping: bool) -> Self {
        self.grouping = grouping;
        self
    }

    #[must_use]
    pub const fn with_rounding_mode(mut self, mode: RoundingMode) -> Self {
        self.rounding_mode = mode;
        self
    }

    /// Format `value`, asking `oracle` for every rounding decision.
    pub fn format(&self, value: f64, oracle: &mut dyn RoundingOracle) -> Result<String> {
        if value.is_nan() {
            return Ok("\u{FFFD}".to_owned());
        }
        let negative = value < 0.0 || (value == 0.0 && value.is_sign_negative());
        let prefix = if negative { "-" } else { "" };
        if value.is_infinite() {
            return Ok(format!("{prefix}\u{221E}"));
        }

        let mut list = DigitList::new(self.rounding_mode);
        list.set(
            negative,
            value.abs(),
            self.maximum_fraction_digits.max(0),
            true,
            oracle,
        )?;

        let mut out = String::from(prefix);
        self.integer_part(&list, &mut out);
        self.fraction_part(&list, &mut out);
        Ok(out)
    }

    fn integer_part(&self, list: &DigitList, out: &mut String) {
        let integer_digits = usize::try_from(list.decimal_at)
            .unwrap_or(0)
            .max(MINIMUM_INTEGER_DIGITS);
        let mut index = 0;
        for i in (0..integer_digits).rev() {
            let in_digits = i < usize::try_from(list.decimal_at).unwrap_or(0);
            if in_digits && index < list.count {
                out.push(char::from(list.digits[index]));
                index += 1;
            } else {
                out.push('0');
            }
            if self.grouping && i > 0 && i % GROUPING_SIZE == 0 {
                out.push(',');
            }
        }
    }

    fn fraction_part(&self, list: &DigitList, out: &mut String) {
        let integer_used = usize::try_from(list.decimal_at).unwrap_or(0).min(list.count);
        if integer_used >= list.count {
            return;
        }
        out.push('.');
        let mut index = integer_used;
        for i in 0..self.maximum_fraction_digits.max(0) {
            if index >= list.count {
                break;
            }
            // Zeros between the point and the first significant digit.
            if -1 - i > list.decimal_at - 1 {
                out.push('0');
                continue;
            }
            out.push(char::from(list.digits[index]));
            index += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ReferenceOracle;

    fn fmt(format: NumberFormat, v: f64) -> String {
        format.format(v, &mut ReferenceOracle).expect("format")
    }

    #[test]
    fn test_grouping_and_fraction() {
        let f = NumberFormat::default().with_maximum_fraction_digits(2);
        assert_eq!(fmt(f, 1234.5678), "1,234.57");
        assert_eq!(fmt(f, 1_234_567.0), "1,234,567");
        assert_eq!(fmt(f.with_grouping(false), 1_234_567.0), "1234567");
    }

    #[test]
    fn test_leading_fraction_zeros() {
        let f = NumberFormat::default();
        assert_eq!(fmt(f, 0.0009), "0.001");
        assert_eq!(fmt(f, 0.0004), "0");
        assert_eq!(fmt(f, 0.05), "0.05");
    }

    #[test]
    fn test_integer_zeros_past_digits() {
        let f = NumberFormat::default()
            .with_maximum_fraction_digits(2)
            .with_rounding_mode(RoundingMode::HalfUp);
        assert_eq!(fmt(f, 99.999), "100");
        assert_eq!(fmt(f, 999_999.999), "1,000,000");
        assert_eq!(fmt(f, 1200.0), "1,200");
    }

    #[test]
    fn test_negative_values_keep_sign() {
        let f = NumberFormat::default()
            .with_maximum_fraction_digits(2)
            .with_rounding_mode(RoundingMode::HalfUp);
        assert_eq!(fmt(f, -1.005), "-1");
        assert_eq!(fmt(f, -2.5), "-2.5");
        assert_eq!(fmt(f, -0.001), "-0");
        assert_eq!(fmt(f, 0.0), "0");
    }

    #[test]
    fn test_zero_fraction_digits() {
        let f = NumberFormat::default()
            .with_maximum_fraction_digits(0)
            .with_rounding_mode(RoundingMode::HalfUp);
        assert_eq!(fmt(f, 2.5), "3");
        assert_eq!(fmt(f, 0.5), "1");
        assert_eq!(fmt(f.with_rounding_mode(RoundingMode::HalfEven), 2.5), "2");
    }

    #[test]
    fn test_non_finite() {
        let f = NumberFormat::default();
        assert_eq!(fmt(f, f64::NAN), "\u{FFFD}");
        assert_eq!(fmt(f, f64::NEG_INFINITY), "-\u{221E}");
    }
}
