//! Decimal digit buffer that formatting rounds through.
//!
//! Mirrors the fields `DigitList.shouldRoundUp` reads, so every rounding
//! decision can be delegated to a [`RoundingOracle`] running the class under
//! test.

use digitfix_error::Result;
use digitfix_patch::RoundingMode;

use crate::exact::ShortestDigits;
use crate::oracle::RoundingOracle;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitList {
    /// ASCII digits; only the first `count` are significant.
    pub digits: Vec<u8>,
    pub count: usize,
    pub decimal_at: i32,
    pub is_negative: bool,
    pub rounding_mode: RoundingMode,
}

impl DigitList {
    pub fn new(rounding_mode: RoundingMode) -> Self {
        Self {
            digits: Vec::new(),
            count: 0,
            decimal_at: 0,
            is_negative: false,
            rounding_mode,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.digits[..self.count].iter().all(|&d| d == b'0')
    }

    /// Significant digits as text.
    pub fn significant(&self) -> &str {
        std::str::from_utf8(&self.digits[..self.count]).unwrap_or("")
    }

    /// Load `source` (non-negative) and round it to `maximum_digits`, counted
    /// after the decimal point when `fixed_point` is set.
    pub fn set(
        &mut self,
        is_negative: bool,
        source: f64,
        maximum_digits: i32,
        fixed_point: bool,
        oracle: &mut dyn RoundingOracle,
    ) -> Result<()> {
        let shortest = ShortestDigits::of(source);
        self.is_negative = is_negative;
        self.count = shortest.digits.len();
        self.digits = shortest.digits;
        self.decimal_at = if self.count == 0 { 0 } else { shortest.decimal_at };

        if fixed_point {
            // Everything sits below the last kept position.
            if -self.decimal_at > maximum_digits {
                self.count = 0;
                return Ok(());
            }
            // Only the first digit can carry into the last kept position.
            if -self.decimal_at == maximum_digits {
                if oracle.should_round_up(self, 0, shortest.rounded_up, shortest.exact)? {
                    self.count = 1;
                    self.decimal_at += 1;
                    self.set_leading_one();
                } else {
                    self.count = 0;
                }
                return Ok(());
            }
        }

        self.trim_trailing_zeros();
        let max = if fixed_point {
            maximum_digits + self.decimal_at
        } else {
            maximum_digits
        };
        self.round(max, shortest.rounded_up, shortest.exact, oracle)
    }

    fn round(
        &mut self,
        maximum_digits: i32,
        already_rounded: bool,
        exact: bool,
        oracle: &mut dyn RoundingOracle,
    ) -> Result<()> {
        if maximum_digits < 0 || maximum_digits as usize >= self.count {
            return Ok(());
        }
        let mut max = maximum_digits;
        if oracle.should_round_up(self, max, already_rounded, exact)? {
            loop {
                max -= 1;
                if max < 0 {
                    // Carried out of the first digit: 999 becomes 1000.
                    self.set_leading_one();
                    self.decimal_at += 1;
                    max = 0;
                    break;
                }
                let digit = &mut self.digits[max as usize];
                *digit += 1;
                if *digit <= b'9' {
                    break;
                }
            }
            max += 1;
        }
        self.count = max as usize;
        self.trim_trailing_zeros();
        Ok(())
    }

    fn set_leading_one(&mut self) {
        match self.digits.first_mut() {
            Some(first) => *first = b'1',
            None => self.digits.push(b'1'),
        }
    }

    fn trim_trailing_zeros(&mut self) {
        while self.count > 1 && self.digits[self.count - 1] == b'0' {
            self.count -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ReferenceOracle;

    fn rounded(v: f64, max: i32, fixed: bool, mode: RoundingMode) -> DigitList {
        let mut list = DigitList::new(mode);
        list.set(false, v, max, fixed, &mut ReferenceOracle)
            .expect("round");
        list
    }

    #[test]
    fn test_carry_out_of_first_digit() {
        let list = rounded(99.999, 2, true, RoundingMode::HalfUp);
        assert_eq!(list.significant(), "1");
        assert_eq!(list.decimal_at, 3);
    }

    #[test]
    fn test_carry_stops_at_first_non_nine() {
        let list = rounded(1.2996, 3, true, RoundingMode::HalfUp);
        assert_eq!(list.significant(), "13");
        assert_eq!(list.decimal_at, 1);
    }

    #[test]
    fn test_digit_just_below_last_position() {
        let list = rounded(0.0009, 3, true, RoundingMode::HalfUp);
        assert_eq!(list.significant(), "1");
        assert_eq!(list.decimal_at, -2);
        let list = rounded(0.0004, 3, true, RoundingMode::HalfUp);
        assert_eq!(list.count, 0);
    }

    #[test]
    fn test_value_far_below_last_position_drops_to_zero() {
        let list = rounded(0.00009, 3, true, RoundingMode::Up);
        assert_eq!(list.count, 0);
        assert!(list.is_zero());
    }

    #[test]
    fn test_significant_digit_rounding() {
        // 123.35 is stored slightly below the tie, 123.45 slightly above.
        let list = rounded(123.35, 4, false, RoundingMode::HalfEven);
        assert_eq!(list.significant(), "1233");
        let list = rounded(123.45, 4, false, RoundingMode::HalfEven);
        assert_eq!(list.significant(), "1235");
        let list = rounded(123.25, 4, false, RoundingMode::HalfEven);
        assert_eq!(list.significant(), "1232");
    }

    #[test]
    fn test_zero_stays_empty() {
        let list = rounded(0.0, 2, true, RoundingMode::HalfUp);
        assert_eq!(list.count, 0);
        assert_eq!(list.decimal_at, 0);
    }
}
