//! Numeric value codecs shared by host writes and merges.
//!
//! Values are stored as decimal text. Float64 is written as the shortest
//! string that round-trips; BigDecimal keeps at most 34 significant digits,
//! truncated toward zero, written without exponent or trailing zeros.

use super::NumericType;
use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use std::cmp::Ordering;
use std::str::FromStr;

/// Significant digits kept by BigDecimal values.
pub const BIG_DECIMAL_DIGITS: u64 = 34;

/// A parsed numeric store value.
#[derive(Debug, Clone, PartialEq)]
pub enum Numeric {
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Arbitrary precision integer.
    BigInt(BigInt),
    /// Arbitrary precision decimal.
    BigDecimal(BigDecimal),
}

impl Numeric {
    /// Parse decimal text as `ty`. Returns `None` when it is not a number.
    pub fn parse(ty: NumericType, raw: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(raw).ok()?.trim();
        match ty {
            NumericType::Int64 => text.parse().ok().map(Self::Int64),
            NumericType::Float64 => text.parse().ok().map(Self::Float64),
            NumericType::BigInt => BigInt::from_str(text).ok().map(Self::BigInt),
            NumericType::BigDecimal => BigDecimal::from_str(text).ok().map(Self::BigDecimal),
        }
    }

    /// Zero of type `ty`.
    pub fn zero(ty: NumericType) -> Self {
        match ty {
            NumericType::Int64 => Self::Int64(0),
            NumericType::Float64 => Self::Float64(0.0),
            NumericType::BigInt => Self::BigInt(BigInt::zero()),
            NumericType::BigDecimal => Self::BigDecimal(BigDecimal::zero()),
        }
    }

    /// Type of this value.
    pub fn numeric_type(&self) -> NumericType {
        match self {
            Self::Int64(_) => NumericType::Int64,
            Self::Float64(_) => NumericType::Float64,
            Self::BigInt(_) => NumericType::BigInt,
            Self::BigDecimal(_) => NumericType::BigDecimal,
        }
    }

    /// Sum of two values of the same type. Int64 wraps on overflow.
    pub fn add(&self, other: &Self) -> Option<Self> {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => Some(Self::Int64(a.wrapping_add(*b))),
            (Self::Float64(a), Self::Float64(b)) => Some(Self::Float64(a + b)),
            (Self::BigInt(a), Self::BigInt(b)) => Some(Self::BigInt(a + b)),
            (Self::BigDecimal(a), Self::BigDecimal(b)) => {
                Some(Self::BigDecimal(truncate_digits(&(a + b))))
            }
            _ => None,
        }
    }

    /// Ordering between two values of the same type.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => a.partial_cmp(b),
            (Self::BigInt(a), Self::BigInt(b)) => Some(a.cmp(b)),
            (Self::BigDecimal(a), Self::BigDecimal(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// The smaller of two values; `self` wins ties.
    pub fn min(self, other: Self) -> Self {
        match self.compare(&other) {
            Some(Ordering::Greater) => other,
            _ => self,
        }
    }

    /// The larger of two values; `self` wins ties.
    pub fn max(self, other: Self) -> Self {
        match self.compare(&other) {
            Some(Ordering::Less) => other,
            _ => self,
        }
    }

    /// Decimal text of this value.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Int64(v) => v.to_string().into_bytes(),
            Self::Float64(v) => v.to_string().into_bytes(),
            Self::BigInt(v) => v.to_string().into_bytes(),
            Self::BigDecimal(v) => format_plain(&truncate_digits(v)).into_bytes(),
        }
    }
}

/// Truncate toward zero to [`BIG_DECIMAL_DIGITS`] significant digits.
pub fn truncate_digits(value: &BigDecimal) -> BigDecimal {
    let (mantissa, scale) = value.as_bigint_and_exponent();
    let digits = mantissa.abs().to_string().len() as u64;
    if digits <= BIG_DECIMAL_DIGITS {
        return value.clone();
    }
    let drop = digits - BIG_DECIMAL_DIGITS;
    let divisor = num_traits::pow(BigInt::from(10u8), drop as usize);
    // BigInt division truncates toward zero.
    let kept = mantissa / divisor;
    BigDecimal::new(kept, scale - drop as i64)
}

/// Plain decimal text: no exponent, no trailing fractional zeros.
pub fn format_plain(value: &BigDecimal) -> String {
    let (mut mantissa, mut scale) = value.as_bigint_and_exponent();
    if mantissa.is_zero() {
        return "0".to_string();
    }
    let ten = BigInt::from(10u8);
    while scale > 0 && (&mantissa % &ten).is_zero() {
        mantissa /= &ten;
        scale -= 1;
    }

    let negative = mantissa.is_negative();
    let digits = mantissa.abs().to_string();
    let body = if scale <= 0 {
        let mut s = digits;
        s.extend(std::iter::repeat('0').take((-scale) as usize));
        s
    } else {
        let scale = scale as usize;
        if digits.len() > scale {
            let (int_part, frac_part) = digits.split_at(digits.len() - scale);
            format!("{int_part}.{frac_part}")
        } else {
            format!("0.{}{}", "0".repeat(scale - digits.len()), digits)
        }
    };
    if negative {
        format!("-{body}")
    } else {
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn parse_each_type() {
        assert_eq!(
            Numeric::parse(NumericType::Int64, b"-42"),
            Some(Numeric::Int64(-42))
        );
        assert_eq!(
            Numeric::parse(NumericType::Float64, b"1.5"),
            Some(Numeric::Float64(1.5))
        );
        assert_eq!(
            Numeric::parse(NumericType::BigInt, b"123456789012345678901234567890"),
            Some(Numeric::BigInt(
                BigInt::from_str("123456789012345678901234567890").unwrap()
            ))
        );
        assert!(Numeric::parse(NumericType::Int64, b"abc").is_none());
        assert!(Numeric::parse(NumericType::BigInt, b"1.5").is_none());
    }

    #[test]
    fn int64_add_wraps() {
        let sum = Numeric::Int64(i64::MAX).add(&Numeric::Int64(1)).unwrap();
        assert_eq!(sum, Numeric::Int64(i64::MIN));
    }

    #[test]
    fn mismatched_types_do_not_combine() {
        assert!(Numeric::Int64(1).add(&Numeric::Float64(1.0)).is_none());
    }

    #[test]
    fn float_formatting_is_shortest_roundtrip() {
        assert_eq!(Numeric::Float64(0.1 + 0.2).to_bytes(), b"0.30000000000000004");
        assert_eq!(Numeric::Float64(3.0).to_bytes(), b"3");
    }

    #[test]
    fn bigdecimal_plain_formatting() {
        assert_eq!(format_plain(&dec("1.2300")), "1.23");
        assert_eq!(format_plain(&dec("1e3")), "1000");
        assert_eq!(format_plain(&dec("-0.005")), "-0.005");
        assert_eq!(format_plain(&dec("0.000")), "0");
        assert_eq!(format_plain(&dec("10")), "10");
    }

    #[test]
    fn bigdecimal_truncates_to_34_digits() {
        let long = dec("1.23456789012345678901234567890123456789");
        let truncated = truncate_digits(&long);
        assert_eq!(
            format_plain(&truncated),
            "1.234567890123456789012345678901234"
        );

        let negative = dec("-9.99999999999999999999999999999999999999");
        assert_eq!(
            format_plain(&truncate_digits(&negative)),
            "-9.999999999999999999999999999999999"
        );
    }

    #[test]
    fn bigdecimal_add_is_exact_for_small_values() {
        let sum = Numeric::BigDecimal(dec("0.1"))
            .add(&Numeric::BigDecimal(dec("0.2")))
            .unwrap();
        assert_eq!(sum.to_bytes(), b"0.3");
    }

    #[test]
    fn min_max() {
        assert_eq!(Numeric::Int64(3).min(Numeric::Int64(5)), Numeric::Int64(3));
        assert_eq!(Numeric::Int64(3).max(Numeric::Int64(5)), Numeric::Int64(5));
        let a = Numeric::BigInt(BigInt::from(-7));
        let b = Numeric::BigInt(BigInt::from(2));
        assert_eq!(a.clone().max(b.clone()), b);
        assert_eq!(a.clone().min(b), a);
    }
}
