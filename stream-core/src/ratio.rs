//! Exact rational numbers for exchange rates
//!
//! Exchange-rate bounds are built from observed (sent, received) amount pairs,
//! so they are always exact fractions of u64 values. Products with an amount
//! are computed in 256 bits and never lose precision; results that do not fit
//! in a u64 saturate.

use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;

/// Non-negative rational number
#[derive(Debug, Clone, Copy)]
pub struct Ratio {
    numerator: u128,
    denominator: u128,
}

impl Ratio {
    /// Zero
    pub const ZERO: Ratio = Ratio {
        numerator: 0,
        denominator: 1,
    };

    /// One
    pub const ONE: Ratio = Ratio {
        numerator: 1,
        denominator: 1,
    };

    /// Create from parts; `None` for a zero denominator
    pub fn new(numerator: u128, denominator: u128) -> Option<Self> {
        if denominator == 0 {
            return None;
        }
        Some(Self {
            numerator,
            denominator,
        })
    }

    /// `numerator / denominator` from two amounts
    pub fn from_amounts(numerator: u64, denominator: u64) -> Option<Self> {
        Self::new(numerator as u128, denominator as u128)
    }

    /// Whole number
    pub fn from_integer(value: u64) -> Self {
        Self {
            numerator: value as u128,
            denominator: 1,
        }
    }

    /// Exact conversion from a decimal; `None` if negative
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return None;
        }
        let numerator = value.mantissa().unsigned_abs();
        let denominator = 10u128.pow(value.scale());
        Self::new(numerator, denominator).map(Ratio::reduced)
    }

    /// Numerator
    pub fn numerator(&self) -> u128 {
        self.numerator
    }

    /// Denominator
    pub fn denominator(&self) -> u128 {
        self.denominator
    }

    /// Is the value zero
    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }

    /// Is the value strictly positive
    pub fn is_positive(&self) -> bool {
        self.numerator > 0
    }

    /// Same value in lowest terms
    pub fn reduced(self) -> Self {
        let divisor = gcd(self.numerator, self.denominator);
        if divisor <= 1 {
            return self;
        }
        Self {
            numerator: self.numerator / divisor,
            denominator: self.denominator / divisor,
        }
    }

    /// `1 / self`; `None` when zero
    pub fn reciprocal(&self) -> Option<Self> {
        Self::new(self.denominator, self.numerator)
    }

    /// Largest integer not above the value
    pub fn floor(&self) -> u128 {
        self.numerator / self.denominator
    }

    /// Smallest integer not below the value
    pub fn ceil(&self) -> u128 {
        let quotient = self.numerator / self.denominator;
        if self.numerator % self.denominator == 0 {
            quotient
        } else {
            quotient + 1
        }
    }

    /// `floor(self × amount)`, saturating at `u64::MAX`
    pub fn multiply_floor(&self, amount: u64) -> u64 {
        match mul_div(self.numerator, amount as u128, self.denominator) {
            Some((quotient, _)) => saturate(quotient),
            None => u64::MAX,
        }
    }

    /// `ceil(self × amount)`, saturating at `u64::MAX`
    pub fn multiply_ceil(&self, amount: u64) -> u64 {
        match mul_div(self.numerator, amount as u128, self.denominator) {
            Some((quotient, 0)) => saturate(quotient),
            Some((quotient, _)) => saturate(quotient.saturating_add(1)),
            None => u64::MAX,
        }
    }

    /// `self − other`; `None` if negative or not representable
    pub fn checked_sub(&self, other: &Ratio) -> Option<Ratio> {
        let left = self.numerator.checked_mul(other.denominator)?;
        let right = other.numerator.checked_mul(self.denominator)?;
        let numerator = left.checked_sub(right)?;
        let denominator = self.denominator.checked_mul(other.denominator)?;
        Ratio::new(numerator, denominator).map(Ratio::reduced)
    }

    /// Tie-break between numerically equal ratios: the smaller denominator wins
    pub fn is_more_precise_than(&self, other: &Ratio) -> bool {
        self.denominator < other.denominator
    }

    /// Lossy conversion for logs
    pub fn to_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

impl PartialEq for Ratio {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ratio {}

impl PartialOrd for Ratio {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ratio {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_fractions(
            self.numerator,
            self.denominator,
            other.numerator,
            other.denominator,
        )
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

fn saturate(value: u128) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Compare `a/b` with `c/d` by continued-fraction expansion (no overflow).
fn compare_fractions(mut a: u128, mut b: u128, mut c: u128, mut d: u128) -> Ordering {
    loop {
        let (qa, ra) = (a / b, a % b);
        let (qc, rc) = (c / d, c % d);

        let ordering = if qa != qc {
            Some(qa.cmp(&qc))
        } else {
            match (ra == 0, rc == 0) {
                (true, true) => Some(Ordering::Equal),
                (true, false) => Some(Ordering::Less),
                (false, true) => Some(Ordering::Greater),
                (false, false) => None,
            }
        };

        if let Some(ordering) = ordering {
            return ordering;
        }

        // ra/b vs rc/d orders the same as d/rc vs b/ra
        (a, b, c, d) = (d, rc, b, ra);
    }
}

/// Full 256-bit product of two u128 values as (high, low)
fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a_hi, a_lo) = (a >> 64, a & MASK);
    let (b_hi, b_lo) = (b >> 64, b & MASK);

    let lo_lo = a_lo * b_lo;
    let hi_lo = a_hi * b_lo;
    let lo_hi = a_lo * b_hi;
    let hi_hi = a_hi * b_hi;

    let cross = (lo_lo >> 64) + (hi_lo & MASK) + (lo_hi & MASK);
    let low = (cross << 64) | (lo_lo & MASK);
    let high = hi_hi + (hi_lo >> 64) + (lo_hi >> 64) + (cross >> 64);
    (high, low)
}

/// `(a × b) / d` as (quotient, remainder); `None` if the quotient exceeds u128
fn mul_div(a: u128, b: u128, d: u128) -> Option<(u128, u128)> {
    let (high, low) = widening_mul(a, b);
    if high == 0 {
        return Some((low / d, low % d));
    }
    if high >= d {
        return None;
    }

    // Shift-subtract long division of (high, low) by d
    let mut remainder = high;
    let mut quotient: u128 = 0;
    for bit in (0..128).rev() {
        let carry = remainder >> 127;
        remainder = (remainder << 1) | ((low >> bit) & 1);
        quotient <<= 1;
        if carry == 1 || remainder >= d {
            remainder = remainder.wrapping_sub(d);
            quotient |= 1;
        }
    }
    Some((quotient, remainder))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str_exact(value).unwrap()
    }

    fn ratio(numerator: u128, denominator: u128) -> Ratio {
        Ratio::new(numerator, denominator).unwrap()
    }

    #[test]
    fn test_zero_denominator_rejected() {
        assert!(Ratio::new(1, 0).is_none());
        assert!(Ratio::ZERO.reciprocal().is_none());
    }

    #[test]
    fn test_numeric_equality_ignores_representation() {
        assert_eq!(ratio(1, 2), ratio(2, 4));
        assert!(ratio(1, 3) < ratio(1, 2));
        assert!(ratio(7, 3) > ratio(2, 1));
        assert!(ratio(2, 4).is_more_precise_than(&ratio(3, 6)));
        assert!(!ratio(3, 6).is_more_precise_than(&ratio(1, 2)));
    }

    #[test]
    fn test_compare_with_equal_integer_parts() {
        assert_eq!(ratio(1, 3).cmp(&ratio(1, 2)), Ordering::Less);
        assert_eq!(ratio(3, 2).cmp(&ratio(5, 3)), Ordering::Less);
        assert_eq!(ratio(5, 3).cmp(&ratio(3, 2)), Ordering::Greater);
        // Two levels of expansion: 13/8 = 1 + 1/(1 + 3/5), 18/11 = 1 + 1/(1 + 4/7)
        assert!(ratio(13, 8) < ratio(18, 11));
        assert_eq!(ratio(7, 10).cmp(&ratio(14, 20)), Ordering::Equal);
        assert!(ratio(699, 1_000) < ratio(7, 10));
        assert!(ratio(701, 1_000) > ratio(7, 10));
    }

    #[test]
    fn test_compare_large_values_without_overflow() {
        let a = ratio(u128::MAX - 1, u128::MAX);
        let b = ratio(u128::MAX - 2, u128::MAX - 1);
        // (n-1)/n > (n-2)/(n-1)
        assert!(a > b);
        assert_eq!(ratio(u128::MAX, u128::MAX), Ratio::ONE);
    }

    #[test]
    fn test_floor_and_ceil() {
        assert_eq!(ratio(7, 2).floor(), 3);
        assert_eq!(ratio(7, 2).ceil(), 4);
        assert_eq!(ratio(8, 2).ceil(), 4);
        assert_eq!(Ratio::ZERO.ceil(), 0);
    }

    #[test]
    fn test_multiply() {
        let rate = ratio(3, 2);
        assert_eq!(rate.multiply_floor(5), 7);
        assert_eq!(rate.multiply_ceil(5), 8);
        assert_eq!(rate.multiply_ceil(4), 6);
        assert_eq!(rate.multiply_floor(0), 0);
    }

    #[test]
    fn test_multiply_wide_products() {
        // u64::MAX × u64::MAX / u64::MAX needs 128+ bits in the middle
        let rate = ratio(u64::MAX as u128, u64::MAX as u128);
        assert_eq!(rate.multiply_floor(u64::MAX), u64::MAX);

        let rate = ratio(u128::MAX, u128::MAX - 1);
        assert_eq!(rate.multiply_floor(1_000), 1_000);
        assert_eq!(rate.multiply_ceil(1_000), 1_001);

        // Saturates instead of wrapping
        assert_eq!(ratio(3, 1).multiply_floor(u64::MAX), u64::MAX);
        assert_eq!(ratio(u128::MAX, 1).multiply_ceil(u64::MAX), u64::MAX);
    }

    #[test]
    fn test_checked_sub() {
        assert_eq!(ratio(3, 4).checked_sub(&ratio(1, 2)), Some(ratio(1, 4)));
        assert_eq!(ratio(1, 2).checked_sub(&ratio(1, 2)), Some(Ratio::ZERO));
        assert!(ratio(1, 4).checked_sub(&ratio(1, 2)).is_none());
    }

    #[test]
    fn test_from_decimal() {
        assert_eq!(Ratio::from_decimal(dec("0.75")), Some(ratio(3, 4)));
        assert_eq!(Ratio::from_decimal(dec("12")), Some(Ratio::from_integer(12)));
        assert_eq!(Ratio::from_decimal(dec("0")), Some(Ratio::ZERO));
        assert!(Ratio::from_decimal(dec("-1.5")).is_none());

        let reduced = Ratio::from_decimal(dec("0.50")).unwrap();
        assert_eq!(reduced.numerator(), 1);
        assert_eq!(reduced.denominator(), 2);
    }
}
