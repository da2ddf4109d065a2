//! Fixed-point money and percentage rates.
//!
//! All monetary amounts are non-negative integers in the smallest currency unit
//! (two decimal places, e.g. paise/cents). Percentages are held in basis points.
//! No floating-point value ever participates in billing arithmetic.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

const MINOR_PER_MAJOR: u64 = 100;
const BASIS_POINTS_PER_WHOLE: u64 = 10_000;

/// Non-negative amount in minor currency units.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl ValueObject for Money {}

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Build from whole major units (e.g. `from_major(5)` is `5.00`).
    pub fn from_major(major: u64) -> DomainResult<Self> {
        major
            .checked_mul(MINOR_PER_MAJOR)
            .map(Self)
            .ok_or_else(|| DomainError::validation("amount too large"))
    }

    /// Accepts a signed wire value; negative amounts are a validation failure.
    pub fn try_from_signed(minor: i64) -> DomainResult<Self> {
        u64::try_from(minor)
            .map(Self)
            .map_err(|_| DomainError::validation("amount must be non-negative"))
    }

    pub const fn minor(self) -> u64 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn saturating_sub(self, other: Money) -> Money {
        Money(self.0.saturating_sub(other.0))
    }

    pub fn checked_mul(self, factor: u64) -> Option<Money> {
        self.0.checked_mul(factor).map(Money)
    }

    /// Overflow-checked sum; overflow is an invariant violation.
    pub fn try_sum<I>(amounts: I) -> DomainResult<Money>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts.into_iter().try_fold(Money::ZERO, |acc, m| {
            acc.checked_add(m)
                .ok_or_else(|| DomainError::invariant("money overflow"))
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / MINOR_PER_MAJOR, self.0 % MINOR_PER_MAJOR)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    /// Parses `"450"`, `"450.5"` or `"450.50"`. At most two decimal places.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let minor = parse_fixed(s.trim(), 2, "amount")?;
        Ok(Money(minor))
    }
}

/// Percentage expressed in basis points (1% = 100 bp), bounded to 0..=100%.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DiscountRate(u32);

impl ValueObject for DiscountRate {}

impl DiscountRate {
    pub const ZERO: DiscountRate = DiscountRate(0);

    pub fn from_basis_points(bp: u32) -> DomainResult<Self> {
        if u64::from(bp) > BASIS_POINTS_PER_WHOLE {
            return Err(DomainError::validation(format!(
                "discount rate must be between 0% and 100% (got {bp} bp)"
            )));
        }
        Ok(Self(bp))
    }

    pub fn from_percent(percent: u32) -> DomainResult<Self> {
        let bp = percent
            .checked_mul(100)
            .ok_or_else(|| DomainError::validation("discount rate out of range"))?;
        Self::from_basis_points(bp)
    }

    pub const fn basis_points(self) -> u32 {
        self.0
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Discount owed on `amount`, rounded half-up to the nearest minor unit.
    ///
    /// Never exceeds `amount` because the rate is capped at 100%.
    pub fn discount_on(self, amount: Money) -> Money {
        let scaled = u128::from(amount.minor()) * u128::from(self.0);
        let half = u128::from(BASIS_POINTS_PER_WHOLE / 2);
        let rounded = (scaled + half) / u128::from(BASIS_POINTS_PER_WHOLE);
        // rate <= 100% so rounded <= amount, which fits in u64
        Money(rounded as u64)
    }

    /// Returns `(discount, final_amount)`; `final_amount` is clamped at zero.
    pub fn apply(self, amount: Money) -> (Money, Money) {
        let discount = self.discount_on(amount);
        (discount, amount.saturating_sub(discount))
    }
}

impl TryFrom<u32> for DiscountRate {
    type Error = DomainError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_basis_points(value)
    }
}

impl From<DiscountRate> for u32 {
    fn from(value: DiscountRate) -> Self {
        value.0
    }
}

impl fmt::Display for DiscountRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 100;
        let frac = self.0 % 100;
        if frac == 0 {
            write!(f, "{whole}%")
        } else {
            write!(f, "{whole}.{frac:02}%")
        }
    }
}

impl FromStr for DiscountRate {
    type Err = DomainError;

    /// Parses a percentage such as `"10"`, `"12.5"` or `"12.5%"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_suffix('%').unwrap_or(s).trim();
        let bp = parse_fixed(s, 2, "discount rate")?;
        let bp = u32::try_from(bp).map_err(|_| DomainError::validation("discount rate out of range"))?;
        Self::from_basis_points(bp)
    }
}

/// Parse a non-negative decimal string into an integer scaled by `10^scale`.
fn parse_fixed(s: &str, scale: u32, what: &str) -> DomainResult<u64> {
    if s.is_empty() {
        return Err(DomainError::validation(format!("{what} is empty")));
    }
    if s.starts_with('-') {
        return Err(DomainError::validation(format!("{what} must be non-negative")));
    }

    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(DomainError::validation(format!("{what} is malformed: {s:?}")));
    }
    if frac_part.len() > scale as usize {
        return Err(DomainError::validation(format!(
            "{what} has more than {scale} decimal places: {s:?}"
        )));
    }
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if !all_digits(int_part) || !all_digits(frac_part) {
        return Err(DomainError::validation(format!("{what} is malformed: {s:?}")));
    }

    let overflow = || DomainError::validation(format!("{what} too large: {s:?}"));
    let int: u64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().map_err(|_| overflow())?
    };
    let mut frac: u64 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().map_err(|_| overflow())?
    };
    for _ in frac_part.len()..scale as usize {
        frac *= 10;
    }

    int.checked_mul(10u64.pow(scale))
        .and_then(|v| v.checked_add(frac))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ten_percent_of_five_hundred() {
        let rate = DiscountRate::from_percent(10).unwrap();
        let (discount, final_amount) = rate.apply(Money::from_minor(500));
        assert_eq!(discount, Money::from_minor(50));
        assert_eq!(final_amount, Money::from_minor(450));
    }

    #[test]
    fn discount_rounds_half_up() {
        // 12.5% of 0.05 = 0.00625 -> 0.01
        let rate: DiscountRate = "12.5".parse().unwrap();
        assert_eq!(rate.discount_on(Money::from_minor(5)), Money::from_minor(1));
        // 12.5% of 0.03 = 0.00375 -> 0.00
        assert_eq!(rate.discount_on(Money::from_minor(3)), Money::ZERO);
    }

    #[test]
    fn full_discount_clamps_to_zero() {
        let rate = DiscountRate::from_percent(100).unwrap();
        assert_eq!(rate.apply(Money::from_minor(999)), (Money::from_minor(999), Money::ZERO));
    }

    #[test]
    fn rates_above_one_hundred_percent_are_rejected() {
        assert!(DiscountRate::from_percent(101).is_err());
        assert!(DiscountRate::from_basis_points(10_001).is_err());
        assert!("100.01".parse::<DiscountRate>().is_err());
    }

    #[test]
    fn money_parses_and_displays() {
        assert_eq!("450".parse::<Money>().unwrap(), Money::from_minor(45_000));
        assert_eq!("450.5".parse::<Money>().unwrap(), Money::from_minor(45_050));
        assert_eq!(".75".parse::<Money>().unwrap(), Money::from_minor(75));
        assert_eq!(Money::from_minor(45_005).to_string(), "450.05");
    }

    #[test]
    fn money_rejects_negative_and_excess_precision() {
        assert!("-1".parse::<Money>().is_err());
        assert!("1.001".parse::<Money>().is_err());
        assert!("1.2.3".parse::<Money>().is_err());
        assert!(Money::try_from_signed(-5).is_err());
        assert_eq!(Money::try_from_signed(5).unwrap(), Money::from_minor(5));
    }

    #[test]
    fn discount_rate_serde_enforces_bounds() {
        let ok: DiscountRate = serde_json::from_str("1000").unwrap();
        assert_eq!(ok, DiscountRate::from_percent(10).unwrap());
        assert!(serde_json::from_str::<DiscountRate>("20000").is_err());
    }

    #[test]
    fn try_sum_detects_overflow() {
        let err = Money::try_sum([Money::from_minor(u64::MAX), Money::from_minor(1)]).unwrap_err();
        assert_eq!(err.kind(), "invariant_violation");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: discount + final amount always reconstitutes the original amount.
        #[test]
        fn discount_split_is_lossless(amount in 0u64..1_000_000_000u64, bp in 0u32..=10_000u32) {
            let rate = DiscountRate::from_basis_points(bp).unwrap();
            let (discount, final_amount) = rate.apply(Money::from_minor(amount));
            prop_assert!(discount.minor() <= amount);
            prop_assert_eq!(discount.minor() + final_amount.minor(), amount);
        }
    }
}
