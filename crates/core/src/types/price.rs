//! Money helpers.
//!
//! Amounts in the data model are major units (`19.99` dollars) held as
//! [`Decimal`]. The payment gateway speaks minor units (`1999` cents). Every
//! crossing between the two goes through [`to_minor_units`] or
//! [`from_minor_units`].

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Errors converting an amount to minor units.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),
    #[error("amount does not fit in minor units: {0}")]
    Overflow(Decimal),
}

/// Digits after the decimal point for every supported currency.
const MINOR_DIGITS: u32 = 2;

/// Round a major-unit amount to whole cents, half away from zero.
#[must_use]
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MINOR_DIGITS, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a major-unit amount into gateway minor units.
///
/// ```
/// use just_one_dollar_core::to_minor_units;
/// use rust_decimal::Decimal;
///
/// assert_eq!(to_minor_units(Decimal::new(1234, 2)), Ok(1234));
/// ```
///
/// # Errors
///
/// Returns [`MoneyError::Negative`] for amounts below zero and
/// [`MoneyError::Overflow`] when the cent value does not fit in an `i64`.
pub fn to_minor_units(amount: Decimal) -> Result<i64, MoneyError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(MoneyError::Negative(amount));
    }

    let cents = round_money(amount)
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or(MoneyError::Overflow(amount))?;

    i64::try_from(cents.trunc()).map_err(|_| MoneyError::Overflow(amount))
}

/// Convert gateway minor units back into a major-unit amount.
#[must_use]
pub fn from_minor_units(cents: i64) -> Decimal {
    Decimal::new(cents, MINOR_DIGITS)
}

/// ISO 4217 currency codes accepted by the checkout.
///
/// Pricing is single-currency; the code only travels to the gateway and onto
/// the payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CurrencyCode {
    #[default]
    Usd,
    Eur,
    Gbp,
    Cad,
    Aud,
}

impl CurrencyCode {
    /// Lower-case code as the gateway and the `order_payments` table expect.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usd => "usd",
            Self::Eur => "eur",
            Self::Gbp => "gbp",
            Self::Cad => "cad",
            Self::Aud => "aud",
        }
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for CurrencyCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "usd" => Ok(Self::Usd),
            "eur" => Ok(Self::Eur),
            "gbp" => Ok(Self::Gbp),
            "cad" => Ok(Self::Cad),
            "aud" => Ok(Self::Aud),
            other => Err(format!("unsupported currency: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap_or_default()
    }

    #[test]
    fn test_to_minor_units_exact() {
        assert_eq!(to_minor_units(dec("12.34")), Ok(1234));
        assert_eq!(to_minor_units(dec("12")), Ok(1200));
        assert_eq!(to_minor_units(Decimal::ZERO), Ok(0));
    }

    #[test]
    fn test_to_minor_units_has_no_float_drift() {
        assert_eq!(to_minor_units(dec("0.1") + dec("0.2")), Ok(30));
    }

    #[test]
    fn test_to_minor_units_rounds_half_away_from_zero() {
        assert_eq!(to_minor_units(dec("19.999")), Ok(2000));
        assert_eq!(to_minor_units(dec("0.005")), Ok(1));
        assert_eq!(to_minor_units(dec("0.004")), Ok(0));
    }

    #[test]
    fn test_to_minor_units_rejects_negative() {
        assert_eq!(
            to_minor_units(dec("-1.00")),
            Err(MoneyError::Negative(dec("-1.00")))
        );
    }

    #[test]
    fn test_to_minor_units_overflow() {
        assert!(matches!(
            to_minor_units(Decimal::MAX),
            Err(MoneyError::Overflow(_))
        ));
    }

    #[test]
    fn test_from_minor_units() {
        assert_eq!(from_minor_units(1999), dec("19.99"));
        assert_eq!(from_minor_units(5), dec("0.05"));
    }

    #[test]
    fn test_currency_code_parse() {
        assert_eq!("USD".parse::<CurrencyCode>(), Ok(CurrencyCode::Usd));
        assert_eq!(CurrencyCode::Gbp.to_string(), "gbp");
        assert!("xyz".parse::<CurrencyCode>().is_err());
    }
}
