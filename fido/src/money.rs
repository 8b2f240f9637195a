//! Currency amounts.
//!
//! The API speaks decimals with two places (`"100.50"`); the database stores
//! integer cents. Every conversion goes through this module so that rounding
//! happens in exactly one place.

use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use thiserror::Error;

use crate::types::TransactionType;

/// Smallest amount a transaction may carry (0.01)
pub const MIN_AMOUNT_CENTS: i64 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("amount must be at least 0.01")]
    BelowMinimum,

    #[error("amount cannot be negative")]
    Negative,

    #[error("amount is too large")]
    Overflow,

    #[error("insufficient funds: balance {balance} cents, requested {requested} cents")]
    InsufficientFunds { balance: i64, requested: i64 },
}

/// Convert a currency amount to cents, rounding half away from zero.
pub fn to_cents(amount: Decimal) -> Result<i64, MoneyError> {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|c| c.to_i64())
        .ok_or(MoneyError::Overflow)
}

/// Convert cents to a two-place currency amount.
pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

/// Validate a transaction amount and return it in cents.
pub fn transaction_amount_to_cents(amount: Decimal) -> Result<i64, MoneyError> {
    let cents = to_cents(amount)?;
    if cents < MIN_AMOUNT_CENTS {
        return Err(MoneyError::BelowMinimum);
    }
    Ok(cents)
}

/// Validate an opening balance and return it in cents.
pub fn balance_to_cents(amount: Decimal) -> Result<i64, MoneyError> {
    let cents = to_cents(amount)?;
    if cents < 0 {
        return Err(MoneyError::Negative);
    }
    Ok(cents)
}

/// Apply a credit or debit to a balance, both in cents.
///
/// A debit larger than the balance is rejected; balances never go negative.
pub fn apply_to_balance(balance: i64, transaction_type: TransactionType, amount: i64) -> Result<i64, MoneyError> {
    match transaction_type {
        TransactionType::Credit => balance.checked_add(amount).ok_or(MoneyError::Overflow),
        TransactionType::Debit => {
            if amount > balance {
                return Err(MoneyError::InsufficientFunds {
                    balance,
                    requested: amount,
                });
            }
            Ok(balance - amount)
        }
    }
}

/// Render an amount as `1,234.56`.
pub fn format_currency(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let plain = format!("{:.2}", rounded.abs());
    let (whole, frac) = plain.split_once('.').unwrap_or((plain.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    format!("{sign}{grouped}.{frac}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn converts_to_cents_with_half_away_from_zero() {
        assert_eq!(to_cents(dec("100.50")).unwrap(), 10050);
        assert_eq!(to_cents(dec("0.005")).unwrap(), 1);
        assert_eq!(to_cents(dec("0.004")).unwrap(), 0);
        assert_eq!(to_cents(dec("-1.005")).unwrap(), -101);
        assert_eq!(to_cents(dec("12")).unwrap(), 1200);
    }

    #[test]
    fn from_cents_keeps_two_places() {
        assert_eq!(from_cents(10050).to_string(), "100.50");
        assert_eq!(from_cents(7).to_string(), "0.07");
        assert_eq!(from_cents(0).to_string(), "0.00");
    }

    #[test]
    fn transaction_amount_must_be_at_least_one_cent() {
        assert_eq!(transaction_amount_to_cents(dec("0.01")).unwrap(), 1);
        assert_eq!(transaction_amount_to_cents(dec("0.001")), Err(MoneyError::BelowMinimum));
        assert_eq!(transaction_amount_to_cents(dec("-5")), Err(MoneyError::BelowMinimum));
    }

    #[test]
    fn opening_balance_may_be_zero_but_not_negative() {
        assert_eq!(balance_to_cents(Decimal::ZERO).unwrap(), 0);
        assert_eq!(balance_to_cents(dec("-0.01")), Err(MoneyError::Negative));
    }

    #[test]
    fn huge_amounts_overflow_cleanly() {
        assert_eq!(to_cents(Decimal::MAX), Err(MoneyError::Overflow));
        assert_eq!(apply_to_balance(i64::MAX, TransactionType::Credit, 1), Err(MoneyError::Overflow));
    }

    #[test]
    fn credit_adds_and_debit_subtracts() {
        assert_eq!(apply_to_balance(1000, TransactionType::Credit, 250).unwrap(), 1250);
        assert_eq!(apply_to_balance(1000, TransactionType::Debit, 250).unwrap(), 750);
        assert_eq!(apply_to_balance(1000, TransactionType::Debit, 1000).unwrap(), 0);
    }

    #[test]
    fn debit_cannot_overdraw() {
        assert_eq!(
            apply_to_balance(500, TransactionType::Debit, 501),
            Err(MoneyError::InsufficientFunds {
                balance: 500,
                requested: 501
            })
        );
    }

    #[test]
    fn reversal_is_symmetric() {
        let after = apply_to_balance(1000, TransactionType::Credit, 300).unwrap();
        assert_eq!(apply_to_balance(after, TransactionType::Credit.reversed(), 300).unwrap(), 1000);

        let after = apply_to_balance(1000, TransactionType::Debit, 300).unwrap();
        assert_eq!(apply_to_balance(after, TransactionType::Debit.reversed(), 300).unwrap(), 1000);

        // Reversing a credit that has since been spent would go negative
        assert!(apply_to_balance(100, TransactionType::Credit.reversed(), 300).is_err());
    }

    #[test]
    fn formats_with_thousands_separators() {
        assert_eq!(format_currency(dec("1234.5")), "1,234.50");
        assert_eq!(format_currency(dec("1234567.891")), "1,234,567.89");
        assert_eq!(format_currency(dec("999.99")), "999.99");
        assert_eq!(format_currency(dec("0")), "0.00");
        assert_eq!(format_currency(dec("-1000")), "-1,000.00");
    }
}
