//! Arithmetic applied by the queue worker.

use crate::types::TransactionType;

pub const DEFAULT_CREDIT_SCORE: f64 = 700.0;
pub const MIN_CREDIT_SCORE: f64 = 300.0;
pub const MAX_CREDIT_SCORE: f64 = 850.0;

/// Credits add up to 5 points (one per 1000), debits remove up to 3 (one per 2000)
pub fn credit_score_adjustment(transaction_type: TransactionType, amount: f64) -> f64 {
    match transaction_type {
        TransactionType::Credit => (amount / 1000.0).min(5.0),
        TransactionType::Debit => (-amount / 2000.0).max(-3.0),
    }
}

pub fn next_credit_score(current: f64, transaction_type: TransactionType, amount: f64) -> f64 {
    (current + credit_score_adjustment(transaction_type, amount)).clamp(MIN_CREDIT_SCORE, MAX_CREDIT_SCORE)
}

/// Running mean after the `count`-th sample (`count` includes `amount`)
pub fn next_running_average(current_average: f64, count: u64, amount: f64) -> f64 {
    if count == 0 {
        return current_average;
    }
    let n = count as f64;
    (current_average * (n - 1.0) + amount) / n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjustments_are_capped() {
        assert_eq!(credit_score_adjustment(TransactionType::Credit, 2_000.0), 2.0);
        assert_eq!(credit_score_adjustment(TransactionType::Credit, 1_000_000.0), 5.0);
        assert_eq!(credit_score_adjustment(TransactionType::Debit, 2_000.0), -1.0);
        assert_eq!(credit_score_adjustment(TransactionType::Debit, 1_000_000.0), -3.0);
    }

    #[test]
    fn score_stays_in_bounds() {
        assert_eq!(next_credit_score(DEFAULT_CREDIT_SCORE, TransactionType::Credit, 500.0), 700.5);
        assert_eq!(next_credit_score(849.0, TransactionType::Credit, 10_000.0), MAX_CREDIT_SCORE);
        assert_eq!(next_credit_score(301.0, TransactionType::Debit, 10_000.0), MIN_CREDIT_SCORE);
    }

    #[test]
    fn running_average() {
        assert_eq!(next_running_average(0.0, 1, 100.0), 100.0);
        assert_eq!(next_running_average(100.0, 2, 50.0), 75.0);
        assert_eq!(next_running_average(75.0, 3, 150.0), 100.0);
        assert_eq!(next_running_average(42.0, 0, 1.0), 42.0);
    }
}
