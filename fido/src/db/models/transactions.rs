//! Database models for transactions.

use crate::types::{TransactionId, TransactionStatus, TransactionType, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use std::{fmt, str::FromStr};

/// Database request for creating a new transaction. Amounts are in cents.
#[derive(Debug, Clone)]
pub struct TransactionCreateDBRequest {
    pub user_id: UserId,
    pub transaction_date: DateTime<Utc>,
    pub transaction_amount: i64,
    pub transaction_type: TransactionType,
    pub description: Option<String>,
}

/// Database request for updating a transaction; `None` leaves the column untouched
#[derive(Debug, Clone, Default)]
pub struct TransactionUpdateDBRequest {
    pub transaction_date: Option<DateTime<Utc>>,
    pub transaction_amount: Option<i64>,
    pub transaction_type: Option<TransactionType>,
    pub description: Option<String>,
}

impl TransactionUpdateDBRequest {
    /// Whether the update touches fields that feed into the balance
    pub fn changes_ledger(&self) -> bool {
        self.transaction_amount.is_some() || self.transaction_type.is_some()
    }
}

/// Database response for a transaction
#[derive(Debug, Clone)]
pub struct TransactionDBResponse {
    pub id: TransactionId,
    pub user_id: UserId,
    pub transaction_date: DateTime<Utc>,
    /// Amount in cents
    pub transaction_amount: i64,
    pub transaction_type: TransactionType,
    pub transaction_status: TransactionStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Aggregates over a user's non-failed transactions. Amounts are in cents.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionAnalyticsDBResponse {
    pub user_id: UserId,
    pub transaction_count: i64,
    /// Mean amount in cents, unrounded
    pub average_amount: Option<rust_decimal::Decimal>,
    pub highest_transaction_day: Option<NaiveDate>,
    pub total_credits: i64,
    pub total_debits: i64,
}

/// Columns a transaction listing may be ordered by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOrderField {
    Id,
    TransactionDate,
    TransactionAmount,
    CreatedAt,
}

impl TransactionOrderField {
    fn column(&self) -> &'static str {
        match self {
            TransactionOrderField::Id => "id",
            TransactionOrderField::TransactionDate => "transaction_date",
            TransactionOrderField::TransactionAmount => "transaction_amount",
            TransactionOrderField::CreatedAt => "created_at",
        }
    }
}

/// Ordering for transaction listings, parsed from `order_by` (`-` prefix = descending)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOrder {
    pub field: TransactionOrderField,
    pub descending: bool,
}

impl Default for TransactionOrder {
    /// Newest first
    fn default() -> Self {
        Self {
            field: TransactionOrderField::CreatedAt,
            descending: true,
        }
    }
}

impl TransactionOrder {
    /// Chronological by transaction date, used for per-user histories
    pub fn by_transaction_date() -> Self {
        Self {
            field: TransactionOrderField::TransactionDate,
            descending: false,
        }
    }

    /// ORDER BY clause body. Only whitelisted column names ever reach SQL; `id` breaks ties.
    pub fn to_sql(&self) -> String {
        let direction = if self.descending { "DESC" } else { "ASC" };
        match self.field {
            TransactionOrderField::Id => format!("id {direction}"),
            field => format!("{} {direction}, id {direction}", field.column()),
        }
    }
}

impl FromStr for TransactionOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descending, name) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let field = match name {
            "id" => TransactionOrderField::Id,
            "transaction_date" => TransactionOrderField::TransactionDate,
            "transaction_amount" => TransactionOrderField::TransactionAmount,
            "created_at" => TransactionOrderField::CreatedAt,
            other => {
                return Err(format!(
                    "Invalid order_by '{other}'. Use one of: id, transaction_date, transaction_amount, created_at (prefix with '-' for descending)"
                ));
            }
        };
        Ok(Self { field, descending })
    }
}

impl fmt::Display for TransactionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            f.write_str("-")?;
        }
        f.write_str(self.field.column())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_order_by() {
        let order: TransactionOrder = "transaction_amount".parse().unwrap();
        assert_eq!(order.field, TransactionOrderField::TransactionAmount);
        assert!(!order.descending);

        let order: TransactionOrder = "-transaction_date".parse().unwrap();
        assert_eq!(order.field, TransactionOrderField::TransactionDate);
        assert!(order.descending);
    }

    #[test]
    fn rejects_unknown_columns() {
        assert!("full_name".parse::<TransactionOrder>().is_err());
        assert!("id; DROP TABLE users".parse::<TransactionOrder>().is_err());
        assert!("--id".parse::<TransactionOrder>().is_err());
    }

    #[test]
    fn renders_sql_with_tie_breaker() {
        assert_eq!(TransactionOrder::default().to_sql(), "created_at DESC, id DESC");
        assert_eq!(TransactionOrder::by_transaction_date().to_sql(), "transaction_date ASC, id ASC");
        assert_eq!("-id".parse::<TransactionOrder>().unwrap().to_sql(), "id DESC");
    }

    #[test]
    fn display_round_trips() {
        for s in ["id", "-created_at", "transaction_amount"] {
            assert_eq!(s.parse::<TransactionOrder>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn only_amount_and_type_change_the_ledger() {
        let update = TransactionUpdateDBRequest {
            description: Some("note".into()),
            ..Default::default()
        };
        assert!(!update.changes_ledger());

        let update = TransactionUpdateDBRequest {
            transaction_amount: Some(100),
            ..Default::default()
        };
        assert!(update.changes_ledger());
    }
}
