//! Database models for users.

use crate::types::UserId;
use chrono::{DateTime, Utc};

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    /// Plaintext; encrypted by the repository before insert
    pub full_name: String,
    pub email: Option<String>,
    /// Opening balance in cents
    pub balance: i64,
}

/// Database request for updating a user. Balances only change through transactions.
#[derive(Debug, Clone, Default)]
pub struct UserUpdateDBRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
}

/// Database response for a user, with `full_name` already decrypted
#[derive(Debug, Clone)]
pub struct UserDBResponse {
    pub id: UserId,
    pub full_name: String,
    pub email: Option<String>,
    /// Balance in cents
    pub balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Outcome of applying a transaction to a user's balance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceUpdate {
    Applied { balance: i64 },
    InsufficientFunds { balance: i64 },
}
