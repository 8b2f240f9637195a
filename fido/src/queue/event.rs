//! The message carried by the processing queues.

use crate::types::TransactionType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EventValidationError {
    #[error("user_id must not be empty")]
    EmptyUserId,

    #[error("transaction_type must be one of ['credit', 'debit'], got '{0}'")]
    InvalidTransactionType(String),

    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
}

/// A settled transaction, as published to every processing queue.
///
/// `transaction_type` is matched case-insensitively and always serialized lowercase.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub user_id: String,
    pub full_name: String,
    pub email: String,
    /// Currency amount, not cents
    pub transaction_amount: Decimal,
    #[serde_as(as = "DisplayFromStr")]
    pub transaction_type: TransactionType,
    pub transaction_date: DateTime<Utc>,
    pub transaction_id: String,
}

impl TransactionEvent {
    /// Build a validated event
    pub fn new(
        user_id: impl Into<String>,
        full_name: impl Into<String>,
        email: impl Into<String>,
        transaction_amount: Decimal,
        transaction_type: &str,
        transaction_date: DateTime<Utc>,
        transaction_id: impl Into<String>,
    ) -> Result<Self, EventValidationError> {
        let transaction_type = transaction_type
            .parse::<TransactionType>()
            .map_err(|_| EventValidationError::InvalidTransactionType(transaction_type.to_string()))?;

        let event = Self {
            user_id: user_id.into(),
            full_name: full_name.into(),
            email: email.into(),
            transaction_amount,
            transaction_type,
            transaction_date,
            transaction_id: transaction_id.into(),
        };
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), EventValidationError> {
        if self.user_id.trim().is_empty() {
            return Err(EventValidationError::EmptyUserId);
        }
        if self.email.parse::<lettre::Address>().is_err() {
            return Err(EventValidationError::InvalidEmail(self.email.clone()));
        }
        Ok(())
    }

    /// Decode a queue payload, rejecting events that fail validation
    pub fn from_payload(payload: &str) -> anyhow::Result<Self> {
        let event: Self = serde_json::from_str(payload)?;
        event.validate()?;
        Ok(event)
    }

    pub fn to_payload(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
