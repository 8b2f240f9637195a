//! API request/response models for transactions.

use super::pagination::Pagination;
use crate::{
    db::models::transactions::{
        TransactionAnalyticsDBResponse, TransactionCreateDBRequest, TransactionDBResponse, TransactionOrder,
        TransactionUpdateDBRequest,
    },
    errors::{Error, Result},
    money,
    types::{TransactionId, TransactionStatus, TransactionType, UserId},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

pub const MAX_DESCRIPTION_LEN: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionCreate {
    pub user_id: UserId,
    pub transaction_date: DateTime<Utc>,
    /// At least 0.01, sent as a string to preserve precision
    #[schema(value_type = String, example = "25.00")]
    pub transaction_amount: Decimal,
    pub transaction_type: TransactionType,
    /// At most 500 characters
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TransactionUpdate {
    pub transaction_date: Option<DateTime<Utc>>,
    /// Only while the transaction is pending
    #[schema(value_type = Option<String>)]
    pub transaction_amount: Option<Decimal>,
    /// Only while the transaction is pending
    pub transaction_type: Option<TransactionType>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub id: TransactionId,
    pub user_id: UserId,
    pub transaction_date: DateTime<Utc>,
    #[schema(value_type = String, example = "25.00")]
    pub transaction_amount: Decimal,
    pub transaction_type: TransactionType,
    pub transaction_status: TransactionStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionAnalyticsResponse {
    pub user_id: UserId,
    pub transaction_count: i64,
    /// Mean transaction amount, 0.00 when there are no transactions
    #[schema(value_type = String, example = "42.50")]
    pub average_transaction_value: Decimal,
    /// Calendar day (UTC) with the largest total volume
    pub highest_transaction_day: Option<NaiveDate>,
    #[schema(value_type = String)]
    pub total_credits: Decimal,
    #[schema(value_type = String)]
    pub total_debits: Decimal,
}

/// Query parameters for `GET /transactions`
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
pub struct ListTransactionsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// One of id, transaction_date, transaction_amount, created_at; prefix with `-` for descending
    #[param(example = "-transaction_date")]
    pub order_by: Option<String>,
}

impl ListTransactionsQuery {
    pub fn order(&self) -> Result<TransactionOrder> {
        match self.order_by.as_deref().map(str::trim) {
            None | Some("") => Ok(TransactionOrder::default()),
            Some(raw) => raw.parse().map_err(|message| Error::BadRequest { message }),
        }
    }
}

/// Query parameters for `GET /transactions/user/{user_id}`
#[derive(Debug, Default, Clone, Deserialize, IntoParams)]
pub struct UserTransactionsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    #[serde(flatten)]
    #[param(inline)]
    pub range: DateRangeQuery,
}

/// Inclusive `transaction_date` bounds
#[derive(Debug, Default, Clone, Serialize, Deserialize, IntoParams, ToSchema)]
pub struct DateRangeQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl DateRangeQuery {
    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && start > end
        {
            return Err(Error::BadRequest {
                message: "start_date must not be after end_date".to_string(),
            });
        }
        Ok(())
    }
}

/// Owner check for update and delete
#[serde_as]
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct TransactionOwnerQuery {
    #[serde_as(as = "DisplayFromStr")]
    #[param(value_type = i64)]
    pub user_id: UserId,
}

fn validate_description(description: Option<String>) -> Result<Option<String>> {
    match description {
        Some(d) if d.chars().count() > MAX_DESCRIPTION_LEN => Err(Error::BadRequest {
            message: format!("description must be at most {MAX_DESCRIPTION_LEN} characters"),
        }),
        other => Ok(other),
    }
}

impl TransactionCreate {
    pub fn into_db_request(self) -> Result<TransactionCreateDBRequest> {
        Ok(TransactionCreateDBRequest {
            user_id: self.user_id,
            transaction_date: self.transaction_date,
            transaction_amount: money::transaction_amount_to_cents(self.transaction_amount)?,
            transaction_type: self.transaction_type,
            description: validate_description(self.description)?,
        })
    }
}

impl TransactionUpdate {
    pub fn into_db_request(self) -> Result<TransactionUpdateDBRequest> {
        Ok(TransactionUpdateDBRequest {
            transaction_date: self.transaction_date,
            transaction_amount: self.transaction_amount.map(money::transaction_amount_to_cents).transpose()?,
            transaction_type: self.transaction_type,
            description: validate_description(self.description)?,
        })
    }
}

impl From<TransactionDBResponse> for TransactionResponse {
    fn from(db: TransactionDBResponse) -> Self {
        Self {
            id: db.id,
            user_id: db.user_id,
            transaction_date: db.transaction_date,
            transaction_amount: money::from_cents(db.transaction_amount),
            transaction_type: db.transaction_type,
            transaction_status: db.transaction_status,
            description: db.description,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

impl From<TransactionAnalyticsDBResponse> for TransactionAnalyticsResponse {
    fn from(db: TransactionAnalyticsDBResponse) -> Self {
        // average is in cents; convert and round to two places
        let average_transaction_value = db
            .average_amount
            .map(|avg| (avg / Decimal::ONE_HUNDRED).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
            .unwrap_or_else(|| Decimal::new(0, 2));

        Self {
            user_id: db.user_id,
            transaction_count: db.transaction_count,
            average_transaction_value,
            highest_transaction_day: db.highest_transaction_day,
            total_credits: money::from_cents(db.total_credits),
            total_debits: money::from_cents(db.total_debits),
        }
    }
}
