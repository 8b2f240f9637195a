use crate::{
    db::{
        errors::{DbError, Result},
        handlers::repository::Repository,
        models::transactions::{
            TransactionAnalyticsDBResponse, TransactionCreateDBRequest, TransactionDBResponse, TransactionOrder,
            TransactionUpdateDBRequest,
        },
    },
    types::{TransactionId, TransactionStatus, TransactionType, UserId},
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, query_builder::QueryBuilder};
use tracing::instrument;

/// Filter options for listing transactions
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub skip: i64,
    pub limit: i64,
    pub user_id: Option<UserId>,
    /// Inclusive lower bound on transaction_date
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound on transaction_date
    pub end_date: Option<DateTime<Utc>>,
    pub order: TransactionOrder,
}

impl TransactionFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            ..Default::default()
        }
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn between(mut self, start_date: Option<DateTime<Utc>>, end_date: Option<DateTime<Utc>>) -> Self {
        self.start_date = start_date;
        self.end_date = end_date;
        self
    }

    pub fn order_by(mut self, order: TransactionOrder) -> Self {
        self.order = order;
        self
    }
}

#[derive(Debug, Clone, FromRow)]
struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub transaction_date: DateTime<Utc>,
    pub transaction_amount: i64,
    pub transaction_type: String,
    pub transaction_status: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<Transaction> for TransactionDBResponse {
    type Error = DbError;

    fn try_from(row: Transaction) -> Result<Self> {
        let transaction_type = row.transaction_type.parse::<TransactionType>().map_err(|_| DbError::InvalidValue {
            column: "transaction_type",
            value: row.transaction_type.clone(),
        })?;
        let transaction_status = row.transaction_status.parse::<TransactionStatus>().map_err(|_| DbError::InvalidValue {
            column: "transaction_status",
            value: row.transaction_status.clone(),
        })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            transaction_date: row.transaction_date,
            transaction_amount: row.transaction_amount,
            transaction_type,
            transaction_status,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AnalyticsTotals {
    transaction_count: i64,
    average_amount: Option<Decimal>,
    total_credits: i64,
    total_debits: i64,
}

const TRANSACTION_COLUMNS: &str =
    "id, user_id, transaction_date, transaction_amount, transaction_type, transaction_status, description, created_at, updated_at";

pub struct Transactions<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Transactions<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Lock a transaction row for the rest of the surrounding database transaction
    #[instrument(skip(self), err)]
    pub async fn lock(&mut self, id: TransactionId) -> Result<Option<TransactionDBResponse>> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.db)
        .await?;

        row.map(TransactionDBResponse::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    pub async fn set_status(&mut self, id: TransactionId, status: TransactionStatus) -> Result<TransactionDBResponse> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            "UPDATE transactions SET transaction_status = $2, updated_at = NOW() WHERE id = $1 RETURNING {TRANSACTION_COLUMNS}"
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    /// One page of pending transactions with `id > after_id`, in id order.
    /// Used to re-dispatch settlement after a restart.
    #[instrument(skip(self), err)]
    pub async fn list_pending(&mut self, after_id: TransactionId, limit: i64) -> Result<Vec<TransactionDBResponse>> {
        let rows = sqlx::query_as::<_, Transaction>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE transaction_status = 'pending' AND id > $1 ORDER BY id ASC LIMIT $2"
        ))
        .bind(after_id)
        .bind(limit)
        .fetch_all(&mut *self.db)
        .await?;

        rows.into_iter().map(TransactionDBResponse::try_from).collect()
    }

    /// Aggregates over a user's non-failed transactions within the inclusive date range
    #[instrument(skip(self), err)]
    pub async fn analytics(
        &mut self,
        user_id: UserId,
        start_date: Option<DateTime<Utc>>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<TransactionAnalyticsDBResponse> {
        let totals = sqlx::query_as::<_, AnalyticsTotals>(
            r#"
            SELECT
                COUNT(*) AS transaction_count,
                AVG(transaction_amount) AS average_amount,
                COALESCE(SUM(transaction_amount) FILTER (WHERE transaction_type = 'credit'), 0)::BIGINT AS total_credits,
                COALESCE(SUM(transaction_amount) FILTER (WHERE transaction_type = 'debit'), 0)::BIGINT AS total_debits
            FROM transactions
            WHERE user_id = $1
              AND transaction_status <> 'failed'
              AND ($2::timestamptz IS NULL OR transaction_date >= $2)
              AND ($3::timestamptz IS NULL OR transaction_date <= $3)
            "#,
        )
        .bind(user_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_one(&mut *self.db)
        .await?;

        // Earliest day wins a tie
        let highest_transaction_day: Option<NaiveDate> = sqlx::query_scalar(
            r#"
            SELECT (transaction_date AT TIME ZONE 'UTC')::date AS day
            FROM transactions
            WHERE user_id = $1
              AND transaction_status <> 'failed'
              AND ($2::timestamptz IS NULL OR transaction_date >= $2)
              AND ($3::timestamptz IS NULL OR transaction_date <= $3)
            GROUP BY day
            ORDER BY SUM(transaction_amount) DESC, day ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(start_date)
        .bind(end_date)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(TransactionAnalyticsDBResponse {
            user_id,
            transaction_count: totals.transaction_count,
            average_amount: totals.average_amount,
            highest_transaction_day,
            total_credits: totals.total_credits,
            total_debits: totals.total_debits,
        })
    }
}

#[async_trait::async_trait]
impl<'c> Repository for Transactions<'c> {
    type CreateRequest = TransactionCreateDBRequest;
    type UpdateRequest = TransactionUpdateDBRequest;
    type Response = TransactionDBResponse;
    type Id = TransactionId;
    type Filter = TransactionFilter;

    #[instrument(skip(self, request), fields(user_id = request.user_id, amount = request.transaction_amount, transaction_type = %request.transaction_type), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            INSERT INTO transactions (user_id, transaction_date, transaction_amount, transaction_type, transaction_status, description)
            VALUES ($1, $2, $3, $4, 'pending', $5)
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(request.user_id)
        .bind(request.transaction_date)
        .bind(request.transaction_amount)
        .bind(request.transaction_type.as_str())
        .bind(&request.description)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        let row = sqlx::query_as::<_, Transaction>(&format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        row.map(TransactionDBResponse::try_from).transpose()
    }

    #[instrument(skip(self, filter), fields(skip = filter.skip, limit = filter.limit, user_id = ?filter.user_id, order = %filter.order), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let mut query = QueryBuilder::new(format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE 1=1"));

        if let Some(user_id) = filter.user_id {
            query.push(" AND user_id = ");
            query.push_bind(user_id);
        }

        if let Some(start_date) = filter.start_date {
            query.push(" AND transaction_date >= ");
            query.push_bind(start_date);
        }

        if let Some(end_date) = filter.end_date {
            query.push(" AND transaction_date <= ");
            query.push_bind(end_date);
        }

        // Order comes from a whitelist, never from raw input
        query.push(" ORDER BY ");
        query.push(filter.order.to_sql());

        query.push(" LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let rows = query.build_query_as::<Transaction>().fetch_all(&mut *self.db).await?;

        rows.into_iter().map(TransactionDBResponse::try_from).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM transactions WHERE id = $1")
            .bind(id)
            .execute(&mut *self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        let row = sqlx::query_as::<_, Transaction>(&format!(
            r#"
            UPDATE transactions SET
                transaction_date = COALESCE($2, transaction_date),
                transaction_amount = COALESCE($3, transaction_amount),
                transaction_type = COALESCE($4, transaction_type),
                description = COALESCE($5, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TRANSACTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(request.transaction_date)
        .bind(request.transaction_amount)
        .bind(request.transaction_type.map(|t| t.as_str()))
        .bind(&request.description)
        .fetch_one(&mut *self.db)
        .await?;

        row.try_into()
    }
}
