//! HTTP handlers for transaction endpoints.
//!
//! Creating a transaction only records it as `pending` and hands a [`BalanceUpdateEvent`] to the
//! settlement worker; the balance moves asynchronously. Deleting a settled transaction reverses it
//! against the balance in the same database transaction.

use crate::{
    AppState,
    api::models::{
        pagination::{TRANSACTION_PAGE, USER_TRANSACTION_PAGE},
        response::ApiResponse,
        transactions::{
            DateRangeQuery, ListTransactionsQuery, TransactionAnalyticsResponse, TransactionCreate, TransactionOwnerQuery,
            TransactionResponse, TransactionUpdate, UserTransactionsQuery,
        },
    },
    cache::CacheKey,
    db::{
        handlers::{Repository, TransactionFilter, Transactions, Users},
        models::{transactions::TransactionOrder, users::BalanceUpdate},
    },
    errors::{Error, Result},
    events::BalanceUpdateEvent,
    types::{CacheNamespace, TransactionId, TransactionStatus, UserId},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::{error, info};

fn transaction_not_found(id: TransactionId) -> Error {
    Error::NotFound {
        resource: "Transaction".to_string(),
        id: id.to_string(),
    }
}

/// Create a new transaction
#[utoipa::path(
    post,
    path = "/transactions",
    tag = "transactions",
    summary = "Create a transaction",
    description = "Record a credit or debit as `pending`. The balance is updated asynchronously; a debit that would overdraw ends up `failed`.",
    request_body = TransactionCreate,
    responses(
        (status = 201, description = "Transaction recorded", body = TransactionResponse),
        (status = 400, description = "Invalid amount or description"),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = data.user_id))]
pub async fn create_transaction(
    State(state): State<AppState>,
    Json(data): Json<TransactionCreate>,
) -> Result<(StatusCode, Json<TransactionResponse>)> {
    let request = data.into_db_request()?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    if Users::new(&mut pool_conn, &state.cipher).get_balance(request.user_id).await?.is_none() {
        return Err(Error::NotFound {
            resource: "User".to_string(),
            id: request.user_id.to_string(),
        });
    }

    let transaction = Transactions::new(&mut pool_conn).create(&request).await?;

    let event = BalanceUpdateEvent {
        transaction_id: transaction.id,
        user_id: transaction.user_id,
    };
    if let Err(e) = state.events.dispatch(event).await {
        // Stays pending; recovery re-dispatches it on the next start
        error!(transaction_id = transaction.id, error = %e, "Failed to dispatch balance update");
    }

    state.cache.invalidate_ledger(transaction.user_id, None).await;

    Ok((StatusCode::CREATED, Json(TransactionResponse::from(transaction))))
}

/// List transactions
#[utoipa::path(
    get,
    path = "/transactions",
    tag = "transactions",
    summary = "List transactions",
    description = "All transactions, newest first unless `order_by` says otherwise. At most 20 per page.",
    params(ListTransactionsQuery),
    responses(
        (status = 200, description = "Transactions", body = Vec<TransactionResponse>),
        (status = 400, description = "Invalid order_by"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Vec<TransactionResponse>>> {
    let order = query.order()?;
    let (skip, limit) = query.pagination.params(TRANSACTION_PAGE);
    let key = CacheKey::new(CacheNamespace::Transaction)
        .prefix("list")
        .param("skip", Some(skip))
        .param("limit", Some(limit))
        .param("order_by", Some(order));

    let transactions = state
        .cache
        .cached(&key, None, || async {
            let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            let filter = TransactionFilter::new(skip, limit).order_by(order);
            let transactions = Transactions::new(&mut pool_conn).list(&filter).await?;
            Ok::<_, Error>(transactions.into_iter().map(TransactionResponse::from).collect::<Vec<_>>())
        })
        .await?;

    Ok(Json(transactions))
}

/// Get a transaction by ID
#[utoipa::path(
    get,
    path = "/transactions/{id}",
    tag = "transactions",
    summary = "Get a transaction",
    params(
        ("id" = i64, Path, description = "Transaction ID"),
    ),
    responses(
        (status = 200, description = "Transaction details", body = TransactionResponse),
        (status = 404, description = "Transaction not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all, fields(transaction_id = id))]
pub async fn get_transaction(State(state): State<AppState>, Path(id): Path<TransactionId>) -> Result<Json<TransactionResponse>> {
    let key = CacheKey::new(CacheNamespace::Transaction).prefix("single").identifier(id);

    let transaction = state
        .cache
        .cached(&key, None, || async {
            let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            let transaction = Transactions::new(&mut pool_conn)
                .get_by_id(id)
                .await?
                .ok_or_else(|| transaction_not_found(id))?;
            Ok::<_, Error>(TransactionResponse::from(transaction))
        })
        .await?;

    Ok(Json(transaction))
}

/// List one user's transactions
#[utoipa::path(
    get,
    path = "/transactions/user/{user_id}",
    tag = "transactions",
    summary = "List a user's transactions",
    description = "Ordered by transaction date. Date bounds are inclusive. At most 100 per page.",
    params(
        ("user_id" = i64, Path, description = "User ID"),
        UserTransactionsQuery,
    ),
    responses(
        (status = 200, description = "Transactions", body = Vec<TransactionResponse>),
        (status = 400, description = "start_date is after end_date"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = user_id))]
pub async fn get_user_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<UserTransactionsQuery>,
) -> Result<Json<Vec<TransactionResponse>>> {
    query.range.validate()?;
    let (skip, limit) = query.pagination.params(USER_TRANSACTION_PAGE);
    let DateRangeQuery { start_date, end_date } = query.range;

    let key = CacheKey::new(CacheNamespace::Transaction)
        .prefix("user")
        .identifier(user_id)
        .param("skip", Some(skip))
        .param("limit", Some(limit))
        .param("start_date", start_date.map(|d| d.to_rfc3339()))
        .param("end_date", end_date.map(|d| d.to_rfc3339()));

    let transactions = state
        .cache
        .cached(&key, None, || async {
            let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            let filter = TransactionFilter::new(skip, limit)
                .for_user(user_id)
                .between(start_date, end_date)
                .order_by(TransactionOrder::by_transaction_date());
            let transactions = Transactions::new(&mut pool_conn).list(&filter).await?;
            Ok::<_, Error>(transactions.into_iter().map(TransactionResponse::from).collect::<Vec<_>>())
        })
        .await?;

    Ok(Json(transactions))
}

/// Update a transaction
#[utoipa::path(
    put,
    path = "/transactions/{id}",
    tag = "transactions",
    summary = "Update a transaction",
    description = "The date and description can always change. Amount and type can only change while the transaction is pending.",
    params(
        ("id" = i64, Path, description = "Transaction ID"),
        TransactionOwnerQuery,
    ),
    request_body = TransactionUpdate,
    responses(
        (status = 200, description = "Transaction updated", body = TransactionResponse),
        (status = 400, description = "Invalid amount or description"),
        (status = 404, description = "Transaction not found for this user"),
        (status = 409, description = "Transaction is already settled"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all, fields(transaction_id = id, user_id = owner.user_id))]
pub async fn update_transaction(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
    Query(owner): Query<TransactionOwnerQuery>,
    Json(data): Json<TransactionUpdate>,
) -> Result<Json<TransactionResponse>> {
    let request = data.into_db_request()?;

    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Transactions::new(&mut tx);

    let current = repo
        .lock(id)
        .await?
        .filter(|t| t.user_id == owner.user_id)
        .ok_or_else(|| transaction_not_found(id))?;

    if request.changes_ledger() && current.transaction_status != TransactionStatus::Pending {
        return Err(Error::Conflict {
            message: format!(
                "Cannot change the amount or type of a {} transaction",
                current.transaction_status
            ),
        });
    }

    let updated = repo.update(id, &request).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    state.cache.invalidate_ledger(owner.user_id, Some(id)).await;

    Ok(Json(TransactionResponse::from(updated)))
}

/// Delete a transaction
#[utoipa::path(
    delete,
    path = "/transactions/{id}",
    tag = "transactions",
    summary = "Delete a transaction",
    description = "A settled transaction is reversed against the user's balance before it is deleted.",
    params(
        ("id" = i64, Path, description = "Transaction ID"),
        TransactionOwnerQuery,
    ),
    responses(
        (status = 200, description = "Transaction deleted", body = ApiResponse),
        (status = 404, description = "Transaction not found for this user"),
        (status = 409, description = "Reversing the transaction would make the balance negative"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all, fields(transaction_id = id, user_id = owner.user_id))]
pub async fn delete_transaction(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
    Query(owner): Query<TransactionOwnerQuery>,
) -> Result<Json<ApiResponse>> {
    let mut tx = state.db.begin().await.map_err(|e| Error::Database(e.into()))?;

    let transaction = Transactions::new(&mut tx)
        .lock(id)
        .await?
        .filter(|t| t.user_id == owner.user_id)
        .ok_or_else(|| transaction_not_found(id))?;

    if transaction.transaction_status == TransactionStatus::Success {
        let reversal = Users::new(&mut tx, &state.cipher)
            .adjust_balance(
                transaction.user_id,
                transaction.transaction_type.reversed(),
                transaction.transaction_amount,
            )
            .await?;
        match reversal {
            BalanceUpdate::Applied { balance } => info!(balance, "Reversed settled transaction"),
            BalanceUpdate::InsufficientFunds { balance } => {
                return Err(Error::InsufficientBalance {
                    balance,
                    requested: transaction.transaction_amount,
                });
            }
        }
    }

    Transactions::new(&mut tx).delete(id).await?;
    tx.commit().await.map_err(|e| Error::Database(e.into()))?;

    state.cache.invalidate_ledger(owner.user_id, Some(id)).await;

    Ok(Json(ApiResponse::success("Transaction deleted successfully")))
}

/// Transaction analytics for one user
#[utoipa::path(
    get,
    path = "/transactions/analytics/{user_id}",
    tag = "transactions",
    summary = "Transaction analytics",
    description = "Count, average, credit and debit totals, and the busiest day over non-failed transactions in the date range.",
    params(
        ("user_id" = i64, Path, description = "User ID"),
        DateRangeQuery,
    ),
    responses(
        (status = 200, description = "Analytics", body = TransactionAnalyticsResponse),
        (status = 400, description = "start_date is after end_date"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = user_id))]
pub async fn get_transaction_analytics(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(range): Query<DateRangeQuery>,
) -> Result<Json<TransactionAnalyticsResponse>> {
    range.validate()?;
    let DateRangeQuery { start_date, end_date } = range;

    let key = CacheKey::new(CacheNamespace::Analytics)
        .prefix("user")
        .identifier(user_id)
        .param("start_date", start_date.map(|d| d.to_rfc3339()))
        .param("end_date", end_date.map(|d| d.to_rfc3339()));

    let analytics = state
        .cache
        .cached(&key, None, || async {
            let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            let analytics = Transactions::new(&mut pool_conn).analytics(user_id, start_date, end_date).await?;
            Ok::<_, Error>(TransactionAnalyticsResponse::from(analytics))
        })
        .await?;

    Ok(Json(analytics))
}
