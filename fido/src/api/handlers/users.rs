//! HTTP handlers for user endpoints.

use crate::{
    AppState,
    api::models::{
        pagination::{PaginatedResponse, Pagination, USER_PAGE},
        response::ApiResponse,
        users::{UserBalanceResponse, UserCreate, UserResponse, UserUpdate},
    },
    cache::CacheKey,
    db::{
        errors::DbError,
        handlers::{Repository, UserFilter, Users},
    },
    errors::{Error, Result},
    money,
    types::{CacheNamespace, UserId},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

fn user_not_found(id: UserId) -> Error {
    Error::NotFound {
        resource: "User".to_string(),
        id: id.to_string(),
    }
}

/// Create a new user
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    summary = "Create a user",
    description = "Create a user with an optional opening balance. The full name is encrypted at rest.",
    request_body = UserCreate,
    responses(
        (status = 201, description = "User created successfully", body = UserResponse),
        (status = 400, description = "Invalid name, email or balance"),
        (status = 409, description = "A user with this email address already exists"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_user(State(state): State<AppState>, Json(data): Json<UserCreate>) -> Result<(StatusCode, Json<UserResponse>)> {
    let request = data.into_db_request()?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut pool_conn, &state.cipher);
    let user = repo.create(&request).await?;

    state.cache.invalidate_user(user.id).await;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// List users
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    summary = "List users",
    params(Pagination),
    responses(
        (status = 200, description = "Page of users, newest first", body = PaginatedResponse<UserResponse>),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_users(State(state): State<AppState>, Query(query): Query<Pagination>) -> Result<Json<PaginatedResponse<UserResponse>>> {
    let (skip, limit) = query.params(USER_PAGE);
    let key = CacheKey::new(CacheNamespace::User)
        .prefix("list")
        .param("skip", Some(skip))
        .param("limit", Some(limit));

    let page = state
        .cache
        .cached(&key, None, || async {
            let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            let mut repo = Users::new(&mut pool_conn, &state.cipher);

            let users = repo.list(&UserFilter::new(skip, limit)).await?;
            let total_count = repo.count().await?;

            Ok::<_, Error>(PaginatedResponse::new(
                users.into_iter().map(UserResponse::from).collect(),
                total_count,
                skip,
                limit,
            ))
        })
        .await?;

    Ok(Json(page))
}

/// Get a user by ID
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    summary = "Get a user",
    params(
        ("id" = i64, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "User details", body = UserResponse),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = id))]
pub async fn get_user(State(state): State<AppState>, Path(id): Path<UserId>) -> Result<Json<UserResponse>> {
    let key = CacheKey::new(CacheNamespace::User).prefix("single").identifier(id);

    let user = state
        .cache
        .cached(&key, None, || async {
            let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            let mut repo = Users::new(&mut pool_conn, &state.cipher);
            let user = repo.get_by_id(id).await?.ok_or_else(|| user_not_found(id))?;
            Ok::<_, Error>(UserResponse::from(user))
        })
        .await?;

    Ok(Json(user))
}

/// Update a user's name or email
#[utoipa::path(
    patch,
    path = "/users/{id}",
    tag = "users",
    summary = "Update a user",
    description = "Change the full name and/or email. Balances only change through transactions.",
    params(
        ("id" = i64, Path, description = "User ID"),
    ),
    request_body = UserUpdate,
    responses(
        (status = 200, description = "User updated successfully", body = UserResponse),
        (status = 400, description = "Invalid name or email"),
        (status = 404, description = "User not found"),
        (status = 409, description = "A user with this email address already exists"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = id))]
pub async fn update_user(State(state): State<AppState>, Path(id): Path<UserId>, Json(data): Json<UserUpdate>) -> Result<Json<UserResponse>> {
    let request = data.into_db_request()?;

    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut pool_conn, &state.cipher);
    let user = repo.update(id, &request).await.map_err(|e| match e {
        DbError::NotFound => user_not_found(id),
        other => other.into(),
    })?;

    state.cache.invalidate_user(id).await;

    Ok(Json(UserResponse::from(user)))
}

/// Delete a user and all of their transactions
#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    summary = "Delete a user",
    params(
        ("id" = i64, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "User deleted successfully", body = ApiResponse),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = id))]
pub async fn delete_user(State(state): State<AppState>, Path(id): Path<UserId>) -> Result<Json<ApiResponse>> {
    let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut repo = Users::new(&mut pool_conn, &state.cipher);

    if !repo.delete(id).await? {
        return Err(user_not_found(id));
    }

    // Transactions went with the user (ON DELETE CASCADE)
    state.cache.invalidate_ledger(id, None).await;

    Ok(Json(ApiResponse::success("User deleted successfully")))
}

/// Get a user's current balance
#[utoipa::path(
    get,
    path = "/users/{id}/balance",
    tag = "users",
    summary = "Get a user's balance",
    params(
        ("id" = i64, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "Current balance", body = UserBalanceResponse),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all, fields(user_id = id))]
pub async fn get_user_balance(State(state): State<AppState>, Path(id): Path<UserId>) -> Result<Json<UserBalanceResponse>> {
    let key = CacheKey::new(CacheNamespace::User).prefix("balance").identifier(id);

    let balance = state
        .cache
        .cached(&key, None, || async {
            let mut pool_conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
            let mut repo = Users::new(&mut pool_conn, &state.cipher);
            let balance = repo.get_balance(id).await?.ok_or_else(|| user_not_found(id))?;
            Ok::<_, Error>(UserBalanceResponse {
                user_id: id,
                balance: money::from_cents(balance),
            })
        })
        .await?;

    Ok(Json(balance))
}
