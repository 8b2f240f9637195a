//! OpenAPI documentation.
//!
//! [`ApiDoc`] describes the versioned API mounted under `api_prefix` plus the root health probes.
//! It is served as JSON at `{api_prefix}/openapi.json`, rendered by Scalar at `/docs` and by
//! ReDoc at `/redoc`.

use utoipa::{Modify, OpenApi};

use crate::api;

/// ReDoc page; loads the spec from the JSON route
pub const REDOC_HTML: &str = include_str!("redoc.html");

/// Prefixes versioned paths with the configured `api_prefix`, leaving the root probes alone.
pub struct ApiPrefix(pub String);

impl Modify for ApiPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let paths = std::mem::take(&mut openapi.paths.paths);
        openapi.paths.paths = paths
            .into_iter()
            .map(|(path, item)| {
                if path.starts_with("/health") {
                    (path, item)
                } else {
                    (format!("{}{path}", self.0), item)
                }
            })
            .collect();
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fido Transaction API",
        description = "Ledger service for user balances, credit and debit transactions, and transaction analytics.

Amounts are decimal strings with two places (`\"100.50\"`). Creating a transaction records it as `pending`; \
the balance is updated asynchronously, after which the transaction is `success` or, for a debit that would \
overdraw, `failed`."
    ),
    paths(
        api::handlers::health::health,
        api::handlers::health::readiness,
        api::handlers::users::create_user,
        api::handlers::users::list_users,
        api::handlers::users::get_user,
        api::handlers::users::update_user,
        api::handlers::users::delete_user,
        api::handlers::users::get_user_balance,
        api::handlers::transactions::create_transaction,
        api::handlers::transactions::list_transactions,
        api::handlers::transactions::get_transaction,
        api::handlers::transactions::get_user_transactions,
        api::handlers::transactions::update_transaction,
        api::handlers::transactions::delete_transaction,
        api::handlers::transactions::get_transaction_analytics,
    ),
    components(
        schemas(
            api::models::response::ApiResponse,
            api::models::response::ResponseStatus,
            api::models::health::HealthResponse,
            api::models::health::ReadinessResponse,
            api::models::health::DependencyCheck,
            api::models::health::DependencyState,
            api::models::users::UserCreate,
            api::models::users::UserUpdate,
            api::models::users::UserResponse,
            api::models::users::UserBalanceResponse,
            api::models::transactions::TransactionCreate,
            api::models::transactions::TransactionUpdate,
            api::models::transactions::TransactionResponse,
            api::models::transactions::TransactionAnalyticsResponse,
            crate::types::TransactionType,
            crate::types::TransactionStatus,
        )
    ),
    tags(
        (name = "health", description = "Liveness and readiness probes"),
        (name = "users", description = "User accounts and balances"),
        (name = "transactions", description = "Credits, debits and analytics"),
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// The document with versioned paths under `api_prefix`
    pub fn with_prefix(api_prefix: &str) -> utoipa::openapi::OpenApi {
        let mut openapi = Self::openapi();
        ApiPrefix(api_prefix.to_string()).modify(&mut openapi);
        openapi
    }
}
