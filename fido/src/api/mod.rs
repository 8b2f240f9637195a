//! HTTP API: axum handlers and their request/response models.
//!
//! - **Users** (`/api/v1/users/*`): user records and balances
//! - **Transactions** (`/api/v1/transactions/*`): ledger entries, per-user history, analytics
//! - **Health** (`/health`, `/health/ready`): liveness and dependency readiness
//!
//! Every handler carries a `utoipa::path` annotation; the generated document is served at
//! `/api/v1/openapi.json` and rendered at `/docs` and `/redoc`.

pub mod handlers;
pub mod models;
