//! API request and response data models.
//!
//! API models are kept apart from [`crate::db::models`]: clients send and receive decimal
//! amounts and plaintext names, while storage works in cents and ciphertext. Conversion
//! happens in `into_db_request` and the `From<..DBResponse>` impls, which is also where
//! request validation lives.
//!
//! - [`users`]: user creation, updates and balances
//! - [`transactions`]: transaction payloads, listing queries and analytics
//! - [`pagination`]: `skip`/`limit` parameters and the paginated wrapper
//! - [`response`]: the `{status, message, data, error}` envelope
//! - [`health`]: liveness and readiness payloads

pub mod health;
pub mod pagination;
pub mod response;
pub mod transactions;
pub mod users;
