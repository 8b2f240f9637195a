//! HTTP request handlers, one module per resource.
//!
//! - [`health`]: liveness and readiness probes, mounted at the root
//! - [`users`]: user CRUD and balance lookup
//! - [`transactions`]: transaction CRUD, per-user history and analytics
//!
//! Handlers return [`crate::errors::Result`]; errors render as the standard JSON envelope.

pub mod health;
pub mod transactions;
pub mod users;
