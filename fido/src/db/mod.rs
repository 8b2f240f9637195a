//! Database layer for data persistence and access.
//!
//! SQLx over PostgreSQL, organised around the repository pattern:
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API handlers, settlement worker)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - records in cents)
//! └──────┬──────┘
//!        ↓
//! ┌─────────────┐
//! │  PostgreSQL │
//! └─────────────┘
//! ```
//!
//! - [`handlers`]: repositories for `users` and `transactions`
//! - [`models`]: request and response records
//! - [`errors`]: [`errors::DbError`], categorised from `sqlx::Error`
//!
//! # Transactions
//!
//! Read-only paths may borrow a pooled connection. Anything touching a balance goes
//! through a transaction:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! let mut users = Users::new(&mut tx, &cipher);
//! users.adjust_balance(user_id, TransactionType::Debit, 1_000).await?;
//! tx.commit().await?;
//! ```
//!
//! # Migrations
//!
//! Migrations live in `migrations/` and run at startup through [`crate::migrator`].

pub mod errors;
pub mod handlers;
pub mod models;
