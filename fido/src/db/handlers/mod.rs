//! Repository implementations for database access.
//!
//! Each repository wraps a borrowed `PgConnection`, which may be a pooled connection or an
//! open transaction, and exposes typed operations over one table. Both implement the
//! [`Repository`] trait for plain CRUD; everything entity-specific is an inherent method.
//!
//! - [`Users`]: user records, encrypted names and balance adjustment
//! - [`Transactions`]: ledger entries, filtering, status changes and analytics
//!
//! ```ignore
//! use fido::db::handlers::{Repository, Transactions, Users};
//!
//! async fn settle(pool: &sqlx::PgPool, cipher: &FieldCipher, id: i64) -> anyhow::Result<()> {
//!     let mut tx = pool.begin().await?;
//!     let pending = Transactions::new(&mut tx).lock(id).await?;
//!     // ... adjust the balance through Users::new(&mut tx, cipher) ...
//!     tx.commit().await?;
//!     Ok(())
//! }
//! ```
//!
//! Anything that reads and then writes a balance must run inside a transaction so the
//! `FOR UPDATE` locks taken by [`Users::lock_balance`] and [`Transactions::lock`] hold.

pub mod repository;
pub mod transactions;
pub mod users;

pub use repository::Repository;
pub use transactions::{TransactionFilter, Transactions};
pub use users::{UserFilter, Users};
