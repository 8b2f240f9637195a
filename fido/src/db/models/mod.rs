//! Database record models.
//!
//! Requests going into repositories and responses coming out of them. These are kept separate
//! from the API models so storage (integer cents, encrypted names) can differ from what clients
//! see (decimal amounts, plaintext names).

pub mod transactions;
pub mod users;
