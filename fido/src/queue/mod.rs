//! Redis processing queues for settled transactions.
//!
//! When a transaction settles, [`QueueService::publish`] pushes one JSON [`TransactionEvent`]
//! onto each processing list and announces it on the `transactions:new` channel, all in a
//! single atomic pipeline. [`QueueWorker`] drains the lists:
//!
//! | list | effect |
//! |---|---|
//! | `queue:user_stats` | daily counter, running average, transaction count |
//! | `queue:credit_score` | credit score in `[300, 850]` |
//! | `queue:notifications` | transaction email |

pub mod event;
pub mod publisher;
pub mod scoring;
pub mod worker;

pub use event::TransactionEvent;
pub use publisher::QueueService;
pub use worker::QueueWorker;

pub const USER_STATS_QUEUE: &str = "queue:user_stats";
pub const CREDIT_SCORE_QUEUE: &str = "queue:credit_score";
pub const NOTIFICATIONS_QUEUE: &str = "queue:notifications";

/// Pub/sub channel for real-time subscribers
pub const NEW_TRANSACTIONS_CHANNEL: &str = "transactions:new";

/// Every list a published event lands in, in the order the worker drains them
pub const PROCESSING_QUEUES: [&str; 3] = [USER_STATS_QUEUE, CREDIT_SCORE_QUEUE, NOTIFICATIONS_QUEUE];

pub fn user_stats_key(user_id: &str) -> String {
    format!("user:{user_id}:stats")
}

pub fn avg_transaction_key(user_id: &str) -> String {
    format!("user:{user_id}:avg_transaction")
}

pub fn tx_count_key(user_id: &str) -> String {
    format!("user:{user_id}:tx_count")
}

pub fn credit_score_key(user_id: &str) -> String {
    format!("user:{user_id}:credit_score")
}
