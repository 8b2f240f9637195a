//! Publishing settled transactions to the processing queues.

use super::{NEW_TRANSACTIONS_CHANNEL, PROCESSING_QUEUES, TransactionEvent};
use anyhow::Context;
use redis::aio::ConnectionManager;
use tracing::instrument;

#[derive(Clone)]
pub struct QueueService {
    conn: ConnectionManager,
}

impl QueueService {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// LPUSH the event to every processing queue and PUBLISH it, atomically
    #[instrument(skip(self, event), fields(transaction_id = %event.transaction_id, user_id = %event.user_id), err)]
    pub async fn publish(&self, event: &TransactionEvent) -> anyhow::Result<()> {
        event.validate()?;
        let payload = event.to_payload()?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for queue in PROCESSING_QUEUES {
            pipe.lpush(queue, &payload).ignore();
        }
        pipe.publish(NEW_TRANSACTIONS_CHANNEL, &payload).ignore();

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await.context("publish transaction event")?;
        metrics::counter!("fido_queue_events_published_total").increment(1);
        Ok(())
    }
}
