//! Background consumer for the processing queues.

use super::{
    CREDIT_SCORE_QUEUE, NOTIFICATIONS_QUEUE, PROCESSING_QUEUES, TransactionEvent, USER_STATS_QUEUE, avg_transaction_key,
    credit_score_key,
    scoring::{DEFAULT_CREDIT_SCORE, next_credit_score, next_running_average},
    tx_count_key, user_stats_key,
};
use crate::{
    config::QueueConfig,
    email::{EmailService, TransactionEmailContext},
};
use anyhow::Context;
use chrono::Utc;
use redis::{AsyncCommands, aio::MultiplexedConnection};
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub struct QueueWorker {
    client: redis::Client,
    email: Option<Arc<EmailService>>,
    config: QueueConfig,
}

impl QueueWorker {
    /// The worker opens its own connection since BRPOP blocks it
    pub fn new(client: redis::Client, email: Option<Arc<EmailService>>, config: QueueConfig) -> Self {
        Self { client, email, config }
    }

    /// Drain the queues until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("queue worker redis connection")?;
        info!("Queue worker started");

        loop {
            // Only the pop races shutdown; a popped message is always processed to the end
            let popped = tokio::select! {
                _ = shutdown.cancelled() => break,
                popped = self.pop(&mut conn) => popped,
            };

            let result = match popped {
                Ok(Some((queue, payload))) => self.process(&mut conn, queue, &payload).await,
                Ok(None) => Ok(()),
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                error!(error = %format!("{e:#}"), "Error processing queue message");
                metrics::counter!("fido_queue_errors_total").increment(1);
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.error_backoff) => {}
                }
            }
        }

        info!("Queue worker stopped");
        Ok(())
    }

    /// Pop at most one message, checking the queues in order
    async fn pop(&self, conn: &mut MultiplexedConnection) -> anyhow::Result<Option<(String, String)>> {
        conn.brpop(&PROCESSING_QUEUES[..], self.config.poll_timeout.as_secs_f64())
            .await
            .context("BRPOP processing queues")
    }

    /// Apply one popped message according to the queue it came from
    async fn process(&self, conn: &mut MultiplexedConnection, queue: String, payload: &str) -> anyhow::Result<()> {
        let event = TransactionEvent::from_payload(payload).with_context(|| format!("decode message from {queue}"))?;
        debug!(%queue, transaction_id = %event.transaction_id, "Processing queue message");

        match queue.as_str() {
            USER_STATS_QUEUE => {
                process_user_stats(conn, &event).await?;
            }
            CREDIT_SCORE_QUEUE => {
                process_credit_score(conn, &event).await?;
            }
            NOTIFICATIONS_QUEUE => self.process_notification(&event).await?,
            other => warn!(queue = other, "Message from unknown queue"),
        }
        metrics::counter!("fido_queue_messages_processed_total", "queue" => queue).increment(1);
        Ok(())
    }

    #[instrument(skip_all, fields(transaction_id = %event.transaction_id))]
    async fn process_notification(&self, event: &TransactionEvent) -> anyhow::Result<()> {
        let Some(email) = &self.email else {
            return Ok(());
        };
        if event.email.is_empty() {
            return Ok(());
        }

        let context = TransactionEmailContext {
            user_id: event.user_id.clone(),
            full_name: event.full_name.clone(),
            transaction_amount: event.transaction_amount,
            transaction_type: event.transaction_type,
            transaction_date: event.transaction_date,
            transaction_id: event.transaction_id.clone(),
        };
        email
            .send_transaction_notification(&event.email, &context)
            .await
            .map_err(|e| anyhow::anyhow!("send notification: {e}"))?;
        Ok(())
    }
}

/// Bump today's counter and fold the amount into the running average
#[instrument(skip_all, fields(user_id = %event.user_id), err)]
pub async fn process_user_stats<C>(conn: &mut C, event: &TransactionEvent) -> anyhow::Result<f64>
where
    C: redis::aio::ConnectionLike + Send + Sync,
{
    let user_id = event.user_id.as_str();
    let amount = event.transaction_amount.to_f64().unwrap_or_default();
    let today = Utc::now().date_naive().format("%Y-%m-%d");

    let _: i64 = conn.hincr(user_stats_key(user_id), format!("tx_count:{today}"), 1).await?;

    let current_avg: Option<f64> = conn.get(avg_transaction_key(user_id)).await?;
    let previous_count: Option<u64> = conn.get(tx_count_key(user_id)).await?;
    let count = previous_count.unwrap_or(0) + 1;
    let new_avg = next_running_average(current_avg.unwrap_or(0.0), count, amount);

    let _: () = redis::pipe()
        .atomic()
        .set(avg_transaction_key(user_id), new_avg)
        .ignore()
        .set(tx_count_key(user_id), count)
        .ignore()
        .query_async(conn)
        .await?;

    Ok(new_avg)
}

/// Apply the score adjustment for one transaction and store the result
#[instrument(skip_all, fields(user_id = %event.user_id), err)]
pub async fn process_credit_score<C>(conn: &mut C, event: &TransactionEvent) -> anyhow::Result<f64>
where
    C: redis::aio::ConnectionLike + Send + Sync,
{
    let key = credit_score_key(&event.user_id);
    let amount = event.transaction_amount.to_f64().unwrap_or_default();

    let current: Option<f64> = conn.get(&key).await?;
    let score = next_credit_score(current.unwrap_or(DEFAULT_CREDIT_SCORE), event.transaction_type, amount);
    let _: () = conn.set(&key, score).await?;
    Ok(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueService;
    use rust_decimal::Decimal;

    async fn redis_connection() -> Option<(redis::Client, MultiplexedConnection)> {
        let url = std::env::var("REDIS_URL").ok()?;
        let client = redis::Client::open(url).ok()?;
        let conn = client.get_multiplexed_async_connection().await.ok()?;
        Some((client, conn))
    }

    fn event(user_id: &str, amount: i64, transaction_type: &str) -> TransactionEvent {
        TransactionEvent::new(
            user_id,
            "Test User",
            "test@example.com",
            Decimal::new(amount, 0),
            transaction_type,
            Utc::now(),
            "1",
        )
        .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL and a local Redis"]
    async fn stats_and_score_accumulate() {
        let Some((_client, mut conn)) = redis_connection().await else {
            eprintln!("skipping: REDIS_URL not set or redis not reachable");
            return;
        };
        let user_id = format!("test-{}", std::process::id());
        let _: () = redis::cmd("DEL")
            .arg(avg_transaction_key(&user_id))
            .arg(tx_count_key(&user_id))
            .arg(credit_score_key(&user_id))
            .arg(user_stats_key(&user_id))
            .query_async(&mut conn)
            .await
            .unwrap();

        assert_eq!(process_user_stats(&mut conn, &event(&user_id, 100, "credit")).await.unwrap(), 100.0);
        assert_eq!(process_user_stats(&mut conn, &event(&user_id, 50, "debit")).await.unwrap(), 75.0);
        let count: u64 = conn.get(tx_count_key(&user_id)).await.unwrap();
        assert_eq!(count, 2);

        assert_eq!(process_credit_score(&mut conn, &event(&user_id, 2_000, "credit")).await.unwrap(), 702.0);
        assert_eq!(process_credit_score(&mut conn, &event(&user_id, 2_000, "debit")).await.unwrap(), 701.0);
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL and a local Redis"]
    async fn publish_fans_out_to_every_queue() {
        let Some((client, mut conn)) = redis_connection().await else {
            eprintln!("skipping: REDIS_URL not set or redis not reachable");
            return;
        };
        let manager = redis::aio::ConnectionManager::new(client).await.unwrap();
        let _: () = redis::cmd("DEL").arg(&PROCESSING_QUEUES[..]).query_async(&mut conn).await.unwrap();

        let event = event("42", 10, "credit");
        QueueService::new(manager).publish(&event).await.unwrap();

        for queue in PROCESSING_QUEUES {
            let payload: Option<String> = conn.rpop(queue, None).await.unwrap();
            assert_eq!(TransactionEvent::from_payload(&payload.unwrap()).unwrap(), event);
        }
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL and a local Redis"]
    async fn shutdown_finishes_a_popped_message() {
        let Some((client, mut conn)) = redis_connection().await else {
            eprintln!("skipping: REDIS_URL not set or redis not reachable");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        let email = EmailService::new(&crate::config::EmailConfig {
            transport: crate::config::EmailTransportKind::File,
            file_path: dir.path().to_string_lossy().into_owned(),
            enable_notifications: true,
            ..Default::default()
        })
        .unwrap();

        let payload = event("43", 10, "credit").to_payload().unwrap();
        let _: () = conn.lpush(NOTIFICATIONS_QUEUE, &payload).await.unwrap();

        let shutdown = CancellationToken::new();
        let worker = QueueWorker::new(client, Some(Arc::new(email)), QueueConfig::default());
        let handle = tokio::spawn(worker.run(shutdown.clone()));

        // Cancel as soon as the message leaves Redis
        for _ in 0..200 {
            let len: u64 = conn.llen(NOTIFICATIONS_QUEUE).await.unwrap();
            if len == 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        shutdown.cancel();
        handle.await.unwrap().unwrap();

        assert!(std::fs::read_dir(dir.path()).unwrap().count() >= 1, "popped notification was dropped");
    }
}
