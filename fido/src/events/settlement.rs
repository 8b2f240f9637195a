//! Settlement: applying pending transactions to user balances.
//!
//! Each [`BalanceUpdateEvent`] is settled in one database transaction that locks the
//! transaction row and then the user row. Only `pending` transactions are touched, so an event
//! delivered twice (or re-dispatched by recovery) settles at most once.

use super::{BalanceUpdateEvent, EventDispatcher};
use crate::{
    cache::CacheManager,
    crypto::FieldCipher,
    db::{
        handlers::{Repository, Transactions, Users},
        models::users::BalanceUpdate,
    },
    money,
    queue::{QueueService, TransactionEvent},
    types::{TransactionId, TransactionStatus},
};
use anyhow::Context;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Pending transactions read per recovery page
const RECOVERY_BATCH: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Balance updated, transaction marked `success`
    Settled { balance: i64 },
    /// Debit exceeded the balance, transaction marked `failed`
    Rejected { balance: i64 },
    /// Transaction missing or no longer pending
    Skipped,
}

#[derive(Clone)]
pub struct Settler {
    db: PgPool,
    cipher: FieldCipher,
    cache: CacheManager,
    queue: Option<QueueService>,
}

impl Settler {
    pub fn new(db: PgPool, cipher: FieldCipher, cache: CacheManager, queue: Option<QueueService>) -> Self {
        Self { db, cipher, cache, queue }
    }

    /// Settle one event. Unexpected failures roll back and mark the transaction `failed`.
    #[instrument(skip(self), fields(transaction_id = event.transaction_id, user_id = event.user_id))]
    pub async fn handle(&self, event: BalanceUpdateEvent) -> anyhow::Result<SettlementOutcome> {
        match self.settle(event.transaction_id).await {
            Ok((outcome, published)) => {
                if !matches!(outcome, SettlementOutcome::Skipped) {
                    self.cache.invalidate_ledger(event.user_id, Some(event.transaction_id)).await;
                }
                if let Some(published) = published {
                    self.publish(&published).await;
                }
                metrics::counter!("fido_settlements_total", "outcome" => outcome.label()).increment(1);
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "Settlement failed");
                metrics::counter!("fido_settlements_total", "outcome" => "error").increment(1);
                if let Err(mark_err) = self.mark_failed(event.transaction_id).await {
                    error!(error = %format!("{mark_err:#}"), "Failed to mark transaction as failed");
                }
                self.cache.invalidate_ledger(event.user_id, Some(event.transaction_id)).await;
                Err(e)
            }
        }
    }

    /// The locked read-modify-write. Returns the queue event to publish after commit, if any.
    async fn settle(&self, transaction_id: TransactionId) -> anyhow::Result<(SettlementOutcome, Option<TransactionEvent>)> {
        let mut tx = self.db.begin().await.context("begin settlement")?;

        let Some(transaction) = Transactions::new(&mut tx).lock(transaction_id).await? else {
            debug!("Transaction no longer exists");
            return Ok((SettlementOutcome::Skipped, None));
        };
        if transaction.transaction_status != TransactionStatus::Pending {
            debug!(status = %transaction.transaction_status, "Transaction already settled");
            return Ok((SettlementOutcome::Skipped, None));
        }

        let update = Users::new(&mut tx, &self.cipher)
            .adjust_balance(transaction.user_id, transaction.transaction_type, transaction.transaction_amount)
            .await
            .context("adjust balance")?;

        let outcome = match update {
            BalanceUpdate::Applied { balance } => {
                Transactions::new(&mut tx).set_status(transaction_id, TransactionStatus::Success).await?;
                SettlementOutcome::Settled { balance }
            }
            BalanceUpdate::InsufficientFunds { balance } => {
                info!(balance, requested = transaction.transaction_amount, "Debit exceeds balance");
                Transactions::new(&mut tx).set_status(transaction_id, TransactionStatus::Failed).await?;
                SettlementOutcome::Rejected { balance }
            }
        };

        let published = if matches!(outcome, SettlementOutcome::Settled { .. }) && self.queue.is_some() {
            let user = Users::new(&mut tx, &self.cipher)
                .get_by_id(transaction.user_id)
                .await?
                .context("settled user disappeared")?;
            match user.email {
                Some(email) => match TransactionEvent::new(
                    transaction.user_id.to_string(),
                    user.full_name,
                    email,
                    money::from_cents(transaction.transaction_amount),
                    transaction.transaction_type.as_str(),
                    transaction.transaction_date,
                    transaction_id.to_string(),
                ) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(error = %e, "Skipping queue publish for invalid event");
                        None
                    }
                },
                None => None,
            }
        } else {
            None
        };

        tx.commit().await.context("commit settlement")?;
        Ok((outcome, published))
    }

    /// Publishing happens after commit and never undoes a settlement
    async fn publish(&self, event: &TransactionEvent) {
        if let Some(queue) = &self.queue
            && let Err(e) = queue.publish(event).await
        {
            error!(error = %format!("{e:#}"), "Failed to publish settled transaction");
        }
    }

    /// Mark a still-pending transaction `failed` in a fresh transaction
    async fn mark_failed(&self, transaction_id: TransactionId) -> anyhow::Result<()> {
        let mut tx = self.db.begin().await?;
        let mut repo = Transactions::new(&mut tx);
        if let Some(transaction) = repo.lock(transaction_id).await?
            && transaction.transaction_status == TransactionStatus::Pending
        {
            repo.set_status(transaction_id, TransactionStatus::Failed).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Re-dispatch transactions left pending by a previous run
    #[instrument(skip_all, err)]
    pub async fn recover_pending(&self, dispatcher: &EventDispatcher) -> anyhow::Result<usize> {
        self.recover_pending_in_pages(dispatcher, RECOVERY_BATCH).await
    }

    async fn recover_pending_in_pages(&self, dispatcher: &EventDispatcher, page_size: i64) -> anyhow::Result<usize> {
        let mut count = 0;
        let mut after_id: TransactionId = 0;
        loop {
            // Release the connection before dispatching; the worker settles from the same pool
            let page = {
                let mut conn = self.db.acquire().await?;
                Transactions::new(&mut conn).list_pending(after_id, page_size).await?
            };
            let page_len = page.len();

            for transaction in page {
                after_id = transaction.id;
                dispatcher
                    .dispatch(BalanceUpdateEvent {
                        transaction_id: transaction.id,
                        user_id: transaction.user_id,
                    })
                    .await?;
                count += 1;
            }

            if (page_len as i64) < page_size {
                break;
            }
            debug!(count, after_id, "Recovering next page of pending transactions");
        }
        if count > 0 {
            info!(count, "Re-dispatched pending transactions");
        }
        Ok(count)
    }
}

impl SettlementOutcome {
    fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::Settled { .. } => "settled",
            SettlementOutcome::Rejected { .. } => "rejected",
            SettlementOutcome::Skipped => "skipped",
        }
    }
}

/// Consumes balance-update events until shutdown or until every dispatcher is dropped
pub struct SettlementWorker {
    settler: Settler,
    receiver: mpsc::Receiver<BalanceUpdateEvent>,
}

impl SettlementWorker {
    pub fn new(settler: Settler, receiver: mpsc::Receiver<BalanceUpdateEvent>) -> Self {
        Self { settler, receiver }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Settlement worker started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = self.receiver.recv() => {
                    let Some(event) = event else { break };
                    // Errors are logged and the transaction marked failed inside handle
                    let _ = self.settler.handle(event).await;
                }
            }
        }
        info!("Settlement worker stopped");
    }
}
