//! In-process events raised by request handlers.
//!
//! Creating a transaction only records it as `pending`. The handler then raises a
//! [`BalanceUpdateEvent`] through the [`EventDispatcher`], and the
//! [`settlement::SettlementWorker`] applies it to the balance in the background.

pub mod settlement;

use crate::types::{TransactionId, UserId};
use tokio::sync::mpsc;

/// A pending transaction that needs settling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdateEvent {
    pub transaction_id: TransactionId,
    pub user_id: UserId,
}

#[derive(Debug, thiserror::Error)]
#[error("settlement worker is not running")]
pub struct DispatchError;

/// Sending half of the bounded settlement channel
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: mpsc::Sender<BalanceUpdateEvent>,
}

impl EventDispatcher {
    /// A dispatcher and the receiver the settlement worker reads from
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BalanceUpdateEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Queue an event, waiting while the channel is full
    pub async fn dispatch(&self, event: BalanceUpdateEvent) -> Result<(), DispatchError> {
        self.sender.send(event).await.map_err(|_| DispatchError)?;
        metrics::counter!("fido_settlement_events_dispatched_total").increment(1);
        Ok(())
    }
}
