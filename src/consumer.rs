use crate::queue::{publish_with_timeout, Broker, Delivery, DeliveryStream, QueueError};
use crate::receipt::Receipt;
use crate::store::{commit_with_timeout, ReceiptStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub dead_letter_queue: String,
    /// Total commit attempts per message, including the first.
    pub max_attempts: u32,
    /// Wait before attempt `n + 1` is `retry_backoff * n`.
    pub retry_backoff: Duration,
    pub commit_timeout: Duration,
    pub publish_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerOutcome {
    /// Stored and acknowledged.
    Committed,
    /// Moved to the dead-letter queue and acknowledged. If the acknowledgement
    /// itself fails, `handle` returns the error instead and the broker's
    /// redelivery puts a second copy on the dead-letter queue.
    DeadLettered,
    /// Could be neither stored nor dead-lettered; returned to the broker.
    Requeued,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub committed: u64,
    pub dead_lettered: u64,
    pub requeued: u64,
}

impl ConsumerStats {
    fn record(&mut self, outcome: ConsumerOutcome) {
        match outcome {
            ConsumerOutcome::Committed => self.committed += 1,
            ConsumerOutcome::DeadLettered => self.dead_lettered += 1,
            ConsumerOutcome::Requeued => self.requeued += 1,
        }
    }
}

/// Moves receipts from the intake queue into the store, one message at a
/// time. A message is acknowledged only once it is durable in the store or
/// on the dead-letter queue.
pub struct Consumer {
    store: Arc<dyn ReceiptStore>,
    broker: Arc<dyn Broker>,
    settings: ConsumerSettings,
}

impl Consumer {
    pub fn new(
        store: Arc<dyn ReceiptStore>,
        broker: Arc<dyn Broker>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            store,
            broker,
            settings,
        }
    }

    pub async fn run(
        &self,
        mut deliveries: Box<dyn DeliveryStream>,
        shutdown: impl Future<Output = ()>,
    ) -> Result<ConsumerStats, QueueError> {
        let mut stats = ConsumerStats::default();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    log::info!("Consumer shutting down");
                    break;
                }
                next = deliveries.next_delivery() => match next {
                    Some(Ok(delivery)) => match self.handle(delivery).await {
                        Ok(outcome) => stats.record(outcome),
                        // Unsettled deliveries come back from the broker
                        Err(e) => log::warn!("Failed to settle delivery: {e}"),
                    },
                    Some(Err(e)) => return Err(e),
                    None => {
                        log::info!("Delivery stream ended");
                        break;
                    }
                },
            }
        }

        log::info!(
            "Consumer stopped: {} committed, {} dead-lettered, {} requeued",
            stats.committed,
            stats.dead_lettered,
            stats.requeued
        );
        Ok(stats)
    }

    pub async fn handle(&self, delivery: Delivery) -> Result<ConsumerOutcome, QueueError> {
        let Some(id) = receipt_key(&delivery.message.payload) else {
            log::warn!("Delivery carries no receipt id, dead-lettering it");
            return self.dead_letter(&delivery, "unknown").await;
        };

        if delivery.redelivered {
            log::debug!("Receipt {id} is a redelivery");
        }

        if self.persist(&id, &delivery.message.payload).await {
            delivery.ack().await?;
            log::info!("Stored receipt {id}");
            return Ok(ConsumerOutcome::Committed);
        }

        self.dead_letter(&delivery, &id).await
    }

    async fn persist(&self, id: &str, payload: &[u8]) -> bool {
        let max_attempts = self.settings.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match commit_with_timeout(
                self.store.as_ref(),
                id.as_bytes(),
                payload,
                self.settings.commit_timeout,
            )
            .await
            {
                Ok(()) => return true,
                Err(e) => {
                    log::warn!(
                        "Commit of receipt {id} failed (attempt {attempt}/{max_attempts}): {e}"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.settings.retry_backoff * attempt).await;
                    }
                }
            }
        }
        false
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        id: &str,
    ) -> Result<ConsumerOutcome, QueueError> {
        let queue = &self.settings.dead_letter_queue;
        match publish_with_timeout(
            self.broker.as_ref(),
            queue,
            &delivery.message,
            self.settings.publish_timeout,
        )
        .await
        {
            Ok(()) => {
                if let Err(e) = delivery.ack().await {
                    log::error!(
                        "Receipt {id} is on dead-letter queue '{queue}' but its delivery could not be acknowledged; a redelivery will dead-letter it a second time: {e}"
                    );
                    return Err(e);
                }
                log::info!("Receipt {id} moved to dead-letter queue '{queue}'");
                Ok(ConsumerOutcome::DeadLettered)
            }
            Err(e) => {
                log::error!(
                    "CRITICAL: receipt {id} could not be stored or dead-lettered to '{queue}': {e}"
                );
                delivery.nack(true).await?;
                Ok(ConsumerOutcome::Requeued)
            }
        }
    }
}

/// The store key of a queued receipt, if the payload is a receipt that has one.
fn receipt_key(payload: &[u8]) -> Option<String> {
    Receipt::from_json(payload)
        .ok()
        .map(|receipt| receipt.id)
        .filter(|id| !id.is_empty())
}
