use crate::index::ReceiptIndex;
use crate::queue::{publish_with_timeout, Broker, QueueError, QueueMessage};
use crate::receipt::{ReceiptSubmission, ValidationError};
use crate::scoring::{ScoreError, ScoringEngine};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("malformed receipt: {0}")]
    Decode(String),
    #[error("invalid receipt: {0}")]
    Invalid(#[from] ValidationError),
    #[error("no receipt found for id {0}")]
    NotFound(String),
    #[error("unable to score receipt: {0}")]
    Unprocessable(#[from] ScoreError),
}

/// Result of an accepted submission. The id is final as soon as this is
/// returned; `publish` resolves once the hand-off to the queue has finished
/// or failed.
pub struct Submission {
    pub id: String,
    pub publish: JoinHandle<Result<(), QueueError>>,
}

pub struct IntakeService {
    index: ReceiptIndex,
    broker: Arc<dyn Broker>,
    scoring: ScoringEngine,
    intake_queue: String,
    publish_timeout: Duration,
    publishes: TaskTracker,
}

impl IntakeService {
    pub fn new(
        index: ReceiptIndex,
        broker: Arc<dyn Broker>,
        intake_queue: &str,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            index,
            broker,
            scoring: ScoringEngine::new(),
            intake_queue: intake_queue.to_string(),
            publish_timeout,
            publishes: TaskTracker::new(),
        }
    }

    pub fn index(&self) -> &ReceiptIndex {
        &self.index
    }

    pub async fn submit(&self, payload: &[u8]) -> Result<Submission, IntakeError> {
        let submission = ReceiptSubmission::from_json(payload)
            .map_err(|e| IntakeError::Decode(e.to_string()))?;
        submission.validate()?;

        let receipt = self.index.accept(submission).await;
        log::info!("Accepted receipt {} from {}", receipt.id, receipt.retailer);

        let broker = Arc::clone(&self.broker);
        let queue = self.intake_queue.clone();
        let timeout = self.publish_timeout;
        let id = receipt.id.clone();
        let publish = self.publishes.spawn(async move {
            let message = QueueMessage::json(receipt.to_json().map_err(|e| {
                QueueError::Publish {
                    queue: queue.clone(),
                    reason: format!("failed to encode receipt: {e}"),
                }
            })?);

            let result = publish_with_timeout(broker.as_ref(), &queue, &message, timeout).await;
            match &result {
                Ok(()) => log::debug!("Published receipt {} to '{queue}'", receipt.id),
                Err(e) => log::warn!("Receipt {} was not queued for storage: {e}", receipt.id),
            }
            result
        });

        Ok(Submission { id, publish })
    }

    /// Wait up to `limit` for publishes still in flight. Returns false when
    /// some were still running at the deadline.
    pub async fn drain_publishes(&self, limit: Duration) -> bool {
        self.publishes.close();
        let pending = self.publishes.len();
        if pending > 0 {
            log::info!("Waiting for {pending} receipts to be handed to the queue");
        }

        match tokio::time::timeout(limit, self.publishes.wait()).await {
            Ok(()) => true,
            Err(_) => {
                log::warn!(
                    "{} receipts were still being queued at shutdown and may never be stored",
                    self.publishes.len()
                );
                false
            }
        }
    }

    pub async fn get_points(&self, id: &str) -> Result<i64, IntakeError> {
        let receipt = self
            .index
            .get(id)
            .await
            .ok_or_else(|| IntakeError::NotFound(id.to_string()))?;
        Ok(self.scoring.score(&receipt)?)
    }
}
