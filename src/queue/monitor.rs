use super::Broker;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthStatus {
    Normal(u32),
    OverWatermark(u32),
}

/// Watches the intake queue depth and raises an operational alert when the
/// backlog crosses the configured watermark.
pub struct DepthMonitor {
    broker: Arc<dyn Broker>,
    queue: String,
    watermark: u32,
}

impl DepthMonitor {
    pub fn new(broker: Arc<dyn Broker>, queue: &str, watermark: u32) -> Self {
        Self {
            broker,
            queue: queue.to_string(),
            watermark,
        }
    }

    pub async fn check(&self) -> Option<DepthStatus> {
        match self.broker.depth(&self.queue).await {
            Ok(depth) if depth > self.watermark => {
                log::warn!(
                    "ALERT: queue '{}' is getting full: {depth} messages waiting (watermark {})",
                    self.queue,
                    self.watermark
                );
                Some(DepthStatus::OverWatermark(depth))
            }
            Ok(depth) => {
                log::debug!("Queue '{}' depth: {depth}", self.queue);
                Some(DepthStatus::Normal(depth))
            }
            Err(e) => {
                log::warn!("Failed to read depth of queue '{}': {e}", self.queue);
                None
            }
        }
    }

    pub async fn run(self, every: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = interval(every);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                _ = &mut shutdown => {
                    log::debug!("Depth monitor for '{}' stopped", self.queue);
                    break;
                }
            }
        }
    }
}
