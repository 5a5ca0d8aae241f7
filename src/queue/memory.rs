//! In-process broker with the same settle semantics as the AMQP one:
//! deliveries stay unacknowledged until acked or nacked, and a subscription
//! that goes away returns its unacknowledged deliveries to the front of the
//! queue, flagged as redelivered.

use super::{Acknowledge, Broker, Delivery, DeliveryStream, QueueError, QueueMessage};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

struct Pending {
    message: QueueMessage,
    redelivered: bool,
}

struct Unacked {
    queue: String,
    subscriber: u64,
    message: QueueMessage,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, VecDeque<Pending>>,
    unacked: HashMap<u64, Unacked>,
    next_tag: u64,
    next_subscriber: u64,
    failing_publishes: HashSet<String>,
    closed: bool,
}

impl State {
    fn requeue(&mut self, unacked: Unacked) {
        if let Some(queue) = self.queues.get_mut(&unacked.queue) {
            queue.push_front(Pending {
                message: unacked.message,
                redelivered: true,
            });
        }
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_queues(names: &[&str]) -> Self {
        let broker = Self::new();
        for name in names {
            broker.declare(name);
        }
        broker
    }

    pub fn declare(&self, queue: &str) {
        self.inner.lock().queues.entry(queue.to_string()).or_default();
    }

    /// Ready messages currently waiting in `queue`, oldest first.
    pub fn messages(&self, queue: &str) -> Vec<QueueMessage> {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| q.iter().map(|p| p.message.clone()).collect())
            .unwrap_or_default()
    }

    pub fn unacked_count(&self) -> usize {
        self.inner.lock().unacked.len()
    }

    /// Make every publish to `queue` fail until switched back off.
    pub fn set_publish_failure(&self, queue: &str, failing: bool) {
        let mut state = self.inner.lock();
        if failing {
            state.failing_publishes.insert(queue.to_string());
        } else {
            state.failing_publishes.remove(queue);
        }
    }

    /// End every subscription. Pending `next_delivery` calls return `None`.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, queue: &str, message: &QueueMessage) -> Result<(), QueueError> {
        {
            let mut state = self.inner.lock();
            if state.failing_publishes.contains(queue) {
                return Err(QueueError::Publish {
                    queue: queue.to_string(),
                    reason: "broker unavailable".to_string(),
                });
            }
            let ready = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;
            ready.push_back(Pending {
                message: message.clone(),
                redelivered: false,
            });
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<u32, QueueError> {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| q.len() as u32)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))
    }

    async fn subscribe(&self, queue: &str) -> Result<Box<dyn DeliveryStream>, QueueError> {
        let mut state = self.inner.lock();
        if !state.queues.contains_key(queue) {
            return Err(QueueError::UnknownQueue(queue.to_string()));
        }
        state.next_subscriber += 1;
        Ok(Box::new(MemorySubscription {
            inner: self.inner.clone(),
            queue: queue.to_string(),
            subscriber: state.next_subscriber,
        }))
    }
}

struct MemorySubscription {
    inner: Arc<Inner>,
    queue: String,
    subscriber: u64,
}

impl MemorySubscription {
    fn try_take(&self) -> Option<Option<Delivery>> {
        let mut state = self.inner.lock();
        if state.closed {
            return Some(None);
        }
        let pending = state.queues.get_mut(&self.queue)?.pop_front()?;

        state.next_tag += 1;
        let tag = state.next_tag;
        state.unacked.insert(
            tag,
            Unacked {
                queue: self.queue.clone(),
                subscriber: self.subscriber,
                message: pending.message.clone(),
            },
        );

        let acker = MemoryAcker {
            inner: self.inner.clone(),
            tag,
        };
        Some(Some(Delivery::new(
            pending.message,
            pending.redelivered,
            Box::new(acker),
        )))
    }
}

#[async_trait]
impl DeliveryStream for MemorySubscription {
    async fn next_delivery(&mut self) -> Option<Result<Delivery, QueueError>> {
        loop {
            let notified = self.inner.notify.notified();
            if let Some(taken) = self.try_take() {
                return taken.map(Ok);
            }
            notified.await;
        }
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        let mut tags: Vec<u64> = state
            .unacked
            .iter()
            .filter(|(_, u)| u.subscriber == self.subscriber)
            .map(|(tag, _)| *tag)
            .collect();
        // Newest first so push_front restores the original order
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(unacked) = state.unacked.remove(&tag) {
                state.requeue(unacked);
            }
        }
        drop(state);
        self.inner.notify.notify_waiters();
    }
}

struct MemoryAcker {
    inner: Arc<Inner>,
    tag: u64,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.inner
            .lock()
            .unacked
            .remove(&self.tag)
            .map(|_| ())
            .ok_or_else(|| QueueError::Acknowledge(format!("unknown delivery tag {}", self.tag)))
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        {
            let mut state = self.inner.lock();
            let unacked = state.unacked.remove(&self.tag).ok_or_else(|| {
                QueueError::Acknowledge(format!("unknown delivery tag {}", self.tag))
            })?;
            if requeue {
                state.requeue(unacked);
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }
}
