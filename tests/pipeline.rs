use async_trait::async_trait;
use receipt_processor::queue::memory::MemoryBroker;
use receipt_processor::queue::{Broker, QueueMessage};
use receipt_processor::store::StoreEntry;
use receipt_processor::{
    Consumer, ConsumerSettings, IntakeService, Receipt, ReceiptIndex, ReceiptStore,
    ReceiptSubmission, ScoringEngine, SledStore, StoreError,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const INTAKE: &str = "POST_receipts";
const DEAD: &str = "failed_receipts";

const TARGET_RECEIPT: &str = r#"{
    "retailer": "Target",
    "purchaseDate": "2022-01-01",
    "purchaseTime": "13:01",
    "items": [
        {"shortDescription": "Mountain Dew 12PK", "price": "6.49"},
        {"shortDescription": "Emils Pizza", "price": "12.25"},
        {"shortDescription": "Knorr Creamy Chicken", "price": "1.26"},
        {"shortDescription": "Doritos Nacho Cheese", "price": "3.35"},
        {"shortDescription": "   Klarbrunn 12-PK 12 FL OZ  ", "price": "12.00"}
    ],
    "total": "35.35"
}"#;

/// Sled store whose commits can be switched to fail.
struct FaultyStore {
    inner: SledStore,
    failing: AtomicBool,
    attempts: AtomicU32,
}

impl FaultyStore {
    fn new(inner: SledStore, failing: bool) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(failing),
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ReceiptStore for FaultyStore {
    async fn commit(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Commit("injected failure".to_string()));
        }
        self.inner.commit(key, value).await
    }

    async fn scan(&self) -> Result<Vec<StoreEntry>, StoreError> {
        self.inner.scan().await
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.inner.len().await
    }
}

fn settings() -> ConsumerSettings {
    ConsumerSettings {
        dead_letter_queue: DEAD.to_string(),
        max_attempts: 3,
        retry_backoff: Duration::from_millis(1),
        commit_timeout: Duration::from_secs(2),
        publish_timeout: Duration::from_secs(2),
    }
}

fn intake(broker: &MemoryBroker, index: ReceiptIndex) -> IntakeService {
    IntakeService::new(
        index,
        Arc::new(broker.clone()),
        INTAKE,
        Duration::from_secs(2),
    )
}

async fn wait_until_settled(broker: &MemoryBroker) {
    while !broker.messages(INTAKE).is_empty() || broker.unacked_count() > 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_points_do_not_depend_on_queue_availability() {
    let broker = MemoryBroker::with_queues(&[INTAKE, DEAD]);
    broker.set_publish_failure(INTAKE, true);
    let service = intake(&broker, ReceiptIndex::new());

    let submission = service.submit(TARGET_RECEIPT.as_bytes()).await.unwrap();
    assert!(submission.publish.await.unwrap().is_err());

    let expected = ScoringEngine::new()
        .score(
            &ReceiptSubmission::from_json(TARGET_RECEIPT.as_bytes())
                .unwrap()
                .into_receipt(submission.id.clone()),
        )
        .unwrap();
    assert_eq!(expected, 20);
    assert_eq!(service.get_points(&submission.id).await.unwrap(), expected);
}

#[tokio::test]
async fn test_submitted_receipts_reach_the_store() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let broker = MemoryBroker::with_queues(&[INTAKE, DEAD]);
    let service = intake(&broker, ReceiptIndex::new());

    let submission = service.submit(TARGET_RECEIPT.as_bytes()).await.unwrap();
    submission.publish.await.unwrap().unwrap();

    let consumer = Consumer::new(store.clone(), Arc::new(broker.clone()), settings());
    let deliveries = broker.subscribe(INTAKE).await.unwrap();
    let closer = broker.clone();
    let run = tokio::spawn(async move {
        consumer
            .run(deliveries, std::future::pending::<()>())
            .await
    });
    wait_until_settled(&broker).await;
    closer.close();
    assert_eq!(run.await.unwrap().unwrap().committed, 1);

    // A restarted intake sees the same receipt and score
    let rebuilt = ReceiptIndex::load_from_store(store.as_ref()).await.unwrap();
    let restarted = intake(&broker, rebuilt);
    assert_eq!(restarted.get_points(&submission.id).await.unwrap(), 20);
    assert_eq!(
        restarted.index().get(&submission.id).await,
        service.index().get(&submission.id).await
    );
}

#[tokio::test]
async fn test_failed_commit_is_dead_lettered_exactly_once() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FaultyStore::new(SledStore::open(dir.path()).unwrap(), true));
    let broker = MemoryBroker::with_queues(&[INTAKE, DEAD]);
    let service = intake(&broker, ReceiptIndex::new());

    let submission = service.submit(TARGET_RECEIPT.as_bytes()).await.unwrap();
    submission.publish.await.unwrap().unwrap();
    let published = broker.messages(INTAKE)[0].payload.clone();

    let consumer = Consumer::new(store.clone(), Arc::new(broker.clone()), settings());
    let deliveries = broker.subscribe(INTAKE).await.unwrap();
    let closer = broker.clone();
    let run = tokio::spawn(async move {
        consumer
            .run(deliveries, std::future::pending::<()>())
            .await
    });
    wait_until_settled(&broker).await;
    closer.close();

    let stats = run.await.unwrap().unwrap();
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.committed, 0);
    assert_eq!(store.attempts.load(Ordering::SeqCst), 3);

    let dead = broker.messages(DEAD);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].payload, published);
    assert!(broker.messages(INTAKE).is_empty());
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_consumer_crash_before_commit_is_redelivered() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let broker = MemoryBroker::with_queues(&[INTAKE, DEAD]);

    let receipt: Receipt = ReceiptSubmission::from_json(TARGET_RECEIPT.as_bytes())
        .unwrap()
        .into_receipt("crashRecovery0001".to_string());
    broker
        .publish(INTAKE, &QueueMessage::json(receipt.to_json().unwrap()))
        .await
        .unwrap();

    // First consumer receives the message and dies before committing
    {
        let mut deliveries = broker.subscribe(INTAKE).await.unwrap();
        let delivery = deliveries.next_delivery().await.unwrap().unwrap();
        assert!(!delivery.redelivered);
        drop(delivery);
    }
    assert_eq!(store.len().await.unwrap(), 0);
    assert_eq!(broker.messages(INTAKE).len(), 1);

    let consumer = Consumer::new(store.clone(), Arc::new(broker.clone()), settings());
    let mut deliveries = broker.subscribe(INTAKE).await.unwrap();
    let delivery = deliveries.next_delivery().await.unwrap().unwrap();
    assert!(delivery.redelivered);
    consumer.handle(delivery).await.unwrap();

    let entries = store.scan().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, b"crashRecovery0001".to_vec());
    assert_eq!(Receipt::from_json(&entries[0].1).unwrap(), receipt);
    assert_eq!(broker.unacked_count(), 0);
}
