use crate::receipt::{Receipt, ReceiptSubmission};
use crate::store::{ReceiptStore, StoreError};
use rand::{distr::Alphanumeric, Rng};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub const ID_LENGTH: usize = 16;

/// Random alphanumeric identifier drawn from the thread-local CSPRNG.
pub fn generate_id(length: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Read path for scoring: receipt id to receipt.
///
/// Lifecycle: built once at intake startup from a full scan of the store
/// (`load_from_store`), then grown by `accept` as submissions come in. It is
/// owned by the intake service and never shared with the consumer. All access
/// goes through the lock, so readers never see a half-written entry.
#[derive(Clone, Default)]
pub struct ReceiptIndex {
    entries: Arc<RwLock<HashMap<String, Receipt>>>,
}

impl ReceiptIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load_from_store(store: &dyn ReceiptStore) -> Result<Self, StoreError> {
        let index = Self::new();
        let loaded = index.rebuild(store).await?;
        log::info!("Loaded {loaded} receipts from the store");
        Ok(index)
    }

    /// Replace the contents with a projection of the store. Entries whose key
    /// or value cannot be decoded are skipped.
    pub async fn rebuild(&self, store: &dyn ReceiptStore) -> Result<usize, StoreError> {
        let mut rebuilt = HashMap::new();
        for (key, value) in store.scan().await? {
            let Ok(id) = String::from_utf8(key) else {
                log::warn!("Skipping store entry with a non UTF-8 key");
                continue;
            };
            match Receipt::from_json(&value) {
                Ok(mut receipt) => {
                    if receipt.id.is_empty() {
                        receipt.id = id.clone();
                    }
                    rebuilt.insert(id, receipt);
                }
                Err(e) => log::warn!("Skipping undecodable receipt {id}: {e}"),
            }
        }

        let count = rebuilt.len();
        *self.entries.write().await = rebuilt;
        Ok(count)
    }

    /// Assign a fresh id that is not already in the index and insert the
    /// receipt under it.
    pub async fn accept(&self, submission: ReceiptSubmission) -> Receipt {
        let mut entries = self.entries.write().await;
        let id = loop {
            let candidate = generate_id(ID_LENGTH);
            if !entries.contains_key(&candidate) {
                break candidate;
            }
            log::warn!("Generated receipt id {candidate} is already taken, retrying");
        };

        let receipt = submission.into_receipt(id.clone());
        entries.insert(id, receipt.clone());
        receipt
    }

    pub async fn get(&self, id: &str) -> Option<Receipt> {
        self.entries.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn snapshot(&self) -> HashMap<String, Receipt> {
        self.entries.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipt::Item;
    use crate::store::SledStore;
    use tempfile::tempdir;

    fn submission(retailer: &str) -> ReceiptSubmission {
        ReceiptSubmission {
            retailer: retailer.to_string(),
            purchase_date: "2022-01-01".to_string(),
            purchase_time: "13:01".to_string(),
            items: vec![Item {
                short_description: "Pepsi - 12-oz".to_string(),
                price: "1.25".to_string(),
            }],
            total: "1.25".to_string(),
        }
    }

    #[test]
    fn test_generated_ids_are_alphanumeric() {
        let id = generate_id(ID_LENGTH);
        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(generate_id(ID_LENGTH), id);
    }

    #[tokio::test]
    async fn test_accept_assigns_unique_ids() {
        let index = ReceiptIndex::new();
        let first = index.accept(submission("Walgreens")).await;
        let second = index.accept(submission("Target")).await;

        assert_ne!(first.id, second.id);
        assert_eq!(index.len().await, 2);
        assert_eq!(index.get(&first.id).await, Some(first));
        assert_eq!(index.get("missing").await, None);
    }

    #[tokio::test]
    async fn test_concurrent_accepts_are_all_visible() {
        let index = ReceiptIndex::new();
        let mut handles = Vec::new();
        for n in 0..32 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                index.accept(submission(&format!("Shop {n}"))).await.id
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        assert_eq!(index.len().await, 32);
        for id in ids {
            assert!(index.get(&id).await.is_some());
        }
    }

    #[tokio::test]
    async fn test_rebuild_twice_yields_identical_entries() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        for (id, retailer) in [("AAAA", "Target"), ("BBBB", "Walgreens")] {
            let receipt = submission(retailer).into_receipt(id.to_string());
            store
                .commit(id.as_bytes(), &receipt.to_json().unwrap())
                .await
                .unwrap();
        }
        store.commit(b"CCCC", b"not json").await.unwrap();

        let index = ReceiptIndex::load_from_store(&store).await.unwrap();
        let first = index.snapshot().await;
        assert_eq!(index.rebuild(&store).await.unwrap(), 2);
        let second = index.snapshot().await;

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first["AAAA"].retailer, "Target");
    }
}
