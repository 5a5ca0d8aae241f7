pub mod sled_store;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use sled_store::SledStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open store: {0}")]
    Open(String),
    #[error("transaction failed: {0}")]
    Commit(String),
    #[error("commit timed out after {0:?}")]
    Timeout(Duration),
    #[error("scan failed: {0}")]
    Scan(String),
}

pub type StoreEntry = (Vec<u8>, Vec<u8>);

/// Durable receipt records keyed by receipt id.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    /// Set `key` to `value` in a single atomic transaction and make it
    /// durable before returning. Setting the same pair twice is harmless.
    async fn commit(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError>;

    /// Every entry, in the engine's native order.
    async fn scan(&self) -> Result<Vec<StoreEntry>, StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;
}

pub async fn commit_with_timeout(
    store: &dyn ReceiptStore,
    key: &[u8],
    value: &[u8],
    timeout: Duration,
) -> Result<(), StoreError> {
    match tokio::time::timeout(timeout, store.commit(key, value)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(timeout)),
    }
}
