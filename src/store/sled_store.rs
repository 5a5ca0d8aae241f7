use super::{ReceiptStore, StoreEntry, StoreError};
use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;

const RECEIPTS_TREE: &str = "receipts";

/// Receipt store backed by the sled embedded database.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    receipts: sled::Tree,
}

impl SledStore {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            StoreError::Open(format!(
                "Failed to open sled db at {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let receipts = db
            .open_tree(RECEIPTS_TREE)
            .map_err(|e| StoreError::Open(format!("Failed to open receipts tree: {e}")))?;
        Ok(Self { db, receipts })
    }

    fn commit_blocking(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.receipts
            .transaction(|tx| {
                tx.insert(key, value)?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| StoreError::Commit(format!("{e:?}")))?;

        self.db
            .flush()
            .map_err(|e| StoreError::Commit(format!("Failed to flush db: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ReceiptStore for SledStore {
    async fn commit(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let store = self.clone();
        let (key, value) = (key.to_vec(), value.to_vec());
        tokio::task::spawn_blocking(move || store.commit_blocking(&key, &value))
            .await
            .map_err(|e| StoreError::Commit(format!("commit task failed: {e}")))?
    }

    async fn scan(&self) -> Result<Vec<StoreEntry>, StoreError> {
        let mut entries = Vec::new();
        for item in self.receipts.iter() {
            let (key, value) =
                item.map_err(|e| StoreError::Scan(format!("Failed to iterate receipts: {e}")))?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.receipts.len())
    }
}
