//! Append-only document store port for audit entries.
//!
//! Documents are opaque JSON appended to named collections. The sled
//! implementation keys documents by a monotonic sequence so a prefix scan
//! returns them in append order.

use crate::error::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;

/// Append-only document sink
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn append(&self, collection: &str, document: serde_json::Value) -> ConnectorResult<()>;
    async fn find_all(&self, collection: &str) -> ConnectorResult<Vec<serde_json::Value>>;
}

/// In-process reference implementation
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn append(&self, collection: &str, document: serde_json::Value) -> ConnectorResult<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(document);
        Ok(())
    }

    async fn find_all(&self, collection: &str) -> ConnectorResult<Vec<serde_json::Value>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }
}

/// Durable sled-backed implementation
pub struct SledDocumentStore {
    db: sled::Db,
}

impl SledDocumentStore {
    pub fn open<P: AsRef<Path>>(path: P) -> ConnectorResult<Self> {
        let db = sled::open(path).map_err(|e| ConnectorError::Storage(e.to_string()))?;
        Ok(Self { db })
    }

    fn doc_key(collection: &str, seq: u64) -> Vec<u8> {
        let mut key = collection.as_bytes().to_vec();
        key.push(b'/');
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }
}

#[async_trait]
impl DocumentStore for SledDocumentStore {
    async fn append(&self, collection: &str, document: serde_json::Value) -> ConnectorResult<()> {
        let seq = self
            .db
            .generate_id()
            .map_err(|e| ConnectorError::Storage(e.to_string()))?;
        let bytes = serde_json::to_vec(&document)?;
        self.db
            .insert(Self::doc_key(collection, seq), bytes)
            .map_err(|e| ConnectorError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn find_all(&self, collection: &str) -> ConnectorResult<Vec<serde_json::Value>> {
        let mut prefix = collection.as_bytes().to_vec();
        prefix.push(b'/');

        let mut documents = Vec::new();
        for item in self.db.scan_prefix(&prefix) {
            let (_, value) = item.map_err(|e| ConnectorError::Storage(e.to_string()))?;
            documents.push(serde_json::from_slice(&value)?);
        }
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_appends_in_order() {
        let store = MemoryDocumentStore::new();
        store
            .append("audit_logs", json!({"attempt": 1}))
            .await
            .unwrap();
        store
            .append("audit_logs", json!({"attempt": 2}))
            .await
            .unwrap();

        let docs = store.find_all("audit_logs").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["attempt"], 1);
        assert_eq!(docs[1]["attempt"], 2);
        assert!(store.find_all("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sled_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledDocumentStore::open(dir.path()).unwrap();
        store
            .append("audit_logs", json!({"status": "SUCCESS"}))
            .await
            .unwrap();
        store
            .append("audit_logs", json!({"status": "FAILURE"}))
            .await
            .unwrap();
        store.append("other", json!({"x": 1})).await.unwrap();

        let docs = store.find_all("audit_logs").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["status"], "SUCCESS");
        assert_eq!(docs[1]["status"], "FAILURE");
    }
}
