//! Key-value store port: strings, lists, and sets with TTL and
//! atomic set-if-absent.
//!
//! The scheduler leans on RENAME for its drain step; the dedup guard and
//! the lock service lean on SET NX + TTL. Expiry is evaluated lazily
//! against the injected clock.

use crate::clock::Clock;
use crate::error::{ConnectorError, ConnectorResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Key-value operations the pipeline needs from its store
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> ConnectorResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> ConnectorResult<()>;
    /// Atomic set-if-absent; returns true when the key was set
    async fn set_nx(&self, key: &str, value: &str, ttl_seconds: Option<u64>)
        -> ConnectorResult<bool>;
    async fn delete(&self, key: &str) -> ConnectorResult<bool>;
    async fn exists(&self, key: &str) -> ConnectorResult<bool>;
    async fn expire(&self, key: &str, ttl_seconds: u64) -> ConnectorResult<bool>;

    /// Append values to the list at `key`, creating it if absent
    async fn rpush(&self, key: &str, values: &[String]) -> ConnectorResult<u64>;
    /// Read the whole list (empty when absent)
    async fn lrange_all(&self, key: &str) -> ConnectorResult<Vec<String>>;
    /// Atomically rename `from` to `to`; KeyNotFound when `from` is absent
    async fn rename(&self, from: &str, to: &str) -> ConnectorResult<()>;

    async fn sadd(&self, key: &str, member: &str) -> ConnectorResult<bool>;
    async fn srem(&self, key: &str, member: &str) -> ConnectorResult<bool>;
    async fn smembers(&self, key: &str) -> ConnectorResult<Vec<String>>;
}

#[derive(Debug, Clone)]
enum KvValue {
    Str(String),
    List(Vec<String>),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: KvValue,
    expires_at: Option<u64>,
}

/// In-process reference implementation
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryKvStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn purge_expired(&self, entries: &mut HashMap<String, Entry>, key: &str) {
        let now = self.clock.epoch_secs();
        if let Some(entry) = entries.get(key) {
            if matches!(entry.expires_at, Some(at) if at <= now) {
                entries.remove(key);
            }
        }
    }

    fn ttl_to_deadline(&self, ttl_seconds: Option<u64>) -> Option<u64> {
        ttl_seconds.map(|ttl| self.clock.epoch_secs() + ttl)
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> ConnectorResult<Option<String>> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                value: KvValue::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(ConnectorError::WrongKind(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> ConnectorResult<()> {
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            Entry {
                value: KvValue::Str(value.to_string()),
                expires_at: self.ttl_to_deadline(ttl_seconds),
            },
        );
        Ok(())
    }

    async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: Option<u64>,
    ) -> ConnectorResult<bool> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: KvValue::Str(value.to_string()),
                expires_at: self.ttl_to_deadline(ttl_seconds),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> ConnectorResult<bool> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, key);
        Ok(entries.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> ConnectorResult<bool> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, key);
        Ok(entries.contains_key(key))
    }

    async fn expire(&self, key: &str, ttl_seconds: u64) -> ConnectorResult<bool> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, key);
        let deadline = self.clock.epoch_secs() + ttl_seconds;
        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(deadline);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn rpush(&self, key: &str, values: &[String]) -> ConnectorResult<u64> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: KvValue::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.value {
            KvValue::List(list) => {
                list.extend(values.iter().cloned());
                Ok(list.len() as u64)
            }
            _ => Err(ConnectorError::WrongKind(key.to_string())),
        }
    }

    async fn lrange_all(&self, key: &str) -> ConnectorResult<Vec<String>> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: KvValue::List(list),
                ..
            }) => Ok(list.clone()),
            Some(_) => Err(ConnectorError::WrongKind(key.to_string())),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> ConnectorResult<()> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, from);
        match entries.remove(from) {
            Some(entry) => {
                entries.insert(to.to_string(), entry);
                Ok(())
            }
            None => Err(ConnectorError::KeyNotFound(from.to_string())),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> ConnectorResult<bool> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, key);
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: KvValue::Set(HashSet::new()),
            expires_at: None,
        });
        match &mut entry.value {
            KvValue::Set(set) => Ok(set.insert(member.to_string())),
            _ => Err(ConnectorError::WrongKind(key.to_string())),
        }
    }

    async fn srem(&self, key: &str, member: &str) -> ConnectorResult<bool> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, key);
        match entries.get_mut(key) {
            None => Ok(false),
            Some(Entry {
                value: KvValue::Set(set),
                ..
            }) => Ok(set.remove(member)),
            Some(_) => Err(ConnectorError::WrongKind(key.to_string())),
        }
    }

    async fn smembers(&self, key: &str) -> ConnectorResult<Vec<String>> {
        let mut entries = self.entries.lock();
        self.purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(Vec::new()),
            Some(Entry {
                value: KvValue::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(ConnectorError::WrongKind(key.to_string())),
        }
    }
}
