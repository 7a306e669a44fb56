//! Distributed lock over the KV store.
//!
//! `lock:{key}` is taken with set-if-absent plus a TTL so a crashed holder
//! cannot wedge the system; release is a plain delete.

use crate::error::{EngineError, EngineResult};
use ems_connectors::KvStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// A named lock with an expiry
pub struct DistributedLock {
    kv: Arc<dyn KvStore>,
    key: String,
    ttl_seconds: u64,
}

impl DistributedLock {
    pub fn new(kv: Arc<dyn KvStore>, key: &str, ttl_seconds: u64) -> Self {
        Self {
            kv,
            key: format!("lock:{key}"),
            ttl_seconds,
        }
    }

    /// Try to take the lock, optionally blocking up to `wait` for it
    pub async fn acquire(&self, wait: Option<Duration>) -> EngineResult<bool> {
        let deadline = wait.map(|w| tokio::time::Instant::now() + w);
        loop {
            let acquired = self
                .kv
                .set_nx(&self.key, "locked", Some(self.ttl_seconds))
                .await?;
            if acquired {
                debug!(key = %self.key, ttl = self.ttl_seconds, "lock_acquired");
                return Ok(true);
            }
            match deadline {
                None => return Ok(false),
                Some(d) if tokio::time::Instant::now() >= d => {
                    warn!(key = %self.key, "lock_acquisition_timeout");
                    return Ok(false);
                }
                Some(_) => tokio::time::sleep(RETRY_INTERVAL).await,
            }
        }
    }

    /// Blocking acquire that errors on timeout
    pub async fn acquire_or_timeout(&self, wait: Duration) -> EngineResult<()> {
        if self.acquire(Some(wait)).await? {
            Ok(())
        } else {
            Err(EngineError::LockTimeout(self.key.clone()))
        }
    }

    /// Release the lock; false when it had already expired
    pub async fn release(&self) -> EngineResult<bool> {
        let deleted = self.kv.delete(&self.key).await?;
        if deleted {
            debug!(key = %self.key, "lock_released");
        } else {
            warn!(key = %self.key, "lock_release_missed");
        }
        Ok(deleted)
    }

    /// Extend the expiry of a held lock
    pub async fn extend(&self, additional_seconds: u64) -> EngineResult<bool> {
        Ok(self
            .kv
            .expire(&self.key, self.ttl_seconds + additional_seconds)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ems_connectors::{ManualClock, MemoryKvStore};

    fn kv(clock: Arc<ManualClock>) -> Arc<dyn KvStore> {
        Arc::new(MemoryKvStore::new(clock))
    }

    #[tokio::test]
    async fn test_second_holder_blocked_until_release() {
        let clock = Arc::new(ManualClock::new(0));
        let kv = kv(clock);
        let first = DistributedLock::new(kv.clone(), "employer:e1", 300);
        let second = DistributedLock::new(kv.clone(), "employer:e1", 300);

        assert!(first.acquire(None).await.unwrap());
        assert!(!second.acquire(None).await.unwrap());

        assert!(first.release().await.unwrap());
        assert!(second.acquire(None).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lock_is_retakeable() {
        let clock = Arc::new(ManualClock::new(0));
        let kv = kv(clock.clone());
        let lock = DistributedLock::new(kv.clone(), "employer:e1", 300);

        assert!(lock.acquire(None).await.unwrap());
        clock.advance(301);
        let other = DistributedLock::new(kv, "employer:e1", 300);
        assert!(other.acquire(None).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_or_timeout_errors() {
        let clock = Arc::new(ManualClock::new(0));
        let kv = kv(clock);
        let held = DistributedLock::new(kv.clone(), "k", 300);
        held.acquire(None).await.unwrap();

        let waiter = DistributedLock::new(kv, "k", 300);
        let err = waiter
            .acquire_or_timeout(Duration::from_millis(350))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LockTimeout(_)));
    }
}
