//! In-memory cache backend.
//!
//! Used by tests and single-process deployments. TTLs are evaluated against
//! the injected [`Clock`] so expiry behavior is deterministic under test.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::TtlCache;
use crate::clock::Clock;
use crate::error::CacheError;

struct Slot {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

pub struct MemoryCache {
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn live(&self, slot: &Slot) -> bool {
        self.clock.now() < slot.expires_at
    }
}

#[async_trait]
impl TtlCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get(key) {
            Some(slot) if self.live(slot) => Ok(Some(slot.value.clone())),
            Some(_) => {
                slots.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &[u8],
        ttl: std::time::Duration,
    ) -> Result<(), CacheError> {
        let ttl = Duration::from_std(ttl)
            .map_err(|err| CacheError::Backend(format!("ttl out of range: {err}")))?;
        let slot = Slot {
            value: value.to_vec(),
            expires_at: self.clock.now() + ttl,
        };
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.remove(key) {
            Some(slot) if self.live(&slot) => Ok(Some(slot.value)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration as StdDuration;

    fn cache_with_clock() -> (Arc<ManualClock>, MemoryCache) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = MemoryCache::new(clock.clone());
        (clock, cache)
    }

    #[tokio::test]
    async fn get_respects_ttl() {
        let (clock, cache) = cache_with_clock();
        cache
            .set_with_ttl("k", b"v", StdDuration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        clock.advance(Duration::seconds(61));
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn take_consumes_exactly_once() {
        let (_clock, cache) = cache_with_clock();
        cache
            .set_with_ttl("challenge", b"state", StdDuration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(cache.take("challenge").await.unwrap(), Some(b"state".to_vec()));
        assert_eq!(cache.take("challenge").await.unwrap(), None);
        assert_eq!(cache.get("challenge").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_takes_have_one_winner() {
        let (_clock, cache) = cache_with_clock();
        let cache = Arc::new(cache);
        cache
            .set_with_ttl("challenge", b"state", StdDuration::from_secs(300))
            .await
            .unwrap();

        let (a, b) = tokio::join!(cache.take("challenge"), cache.take("challenge"));
        let winners = usize::from(a.unwrap().is_some()) + usize::from(b.unwrap().is_some());
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn take_ignores_expired_values() {
        let (clock, cache) = cache_with_clock();
        cache
            .set_with_ttl("k", b"v", StdDuration::from_secs(10))
            .await
            .unwrap();
        clock.advance(Duration::seconds(11));
        assert_eq!(cache.take("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_clock, cache) = cache_with_clock();
        cache.delete("absent").await.unwrap();
        cache
            .set_with_ttl("k", b"v", StdDuration::from_secs(10))
            .await
            .unwrap();
        cache.delete("k").await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
