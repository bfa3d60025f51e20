//! Redis cache backend.
//!
//! Thin mapping of the [`TtlCache`] seam onto `SET EX` / `GET` / `DEL` /
//! `GETDEL`. Single-use take relies on `GETDEL` so two concurrent consumers
//! of a challenge cannot both observe it.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use super::TtlCache;
use crate::error::CacheError;

pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    /// Connect lazily to the given Redis URL.
    ///
    /// # Errors
    /// Returns an error if the URL is not a valid Redis connection string.
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl TtlCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        Ok(conn.get(key).await?)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        // Redis TTLs are whole seconds. Fractions truncate, so an entry can
        // expire up to a second early but never outlives its intent; the
        // floor of 1 keeps sub-second TTLs from turning into no expiry.
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, value, seconds).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        Ok(conn.get_del(key).await?)
    }
}
