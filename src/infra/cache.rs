use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use time::OffsetDateTime;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::warn;

/// Keyed TTL cache with named key groups. A group remembers which keys were
/// written under it so they can all be dropped at once. Group membership
/// lapses with the key's own `ttl`.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    async fn forget(&self, key: &str) -> Result<()>;
    async fn track(&self, group: &str, key: &str, ttl: Duration) -> Result<()>;
    async fn forget_group(&self, group: &str) -> Result<()>;
    async fn flush(&self) -> Result<()>;
    async fn ping(&self) -> Result<()>;
}

#[derive(Clone)]
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn.get::<_, Option<String>>(key).await?)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    // Groups are sorted sets scored by member expiry (unix seconds).
    async fn track(&self, group: &str, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let ttl_secs = ttl.as_secs().max(1);
        let now = OffsetDateTime::now_utc().unix_timestamp();
        redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(group)
            .arg(now + ttl_secs as i64)
            .arg(key)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(group)
            .arg("-inf")
            .arg(now)
            .ignore()
            .cmd("EXPIRE")
            .arg(group)
            .arg(ttl_secs)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn forget_group(&self, group: &str) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let mut keys: Vec<String> = redis::cmd("ZRANGE")
            .arg(group)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        keys.push(group.to_string());
        conn.del::<_, ()>(keys).await?;
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("FLUSHDB").query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, CacheEntry>,
    groups: HashMap<String, HashSet<String>>,
}

impl MemoryState {
    /// Drops expired entries and any group members left without an entry.
    fn prune(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expires_at > now);
        let entries = &self.entries;
        self.groups.retain(|_, keys| {
            keys.retain(|key| entries.contains_key(key));
            !keys.is_empty()
        });
    }
}

/// Process-local cache used by tests and when Redis is unavailable.
#[derive(Default)]
pub struct MemoryCache {
    state: RwLock<MemoryState>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        let state = self.state.read().await;
        state
            .entries
            .get(key)
            .map(|entry| entry.expires_at > Instant::now())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.state.read().await;
        let Some(entry) = state.entries.get(key) else {
            return Ok(None);
        };
        if entry.expires_at > Instant::now() {
            return Ok(Some(entry.value.clone()));
        }
        drop(state);

        let mut state = self.state.write().await;
        state.entries.remove(key);
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut state = self.state.write().await;
        state.prune(now);
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.remove(key);
        Ok(())
    }

    async fn track(&self, group: &str, key: &str, _ttl: Duration) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.entries.contains_key(key) {
            return Ok(());
        }
        state
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(key.to_string());
        Ok(())
    }

    async fn forget_group(&self, group: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(keys) = state.groups.remove(group) {
            for key in keys {
                state.entries.remove(&key);
            }
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.groups.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Typed get-or-compute on top of a [`Cache`] backend.
///
/// Cache failures never fail the caller: reads fall through to `compute`,
/// write and invalidation errors are logged and dropped.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn Cache>,
    ttl: Duration,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub async fn remember<T, E, F, Fut>(
        &self,
        key: &str,
        group: Option<&str>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.backend.get(key).await {
            Ok(Some(payload)) => match serde_json::from_str::<T>(&payload) {
                Ok(value) => return Ok(value),
                Err(err) => warn!(error = ?err, key, "discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(err) => warn!(error = ?err, key, "failed to read cache"),
        }

        let value = compute().await?;

        match serde_json::to_string(&value) {
            Ok(payload) => {
                if let Err(err) = self.backend.put(key, &payload, self.ttl).await {
                    warn!(error = ?err, key, "failed to write cache");
                } else if let Some(group) = group {
                    if let Err(err) = self.backend.track(group, key, self.ttl).await {
                        warn!(error = ?err, key, group, "failed to track cache key");
                    }
                }
            }
            Err(err) => warn!(error = ?err, key, "failed to encode cache entry"),
        }

        Ok(value)
    }

    pub async fn forget(&self, key: &str) {
        if let Err(err) = self.backend.forget(key).await {
            warn!(error = ?err, key, "failed to invalidate cache key");
        }
    }

    pub async fn forget_group(&self, group: &str) {
        if let Err(err) = self.backend.forget_group(group).await {
            warn!(error = ?err, group, "failed to invalidate cache group");
        }
    }
}
