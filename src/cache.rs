//! Cache Client
//!
//! Key/value + list operations over Redis with per-record TTLs. The
//! store is treated as unreliable: the connection lives behind an
//! `Option` and every operation degrades to `CacheUnavailable` when the
//! connection is absent or a command fails. Callers log and continue;
//! no pipeline stage may stop because the cache is down.
//!
//! The `ConnectionManager` reconnects on its own once established; the
//! initial connect runs in a background task so stage startup never
//! blocks on Redis.

use crate::types::PipelineError;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client as RedisClient};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CacheClient {
    conn: Arc<RwLock<Option<ConnectionManager>>>,
    key_prefix: String,
}

impl CacheClient {
    /// Create the client and start connecting in the background.
    pub fn connect(redis_url: &str, key_prefix: &str) -> Self {
        let client = Self {
            conn: Arc::new(RwLock::new(None)),
            key_prefix: key_prefix.to_string(),
        };

        let conn_slot = client.conn.clone();
        let url = redis_url.to_string();
        tokio::spawn(async move {
            match RedisClient::open(url.clone()) {
                Ok(redis_client) => match ConnectionManager::new(redis_client).await {
                    Ok(conn) => {
                        debug!("Connected to cache at {}", url);
                        *conn_slot.write().await = Some(conn);
                    }
                    Err(e) => {
                        warn!("Cache connection manager failed: {} — running without cache", e);
                    }
                },
                Err(e) => {
                    warn!("Cache client open failed: {} — running without cache", e);
                }
            }
        });

        client
    }

    /// Client with no backing connection; every operation returns
    /// `CacheUnavailable`. Used in tests and as an explicit off switch.
    pub fn disconnected(key_prefix: &str) -> Self {
        Self {
            conn: Arc::new(RwLock::new(None)),
            key_prefix: key_prefix.to_string(),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.read().await.is_some()
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn connection(&self) -> Result<ConnectionManager, PipelineError> {
        self.conn
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or(PipelineError::CacheUnavailable)
    }

    pub async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), PipelineError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(self.prefixed(key), value, ttl_secs)
            .await
            .map_err(|e| {
                warn!("Cache SET {} failed: {}", key, e);
                PipelineError::CacheUnavailable
            })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, PipelineError> {
        let mut conn = self.connection().await?;
        conn.get::<_, Option<String>>(self.prefixed(key))
            .await
            .map_err(|e| {
                warn!("Cache GET {} failed: {}", key, e);
                PipelineError::CacheUnavailable
            })
    }

    pub async fn delete(&self, key: &str) -> Result<(), PipelineError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(self.prefixed(key)).await.map_err(|e| {
            warn!("Cache DEL {} failed: {}", key, e);
            PipelineError::CacheUnavailable
        })
    }

    /// Remaining TTL in seconds. Redis semantics: -1 no expiry, -2 key
    /// missing.
    pub async fn ttl(&self, key: &str) -> Result<i64, PipelineError> {
        let mut conn = self.connection().await?;
        conn.ttl::<_, i64>(self.prefixed(key)).await.map_err(|e| {
            warn!("Cache TTL {} failed: {}", key, e);
            PipelineError::CacheUnavailable
        })
    }

    /// All keys under `prefix`, returned with the configured key prefix
    /// stripped so they can be passed back to `get`/`delete`.
    pub async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, PipelineError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}*", self.prefixed(prefix));
        let keys: Vec<String> = conn.keys(pattern).await.map_err(|e| {
            warn!("Cache KEYS {} failed: {}", prefix, e);
            PipelineError::CacheUnavailable
        })?;
        Ok(keys
            .into_iter()
            .map(|k| {
                k.strip_prefix(&self.key_prefix)
                    .map(str::to_string)
                    .unwrap_or(k)
            })
            .collect())
    }

    pub async fn list_push_left(&self, key: &str, value: &str) -> Result<(), PipelineError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(self.prefixed(key), value)
            .await
            .map_err(|e| {
                warn!("Cache LPUSH {} failed: {}", key, e);
                PipelineError::CacheUnavailable
            })
    }

    pub async fn list_trim(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<(), PipelineError> {
        let mut conn = self.connection().await?;
        conn.ltrim::<_, ()>(self.prefixed(key), start, stop)
            .await
            .map_err(|e| {
                warn!("Cache LTRIM {} failed: {}", key, e);
                PipelineError::CacheUnavailable
            })
    }

    pub async fn list_range(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, PipelineError> {
        let mut conn = self.connection().await?;
        conn.lrange::<_, Vec<String>>(self.prefixed(key), start, stop)
            .await
            .map_err(|e| {
                warn!("Cache LRANGE {} failed: {}", key, e);
                PipelineError::CacheUnavailable
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_key_building() {
        let cache = CacheClient::disconnected("mev:");
        assert_eq!(cache.prefixed("tx:0xabc"), "mev:tx:0xabc");
        let bare = CacheClient::disconnected("");
        assert_eq!(bare.prefixed("tx:0xabc"), "tx:0xabc");
    }

    #[tokio::test]
    async fn test_disconnected_ops_return_cache_unavailable() {
        let cache = CacheClient::disconnected("mev:");
        assert!(!cache.is_connected().await);
        assert!(matches!(
            cache.set_with_ttl("k", "v", 60).await,
            Err(PipelineError::CacheUnavailable)
        ));
        assert!(matches!(
            cache.get("k").await,
            Err(PipelineError::CacheUnavailable)
        ));
        assert!(matches!(
            cache.keys_by_prefix("tx:").await,
            Err(PipelineError::CacheUnavailable)
        ));
        assert!(matches!(
            cache.list_range("swap_queue", 0, 9).await,
            Err(PipelineError::CacheUnavailable)
        ));
    }
}
