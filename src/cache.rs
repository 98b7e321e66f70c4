use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::CacheConfig;
use crate::error::AppResult;

/// Read-through front of the notification store for status lookups.
///
/// The cache is best-effort: callers must tolerate misses and fall through
/// to the store, and failed writes are logged and ignored. The store stays
/// authoritative.
#[async_trait]
pub trait StatusCache: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;
}

pub struct RedisStatusCache {
    connection: Arc<RwLock<MultiplexedConnection>>,
}

impl RedisStatusCache {
    pub async fn new(config: &CacheConfig) -> AppResult<Self> {
        let client = Client::open(config.redis_url())?;
        let connection = client.get_multiplexed_async_connection().await?;

        info!("Redis status cache initialized");

        Ok(Self {
            connection: Arc::new(RwLock::new(connection)),
        })
    }
}

#[async_trait]
impl StatusCache for RedisStatusCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection.write().await;

        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await?;

        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection.write().await;

        redis::cmd("SETEX")
            .arg(key)
            .arg(ttl.as_secs())
            .arg(value)
            .query_async::<_, ()>(&mut *conn)
            .await?;

        Ok(())
    }
}
