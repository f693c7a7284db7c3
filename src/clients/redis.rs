use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;

pub fn idempotency_key(service: &str, request_id: &str) -> String {
    format!("idempotency:{}:{}", service, request_id)
}

/// Deduplicates work by key and remembers the first result produced for it.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Returns the cached result if `key` was already claimed, otherwise stores
    /// `result` under `key` and returns `None`. Check and store are one step.
    async fn check_and_store(&self, key: &str, result: &Value) -> Result<Option<Value>, Error>;

    async fn is_duplicate(&self, key: &str) -> Result<bool, Error>;

    /// Drops a claim so the same key can be admitted again.
    async fn release(&self, key: &str) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
    idempotency_ttl_seconds: u64,
}

impl RedisClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        Self::connect_url(&config.redis_url, config.idempotency_ttl_seconds).await
    }

    pub async fn connect_url(redis_url: &str, idempotency_ttl_seconds: u64) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client =
            Client::open(redis_url).map_err(|e| anyhow!("Failed to create redis client: {}", e))?;

        // Reconnects on its own after the server drops the connection.
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            idempotency_ttl_seconds,
        })
    }

    pub async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Redis ping failed: {}", e))?;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for RedisClient {
    async fn check_and_store(&self, key: &str, result: &Value) -> Result<Option<Value>, Error> {
        let payload = serde_json::to_string(result)?;
        let mut conn = self.connection.clone();

        // SET NX GET returns the existing value without overwriting it, or nil
        // when this call created the entry.
        let previous: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(&payload)
            .arg("NX")
            .arg("GET")
            .arg("EX")
            .arg(self.idempotency_ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to claim idempotency key: {}", e))?;

        match previous {
            None => {
                debug!(key, "Idempotency key claimed");
                Ok(None)
            }
            Some(raw) => {
                debug!(key, "Idempotency key already present");
                match serde_json::from_str(&raw) {
                    Ok(value) => Ok(Some(value)),
                    Err(e) => {
                        warn!(key, error = %e, "Cached idempotency value is not JSON");
                        Ok(Some(Value::String(raw)))
                    }
                }
            }
        }
    }

    async fn is_duplicate(&self, key: &str) -> Result<bool, Error> {
        let mut conn = self.connection.clone();
        let exists: bool = conn
            .exists(key)
            .await
            .map_err(|e| anyhow!("Failed to check idempotency key: {}", e))?;
        Ok(exists)
    }

    async fn release(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| anyhow!("Failed to release idempotency key: {}", e))?;
        Ok(())
    }
}
