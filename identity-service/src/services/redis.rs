use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};

/// Revocation list and short-lived key/value cache.
#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    async fn blacklist_token(
        &self,
        token_jti: &str,
        expiry_seconds: i64,
    ) -> Result<(), anyhow::Error>;
    async fn is_blacklisted(&self, token_jti: &str) -> Result<bool, anyhow::Error>;
    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        expiry_seconds: i64,
    ) -> Result<(), anyhow::Error>;
    async fn get_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    /// Set only when absent. Returns `true` when this call wrote the key.
    async fn set_cache_if_absent(
        &self,
        key: &str,
        value: &str,
        expiry_seconds: i64,
    ) -> Result<bool, anyhow::Error>;
    /// Increment a counter and refresh its expiry. Returns the new value.
    async fn increment(&self, key: &str, expiry_seconds: i64) -> Result<i64, anyhow::Error>;
    async fn delete_cache(&self, key: &str) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl TokenBlacklist for RedisService {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }

    async fn blacklist_token(
        &self,
        token_jti: &str,
        expiry_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        self.set_cache(&format!("blacklist:{}", token_jti), "revoked", expiry_seconds)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to blacklist token: {}", e))
    }

    async fn is_blacklisted(&self, token_jti: &str) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(format!("blacklist:{}", token_jti))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to check blacklist: {}", e))?;

        Ok(exists)
    }

    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        expiry_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(expiry_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))
    }

    async fn get_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get cache: {}", e))
    }

    async fn set_cache_if_absent(
        &self,
        key: &str,
        value: &str,
        expiry_seconds: i64,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        // SET NX replies OK on write and nil when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(expiry_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set cache: {}", e))?;

        Ok(reply.is_some())
    }

    async fn increment(&self, key: &str, expiry_seconds: i64) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(expiry_seconds.max(1))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment counter: {}", e))?;

        Ok(count)
    }

    async fn delete_cache(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete cache key: {}", e))
    }
}

/// In-memory stand-in used by tests. Expiry is not simulated.
#[derive(Default)]
pub struct MockBlacklist {
    pub blacklisted_tokens: DashMap<String, ()>,
    pub cache: DashMap<String, String>,
}

impl MockBlacklist {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenBlacklist for MockBlacklist {
    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }

    async fn blacklist_token(
        &self,
        token_jti: &str,
        _expiry_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        self.blacklisted_tokens.insert(token_jti.to_string(), ());
        Ok(())
    }

    async fn is_blacklisted(&self, token_jti: &str) -> Result<bool, anyhow::Error> {
        Ok(self.blacklisted_tokens.contains_key(token_jti))
    }

    async fn set_cache(
        &self,
        key: &str,
        value: &str,
        _expiry_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        self.cache.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_cache(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self.cache.get(key).map(|v| v.value().clone()))
    }

    async fn set_cache_if_absent(
        &self,
        key: &str,
        value: &str,
        _expiry_seconds: i64,
    ) -> Result<bool, anyhow::Error> {
        match self.cache.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value.to_string());
                Ok(true)
            }
        }
    }

    async fn increment(&self, key: &str, _expiry_seconds: i64) -> Result<i64, anyhow::Error> {
        let mut entry = self.cache.entry(key.to_string()).or_insert_with(|| "0".to_string());
        let next = entry.value().parse::<i64>().unwrap_or(0) + 1;
        *entry.value_mut() = next.to_string();
        Ok(next)
    }

    async fn delete_cache(&self, key: &str) -> Result<(), anyhow::Error> {
        self.cache.remove(key);
        Ok(())
    }
}
