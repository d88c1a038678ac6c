use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{error::LeaseResult, traits::LeaseStore};
use crate::config::RedisLeaseConfig;

/// Delete the key only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Redis-backed lease store, shared by every instance pointing at the
/// same Redis.
pub struct RedisLeaseStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisLeaseStore {
    pub fn new(config: &RedisLeaseConfig) -> LeaseResult<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn prefixed_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    async fn get_connection(&self) -> LeaseResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> LeaseResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);
        let ttl_ms = ttl.as_millis().max(1) as u64;

        // SET ... NX returns "OK" if set, nil if key exists
        let result: Option<String> = redis::cmd("SET")
            .arg(&full_key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    async fn release(&self, key: &str, holder: &str) -> LeaseResult<bool> {
        let mut conn = self.get_connection().await?;
        let full_key = self.prefixed_key(key);

        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&full_key)
            .arg(holder)
            .invoke_async(&mut conn)
            .await?;

        Ok(deleted == 1)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
