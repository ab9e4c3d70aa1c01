//! Fixed-window limiter over a shared Redis counter, for deployments with
//! more than one instance. The window starts with the first hit, exactly
//! like the in-process limiter; expiry is left to Redis.

use async_trait::async_trait;
use deadpool_redis::redis::Script;
use deadpool_redis::{Config, Pool, Runtime};
use domains::{AppError, RateLimit, Result};
use tracing::{info, warn};

/// Increments the key and arms its expiry on the first hit of a window.
const INCR_WITH_WINDOW: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

pub fn connect(url: &str) -> Result<Pool> {
    let pool = Config::from_url(url)
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| AppError::unavailable(format!("redis pool: {e}")))?;
    info!("redis pool created");
    Ok(pool)
}

pub struct RedisRateLimiter {
    pool: Pool,
    name: String,
    window_ms: u64,
    max_requests: u32,
    script: Script,
}

impl RedisRateLimiter {
    pub fn new(pool: Pool, name: impl Into<String>, window_ms: u64, max_requests: u32) -> Self {
        Self {
            pool,
            name: name.into(),
            window_ms,
            max_requests,
            script: Script::new(INCR_WITH_WINDOW),
        }
    }

    fn key(&self, identifier: &str) -> String {
        format!("medibook:rate:{}:{}", self.name, identifier)
    }
}

#[async_trait]
impl RateLimit for RedisRateLimiter {
    async fn check(&self, identifier: &str) -> Result<bool> {
        let mut conn = self.pool.get().await.map_err(|e| {
            warn!(limiter = %self.name, error = %e, "redis unavailable");
            AppError::unavailable(format!("redis: {e}"))
        })?;

        let count: u64 = self
            .script
            .key(self.key(identifier))
            .arg(self.window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::unavailable(format!("redis: {e}")))?;

        Ok(count <= u64::from(self.max_requests))
    }
}
