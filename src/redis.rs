use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::error::ProxyError;
use crate::rate_limiter::{RateLimitStore, WindowCount};

/// Counter store shared by every proxy instance pointing at the same Redis.
///
/// `INCR` is atomic on the server, so concurrent hits from any instance
/// are serialized without a client-side lock. The expiry is attached on the
/// first hit of each window.
pub struct RedisStore {
    client: Client,
    connection: OnceCell<MultiplexedConnection>,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self, ProxyError> {
        let client = Client::open(redis_url)
            .map_err(|e| ProxyError::Store(format!("Failed to create Redis client: {}", e)))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection, ProxyError> {
        let conn = self
            .connection
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| ProxyError::Store(format!("Failed to connect to Redis: {}", e)))
            })
            .await?;

        Ok(conn.clone())
    }
}

#[async_trait]
impl RateLimitStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount, ProxyError> {
        let mut conn = self.connection().await?;
        let window_ms = window.as_millis() as i64;

        let (count, ttl_ms): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        // A key without expiry was just created by this hit.
        let ttl_ms = if ttl_ms < 0 {
            redis::cmd("PEXPIRE")
                .arg(key)
                .arg(window_ms)
                .query_async::<_, ()>(&mut conn)
                .await?;
            window_ms
        } else {
            ttl_ms
        };

        Ok(WindowCount {
            count,
            resets_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn ping(&self) -> Result<(), ProxyError> {
        let mut conn = self.connection().await?;
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ProxyError::Store(format!("Ping failed: {}", e)))?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(ProxyError::Store(format!("Unexpected ping reply: {}", reply)))
        }
    }

    fn kind(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_url() {
        assert!(matches!(
            RedisStore::new("not a redis url"),
            Err(ProxyError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_ping_fails_without_server() {
        // Port 1 is reserved and never has a Redis listening.
        let store = RedisStore::new("redis://127.0.0.1:1").unwrap();
        assert!(store.ping().await.is_err());
        assert_eq!(store.kind(), "redis");
    }
}
