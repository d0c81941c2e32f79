//! Redis tier. Every operation degrades to a miss (or a no-op) on failure —
//! an unreachable Redis must never take the pipeline down.

use std::time::Instant;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Shared handle to the Redis backing store.
///
/// `ConnectionManager` reconnects internally, so a `RedisTier` built at
/// startup stays usable across Redis restarts.
#[derive(Clone)]
pub struct RedisTier {
    manager: Option<ConnectionManager>,
}

impl RedisTier {
    /// Connect to Redis. A failed initial connection logs a warning and
    /// yields a disconnected tier that misses on every read.
    pub async fn connect(url: &str) -> Self {
        let client = match redis::Client::open(url) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(%url, error = %e, "invalid redis URL, running without L2 cache");
                return Self { manager: None };
            }
        };
        match ConnectionManager::new(client).await {
            Ok(manager) => {
                tracing::info!(%url, "redis connected");
                Self {
                    manager: Some(manager),
                }
            }
            Err(e) => {
                tracing::warn!(%url, error = %e, "redis unreachable, running without L2 cache");
                Self { manager: None }
            }
        }
    }

    /// A tier that never stores anything, for cache-disabled deployments
    /// and tests.
    pub fn disconnected() -> Self {
        Self { manager: None }
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.manager.clone()?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(%key, error = %e, "redis GET failed, treating as miss");
                None
            }
        }
    }

    pub async fn set_ex(&self, key: &str, value: &str, ttl_s: u64) {
        let Some(mut conn) = self.manager.clone() else {
            return;
        };
        if let Err(e) = conn.set_ex::<_, _, ()>(key, value, ttl_s).await {
            tracing::warn!(%key, error = %e, "redis SETEX failed, entry not persisted");
        }
    }

    pub async fn del(&self, key: &str) -> u64 {
        let Some(mut conn) = self.manager.clone() else {
            return 0;
        };
        match conn.del::<_, u64>(key).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(%key, error = %e, "redis DEL failed");
                0
            }
        }
    }

    /// Delete all keys matching the glob pattern via SCAN + DEL.
    /// Returns the number deleted.
    pub async fn del_pattern(&self, pattern: &str) -> u64 {
        let Some(conn) = self.manager.clone() else {
            return 0;
        };

        let mut scan_conn = conn.clone();
        let keys: Vec<String> = {
            let mut iter = match scan_conn.scan_match::<_, String>(pattern).await {
                Ok(iter) => iter,
                Err(e) => {
                    tracing::warn!(%pattern, error = %e, "redis SCAN failed");
                    return 0;
                }
            };
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return 0;
        }
        let mut del_conn = conn;
        match del_conn.del::<_, u64>(keys).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(%pattern, error = %e, "redis DEL failed after SCAN");
                0
            }
        }
    }

    /// Round-trip latency probe.
    pub async fn ping(&self) -> Option<u64> {
        let mut conn = self.manager.clone()?;
        let started = Instant::now();
        let pong: Result<String, redis::RedisError> =
            redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => Some(started.elapsed().as_millis() as u64),
            Err(e) => {
                tracing::warn!(error = %e, "redis PING failed");
                None
            }
        }
    }
}
