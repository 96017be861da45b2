//! Durable counter store
//!
//! All mutable enforcement state lives here, behind one primitive:
//! increment-with-ceiling. The increment and the bound check are inseparable
//! at the key's owner, so concurrent requests on the same key can never
//! over-consume a limit:
//!
//! - Redis backend: a Lua script runs read-check-incr-expire as one atomic
//!   unit on the server. Redis serializes all operations per key, which is
//!   what yields atomicity, with no distributed locking.
//! - In-memory backend: a mutex-guarded window map. The mutex is the
//!   serializing owner. Used for tests and single-node deployments.
//!
//! Every call carries a bounded timeout; callers treat `CounterError` as a
//! signal to fail open, never to hang or hard-fail a request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::Script;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{MeteringError, MeteringResult};

/// Atomic increment-with-ceiling. Checks the bound and increments in one
/// step on the Redis server; the key expires after `period`.
const INCREMENT_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local limit = tonumber(ARGV[1])
local amount = tonumber(ARGV[2])
local period_ms = tonumber(ARGV[3])
if current + amount > limit then
    return {0, math.max(limit - current, 0)}
end
local updated = redis.call('INCRBY', KEYS[1], amount)
if updated == amount then
    redis.call('PEXPIRE', KEYS[1], period_ms)
end
return {1, math.max(limit - updated, 0)}
"#;

/// Result of an increment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementOutcome {
    /// False means the ceiling would have been exceeded; the counter was
    /// left untouched.
    pub success: bool,
    /// Headroom left under the limit after this call.
    pub remaining: i64,
}

#[derive(Debug)]
struct Window {
    count: i64,
    expires_at: Instant,
}

#[derive(Clone)]
enum Backend {
    Redis {
        conn: ConnectionManager,
        script: Arc<Script>,
    },
    InMemory(Arc<Mutex<HashMap<String, Window>>>),
}

/// Handle to the counter backend. Cheap to clone.
#[derive(Clone)]
pub struct CounterStore {
    backend: Backend,
    timeout: Duration,
}

impl CounterStore {
    /// In-memory counters guarded by a single mutex.
    pub fn new_in_memory() -> Self {
        Self {
            backend: Backend::InMemory(Arc::new(Mutex::new(HashMap::new()))),
            timeout: Duration::from_millis(500),
        }
    }

    /// Connect to Redis with a bounded per-call timeout.
    pub async fn connect_redis(url: &str, timeout: Duration) -> MeteringResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| MeteringError::Counter(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| MeteringError::Counter(format!("redis connect failed: {e}")))?;
        Ok(Self {
            backend: Backend::Redis {
                conn,
                script: Arc::new(Script::new(INCREMENT_SCRIPT)),
            },
            timeout,
        })
    }

    /// Atomically increment `key` by `amount` unless that would push the
    /// counter past `limit`. The window expires `period` after the first
    /// increment that created it.
    pub async fn increment(
        &self,
        key: &str,
        limit: i64,
        period: Duration,
        amount: i64,
    ) -> MeteringResult<IncrementOutcome> {
        match &self.backend {
            Backend::Redis { conn, script } => {
                let mut conn = conn.clone();
                let invocation = async {
                    script
                        .key(key)
                        .arg(limit)
                        .arg(amount)
                        .arg(period.as_millis() as u64)
                        .invoke_async::<(i64, i64)>(&mut conn)
                        .await
                };
                let (ok, remaining) = self.bounded(invocation).await?;
                Ok(IncrementOutcome {
                    success: ok == 1,
                    remaining,
                })
            }
            Backend::InMemory(map) => {
                let mut map = map.lock().await;
                let now = Instant::now();
                let window = map.entry(key.to_string()).or_insert(Window {
                    count: 0,
                    expires_at: now + period,
                });
                if window.expires_at <= now {
                    window.count = 0;
                    window.expires_at = now + period;
                }
                if window.count + amount > limit {
                    return Ok(IncrementOutcome {
                        success: false,
                        remaining: (limit - window.count).max(0),
                    });
                }
                window.count += amount;
                Ok(IncrementOutcome {
                    success: true,
                    remaining: (limit - window.count).max(0),
                })
            }
        }
    }

    /// Headroom left under `limit` without consuming anything.
    pub async fn get_remaining(
        &self,
        key: &str,
        limit: i64,
        period: Duration,
    ) -> MeteringResult<i64> {
        match &self.backend {
            Backend::Redis { conn, .. } => {
                let mut conn = conn.clone();
                let key = key.to_string();
                let fetch = async {
                    redis::cmd("GET")
                        .arg(&key)
                        .query_async::<Option<i64>>(&mut conn)
                        .await
                };
                let count = self.bounded(fetch).await?.unwrap_or(0);
                Ok((limit - count).max(0))
            }
            Backend::InMemory(map) => {
                let mut map = map.lock().await;
                let now = Instant::now();
                let count = match map.get_mut(key) {
                    Some(window) if window.expires_at > now => window.count,
                    Some(window) => {
                        window.count = 0;
                        window.expires_at = now + period;
                        0
                    }
                    None => 0,
                };
                Ok((limit - count).max(0))
            }
        }
    }

    /// Delete a counter, resetting its window.
    pub async fn reset(&self, key: &str) -> MeteringResult<()> {
        match &self.backend {
            Backend::Redis { conn, .. } => {
                let mut conn = conn.clone();
                let key = key.to_string();
                let del = async {
                    redis::cmd("DEL")
                        .arg(&key)
                        .query_async::<i64>(&mut conn)
                        .await
                };
                self.bounded(del).await?;
                Ok(())
            }
            Backend::InMemory(map) => {
                map.lock().await.remove(key);
                Ok(())
            }
        }
    }

    /// Drop expired in-memory windows. No-op for the Redis backend, which
    /// expires keys on its own.
    pub async fn cleanup(&self) {
        if let Backend::InMemory(map) = &self.backend {
            let now = Instant::now();
            map.lock().await.retain(|_, w| w.expires_at > now);
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = redis::RedisResult<T>>,
    ) -> MeteringResult<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(MeteringError::Counter(e.to_string())),
            Err(_) => Err(MeteringError::Counter(format!(
                "counter call timed out after {:?}",
                self.timeout
            ))),
        }
    }
}

/// Counter key for a user+operation+window triple.
pub fn counter_key(scope: &str, user_id: uuid::Uuid, operation: &str) -> String {
    format!("{scope}:{user_id}:{operation}")
}
