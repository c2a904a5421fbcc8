//! Windowed counter store backing pattern (velocity) rules.
//!
//! A counter is created by its first increment and lives for a fixed TTL from
//! that moment. Later increments inside the window do not extend it, so each
//! subject gets a fixed-origin window that resets only when the key expires.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Number of live keys above which the memory store sweeps expired entries
const PURGE_THRESHOLD: usize = 10_000;

/// Key/value store with per-key expiry and atomic increment
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` and return the new count.
    ///
    /// When the increment creates the key (new count == 1) its expiry is set
    /// to `ttl_secs`; an existing key keeps its original expiry.
    async fn increment_and_maybe_expire(&self, key: &str, ttl_secs: u64) -> Result<u64>;
}

struct WindowEntry {
    count: u64,
    expires_at: Instant,
}

/// In-process counter store (single instance deployments and tests)
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, WindowEntry>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Drop expired keys, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        match self.entries.lock() {
            Ok(mut entries) => {
                let before = entries.len();
                entries.retain(|_, entry| entry.expires_at > now);
                before - entries.len()
            }
            Err(_) => 0,
        }
    }

    /// Number of tracked keys, expired or not
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_and_maybe_expire(&self, key: &str, ttl_secs: u64) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        if entries.len() > PURGE_THRESHOLD {
            entries.retain(|_, entry| entry.expires_at > now);
        }

        let entry = entries.entry(key.to_string()).or_insert(WindowEntry {
            count: 0,
            expires_at: now,
        });

        if entry.count > 0 && entry.expires_at <= now {
            entry.count = 0;
        }

        entry.count += 1;
        if entry.count == 1 {
            entry.expires_at = now + Duration::from_secs(ttl_secs);
        }

        Ok(entry.count)
    }
}

/// INCR then EXPIRE on key creation, as one atomic server-side step
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Redis-backed counter store, safe under concurrent workers
pub struct RedisCounterStore {
    client: redis::Client,
    script: redis::Script,
}

impl RedisCounterStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("Invalid Redis URL: {}", redis_url))?;
        Ok(Self {
            client,
            script: redis::Script::new(INCREMENT_SCRIPT),
        })
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment_and_maybe_expire(&self, key: &str, ttl_secs: u64) -> Result<u64> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis counter store")?;

        let count: u64 = self
            .script
            .key(key)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("Failed to increment counter {}", key))?;

        debug!(key = %key, count = count, ttl_secs = ttl_secs, "Counter incremented");
        Ok(count)
    }
}
