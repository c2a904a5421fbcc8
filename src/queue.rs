//! Transaction queue consumed by the worker.
//!
//! `pop` is destructive and non-blocking: it hands an item to exactly one
//! consumer, or returns `None` when the queue is empty.

use crate::types::transaction::Transaction;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::VecDeque;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Default Redis list holding pending transactions
pub const DEFAULT_QUEUE_KEY: &str = "transaction_queue";

#[async_trait]
pub trait TransactionQueue: Send + Sync {
    async fn push(&self, tx: &Transaction) -> Result<()>;

    /// Take the oldest pending transaction, if any
    async fn pop(&self) -> Result<Option<Transaction>>;

    async fn len(&self) -> Result<usize>;
}

/// In-process FIFO queue
#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<VecDeque<Transaction>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<Transaction>>> {
        self.items
            .lock()
            .map_err(|_| anyhow::anyhow!("transaction queue lock poisoned"))
    }
}

#[async_trait]
impl TransactionQueue for MemoryQueue {
    async fn push(&self, tx: &Transaction) -> Result<()> {
        self.lock()?.push_back(tx.clone());
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Transaction>> {
        Ok(self.lock()?.pop_front())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
}

/// Redis list queue: producers LPUSH, consumers RPOP, so the list is FIFO
pub struct RedisQueue {
    client: redis::Client,
    key: String,
}

impl RedisQueue {
    pub fn new(redis_url: &str, key: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("Invalid Redis URL: {}", redis_url))?;
        Ok(Self {
            client,
            key: key.to_string(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis queue")
    }
}

#[async_trait]
impl TransactionQueue for RedisQueue {
    async fn push(&self, tx: &Transaction) -> Result<()> {
        let payload = tx.to_json()?;
        let mut conn = self.connection().await?;
        let _: i64 = conn
            .lpush(&self.key, payload)
            .await
            .with_context(|| format!("Failed to push to {}", self.key))?;

        debug!(queue = %self.key, transaction_id = %tx.external_id(), "Transaction queued");
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Transaction>> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .rpop(&self.key, None)
            .await
            .with_context(|| format!("Failed to pop from {}", self.key))?;

        match payload {
            Some(raw) => match Transaction::from_json(&raw) {
                Ok(tx) => Ok(Some(tx)),
                Err(e) => {
                    warn!(queue = %self.key, payload = %raw, "Discarding malformed queue payload");
                    Err(e.context("Malformed transaction payload"))
                }
            },
            None => Ok(None),
        }
    }

    async fn len(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        let len: usize = conn
            .llen(&self.key)
            .await
            .with_context(|| format!("Failed to read length of {}", self.key))?;
        Ok(len)
    }
}
