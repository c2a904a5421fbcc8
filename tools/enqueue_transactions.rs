//! Test Transaction Producer
//!
//! Generates legitimate and suspicious transactions and pushes them onto the
//! worker's Redis queue.
//!
//! Usage: enqueue_transactions [redis_url] [queue_key] [count] [fraud_rate] [delay_ms]

use anyhow::Result;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use fraud_rule_engine::queue::{RedisQueue, TransactionQueue, DEFAULT_QUEUE_KEY};
use fraud_rule_engine::Transaction;
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

/// Transaction generator for exercising the rule set
struct TransactionGenerator {
    rng: rand::rngs::ThreadRng,
    /// Account reused by suspicious bursts so velocity rules trip
    burst_account: String,
}

impl TransactionGenerator {
    fn new() -> Self {
        let mut rng = rand::thread_rng();
        let burst_account = format!("ACC{:06}", rng.gen_range(0..1_000_000));
        Self { rng, burst_account }
    }

    /// A small daytime payment between random accounts
    fn generate_legitimate(&mut self) -> Transaction {
        let amount = (self.rng.gen_range(10.0..500.0_f64) * 100.0).round() / 100.0;
        let timestamp = Utc::now();
        let currency = self.random_choice(&["USD", "EUR", "GBP", "CAD"]);
        let merchant = self.random_choice(&["grocer", "coffee_shop", "bookstore", "pharmacy"]);
        let account = self.random_account();

        self.transaction(amount, currency, merchant, account, timestamp.to_rfc3339())
    }

    /// Large, late-night, or repeated from one account
    fn generate_suspicious(&mut self) -> Transaction {
        let amount = (self.rng.gen_range(10_000.0..150_000.0_f64) * 100.0).round() / 100.0;
        let night_hour = self.rng.gen_range(0..5);
        let timestamp = Utc::now()
            .date_naive()
            .and_hms_opt(night_hour, 30, 0)
            .map(|t| Utc.from_utc_datetime(&t).to_rfc3339())
            .unwrap_or_else(|| (Utc::now() - ChronoDuration::hours(12)).to_rfc3339());
        let currency = self.random_choice(&["USD", "EUR"]);
        let merchant = self.random_choice(&["crypto_exchange", "wire_service", "gift_cards"]);
        let account = self.burst_account.clone();

        self.transaction(amount, currency, merchant, account, timestamp)
    }

    fn transaction(
        &mut self,
        amount: f64,
        currency: &str,
        merchant: &str,
        from_account: String,
        timestamp: String,
    ) -> Transaction {
        let to_account = self.random_account();
        let user_id = format!("user_{}", self.rng.gen_range(1..5000));

        let payload = json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "amount": amount,
            "currency": currency,
            "merchant": merchant,
            "from_account": from_account,
            "to_account": to_account,
            "user_id": user_id,
            "timestamp": timestamp,
            "description": format!("payment to {}", merchant),
        });

        // json! of an object literal is always an object
        Transaction::from_value(payload).unwrap_or_default()
    }

    fn random_account(&mut self) -> String {
        format!("ACC{:06}", self.rng.gen_range(0..1_000_000))
    }

    fn random_choice<'a>(&mut self, choices: &[&'a str]) -> &'a str {
        choices[self.rng.gen_range(0..choices.len())]
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("enqueue_transactions=info".parse()?),
        )
        .init();

    info!("Starting Test Transaction Producer");

    let args: Vec<String> = std::env::args().collect();
    let redis_url = args.get(1).map(|s| s.as_str()).unwrap_or("redis://127.0.0.1:6379");
    let queue_key = args.get(2).map(|s| s.as_str()).unwrap_or(DEFAULT_QUEUE_KEY);
    let count: u64 = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(100);
    let fraud_rate: f64 = args
        .get(4)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.1_f64)
        .clamp(0.0, 1.0);
    let delay_ms: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        redis_url = %redis_url,
        queue = %queue_key,
        count = count,
        fraud_rate = fraud_rate,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let queue = RedisQueue::new(redis_url, queue_key)?;
    if let Err(e) = queue.len().await {
        warn!(error = %format!("{:#}", e), "Redis unavailable. Running in dry-run mode.");
        return run_dry_mode(count, fraud_rate, delay_ms).await;
    }

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();
    let mut legitimate_count = 0;
    let mut suspicious_count = 0;

    info!("Starting to enqueue {} transactions...", count);

    for i in 0..count {
        let transaction = if rng.gen_bool(fraud_rate) {
            suspicious_count += 1;
            generator.generate_suspicious()
        } else {
            legitimate_count += 1;
            generator.generate_legitimate()
        };

        queue.push(&transaction).await?;

        if (i + 1) % 10 == 0 {
            info!(
                "Enqueued {}/{} transactions ({} legitimate, {} suspicious)",
                i + 1,
                count,
                legitimate_count,
                suspicious_count
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Enqueued {} transactions ({} legitimate, {} suspicious), queue length {}",
        count,
        legitimate_count,
        suspicious_count,
        queue.len().await?
    );

    Ok(())
}

async fn run_dry_mode(count: u64, fraud_rate: f64, delay_ms: u64) -> Result<()> {
    info!("Running in dry-run mode (no Redis connection)");

    let mut generator = TransactionGenerator::new();
    let mut rng = rand::thread_rng();

    for i in 0..count {
        let transaction = if rng.gen_bool(fraud_rate) {
            generator.generate_suspicious()
        } else {
            generator.generate_legitimate()
        };

        if (i + 1) % 10 == 0 || i == 0 {
            info!(
                "Sample transaction {}:\n{}",
                i + 1,
                serde_json::to_string_pretty(&transaction)?
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
