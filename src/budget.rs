//! Day-scoped spend tracking.
//!
//! Budgets reset at UTC midnight and are tracked per tenant in Redis —
//! `INCRBYFLOAT` on every completed request, with the key's TTL pushed out
//! to the next midnight plus a minute of slack so a slow final write still
//! lands inside the window it was charged against. Redis is a nice-to-have:
//! a read failure fails open (the guardrail sees 0% spent, never blocking
//! traffic because the tracker is unreachable) and a write failure is
//! logged and dropped rather than propagated — budget tracking must never
//! be the reason a chat completion fails.
//!
//! When no `redis_url` is configured, an in-process [`dashmap`] stands in —
//! exact same semantics, just not shared across gateway replicas or
//! survivable across a restart.

use chrono::{NaiveDate, Timelike, Utc};
use dashmap::DashMap;
use redis::AsyncCommands;

const KEY_PREFIX: &str = "routing-gateway:budget";

fn budget_key(tenant_id: &str, date: NaiveDate) -> String {
    format!("{KEY_PREFIX}:{tenant_id}:{date}")
}

/// Seconds remaining until the next UTC midnight, plus 60s of slack.
fn seconds_until_next_midnight() -> i64 {
    let now = Utc::now();
    let seconds_today = now.num_seconds_from_midnight() as i64;
    (86_400 - seconds_today) + 60
}

enum Backend {
    Redis(redis::aio::ConnectionManager),
    Memory(DashMap<String, f64>),
}

pub struct BudgetTracker {
    backend: Backend,
}

impl BudgetTracker {
    /// Connect to Redis if `redis_url` is set; otherwise (or on connection
    /// failure) fall back to the in-memory backend and log a warning.
    pub async fn new(redis_url: Option<&str>) -> Self {
        match redis_url {
            Some(url) => match connect(url).await {
                Ok(manager) => {
                    tracing::info!("budget tracker connected to redis");
                    Self { backend: Backend::Redis(manager) }
                }
                Err(error) => {
                    tracing::warn!(%error, "failed to connect to redis — falling back to in-memory budget tracking");
                    Self { backend: Backend::Memory(DashMap::new()) }
                }
            },
            None => {
                tracing::info!("no redis_url configured — using in-memory budget tracking");
                Self { backend: Backend::Memory(DashMap::new()) }
            }
        }
    }

    #[cfg(test)]
    fn in_memory() -> Self {
        Self { backend: Backend::Memory(DashMap::new()) }
    }

    /// Record `amount` (USD) of spend against `tenant_id`'s budget for
    /// today (UTC). Errors are logged and swallowed.
    pub async fn record_spend(&self, tenant_id: &str, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        let key = budget_key(tenant_id, Utc::now().date_naive());

        match &self.backend {
            Backend::Memory(map) => {
                *map.entry(key).or_insert(0.0) += amount;
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let ttl = seconds_until_next_midnight();
                let result: redis::RedisResult<()> = async {
                    let _: f64 = redis::cmd("INCRBYFLOAT")
                        .arg(&key)
                        .arg(amount)
                        .query_async(&mut conn)
                        .await?;
                    let _: i64 = conn.expire(&key, ttl).await?;
                    Ok(())
                }
                .await;

                if let Err(error) = result {
                    tracing::warn!(%error, tenant_id, "failed to record budget spend — continuing uncharged");
                }
            }
        }
    }

    /// Today's (UTC) spend for `tenant_id`. Fails open to `0.0` — a tracker
    /// outage never blocks traffic, it just disables the guardrail for the
    /// duration of the outage.
    pub async fn current_spend(&self, tenant_id: &str) -> f64 {
        let key = budget_key(tenant_id, Utc::now().date_naive());

        match &self.backend {
            Backend::Memory(map) => map.get(&key).map(|v| *v).unwrap_or(0.0),
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match conn.get::<_, Option<f64>>(&key).await {
                    Ok(value) => value.unwrap_or(0.0),
                    Err(error) => {
                        tracing::warn!(%error, tenant_id, "failed to read budget spend — failing open");
                        0.0
                    }
                }
            }
        }
    }

    /// Fraction of `daily_limit` spent so far today, in `[0.0, +inf)`.
    /// `daily_limit <= 0.0` (unlimited) always returns `0.0`.
    pub async fn percent_of(&self, tenant_id: &str, daily_limit: f64) -> f64 {
        if daily_limit <= 0.0 {
            return 0.0;
        }
        self.current_spend(tenant_id).await / daily_limit
    }
}

async fn connect(url: &str) -> redis::RedisResult<redis::aio::ConnectionManager> {
    let client = redis::Client::open(url)?;
    client.get_connection_manager().await
}
