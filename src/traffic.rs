//! In-memory traffic log exposed through the admin API.
//!
//! [`TrafficLog`] is a fixed-capacity ring-buffer: once full, the oldest entry
//! is evicted to make room for the newest. This gives a bounded, O(1) memory
//! footprint regardless of request volume. It is a live operational view —
//! distinct from [`crate::audit`]'s append-only on-disk log, which is the
//! durable compliance record.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::risk::RiskLevel;
use crate::types::{ClassifiedBy, Complexity, Department, ModelTier, TaskType};

/// Fixed-capacity ring-buffer of recent [`TrafficEntry`] records.
///
/// Safe to share across threads via `Arc<TrafficLog>`. [`push`][Self::push] uses
/// a non-blocking `try_lock` so it never delays request handling; in the
/// unlikely event of lock contention the entry is silently dropped.
pub struct TrafficLog {
    capacity: usize,
    entries: Mutex<VecDeque<TrafficEntry>>,
}

impl TrafficLog {
    /// Create a new log with the given capacity.
    ///
    /// `capacity` is the maximum number of entries retained. Older entries are
    /// silently dropped once the buffer is full.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Record a completed request.
    ///
    /// This is a best-effort, non-blocking operation: if the mutex is contended
    /// the entry is dropped rather than blocking the request path.
    pub fn push(&self, entry: TrafficEntry) {
        if let Ok(mut entries) = self.entries.try_lock() {
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Return up to `limit` recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<TrafficEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    /// Compute aggregate statistics over all buffered entries.
    pub async fn stats(&self) -> TrafficStats {
        let entries = self.entries.lock().await;
        let total = entries.len();
        let avg_latency_ms = if total == 0 {
            0.0
        } else {
            entries.iter().map(|e| e.latency_ms as f64).sum::<f64>() / total as f64
        };

        let error_count = entries.iter().filter(|e| !e.success).count();
        let fallback_count = entries.iter().filter(|e| e.fallback_used).count();

        let mut tier_counts: HashMap<String, usize> = HashMap::new();
        let mut risk_counts: HashMap<String, usize> = HashMap::new();
        for entry in entries.iter() {
            *tier_counts.entry(entry.target_tier.as_str().to_string()).or_default() += 1;
            *risk_counts.entry(entry.risk_level.as_str().to_string()).or_default() += 1;
        }

        let total_estimated_cost_usd = entries.iter().map(|e| e.estimated_cost_usd).sum();

        TrafficStats {
            total_requests: total,
            error_count,
            fallback_count,
            avg_latency_ms,
            tier_counts,
            risk_counts,
            total_estimated_cost_usd,
        }
    }
}

/// A single routed request, as surfaced through the admin traffic API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub tenant_id: String,
    pub department: Department,
    pub task_type: TaskType,
    pub complexity: Complexity,
    pub risk_level: RiskLevel,
    pub classified_by: ClassifiedBy,
    pub target_tier: ModelTier,
    pub provider: String,
    pub model: String,
    /// `true` if the primary candidate failed and a later one in the
    /// resolved candidate list served the request instead.
    pub fallback_used: bool,
    pub estimated_cost_usd: f64,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl TrafficEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: String,
        department: Department,
        task_type: TaskType,
        complexity: Complexity,
        risk_level: RiskLevel,
        classified_by: ClassifiedBy,
        target_tier: ModelTier,
        provider: String,
        model: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            tenant_id,
            department,
            task_type,
            complexity,
            risk_level,
            classified_by,
            target_tier,
            provider,
            model,
            fallback_used: false,
            estimated_cost_usd: 0.0,
            latency_ms: 0,
            success: true,
            error: None,
        }
    }

    pub fn mark_fallback_used(mut self) -> Self {
        self.fallback_used = true;
        self
    }

    pub fn with_cost(mut self, estimated_cost_usd: f64) -> Self {
        self.estimated_cost_usd = estimated_cost_usd;
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_error(mut self, err: &str) -> Self {
        self.success = false;
        self.error = Some(err.to_string());
        self
    }
}

/// Aggregate statistics derived from all buffered [`TrafficEntry`] records.
#[derive(Debug, Serialize)]
pub struct TrafficStats {
    pub total_requests: usize,
    pub error_count: usize,
    pub fallback_count: usize,
    pub avg_latency_ms: f64,
    pub tier_counts: HashMap<String, usize>,
    pub risk_counts: HashMap<String, usize>,
    pub total_estimated_cost_usd: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_entry(tenant_id: &str, tier: ModelTier, latency_ms: u64) -> TrafficEntry {
        TrafficEntry::new(
            tenant_id.into(),
            Department::Rd,
            TaskType::CodeGeneration,
            Complexity::Medium,
            RiskLevel::Low,
            ClassifiedBy::HeuristicFallback,
            tier,
            "anthropic".into(),
            "claude-haiku-4-5-20251001".into(),
        )
        .with_latency(latency_ms)
    }

    #[tokio::test]
    async fn push_and_retrieve_single_entry() {
        let log = TrafficLog::new(10);
        log.push(make_entry("acme", ModelTier::FastCheap, 42));

        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].target_tier, ModelTier::FastCheap);
        assert_eq!(recent[0].latency_ms, 42);
    }

    #[tokio::test]
    async fn recent_returns_entries_newest_first() {
        let log = TrafficLog::new(10);
        log.push(make_entry("acme", ModelTier::Local, 1));
        log.push(make_entry("acme", ModelTier::FastCheap, 2));
        log.push(make_entry("acme", ModelTier::Balanced, 3));

        let recent = log.recent(10).await;
        assert_eq!(recent[0].target_tier, ModelTier::Balanced);
        assert_eq!(recent[1].target_tier, ModelTier::FastCheap);
        assert_eq!(recent[2].target_tier, ModelTier::Local);
    }

    #[tokio::test]
    async fn recent_limits_result_count() {
        let log = TrafficLog::new(20);
        for i in 0..10u64 {
            log.push(make_entry("acme", ModelTier::Local, i));
        }
        let recent = log.recent(3).await;
        assert_eq!(recent.len(), 3);
    }

    #[tokio::test]
    async fn oldest_entry_evicted_when_capacity_exceeded() {
        let log = TrafficLog::new(3);
        log.push(make_entry("oldest", ModelTier::Local, 1));
        log.push(make_entry("middle", ModelTier::Local, 2));
        log.push(make_entry("newest", ModelTier::Local, 3));
        log.push(make_entry("extra", ModelTier::Local, 4));

        let all = log.recent(100).await;
        assert_eq!(all.len(), 3);
        assert!(!all.iter().any(|e| e.tenant_id == "oldest"));
        assert!(all.iter().any(|e| e.tenant_id == "extra"));
    }

    #[tokio::test]
    async fn stats_on_empty_log() {
        let log = TrafficLog::new(10);
        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.avg_latency_ms, 0.0);
        assert!(stats.tier_counts.is_empty());
    }

    #[tokio::test]
    async fn stats_averages_latency_correctly() {
        let log = TrafficLog::new(10);
        log.push(make_entry("acme", ModelTier::Local, 100));
        log.push(make_entry("acme", ModelTier::Local, 200));
        log.push(make_entry("acme", ModelTier::Balanced, 300));

        let stats = log.stats().await;
        assert_eq!(stats.total_requests, 3);
        assert!((stats.avg_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn stats_counts_requests_per_tier() {
        let log = TrafficLog::new(10);
        log.push(make_entry("acme", ModelTier::Local, 10));
        log.push(make_entry("acme", ModelTier::Local, 20));
        log.push(make_entry("acme", ModelTier::Balanced, 30));

        let stats = log.stats().await;
        assert_eq!(stats.tier_counts[ModelTier::Local.as_str()], 2);
        assert_eq!(stats.tier_counts[ModelTier::Balanced.as_str()], 1);
    }

    #[tokio::test]
    async fn stats_counts_fallback_and_cost() {
        let log = TrafficLog::new(10);
        log.push(make_entry("acme", ModelTier::Local, 10).mark_fallback_used().with_cost(0.002));
        log.push(make_entry("acme", ModelTier::Local, 10).with_cost(0.001));

        let stats = log.stats().await;
        assert_eq!(stats.fallback_count, 1);
        assert!((stats.total_estimated_cost_usd - 0.003).abs() < 1e-9);
    }

    #[test]
    fn entry_has_unique_ids() {
        let a = make_entry("acme", ModelTier::Local, 1);
        let b = make_entry("acme", ModelTier::Local, 1);
        assert_ne!(a.id, b.id, "every entry must have a unique UUID");
    }

    #[test]
    fn entry_records_error() {
        let err = make_entry("acme", ModelTier::Local, 0).with_error("upstream 503");
        assert!(!err.success);
        assert_eq!(err.error.as_deref(), Some("upstream 503"));
    }
}
