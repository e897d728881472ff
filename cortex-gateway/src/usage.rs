//! Per-call usage accounting.
//!
//! Every provider invocation — success or failure — appends a record to a
//! bounded in-process ring buffer and emits a `tracing` event. The ring
//! buffer exists for callers that want programmatic access (billing
//! reconciliation, the test suite); long-term storage belongs to whatever
//! subscribes to the tracing sink.

use crate::types::TokenUsage;
use cortex_types::{ProviderId, TenantId};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// How a provider call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The provider returned a response.
    Success,
    /// The provider failed; the classified error's display string.
    Failure(String),
}

/// One provider invocation.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    /// Tenant the call ran for.
    pub tenant: TenantId,
    /// Model requested.
    pub model: String,
    /// Provider the model resolved to.
    pub provider: ProviderId,
    /// Token usage (zero on failure).
    pub tokens: TokenUsage,
    /// Cost in USD (zero on failure).
    pub cost: Decimal,
    /// Wall-clock latency of the provider call.
    pub latency: Duration,
    /// Success or classified failure.
    pub outcome: CallOutcome,
}

/// Bounded ring buffer of [`UsageRecord`]s.
pub struct UsageLog {
    capacity: usize,
    records: Mutex<VecDeque<UsageRecord>>,
}

impl UsageLog {
    /// Create a log keeping at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a record, dropping the oldest at capacity.
    pub fn record(&self, record: UsageRecord) {
        tracing::info!(
            tenant = %record.tenant,
            model = %record.model,
            provider = %record.provider,
            prompt_tokens = record.tokens.prompt,
            completion_tokens = record.tokens.completion,
            cost = %record.cost,
            latency_ms = record.latency.as_millis() as u64,
            success = record.outcome == CallOutcome::Success,
            "model call"
        );
        let mut records = self.records.lock().expect("usage log lock");
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// All retained records, oldest first.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().expect("usage log lock").iter().cloned().collect()
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.records.lock().expect("usage log lock").len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total recorded cost for one tenant.
    pub fn total_cost(&self, tenant: &TenantId) -> Decimal {
        self.records
            .lock()
            .expect("usage log lock")
            .iter()
            .filter(|r| &r.tenant == tenant)
            .map(|r| r.cost)
            .sum()
    }

    /// Number of successful provider calls for one tenant.
    pub fn success_count(&self, tenant: &TenantId) -> usize {
        self.records
            .lock()
            .expect("usage log lock")
            .iter()
            .filter(|r| &r.tenant == tenant && r.outcome == CallOutcome::Success)
            .count()
    }
}
