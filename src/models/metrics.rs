//! Task metrics model: cumulative cost, token, and tool usage totals.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-tool attempt and failure counters reported on completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsageEntry {
    /// Number of times the tool was invoked.
    #[serde(default)]
    pub attempts: u64,
    /// Number of failed invocations.
    #[serde(default)]
    pub failures: u64,
}

/// Tool usage summary keyed by tool name.
pub type ToolUsage = BTreeMap<String, ToolUsageEntry>;

/// Cumulative token usage totals as reported by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Total input tokens.
    #[serde(default)]
    pub total_tokens_in: i64,
    /// Total output tokens.
    #[serde(default)]
    pub total_tokens_out: i64,
    /// Total prompt-cache writes.
    #[serde(default)]
    pub total_cache_writes: Option<i64>,
    /// Total prompt-cache reads.
    #[serde(default)]
    pub total_cache_reads: Option<i64>,
    /// Total cost in USD.
    #[serde(default)]
    pub total_cost: f64,
    /// Tokens in the current context window.
    #[serde(default)]
    pub context_tokens: i64,
}

/// Accumulator record for one task's execution metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct TaskMetrics {
    /// Database identifier.
    pub id: i64,
    /// Total cost in USD.
    pub cost: f64,
    /// Total input tokens.
    pub tokens_in: i64,
    /// Total output tokens.
    pub tokens_out: i64,
    /// Tokens in the context window at the last update.
    pub tokens_context: i64,
    /// Elapsed session time in milliseconds.
    pub duration: i64,
    /// Total prompt-cache writes.
    pub cache_writes: i64,
    /// Total prompt-cache reads.
    pub cache_reads: i64,
    /// Tool usage summary, populated on completion.
    pub tool_usage: ToolUsage,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl TaskMetrics {
    /// Construct an unsaved all-zero record; `id` is assigned on insert.
    #[must_use]
    pub fn zeroed() -> Self {
        Self {
            id: 0,
            cost: 0.0,
            tokens_in: 0,
            tokens_out: 0,
            tokens_context: 0,
            duration: 0,
            cache_writes: 0,
            cache_reads: 0,
            tool_usage: ToolUsage::new(),
            created_at: Utc::now(),
        }
    }
}

/// Replacement values written on every usage update.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageUpdate {
    /// Total cost in USD.
    pub cost: f64,
    /// Total input tokens.
    pub tokens_in: i64,
    /// Total output tokens.
    pub tokens_out: i64,
    /// Context window tokens.
    pub tokens_context: i64,
    /// Elapsed session time in milliseconds.
    pub duration: i64,
    /// Total prompt-cache writes.
    pub cache_writes: i64,
    /// Total prompt-cache reads.
    pub cache_reads: i64,
}

impl UsageUpdate {
    /// Build an update from reported totals and the elapsed session time.
    #[must_use]
    pub fn from_totals(usage: &TokenUsage, duration_ms: i64) -> Self {
        Self {
            cost: usage.total_cost,
            tokens_in: usage.total_tokens_in,
            tokens_out: usage.total_tokens_out,
            tokens_context: usage.context_tokens,
            duration: duration_ms,
            cache_writes: usage.total_cache_writes.unwrap_or(0),
            cache_reads: usage.total_cache_reads.unwrap_or(0),
        }
    }
}
