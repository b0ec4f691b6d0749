//! Storage layer for Spendwatch
//!
//! The engine only sees the traits below. `PgStore` backs them with
//! PostgreSQL, `MemoryStore` with in-process maps, and change events go out
//! through an [`AlertEventSink`].

mod memory;
mod postgres;
mod redis;

pub use memory::{MemoryStore, RecordingEventSink};
pub use postgres::{PgStore, PostgresPool};
pub use redis::{RedisEventPublisher, RedisPool};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Alert, AlertAction, AlertEvent, AlertFilters, AlertRule, AlertStatus, AnomalyMetric, Budget,
    NotificationRecord, RequestLog, UsageMetric, UsageQuery,
};

/// Read access to alert rules
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Enabled rules for an organization
    async fn list_enabled_rules(&self, org_id: &str) -> Result<Vec<AlertRule>>;

    /// A single rule by id
    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<AlertRule>>;
}

/// Read access to usage records and budgets
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Total cost in the query window
    async fn sum_cost(&self, query: &UsageQuery) -> Result<f64>;

    /// Cost per model in the query window, unordered
    async fn cost_by_model(&self, query: &UsageQuery) -> Result<Vec<(String, f64)>>;

    /// Per-day cost totals, oldest first, one entry per day with usage
    async fn daily_costs(&self, query: &UsageQuery) -> Result<Vec<f64>>;

    /// Historical sample for an anomaly metric since `since`
    ///
    /// `hourly_cost` yields one value per hour, `daily_cost` one per day and
    /// `request_cost` one per request.
    async fn period_costs(
        &self,
        org_id: &str,
        metric: AnomalyMetric,
        since: DateTime<Utc>,
        filters: &AlertFilters,
    ) -> Result<Vec<f64>>;

    /// Individual request records in the query window
    async fn request_logs(&self, query: &UsageQuery) -> Result<Vec<RequestLog>>;

    /// Cost of the same window in each of the past `weeks_back` weeks
    ///
    /// Window `k` spans `[window_end - k weeks - window, window_end - k weeks]`.
    /// Newest first; weeks without any usage are left out.
    async fn seasonal_values(
        &self,
        org_id: &str,
        window_end: DateTime<Utc>,
        window: Duration,
        weeks_back: u32,
        filters: &AlertFilters,
    ) -> Result<Vec<f64>>;

    /// Learned per-org baseline for a volume metric, if one exists
    async fn usage_baseline(&self, org_id: &str, metric: UsageMetric) -> Result<Option<f64>>;

    /// A budget by id
    async fn get_budget(&self, budget_id: Uuid) -> Result<Option<Budget>>;
}

/// Persistence for alerts and their timelines
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert a new alert
    async fn create_alert(&self, alert: &Alert) -> Result<()>;

    /// A single alert by id
    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>>;

    /// Overwrite an alert if its stored status is one of `expected`
    ///
    /// Returns `false` when the stored status did not match, so concurrent
    /// lifecycle actions cannot both win.
    async fn update_alert(&self, alert: &Alert, expected: &[AlertStatus]) -> Result<bool>;

    /// Alerts for a rule triggered at or after `since`
    async fn count_for_rule_since(&self, rule_id: Uuid, since: DateTime<Utc>) -> Result<u64>;

    /// Most recent `active` alerts for a rule
    async fn list_active_for_rule(&self, rule_id: Uuid, limit: usize) -> Result<Vec<Alert>>;

    /// `active` or `acknowledged` alerts for an org triggered at or after `since`
    async fn list_open_since(&self, org_id: &str, since: DateTime<Utc>) -> Result<Vec<Alert>>;

    /// `snoozed` alerts whose snooze ended at or before `now`
    async fn list_expired_snoozed(&self, now: DateTime<Utc>) -> Result<Vec<Alert>>;

    /// Replace the notification records on an alert
    async fn set_notifications(&self, alert_id: Uuid, records: &[NotificationRecord])
        -> Result<()>;

    /// Append a timeline entry
    async fn append_action(&self, action: &AlertAction) -> Result<()>;

    /// Timeline entries for an alert, oldest first
    async fn list_actions(&self, alert_id: Uuid) -> Result<Vec<AlertAction>>;
}

/// Best-effort publisher of alert change events
///
/// `publish` must not block and cannot fail; implementations drop events
/// they cannot deliver.
pub trait AlertEventSink: Send + Sync {
    fn publish(&self, event: AlertEvent);
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl AlertEventSink for NoopEventSink {
    fn publish(&self, _event: AlertEvent) {}
}
