//! In-process store backing every storage trait
//!
//! Used by tests and local runs without a database. All state sits behind a single
//! `parking_lot::RwLock`, so each trait call observes a consistent snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, DurationRound, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::{AlertEventSink, AlertStore, RuleStore, UsageStore};
use crate::error::Result;
use crate::models::{
    Alert, AlertAction, AlertEvent, AlertFilters, AlertRule, AlertStatus, AnomalyMetric, Budget,
    NotificationRecord, RequestLog, UsageMetric, UsageQuery, UsageRecord,
};

#[derive(Default)]
struct Inner {
    rules: HashMap<Uuid, AlertRule>,
    usage: Vec<UsageRecord>,
    budgets: HashMap<Uuid, Budget>,
    baselines: HashMap<(String, UsageMetric), f64>,
    alerts: HashMap<Uuid, Alert>,
    actions: Vec<AlertAction>,
}

impl Inner {
    fn usage_in<'a>(&'a self, query: &'a UsageQuery) -> impl Iterator<Item = &'a UsageRecord> + 'a {
        self.usage.iter().filter(move |r| {
            r.org_id == query.org_id
                && r.timestamp >= query.start
                && r.timestamp <= query.end
                && r.matches(&query.filters)
        })
    }
}

/// Store holding rules, usage, budgets, and alerts in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule
    pub fn put_rule(&self, rule: AlertRule) {
        self.inner.write().rules.insert(rule.id, rule);
    }

    pub fn put_budget(&self, budget: Budget) {
        self.inner.write().budgets.insert(budget.id, budget);
    }

    pub fn add_usage(&self, records: impl IntoIterator<Item = UsageRecord>) {
        self.inner.write().usage.extend(records);
    }

    pub fn set_usage_baseline(&self, org_id: &str, metric: UsageMetric, value: f64) {
        self.inner
            .write()
            .baselines
            .insert((org_id.to_string(), metric), value);
    }

    /// Insert an alert as-is, bypassing the engine
    pub fn put_alert(&self, alert: Alert) {
        self.inner.write().alerts.insert(alert.id, alert);
    }

    /// Every stored alert, oldest trigger first
    pub fn alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.inner.read().alerts.values().cloned().collect();
        alerts.sort_by_key(|a| a.triggered_at);
        alerts
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list_enabled_rules(&self, org_id: &str) -> Result<Vec<AlertRule>> {
        let mut rules: Vec<AlertRule> = self
            .inner
            .read()
            .rules
            .values()
            .filter(|r| r.org_id == org_id && r.enabled)
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<AlertRule>> {
        Ok(self.inner.read().rules.get(&rule_id).cloned())
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn sum_cost(&self, query: &UsageQuery) -> Result<f64> {
        Ok(self.inner.read().usage_in(query).map(|r| r.cost).sum())
    }

    async fn cost_by_model(&self, query: &UsageQuery) -> Result<Vec<(String, f64)>> {
        let inner = self.inner.read();
        let mut by_model: HashMap<String, f64> = HashMap::new();
        for record in inner.usage_in(query) {
            let model = record.model.clone().unwrap_or_else(|| "unknown".to_string());
            *by_model.entry(model).or_default() += record.cost;
        }
        Ok(by_model.into_iter().collect())
    }

    async fn daily_costs(&self, query: &UsageQuery) -> Result<Vec<f64>> {
        let inner = self.inner.read();
        let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for record in inner.usage_in(query) {
            *by_day.entry(record.timestamp.date_naive()).or_default() += record.cost;
        }
        Ok(by_day.into_values().collect())
    }

    async fn period_costs(
        &self,
        org_id: &str,
        metric: AnomalyMetric,
        since: DateTime<Utc>,
        filters: &AlertFilters,
    ) -> Result<Vec<f64>> {
        let inner = self.inner.read();
        let records = inner
            .usage
            .iter()
            .filter(|r| r.org_id == org_id && r.timestamp >= since && r.matches(filters));

        let values: Vec<f64> = match metric {
            AnomalyMetric::RequestCost => records.map(|r| r.cost).collect(),
            AnomalyMetric::HourlyCost => {
                let mut buckets: BTreeMap<DateTime<Utc>, f64> = BTreeMap::new();
                for record in records {
                    let hour = record
                        .timestamp
                        .duration_trunc(chrono::Duration::hours(1))
                        .unwrap_or(record.timestamp);
                    *buckets.entry(hour).or_default() += record.cost;
                }
                buckets.into_values().collect()
            }
            AnomalyMetric::DailyCost => {
                let mut buckets: BTreeMap<NaiveDate, f64> = BTreeMap::new();
                for record in records {
                    *buckets.entry(record.timestamp.date_naive()).or_default() += record.cost;
                }
                buckets.into_values().collect()
            }
        };
        Ok(values)
    }

    async fn request_logs(&self, query: &UsageQuery) -> Result<Vec<RequestLog>> {
        Ok(self
            .inner
            .read()
            .usage_in(query)
            .map(UsageRecord::to_request_log)
            .collect())
    }

    async fn seasonal_values(
        &self,
        org_id: &str,
        window_end: DateTime<Utc>,
        window: chrono::Duration,
        weeks_back: u32,
        filters: &AlertFilters,
    ) -> Result<Vec<f64>> {
        let inner = self.inner.read();
        let mut values = Vec::new();
        for k in 1..=i64::from(weeks_back) {
            let end = window_end - chrono::Duration::weeks(k);
            let query = UsageQuery::new(org_id, end - window, end).with_filters(filters.clone());
            let mut records = inner.usage_in(&query).peekable();
            if records.peek().is_some() {
                values.push(records.map(|r| r.cost).sum());
            }
        }
        Ok(values)
    }

    async fn usage_baseline(&self, org_id: &str, metric: UsageMetric) -> Result<Option<f64>> {
        Ok(self
            .inner
            .read()
            .baselines
            .get(&(org_id.to_string(), metric))
            .copied())
    }

    async fn get_budget(&self, budget_id: Uuid) -> Result<Option<Budget>> {
        Ok(self.inner.read().budgets.get(&budget_id).cloned())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        self.inner.write().alerts.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>> {
        Ok(self.inner.read().alerts.get(&alert_id).cloned())
    }

    async fn update_alert(&self, alert: &Alert, expected: &[AlertStatus]) -> Result<bool> {
        let mut inner = self.inner.write();
        match inner.alerts.get_mut(&alert.id) {
            Some(stored) if expected.contains(&stored.status) => {
                *stored = alert.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn count_for_rule_since(&self, rule_id: Uuid, since: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .inner
            .read()
            .alerts
            .values()
            .filter(|a| a.rule_id == rule_id && a.triggered_at >= since)
            .count() as u64)
    }

    async fn list_active_for_rule(&self, rule_id: Uuid, limit: usize) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .inner
            .read()
            .alerts
            .values()
            .filter(|a| a.rule_id == rule_id && a.status == AlertStatus::Active)
            .cloned()
            .collect();
        alerts.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        alerts.truncate(limit);
        Ok(alerts)
    }

    async fn list_open_since(&self, org_id: &str, since: DateTime<Utc>) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .inner
            .read()
            .alerts
            .values()
            .filter(|a| {
                a.org_id == org_id
                    && matches!(a.status, AlertStatus::Active | AlertStatus::Acknowledged)
                    && a.triggered_at >= since
            })
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.triggered_at);
        Ok(alerts)
    }

    async fn list_expired_snoozed(&self, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self
            .inner
            .read()
            .alerts
            .values()
            .filter(|a| {
                a.status == AlertStatus::Snoozed && a.snoozed_until.is_some_and(|until| until <= now)
            })
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.snoozed_until);
        Ok(alerts)
    }

    async fn set_notifications(
        &self,
        alert_id: Uuid,
        records: &[NotificationRecord],
    ) -> Result<()> {
        if let Some(alert) = self.inner.write().alerts.get_mut(&alert_id) {
            alert.notifications_sent = records.to_vec();
        }
        Ok(())
    }

    async fn append_action(&self, action: &AlertAction) -> Result<()> {
        self.inner.write().actions.push(action.clone());
        Ok(())
    }

    async fn list_actions(&self, alert_id: Uuid) -> Result<Vec<AlertAction>> {
        let mut actions: Vec<AlertAction> = self
            .inner
            .read()
            .actions
            .iter()
            .filter(|a| a.alert_id == alert_id)
            .cloned()
            .collect();
        actions.sort_by_key(|a| a.created_at);
        Ok(actions)
    }
}

/// Event sink that keeps every published event
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<AlertEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Published events, oldest first
    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().clone()
    }
}

impl AlertEventSink for RecordingEventSink {
    fn publish(&self, event: AlertEvent) {
        self.events.lock().push(event);
    }
}
