//! End-to-end evaluation passes against the in-memory store

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use uuid::Uuid;

use spendwatch::alerting::{AlertEngine, NotificationResult, Notifier, Stores, SuppressReason};
use spendwatch::db::{AlertStore, MemoryStore, RecordingEventSink, RuleStore, UsageStore};
use spendwatch::models::*;
use spendwatch::{Config, Error, Result};

struct OkNotifier;

#[async_trait]
impl Notifier for OkNotifier {
    async fn send(&self, _channel: &ChannelConfig, _alert: &Alert) -> NotificationResult {
        NotificationResult {
            success: true,
            ..Default::default()
        }
    }

    async fn resolve_incident(&self, _channel: &ChannelConfig, _alert: &Alert) -> NotificationResult {
        NotificationResult {
            success: true,
            ..Default::default()
        }
    }
}

/// Fails queries filtered to provider "broken", hangs on provider "slow"
#[derive(Clone)]
struct FlakyUsage {
    inner: MemoryStore,
}

impl FlakyUsage {
    async fn gate(&self, filters: &AlertFilters) -> Result<()> {
        if filters.providers.iter().any(|p| p == "broken") {
            return Err(Error::internal("usage backend unavailable"));
        }
        if filters.providers.iter().any(|p| p == "slow") {
            tokio::time::sleep(StdDuration::from_secs(30)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl UsageStore for FlakyUsage {
    async fn sum_cost(&self, query: &UsageQuery) -> Result<f64> {
        self.gate(&query.filters).await?;
        self.inner.sum_cost(query).await
    }

    async fn cost_by_model(&self, query: &UsageQuery) -> Result<Vec<(String, f64)>> {
        self.gate(&query.filters).await?;
        self.inner.cost_by_model(query).await
    }

    async fn daily_costs(&self, query: &UsageQuery) -> Result<Vec<f64>> {
        self.gate(&query.filters).await?;
        self.inner.daily_costs(query).await
    }

    async fn period_costs(
        &self,
        org_id: &str,
        metric: AnomalyMetric,
        since: DateTime<Utc>,
        filters: &AlertFilters,
    ) -> Result<Vec<f64>> {
        self.gate(filters).await?;
        self.inner.period_costs(org_id, metric, since, filters).await
    }

    async fn request_logs(&self, query: &UsageQuery) -> Result<Vec<RequestLog>> {
        self.gate(&query.filters).await?;
        self.inner.request_logs(query).await
    }

    async fn seasonal_values(
        &self,
        org_id: &str,
        window_end: DateTime<Utc>,
        window: Duration,
        weeks_back: u32,
        filters: &AlertFilters,
    ) -> Result<Vec<f64>> {
        self.inner
            .seasonal_values(org_id, window_end, window, weeks_back, filters)
            .await
    }

    async fn usage_baseline(&self, org_id: &str, metric: UsageMetric) -> Result<Option<f64>> {
        self.inner.usage_baseline(org_id, metric).await
    }

    async fn get_budget(&self, budget_id: Uuid) -> Result<Option<Budget>> {
        self.inner.get_budget(budget_id).await
    }
}

fn spend_rule(threshold: f64, filters: AlertFilters) -> AlertRule {
    let mut rule = AlertRule::new(
        "org_1",
        "Daily spend",
        RuleConfig::SpendThreshold(SpendThresholdConfig {
            metric: SpendMetric::DailyCost,
            operator: Operator::Gt,
            threshold,
            time_window: TimeWindow::OneDay,
            filters,
        }),
    );
    rule.channels = vec![NotificationChannel::new(ChannelConfig::Slack {
        webhook_url: "https://example.invalid/slack".to_string(),
        channel: None,
    })];
    rule
}

fn engine_with(config: &Config, store: &MemoryStore, events: &RecordingEventSink) -> AlertEngine {
    AlertEngine::new(
        config,
        Stores::shared(Arc::new(store.clone())),
        Arc::new(OkNotifier),
        Arc::new(events.clone()),
    )
}

#[tokio::test]
async fn failing_and_slow_rules_do_not_block_the_pass() {
    let store = MemoryStore::new();
    let events = RecordingEventSink::new();
    let now = Utc::now();

    store.put_rule(spend_rule(10.0, AlertFilters::provider("broken")));
    store.put_rule(spend_rule(10.0, AlertFilters::provider("slow")));
    store.put_rule(spend_rule(10.0, AlertFilters::provider("openai")));
    store.add_usage([UsageRecord::new("org_1", "openai", "gpt-4o", 40.0, now - Duration::hours(2))]);

    let mut config = Config::default();
    config.engine.query_timeout = StdDuration::from_millis(100);

    let stores = Stores {
        rules: Arc::new(store.clone()),
        usage: Arc::new(FlakyUsage { inner: store.clone() }),
        alerts: Arc::new(store.clone()),
    };
    let engine = AlertEngine::new(&config, stores, Arc::new(OkNotifier), Arc::new(events.clone()));

    let report = engine.evaluate_organization_at("org_1", now).await.unwrap();

    assert_eq!(report.rules_evaluated, 3);
    assert_eq!(report.rules_failed, 2);
    assert_eq!(report.triggers, 1);
    assert_eq!(report.alerts_created.len(), 1);
    assert_eq!(store.alerts().len(), 1);
    assert_eq!(events.events().len(), 1);
}

#[tokio::test]
async fn consensus_anomaly_creates_alert() {
    let store = MemoryStore::new();
    let events = RecordingEventSink::new();
    // Wednesday noon
    let now = Utc.with_ymd_and_hms(2024, 3, 13, 12, 0, 0).unwrap();

    let daily = [
        90.0, 95.0, 100.0, 105.0, 110.0, 92.0, 98.0, 102.0, 108.0, 96.0, 104.0, 100.0, 100.0,
    ];
    store.add_usage(daily.iter().enumerate().map(|(i, cost)| {
        UsageRecord::new("org_1", "openai", "gpt-4o", *cost, now - Duration::days(i as i64 + 2))
    }));
    store.add_usage([UsageRecord::new("org_1", "openai", "gpt-4o", 1000.0, now - Duration::hours(1))]);

    let rule = AlertRule::new(
        "org_1",
        "Daily anomaly",
        RuleConfig::SpendAnomaly(SpendAnomalyConfig {
            metric: AnomalyMetric::DailyCost,
            sensitivity: Sensitivity::Medium,
            time_window: TimeWindow::OneDay,
            baseline_period: BaselinePeriod::FourteenDays,
            filters: AlertFilters::default(),
        }),
    );
    store.put_rule(rule.clone());

    let engine = engine_with(&Config::default(), &store, &events);
    let report = engine.evaluate_organization_at("org_1", now).await.unwrap();
    assert_eq!(report.alerts_created.len(), 1);

    let alert = store.get_alert(report.alerts_created[0]).await.unwrap().unwrap();
    assert_eq!(alert.alert_type, AlertType::SpendAnomaly);
    assert_eq!(alert.rule_id, rule.id);
    assert_eq!(alert.current_value, 1000.0);
    assert!(alert.threshold_value < 1000.0);

    let methods: Vec<String> = serde_json::from_value(alert.context["detectionMethods"].clone()).unwrap();
    assert!(methods.contains(&"iqr".to_string()));
    assert!(methods.contains(&"mad".to_string()));
    assert_eq!(alert.context["dataPoints"], 14);
}

#[tokio::test]
async fn anomaly_needs_enough_history() {
    let store = MemoryStore::new();
    let events = RecordingEventSink::new();
    let now = Utc::now();

    store.add_usage([UsageRecord::new("org_1", "openai", "gpt-4o", 1000.0, now - Duration::hours(1))]);
    store.put_rule(AlertRule::new(
        "org_1",
        "Daily anomaly",
        RuleConfig::SpendAnomaly(SpendAnomalyConfig {
            metric: AnomalyMetric::DailyCost,
            sensitivity: Sensitivity::High,
            time_window: TimeWindow::OneDay,
            baseline_period: BaselinePeriod::SevenDays,
            filters: AlertFilters::default(),
        }),
    ));

    let engine = engine_with(&Config::default(), &store, &events);
    let report = engine.evaluate_organization_at("org_1", now).await.unwrap();
    assert_eq!(report.rules_evaluated, 1);
    assert_eq!(report.triggers, 0);
    assert!(store.alerts().is_empty());
}

#[tokio::test]
async fn snoozed_alert_reactivates_then_clears() {
    let store = MemoryStore::new();
    let events = RecordingEventSink::new();
    let now = Utc::now();

    let rule = spend_rule(100.0, AlertFilters::default());
    store.put_rule(rule.clone());
    store.add_usage([UsageRecord::new("org_1", "openai", "gpt-4o", 250.0, now - Duration::hours(1))]);

    let engine = engine_with(&Config::default(), &store, &events);
    let report = engine.evaluate_organization_at("org_1", now).await.unwrap();
    let alert_id = report.alerts_created[0];

    // Still over threshold when the snooze ends
    let snoozed = engine
        .lifecycle()
        .snooze(alert_id, "user_1", SnoozeDuration::FifteenMinutes, None)
        .await
        .unwrap();
    let woke = snoozed.snoozed_until.unwrap() + Duration::seconds(1);
    let sweep = engine.lifecycle().process_snoozed_alerts(&engine, woke).await.unwrap();
    assert_eq!(sweep.reactivated, 1);
    assert_eq!(
        store.get_alert(alert_id).await.unwrap().unwrap().status,
        AlertStatus::Active
    );

    // Usage has aged out of the window by the second expiry
    engine
        .lifecycle()
        .snooze(alert_id, "user_1", SnoozeDuration::OneHour, None)
        .await
        .unwrap();
    let sweep = engine
        .lifecycle()
        .process_snoozed_alerts(&engine, now + Duration::days(3))
        .await
        .unwrap();
    assert_eq!(sweep.resolved, 1);

    let stored = store.get_alert(alert_id).await.unwrap().unwrap();
    assert_eq!(stored.status, AlertStatus::Resolved);
    assert_eq!(stored.resolution_type, Some(ResolutionType::AutoCleared));

    let kinds: Vec<_> = events.events().into_iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            AlertEventKind::Created,
            AlertEventKind::Snoozed,
            AlertEventKind::Reactivated,
            AlertEventKind::Snoozed,
            AlertEventKind::Resolved,
        ]
    );
}

#[tokio::test]
async fn cooldown_suppresses_repeat_trigger() {
    let store = MemoryStore::new();
    let events = RecordingEventSink::new();
    let now = Utc::now();

    let mut rule = spend_rule(100.0, AlertFilters::default());
    rule.cooldown_minutes = Some(60);
    store.put_rule(rule.clone());
    store.add_usage([UsageRecord::new("org_1", "openai", "gpt-4o", 250.0, now - Duration::hours(1))]);

    let engine = engine_with(&Config::default(), &store, &events);
    engine.evaluate_organization_at("org_1", now).await.unwrap();

    // Much larger value, so only the cooldown can suppress it
    store.add_usage([UsageRecord::new("org_1", "openai", "gpt-4o", 500.0, now)]);
    let report = engine
        .evaluate_organization_at("org_1", now + Duration::minutes(5))
        .await
        .unwrap();
    assert!(report.alerts_created.is_empty());
    assert_eq!(report.suppressed.get(&SuppressReason::Cooldown), Some(&1));
}

#[tokio::test]
async fn disabled_rules_are_not_listed() {
    let store = MemoryStore::new();
    let mut rule = spend_rule(1.0, AlertFilters::default());
    rule.enabled = false;
    store.put_rule(rule);

    assert!(store.list_enabled_rules("org_1").await.unwrap().is_empty());
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let store = MemoryStore::new();
    let events = RecordingEventSink::new();
    let engine = engine_with(&Config::default(), &store, &events);

    tokio::time::timeout(
        StdDuration::from_secs(5),
        engine.run(&["org_1".to_string()], StdDuration::from_secs(60), async {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }),
    )
    .await
    .unwrap();
}
