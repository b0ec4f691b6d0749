//! Organization-level evaluation pass
//!
//! One pass loads the enabled rules of an organization, evaluates them
//! concurrently, and turns each trigger into an alert through the
//! deduplicator, the store, the notification dispatcher and the event sink.
//! Trigger processing is serialized per rule so the dedup gates read a
//! consistent view for that rule.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use metrics::counter;
use tokio::sync::Mutex;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::dedup::{is_rule_active, Deduplicator, SuppressReason};
use super::dispatcher::NotificationDispatcher;
use super::lifecycle::{ConditionCheck, LifecycleManager, SweepReport};
use super::notifier::Notifier;
use crate::config::Config;
use crate::db::{AlertEventSink, AlertStore, RuleStore, UsageStore};
use crate::detection::{AnomalyDetector, ForecastEngine};
use crate::error::{Error, Result};
use crate::evaluators::{
    alert_title, budget_threshold, provider_error, spend_threshold, usage_spike,
};
use crate::models::{
    Alert, AlertAction, AlertActionKind, AlertEvent, AlertEventKind, AlertRule, AlertTrigger,
    RuleConfig,
};

/// The data stores an engine reads and writes
#[derive(Clone)]
pub struct Stores {
    pub rules: Arc<dyn RuleStore>,
    pub usage: Arc<dyn UsageStore>,
    pub alerts: Arc<dyn AlertStore>,
}

impl Stores {
    /// Use one backend for all three roles
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: RuleStore + UsageStore + AlertStore + 'static,
    {
        Self {
            rules: store.clone(),
            usage: store.clone(),
            alerts: store,
        }
    }
}

/// Counts from one organization pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    pub org_id: String,
    pub rules_evaluated: usize,
    /// Outside their active hours or days
    pub rules_skipped: usize,
    /// Evaluation errored or timed out
    pub rules_failed: usize,
    pub triggers: usize,
    pub alerts_created: Vec<Uuid>,
    pub suppressed: HashMap<SuppressReason, usize>,
    /// Triggers whose alert could not be stored
    pub persistence_failures: usize,
}

impl EvaluationReport {
    pub fn suppressed_total(&self) -> usize {
        self.suppressed.values().sum()
    }
}

/// What happened to one trigger
#[derive(Debug, Clone)]
pub enum TriggerOutcome {
    Created(Alert),
    Suppressed(SuppressReason),
    /// The rule was deleted or disabled after evaluation
    RuleGone,
}

enum RuleOutcome {
    Failed,
    Quiet,
    Processed(Result<TriggerOutcome>),
}

/// Evaluates rules and manages the alerts they produce
pub struct AlertEngine {
    stores: Stores,
    detector: AnomalyDetector,
    forecaster: ForecastEngine,
    dedup: Deduplicator,
    dispatcher: NotificationDispatcher,
    lifecycle: LifecycleManager,
    events: Arc<dyn AlertEventSink>,
    query_timeout: Duration,
    rule_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl AlertEngine {
    pub fn new(
        config: &Config,
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn AlertEventSink>,
    ) -> Self {
        let dispatcher = NotificationDispatcher::new(notifier);
        let lifecycle = LifecycleManager::new(
            stores.rules.clone(),
            stores.alerts.clone(),
            dispatcher.clone(),
            events.clone(),
            config.engine.auto_resolve_horizon,
        );

        Self {
            detector: AnomalyDetector::new(config.detection.clone()),
            forecaster: ForecastEngine::new(config.forecast.clone()),
            dedup: Deduplicator::new(stores.alerts.clone(), &config.engine),
            dispatcher,
            lifecycle,
            events,
            query_timeout: config.engine.query_timeout,
            rule_locks: DashMap::new(),
            stores,
        }
    }

    /// Status transitions for alerts this engine created
    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Run one evaluation pass for an organization
    pub async fn evaluate_organization(&self, org_id: &str) -> Result<EvaluationReport> {
        self.evaluate_organization_at(org_id, Utc::now()).await
    }

    /// Run one evaluation pass as of `now`
    ///
    /// Fails only when the rules cannot be listed. Per-rule evaluation errors
    /// and per-trigger persistence errors are counted in the report.
    pub async fn evaluate_organization_at(
        &self,
        org_id: &str,
        now: DateTime<Utc>,
    ) -> Result<EvaluationReport> {
        let rules = timeout(self.query_timeout, self.stores.rules.list_enabled_rules(org_id))
            .await
            .map_err(|_| Error::Timeout(format!("listing rules for {org_id}")))??;

        let mut report = EvaluationReport {
            org_id: org_id.to_string(),
            ..Default::default()
        };

        let (active, inactive): (Vec<_>, Vec<_>) =
            rules.into_iter().partition(|rule| is_rule_active(rule, now));
        for rule in &inactive {
            debug!(rule_id = %rule.id, "Rule outside its schedule; skipped");
        }
        report.rules_skipped = inactive.len();

        debug!(org_id, rules = active.len(), "Evaluating rules");
        let outcomes = join_all(active.iter().map(|rule| self.run_rule(rule, now))).await;

        for outcome in outcomes {
            report.rules_evaluated += 1;
            match outcome {
                RuleOutcome::Failed => report.rules_failed += 1,
                RuleOutcome::Quiet => {}
                RuleOutcome::Processed(result) => {
                    report.triggers += 1;
                    match result {
                        Ok(TriggerOutcome::Created(alert)) => report.alerts_created.push(alert.id),
                        Ok(TriggerOutcome::Suppressed(reason)) => {
                            *report.suppressed.entry(reason).or_default() += 1;
                        }
                        Ok(TriggerOutcome::RuleGone) => {}
                        Err(_) => report.persistence_failures += 1,
                    }
                }
            }
        }

        info!(
            org_id,
            evaluated = report.rules_evaluated,
            skipped = report.rules_skipped,
            failed = report.rules_failed,
            triggers = report.triggers,
            created = report.alerts_created.len(),
            suppressed = report.suppressed_total(),
            "Evaluation pass complete"
        );
        Ok(report)
    }

    async fn run_rule(&self, rule: &AlertRule, now: DateTime<Utc>) -> RuleOutcome {
        counter!("spendwatch_rules_evaluated_total").increment(1);

        let trigger = match timeout(self.query_timeout, self.evaluate_rule(rule, now)).await {
            Ok(Ok(Some(trigger))) => trigger,
            Ok(Ok(None)) => return RuleOutcome::Quiet,
            Ok(Err(e)) => {
                error!(rule_id = %rule.id, rule_type = %rule.rule_type(), error = %e, "Rule evaluation failed");
                counter!("spendwatch_rule_errors_total", "reason" => "error").increment(1);
                return RuleOutcome::Failed;
            }
            Err(_) => {
                warn!(
                    rule_id = %rule.id,
                    rule_type = %rule.rule_type(),
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "Rule evaluation timed out"
                );
                counter!("spendwatch_rule_errors_total", "reason" => "timeout").increment(1);
                return RuleOutcome::Failed;
            }
        };

        let result = self.process_trigger(trigger, now).await;
        if let Err(e) = &result {
            error!(rule_id = %rule.id, error = %e, "Failed to persist alert");
        }
        RuleOutcome::Processed(result)
    }

    /// Evaluate one rule's condition without side effects
    pub async fn evaluate_rule(
        &self,
        rule: &AlertRule,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertTrigger>> {
        let usage = self.stores.usage.as_ref();
        let org_id = rule.org_id.as_str();

        match &rule.config {
            RuleConfig::SpendThreshold(config) => {
                spend_threshold::evaluate(usage, rule.id, org_id, config, now).await
            }
            RuleConfig::BudgetThreshold(config) => {
                budget_threshold::evaluate(usage, &self.forecaster, rule.id, config, now).await
            }
            RuleConfig::SpendAnomaly(config) => {
                self.detector
                    .detect_spend_anomaly(usage, rule.id, org_id, config, now)
                    .await
            }
            RuleConfig::ForecastExceeded(config) => {
                self.forecaster
                    .evaluate_forecast(usage, rule.id, org_id, config, now)
                    .await
            }
            RuleConfig::ProviderError(config) => {
                provider_error::evaluate(usage, rule.id, org_id, config, now).await
            }
            RuleConfig::UsageSpike(config) => {
                usage_spike::evaluate(usage, rule.id, org_id, config, now).await
            }
        }
    }

    /// Dedup, persist, notify and announce one trigger
    ///
    /// Holds the rule's lock for the whole sequence. The lock entry is
    /// dropped again once no other trigger for the rule is waiting on it.
    pub async fn process_trigger(
        &self,
        trigger: AlertTrigger,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome> {
        let rule_id = trigger.rule_id;
        let lock = self.rule_locks.entry(rule_id).or_default().clone();
        let guard = lock.lock().await;
        let outcome = self.process_trigger_locked(trigger, now).await;
        drop(guard);
        drop(lock);
        self.rule_locks
            .remove_if(&rule_id, |_, lock| Arc::strong_count(lock) == 1);
        outcome
    }

    async fn process_trigger_locked(
        &self,
        trigger: AlertTrigger,
        now: DateTime<Utc>,
    ) -> Result<TriggerOutcome> {
        let rule = match self.stores.rules.get_rule(trigger.rule_id).await? {
            Some(rule) if rule.enabled => rule,
            _ => {
                debug!(rule_id = %trigger.rule_id, "Rule removed or disabled before processing");
                return Ok(TriggerOutcome::RuleGone);
            }
        };

        if let Some(reason) = self.dedup.check(&rule, &trigger, now).await? {
            info!(rule_id = %rule.id, reason = %reason, value = trigger.current_value, "Trigger suppressed");
            counter!("spendwatch_triggers_suppressed_total", "reason" => reason.as_str())
                .increment(1);
            return Ok(TriggerOutcome::Suppressed(reason));
        }

        let mut alert = Alert::from_trigger(&rule.org_id, &trigger, alert_title(&trigger));
        self.stores.alerts.create_alert(&alert).await?;

        counter!(
            "spendwatch_alerts_created_total",
            "type" => alert.alert_type.as_str(),
            "severity" => alert.severity.as_str()
        )
        .increment(1);
        info!(
            alert_id = %alert.id,
            rule_id = %rule.id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "Alert triggered"
        );

        self.append(AlertAction::new(
            alert.id,
            AlertActionKind::Triggered,
            None,
            Some(alert.description.clone()),
        ))
        .await;

        let records = self.dispatcher.notify(&rule, &alert).await;
        if !records.is_empty() {
            if let Err(e) = self.stores.alerts.set_notifications(alert.id, &records).await {
                warn!(alert_id = %alert.id, error = %e, "Failed to record notifications");
            }
            let channels = records
                .iter()
                .map(|r| {
                    let status = if r.success { "ok" } else { "failed" };
                    format!("{}:{status}", r.channel.as_str())
                })
                .collect::<Vec<_>>()
                .join(", ");
            self.append(AlertAction::new(
                alert.id,
                AlertActionKind::NotificationSent,
                None,
                Some(channels),
            ))
            .await;
            alert.notifications_sent = records;
        }

        self.events
            .publish(AlertEvent::new(AlertEventKind::Created, &alert));
        Ok(TriggerOutcome::Created(alert))
    }

    async fn append(&self, action: AlertAction) {
        if let Err(e) = self.stores.alerts.append_action(&action).await {
            warn!(alert_id = %action.alert_id, action = action.action.as_str(), error = %e, "Failed to append timeline entry");
        }
    }

    /// Resolve an organization's recent alerts whose condition cleared
    pub async fn run_auto_resolution(&self, org_id: &str) -> Result<SweepReport> {
        self.lifecycle
            .check_auto_resolution(org_id, self, Utc::now())
            .await
    }

    /// Wake or resolve alerts whose snooze expired
    pub async fn process_snoozed(&self) -> Result<SweepReport> {
        self.lifecycle.process_snoozed_alerts(self, Utc::now()).await
    }

    /// One scheduler tick: evaluate and sweep each organization, then snoozes
    pub async fn tick(&self, org_ids: &[String]) {
        join_all(org_ids.iter().map(|org_id| async move {
            if let Err(e) = self.evaluate_organization(org_id).await {
                error!(org_id = %org_id, error = %e, "Evaluation pass abandoned");
            }
            if let Err(e) = self.run_auto_resolution(org_id).await {
                warn!(org_id = %org_id, error = %e, "Auto-resolution sweep failed");
            }
        }))
        .await;

        if let Err(e) = self.process_snoozed().await {
            warn!(error = %e, "Snooze sweep failed");
        }
    }

    /// Tick every `every` until `shutdown` completes
    pub async fn run<F>(&self, org_ids: &[String], every: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(organizations = org_ids.len(), interval = ?every, "Starting alert engine");
        tokio::pin!(shutdown);

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Alert engine stopping");
                    break;
                }
                _ = ticker.tick() => self.tick(org_ids).await,
            }
        }
    }
}

#[async_trait]
impl ConditionCheck for AlertEngine {
    async fn condition_holds(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<bool> {
        timeout(self.query_timeout, self.evaluate_rule(rule, now))
            .await
            .map_err(|_| Error::Timeout(format!("re-evaluating rule {}", rule.id)))?
            .map(|trigger| trigger.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::notifier::NotificationResult;
    use crate::db::{MemoryStore, RecordingEventSink};
    use crate::models::{
        AlertFilters, AlertStatus, ChannelConfig, NotificationChannel, Operator, SpendMetric,
        SpendThresholdConfig, TimeWindow, UsageRecord,
    };
    use chrono::Duration as ChronoDuration;

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
            NotificationResult::default()
        }
    }

    fn spend_rule(threshold: f64) -> AlertRule {
        let mut rule = AlertRule::new(
            "org_1",
            "Daily spend",
            RuleConfig::SpendThreshold(SpendThresholdConfig {
                metric: SpendMetric::DailyCost,
                operator: Operator::Gt,
                threshold,
                time_window: TimeWindow::OneDay,
                filters: AlertFilters::default(),
            }),
        );
        rule.channels = vec![NotificationChannel::new(ChannelConfig::Slack {
            webhook_url: "https://example.invalid/slack".to_string(),
            channel: None,
        })];
        rule
    }

    fn engine(store: &MemoryStore, events: &RecordingEventSink) -> AlertEngine {
        AlertEngine::new(
            &Config::default(),
            Stores::shared(Arc::new(store.clone())),
            Arc::new(OkNotifier),
            Arc::new(events.clone()),
        )
    }

    #[tokio::test]
    async fn test_trigger_becomes_alert() {
        let store = MemoryStore::new();
        let events = RecordingEventSink::new();
        let rule = spend_rule(100.0);
        store.put_rule(rule.clone());
        let now = Utc::now();
        store.add_usage([UsageRecord::new("org_1", "openai", "gpt-4o", 250.0, now - ChronoDuration::hours(1))]);

        let engine = engine(&store, &events);
        let report = engine.evaluate_organization_at("org_1", now).await.unwrap();
        assert_eq!(report.rules_evaluated, 1);
        assert_eq!(report.alerts_created.len(), 1);

        let alert = store.get_alert(report.alerts_created[0]).await.unwrap().unwrap();
        assert_eq!(alert.status, AlertStatus::Active);
        assert_eq!(alert.title, "Spending threshold exceeded");
        assert_eq!(alert.notifications_sent.len(), 1);

        let timeline = engine.lifecycle().timeline(alert.id).await.unwrap();
        assert_eq!(timeline[0].action, AlertActionKind::Triggered);
        assert_eq!(timeline[1].action, AlertActionKind::NotificationSent);
        assert_eq!(events.events()[0].kind, AlertEventKind::Created);

        // Same value on the next tick is a duplicate
        let report = engine.evaluate_organization_at("org_1", now).await.unwrap();
        assert!(report.alerts_created.is_empty());
        assert_eq!(report.suppressed.get(&SuppressReason::Similar), Some(&1));
    }

    #[tokio::test]
    async fn test_condition_check_reruns_evaluator() {
        let store = MemoryStore::new();
        let events = RecordingEventSink::new();
        let engine = engine(&store, &events);
        let now = Utc::now();
        store.add_usage([UsageRecord::new("org_1", "openai", "gpt-4o", 50.0, now - ChronoDuration::hours(1))]);

        assert!(engine.condition_holds(&spend_rule(10.0), now).await.unwrap());
        assert!(!engine.condition_holds(&spend_rule(100.0), now).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleted_rule_is_not_processed() {
        let store = MemoryStore::new();
        let events = RecordingEventSink::new();
        let engine = engine(&store, &events);
        let rule = spend_rule(1.0);

        let trigger = AlertTrigger {
            rule_id: rule.id,
            alert_type: rule.rule_type(),
            severity: crate::models::Severity::Info,
            current_value: 2.0,
            threshold_value: 1.0,
            message: "over".to_string(),
            context: serde_json::json!({}),
            triggered_at: Utc::now(),
        };
        let outcome = engine.process_trigger(trigger, Utc::now()).await.unwrap();
        assert!(matches!(outcome, TriggerOutcome::RuleGone));
        assert!(store.alerts().is_empty());
        assert!(engine.rule_locks.is_empty());
    }

    #[tokio::test]
    async fn test_rule_locks_released_after_processing() {
        let store = MemoryStore::new();
        let events = RecordingEventSink::new();
        let engine = engine(&store, &events);
        let rule = spend_rule(1.0);
        store.put_rule(rule.clone());

        let trigger = |value: f64| AlertTrigger {
            rule_id: rule.id,
            alert_type: rule.rule_type(),
            severity: crate::models::Severity::Info,
            current_value: value,
            threshold_value: 1.0,
            message: "over".to_string(),
            context: serde_json::json!({}),
            triggered_at: Utc::now(),
        };
        let now = Utc::now();
        let (first, second) = tokio::join!(
            engine.process_trigger(trigger(2.0), now),
            engine.process_trigger(trigger(2.0), now),
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(store.alerts().len(), 1);
        assert!(engine.rule_locks.is_empty());
    }
}
