//! Alert status transitions and the background sweeps that drive them
//!
//! ```text
//! active ──acknowledge──> acknowledged ──resolve──> resolved
//!   │ │                        │
//!   │ └──────snooze─────┐      │ snooze
//!   │                   v      v
//!   └──resolve──    snoozed ──sweep──> active | resolved
//! ```
//!
//! Every transition is a compare-and-set on the stored status, appends a
//! timeline entry and publishes a change event. Once the status write has
//! landed, later failures are logged and never undo the transition.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatcher::NotificationDispatcher;
use crate::db::{AlertEventSink, AlertStore, RuleStore};
use crate::error::{Error, Result};
use crate::models::{
    Alert, AlertAction, AlertActionKind, AlertEvent, AlertEventKind, AlertRule, AlertStatus,
    ResolutionType, SnoozeDuration,
};

/// User recorded on transitions made by the sweeps
pub const SYSTEM_USER: &str = "system";

/// Re-checks whether a rule's condition still holds
#[async_trait]
pub trait ConditionCheck: Send + Sync {
    async fn condition_holds(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<bool>;
}

/// Outcome counts of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub resolved: usize,
    pub reactivated: usize,
    pub failed: usize,
}

/// Drives alert status changes
#[derive(Clone)]
pub struct LifecycleManager {
    rules: Arc<dyn RuleStore>,
    alerts: Arc<dyn AlertStore>,
    dispatcher: NotificationDispatcher,
    events: Arc<dyn AlertEventSink>,
    auto_resolve_horizon: Duration,
}

impl LifecycleManager {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        alerts: Arc<dyn AlertStore>,
        dispatcher: NotificationDispatcher,
        events: Arc<dyn AlertEventSink>,
        auto_resolve_horizon: std::time::Duration,
    ) -> Self {
        Self {
            rules,
            alerts,
            dispatcher,
            events,
            auto_resolve_horizon: Duration::from_std(auto_resolve_horizon)
                .unwrap_or_else(|_| Duration::hours(24)),
        }
    }

    /// Acknowledge an active alert
    pub async fn acknowledge(
        &self,
        alert_id: Uuid,
        user_id: &str,
        note: Option<String>,
    ) -> Result<Alert> {
        let now = Utc::now();
        let alert = self
            .transition(alert_id, "acknowledge", &[AlertStatus::Active], |alert| {
                alert.status = AlertStatus::Acknowledged;
                alert.acknowledged_at = Some(now);
                alert.acknowledged_by = Some(user_id.to_string());
                alert.acknowledgment_note = note.clone();
            })
            .await?;

        self.record(&alert, AlertActionKind::Acknowledged, Some(user_id), note)
            .await;
        self.events
            .publish(AlertEvent::new(AlertEventKind::Acknowledged, &alert));
        info!(alert_id = %alert.id, user_id, "Alert acknowledged");
        Ok(alert)
    }

    /// Mute an active or acknowledged alert for a while
    pub async fn snooze(
        &self,
        alert_id: Uuid,
        user_id: &str,
        duration: SnoozeDuration,
        custom_minutes: Option<u32>,
    ) -> Result<Alert> {
        let minutes = duration.minutes(custom_minutes);
        let until = Utc::now() + Duration::minutes(minutes);
        let alert = self
            .transition(
                alert_id,
                "snooze",
                &[AlertStatus::Active, AlertStatus::Acknowledged],
                |alert| {
                    alert.status = AlertStatus::Snoozed;
                    alert.snoozed_until = Some(until);
                    alert.snoozed_by = Some(user_id.to_string());
                },
            )
            .await?;

        self.record(
            &alert,
            AlertActionKind::Snoozed,
            Some(user_id),
            Some(format!("Snoozed for {minutes} minutes")),
        )
        .await;
        self.events
            .publish(AlertEvent::new(AlertEventKind::Snoozed, &alert));
        info!(alert_id = %alert.id, user_id, until = %until, "Alert snoozed");
        Ok(alert)
    }

    /// Close an alert; resolved is terminal
    pub async fn resolve(
        &self,
        alert_id: Uuid,
        user_id: &str,
        resolution: ResolutionType,
        note: Option<String>,
    ) -> Result<Alert> {
        self.resolve_at(alert_id, user_id, resolution, note, Utc::now())
            .await
    }

    async fn resolve_at(
        &self,
        alert_id: Uuid,
        user_id: &str,
        resolution: ResolutionType,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Alert> {
        let alert = self
            .transition(
                alert_id,
                "resolve",
                &[
                    AlertStatus::Active,
                    AlertStatus::Acknowledged,
                    AlertStatus::Snoozed,
                ],
                |alert| {
                    alert.status = AlertStatus::Resolved;
                    alert.resolved_at = Some(now);
                    alert.resolved_by = Some(user_id.to_string());
                    alert.resolution_type = Some(resolution);
                    alert.resolution_note = note.clone();
                },
            )
            .await?;

        let details = match &note {
            Some(note) => format!("{}: {note}", resolution.as_str()),
            None => resolution.as_str().to_string(),
        };
        self.record(&alert, AlertActionKind::Resolved, Some(user_id), Some(details))
            .await;

        if alert.has_open_page() {
            match self.rules.get_rule(alert.rule_id).await {
                Ok(Some(rule)) => self.dispatcher.resolve_incidents(&rule, &alert).await,
                Ok(None) => {
                    warn!(alert_id = %alert.id, rule_id = %alert.rule_id, "Rule gone; PagerDuty incident left open")
                }
                Err(e) => {
                    warn!(alert_id = %alert.id, error = %e, "Could not load rule to resolve PagerDuty incident")
                }
            }
        }

        self.events
            .publish(AlertEvent::new(AlertEventKind::Resolved, &alert));
        info!(
            alert_id = %alert.id,
            user_id,
            resolution = resolution.as_str(),
            "Alert resolved"
        );
        Ok(alert)
    }

    /// Timeline entries for an alert, oldest first
    pub async fn timeline(&self, alert_id: Uuid) -> Result<Vec<AlertAction>> {
        self.alerts.list_actions(alert_id).await
    }

    /// Resolve recent open alerts whose condition has cleared
    ///
    /// Only `active` and `acknowledged` alerts triggered within the
    /// auto-resolve horizon are checked. Failed checks leave the alert as is.
    pub async fn check_auto_resolution(
        &self,
        org_id: &str,
        condition: &dyn ConditionCheck,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let open = self
            .alerts
            .list_open_since(org_id, now - self.auto_resolve_horizon)
            .await?;
        let mut report = SweepReport::default();

        for alert in open {
            report.checked += 1;
            let rule = match self.rules.get_rule(alert.rule_id).await {
                Ok(Some(rule)) => rule,
                Ok(None) => {
                    debug!(alert_id = %alert.id, rule_id = %alert.rule_id, "Rule missing; skipping auto-resolution");
                    continue;
                }
                Err(e) => {
                    warn!(alert_id = %alert.id, rule_id = %alert.rule_id, error = %e, "Failed to load rule for auto-resolution");
                    report.failed += 1;
                    continue;
                }
            };

            match condition.condition_holds(&rule, now).await {
                Ok(true) => {}
                Ok(false) => {
                    if self.auto_resolve(&alert, now, &mut report).await {
                        report.resolved += 1;
                    }
                }
                Err(e) => {
                    warn!(alert_id = %alert.id, rule_id = %rule.id, error = %e, "Auto-resolution check failed");
                    report.failed += 1;
                }
            }
        }

        if report.resolved > 0 {
            info!(org_id, resolved = report.resolved, "Auto-resolved alerts");
        }
        Ok(report)
    }

    /// Wake alerts whose snooze has ended
    ///
    /// Alerts whose condition still holds go back to `active` and are
    /// re-notified; the rest are auto-resolved.
    pub async fn process_snoozed_alerts(
        &self,
        condition: &dyn ConditionCheck,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let expired = self.alerts.list_expired_snoozed(now).await?;
        let mut report = SweepReport::default();

        for alert in expired {
            report.checked += 1;
            let rule = match self.rules.get_rule(alert.rule_id).await {
                Ok(rule) => rule,
                Err(e) => {
                    warn!(alert_id = %alert.id, rule_id = %alert.rule_id, error = %e, "Failed to load rule for snoozed alert");
                    report.failed += 1;
                    continue;
                }
            };

            let holds = match &rule {
                Some(rule) => match condition.condition_holds(rule, now).await {
                    Ok(holds) => holds,
                    Err(e) => {
                        warn!(alert_id = %alert.id, rule_id = %rule.id, error = %e, "Snooze check failed; retrying next sweep");
                        report.failed += 1;
                        continue;
                    }
                },
                None => false,
            };

            match (holds, rule) {
                (true, Some(rule)) => match self.reactivate(alert, &rule).await {
                    Ok(_) => report.reactivated += 1,
                    Err(Error::InvalidTransition { alert_id, status, .. }) => {
                        debug!(alert_id = %alert_id, status = %status, "Snoozed alert changed concurrently");
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to reactivate snoozed alert");
                        report.failed += 1;
                    }
                },
                _ => {
                    if self.auto_resolve(&alert, now, &mut report).await {
                        report.resolved += 1;
                    }
                }
            }
        }

        Ok(report)
    }

    async fn reactivate(&self, mut alert: Alert, rule: &AlertRule) -> Result<Alert> {
        alert.status = AlertStatus::Active;
        alert.snoozed_until = None;
        alert.snoozed_by = None;
        if !self
            .alerts
            .update_alert(&alert, &[AlertStatus::Snoozed])
            .await?
        {
            let status = self
                .alerts
                .get_alert(alert.id)
                .await?
                .map_or(AlertStatus::Snoozed, |a| a.status);
            return Err(Error::InvalidTransition {
                alert_id: alert.id,
                status,
                action: "reactivate",
            });
        }

        self.record(
            &alert,
            AlertActionKind::Reactivated,
            Some(SYSTEM_USER),
            Some("Snooze expired with condition still active".to_string()),
        )
        .await;

        let records = self.dispatcher.notify(rule, &alert).await;
        if !records.is_empty() {
            alert.notifications_sent.extend(records);
            if let Err(e) = self
                .alerts
                .set_notifications(alert.id, &alert.notifications_sent)
                .await
            {
                warn!(alert_id = %alert.id, error = %e, "Failed to store notification records");
            }
        }

        self.events
            .publish(AlertEvent::new(AlertEventKind::Reactivated, &alert));
        info!(alert_id = %alert.id, rule_id = %rule.id, "Snoozed alert reactivated");
        Ok(alert)
    }

    /// Resolve as cleared by the system; `false` when it did not happen
    async fn auto_resolve(&self, alert: &Alert, now: DateTime<Utc>, report: &mut SweepReport) -> bool {
        match self
            .resolve_at(
                alert.id,
                SYSTEM_USER,
                ResolutionType::AutoCleared,
                Some("Condition no longer met".to_string()),
                now,
            )
            .await
        {
            Ok(_) => true,
            Err(Error::InvalidTransition { alert_id, status, .. }) => {
                debug!(alert_id = %alert_id, status = %status, "Alert changed before auto-resolution");
                false
            }
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "Auto-resolution failed");
                report.failed += 1;
                false
            }
        }
    }

    /// Load, check the current status, apply and compare-and-set
    async fn transition(
        &self,
        alert_id: Uuid,
        action: &'static str,
        allowed: &[AlertStatus],
        apply: impl FnOnce(&mut Alert),
    ) -> Result<Alert> {
        let mut alert = self
            .alerts
            .get_alert(alert_id)
            .await?
            .ok_or_else(|| Error::not_found("Alert", alert_id.to_string()))?;

        let from = alert.status;
        if !allowed.contains(&from) {
            return Err(Error::InvalidTransition {
                alert_id,
                status: from,
                action,
            });
        }

        apply(&mut alert);
        if !self.alerts.update_alert(&alert, &[from]).await? {
            let status = self
                .alerts
                .get_alert(alert_id)
                .await?
                .map_or(from, |a| a.status);
            return Err(Error::InvalidTransition {
                alert_id,
                status,
                action,
            });
        }

        Ok(alert)
    }

    async fn record(
        &self,
        alert: &Alert,
        kind: AlertActionKind,
        user_id: Option<&str>,
        details: Option<String>,
    ) {
        let action = AlertAction::new(alert.id, kind, user_id, details);
        if let Err(e) = self.alerts.append_action(&action).await {
            warn!(alert_id = %alert.id, action = kind.as_str(), error = %e, "Failed to append timeline entry");
        }
    }
}
