//! Alert fatigue gates applied before a trigger becomes an alert

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use tracing::debug;

use crate::config::EngineConfig;
use crate::db::AlertStore;
use crate::error::Result;
use crate::models::{AlertRule, AlertTrigger};

/// Why a trigger did not become an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuppressReason {
    /// Outside the rule's active hours or days
    Schedule,
    /// An alert for the rule fired within its cooldown
    Cooldown,
    /// The rule hit its hourly alert cap
    RateLimit,
    /// An active alert already reports nearly the same value
    Similar,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Cooldown => "cooldown",
            Self::RateLimit => "rate_limit",
            Self::Similar => "similar",
        }
    }
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `rule` is scheduled to run at `now` (UTC)
///
/// Active hours may wrap midnight; active days use 0 = Sunday.
pub fn is_rule_active(rule: &AlertRule, now: DateTime<Utc>) -> bool {
    if let Some(hours) = rule.active_hours {
        if !hours.contains(now.hour()) {
            return false;
        }
    }

    if let Some(days) = &rule.active_days {
        let today = now.weekday().num_days_from_sunday();
        if !days.iter().any(|d| u32::from(*d) == today) {
            return false;
        }
    }

    true
}

/// Relative distance between an existing alert value and a new one
pub fn relative_difference(existing: f64, new: f64) -> f64 {
    (existing - new).abs() / existing.abs().max(1.0)
}

/// Read-then-decide gate against the alert store
#[derive(Clone)]
pub struct Deduplicator {
    alerts: Arc<dyn AlertStore>,
    similarity_tolerance: f64,
    similarity_lookback: usize,
}

impl Deduplicator {
    pub fn new(alerts: Arc<dyn AlertStore>, config: &EngineConfig) -> Self {
        Self {
            alerts,
            similarity_tolerance: config.similarity_tolerance,
            similarity_lookback: config.similarity_lookback,
        }
    }

    /// First failing gate for `trigger`, or `None` when it may be persisted
    ///
    /// Gates run in order: schedule, cooldown, hourly rate limit, similarity.
    pub async fn check(
        &self,
        rule: &AlertRule,
        trigger: &AlertTrigger,
        now: DateTime<Utc>,
    ) -> Result<Option<SuppressReason>> {
        if !is_rule_active(rule, now) {
            return Ok(Some(SuppressReason::Schedule));
        }

        if let Some(cooldown) = rule.cooldown_minutes.filter(|m| *m > 0) {
            let since = now - Duration::minutes(i64::from(cooldown));
            if self.alerts.count_for_rule_since(rule.id, since).await? > 0 {
                debug!(rule_id = %rule.id, cooldown_minutes = cooldown, "Rule in cooldown");
                return Ok(Some(SuppressReason::Cooldown));
            }
        }

        if let Some(max) = rule.max_alerts_per_hour {
            let recent = self
                .alerts
                .count_for_rule_since(rule.id, now - Duration::hours(1))
                .await?;
            if recent >= u64::from(max) {
                debug!(rule_id = %rule.id, recent, max, "Rule hit hourly alert cap");
                return Ok(Some(SuppressReason::RateLimit));
            }
        }

        let active = self
            .alerts
            .list_active_for_rule(rule.id, self.similarity_lookback)
            .await?;
        if let Some(existing) = active.iter().find(|a| {
            relative_difference(a.current_value, trigger.current_value) < self.similarity_tolerance
        }) {
            debug!(
                rule_id = %rule.id,
                existing_alert = %existing.id,
                existing_value = existing.current_value,
                new_value = trigger.current_value,
                "Similar alert already active"
            );
            return Ok(Some(SuppressReason::Similar));
        }

        Ok(None)
    }
}
