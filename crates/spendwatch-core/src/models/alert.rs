//! Alert data models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of alert, one per rule type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Windowed spend compared against a fixed amount
    SpendThreshold,
    /// Budget utilization percentage
    BudgetThreshold,
    /// Statistical spend anomaly (consensus of detectors)
    SpendAnomaly,
    /// Projected spend exceeds a threshold
    ForecastExceeded,
    /// Provider error rate or count elevated
    ProviderError,
    /// Request or token volume spike
    UsageSpike,
}

impl AlertType {
    /// Wire name of the type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpendThreshold => "spend_threshold",
            Self::BudgetThreshold => "budget_threshold",
            Self::SpendAnomaly => "spend_anomaly",
            Self::ForecastExceeded => "forecast_exceeded",
            Self::ProviderError => "provider_error",
            Self::UsageSpike => "usage_spike",
        }
    }

    /// Parse a wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "spend_threshold" => Some(Self::SpendThreshold),
            "budget_threshold" => Some(Self::BudgetThreshold),
            "spend_anomaly" => Some(Self::SpendAnomaly),
            "forecast_exceeded" => Some(Self::ForecastExceeded),
            "provider_error" => Some(Self::ProviderError),
            "usage_spike" => Some(Self::UsageSpike),
            _ => None,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity level, ordered `Info < Warning < Critical`
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational
    Info,
    /// Warning
    #[default]
    Warning,
    /// Critical
    Critical,
}

impl Severity {
    /// Wire name of the severity
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    /// Parse a wire name, defaulting to warning
    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "info" => Self::Info,
            "critical" => Self::Critical,
            _ => Self::Warning,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a persisted alert
///
/// Transitions: `active -> acknowledged -> resolved` and
/// `active|acknowledged -> snoozed -> {active, resolved}`. `resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// Alert is currently active
    #[default]
    Active,
    /// Alert has been acknowledged
    Acknowledged,
    /// Alert is muted until `snoozed_until`
    Snoozed,
    /// Alert has been resolved
    Resolved,
}

impl AlertStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Acknowledged => "acknowledged",
            Self::Snoozed => "snoozed",
            Self::Resolved => "resolved",
        }
    }

    /// Parse a wire name, defaulting to active
    pub fn parse_or_default(s: &str) -> Self {
        match s {
            "acknowledged" => Self::Acknowledged,
            "snoozed" => Self::Snoozed,
            "resolved" => Self::Resolved,
            _ => Self::Active,
        }
    }

    /// Whether the alert is still open (not resolved)
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an alert was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionType {
    /// Closed by a user
    Manual,
    /// The underlying condition cleared
    AutoCleared,
    /// Closed by a user as noise
    FalsePositive,
}

impl ResolutionType {
    /// Wire name of the resolution type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::AutoCleared => "auto_cleared",
            Self::FalsePositive => "false_positive",
        }
    }

    /// Parse a wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "auto_cleared" => Some(Self::AutoCleared),
            "false_positive" => Some(Self::FalsePositive),
            _ => None,
        }
    }
}

/// Snooze length chosen by a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnoozeDuration {
    /// 15 minutes
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// 1 hour
    #[serde(rename = "1h")]
    OneHour,
    /// 4 hours
    #[serde(rename = "4h")]
    FourHours,
    /// 24 hours
    #[serde(rename = "24h")]
    OneDay,
    /// Caller-supplied minutes
    #[serde(rename = "custom")]
    Custom,
}

impl SnoozeDuration {
    /// Snooze length in minutes; `Custom` falls back to an hour when no value is given
    pub fn minutes(&self, custom_minutes: Option<u32>) -> i64 {
        match self {
            Self::FifteenMinutes => 15,
            Self::OneHour => 60,
            Self::FourHours => 240,
            Self::OneDay => 1440,
            Self::Custom => custom_minutes.filter(|m| *m > 0).map_or(60, i64::from),
        }
    }
}

/// Ephemeral result of evaluating one rule in one pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertTrigger {
    /// Rule that produced the trigger
    pub rule_id: Uuid,
    /// Alert type to create
    pub alert_type: AlertType,
    /// Severity tier
    pub severity: Severity,
    /// Observed value
    pub current_value: f64,
    /// Value it was compared against
    pub threshold_value: f64,
    /// Human-readable description
    pub message: String,
    /// Free-form evidence
    pub context: serde_json::Value,
    /// Evaluation time
    pub triggered_at: DateTime<Utc>,
}

/// A persisted alert (one live incident)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Unique identifier
    pub id: Uuid,

    /// Owning organization
    pub org_id: String,

    /// The rule that triggered this alert
    pub rule_id: Uuid,

    /// Alert type
    pub alert_type: AlertType,

    /// Severity level
    pub severity: Severity,

    /// Current status
    pub status: AlertStatus,

    /// Short title
    pub title: String,

    /// Human-readable description
    pub description: String,

    /// The value that triggered the alert
    pub current_value: f64,

    /// The threshold that was crossed
    pub threshold_value: f64,

    /// Evidence captured at trigger time
    pub context: serde_json::Value,

    /// When the alert was triggered
    pub triggered_at: DateTime<Utc>,

    // Acknowledgement
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub acknowledgment_note: Option<String>,

    // Resolution
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_type: Option<ResolutionType>,
    pub resolution_note: Option<String>,

    // Snooze
    pub snoozed_until: Option<DateTime<Utc>>,
    pub snoozed_by: Option<String>,

    /// Notifications that were sent
    pub notifications_sent: Vec<NotificationRecord>,

    /// When the row was created
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Build a fresh active alert from a trigger
    pub fn from_trigger(org_id: &str, trigger: &AlertTrigger, title: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.to_string(),
            rule_id: trigger.rule_id,
            alert_type: trigger.alert_type,
            severity: trigger.severity,
            status: AlertStatus::Active,
            title,
            description: trigger.message.clone(),
            current_value: trigger.current_value,
            threshold_value: trigger.threshold_value,
            context: trigger.context.clone(),
            triggered_at: trigger.triggered_at,
            acknowledged_at: None,
            acknowledged_by: None,
            acknowledgment_note: None,
            resolved_at: None,
            resolved_by: None,
            resolution_type: None,
            resolution_note: None,
            snoozed_until: None,
            snoozed_by: None,
            notifications_sent: vec![],
            created_at: Utc::now(),
        }
    }

    /// Whether any recorded notification went to the given channel type
    pub fn was_notified_via(&self, channel: ChannelType) -> bool {
        self.notifications_sent.iter().any(|n| n.channel == channel)
    }

    /// Whether a PagerDuty incident was actually opened for this alert
    ///
    /// Skipped pages are recorded as successes without a message id.
    pub fn has_open_page(&self) -> bool {
        self.notifications_sent
            .iter()
            .any(|n| n.channel == ChannelType::PagerDuty && n.success && n.message_id.is_some())
    }
}

/// Notification channel kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Slack,
    Teams,
    #[serde(rename = "pagerduty")]
    PagerDuty,
    Datadog,
    Jira,
    Webhook,
}

impl ChannelType {
    /// Wire name of the channel type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Slack => "slack",
            Self::Teams => "teams",
            Self::PagerDuty => "pagerduty",
            Self::Datadog => "datadog",
            Self::Jira => "jira",
            Self::Webhook => "webhook",
        }
    }
}

/// Record of a sent notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Channel type
    pub channel: ChannelType,

    /// When it was sent
    pub sent_at: DateTime<Utc>,

    /// Whether it succeeded
    pub success: bool,

    /// Error message if failed
    pub error: Option<String>,

    /// Provider-side identifier (email id, issue key, dedup key)
    pub message_id: Option<String>,
}

/// Timeline entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertActionKind {
    Triggered,
    Acknowledged,
    Snoozed,
    Resolved,
    Reactivated,
    NotificationSent,
}

impl AlertActionKind {
    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Acknowledged => "acknowledged",
            Self::Snoozed => "snoozed",
            Self::Resolved => "resolved",
            Self::Reactivated => "reactivated",
            Self::NotificationSent => "notification_sent",
        }
    }

    /// Parse a wire name
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "triggered" => Some(Self::Triggered),
            "acknowledged" => Some(Self::Acknowledged),
            "snoozed" => Some(Self::Snoozed),
            "resolved" => Some(Self::Resolved),
            "reactivated" => Some(Self::Reactivated),
            "notification_sent" => Some(Self::NotificationSent),
            _ => None,
        }
    }
}

/// One entry in an alert's timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertAction {
    pub id: Uuid,
    pub alert_id: Uuid,
    pub action: AlertActionKind,
    pub user_id: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AlertAction {
    /// Create a timeline entry stamped now
    pub fn new(
        alert_id: Uuid,
        action: AlertActionKind,
        user_id: Option<&str>,
        details: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_id,
            action,
            user_id: user_id.map(String::from),
            details,
            created_at: Utc::now(),
        }
    }
}

/// Change event broadcast to live subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub org_id: String,
    pub kind: AlertEventKind,
    pub alert: Alert,
    pub timestamp: DateTime<Utc>,
}

/// What happened to the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertEventKind {
    Created,
    Acknowledged,
    Snoozed,
    Resolved,
    Reactivated,
}

impl AlertEvent {
    /// Wrap an alert in an event stamped now
    pub fn new(kind: AlertEventKind, alert: &Alert) -> Self {
        Self {
            org_id: alert.org_id.clone(),
            kind,
            alert: alert.clone(),
            timestamp: Utc::now(),
        }
    }
}
