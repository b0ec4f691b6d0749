//! Alert rule definitions
//!
//! A rule's `config` is a tagged union keyed by rule type, so dispatch over
//! rule types is an exhaustive `match` rather than a string lookup.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::alert::{AlertType, ChannelType, Severity};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
    /// Equal to
    Eq,
}

impl Operator {
    /// Check `value <op> threshold`
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

/// Rolling evaluation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "24h")]
    OneDay,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl TimeWindow {
    /// Window length in minutes
    pub fn minutes(&self) -> i64 {
        match self {
            Self::OneMinute => 1,
            Self::FiveMinutes => 5,
            Self::FifteenMinutes => 15,
            Self::OneHour => 60,
            Self::FourHours => 240,
            Self::OneDay => 1440,
            Self::SevenDays => 10_080,
            Self::ThirtyDays => 43_200,
        }
    }

    /// Start of the window ending at `now`
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::minutes(self.minutes())
    }

    /// Wire name of the window
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMinute => "1m",
            Self::FiveMinutes => "5m",
            Self::FifteenMinutes => "15m",
            Self::OneHour => "1h",
            Self::FourHours => "4h",
            Self::OneDay => "24h",
            Self::SevenDays => "7d",
            Self::ThirtyDays => "30d",
        }
    }
}

/// History length used to build an anomaly baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaselinePeriod {
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "14d")]
    FourteenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
    #[serde(rename = "60d")]
    SixtyDays,
}

impl BaselinePeriod {
    /// Period length in days
    pub fn days(&self) -> i64 {
        match self {
            Self::SevenDays => 7,
            Self::FourteenDays => 14,
            Self::ThirtyDays => 30,
            Self::SixtyDays => 60,
        }
    }

    /// Wire name of the period
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SevenDays => "7d",
            Self::FourteenDays => "14d",
            Self::ThirtyDays => "30d",
            Self::SixtyDays => "60d",
        }
    }
}

/// Anomaly sensitivity level; higher sensitivity means a lower threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    #[default]
    Medium,
    High,
}

/// Dimension filters applied to usage queries; empty lists mean "any"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertFilters {
    pub providers: Vec<String>,
    pub models: Vec<String>,
    pub cost_centers: Vec<String>,
    pub teams: Vec<String>,
    pub projects: Vec<String>,
    pub endpoints: Vec<String>,
}

impl AlertFilters {
    /// Filters restricted to a single provider
    pub fn provider(provider: impl Into<String>) -> Self {
        Self {
            providers: vec![provider.into()],
            ..Self::default()
        }
    }

    /// Whether no dimension is restricted
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
            && self.models.is_empty()
            && self.cost_centers.is_empty()
            && self.teams.is_empty()
            && self.projects.is_empty()
            && self.endpoints.is_empty()
    }
}

/// Spend metric label for threshold rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendMetric {
    HourlyCost,
    DailyCost,
    WeeklyCost,
    MonthlyCost,
}

impl SpendMetric {
    /// Human label ("daily cost")
    pub fn label(&self) -> &'static str {
        match self {
            Self::HourlyCost => "hourly cost",
            Self::DailyCost => "daily cost",
            Self::WeeklyCost => "weekly cost",
            Self::MonthlyCost => "monthly cost",
        }
    }
}

/// Metric observed by anomaly rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMetric {
    HourlyCost,
    DailyCost,
    RequestCost,
}

impl AnomalyMetric {
    /// Wire name of the metric
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HourlyCost => "hourly_cost",
            Self::DailyCost => "daily_cost",
            Self::RequestCost => "request_cost",
        }
    }

    /// Human label
    pub fn label(&self) -> &'static str {
        match self {
            Self::HourlyCost => "hourly cost",
            Self::DailyCost => "daily cost",
            Self::RequestCost => "request cost",
        }
    }
}

/// Forecast horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMetric {
    MonthlyForecast,
    QuarterlyForecast,
}

/// Volume metric observed by usage spike rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageMetric {
    RequestsPerMinute,
    TokensPerMinute,
    RequestsPerHour,
}

impl UsageMetric {
    /// Wire name of the metric
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestsPerMinute => "requests_per_minute",
            Self::TokensPerMinute => "tokens_per_minute",
            Self::RequestsPerHour => "requests_per_hour",
        }
    }

    /// Human label
    pub fn label(&self) -> &'static str {
        match self {
            Self::RequestsPerMinute => "requests per minute",
            Self::TokensPerMinute => "tokens per minute",
            Self::RequestsPerHour => "requests per hour",
        }
    }
}

/// Provider error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    RateLimit,
    Timeout,
    AuthError,
    ServerError,
    Unknown,
}

impl ErrorCategory {
    /// Classify an error code or status marker by code and keyword
    pub fn classify(code: Option<&str>) -> Self {
        let Some(code) = code.map(str::trim).filter(|c| !c.is_empty()) else {
            return Self::Unknown;
        };
        let code = code.to_lowercase();

        if code == "429" || code.contains("rate") || code.contains("limit") {
            Self::RateLimit
        } else if code == "408" || code.contains("timeout") || code.contains("timed") {
            Self::Timeout
        } else if code == "401"
            || code == "403"
            || code.contains("auth")
            || code.contains("unauthorized")
        {
            Self::AuthError
        } else if code.starts_with('5') || code.contains("server") || code.contains("internal") {
            Self::ServerError
        } else {
            Self::Unknown
        }
    }

    /// Wire name of the category
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::AuthError => "auth_error",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
        }
    }
}

/// Spend over a rolling window compared against an amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendThresholdConfig {
    pub metric: SpendMetric,
    pub operator: Operator,
    pub threshold: f64,
    pub time_window: TimeWindow,
    #[serde(default)]
    pub filters: AlertFilters,
}

/// Budget utilization compared against a percentage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetThresholdConfig {
    pub budget_id: Uuid,
    pub threshold_percent: f64,
    #[serde(default)]
    pub include_forecasted: bool,
}

/// Consensus anomaly detection over a cost metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendAnomalyConfig {
    pub metric: AnomalyMetric,
    #[serde(default)]
    pub sensitivity: Sensitivity,
    pub time_window: TimeWindow,
    pub baseline_period: BaselinePeriod,
    #[serde(default)]
    pub filters: AlertFilters,
}

/// Projected period spend compared against an amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastExceededConfig {
    pub metric: ForecastMetric,
    pub threshold: f64,
    /// One of 0.8, 0.9, 0.95
    pub confidence_level: f64,
    /// Only fire when the estimated breach is this many days away or closer
    pub alert_days_before: Option<u32>,
}

/// Provider error rate or count over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderErrorConfig {
    pub provider: Option<String>,
    /// Percentage, e.g. 5.0 for 5%
    pub error_rate_threshold: f64,
    pub error_count_threshold: Option<u64>,
    pub time_window: TimeWindow,
    #[serde(default)]
    pub error_types: Vec<ErrorCategory>,
}

/// Request/token volume over a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSpikeConfig {
    pub metric: UsageMetric,
    pub threshold: f64,
    pub spike_multiplier: Option<f64>,
    pub time_window: TimeWindow,
    #[serde(default)]
    pub filters: AlertFilters,
}

/// Type-specific rule configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleConfig {
    SpendThreshold(SpendThresholdConfig),
    BudgetThreshold(BudgetThresholdConfig),
    SpendAnomaly(SpendAnomalyConfig),
    ForecastExceeded(ForecastExceededConfig),
    ProviderError(ProviderErrorConfig),
    UsageSpike(UsageSpikeConfig),
}

impl RuleConfig {
    /// Alert type this configuration evaluates
    pub fn alert_type(&self) -> AlertType {
        match self {
            Self::SpendThreshold(_) => AlertType::SpendThreshold,
            Self::BudgetThreshold(_) => AlertType::BudgetThreshold,
            Self::SpendAnomaly(_) => AlertType::SpendAnomaly,
            Self::ForecastExceeded(_) => AlertType::ForecastExceeded,
            Self::ProviderError(_) => AlertType::ProviderError,
            Self::UsageSpike(_) => AlertType::UsageSpike,
        }
    }
}

/// Hour-of-day window (UTC). `start > end` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveHours {
    pub start: u32,
    pub end: u32,
}

impl ActiveHours {
    /// Whether `hour` falls inside the window (end exclusive)
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Transport-specific channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelConfig {
    /// Email via the transactional email API
    Email { recipients: Vec<String> },
    /// Slack incoming webhook
    Slack {
        webhook_url: String,
        channel: Option<String>,
    },
    /// Microsoft Teams incoming webhook
    Teams { webhook_url: String },
    /// PagerDuty Events v2
    #[serde(rename = "pagerduty")]
    PagerDuty {
        integration_key: String,
        #[serde(default)]
        all_severities: bool,
    },
    /// Datadog metrics and events
    Datadog {
        api_key: String,
        site: Option<String>,
        #[serde(default = "default_true")]
        send_metrics: bool,
        #[serde(default = "default_true")]
        send_events: bool,
    },
    /// Jira issue creation
    Jira {
        base_url: String,
        email: String,
        api_token: String,
        project_key: String,
        issue_type: Option<String>,
        priority: Option<String>,
    },
    /// Generic webhook
    Webhook {
        url: String,
        secret: Option<String>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

fn default_true() -> bool {
    true
}

impl ChannelConfig {
    /// Channel kind
    pub fn channel_type(&self) -> ChannelType {
        match self {
            Self::Email { .. } => ChannelType::Email,
            Self::Slack { .. } => ChannelType::Slack,
            Self::Teams { .. } => ChannelType::Teams,
            Self::PagerDuty { .. } => ChannelType::PagerDuty,
            Self::Datadog { .. } => ChannelType::Datadog,
            Self::Jira { .. } => ChannelType::Jira,
            Self::Webhook { .. } => ChannelType::Webhook,
        }
    }
}

/// A channel reference on a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub config: ChannelConfig,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Severities this channel accepts; `None` accepts all
    pub severity_filter: Option<Vec<Severity>>,
}

impl NotificationChannel {
    /// Enabled channel accepting every severity
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            enabled: true,
            severity_filter: None,
        }
    }

    /// Whether an alert of `severity` should go out on this channel
    pub fn accepts(&self, severity: Severity) -> bool {
        self.enabled
            && self
                .severity_filter
                .as_ref()
                .map_or(true, |allowed| allowed.contains(&severity))
    }
}

/// An alert rule definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique identifier
    pub id: Uuid,

    /// Owning organization
    pub org_id: String,

    /// Human-readable name
    pub name: String,

    /// Description of what this rule monitors
    pub description: Option<String>,

    /// Type-specific condition
    pub config: RuleConfig,

    /// Notification channels
    #[serde(default)]
    pub channels: Vec<NotificationChannel>,

    /// Whether the rule is enabled
    pub enabled: bool,

    // Rate limiting
    /// Minimum minutes between alerts for this rule
    pub cooldown_minutes: Option<u32>,
    /// Maximum alerts created in any trailing hour
    pub max_alerts_per_hour: Option<u32>,

    // Scheduling
    /// Hours of day (UTC) the rule is evaluated
    pub active_hours: Option<ActiveHours>,
    /// Days of week the rule is evaluated, 0 = Sunday .. 6 = Saturday
    pub active_days: Option<Vec<u8>>,

    // Metadata
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

impl AlertRule {
    /// Rule type, derived from the config variant
    pub fn rule_type(&self) -> AlertType {
        self.config.alert_type()
    }

    /// Minimal enabled rule with no channels or schedule
    pub fn new(org_id: impl Into<String>, name: impl Into<String>, config: RuleConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            org_id: org_id.into(),
            name: name.into(),
            description: None,
            config,
            channels: vec![],
            enabled: true,
            cooldown_minutes: None,
            max_alerts_per_hour: None,
            active_hours: None,
            active_days: None,
            created_at: now,
            updated_at: now,
            created_by: None,
        }
    }
}
