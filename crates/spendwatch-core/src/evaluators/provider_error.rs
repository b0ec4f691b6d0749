//! Provider error rate and count over a window

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::error_rate_severity;
use crate::db::UsageStore;
use crate::error::Result;
use crate::models::{
    AlertFilters, AlertTrigger, AlertType, ErrorCategory, ProviderErrorConfig, RequestLog,
    UsageQuery,
};

/// Recent errors attached to a trigger
pub const RECENT_ERRORS: usize = 5;

/// Error statistics for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderErrorStats {
    pub provider: String,
    pub total: usize,
    pub error_count: usize,
    /// Percentage of requests that errored
    pub error_rate: f64,
    pub breakdown: BTreeMap<ErrorCategory, usize>,
    pub recent: Vec<RecentError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentError {
    #[serde(rename = "type")]
    pub category: ErrorCategory,
    pub timestamp: DateTime<Utc>,
}

/// Per-provider error statistics, counting only configured categories
pub fn provider_stats(logs: Vec<RequestLog>, error_types: &[ErrorCategory]) -> Vec<ProviderErrorStats> {
    let mut by_provider: HashMap<String, Vec<RequestLog>> = HashMap::new();
    for log in logs {
        by_provider.entry(log.provider.clone()).or_default().push(log);
    }

    by_provider
        .into_iter()
        .map(|(provider, logs)| {
            let total = logs.len();
            let mut errors: Vec<(ErrorCategory, DateTime<Utc>)> = logs
                .iter()
                .filter(|l| l.is_error())
                .map(|l| (ErrorCategory::classify(l.error_marker()), l.timestamp))
                .filter(|(category, _)| error_types.is_empty() || error_types.contains(category))
                .collect();
            errors.sort_by(|a, b| b.1.cmp(&a.1));

            let mut breakdown = BTreeMap::new();
            for (category, _) in &errors {
                *breakdown.entry(*category).or_insert(0) += 1;
            }

            ProviderErrorStats {
                error_rate: errors.len() as f64 / total as f64 * 100.0,
                error_count: errors.len(),
                total,
                breakdown,
                recent: errors
                    .iter()
                    .take(RECENT_ERRORS)
                    .map(|(category, timestamp)| RecentError {
                        category: *category,
                        timestamp: *timestamp,
                    })
                    .collect(),
                provider,
            }
        })
        .collect()
}

/// Fire on the provider with the highest error rate among those over a threshold
pub async fn evaluate(
    usage: &dyn UsageStore,
    rule_id: Uuid,
    org_id: &str,
    config: &ProviderErrorConfig,
    now: DateTime<Utc>,
) -> Result<Option<AlertTrigger>> {
    let filters = config
        .provider
        .as_ref()
        .map(AlertFilters::provider)
        .unwrap_or_default();
    let query = UsageQuery::new(org_id, config.time_window.start(now), now).with_filters(filters);
    let logs = usage.request_logs(&query).await?;
    if logs.is_empty() {
        return Ok(None);
    }

    let count_threshold = config.error_count_threshold.filter(|c| *c > 0);
    let worst = provider_stats(logs, &config.error_types)
        .into_iter()
        .filter(|s| {
            s.error_rate > config.error_rate_threshold
                || count_threshold.is_some_and(|c| s.error_count as u64 > c)
        })
        .max_by(|a, b| {
            a.error_rate
                .total_cmp(&b.error_rate)
                .then_with(|| b.provider.cmp(&a.provider))
        });

    let Some(stats) = worst else {
        return Ok(None);
    };

    let breakdown: BTreeMap<&str, usize> = stats
        .breakdown
        .iter()
        .map(|(category, count)| (category.as_str(), *count))
        .collect();

    Ok(Some(AlertTrigger {
        rule_id,
        alert_type: AlertType::ProviderError,
        severity: error_rate_severity(stats.error_rate),
        current_value: stats.error_rate,
        threshold_value: config.error_rate_threshold,
        message: format!(
            "{} error rate is {:.1}% ({}/{} requests)",
            stats.provider, stats.error_rate, stats.error_count, stats.total
        ),
        context: json!({
            "provider": stats.provider,
            "errorRate": stats.error_rate,
            "errorCount": stats.error_count,
            "totalRequests": stats.total,
            "errorBreakdown": breakdown,
            "timeWindow": config.time_window.as_str(),
            "recentErrors": stats.recent,
        }),
        triggered_at: now,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Severity, TimeWindow, UsageRecord};
    use chrono::Duration;

    fn record(provider: &str, status: &str, error_code: Option<&str>, now: DateTime<Utc>) -> UsageRecord {
        let mut r = UsageRecord::new("org_1", provider, "m", 0.01, now - Duration::minutes(5));
        r.status = Some(status.to_string());
        r.error_code = error_code.map(String::from);
        r
    }

    fn config(rate: f64) -> ProviderErrorConfig {
        ProviderErrorConfig {
            provider: None,
            error_rate_threshold: rate,
            error_count_threshold: None,
            time_window: TimeWindow::OneHour,
            error_types: vec![],
        }
    }

    fn seed(store: &MemoryStore, now: DateTime<Utc>) {
        // openai: 3/10 errors, anthropic: 1/4 errors
        let mut records = vec![];
        for _ in 0..7 {
            records.push(record("openai", "success", None, now));
        }
        records.push(record("openai", "429", None, now));
        records.push(record("openai", "error", Some("rate_limit_exceeded"), now));
        records.push(record("openai", "503", None, now));
        for _ in 0..3 {
            records.push(record("anthropic", "200", None, now));
        }
        records.push(record("anthropic", "error", Some("timeout"), now));
        store.add_usage(records);
    }

    #[tokio::test]
    async fn test_worst_provider_wins() {
        let now = Utc::now();
        let store = MemoryStore::new();
        seed(&store, now);

        let trigger = evaluate(&store, Uuid::new_v4(), "org_1", &config(20.0), now)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(trigger.context["provider"], "openai");
        assert!((trigger.current_value - 30.0).abs() < 1e-9);
        assert_eq!(trigger.severity, Severity::Critical);
        assert_eq!(trigger.context["errorBreakdown"]["rate_limit"], 2);
        assert_eq!(trigger.context["errorBreakdown"]["server_error"], 1);
        assert_eq!(trigger.context["recentErrors"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_error_type_filter_and_count_threshold() {
        let now = Utc::now();
        let store = MemoryStore::new();
        seed(&store, now);

        let mut cfg = config(50.0);
        cfg.error_types = vec![ErrorCategory::Timeout];
        assert!(evaluate(&store, Uuid::new_v4(), "org_1", &cfg, now)
            .await
            .unwrap()
            .is_none());

        cfg.error_count_threshold = Some(0);
        assert!(evaluate(&store, Uuid::new_v4(), "org_1", &cfg, now)
            .await
            .unwrap()
            .is_none());

        let mut cfg = config(50.0);
        cfg.error_count_threshold = Some(2);
        let trigger = evaluate(&store, Uuid::new_v4(), "org_1", &cfg, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trigger.context["provider"], "openai");
        assert_eq!(trigger.context["errorCount"], 3);
    }

    #[tokio::test]
    async fn test_provider_scope() {
        let now = Utc::now();
        let store = MemoryStore::new();
        seed(&store, now);

        let mut cfg = config(20.0);
        cfg.provider = Some("anthropic".to_string());
        let trigger = evaluate(&store, Uuid::new_v4(), "org_1", &cfg, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trigger.context["provider"], "anthropic");
        assert_eq!(trigger.severity, Severity::Critical);
        assert_eq!(trigger.context["errorBreakdown"]["timeout"], 1);
    }
}
