//! Request or token volume spikes

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use super::{capitalize, top_n};
use crate::db::UsageStore;
use crate::error::Result;
use crate::models::{
    AlertTrigger, AlertType, RequestLog, Severity, UsageMetric, UsageQuery, UsageSpikeConfig,
};

/// Rate of `metric` over a window of `window_minutes`
pub fn volume_rate(metric: UsageMetric, logs: &[RequestLog], window_minutes: i64) -> f64 {
    let minutes = window_minutes.max(1) as f64;
    match metric {
        UsageMetric::RequestsPerMinute => logs.len() as f64 / minutes,
        UsageMetric::TokensPerMinute => {
            logs.iter().map(|l| l.total_tokens()).sum::<i64>() as f64 / minutes
        }
        UsageMetric::RequestsPerHour => logs.len() as f64 / minutes * 60.0,
    }
}

pub async fn evaluate(
    usage: &dyn UsageStore,
    rule_id: Uuid,
    org_id: &str,
    config: &UsageSpikeConfig,
    now: DateTime<Utc>,
) -> Result<Option<AlertTrigger>> {
    let query = UsageQuery::new(org_id, config.time_window.start(now), now)
        .with_filters(config.filters.clone());
    let logs = usage.request_logs(&query).await?;
    if logs.is_empty() {
        return Ok(None);
    }

    let current = volume_rate(config.metric, &logs, config.time_window.minutes());
    let label = capitalize(config.metric.label());

    if current > config.threshold {
        let mut models: HashMap<String, usize> = HashMap::new();
        let mut providers: HashMap<String, usize> = HashMap::new();
        for log in &logs {
            let model = log.model.clone().unwrap_or_else(|| "unknown".to_string());
            *models.entry(model).or_default() += 1;
            *providers.entry(log.provider.clone()).or_default() += 1;
        }

        let severity = if current > config.threshold * 2.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };

        return Ok(Some(AlertTrigger {
            rule_id,
            alert_type: AlertType::UsageSpike,
            severity,
            current_value: current,
            threshold_value: config.threshold,
            message: format!(
                "{label} spiked to {current:.0} (threshold: {})",
                config.threshold
            ),
            context: json!({
                "metric": config.metric.as_str(),
                "timeWindow": config.time_window.as_str(),
                "requestCount": logs.len(),
                "topModels": top_n(models, 3),
                "topProviders": top_n(providers, 3),
            }),
            triggered_at: now,
        }));
    }

    let Some(multiplier) = config.spike_multiplier.filter(|m| *m > 0.0) else {
        return Ok(None);
    };
    let Some(baseline) = usage
        .usage_baseline(org_id, config.metric)
        .await?
        .filter(|b| *b > 0.0)
    else {
        debug!(rule_id = %rule_id, metric = config.metric.as_str(), "No usage baseline");
        return Ok(None);
    };

    let spike_threshold = baseline * multiplier;
    if current <= spike_threshold {
        return Ok(None);
    }

    Ok(Some(AlertTrigger {
        rule_id,
        alert_type: AlertType::UsageSpike,
        severity: Severity::Warning,
        current_value: current,
        threshold_value: spike_threshold,
        message: format!("{label} is {:.1}x above normal", current / baseline),
        context: json!({
            "metric": config.metric.as_str(),
            "baseline": baseline,
            "multiplier": current / baseline,
            "timeWindow": config.time_window.as_str(),
        }),
        triggered_at: now,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{AlertFilters, TimeWindow, UsageRecord};
    use chrono::Duration;
    use rstest::rstest;

    fn config(metric: UsageMetric, threshold: f64, multiplier: Option<f64>) -> UsageSpikeConfig {
        UsageSpikeConfig {
            metric,
            threshold,
            spike_multiplier: multiplier,
            time_window: TimeWindow::FiveMinutes,
            filters: AlertFilters::default(),
        }
    }

    fn seed(store: &MemoryStore, now: DateTime<Utc>, requests: usize) {
        store.add_usage((0..requests).map(|i| {
            let model = if i % 3 == 0 { "gpt-4o-mini" } else { "gpt-4o" };
            let mut r = UsageRecord::new("org_1", "openai", model, 0.001, now - Duration::seconds(30));
            r.input_tokens = 100;
            r.output_tokens = 50;
            r
        }));
    }

    #[rstest]
    #[case(UsageMetric::RequestsPerMinute, 20.0)]
    #[case(UsageMetric::TokensPerMinute, 3000.0)]
    #[case(UsageMetric::RequestsPerHour, 1200.0)]
    fn test_volume_rate(#[case] metric: UsageMetric, #[case] expected: f64) {
        let now = Utc::now();
        let logs: Vec<RequestLog> = (0..100)
            .map(|_| {
                let mut r = UsageRecord::new("org_1", "openai", "gpt-4o", 0.0, now);
                r.input_tokens = 100;
                r.output_tokens = 50;
                r.to_request_log()
            })
            .collect();
        assert!((volume_rate(metric, &logs, 5) - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_absolute_threshold() {
        let now = Utc::now();
        let store = MemoryStore::new();
        seed(&store, now, 150);

        // 150 requests over 5 minutes = 30/min
        let trigger = evaluate(
            &store,
            Uuid::new_v4(),
            "org_1",
            &config(UsageMetric::RequestsPerMinute, 10.0, None),
            now,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(trigger.severity, Severity::Critical);
        assert!((trigger.current_value - 30.0).abs() < 1e-9);
        assert_eq!(trigger.context["topModels"][0]["name"], "gpt-4o");
        assert_eq!(trigger.context["topModels"][0]["count"], 100);
        assert_eq!(trigger.context["topProviders"][0]["name"], "openai");

        let trigger = evaluate(
            &store,
            Uuid::new_v4(),
            "org_1",
            &config(UsageMetric::RequestsPerMinute, 20.0, None),
            now,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(trigger.severity, Severity::Warning);
    }

    #[tokio::test]
    async fn test_baseline_multiplier() {
        let now = Utc::now();
        let store = MemoryStore::new();
        seed(&store, now, 50);

        // 10/min, under the absolute threshold
        let cfg = config(UsageMetric::RequestsPerMinute, 100.0, Some(3.0));
        assert!(evaluate(&store, Uuid::new_v4(), "org_1", &cfg, now)
            .await
            .unwrap()
            .is_none());

        store.set_usage_baseline("org_1", UsageMetric::RequestsPerMinute, 2.0);
        let trigger = evaluate(&store, Uuid::new_v4(), "org_1", &cfg, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(trigger.severity, Severity::Warning);
        assert!((trigger.threshold_value - 6.0).abs() < 1e-9);
        assert!((trigger.context["multiplier"].as_f64().unwrap() - 5.0).abs() < 1e-9);
    }
}
