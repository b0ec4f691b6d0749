//! Windowed spend compared against a fixed amount

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use super::{capitalize, spend_severity};
use crate::db::UsageStore;
use crate::error::Result;
use crate::models::{
    AlertTrigger, AlertType, CostContributor, Operator, SpendThresholdConfig, UsageQuery,
};

/// Contributors attached to a spend trigger
pub const TOP_CONTRIBUTORS: usize = 5;

pub async fn evaluate(
    usage: &dyn UsageStore,
    rule_id: Uuid,
    org_id: &str,
    config: &SpendThresholdConfig,
    now: DateTime<Utc>,
) -> Result<Option<AlertTrigger>> {
    let query = UsageQuery::new(org_id, config.time_window.start(now), now)
        .with_filters(config.filters.clone());
    let total = usage.sum_cost(&query).await?;

    if !config.operator.evaluate(total, config.threshold) {
        return Ok(None);
    }

    let contributors = top_contributors(usage.cost_by_model(&query).await?, TOP_CONTRIBUTORS);

    Ok(Some(AlertTrigger {
        rule_id,
        alert_type: AlertType::SpendThreshold,
        severity: spend_severity(total, config.threshold),
        current_value: total,
        threshold_value: config.threshold,
        message: format!(
            "{} of ${:.2} {} ${:.2} threshold",
            capitalize(config.metric.label()),
            total,
            verb(config.operator),
            config.threshold
        ),
        context: json!({
            "metric": config.metric,
            "operator": config.operator,
            "timeWindow": config.time_window.as_str(),
            "topContributors": contributors,
            "filters": config.filters,
        }),
        triggered_at: now,
    }))
}

fn verb(operator: Operator) -> &'static str {
    match operator {
        Operator::Gt | Operator::Gte => "exceeded",
        Operator::Lt | Operator::Lte => "fell below",
        Operator::Eq => "reached",
    }
}

/// Largest cost contributors with their share of the total, one decimal place
pub fn top_contributors(by_model: Vec<(String, f64)>, limit: usize) -> Vec<CostContributor> {
    let total: f64 = by_model.iter().map(|(_, cost)| cost).sum();
    let mut sorted = by_model;
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    sorted
        .into_iter()
        .take(limit)
        .map(|(name, cost)| CostContributor {
            name,
            cost,
            percentage: if total > 0.0 {
                (cost / total * 1000.0).round() / 10.0
            } else {
                0.0
            },
        })
        .collect()
}
