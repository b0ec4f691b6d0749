//! Budget utilization compared against a percentage, optionally forecast

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::budget_severity;
use crate::db::UsageStore;
use crate::detection::ForecastEngine;
use crate::error::Result;
use crate::models::{AlertTrigger, AlertType, Budget, BudgetThresholdConfig, Severity, UsageQuery};

pub async fn evaluate(
    usage: &dyn UsageStore,
    forecaster: &ForecastEngine,
    rule_id: Uuid,
    config: &BudgetThresholdConfig,
    now: DateTime<Utc>,
) -> Result<Option<AlertTrigger>> {
    let Some(budget) = usage.get_budget(config.budget_id).await? else {
        warn!(rule_id = %rule_id, budget_id = %config.budget_id, "Budget not found");
        return Ok(None);
    };
    if budget.amount <= 0.0 {
        warn!(rule_id = %rule_id, budget_id = %budget.id, "Budget has no positive amount");
        return Ok(None);
    }

    let query = UsageQuery::new(&budget.org_id, budget.period_start, budget.period_end)
        .with_filters(budget.scope_filters());
    let current = usage.sum_cost(&query).await?;
    let utilization = current / budget.amount * 100.0;
    let days_remaining = days_remaining(&budget, now);

    if utilization >= config.threshold_percent {
        let days_elapsed = ((now - budget.period_start).num_days()).max(1);
        return Ok(Some(AlertTrigger {
            rule_id,
            alert_type: AlertType::BudgetThreshold,
            severity: budget_severity(utilization),
            current_value: utilization,
            threshold_value: config.threshold_percent,
            message: format!(
                "{} has reached {:.1}% utilization (${:.2} of ${:.2})",
                budget.name, utilization, current, budget.amount
            ),
            context: json!({
                "budgetId": budget.id,
                "budgetName": budget.name,
                "budgetAmount": budget.amount,
                "currentSpend": current,
                "remainingBudget": budget.amount - current,
                "daysRemaining": days_remaining,
                "dailyBurnRate": current / days_elapsed as f64,
            }),
            triggered_at: now,
        }));
    }

    if !config.include_forecasted {
        return Ok(None);
    }

    let forecast = forecaster
        .forecast_budget_from_store(usage, &budget, current, now)
        .await?;
    if forecast.projected_utilization < config.threshold_percent {
        return Ok(None);
    }

    let by = forecast
        .estimated_breach_date
        .map_or_else(|| "end of period".to_string(), |d| d.format("%Y-%m-%d").to_string());

    Ok(Some(AlertTrigger {
        rule_id,
        alert_type: AlertType::ForecastExceeded,
        severity: Severity::Warning,
        current_value: utilization,
        threshold_value: config.threshold_percent,
        message: format!(
            "{} is projected to reach {:.1}% by {}",
            budget.name, forecast.projected_utilization, by
        ),
        context: json!({
            "budgetId": budget.id,
            "budgetName": budget.name,
            "budgetAmount": budget.amount,
            "currentSpend": current,
            "currentUtilization": utilization,
            "projectedSpend": forecast.projected_spend,
            "projectedUtilization": forecast.projected_utilization,
            "confidenceInterval": forecast.confidence_interval,
            "estimatedBreachDate": forecast.estimated_breach_date,
            "daysRemaining": days_remaining,
        }),
        triggered_at: now,
    }))
}

fn days_remaining(budget: &Budget, now: DateTime<Utc>) -> i64 {
    let left = budget.period_end - now;
    if left <= Duration::zero() {
        return 0;
    }
    (left.num_seconds() as f64 / 86_400.0).ceil() as i64
}
