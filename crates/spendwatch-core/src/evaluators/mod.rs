//! Rule evaluators
//!
//! Each evaluator turns stored usage into at most one [`AlertTrigger`] for a
//! rule. Evaluators only read; persistence and notification happen in the
//! engine afterwards. Missing data (no budget, empty window) yields `Ok(None)`,
//! while store failures propagate so the engine can count them per rule.

pub mod budget_threshold;
pub mod provider_error;
pub mod spend_threshold;
pub mod usage_spike;

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;

use crate::models::{AlertTrigger, AlertType, Severity};

/// Severity from how far spend overshoots its threshold
pub fn spend_severity(current: f64, threshold: f64) -> Severity {
    if threshold <= 0.0 {
        return if current > 0.0 {
            Severity::Critical
        } else {
            Severity::Info
        };
    }
    let ratio = current / threshold;
    if ratio >= 2.0 {
        Severity::Critical
    } else if ratio >= 1.5 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Severity from budget utilization percent
pub fn budget_severity(utilization: f64) -> Severity {
    if utilization >= 100.0 {
        Severity::Critical
    } else if utilization >= 90.0 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Severity from a provider error rate percent
pub fn error_rate_severity(error_rate: f64) -> Severity {
    if error_rate > 20.0 {
        Severity::Critical
    } else if error_rate > 10.0 {
        Severity::Warning
    } else {
        Severity::Info
    }
}

/// Short alert title for a trigger
pub fn alert_title(trigger: &AlertTrigger) -> String {
    let ctx = &trigger.context;
    match trigger.alert_type {
        AlertType::SpendThreshold => "Spending threshold exceeded".to_string(),
        AlertType::BudgetThreshold => match ctx.get("budgetName").and_then(|v| v.as_str()) {
            Some(name) => format!("Budget {name} at {:.0}%", trigger.current_value),
            None => format!("Budget at {:.0}%", trigger.current_value),
        },
        AlertType::SpendAnomaly => "Unusual spending detected".to_string(),
        AlertType::ForecastExceeded => match ctx.get("budgetName").and_then(|v| v.as_str()) {
            Some(name) => format!("Budget {name} forecast to exceed threshold"),
            None => "Forecast exceeds threshold".to_string(),
        },
        AlertType::ProviderError => format!(
            "{} error rate elevated",
            ctx.get("provider")
                .and_then(|v| v.as_str())
                .unwrap_or("Provider")
        ),
        AlertType::UsageSpike => "Usage spike detected".to_string(),
    }
}

/// Name and count of one group in a breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedCount {
    pub name: String,
    pub count: usize,
}

/// Largest `n` groups by count; ties break by name
pub(crate) fn top_n<K>(counts: HashMap<K, usize>, n: usize) -> Vec<NamedCount>
where
    K: Into<String> + Eq + Hash,
{
    let mut entries: Vec<NamedCount> = counts
        .into_iter()
        .map(|(name, count)| NamedCount {
            name: name.into(),
            count,
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(n);
    entries
}

pub(crate) fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;
    use serde_json::json;
    use uuid::Uuid;

    #[rstest]
    #[case(250.0, 100.0, Severity::Critical)]
    #[case(150.0, 100.0, Severity::Warning)]
    #[case(120.0, 100.0, Severity::Info)]
    #[case(5.0, 0.0, Severity::Critical)]
    fn test_spend_severity(#[case] current: f64, #[case] threshold: f64, #[case] expected: Severity) {
        assert_eq!(spend_severity(current, threshold), expected);
    }

    #[rstest]
    #[case(100.0, Severity::Critical)]
    #[case(92.5, Severity::Warning)]
    #[case(80.0, Severity::Info)]
    fn test_budget_severity(#[case] utilization: f64, #[case] expected: Severity) {
        assert_eq!(budget_severity(utilization), expected);
    }

    #[rstest]
    #[case(25.0, Severity::Critical)]
    #[case(20.0, Severity::Warning)]
    #[case(10.0, Severity::Info)]
    fn test_error_rate_severity(#[case] rate: f64, #[case] expected: Severity) {
        assert_eq!(error_rate_severity(rate), expected);
    }

    #[test]
    fn test_titles() {
        let mut trigger = AlertTrigger {
            rule_id: Uuid::new_v4(),
            alert_type: AlertType::BudgetThreshold,
            severity: Severity::Warning,
            current_value: 91.6,
            threshold_value: 90.0,
            message: String::new(),
            context: json!({ "budgetName": "Platform" }),
            triggered_at: Utc::now(),
        };
        assert_eq!(alert_title(&trigger), "Budget Platform at 92%");

        trigger.alert_type = AlertType::ProviderError;
        trigger.context = json!({ "provider": "openai" });
        assert_eq!(alert_title(&trigger), "openai error rate elevated");
    }

    #[test]
    fn test_top_n_orders_by_count_then_name() {
        let counts = HashMap::from([("b", 2), ("a", 2), ("c", 5), ("d", 1)]);
        let top = top_n(counts, 3);
        let names: Vec<&str> = top.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }
}
