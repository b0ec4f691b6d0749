//! Usage and budget data read by the evaluators

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rule::AlertFilters;

/// Filtered, time-bounded usage query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageQuery {
    pub org_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub filters: AlertFilters,
}

impl UsageQuery {
    /// Query over `[start, end]` with no dimension filters
    pub fn new(org_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            org_id: org_id.into(),
            start,
            end,
            filters: AlertFilters::default(),
        }
    }

    /// Attach dimension filters
    #[must_use]
    pub fn with_filters(mut self, filters: AlertFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// A usage row written by ingestion, one per provider request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub org_id: String,
    pub provider: String,
    pub model: Option<String>,
    pub cost: f64,
    pub cost_center_id: Option<String>,
    pub team_id: Option<String>,
    pub project_id: Option<String>,
    pub endpoint: Option<String>,
    pub status: Option<String>,
    pub error_code: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub timestamp: DateTime<Utc>,
}

impl UsageRecord {
    /// Successful request with no dimensions beyond provider and model
    pub fn new(
        org_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        cost: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            provider: provider.into(),
            model: Some(model.into()),
            cost,
            cost_center_id: None,
            team_id: None,
            project_id: None,
            endpoint: None,
            status: Some("success".to_string()),
            error_code: None,
            input_tokens: 0,
            output_tokens: 0,
            timestamp,
        }
    }

    /// Whether the row passes every non-empty filter dimension
    pub fn matches(&self, filters: &AlertFilters) -> bool {
        fn allowed(list: &[String], value: Option<&str>) -> bool {
            list.is_empty() || value.is_some_and(|v| list.iter().any(|item| item == v))
        }

        allowed(&filters.providers, Some(&self.provider))
            && allowed(&filters.models, self.model.as_deref())
            && allowed(&filters.cost_centers, self.cost_center_id.as_deref())
            && allowed(&filters.teams, self.team_id.as_deref())
            && allowed(&filters.projects, self.project_id.as_deref())
            && allowed(&filters.endpoints, self.endpoint.as_deref())
    }

    /// Request-level view used by error and volume evaluators
    pub fn to_request_log(&self) -> RequestLog {
        RequestLog {
            provider: self.provider.clone(),
            model: self.model.clone(),
            status: self.status.clone(),
            error_code: self.error_code.clone(),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            timestamp: self.timestamp,
        }
    }
}

/// One provider request as recorded by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    pub provider: String,
    pub model: Option<String>,
    /// "success", "error", or an HTTP status code as text
    pub status: Option<String>,
    pub error_code: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub timestamp: DateTime<Utc>,
}

impl RequestLog {
    /// Whether the request failed, by status marker, HTTP status, or error code
    pub fn is_error(&self) -> bool {
        if self.error_code.as_deref().is_some_and(|c| !c.is_empty()) {
            return true;
        }
        match self.status.as_deref() {
            Some("error") => true,
            Some(s) => s.parse::<u16>().is_ok_and(|code| code >= 400),
            None => false,
        }
    }

    /// Code used for error classification, preferring the explicit error code
    pub fn error_marker(&self) -> Option<&str> {
        self.error_code
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.status.as_deref())
    }

    /// Input plus output tokens
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

/// A spending budget over a fixed period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: Uuid,
    pub org_id: String,
    pub name: String,
    pub amount: f64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub cost_center_id: Option<String>,
    pub team_id: Option<String>,
    pub project_id: Option<String>,
}

impl Budget {
    /// Usage filters matching the budget's scope
    pub fn scope_filters(&self) -> AlertFilters {
        AlertFilters {
            cost_centers: self.cost_center_id.iter().cloned().collect(),
            teams: self.team_id.iter().cloned().collect(),
            projects: self.project_id.iter().cloned().collect(),
            ..AlertFilters::default()
        }
    }
}

/// A model's share of spend in a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostContributor {
    pub name: String,
    pub cost: f64,
    /// Share of total, one decimal place
    pub percentage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(status: Option<&str>, error_code: Option<&str>) -> RequestLog {
        RequestLog {
            provider: "openai".to_string(),
            model: Some("gpt-4o".to_string()),
            status: status.map(String::from),
            error_code: error_code.map(String::from),
            input_tokens: 10,
            output_tokens: 5,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_error_detection() {
        assert!(!log(Some("success"), None).is_error());
        assert!(!log(Some("200"), None).is_error());
        assert!(log(Some("error"), None).is_error());
        assert!(log(Some("503"), None).is_error());
        assert!(log(Some("success"), Some("rate_limit")).is_error());
        assert!(!log(None, Some("")).is_error());
    }

    #[test]
    fn test_record_filter_matching() {
        let mut record = UsageRecord::new("org_1", "openai", "gpt-4o", 1.5, Utc::now());
        record.team_id = Some("search".to_string());

        assert!(record.matches(&AlertFilters::default()));
        assert!(record.matches(&AlertFilters::provider("openai")));
        assert!(!record.matches(&AlertFilters::provider("anthropic")));

        let by_team = AlertFilters {
            teams: vec!["search".to_string(), "ads".to_string()],
            ..AlertFilters::default()
        };
        assert!(record.matches(&by_team));

        let by_project = AlertFilters {
            projects: vec!["p1".to_string()],
            ..AlertFilters::default()
        };
        assert!(!record.matches(&by_project));
    }

    #[test]
    fn test_error_marker_prefers_code() {
        assert_eq!(log(Some("429"), Some("timeout")).error_marker(), Some("timeout"));
        assert_eq!(log(Some("429"), None).error_marker(), Some("429"));
    }
}
