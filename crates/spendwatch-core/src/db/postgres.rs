//! PostgreSQL storage for rules, usage, budgets and alerts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::warn;
use uuid::Uuid;

use super::{AlertStore, RuleStore, UsageStore};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::models::{
    ActiveHours, Alert, AlertAction, AlertActionKind, AlertFilters, AlertRule, AlertStatus,
    AlertType, AnomalyMetric, Budget, NotificationChannel, NotificationRecord, RequestLog,
    ResolutionType, RuleConfig, Severity, UsageMetric, UsageQuery,
};

/// PostgreSQL connection pool
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Create a new PostgreSQL connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Implements every storage trait against PostgreSQL
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: &PostgresPool) -> Self {
        Self {
            pool: pool.pool.clone(),
        }
    }
}

/// `WHERE org_id = $ AND timestamp BETWEEN $ AND $` plus filters
fn usage_where<'a>(qb: &mut QueryBuilder<'a, Postgres>, query: &'a UsageQuery) {
    qb.push(" WHERE org_id = ")
        .push_bind(query.org_id.as_str())
        .push(" AND timestamp >= ")
        .push_bind(query.start)
        .push(" AND timestamp <= ")
        .push_bind(query.end);
    push_filters(qb, &query.filters);
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &AlertFilters) {
    for (column, values) in [
        ("provider", &filters.providers),
        ("model", &filters.models),
        ("cost_center_id", &filters.cost_centers),
        ("team_id", &filters.teams),
        ("project_id", &filters.projects),
        ("endpoint", &filters.endpoints),
    ] {
        if !values.is_empty() {
            qb.push(format!(" AND {column} = ANY("))
                .push_bind(values.clone())
                .push(")");
        }
    }
}

#[async_trait]
impl RuleStore for PgStore {
    async fn list_enabled_rules(&self, org_id: &str) -> Result<Vec<AlertRule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, name, description, config, channels, enabled,
                   cooldown_minutes, max_alerts_per_hour, active_hours, active_days,
                   created_at, updated_at, created_by
            FROM alert_rules
            WHERE org_id = $1 AND enabled
            ORDER BY created_at
            "#,
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;

        // A malformed rule must not take down the rest of the organization
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let id = row.id;
                match AlertRule::try_from(row) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        warn!(rule_id = %id, error = %e, "Skipping rule with invalid config");
                        None
                    }
                }
            })
            .collect())
    }

    async fn get_rule(&self, rule_id: Uuid) -> Result<Option<AlertRule>> {
        let row: Option<RuleRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, name, description, config, channels, enabled,
                   cooldown_minutes, max_alerts_per_hour, active_hours, active_days,
                   created_at, updated_at, created_by
            FROM alert_rules WHERE id = $1
            "#,
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AlertRule::try_from).transpose()
    }
}

#[async_trait]
impl UsageStore for PgStore {
    async fn sum_cost(&self, query: &UsageQuery) -> Result<f64> {
        let mut qb = QueryBuilder::new("SELECT COALESCE(SUM(cost), 0)::float8 FROM usage_records");
        usage_where(&mut qb, query);
        Ok(qb.build_query_scalar().fetch_one(&self.pool).await?)
    }

    async fn cost_by_model(&self, query: &UsageQuery) -> Result<Vec<(String, f64)>> {
        let mut qb = QueryBuilder::new(
            "SELECT COALESCE(model, 'unknown') AS model, SUM(cost)::float8 AS cost FROM usage_records",
        );
        usage_where(&mut qb, query);
        qb.push(" GROUP BY 1");
        Ok(qb.build_query_as().fetch_all(&self.pool).await?)
    }

    async fn daily_costs(&self, query: &UsageQuery) -> Result<Vec<f64>> {
        let mut qb = QueryBuilder::new("SELECT SUM(cost)::float8 FROM usage_records");
        usage_where(&mut qb, query);
        qb.push(" GROUP BY date_trunc('day', timestamp AT TIME ZONE 'UTC') ORDER BY date_trunc('day', timestamp AT TIME ZONE 'UTC')");
        Ok(qb.build_query_scalar().fetch_all(&self.pool).await?)
    }

    async fn period_costs(
        &self,
        org_id: &str,
        metric: AnomalyMetric,
        since: DateTime<Utc>,
        filters: &AlertFilters,
    ) -> Result<Vec<f64>> {
        let (select, tail) = match metric {
            AnomalyMetric::RequestCost => ("SELECT cost FROM usage_records", " ORDER BY timestamp"),
            AnomalyMetric::HourlyCost => (
                "SELECT SUM(cost)::float8 FROM usage_records",
                " GROUP BY date_trunc('hour', timestamp) ORDER BY date_trunc('hour', timestamp)",
            ),
            AnomalyMetric::DailyCost => (
                "SELECT SUM(cost)::float8 FROM usage_records",
                " GROUP BY date_trunc('day', timestamp AT TIME ZONE 'UTC') ORDER BY date_trunc('day', timestamp AT TIME ZONE 'UTC')",
            ),
        };

        let mut qb = QueryBuilder::new(select);
        qb.push(" WHERE org_id = ")
            .push_bind(org_id)
            .push(" AND timestamp >= ")
            .push_bind(since);
        push_filters(&mut qb, filters);
        qb.push(tail);
        Ok(qb.build_query_scalar().fetch_all(&self.pool).await?)
    }

    async fn request_logs(&self, query: &UsageQuery) -> Result<Vec<RequestLog>> {
        let mut qb = QueryBuilder::new(
            "SELECT provider, model, status, error_code, input_tokens, output_tokens, timestamp FROM usage_records",
        );
        usage_where(&mut qb, query);
        qb.push(" ORDER BY timestamp");
        let rows: Vec<RequestLogRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(RequestLog::from).collect())
    }

    async fn seasonal_values(
        &self,
        org_id: &str,
        window_end: DateTime<Utc>,
        window: chrono::Duration,
        weeks_back: u32,
        filters: &AlertFilters,
    ) -> Result<Vec<f64>> {
        let mut qb = QueryBuilder::new(
            "SELECT SUM(cost)::float8 FROM generate_series(1, ",
        );
        qb.push_bind(weeks_back as i32)
            .push(") AS w(k) JOIN usage_records ON org_id = ")
            .push_bind(org_id)
            .push(" AND timestamp >= ")
            .push_bind(window_end)
            .push(" - make_interval(weeks => w.k) - make_interval(secs => ")
            .push_bind(window.num_seconds() as f64)
            .push(") AND timestamp <= ")
            .push_bind(window_end)
            .push(" - make_interval(weeks => w.k)");
        push_filters(&mut qb, filters);
        qb.push(" GROUP BY w.k ORDER BY w.k");
        Ok(qb.build_query_scalar().fetch_all(&self.pool).await?)
    }

    async fn usage_baseline(&self, org_id: &str, metric: UsageMetric) -> Result<Option<f64>> {
        Ok(sqlx::query_scalar(
            "SELECT value FROM usage_baselines WHERE org_id = $1 AND metric = $2",
        )
        .bind(org_id)
        .bind(metric.as_str())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_budget(&self, budget_id: Uuid) -> Result<Option<Budget>> {
        let row: Option<BudgetRow> = sqlx::query_as(
            r#"
            SELECT id, org_id, name, amount, period_start, period_end,
                   cost_center_id, team_id, project_id
            FROM budgets WHERE id = $1
            "#,
        )
        .bind(budget_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Budget::from))
    }
}

const ALERT_COLUMNS: &str = r#"
    id, org_id, rule_id, type, severity, status, title, description,
    current_value, threshold_value, context, triggered_at,
    acknowledged_at, acknowledged_by, acknowledgment_note,
    resolved_at, resolved_by, resolution_type, resolution_note,
    snoozed_until, snoozed_by, notifications_sent, created_at
"#;

#[async_trait]
impl AlertStore for PgStore {
    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, org_id, rule_id, type, severity, status, title, description,
                current_value, threshold_value, context, triggered_at,
                notifications_sent, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(alert.id)
        .bind(&alert.org_id)
        .bind(alert.rule_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.status.as_str())
        .bind(&alert.title)
        .bind(&alert.description)
        .bind(alert.current_value)
        .bind(alert.threshold_value)
        .bind(&alert.context)
        .bind(alert.triggered_at)
        .bind(Json(&alert.notifications_sent))
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>> {
        let row: Option<AlertRow> =
            sqlx::query_as(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1"))
                .bind(alert_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn update_alert(&self, alert: &Alert, expected: &[AlertStatus]) -> Result<bool> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE alerts SET
                status = $2,
                acknowledged_at = $3, acknowledged_by = $4, acknowledgment_note = $5,
                resolved_at = $6, resolved_by = $7, resolution_type = $8, resolution_note = $9,
                snoozed_until = $10, snoozed_by = $11,
                notifications_sent = $12
            WHERE id = $1 AND status = ANY($13)
            "#,
        )
        .bind(alert.id)
        .bind(alert.status.as_str())
        .bind(alert.acknowledged_at)
        .bind(&alert.acknowledged_by)
        .bind(&alert.acknowledgment_note)
        .bind(alert.resolved_at)
        .bind(&alert.resolved_by)
        .bind(alert.resolution_type.map(|r| r.as_str()))
        .bind(&alert.resolution_note)
        .bind(alert.snoozed_until)
        .bind(&alert.snoozed_by)
        .bind(Json(&alert.notifications_sent))
        .bind(&expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_for_rule_since(&self, rule_id: Uuid, since: DateTime<Utc>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM alerts WHERE rule_id = $1 AND triggered_at >= $2",
        )
        .bind(rule_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn list_active_for_rule(&self, rule_id: Uuid, limit: usize) -> Result<Vec<Alert>> {
        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE rule_id = $1 AND status = 'active' ORDER BY triggered_at DESC LIMIT $2"
        ))
        .bind(rule_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn list_open_since(&self, org_id: &str, since: DateTime<Utc>) -> Result<Vec<Alert>> {
        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE org_id = $1 AND status IN ('active', 'acknowledged') AND triggered_at >= $2 ORDER BY triggered_at"
        ))
        .bind(org_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn list_expired_snoozed(&self, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let rows: Vec<AlertRow> = sqlx::query_as(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE status = 'snoozed' AND snoozed_until <= $1 ORDER BY snoozed_until"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }

    async fn set_notifications(
        &self,
        alert_id: Uuid,
        records: &[NotificationRecord],
    ) -> Result<()> {
        sqlx::query("UPDATE alerts SET notifications_sent = $2 WHERE id = $1")
            .bind(alert_id)
            .bind(Json(records))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_action(&self, action: &AlertAction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_actions (id, alert_id, action, user_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(action.id)
        .bind(action.alert_id)
        .bind(action.action.as_str())
        .bind(&action.user_id)
        .bind(&action.details)
        .bind(action.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_actions(&self, alert_id: Uuid) -> Result<Vec<AlertAction>> {
        let rows: Vec<ActionRow> = sqlx::query_as(
            r#"
            SELECT id, alert_id, action, user_id, details, created_at
            FROM alert_actions WHERE alert_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(alert_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AlertAction::try_from).collect()
    }
}

// Row types

#[derive(FromRow)]
struct RuleRow {
    id: Uuid,
    org_id: String,
    name: String,
    description: Option<String>,
    config: serde_json::Value,
    channels: serde_json::Value,
    enabled: bool,
    cooldown_minutes: Option<i32>,
    max_alerts_per_hour: Option<i32>,
    active_hours: Option<Json<ActiveHours>>,
    active_days: Option<Vec<i16>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    created_by: Option<String>,
}

impl TryFrom<RuleRow> for AlertRule {
    type Error = Error;

    fn try_from(row: RuleRow) -> Result<Self> {
        let config: RuleConfig = serde_json::from_value(row.config)?;
        let channels: Vec<NotificationChannel> = serde_json::from_value(row.channels)?;

        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            name: row.name,
            description: row.description,
            config,
            channels,
            enabled: row.enabled,
            cooldown_minutes: row.cooldown_minutes.and_then(|m| u32::try_from(m).ok()),
            max_alerts_per_hour: row.max_alerts_per_hour.and_then(|m| u32::try_from(m).ok()),
            active_hours: row.active_hours.map(|h| h.0),
            active_days: row
                .active_days
                .map(|days| days.into_iter().filter_map(|d| u8::try_from(d).ok()).collect()),
            created_at: row.created_at,
            updated_at: row.updated_at,
            created_by: row.created_by,
        })
    }
}

#[derive(FromRow)]
struct RequestLogRow {
    provider: String,
    model: Option<String>,
    status: Option<String>,
    error_code: Option<String>,
    input_tokens: i64,
    output_tokens: i64,
    timestamp: DateTime<Utc>,
}

impl From<RequestLogRow> for RequestLog {
    fn from(row: RequestLogRow) -> Self {
        Self {
            provider: row.provider,
            model: row.model,
            status: row.status,
            error_code: row.error_code,
            input_tokens: row.input_tokens,
            output_tokens: row.output_tokens,
            timestamp: row.timestamp,
        }
    }
}

#[derive(FromRow)]
struct BudgetRow {
    id: Uuid,
    org_id: String,
    name: String,
    amount: f64,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    cost_center_id: Option<String>,
    team_id: Option<String>,
    project_id: Option<String>,
}

impl From<BudgetRow> for Budget {
    fn from(row: BudgetRow) -> Self {
        Self {
            id: row.id,
            org_id: row.org_id,
            name: row.name,
            amount: row.amount,
            period_start: row.period_start,
            period_end: row.period_end,
            cost_center_id: row.cost_center_id,
            team_id: row.team_id,
            project_id: row.project_id,
        }
    }
}

#[derive(FromRow)]
struct AlertRow {
    id: Uuid,
    org_id: String,
    rule_id: Uuid,
    #[sqlx(rename = "type")]
    alert_type: String,
    severity: String,
    status: String,
    title: String,
    description: String,
    current_value: f64,
    threshold_value: f64,
    context: serde_json::Value,
    triggered_at: DateTime<Utc>,
    acknowledged_at: Option<DateTime<Utc>>,
    acknowledged_by: Option<String>,
    acknowledgment_note: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<String>,
    resolution_type: Option<String>,
    resolution_note: Option<String>,
    snoozed_until: Option<DateTime<Utc>>,
    snoozed_by: Option<String>,
    notifications_sent: Json<Vec<NotificationRecord>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = Error;

    fn try_from(row: AlertRow) -> Result<Self> {
        let alert_type = AlertType::parse(&row.alert_type)
            .ok_or_else(|| Error::internal(format!("unknown alert type '{}'", row.alert_type)))?;

        Ok(Self {
            id: row.id,
            org_id: row.org_id,
            rule_id: row.rule_id,
            alert_type,
            severity: Severity::parse_or_default(&row.severity),
            status: AlertStatus::parse_or_default(&row.status),
            title: row.title,
            description: row.description,
            current_value: row.current_value,
            threshold_value: row.threshold_value,
            context: row.context,
            triggered_at: row.triggered_at,
            acknowledged_at: row.acknowledged_at,
            acknowledged_by: row.acknowledged_by,
            acknowledgment_note: row.acknowledgment_note,
            resolved_at: row.resolved_at,
            resolved_by: row.resolved_by,
            resolution_type: row.resolution_type.as_deref().and_then(ResolutionType::parse),
            resolution_note: row.resolution_note,
            snoozed_until: row.snoozed_until,
            snoozed_by: row.snoozed_by,
            notifications_sent: row.notifications_sent.0,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct ActionRow {
    id: Uuid,
    alert_id: Uuid,
    action: String,
    user_id: Option<String>,
    details: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActionRow> for AlertAction {
    type Error = Error;

    fn try_from(row: ActionRow) -> Result<Self> {
        let action = AlertActionKind::parse(&row.action)
            .ok_or_else(|| Error::internal(format!("unknown alert action '{}'", row.action)))?;

        Ok(Self {
            id: row.id,
            alert_id: row.alert_id,
            action,
            user_id: row.user_id,
            details: row.details,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule_row(config: serde_json::Value) -> RuleRow {
        RuleRow {
            id: Uuid::new_v4(),
            org_id: "org_1".to_string(),
            name: "Daily spend".to_string(),
            description: None,
            config,
            channels: json!([
                {"config": {"type": "slack", "webhook_url": "https://example.invalid/slack"}},
                {
                    "config": {"type": "pagerduty", "integration_key": "rk"},
                    "enabled": false,
                    "severity_filter": ["critical"]
                }
            ]),
            enabled: true,
            cooldown_minutes: Some(30),
            max_alerts_per_hour: Some(-1),
            active_hours: Some(Json(ActiveHours { start: 22, end: 6 })),
            active_days: Some(vec![1, 5, 300]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: Some("user_1".to_string()),
        }
    }

    #[test]
    fn test_rule_row_conversion() {
        let row = rule_row(json!({
            "type": "spend_threshold",
            "metric": "daily_cost",
            "operator": "gt",
            "threshold": 100.0,
            "time_window": "24h"
        }));

        let rule = AlertRule::try_from(row).unwrap();
        assert_eq!(rule.rule_type(), AlertType::SpendThreshold);
        assert_eq!(rule.channels.len(), 2);
        assert!(!rule.channels[1].enabled);
        assert_eq!(rule.cooldown_minutes, Some(30));
        // Negative caps and out-of-range days are dropped
        assert_eq!(rule.max_alerts_per_hour, None);
        assert_eq!(rule.active_days, Some(vec![1, 5]));
        assert_eq!(rule.active_hours, Some(ActiveHours { start: 22, end: 6 }));
    }

    #[test]
    fn test_rule_row_with_unknown_type_is_rejected() {
        let row = rule_row(json!({"type": "latency_p99", "threshold": 1.0}));
        assert!(matches!(AlertRule::try_from(row), Err(Error::Serialization(_))));
    }

    fn alert_row(alert_type: &str, status: &str) -> AlertRow {
        AlertRow {
            id: Uuid::new_v4(),
            org_id: "org_1".to_string(),
            rule_id: Uuid::new_v4(),
            alert_type: alert_type.to_string(),
            severity: "critical".to_string(),
            status: status.to_string(),
            title: "Budget threshold reached".to_string(),
            description: "Budget at 95%".to_string(),
            current_value: 95.0,
            threshold_value: 90.0,
            context: json!({"budgetName": "Q1"}),
            triggered_at: Utc::now(),
            acknowledged_at: None,
            acknowledged_by: None,
            acknowledgment_note: None,
            resolved_at: Some(Utc::now()),
            resolved_by: Some("system".to_string()),
            resolution_type: Some("auto_cleared".to_string()),
            resolution_note: None,
            snoozed_until: None,
            snoozed_by: None,
            notifications_sent: Json(vec![]),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_alert_row_conversion() {
        let alert = Alert::try_from(alert_row("budget_threshold", "resolved")).unwrap();
        assert_eq!(alert.alert_type, AlertType::BudgetThreshold);
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert_eq!(alert.resolution_type, Some(ResolutionType::AutoCleared));
        assert_eq!(alert.context["budgetName"], "Q1");
    }

    #[test]
    fn test_alert_row_unknown_type() {
        assert!(Alert::try_from(alert_row("latency", "active")).is_err());
    }

    #[test]
    fn test_action_row_conversion() {
        let row = ActionRow {
            id: Uuid::new_v4(),
            alert_id: Uuid::new_v4(),
            action: "notification_sent".to_string(),
            user_id: None,
            details: Some("slack:ok".to_string()),
            created_at: Utc::now(),
        };
        let action = AlertAction::try_from(row).unwrap();
        assert_eq!(action.action, AlertActionKind::NotificationSent);
    }
}
