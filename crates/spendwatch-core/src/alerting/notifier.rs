//! Notification delivery for alerts
//!
//! [`HttpNotifier`] formats one channel-specific payload per [`ChannelConfig`]
//! variant and posts it. Transport failures never escape as errors: every
//! send resolves to a [`NotificationResult`].

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::NotificationConfig;
use crate::models::{Alert, AlertType, ChannelConfig, Severity};

/// Header carrying the hex HMAC-SHA256 of a webhook body
pub const SIGNATURE_HEADER: &str = "X-Spendwatch-Signature";

/// Outcome of one channel send
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationResult {
    pub success: bool,
    /// The channel chose not to send (e.g. PagerDuty for a warning)
    pub skipped: bool,
    pub error: Option<String>,
    /// Provider-side id: email id, issue key, dedup key
    pub message_id: Option<String>,
}

impl NotificationResult {
    fn sent(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            ..Default::default()
        }
    }

    fn skipped() -> Self {
        Self {
            success: true,
            skipped: true,
            ..Default::default()
        }
    }

    fn failed(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

impl From<Result<Option<String>, NotificationError>> for NotificationResult {
    fn from(result: Result<Option<String>, NotificationError>) -> Self {
        match result {
            Ok(message_id) => Self::sent(message_id),
            Err(e) => Self::failed(e),
        }
    }
}

/// A transport able to deliver alerts to notification channels
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an alert to one channel
    async fn send(&self, channel: &ChannelConfig, alert: &Alert) -> NotificationResult;

    /// Close the downstream incident opened for an alert, where the channel has one
    async fn resolve_incident(&self, channel: &ChannelConfig, alert: &Alert) -> NotificationResult;
}

/// Sends notifications over HTTP
pub struct HttpNotifier {
    client: Client,
    config: NotificationConfig,
}

impl HttpNotifier {
    /// Create a notifier with the configured request timeout
    pub fn new(config: NotificationConfig) -> Result<Self, NotificationError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("Spendwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotificationError::ConfigError(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn alert_url(&self, alert: &Alert) -> String {
        format!("{}/alerts/{}", self.config.app_url.trim_end_matches('/'), alert.id)
    }

    /// Send email through the transactional email API
    async fn send_email(
        &self,
        recipients: &[String],
        alert: &Alert,
    ) -> Result<Option<String>, NotificationError> {
        let api_key = self
            .config
            .email_api_key
            .as_deref()
            .ok_or_else(|| NotificationError::ConfigError("email API key not configured".into()))?;

        let payload = EmailPayload {
            from: &self.config.email_from,
            to: recipients,
            subject: format!("{} [Spendwatch] {}", severity_emoji(alert.severity), alert.title),
            html: self.email_html(alert),
        };

        let response = self
            .client
            .post(&self.config.email_api_url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body["message"]
                .as_str()
                .map_or_else(|| format!("Email API returned {status}"), String::from);
            return Err(NotificationError::HttpError(message));
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        info!(alert_id = %alert.id, recipients = recipients.len(), "Email notification sent");
        Ok(body["id"].as_str().map(String::from))
    }

    fn email_html(&self, alert: &Alert) -> String {
        let context = context_entries(alert, 5)
            .into_iter()
            .map(|(label, value)| format!("<li><strong>{label}:</strong> {value}</li>"))
            .collect::<String>();
        let context = if context.is_empty() {
            String::new()
        } else {
            format!("<h4>Additional Context</h4><ul>{context}</ul>")
        };

        format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family: sans-serif; color: #1F2937;">
  <div style="background: {color}; color: white; padding: 20px;">
    <h2 style="margin: 0;">{title}</h2>
    <p style="margin: 5px 0 0 0;">{severity} Alert &bull; {triggered}</p>
  </div>
  <div style="padding: 20px;">
    <p>{description}</p>
    <p><strong>Current Value:</strong> {current}<br><strong>Threshold:</strong> {threshold}</p>
    {context}
    <a href="{url}">View Alert Details</a>
  </div>
  <p style="color: #9CA3AF; font-size: 12px;">You're receiving this because you're subscribed to {severity_lower} alerts.</p>
</body>
</html>"#,
            color = severity_color(alert.severity),
            title = alert.title,
            severity = alert.severity.as_str().to_uppercase(),
            severity_lower = alert.severity,
            triggered = alert.triggered_at.format("%Y-%m-%d %H:%M UTC"),
            description = alert.description,
            current = format_metric_value(alert.current_value, alert.alert_type),
            threshold = format_metric_value(alert.threshold_value, alert.alert_type),
            url = self.alert_url(alert),
        )
    }

    /// Send Slack notification
    async fn send_slack(
        &self,
        webhook_url: &str,
        channel: Option<&str>,
        alert: &Alert,
    ) -> Result<Option<String>, NotificationError> {
        let payload = SlackPayload {
            channel,
            username: "Spendwatch Alerts",
            icon_emoji: ":chart_with_upwards_trend:",
            blocks: self.slack_blocks(alert),
            attachments: vec![SlackAttachment {
                color: severity_color(alert.severity),
                fallback: format!("{}: {}", alert.title, alert.description),
            }],
        };

        let response = self
            .client
            .post(webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::HttpError(format!(
                "Slack returned {}: {}",
                status, body
            )));
        }

        info!(alert_id = %alert.id, "Slack notification sent");
        Ok(None)
    }

    fn slack_blocks(&self, alert: &Alert) -> Vec<Value> {
        let emoji = match alert.severity {
            Severity::Critical => ":red_circle:",
            Severity::Warning => ":large_yellow_circle:",
            Severity::Info => ":large_blue_circle:",
        };

        let mut blocks = vec![
            json!({
                "type": "header",
                "text": {"type": "plain_text", "text": format!("{emoji} {}", alert.title), "emoji": true},
            }),
            json!({
                "type": "section",
                "text": {"type": "mrkdwn", "text": alert.description},
            }),
            json!({
                "type": "section",
                "fields": [
                    {"type": "mrkdwn", "text": format!("*Current Value:*\n{}", format_metric_value(alert.current_value, alert.alert_type))},
                    {"type": "mrkdwn", "text": format!("*Threshold:*\n{}", format_metric_value(alert.threshold_value, alert.alert_type))},
                ],
            }),
        ];

        let fields: Vec<Value> = context_entries(alert, 4)
            .into_iter()
            .map(|(label, value)| json!({"type": "mrkdwn", "text": format!("*{label}:*\n{value}")}))
            .collect();
        if !fields.is_empty() {
            blocks.push(json!({"type": "section", "fields": fields}));
        }

        blocks.push(json!({"type": "divider"}));
        blocks.push(json!({
            "type": "actions",
            "elements": [
                {
                    "type": "button",
                    "text": {"type": "plain_text", "text": "View Details", "emoji": true},
                    "url": self.alert_url(alert),
                    "style": "primary",
                },
                {
                    "type": "button",
                    "text": {"type": "plain_text", "text": "Acknowledge", "emoji": true},
                    "action_id": format!("acknowledge_{}", alert.id),
                },
            ],
        }));
        blocks.push(json!({
            "type": "context",
            "elements": [{
                "type": "mrkdwn",
                "text": format!(
                    "Alert ID: {} | Triggered: <!date^{}^{{date_short_pretty}} at {{time}}|{}>",
                    alert.id,
                    alert.triggered_at.timestamp(),
                    alert.triggered_at.to_rfc3339(),
                ),
            }],
        }));

        blocks
    }

    /// Send Microsoft Teams MessageCard
    async fn send_teams(&self, webhook_url: &str, alert: &Alert) -> Result<Option<String>, NotificationError> {
        let mut facts = vec![
            json!({"name": "Current Value", "value": format_metric_value(alert.current_value, alert.alert_type)}),
            json!({"name": "Threshold", "value": format_metric_value(alert.threshold_value, alert.alert_type)}),
        ];
        facts.extend(
            context_entries(alert, 4)
                .into_iter()
                .map(|(name, value)| json!({"name": name, "value": value})),
        );

        let heading = format!("{} {}", severity_emoji(alert.severity), alert.title);
        let url = self.alert_url(alert);
        let card = json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": severity_color(alert.severity).trim_start_matches('#'),
            "summary": heading,
            "sections": [
                {
                    "activityTitle": heading,
                    "activitySubtitle": format!(
                        "{} Alert \u{2022} {}",
                        alert.severity.as_str().to_uppercase(),
                        alert.triggered_at.format("%Y-%m-%d %H:%M UTC")
                    ),
                    "facts": facts,
                    "markdown": true,
                },
                {"text": alert.description},
            ],
            "potentialAction": [
                {
                    "@type": "OpenUri",
                    "name": "View in Spendwatch",
                    "targets": [{"os": "default", "uri": url}],
                },
                {
                    "@type": "OpenUri",
                    "name": "Acknowledge Alert",
                    "targets": [{"os": "default", "uri": format!("{url}?action=acknowledge")}],
                },
            ],
        });

        let response = self
            .client
            .post(webhook_url)
            .json(&card)
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::HttpError(format!(
                "Teams returned {}: {}",
                status, body
            )));
        }

        info!(alert_id = %alert.id, "Teams notification sent");
        Ok(None)
    }

    /// Send PagerDuty trigger event
    async fn send_pagerduty(
        &self,
        integration_key: &str,
        alert: &Alert,
    ) -> Result<Option<String>, NotificationError> {
        let mut details = json!({
            "description": alert.description,
            "current_value": alert.current_value,
            "threshold": alert.threshold_value,
            "alert_type": alert.alert_type,
        });
        if let (Some(details), Some(context)) = (details.as_object_mut(), alert.context.as_object()) {
            for (key, value) in context {
                details.insert(key.clone(), value.clone());
            }
        }

        let payload = PagerDutyPayload {
            routing_key: integration_key,
            event_action: "trigger",
            dedup_key: dedup_key(alert),
            payload: Some(PagerDutyEventPayload {
                summary: format!("[Spendwatch] {}", alert.title),
                source: "Spendwatch",
                severity: alert.severity.as_str(),
                timestamp: alert.triggered_at.to_rfc3339(),
                custom_details: details,
            }),
            links: vec![PagerDutyLink {
                href: self.alert_url(alert),
                text: "View in Spendwatch",
            }],
        };

        let message_id = self.post_pagerduty(&payload).await?;
        info!(alert_id = %alert.id, "PagerDuty notification sent");
        Ok(message_id)
    }

    async fn post_pagerduty(&self, payload: &PagerDutyPayload<'_>) -> Result<Option<String>, NotificationError> {
        let response = self
            .client
            .post(&self.config.pagerduty_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let message = body["message"]
                .as_str()
                .map_or_else(|| format!("PagerDuty returned {status}"), String::from);
            return Err(NotificationError::HttpError(message));
        }

        Ok(Some(
            body["dedup_key"]
                .as_str()
                .map_or_else(|| payload.dedup_key.clone(), String::from),
        ))
    }

    /// Send Datadog metric series and event, combining both outcomes
    async fn send_datadog(
        &self,
        api_key: &str,
        site: Option<&str>,
        send_metrics: bool,
        send_events: bool,
        alert: &Alert,
    ) -> Result<Option<String>, NotificationError> {
        let base = datadog_base(site.unwrap_or("datadoghq.com"));
        let tags = datadog_tags(alert);
        let timestamp = alert.triggered_at.timestamp();
        let mut errors = Vec::new();
        let mut event_id = None;

        if send_metrics {
            let metric = format!("spendwatch.alert.{}", alert.alert_type.as_str().replace('_', "."));
            let series = json!({
                "series": [
                    {
                        "metric": metric,
                        "type": "gauge",
                        "points": [[timestamp, alert.current_value]],
                        "tags": tags,
                    },
                    {
                        "metric": format!("{metric}.threshold"),
                        "type": "gauge",
                        "points": [[timestamp, alert.threshold_value]],
                        "tags": tags,
                    },
                ],
            });
            let request = self.client.post(format!("{base}/api/v2/series")).json(&series);
            if let Err(e) = datadog_post(request, api_key).await {
                errors.push(format!("metrics: {e}"));
            }
        }

        if send_events {
            let alert_type = match alert.severity {
                Severity::Critical => "error",
                Severity::Warning => "warning",
                Severity::Info => "info",
            };
            let event = json!({
                "title": format!("[Spendwatch] {}", alert.title),
                "text": format!(
                    "{}\n\nCurrent Value: {}\nThreshold: {}\n\n[View in Spendwatch]({})",
                    alert.description,
                    format_metric_value(alert.current_value, alert.alert_type),
                    format_metric_value(alert.threshold_value, alert.alert_type),
                    self.alert_url(alert),
                ),
                "alert_type": alert_type,
                "source_type_name": "spendwatch",
                "tags": tags,
                "date_happened": timestamp,
            });
            let request = self.client.post(format!("{base}/api/v1/events")).json(&event);
            match datadog_post(request, api_key).await {
                Ok(body) => {
                    event_id = match &body["event"]["id"] {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    };
                }
                Err(e) => errors.push(format!("events: {e}")),
            }
        }

        if !errors.is_empty() {
            return Err(NotificationError::HttpError(errors.join("; ")));
        }

        info!(alert_id = %alert.id, "Datadog notification sent");
        Ok(event_id)
    }

    /// Create a Jira issue for the alert
    #[allow(clippy::too_many_arguments)]
    async fn send_jira(
        &self,
        base_url: &str,
        email: &str,
        api_token: &str,
        project_key: &str,
        issue_type: Option<&str>,
        priority: Option<&str>,
        alert: &Alert,
    ) -> Result<Option<String>, NotificationError> {
        let priority = priority.unwrap_or(match alert.severity {
            Severity::Critical => "Highest",
            Severity::Warning => "High",
            Severity::Info => "Medium",
        });

        let rows = context_entries(alert, 6)
            .into_iter()
            .map(|(label, value)| format!("|{label}|{value}|"))
            .collect::<Vec<_>>()
            .join("\n");
        let description = format!(
            "h2. Alert Details\n\n{}\n\n||Field||Value||\n|Current Value|{}|\n|Threshold|{}|\n|Severity|{}|\n|Alert Type|{}|\n|Triggered At|{}|\n{}\n\n[View in Spendwatch|{}]\n\n----\n_This issue was automatically created by Spendwatch._",
            alert.description,
            format_metric_value(alert.current_value, alert.alert_type),
            format_metric_value(alert.threshold_value, alert.alert_type),
            alert.severity.as_str().to_uppercase(),
            alert.alert_type,
            alert.triggered_at.format("%Y-%m-%d %H:%M UTC"),
            rows,
            self.alert_url(alert),
        );

        let issue = json!({
            "fields": {
                "project": {"key": project_key},
                "summary": format!("[Spendwatch] {}", alert.title),
                "description": description,
                "issuetype": {"name": issue_type.unwrap_or("Task")},
                "priority": {"name": priority},
                "labels": [
                    "spendwatch",
                    "cost-alert",
                    alert.alert_type.as_str().replace('_', "-"),
                    alert.severity.as_str(),
                ],
            },
        });

        let credentials = STANDARD.encode(format!("{email}:{api_token}"));
        let response = self
            .client
            .post(format!("{}/rest/api/3/issue", base_url.trim_end_matches('/')))
            .header("Authorization", format!("Basic {credentials}"))
            .json(&issue)
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.to_string()))?;

        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            let messages: Vec<&str> = body["errorMessages"]
                .as_array()
                .map(|m| m.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let message = if messages.is_empty() {
                format!("Jira returned {status}")
            } else {
                messages.join(", ")
            };
            return Err(NotificationError::HttpError(message));
        }

        info!(alert_id = %alert.id, project = project_key, "Jira issue created");
        Ok(body["key"].as_str().map(String::from))
    }

    /// Send generic webhook notification
    async fn send_webhook(
        &self,
        url: &str,
        secret: Option<&str>,
        headers: &HashMap<String, String>,
        alert: &Alert,
    ) -> Result<Option<String>, NotificationError> {
        let payload = WebhookPayload {
            event: "alert.triggered",
            timestamp: Utc::now().to_rfc3339(),
            alert: WebhookAlert::from(alert),
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| NotificationError::SerializationError(e.to_string()))?;

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "Spendwatch-Webhook/1.0");

        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            request = request.header(SIGNATURE_HEADER, sign_payload(&body, secret)?);
        }

        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| NotificationError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::HttpError(format!(
                "Webhook returned {}: {}",
                status, body
            )));
        }

        info!(alert_id = %alert.id, url = %url, "Webhook notification sent");
        Ok(None)
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, channel: &ChannelConfig, alert: &Alert) -> NotificationResult {
        let result = match channel {
            ChannelConfig::Email { recipients } => self.send_email(recipients, alert).await,
            ChannelConfig::Slack { webhook_url, channel } => {
                self.send_slack(webhook_url, channel.as_deref(), alert).await
            }
            ChannelConfig::Teams { webhook_url } => self.send_teams(webhook_url, alert).await,
            ChannelConfig::PagerDuty {
                integration_key,
                all_severities,
            } => {
                if alert.severity != Severity::Critical && !all_severities {
                    debug!(alert_id = %alert.id, severity = %alert.severity, "PagerDuty skipped for non-critical alert");
                    return NotificationResult::skipped();
                }
                self.send_pagerduty(integration_key, alert).await
            }
            ChannelConfig::Datadog {
                api_key,
                site,
                send_metrics,
                send_events,
            } => {
                self.send_datadog(api_key, site.as_deref(), *send_metrics, *send_events, alert)
                    .await
            }
            ChannelConfig::Jira {
                base_url,
                email,
                api_token,
                project_key,
                issue_type,
                priority,
            } => {
                self.send_jira(
                    base_url,
                    email,
                    api_token,
                    project_key,
                    issue_type.as_deref(),
                    priority.as_deref(),
                    alert,
                )
                .await
            }
            ChannelConfig::Webhook { url, secret, headers } => {
                self.send_webhook(url, secret.as_deref(), headers, alert).await
            }
        };

        result.into()
    }

    async fn resolve_incident(&self, channel: &ChannelConfig, alert: &Alert) -> NotificationResult {
        let ChannelConfig::PagerDuty { integration_key, .. } = channel else {
            return NotificationResult::skipped();
        };

        let payload = PagerDutyPayload {
            routing_key: integration_key,
            event_action: "resolve",
            dedup_key: dedup_key(alert),
            payload: None,
            links: vec![],
        };

        let result = self.post_pagerduty(&payload).await;
        if result.is_ok() {
            info!(alert_id = %alert.id, "PagerDuty incident resolved");
        }
        result.into()
    }
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Hex HMAC-SHA256 of `body` keyed by `secret`
pub fn sign_payload(body: &[u8], secret: &str) -> Result<String, NotificationError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| NotificationError::ConfigError(e.to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// PagerDuty dedup key shared by trigger and resolve events
pub fn dedup_key(alert: &Alert) -> String {
    format!("spendwatch-{}", alert.id)
}

async fn datadog_post(request: RequestBuilder, api_key: &str) -> Result<Value, NotificationError> {
    let response = request
        .header("DD-API-KEY", api_key)
        .send()
        .await
        .map_err(|e| NotificationError::HttpError(e.to_string()))?;

    if !response.status().is_success() {
        return Err(NotificationError::HttpError(format!(
            "Datadog returned {}",
            response.status()
        )));
    }
    Ok(response.json().await.unwrap_or(Value::Null))
}

/// `site` is a Datadog site name, or a full base URL for proxies
fn datadog_base(site: &str) -> String {
    if site.starts_with("http://") || site.starts_with("https://") {
        site.trim_end_matches('/').to_string()
    } else {
        format!("https://api.{site}")
    }
}

fn datadog_tags(alert: &Alert) -> Vec<String> {
    let mut tags = vec![
        format!("severity:{}", alert.severity),
        format!("type:{}", alert.alert_type),
        format!("status:{}", alert.status),
    ];
    for (key, tag) in [
        ("provider", "provider"),
        ("team", "team"),
        ("project", "project"),
        ("model", "model"),
        ("budgetName", "budget"),
    ] {
        if let Some(value) = alert.context[key].as_str() {
            tags.push(format!("{tag}:{value}"));
        }
    }
    tags
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#EF4444",
        Severity::Warning => "#F59E0B",
        Severity::Info => "#3B82F6",
    }
}

fn severity_emoji(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::Warning => "🟡",
        Severity::Info => "🔵",
    }
}

/// Display a value in the unit its alert type measures
pub fn format_metric_value(value: f64, alert_type: AlertType) -> String {
    match alert_type {
        AlertType::SpendThreshold | AlertType::ForecastExceeded => {
            format!("${}", group_thousands(value, 2))
        }
        AlertType::BudgetThreshold | AlertType::ProviderError => format!("{value:.1}%"),
        AlertType::SpendAnomaly | AlertType::UsageSpike => {
            if value.fract() == 0.0 {
                group_thousands(value, 0)
            } else {
                group_thousands(value, 2)
            }
        }
    }
}

fn group_thousands(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut out = String::with_capacity(formatted.len() + int_part.len() / 3 + 1);
    if value < 0.0 && formatted.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
        out.push('-');
    }
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

/// "topContributors" -> "Top Contributors"
fn humanize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if i == 0 {
            out.extend(ch.to_uppercase());
        } else if ch.is_uppercase() {
            out.push(' ');
            out.push(ch);
        } else {
            out.push(ch);
        }
    }
    out
}

/// Displayable context pairs, skipping the metric name and filter echo
fn context_entries(alert: &Alert, limit: usize) -> Vec<(String, String)> {
    let Some(context) = alert.context.as_object() else {
        return vec![];
    };
    context
        .iter()
        .filter(|(key, value)| !matches!(key.as_str(), "metric" | "filters") && !value.is_null())
        .take(limit)
        .map(|(key, value)| {
            let display = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (humanize_key(key), display)
        })
        .collect()
}

// Email payload
#[derive(Debug, Serialize)]
struct EmailPayload<'a> {
    from: &'a str,
    to: &'a [String],
    subject: String,
    html: String,
}

// Slack payload types
#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    username: &'static str,
    icon_emoji: &'static str,
    blocks: Vec<Value>,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    color: &'static str,
    fallback: String,
}

// Generic webhook payload
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    event: &'static str,
    timestamp: String,
    alert: WebhookAlert<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookAlert<'a> {
    id: uuid::Uuid,
    #[serde(rename = "type")]
    alert_type: AlertType,
    severity: Severity,
    status: crate::models::AlertStatus,
    title: &'a str,
    description: &'a str,
    current_value: f64,
    threshold_value: f64,
    context: &'a Value,
    triggered_at: chrono::DateTime<Utc>,
}

impl<'a> From<&'a Alert> for WebhookAlert<'a> {
    fn from(alert: &'a Alert) -> Self {
        Self {
            id: alert.id,
            alert_type: alert.alert_type,
            severity: alert.severity,
            status: alert.status,
            title: &alert.title,
            description: &alert.description,
            current_value: alert.current_value,
            threshold_value: alert.threshold_value,
            context: &alert.context,
            triggered_at: alert.triggered_at,
        }
    }
}

// PagerDuty payload types
#[derive(Debug, Serialize)]
struct PagerDutyPayload<'a> {
    routing_key: &'a str,
    event_action: &'static str,
    dedup_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<PagerDutyEventPayload>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    links: Vec<PagerDutyLink>,
}

#[derive(Debug, Serialize)]
struct PagerDutyEventPayload {
    summary: String,
    source: &'static str,
    severity: &'static str,
    timestamp: String,
    custom_details: Value,
}

#[derive(Debug, Serialize)]
struct PagerDutyLink {
    href: String,
    text: &'static str,
}
