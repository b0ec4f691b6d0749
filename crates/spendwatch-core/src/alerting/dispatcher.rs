//! Fan-out of an alert to every matching channel on its rule

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use metrics::counter;
use tracing::warn;

use super::notifier::Notifier;
use crate::models::{Alert, AlertRule, ChannelType, NotificationRecord};

/// Sends an alert to its rule's channels and records every outcome
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Send to all enabled channels accepting the alert's severity
    ///
    /// Sends run concurrently. One record is returned per attempted channel
    /// in rule order; a failed channel never affects the others.
    pub async fn notify(&self, rule: &AlertRule, alert: &Alert) -> Vec<NotificationRecord> {
        let channels: Vec<_> = rule
            .channels
            .iter()
            .filter(|c| c.accepts(alert.severity))
            .collect();

        let results = join_all(
            channels
                .iter()
                .map(|channel| self.notifier.send(&channel.config, alert)),
        )
        .await;

        channels
            .iter()
            .zip(results)
            .map(|(channel, result)| {
                let channel_type = channel.config.channel_type();
                let outcome = if result.skipped {
                    "skipped"
                } else if result.success {
                    "success"
                } else {
                    warn!(
                        alert_id = %alert.id,
                        channel = channel_type.as_str(),
                        error = result.error.as_deref().unwrap_or("unknown"),
                        "Notification failed"
                    );
                    "failure"
                };
                counter!(
                    "spendwatch_notifications_total",
                    "channel" => channel_type.as_str(),
                    "outcome" => outcome
                )
                .increment(1);

                NotificationRecord {
                    channel: channel_type,
                    sent_at: Utc::now(),
                    success: result.success,
                    error: result.error,
                    message_id: result.message_id,
                }
            })
            .collect()
    }

    /// Close downstream incidents for an alert that paged
    ///
    /// Failures are logged; resolution of the alert itself proceeds regardless.
    pub async fn resolve_incidents(&self, rule: &AlertRule, alert: &Alert) {
        if !alert.has_open_page() {
            return;
        }

        let pagers = rule
            .channels
            .iter()
            .filter(|c| c.enabled && c.config.channel_type() == ChannelType::PagerDuty);

        let results = join_all(
            pagers.map(|channel| self.notifier.resolve_incident(&channel.config, alert)),
        )
        .await;

        for result in results.into_iter().filter(|r| !r.success) {
            warn!(
                alert_id = %alert.id,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Failed to resolve PagerDuty incident"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::notifier::NotificationResult;
    use crate::models::{
        AlertTrigger, AlertType, ChannelConfig, NotificationChannel, RuleConfig, Severity,
        SpendMetric, SpendThresholdConfig, TimeWindow,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Fails Slack, skips PagerDuty, succeeds elsewhere
    #[derive(Default)]
    struct ScriptedNotifier {
        sent: Mutex<Vec<ChannelType>>,
        resolved: Mutex<Vec<ChannelType>>,
    }

    #[async_trait]
    impl Notifier for ScriptedNotifier {
        async fn send(&self, channel: &ChannelConfig, _alert: &Alert) -> NotificationResult {
            let kind = channel.channel_type();
            self.sent.lock().push(kind);
            match kind {
                ChannelType::Slack => NotificationResult {
                    error: Some("Slack returned 500".to_string()),
                    ..Default::default()
                },
                ChannelType::PagerDuty => NotificationResult {
                    success: true,
                    message_id: Some("spendwatch-x".to_string()),
                    ..Default::default()
                },
                _ => NotificationResult {
                    success: true,
                    ..Default::default()
                },
            }
        }

        async fn resolve_incident(&self, channel: &ChannelConfig, _alert: &Alert) -> NotificationResult {
            self.resolved.lock().push(channel.channel_type());
            NotificationResult {
                success: true,
                ..Default::default()
            }
        }
    }

    fn rule() -> AlertRule {
        let mut rule = AlertRule::new(
            "org_1",
            "Daily spend",
            RuleConfig::SpendThreshold(SpendThresholdConfig {
                metric: SpendMetric::DailyCost,
                operator: crate::models::Operator::Gt,
                threshold: 100.0,
                time_window: TimeWindow::OneDay,
                filters: Default::default(),
            }),
        );

        let mut critical_only = NotificationChannel::new(ChannelConfig::Email {
            recipients: vec!["oncall@example.com".to_string()],
        });
        critical_only.severity_filter = Some(vec![Severity::Critical]);

        let mut disabled = NotificationChannel::new(ChannelConfig::Teams {
            webhook_url: "https://example.invalid/teams".to_string(),
        });
        disabled.enabled = false;

        rule.channels = vec![
            NotificationChannel::new(ChannelConfig::Slack {
                webhook_url: "https://example.invalid/slack".to_string(),
                channel: None,
            }),
            critical_only,
            disabled,
            NotificationChannel::new(ChannelConfig::PagerDuty {
                integration_key: "rk".to_string(),
                all_severities: true,
            }),
            NotificationChannel::new(ChannelConfig::Webhook {
                url: "https://example.invalid/hook".to_string(),
                secret: None,
                headers: Default::default(),
            }),
        ];
        rule
    }

    fn alert(rule: &AlertRule, severity: Severity) -> Alert {
        let trigger = AlertTrigger {
            rule_id: rule.id,
            alert_type: AlertType::SpendThreshold,
            severity,
            current_value: 150.0,
            threshold_value: 100.0,
            message: "over".to_string(),
            context: json!({}),
            triggered_at: Utc::now(),
        };
        Alert::from_trigger("org_1", &trigger, "Spend threshold exceeded".to_string())
    }

    #[tokio::test]
    async fn test_filters_channels_and_records_each() {
        let notifier = Arc::new(ScriptedNotifier::default());
        let dispatcher = NotificationDispatcher::new(notifier.clone());
        let rule = rule();

        let records = dispatcher.notify(&rule, &alert(&rule, Severity::Warning)).await;

        let channels: Vec<_> = records.iter().map(|r| r.channel).collect();
        assert_eq!(
            channels,
            vec![ChannelType::Slack, ChannelType::PagerDuty, ChannelType::Webhook]
        );
        assert!(!records[0].success);
        assert_eq!(records[0].error.as_deref(), Some("Slack returned 500"));
        assert!(records[1].success);
        assert!(records[2].success);
        assert_eq!(notifier.sent.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_critical_reaches_filtered_channel() {
        let notifier = Arc::new(ScriptedNotifier::default());
        let dispatcher = NotificationDispatcher::new(notifier.clone());
        let rule = rule();

        let records = dispatcher.notify(&rule, &alert(&rule, Severity::Critical)).await;
        assert_eq!(records.len(), 4);
        assert!(records.iter().any(|r| r.channel == ChannelType::Email));
    }

    #[tokio::test]
    async fn test_resolve_only_when_paged() {
        let notifier = Arc::new(ScriptedNotifier::default());
        let dispatcher = NotificationDispatcher::new(notifier.clone());
        let rule = rule();
        let mut alert = alert(&rule, Severity::Critical);

        dispatcher.resolve_incidents(&rule, &alert).await;
        assert!(notifier.resolved.lock().is_empty());

        alert.notifications_sent = dispatcher.notify(&rule, &alert).await;
        dispatcher.resolve_incidents(&rule, &alert).await;
        assert_eq!(*notifier.resolved.lock(), vec![ChannelType::PagerDuty]);
    }
}
