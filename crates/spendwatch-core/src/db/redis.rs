//! Redis connection and alert change-event publishing

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use deadpool_redis::{Config as RedisConfig, Pool, Runtime};
use metrics::counter;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::AlertEventSink;
use crate::error::{Error, Result};
use crate::models::AlertEvent;

/// Redis connection pool
#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
}

impl RedisPool {
    /// Create a new Redis connection pool
    pub fn new(url: &str) -> Result<Self> {
        let cfg = RedisConfig::from_url(url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| Error::Redis(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Health check
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.pool.get().await.map_err(|e| Error::Redis(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::Redis(e.to_string()))?;
        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

/// Pub/sub channel carrying an organization's alert events
pub fn event_channel(org_id: &str) -> String {
    format!("spendwatch:alerts:{org_id}")
}

/// Publishes alert events to Redis from a background task
///
/// `publish` only enqueues onto a bounded buffer. When the buffer is full
/// the event is dropped and counted.
#[derive(Clone)]
pub struct RedisEventPublisher {
    tx: mpsc::Sender<AlertEvent>,
    dropped: Arc<AtomicU64>,
}

impl RedisEventPublisher {
    /// Start the publisher task. Must be called inside a Tokio runtime.
    pub fn spawn(pool: &RedisPool, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(forward_events(pool.pool.clone(), rx));

        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Events dropped since start
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl AlertEventSink for RedisEventPublisher {
    fn publish(&self, event: AlertEvent) {
        if let Err(e) = self.tx.try_send(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            counter!("spendwatch_events_dropped_total").increment(1);
            warn!(error = %e, "Dropping alert event");
        }
    }
}

async fn forward_events(pool: Pool, mut rx: mpsc::Receiver<AlertEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = publish_event(&pool, &event).await {
            counter!("spendwatch_events_dropped_total").increment(1);
            warn!(
                alert_id = %event.alert.id,
                error = %e,
                "Failed to publish alert event"
            );
        }
    }
    debug!("Alert event publisher stopped");
}

async fn publish_event(pool: &Pool, event: &AlertEvent) -> Result<()> {
    let payload = serde_json::to_string(event)?;
    let mut conn = pool.get().await.map_err(|e| Error::Redis(e.to_string()))?;
    let _: () = conn
        .publish(event_channel(&event.org_id), payload)
        .await
        .map_err(|e| Error::Redis(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Alert, AlertEventKind, AlertTrigger, AlertType, Severity};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn event() -> AlertEvent {
        let trigger = AlertTrigger {
            rule_id: Uuid::new_v4(),
            alert_type: AlertType::UsageSpike,
            severity: Severity::Info,
            current_value: 12.0,
            threshold_value: 10.0,
            message: "spike".to_string(),
            context: json!({}),
            triggered_at: Utc::now(),
        };
        AlertEvent::new(
            AlertEventKind::Created,
            &Alert::from_trigger("org_42", &trigger, "Usage spike".to_string()),
        )
    }

    #[test]
    fn test_event_channel() {
        assert_eq!(event_channel("org_42"), "spendwatch:alerts:org_42");
    }

    #[tokio::test]
    async fn test_publish_never_blocks_without_redis() {
        // Nothing listens on port 1; the pool connects lazily
        let pool = RedisPool::new("redis://127.0.0.1:1").unwrap();
        let publisher = RedisEventPublisher::spawn(&pool, 1);

        for _ in 0..50 {
            publisher.publish(event());
        }

        assert!(publisher.dropped() > 0);
    }
}
