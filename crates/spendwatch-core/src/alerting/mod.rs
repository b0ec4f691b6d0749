//! Alerting for Spendwatch
//!
//! Rule evaluation passes, deduplication, notification delivery and the
//! alert lifecycle.

mod dedup;
mod dispatcher;
mod engine;
mod lifecycle;
mod notifier;

pub use dedup::{is_rule_active, relative_difference, Deduplicator, SuppressReason};
pub use dispatcher::NotificationDispatcher;
pub use engine::{AlertEngine, EvaluationReport, Stores, TriggerOutcome};
pub use lifecycle::{ConditionCheck, LifecycleManager, SweepReport, SYSTEM_USER};
pub use notifier::{
    dedup_key, format_metric_value, sign_payload, HttpNotifier, NotificationError,
    NotificationResult, Notifier, SIGNATURE_HEADER,
};
