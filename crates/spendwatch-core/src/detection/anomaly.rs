//! Consensus anomaly detection
//!
//! Four independent detectors score the current value against history:
//! z-score, Tukey fences (IQR), robust z-score (MAD), and a seasonal
//! cohort of the same window in previous weeks. A trigger is produced only when at least
//! `consensus_quorum` of them flag the value.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use super::stats::{self, BaselineStats};
use crate::config::DetectionConfig;
use crate::db::UsageStore;
use crate::error::Result;
use crate::evaluators::capitalize;
use crate::models::{AlertTrigger, AlertType, Sensitivity, SpendAnomalyConfig, UsageQuery};

/// Detection method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyMethod {
    ZScore,
    Iqr,
    Mad,
    Seasonal,
}

impl AnomalyMethod {
    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZScore => "z_score",
            Self::Iqr => "iqr",
            Self::Mad => "mad",
            Self::Seasonal => "seasonal",
        }
    }
}

/// One detector's verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyDetection {
    pub method: AnomalyMethod,
    pub is_anomaly: bool,
    /// Signed distance from normal in the method's own units
    pub deviation_score: f64,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AnomalyDetection {
    fn not_anomalous(method: AnomalyMethod, threshold: f64) -> Self {
        Self {
            method,
            is_anomaly: false,
            deviation_score: 0.0,
            threshold,
            metadata: None,
        }
    }
}

/// Runs the four detectors and the consensus vote
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: DetectionConfig,
}

impl AnomalyDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Relative difference used when the spread is too small to divide by
    fn degenerate(
        &self,
        method: AnomalyMethod,
        current: f64,
        center: f64,
        threshold: f64,
    ) -> AnomalyDetection {
        let percent_diff = (current - center).abs() / center.max(1.0);
        AnomalyDetection {
            method,
            is_anomaly: percent_diff > self.config.degenerate_percent,
            deviation_score: percent_diff * self.config.degenerate_score_factor,
            threshold,
            metadata: Some(json!({ "degenerate": true, "percentDiff": percent_diff })),
        }
    }

    /// Classic z-score against the baseline mean
    pub fn z_score(
        &self,
        current: f64,
        baseline: &BaselineStats,
        sensitivity: Sensitivity,
    ) -> AnomalyDetection {
        let threshold = self.config.sensitivity.threshold(sensitivity);

        if baseline.std_dev < self.config.degenerate_floor {
            return self.degenerate(AnomalyMethod::ZScore, current, baseline.mean, threshold);
        }

        let z = (current - baseline.mean) / baseline.std_dev;
        AnomalyDetection {
            method: AnomalyMethod::ZScore,
            is_anomaly: z.abs() > threshold,
            deviation_score: z,
            threshold,
            metadata: None,
        }
    }

    /// Tukey fences on the interquartile range
    pub fn iqr(&self, current: f64, baseline: &BaselineStats) -> AnomalyDetection {
        let iqr = baseline.iqr();
        let lower_fence = baseline.q1 - self.config.iqr_multiplier * iqr;
        let upper_fence = baseline.q3 + self.config.iqr_multiplier * iqr;
        let extreme_upper_fence = baseline.q3 + self.config.iqr_extreme_multiplier * iqr;

        // A zero IQR scores in absolute units
        let scale = if iqr == 0.0 { 1.0 } else { iqr };
        let deviation_score = if current > baseline.q3 {
            (current - baseline.q3) / scale
        } else if current < baseline.q1 {
            (baseline.q1 - current) / scale
        } else {
            0.0
        };

        AnomalyDetection {
            method: AnomalyMethod::Iqr,
            is_anomaly: current > upper_fence || current < lower_fence,
            deviation_score,
            threshold: self.config.iqr_multiplier,
            metadata: Some(json!({
                "isExtreme": current > extreme_upper_fence,
                "upperFence": upper_fence,
                "lowerFence": lower_fence,
            })),
        }
    }

    /// Modified z-score against the median
    pub fn mad(
        &self,
        current: f64,
        baseline: &BaselineStats,
        sensitivity: Sensitivity,
    ) -> AnomalyDetection {
        let threshold = self.config.sensitivity.threshold(sensitivity) * self.config.mad_scale;

        if baseline.mad < self.config.degenerate_floor {
            return self.degenerate(AnomalyMethod::Mad, current, baseline.median, threshold);
        }

        let modified_z = 0.6745 * (current - baseline.median) / baseline.mad;
        AnomalyDetection {
            method: AnomalyMethod::Mad,
            is_anomaly: modified_z.abs() > threshold,
            deviation_score: modified_z,
            threshold,
            metadata: None,
        }
    }

    /// Z-score against the same window's cost in past weeks
    pub fn seasonal(
        &self,
        current: f64,
        history: &[f64],
        day_of_week: u32,
        hour_of_day: u32,
    ) -> AnomalyDetection {
        let threshold = self.config.seasonal_threshold;
        if history.len() < self.config.seasonal_min_points {
            return AnomalyDetection::not_anomalous(AnomalyMethod::Seasonal, threshold);
        }

        let mean = stats::mean(history);
        let std_dev = stats::std_dev(history, mean);
        let deviation_score = if std_dev > self.config.degenerate_floor {
            (current - mean) / std_dev
        } else {
            0.0
        };

        AnomalyDetection {
            method: AnomalyMethod::Seasonal,
            is_anomaly: deviation_score.abs() > threshold,
            deviation_score,
            threshold,
            metadata: Some(json!({
                "dayOfWeek": day_of_week,
                "hourOfDay": hour_of_day,
                "seasonalMean": mean,
                "seasonalStdDev": std_dev,
            })),
        }
    }

    /// Vote over detections and build a trigger when the quorum is met
    pub fn consensus(
        &self,
        rule_id: Uuid,
        config: &SpendAnomalyConfig,
        current: f64,
        baseline: &BaselineStats,
        detections: &[AnomalyDetection],
        now: DateTime<Utc>,
    ) -> Option<AlertTrigger> {
        let flagged: Vec<&AnomalyDetection> = detections.iter().filter(|d| d.is_anomaly).collect();
        if flagged.len() < self.config.consensus_quorum {
            debug!(
                rule_id = %rule_id,
                flagged = flagged.len(),
                quorum = self.config.consensus_quorum,
                "Anomaly consensus not reached"
            );
            return None;
        }

        let primary = *flagged.first()?;
        let methods: Vec<&str> = flagged.iter().map(|d| d.method.as_str()).collect();
        let percent_above_normal = if baseline.mean.abs() > f64::EPSILON {
            Some(round1((current - baseline.mean) / baseline.mean * 100.0))
        } else {
            None
        };
        let direction = if current >= baseline.mean { "above" } else { "below" };

        Some(AlertTrigger {
            rule_id,
            alert_type: AlertType::SpendAnomaly,
            severity: self.config.severity.classify(primary.deviation_score),
            current_value: current,
            threshold_value: baseline.mean,
            message: format!(
                "{} of ${:.2} is {:.1}σ {} normal (${:.2})",
                capitalize(config.metric.label()),
                current,
                primary.deviation_score.abs(),
                direction,
                baseline.mean
            ),
            context: json!({
                "metric": config.metric.as_str(),
                "currentValue": current,
                "baselineMean": baseline.mean,
                "baselineStdDev": baseline.std_dev,
                "deviationScore": primary.deviation_score,
                "detectionMethods": methods,
                "percentAboveNormal": percent_above_normal,
                "baselinePeriod": config.baseline_period.as_str(),
                "dataPoints": baseline.data_points,
            }),
            triggered_at: now,
        })
    }

    /// Evaluate a `spend_anomaly` rule against stored usage
    ///
    /// Returns `Ok(None)` when the baseline is too small to judge. A failed
    /// seasonal lookup counts as a non-anomalous vote rather than an error.
    pub async fn detect_spend_anomaly(
        &self,
        usage: &dyn UsageStore,
        rule_id: Uuid,
        org_id: &str,
        config: &SpendAnomalyConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertTrigger>> {
        let baseline_start = now - Duration::days(config.baseline_period.days());
        let current_query = UsageQuery::new(org_id, config.time_window.start(now), now)
            .with_filters(config.filters.clone());
        let day_of_week = now.weekday().num_days_from_sunday();
        let hour_of_day = now.hour();

        let (history, current, seasonal_history) = tokio::join!(
            usage.period_costs(org_id, config.metric, baseline_start, &config.filters),
            usage.sum_cost(&current_query),
            usage.seasonal_values(
                org_id,
                now,
                Duration::minutes(config.time_window.minutes()),
                self.config.seasonal_weeks_back,
                &config.filters,
            ),
        );

        let history = history?;
        let baseline = match BaselineStats::from_values(&history) {
            Some(b) if b.data_points >= self.config.min_baseline_points => b,
            _ => {
                debug!(
                    rule_id = %rule_id,
                    data_points = history.len(),
                    required = self.config.min_baseline_points,
                    "Baseline too small, skipping anomaly detection"
                );
                metrics::counter!("spendwatch_anomaly_baseline_skipped_total").increment(1);
                return Ok(None);
            }
        };
        let current = current?;

        let seasonal = match seasonal_history {
            Ok(values) => self.seasonal(current, &values, day_of_week, hour_of_day),
            Err(e) => {
                warn!(rule_id = %rule_id, error = %e, "Seasonal baseline unavailable");
                AnomalyDetection::not_anomalous(
                    AnomalyMethod::Seasonal,
                    self.config.seasonal_threshold,
                )
            }
        };

        let detections = [
            self.z_score(current, &baseline, config.sensitivity),
            self.iqr(current, &baseline),
            self.mad(current, &baseline, config.sensitivity),
            seasonal,
        ];

        Ok(self.consensus(rule_id, config, current, &baseline, &detections, now))
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertFilters, AnomalyMetric, BaselinePeriod, Severity, TimeWindow};
    use rstest::rstest;

    fn baseline(q1: f64, q3: f64) -> BaselineStats {
        BaselineStats {
            mean: 150.0,
            std_dev: 40.0,
            median: 150.0,
            mad: 50.0,
            q1,
            q3,
            min: 50.0,
            max: 250.0,
            data_points: 14,
        }
    }

    fn anomaly_config() -> SpendAnomalyConfig {
        SpendAnomalyConfig {
            metric: AnomalyMetric::DailyCost,
            sensitivity: Sensitivity::Medium,
            time_window: TimeWindow::OneDay,
            baseline_period: BaselinePeriod::FourteenDays,
            filters: AlertFilters::default(),
        }
    }

    fn detection(method: AnomalyMethod, is_anomaly: bool, score: f64) -> AnomalyDetection {
        AnomalyDetection {
            method,
            is_anomaly,
            deviation_score: score,
            threshold: 2.5,
            metadata: None,
        }
    }

    #[test]
    fn test_iqr_upper_fence() {
        let detector = AnomalyDetector::default();
        let result = detector.iqr(700.0, &baseline(100.0, 200.0));

        assert!(result.is_anomaly);
        assert!((result.deviation_score - 5.0).abs() < 1e-12);
        let metadata = result.metadata.unwrap();
        assert_eq!(metadata["upperFence"], 250.0);
        assert_eq!(metadata["lowerFence"], -50.0);
        assert_eq!(metadata["isExtreme"], true);
    }

    #[test]
    fn test_iqr_inside_fences() {
        let detector = AnomalyDetector::default();
        let result = detector.iqr(180.0, &baseline(100.0, 200.0));
        assert!(!result.is_anomaly);
        assert_eq!(result.deviation_score, 0.0);
    }

    #[test]
    fn test_z_score_degenerate_fallback() {
        let detector = AnomalyDetector::default();
        let mut flat = baseline(100.0, 100.0);
        flat.mean = 100.0;
        flat.std_dev = 0.0;

        let result = detector.z_score(160.0, &flat, Sensitivity::Medium);
        assert!(result.is_anomaly);
        assert!((result.deviation_score - 6.0).abs() < 1e-9);

        let result = detector.z_score(140.0, &flat, Sensitivity::Medium);
        assert!(!result.is_anomaly);
    }

    #[rstest]
    #[case(Sensitivity::Low)]
    #[case(Sensitivity::Medium)]
    #[case(Sensitivity::High)]
    fn test_z_score_and_mad_agree_in_direction(#[case] sensitivity: Sensitivity) {
        let detector = AnomalyDetector::default();
        let sample = [90.0, 95.0, 98.0, 100.0, 100.0, 102.0, 105.0, 110.0, 99.0, 101.0];
        let stats = BaselineStats::from_values(&sample).unwrap();

        for current in [40.0, 80.0, 120.0, 300.0] {
            let z = detector.z_score(current, &stats, sensitivity);
            let m = detector.mad(current, &stats, sensitivity);
            assert_eq!(
                z.deviation_score.signum(),
                m.deviation_score.signum(),
                "current = {current}"
            );
        }
    }

    #[test]
    fn test_seasonal_needs_min_points() {
        let detector = AnomalyDetector::default();
        let result = detector.seasonal(500.0, &[100.0, 110.0], 1, 9);
        assert!(!result.is_anomaly);
        assert_eq!(result.deviation_score, 0.0);

        let result = detector.seasonal(500.0, &[100.0, 110.0, 90.0, 105.0], 1, 9);
        assert!(result.is_anomaly);
    }

    #[test]
    fn test_single_vote_is_not_consensus() {
        let detector = AnomalyDetector::default();
        let detections = [
            detection(AnomalyMethod::ZScore, true, 3.2),
            detection(AnomalyMethod::Iqr, false, 0.0),
            detection(AnomalyMethod::Mad, false, 1.0),
            detection(AnomalyMethod::Seasonal, false, 0.0),
        ];
        let trigger = detector.consensus(
            Uuid::new_v4(),
            &anomaly_config(),
            300.0,
            &baseline(100.0, 200.0),
            &detections,
            Utc::now(),
        );
        assert!(trigger.is_none());
    }

    #[test]
    fn test_two_votes_trigger() {
        let detector = AnomalyDetector::default();
        let rule_id = Uuid::new_v4();
        let detections = [
            detection(AnomalyMethod::ZScore, false, 2.0),
            detection(AnomalyMethod::Iqr, true, 4.5),
            detection(AnomalyMethod::Mad, true, 3.4),
            detection(AnomalyMethod::Seasonal, false, 0.0),
        ];
        let trigger = detector
            .consensus(
                rule_id,
                &anomaly_config(),
                300.0,
                &baseline(100.0, 200.0),
                &detections,
                Utc::now(),
            )
            .unwrap();

        assert_eq!(trigger.rule_id, rule_id);
        assert_eq!(trigger.alert_type, AlertType::SpendAnomaly);
        // Severity follows the first flagged method (IQR, 4.5)
        assert_eq!(trigger.severity, Severity::Critical);
        assert_eq!(trigger.threshold_value, 150.0);
        assert_eq!(trigger.context["detectionMethods"], json!(["iqr", "mad"]));
        assert_eq!(trigger.context["percentAboveNormal"], 100.0);
        assert_eq!(trigger.context["baselineStdDev"], 40.0);
    }

    #[tokio::test]
    async fn test_flat_month_is_not_seasonal_anomaly() {
        use crate::db::MemoryStore;
        use crate::models::UsageRecord;
        use chrono::TimeZone;

        let store = MemoryStore::new();
        let now = Utc.with_ymd_and_hms(2024, 3, 13, 0, 0, 0).unwrap();
        let start = now - Duration::days(28);
        store.add_usage((0..28 * 24).map(|i| {
            let cost = 1.0 + 0.05 * f64::from(i % 3);
            let at = start + Duration::hours(i64::from(i)) + Duration::minutes(30);
            UsageRecord::new("org_1", "openai", "gpt-4o", cost, at)
        }));

        let detector = AnomalyDetector::default();
        let config = anomaly_config();
        let current = store
            .sum_cost(&UsageQuery::new("org_1", config.time_window.start(now), now))
            .await
            .unwrap();
        let history = store
            .seasonal_values("org_1", now, Duration::hours(24), 4, &config.filters)
            .await
            .unwrap();

        // The fourth week back predates the first record
        assert_eq!(history.len(), 3);
        for value in &history {
            assert!((value - current).abs() < 1e-6, "{value} vs {current}");
        }
        let seasonal = detector.seasonal(current, &history, 3, 0);
        assert!(!seasonal.is_anomaly);

        let trigger = detector
            .detect_spend_anomaly(&store, Uuid::new_v4(), "org_1", &config, now)
            .await
            .unwrap();
        assert!(trigger.is_none());
    }
}
