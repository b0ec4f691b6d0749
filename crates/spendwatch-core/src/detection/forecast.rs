//! Spend forecasting
//!
//! Four projection methods over the elapsed part of a period's daily spend,
//! combined by a fixed-weight ensemble. The spread of the four projections
//! around the ensemble gives a normal-approximation confidence interval.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::config::ForecastConfig;
use crate::db::UsageStore;
use crate::error::{Error, Result};
use crate::models::{
    AlertTrigger, AlertType, Budget, ForecastExceededConfig, ForecastMetric, Severity, UsageQuery,
};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Projection method, in ensemble-weight order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastMethod {
    Linear,
    WeightedAverage,
    ExponentialSmoothing,
    TrendAdjusted,
}

impl ForecastMethod {
    pub const ALL: [ForecastMethod; 4] = [
        Self::Linear,
        Self::WeightedAverage,
        Self::ExponentialSmoothing,
        Self::TrendAdjusted,
    ];
}

/// One method's projected end-of-period spend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResult {
    pub method: ForecastMethod,
    pub projected_spend: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub low: f64,
    pub high: f64,
}

impl ConfidenceInterval {
    pub fn width(&self) -> f64 {
        self.high - self.low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodBreakdown {
    pub method: ForecastMethod,
    pub projection: f64,
    pub weight: f64,
}

/// Forecast of a period's spend against a target amount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetForecast {
    pub projected_spend: f64,
    /// Projected spend as a percentage of the target
    pub projected_utilization: f64,
    pub confidence_interval: ConfidenceInterval,
    pub estimated_breach_date: Option<DateTime<Utc>>,
    pub projected_overage: f64,
    pub method_breakdown: Vec<MethodBreakdown>,
    pub days_remaining: i64,
    pub daily_burn_rate: f64,
    pub required_daily_rate: f64,
}

/// Ensemble spend forecaster
#[derive(Debug, Clone, Default)]
pub struct ForecastEngine {
    config: ForecastConfig,
}

impl ForecastEngine {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }

    /// Current spend plus the mean daily spend over the remaining days
    pub fn linear(&self, daily: &[f64], days_remaining: i64, current: f64) -> f64 {
        if daily.is_empty() {
            return current;
        }
        let avg = daily.iter().sum::<f64>() / daily.len() as f64;
        current + avg * days_remaining as f64
    }

    /// Like [`linear`](Self::linear) but day `i` is weighted `i + 1`
    pub fn weighted_average(&self, daily: &[f64], days_remaining: i64, current: f64) -> f64 {
        match weighted_daily(daily) {
            Some(avg) => current + avg * days_remaining as f64,
            None => current,
        }
    }

    /// Holt's linear smoothing (level and trend, no seasonality)
    pub fn exponential_smoothing(&self, daily: &[f64], days_remaining: i64, current: f64) -> f64 {
        if daily.len() < 2 {
            return current;
        }
        let (alpha, beta) = (self.config.alpha, self.config.beta);
        let mut level = daily[0];
        let mut trend = daily[1] - daily[0];

        for &spend in &daily[1..] {
            let prev_level = level;
            level = alpha * spend + (1.0 - alpha) * (level + trend);
            trend = beta * (level - prev_level) + (1.0 - beta) * trend;
        }

        current + (level + trend) * days_remaining as f64
    }

    /// Least-squares line through the daily series, summed over the remaining days
    pub fn trend_adjusted(&self, daily: &[f64], days_remaining: i64, current: f64) -> f64 {
        if daily.len() < 3 {
            return current;
        }
        let n = daily.len() as f64;
        let x_mean = (n - 1.0) / 2.0;
        let y_mean = daily.iter().sum::<f64>() / n;

        let (numerator, denominator) =
            daily
                .iter()
                .enumerate()
                .fold((0.0, 0.0), |(num, den), (x, y)| {
                    let dx = x as f64 - x_mean;
                    (num + dx * (y - y_mean), den + dx * dx)
                });
        let slope = if denominator != 0.0 {
            numerator / denominator
        } else {
            0.0
        };
        let intercept = y_mean - slope * x_mean;

        let remaining: f64 = (0..days_remaining.max(0))
            .map(|d| intercept + slope * (n + d as f64))
            .sum();

        current + remaining.max(0.0)
    }

    /// All four projections, in ensemble-weight order
    pub fn project(&self, daily: &[f64], days_remaining: i64, current: f64) -> [ForecastResult; 4] {
        let spends = [
            self.linear(daily, days_remaining, current),
            self.weighted_average(daily, days_remaining, current),
            self.exponential_smoothing(daily, days_remaining, current),
            self.trend_adjusted(daily, days_remaining, current),
        ];
        let mut results = [ForecastResult {
            method: ForecastMethod::Linear,
            projected_spend: 0.0,
        }; 4];
        for (i, method) in ForecastMethod::ALL.into_iter().enumerate() {
            results[i] = ForecastResult {
                method,
                projected_spend: spends[i],
            };
        }
        results
    }

    /// Weighted sum of the four projections
    pub fn ensemble(&self, projections: &[f64; 4]) -> f64 {
        projections
            .iter()
            .zip(self.config.weights.iter())
            .map(|(p, w)| p * w)
            .sum()
    }

    /// Interval around `projected` from the spread of the projections, floored at `current`
    pub fn confidence_interval(
        &self,
        projections: &[f64; 4],
        projected: f64,
        current: f64,
    ) -> ConfidenceInterval {
        let variance = projections
            .iter()
            .map(|p| (p - projected).powi(2))
            .sum::<f64>()
            / projections.len() as f64;
        let margin = self.config.z * variance.sqrt();

        ConfidenceInterval {
            low: current.max(projected - margin),
            high: projected + margin,
        }
    }

    /// When cumulative spend reaches `amount` at the recent weighted burn rate
    ///
    /// Already at or over `amount` returns `now`. No spend, or a date past
    /// `period_end`, returns `None`.
    pub fn estimate_breach_date(
        &self,
        daily: &[f64],
        current: f64,
        amount: f64,
        period_end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if current >= amount {
            return Some(now);
        }

        let recent = &daily[daily.len().saturating_sub(self.config.breach_lookback_days)..];
        let burn = weighted_daily(recent).filter(|rate| *rate > 0.0)?;

        let days_until = ((amount - current) / burn).ceil() as i64;
        let breach = now + Duration::days(days_until);
        (breach <= period_end).then_some(breach)
    }

    /// Forecast a period's spend against `target`
    pub fn forecast_period(
        &self,
        target: f64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        current: f64,
        daily: &[f64],
        now: DateTime<Utc>,
    ) -> BudgetForecast {
        let total_days = days_ceil(period_end - period_start);
        let days_elapsed = days_ceil(now - period_start).max(1);
        let days_remaining = (total_days - days_elapsed).max(0);

        let results = self.project(daily, days_remaining, current);
        let projections = results.map(|r| r.projected_spend);
        let projected_spend = self.ensemble(&projections);

        BudgetForecast {
            projected_spend,
            projected_utilization: percent_of(projected_spend, target),
            confidence_interval: self.confidence_interval(&projections, projected_spend, current),
            estimated_breach_date: self.estimate_breach_date(
                daily, current, target, period_end, now,
            ),
            projected_overage: (projected_spend - target).max(0.0),
            method_breakdown: results
                .iter()
                .zip(self.config.weights.iter())
                .map(|(r, w)| MethodBreakdown {
                    method: r.method,
                    projection: r.projected_spend,
                    weight: *w,
                })
                .collect(),
            days_remaining,
            daily_burn_rate: current / days_elapsed as f64,
            required_daily_rate: if days_remaining > 0 {
                (target - current) / days_remaining as f64
            } else {
                0.0
            },
        }
    }

    /// Forecast a budget from its current spend and daily history
    pub fn forecast_budget(
        &self,
        budget: &Budget,
        current: f64,
        daily: &[f64],
        now: DateTime<Utc>,
    ) -> BudgetForecast {
        self.forecast_period(
            budget.amount,
            budget.period_start,
            budget.period_end,
            current,
            daily,
            now,
        )
    }

    /// Load the budget's daily history and forecast it
    pub async fn forecast_budget_from_store(
        &self,
        usage: &dyn UsageStore,
        budget: &Budget,
        current: f64,
        now: DateTime<Utc>,
    ) -> Result<BudgetForecast> {
        let query = UsageQuery::new(&budget.org_id, budget.period_start, now)
            .with_filters(budget.scope_filters());
        let daily = usage.daily_costs(&query).await?;
        Ok(self.forecast_budget(budget, current, &daily, now))
    }

    /// Evaluate a `forecast_exceeded` rule for the current month or quarter
    pub async fn evaluate_forecast(
        &self,
        usage: &dyn UsageStore,
        rule_id: Uuid,
        org_id: &str,
        config: &ForecastExceededConfig,
        now: DateTime<Utc>,
    ) -> Result<Option<AlertTrigger>> {
        let period = CalendarPeriod::containing(config.metric, now)?;

        let current_query = UsageQuery::new(org_id, period.start, now);
        let previous_query = UsageQuery::new(org_id, period.previous_start, period.start);
        let (current, daily, previous) = tokio::join!(
            usage.sum_cost(&current_query),
            usage.daily_costs(&current_query),
            usage.sum_cost(&previous_query),
        );
        let (current, daily, previous) = (current?, daily?, previous?);

        let mut forecast =
            self.forecast_period(config.threshold, period.start, period.end, current, &daily, now);
        // Utilization is reported against the previous period's actual spend
        forecast.projected_utilization = if previous > 0.0 {
            forecast.projected_spend / previous * 100.0
        } else {
            100.0
        };

        let ci = forecast.confidence_interval;
        let confidence_point = ci.low + ci.width() * (1.0 - config.confidence_level);
        let projected_exceeds = forecast.projected_spend > config.threshold;
        let confidence_exceeds = confidence_point > config.threshold;

        if !projected_exceeds && !confidence_exceeds {
            return Ok(None);
        }

        if let (Some(lead_days), Some(breach)) =
            (config.alert_days_before, forecast.estimated_breach_date)
        {
            let days_until_breach = days_ceil(breach - now);
            if days_until_breach > i64::from(lead_days) {
                debug!(
                    rule_id = %rule_id,
                    days_until_breach,
                    lead_days,
                    "Forecast breach outside alert lead time"
                );
                return Ok(None);
            }
        }

        let severity = if forecast.projected_utilization > 120.0 {
            Severity::Critical
        } else {
            Severity::Warning
        };

        Ok(Some(AlertTrigger {
            rule_id,
            alert_type: AlertType::ForecastExceeded,
            severity,
            current_value: forecast.projected_spend,
            threshold_value: config.threshold,
            message: format!(
                "{} spend projected to reach ${:.2}, above the ${:.2} threshold ({:.0}% of last {})",
                period.label,
                forecast.projected_spend,
                config.threshold,
                forecast.projected_utilization,
                period.unit,
            ),
            context: json!({
                "metric": config.metric,
                "projectedSpend": forecast.projected_spend,
                "threshold": config.threshold,
                "projectedUtilization": forecast.projected_utilization,
                "confidenceLevel": config.confidence_level,
                "confidenceInterval": forecast.confidence_interval,
                "confidenceAdjustedSpend": confidence_point,
                "estimatedBreachDate": forecast.estimated_breach_date,
                "daysRemaining": forecast.days_remaining,
                "currentSpend": current,
                "previousPeriodSpend": previous,
                "currentDailyBurnRate": forecast.daily_burn_rate,
                "requiredDailyRate": forecast.required_daily_rate,
                "methodBreakdown": forecast.method_breakdown,
            }),
            triggered_at: now,
        }))
    }
}

/// Weighted (1..n) mean of a daily series
fn weighted_daily(daily: &[f64]) -> Option<f64> {
    if daily.is_empty() {
        return None;
    }
    let (weighted_sum, weight_sum) = daily
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(sum, weights), (i, spend)| {
            let w = (i + 1) as f64;
            (sum + spend * w, weights + w)
        });
    Some(weighted_sum / weight_sum)
}

fn days_ceil(span: Duration) -> i64 {
    (span.num_seconds() as f64 / SECONDS_PER_DAY).ceil() as i64
}

fn percent_of(value: f64, target: f64) -> f64 {
    if target > 0.0 {
        value / target * 100.0
    } else {
        0.0
    }
}

/// Calendar month or quarter containing a time, plus the one before it
#[derive(Debug, Clone, PartialEq)]
struct CalendarPeriod {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    previous_start: DateTime<Utc>,
    label: &'static str,
    unit: &'static str,
}

impl CalendarPeriod {
    fn containing(metric: ForecastMetric, now: DateTime<Utc>) -> Result<Self> {
        let (months, label, unit) = match metric {
            ForecastMetric::MonthlyForecast => (1, "Monthly", "month"),
            ForecastMetric::QuarterlyForecast => (3, "Quarterly", "quarter"),
        };
        let first_month = (now.month0() / months) * months;
        let start_index = now.year() * 12 + first_month as i32;

        Ok(Self {
            start: month_start(start_index)?,
            end: month_start(start_index + months as i32)?,
            previous_start: month_start(start_index - months as i32)?,
            label,
            unit,
        })
    }
}

/// Midnight UTC on the first of the month `index = year * 12 + month0`
fn month_start(index: i32) -> Result<DateTime<Utc>> {
    let year = index.div_euclid(12);
    let month = index.rem_euclid(12) as u32 + 1;
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| Error::internal(format!("invalid calendar month {year}-{month}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_ensemble_weights() {
        let engine = ForecastEngine::default();
        let projected = engine.ensemble(&[100.0, 110.0, 120.0, 105.0]);
        // 20 + 27.5 + 36 + 26.25
        assert!((projected - 109.75).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_interval_widens_with_spread() {
        let engine = ForecastEngine::default();
        let mut previous_width = -1.0;
        for spread in [0.0, 5.0, 10.0, 20.0, 40.0] {
            let projections = [100.0 - spread, 100.0, 100.0 + spread, 100.0 + spread / 2.0];
            let projected = engine.ensemble(&projections);
            let ci = engine.confidence_interval(&projections, projected, 0.0);
            assert!(ci.width() > previous_width, "spread = {spread}");
            previous_width = ci.width();
        }
    }

    #[test]
    fn test_flat_history_agrees_across_methods() {
        let engine = ForecastEngine::default();
        let results = engine.project(&[10.0, 10.0, 10.0], 5, 30.0);
        for r in results {
            assert!((r.projected_spend - 80.0).abs() < 1e-9, "{:?}", r.method);
        }
        let ci = engine.confidence_interval(&results.map(|r| r.projected_spend), 80.0, 30.0);
        assert!(ci.width().abs() < 1e-9);
    }

    #[test]
    fn test_short_history_falls_back_to_current() {
        let engine = ForecastEngine::default();
        assert_eq!(engine.linear(&[], 10, 42.0), 42.0);
        assert_eq!(engine.exponential_smoothing(&[5.0], 10, 42.0), 42.0);
        assert_eq!(engine.trend_adjusted(&[5.0, 6.0], 10, 42.0), 42.0);
    }

    #[test]
    fn test_trend_adjusted_follows_slope() {
        let engine = ForecastEngine::default();
        // y = 10 + 2x; next two days are 16 and 18
        let projected = engine.trend_adjusted(&[10.0, 12.0, 14.0], 2, 36.0);
        assert!((projected - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_breach_date() {
        let engine = ForecastEngine::default();
        let now = at(2024, 3, 10, 12);
        let end = at(2024, 4, 1, 0);

        assert_eq!(engine.estimate_breach_date(&[], 120.0, 100.0, end, now), Some(now));
        assert_eq!(
            engine.estimate_breach_date(&[10.0; 5], 85.0, 100.0, end, now),
            Some(now + Duration::days(2))
        );
        assert_eq!(engine.estimate_breach_date(&[0.0; 5], 50.0, 100.0, end, now), None);
        assert_eq!(engine.estimate_breach_date(&[1.0; 5], 50.0, 100.0, end, now), None);
    }

    #[test]
    fn test_forecast_budget() {
        let engine = ForecastEngine::default();
        let budget = Budget {
            id: Uuid::new_v4(),
            org_id: "org_1".to_string(),
            name: "Platform".to_string(),
            amount: 1000.0,
            period_start: at(2024, 6, 1, 0),
            period_end: at(2024, 7, 1, 0),
            cost_center_id: None,
            team_id: None,
            project_id: None,
        };
        let daily = vec![40.0; 10];
        let forecast = engine.forecast_budget(&budget, 400.0, &daily, at(2024, 6, 10, 12));

        assert_eq!(forecast.days_remaining, 20);
        assert!((forecast.projected_spend - 1200.0).abs() < 1e-9);
        assert!((forecast.projected_utilization - 120.0).abs() < 1e-9);
        assert!((forecast.projected_overage - 200.0).abs() < 1e-9);
        assert!((forecast.daily_burn_rate - 40.0).abs() < 1e-9);
        assert!((forecast.required_daily_rate - 30.0).abs() < 1e-9);
        assert_eq!(forecast.method_breakdown.len(), 4);
        assert_eq!(
            forecast.estimated_breach_date,
            Some(at(2024, 6, 10, 12) + Duration::days(15))
        );
    }

    #[test]
    fn test_calendar_periods() {
        let now = at(2024, 1, 20, 8);
        let month = CalendarPeriod::containing(ForecastMetric::MonthlyForecast, now).unwrap();
        assert_eq!(month.start, at(2024, 1, 1, 0));
        assert_eq!(month.end, at(2024, 2, 1, 0));
        assert_eq!(month.previous_start, at(2023, 12, 1, 0));

        let quarter =
            CalendarPeriod::containing(ForecastMetric::QuarterlyForecast, at(2024, 8, 5, 0))
                .unwrap();
        assert_eq!(quarter.start, at(2024, 7, 1, 0));
        assert_eq!(quarter.end, at(2024, 10, 1, 0));
        assert_eq!(quarter.previous_start, at(2024, 4, 1, 0));
    }

    proptest! {
        #[test]
        fn prop_interval_contains_projection(
            daily in prop::collection::vec(0.0f64..500.0, 0..31),
            current in 0.0f64..10_000.0,
            remaining in 0i64..31,
        ) {
            let engine = ForecastEngine::default();
            let projections = engine.project(&daily, remaining, current).map(|r| r.projected_spend);
            let projected = engine.ensemble(&projections);
            let ci = engine.confidence_interval(&projections, projected, current);
            prop_assert!(ci.low >= current);
            prop_assert!(ci.high + 1e-9 >= projected);
        }
    }
}
