//! Statistical detection: baselines, anomaly consensus, and spend forecasts

mod anomaly;
mod forecast;
pub mod stats;

pub use anomaly::{AnomalyDetection, AnomalyDetector, AnomalyMethod};
pub use forecast::{
    BudgetForecast, ConfidenceInterval, ForecastEngine, ForecastMethod, ForecastResult,
    MethodBreakdown,
};
pub use stats::BaselineStats;
