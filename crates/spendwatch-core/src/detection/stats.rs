//! Descriptive statistics over cost samples

use serde::{Deserialize, Serialize};

/// Arithmetic mean; 0 for an empty sample
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around `mean`
pub fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Median; even-length samples average the two middle values
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let sorted = sorted(values);
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Median absolute deviation around `median`
pub fn mad(values: &[f64], median_value: f64) -> f64 {
    let deviations: Vec<f64> = values.iter().map(|v| (v - median_value).abs()).collect();
    median(&deviations)
}

/// First and third quartiles by nearest-rank on the sorted sample
pub fn quartiles(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let sorted = sorted(values);
    let n = sorted.len();
    let q1 = sorted[(n as f64 * 0.25).floor() as usize];
    let q3 = sorted[((n as f64 * 0.75).floor() as usize).min(n - 1)];
    (q1, q3)
}

/// Summary of a historical sample used as an anomaly baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub mad: f64,
    pub q1: f64,
    pub q3: f64,
    pub min: f64,
    pub max: f64,
    pub data_points: usize,
}

impl BaselineStats {
    /// Compute stats for a sample; fewer than three points yields `None`
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.len() < 3 {
            return None;
        }
        let sorted = sorted(values);
        let mean = mean(&sorted);
        let median = median(&sorted);
        let (q1, q3) = quartiles(&sorted);

        Some(Self {
            mean,
            std_dev: std_dev(&sorted, mean),
            median,
            mad: mad(&sorted, median),
            q1,
            q3,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            data_points: sorted.len(),
        })
    }

    /// Interquartile range
    pub fn iqr(&self) -> f64 {
        self.q3 - self.q1
    }
}
