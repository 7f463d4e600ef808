//! Analytics adapter: the narrow seam to the trend/volatility/forecast/anomaly
//! collaborators.
//!
//! The engine treats these as black boxes and only gates them on minimum
//! sample counts. `StatAnalytics` is the in-process stand-in (simple linear
//! fits and z-scores) used by the demo binary and tests; a production
//! deployment swaps in a client for the real analytics service behind the
//! same trait.

use async_trait::async_trait;
use chrono::Duration;

use caissa_models::{AnomalyPoint, Forecast, ForecastPoint, Sample, Trend, TrendDirection, Volatility};

/// Options for a volatility analysis pass.
#[derive(Debug, Clone, Copy)]
pub struct VolatilityOptions {
    /// Sliding window length in samples.
    pub window: usize,
}

impl Default for VolatilityOptions {
    fn default() -> Self {
        Self { window: 100 }
    }
}

/// Collaborator contract for the statistical signals.
#[async_trait]
pub trait Analytics: Send + Sync {
    async fn analyze_trend(&self, series: &[Sample]) -> anyhow::Result<Trend>;

    async fn analyze_volatility(
        &self,
        series: &[Sample],
        opts: VolatilityOptions,
    ) -> anyhow::Result<Volatility>;

    async fn generate_forecast(&self, series: &[Sample], horizon: usize) -> anyhow::Result<Forecast>;

    /// Returns points whose score exceeds `score_cutoff`.
    async fn detect_anomalies(
        &self,
        series: &[Sample],
        score_cutoff: f64,
    ) -> anyhow::Result<Vec<AnomalyPoint>>;
}

/// In-process statistical implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatAnalytics;

/// Slope threshold below which a trend reads as stable.
const STABLE_SLOPE: f64 = 0.1;

/// Sub-window length for the volatility dispersion series.
const VOLATILITY_CHUNK: usize = 10;

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Least-squares fit over `values` with x = 0..n. Returns (slope, intercept, r2).
fn linear_fit(values: &[f64]) -> (f64, f64, f64) {
    let n = values.len() as f64;
    if values.len() < 2 {
        return (0.0, values.first().copied().unwrap_or(0.0), 0.0);
    }
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        let dy = y - y_mean;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 {
        return (0.0, y_mean, 0.0);
    }
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;
    let r2 = if syy == 0.0 { 1.0 } else { (sxy * sxy) / (sxx * syy) };
    (slope, intercept, r2)
}

fn direction_for(slope: f64) -> TrendDirection {
    if slope > STABLE_SLOPE {
        TrendDirection::Improving
    } else if slope < -STABLE_SLOPE {
        TrendDirection::Declining
    } else {
        TrendDirection::Stable
    }
}

#[async_trait]
impl Analytics for StatAnalytics {
    async fn analyze_trend(&self, series: &[Sample]) -> anyhow::Result<Trend> {
        anyhow::ensure!(series.len() >= 2, "trend needs at least two samples");
        let values: Vec<f64> = series.iter().map(|s| s.value).collect();
        let (slope, _, _) = linear_fit(&values);
        let change = values[values.len() - 1] - values[0];
        Ok(Trend {
            direction: direction_for(slope),
            change,
            slope,
        })
    }

    async fn analyze_volatility(
        &self,
        series: &[Sample],
        opts: VolatilityOptions,
    ) -> anyhow::Result<Volatility> {
        anyhow::ensure!(series.len() >= 2, "volatility needs at least two samples");
        let start = series.len().saturating_sub(opts.window);
        let values: Vec<f64> = series[start..].iter().map(|s| s.value).collect();

        let dispersions: Vec<f64> = values
            .chunks(VOLATILITY_CHUNK)
            .filter(|chunk| chunk.len() >= 2)
            .map(std_dev)
            .collect();
        let current = dispersions.last().copied().unwrap_or_else(|| std_dev(&values));
        let mean_dispersion = if dispersions.is_empty() {
            std_dev(&values)
        } else {
            mean(&dispersions)
        };
        let persistence = if dispersions.is_empty() {
            0.0
        } else {
            dispersions.iter().filter(|d| **d > mean_dispersion).count() as f64
                / dispersions.len() as f64
        };

        Ok(Volatility {
            current,
            mean: mean_dispersion,
            persistence,
        })
    }

    async fn generate_forecast(&self, series: &[Sample], horizon: usize) -> anyhow::Result<Forecast> {
        anyhow::ensure!(series.len() >= 2, "forecast needs at least two samples");
        let values: Vec<f64> = series.iter().map(|s| s.value).collect();
        let (slope, intercept, r2) = linear_fit(&values);

        // Project at the stream's average sampling spacing.
        let first_ts = series[0].ts;
        let last_ts = series[series.len() - 1].ts;
        let avg_spacing = (last_ts - first_ts) / (series.len() as i32 - 1).max(1);
        let spacing = if avg_spacing > Duration::zero() {
            avg_spacing
        } else {
            Duration::seconds(1)
        };

        let n = values.len() as f64;
        let points = (1..=horizon)
            .map(|step| ForecastPoint {
                ts: last_ts + spacing * step as i32,
                value: intercept + slope * (n - 1.0 + step as f64),
            })
            .collect();

        Ok(Forecast {
            values: points,
            trend: direction_for(slope),
            confidence: r2.clamp(0.0, 1.0),
        })
    }

    async fn detect_anomalies(
        &self,
        series: &[Sample],
        score_cutoff: f64,
    ) -> anyhow::Result<Vec<AnomalyPoint>> {
        let values: Vec<f64> = series.iter().map(|s| s.value).collect();
        let m = mean(&values);
        let sd = std_dev(&values);
        if sd == 0.0 {
            return Ok(Vec::new());
        }
        Ok(series
            .iter()
            .filter_map(|s| {
                let score = (s.value - m).abs() / sd;
                (score > score_cutoff).then_some(AnomalyPoint {
                    ts: s.ts,
                    value: s.value,
                    score,
                })
            })
            .collect())
    }
}
