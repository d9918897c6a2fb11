//! Personal baselines for daily physiological metrics
//!
//! A baseline is the trailing mean of a metric over a metric-specific window
//! of calendar days. Each daily value is then expressed as a deviation, a
//! deviation percentage and a z-score against that baseline. Fields are
//! `None` whenever the window holds too few samples; that absence is the
//! "no signal" channel consumers act on.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::models::DailyMetricSample;
use crate::stats;

/// Daily metrics that carry a personal baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Nightly RMSSD (ms)
    Hrv,
    /// Resting heart rate (bpm)
    RestingHeartRate,
    /// Breathing rate during sleep (breaths/min)
    BreathingRate,
    /// Average nightly SpO2 (%)
    Spo2,
    /// Nightly skin temperature relative to personal norm (°C)
    SkinTemperature,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::Hrv,
        MetricKind::RestingHeartRate,
        MetricKind::BreathingRate,
        MetricKind::Spo2,
        MetricKind::SkinTemperature,
    ];

    /// Value column in the exported CSV
    pub fn column(&self) -> &'static str {
        match self {
            MetricKind::Hrv => "daily_rmssd",
            MetricKind::RestingHeartRate => "resting_heart_rate",
            MetricKind::BreathingRate => "breathing_rate",
            MetricKind::Spo2 => "avg_spo2",
            MetricKind::SkinTemperature => "nightly_relative",
        }
    }

    /// Exported CSV file name
    pub fn file_name(&self) -> &'static str {
        match self {
            MetricKind::Hrv => "hrv.csv",
            MetricKind::RestingHeartRate => "heart_rate.csv",
            MetricKind::BreathingRate => "breathing_rate.csv",
            MetricKind::Spo2 => "spo2.csv",
            MetricKind::SkinTemperature => "temperature_skin.csv",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::Hrv => "ms",
            MetricKind::RestingHeartRate => "bpm",
            MetricKind::BreathingRate => "br/min",
            MetricKind::Spo2 => "%",
            MetricKind::SkinTemperature => "°C",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Hrv => write!(f, "HRV"),
            MetricKind::RestingHeartRate => write!(f, "Resting HR"),
            MetricKind::BreathingRate => write!(f, "Breathing Rate"),
            MetricKind::Spo2 => write!(f, "SpO2"),
            MetricKind::SkinTemperature => write!(f, "Skin Temperature"),
        }
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "hrv" => Ok(MetricKind::Hrv),
            "rhr" | "resting_heart_rate" | "heart_rate" => Ok(MetricKind::RestingHeartRate),
            "br" | "breathing_rate" => Ok(MetricKind::BreathingRate),
            "spo2" => Ok(MetricKind::Spo2),
            "temp" | "temperature" | "skin_temperature" => Ok(MetricKind::SkinTemperature),
            _ => Err(format!("Invalid metric: {}", s)),
        }
    }
}

/// Trailing window definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineWindow {
    /// Calendar days covered by the window, current day included
    pub window_days: u32,

    /// Minimum valid samples in the window before a baseline is reported
    pub min_periods: u32,
}

impl BaselineWindow {
    pub fn new(window_days: u32, min_periods: u32) -> Self {
        Self {
            window_days,
            min_periods,
        }
    }
}

/// Per-metric baseline windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineWindows {
    pub hrv: BaselineWindow,
    pub resting_heart_rate: BaselineWindow,
    pub breathing_rate: BaselineWindow,
    pub spo2: BaselineWindow,
    pub skin_temperature: BaselineWindow,
}

impl Default for BaselineWindows {
    fn default() -> Self {
        Self {
            hrv: BaselineWindow::new(60, 14),
            resting_heart_rate: BaselineWindow::new(30, 7),
            breathing_rate: BaselineWindow::new(30, 7),
            spo2: BaselineWindow::new(30, 7),
            skin_temperature: BaselineWindow::new(30, 7),
        }
    }
}

impl BaselineWindows {
    pub fn for_metric(&self, kind: MetricKind) -> BaselineWindow {
        match kind {
            MetricKind::Hrv => self.hrv,
            MetricKind::RestingHeartRate => self.resting_heart_rate,
            MetricKind::BreathingRate => self.breathing_rate,
            MetricKind::Spo2 => self.spo2,
            MetricKind::SkinTemperature => self.skin_temperature,
        }
    }
}

/// Baseline-annotated daily value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselinePoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
    /// Trailing mean over the window
    pub baseline: Option<f64>,
    /// Trailing sample standard deviation over the window
    pub baseline_std: Option<f64>,
    /// `value - baseline`
    pub deviation: Option<f64>,
    /// `deviation / baseline * 100`
    pub deviation_pct: Option<f64>,
    /// `deviation / baseline_std`
    pub z_score: Option<f64>,
}

/// Annotate every date of `series` with its trailing baseline
///
/// The window for a date `d` spans `[d - (window_days - 1), d]`. Missing
/// values inside the window are skipped; fewer than `min_periods` valid
/// samples leaves `baseline`, `baseline_std` and `z_score` as `None`. A
/// zero-spread window gives no z-score and a zero baseline gives no
/// deviation percentage.
pub fn calculate_baseline_metrics(
    series: &[DailyMetricSample],
    window: BaselineWindow,
) -> Vec<BaselinePoint> {
    let mut sorted = series.to_vec();
    sorted.sort_by_key(|s| s.date);

    let span = Duration::days(i64::from(window.window_days.max(1)) - 1);
    let mut window_start = 0usize;
    let mut points = Vec::with_capacity(sorted.len());

    for (i, sample) in sorted.iter().enumerate() {
        let earliest = sample.date - span;
        while sorted[window_start].date < earliest {
            window_start += 1;
        }

        let values: Vec<f64> = sorted[window_start..=i]
            .iter()
            .filter_map(|s| s.value)
            .filter(|v| v.is_finite())
            .collect();

        let enough = values.len() >= window.min_periods.max(1) as usize;
        let baseline = if enough { stats::mean(&values) } else { None };
        let baseline_std = if enough { stats::sample_std(&values) } else { None };

        let deviation = match (sample.value, baseline) {
            (Some(v), Some(b)) => Some(v - b),
            _ => None,
        };
        let deviation_pct = match (deviation, baseline) {
            (Some(d), Some(b)) if b != 0.0 => Some(d / b * 100.0),
            _ => None,
        };
        let z_score = match (deviation, baseline_std) {
            (Some(d), Some(s)) if s > 0.0 => Some(d / s),
            _ => None,
        };

        points.push(BaselinePoint {
            date: sample.date,
            value: sample.value,
            baseline,
            baseline_std,
            deviation,
            deviation_pct,
            z_score,
        });
    }

    debug!(
        samples = sorted.len(),
        window_days = window.window_days,
        min_periods = window.min_periods,
        with_baseline = points.iter().filter(|p| p.baseline.is_some()).count(),
        "Baseline metrics calculated"
    );

    points
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[Option<f64>]) -> Vec<DailyMetricSample> {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| DailyMetricSample::new(start + Duration::days(i as i64), *v))
            .collect()
    }

    #[test]
    fn test_below_min_periods_is_none() {
        let points = calculate_baseline_metrics(
            &series(&[Some(50.0), Some(52.0)]),
            BaselineWindow::new(30, 3),
        );
        assert!(points.iter().all(|p| p.baseline.is_none()));
        assert!(points.iter().all(|p| p.baseline_std.is_none()));
        assert!(points.iter().all(|p| p.z_score.is_none()));
    }

    #[test]
    fn test_z_score_matches_definition() {
        let points = calculate_baseline_metrics(
            &series(&[Some(50.0), Some(54.0), Some(46.0), Some(58.0)]),
            BaselineWindow::new(30, 3),
        );
        let last = points.last().unwrap();
        let baseline = last.baseline.unwrap();
        let std = last.baseline_std.unwrap();
        assert_eq!(baseline, 52.0);
        assert_eq!(last.deviation, Some(58.0 - baseline));
        assert_eq!(last.z_score, Some((58.0 - baseline) / std));
        assert_eq!(last.deviation_pct, Some((58.0 - baseline) / baseline * 100.0));
    }

    #[test]
    fn test_window_is_trailing_in_days() {
        // Third sample falls 10 days after the first; a 5-day window only sees itself and gaps
        let start = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let samples = vec![
            DailyMetricSample::new(start, Some(100.0)),
            DailyMetricSample::new(start + Duration::days(1), Some(100.0)),
            DailyMetricSample::new(start + Duration::days(10), Some(40.0)),
        ];
        let points = calculate_baseline_metrics(&samples, BaselineWindow::new(5, 1));
        assert_eq!(points[2].baseline, Some(40.0));
        assert_eq!(points[1].baseline, Some(100.0));
    }

    #[test]
    fn test_missing_values_are_skipped() {
        let points = calculate_baseline_metrics(
            &series(&[Some(10.0), None, Some(20.0), None]),
            BaselineWindow::new(7, 2),
        );
        assert_eq!(points[2].baseline, Some(15.0));
        assert_eq!(points[3].baseline, Some(15.0));
        assert_eq!(points[3].deviation, None);
        assert_eq!(points[3].z_score, None);
    }

    #[test]
    fn test_flat_series_has_no_z_score() {
        let points = calculate_baseline_metrics(
            &series(&[Some(60.0); 5]),
            BaselineWindow::new(30, 2),
        );
        let last = points.last().unwrap();
        assert_eq!(last.baseline_std, Some(0.0));
        assert_eq!(last.deviation, Some(0.0));
        assert_eq!(last.z_score, None);
    }

    #[test]
    fn test_default_windows_per_metric() {
        let windows = BaselineWindows::default();
        assert_eq!(windows.for_metric(MetricKind::Hrv).window_days, 60);
        for kind in MetricKind::ALL.iter().skip(1) {
            assert_eq!(windows.for_metric(*kind).window_days, 30);
        }
    }

    #[test]
    fn test_metric_parsing() {
        assert_eq!("rhr".parse::<MetricKind>().unwrap(), MetricKind::RestingHeartRate);
        assert_eq!("skin-temperature".parse::<MetricKind>().unwrap(), MetricKind::SkinTemperature);
        assert!("steps".parse::<MetricKind>().is_err());
    }
}
