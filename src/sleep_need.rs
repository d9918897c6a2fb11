//! Nightly sleep need estimation
//!
//! Several weak signals are estimated independently over a lookback window
//! and fused by a confidence-weighted mean:
//!
//! - habitual duration (IQR-filtered median)
//! - fixed population guidance
//! - composite performance score (HRV, efficiency, deep sleep)
//! - efficiency-gated nights
//! - HRV-gated nights
//! - sleep rebound (mean of the longest nights)
//!
//! Thin data never fails the estimate. A method without enough nights
//! reports a zero value with zero weight and drops out of the fusion.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info};

use crate::models::{Confidence, HrvRecord, SleepRecord};
use crate::stats;

/// Sleep need estimator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepNeedConfig {
    /// Days of history ending at the reference date (default: 90)
    pub lookback_days: u32,

    /// Share of longest nights used by the rebound method, in percent (default: 4.0)
    pub rebound_top_percentile: f64,

    /// Lower bound of the guidance range in hours (default: 7.0)
    pub recommended_min_hours: f64,

    /// Upper bound of the guidance range in hours (default: 9.0)
    pub recommended_max_hours: f64,

    /// Population guidance value in hours (default: 8.0)
    pub recommended_center_hours: f64,

    /// Minimum valid nights for the gated and performance methods (default: 10)
    pub min_gated_nights: usize,

    /// Minimum valid nights for the rebound method (default: 30)
    pub min_rebound_nights: usize,

    /// Quantile separating the top nights in gated methods (default: 0.70)
    pub top_fraction_quantile: f64,
}

impl Default for SleepNeedConfig {
    fn default() -> Self {
        SleepNeedConfig {
            lookback_days: 90,
            rebound_top_percentile: 4.0,
            recommended_min_hours: 7.0,
            recommended_max_hours: 9.0,
            recommended_center_hours: 8.0,
            min_gated_nights: 10,
            min_rebound_nights: 30,
            top_fraction_quantile: 0.70,
        }
    }
}

/// Estimation method together with its method-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum EstimationMethod {
    /// Median of outlier-filtered nights
    Habitual,
    /// Population guidance
    Recommended,
    /// Top nights by composite HRV/efficiency/deep-sleep score
    Performance { score_threshold: Option<f64> },
    /// Top nights by efficiency
    Efficiency { efficiency_threshold: Option<f64> },
    /// Top nights by nightly RMSSD
    HrvGated { rmssd_threshold: Option<f64> },
    /// Mean of the longest nights
    SleepRebound {
        top_percentile: f64,
        window_median_hours: Option<f64>,
    },
}

impl EstimationMethod {
    pub fn key(&self) -> &'static str {
        match self {
            EstimationMethod::Habitual => "habitual",
            EstimationMethod::Recommended => "recommended",
            EstimationMethod::Performance { .. } => "performance",
            EstimationMethod::Efficiency { .. } => "efficiency",
            EstimationMethod::HrvGated { .. } => "hrv",
            EstimationMethod::SleepRebound { .. } => "sleep_rebound",
        }
    }
}

impl fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EstimationMethod::Habitual => write!(f, "Habitual sleep duration"),
            EstimationMethod::Recommended => write!(f, "Population guidance"),
            EstimationMethod::Performance { .. } => write!(f, "Composite performance score"),
            EstimationMethod::Efficiency { .. } => write!(f, "High-efficiency nights"),
            EstimationMethod::HrvGated { .. } => write!(f, "High-HRV nights"),
            EstimationMethod::SleepRebound { .. } => write!(f, "Sleep rebound"),
        }
    }
}

/// A single method's estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepNeedEstimate {
    pub method: EstimationMethod,
    /// Estimated nightly need in hours; 0 when the method had too little data
    pub value_hours: f64,
    pub confidence: Confidence,
    /// Nights the value was derived from
    pub sample_size: usize,
    pub note: String,
    /// Fusion weight; 0 excludes the estimate
    pub weight: f64,
}

impl SleepNeedEstimate {
    fn insufficient(method: EstimationMethod, sample_size: usize, note: String) -> Self {
        SleepNeedEstimate {
            method,
            value_hours: 0.0,
            confidence: Confidence::Low,
            sample_size,
            note,
            weight: 0.0,
        }
    }

    /// Whether the estimate takes part in the fusion
    pub fn is_usable(&self) -> bool {
        self.value_hours > 0.0 && self.weight > 0.0
    }
}

/// All method estimates of one run
///
/// Performance and HRV-gated estimates exist only when HRV data was supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodEstimates {
    pub habitual: SleepNeedEstimate,
    pub recommended: SleepNeedEstimate,
    pub performance: Option<SleepNeedEstimate>,
    pub efficiency: SleepNeedEstimate,
    pub hrv: Option<SleepNeedEstimate>,
    pub sleep_rebound: SleepNeedEstimate,
}

impl MethodEstimates {
    pub fn iter(&self) -> impl Iterator<Item = &SleepNeedEstimate> {
        [
            Some(&self.habitual),
            Some(&self.recommended),
            self.performance.as_ref(),
            Some(&self.efficiency),
            self.hrv.as_ref(),
            Some(&self.sleep_rebound),
        ]
        .into_iter()
        .flatten()
    }
}

/// Fused sleep need
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedSleepNeed {
    /// Reference date of the lookback window
    pub end_date: Option<NaiveDate>,
    /// Fused recommendation, always inside the guidance range (hours, 1 dp)
    pub recommended_hours: f64,
    /// Habitual duration (hours, 1 dp)
    pub habitual_hours: f64,
    /// `max(0, recommended - habitual)` (hours, 1 dp)
    pub potential_debt_hours: f64,
    pub confidence: Confidence,
    pub estimates: MethodEstimates,
    pub note: String,
}

/// One night with the columns the estimators read
#[derive(Debug, Clone, Copy)]
struct Night {
    minutes_asleep: f64,
    efficiency: Option<f64>,
    deep_minutes: Option<f64>,
    daily_rmssd: Option<f64>,
}

/// Confidence-weighted sleep need estimator
pub struct SleepNeedEstimator {
    records: Vec<SleepRecord>,
    hrv_by_date: Option<HashMap<NaiveDate, Option<f64>>>,
    config: SleepNeedConfig,
}

impl SleepNeedEstimator {
    /// Create estimator with default configuration
    pub fn new(records: &[SleepRecord], hrv: Option<&[HrvRecord]>) -> Self {
        Self::with_config(records, hrv, SleepNeedConfig::default())
    }

    /// Create estimator with custom configuration
    pub fn with_config(
        records: &[SleepRecord],
        hrv: Option<&[HrvRecord]>,
        config: SleepNeedConfig,
    ) -> Self {
        let hrv_by_date = hrv.map(|rows| {
            rows.iter()
                .map(|r| (r.date, r.daily_rmssd))
                .collect::<HashMap<_, _>>()
        });

        SleepNeedEstimator {
            records: records.to_vec(),
            hrv_by_date,
            config,
        }
    }

    pub fn config(&self) -> &SleepNeedConfig {
        &self.config
    }

    /// Estimate sleep need over the lookback window ending at `end_date`
    /// (default: latest night in the data)
    pub fn estimate(&self, end_date: Option<NaiveDate>) -> IntegratedSleepNeed {
        let end_date = end_date.or_else(|| self.records.iter().map(|r| r.date_of_sleep).max());
        let nights = self.window(end_date);

        debug!(
            end_date = ?end_date,
            nights = nights.len(),
            lookback_days = self.config.lookback_days,
            "Sleep need window selected"
        );

        let estimates = self.estimate_all_methods(&nights);
        for estimate in estimates.iter().filter(|e| !e.is_usable()) {
            debug!(method = estimate.method.key(), sample_size = estimate.sample_size, "Estimate excluded from fusion");
        }

        let integrated = self.integrate(&estimates);
        let habitual = estimates.habitual.value_hours;
        let potential_debt = (integrated - habitual).max(0.0);
        let confidence = self.assess_confidence(&estimates);
        let note = self.recommendation_note(integrated, habitual);

        info!(
            recommended_hours = integrated,
            habitual_hours = habitual,
            %confidence,
            "Sleep need estimated"
        );

        IntegratedSleepNeed {
            end_date,
            recommended_hours: stats::round_to(integrated, 1),
            habitual_hours: stats::round_to(habitual, 1),
            potential_debt_hours: stats::round_to(potential_debt, 1),
            confidence,
            estimates,
            note,
        }
    }

    fn window(&self, end_date: Option<NaiveDate>) -> Vec<Night> {
        let Some(end) = end_date else {
            return Vec::new();
        };
        let start = end - Duration::days(i64::from(self.config.lookback_days.max(1)) - 1);

        self.records
            .iter()
            .filter(|r| r.date_of_sleep >= start && r.date_of_sleep <= end)
            .map(|r| Night {
                minutes_asleep: r.minutes_asleep,
                efficiency: r.efficiency,
                deep_minutes: r.deep_minutes,
                daily_rmssd: self
                    .hrv_by_date
                    .as_ref()
                    .and_then(|m| m.get(&r.date_of_sleep).copied().flatten()),
            })
            .collect()
    }

    fn estimate_all_methods(&self, nights: &[Night]) -> MethodEstimates {
        let with_hrv = self.hrv_by_date.is_some();
        MethodEstimates {
            habitual: self.estimate_habitual(nights),
            recommended: self.estimate_recommended(),
            performance: with_hrv.then(|| self.estimate_by_performance(nights)),
            efficiency: self.estimate_by_efficiency(nights),
            hrv: with_hrv.then(|| self.estimate_by_hrv(nights)),
            sleep_rebound: self.estimate_by_sleep_rebound(nights),
        }
    }

    fn estimate_habitual(&self, nights: &[Night]) -> SleepNeedEstimate {
        let minutes: Vec<f64> = nights
            .iter()
            .map(|n| n.minutes_asleep)
            .filter(|m| m.is_finite())
            .collect();
        let filtered = stats::iqr_filter(&minutes);

        let Some(median) = stats::median(&filtered) else {
            return SleepNeedEstimate::insufficient(
                EstimationMethod::Habitual,
                0,
                "No nights in the lookback window.".to_string(),
            );
        };
        let hours = median / 60.0;

        let (confidence, weight, note) = if hours < self.config.recommended_min_hours {
            (
                Confidence::Low,
                0.5,
                format!(
                    "Below the recommended range ({}-{}h). Possible chronic sleep restriction.",
                    self.config.recommended_min_hours, self.config.recommended_max_hours
                ),
            )
        } else if hours > self.config.recommended_max_hours {
            (
                Confidence::Medium,
                1.0,
                "Above the recommended range, possibly within individual variation.".to_string(),
            )
        } else {
            (Confidence::High, 2.0, "Within the recommended range.".to_string())
        };

        SleepNeedEstimate {
            method: EstimationMethod::Habitual,
            value_hours: stats::round_to(hours, 2),
            confidence,
            sample_size: filtered.len(),
            note,
            weight,
        }
    }

    fn estimate_recommended(&self) -> SleepNeedEstimate {
        SleepNeedEstimate {
            method: EstimationMethod::Recommended,
            value_hours: self.config.recommended_center_hours,
            confidence: Confidence::High,
            sample_size: 0,
            note: "Adult guidance from large population studies. Individual needs vary.".to_string(),
            weight: 5.0,
        }
    }

    fn estimate_by_performance(&self, nights: &[Night]) -> SleepNeedEstimate {
        // (night, rmssd, efficiency, deep %); nights missing any of them are left out
        let valid: Vec<(Night, f64, f64, f64)> = nights
            .iter()
            .filter_map(|n| match (n.daily_rmssd, n.efficiency, n.deep_minutes) {
                (Some(hrv), Some(eff), Some(deep))
                    if n.minutes_asleep.is_finite() && n.minutes_asleep > 0.0 && deep.is_finite() =>
                {
                    Some((*n, hrv, eff, deep / n.minutes_asleep * 100.0))
                }
                _ => None,
            })
            .collect();

        if valid.len() < self.config.min_gated_nights {
            return SleepNeedEstimate::insufficient(
                EstimationMethod::Performance { score_threshold: None },
                valid.len(),
                format!(
                    "Insufficient data ({} nights). At least {} required.",
                    valid.len(),
                    self.config.min_gated_nights
                ),
            );
        }

        let hrv: Vec<f64> = valid.iter().map(|(_, h, _, _)| *h).collect();
        let eff: Vec<f64> = valid.iter().map(|(_, _, e, _)| *e).collect();
        let deep_pct: Vec<f64> = valid.iter().map(|(_, _, _, d)| *d).collect();

        let hrv_norm = z_normalize(&hrv);
        let eff_norm = z_normalize(&eff);
        // A constant deep share carries no ranking signal
        let deep_norm = z_normalize(&deep_pct).unwrap_or_else(|| vec![0.0; deep_pct.len()]);

        let (Some(hrv_norm), Some(eff_norm)) = (hrv_norm, eff_norm) else {
            return SleepNeedEstimate::insufficient(
                EstimationMethod::Performance { score_threshold: None },
                valid.len(),
                "HRV or efficiency shows no variation across nights.".to_string(),
            );
        };

        let scores: Vec<f64> = (0..valid.len())
            .map(|i| hrv_norm[i] * 0.4 + eff_norm[i] * 0.4 + deep_norm[i] * 0.2)
            .collect();

        let Some(threshold) = stats::quantile(&scores, self.config.top_fraction_quantile) else {
            return SleepNeedEstimate::insufficient(
                EstimationMethod::Performance { score_threshold: None },
                valid.len(),
                "Composite score could not be computed.".to_string(),
            );
        };

        let top_minutes: Vec<f64> = valid
            .iter()
            .zip(&scores)
            .filter(|(_, s)| **s >= threshold)
            .map(|((n, _, _, _), _)| n.minutes_asleep)
            .collect();

        let Some(median) = stats::median(&top_minutes) else {
            return SleepNeedEstimate::insufficient(
                EstimationMethod::Performance { score_threshold: Some(threshold) },
                0,
                "No nights above the composite score threshold.".to_string(),
            );
        };

        let (confidence, weight) = match top_minutes.len() {
            n if n >= 10 => (Confidence::High, 3.0),
            n if n >= 5 => (Confidence::Medium, 2.0),
            _ => (Confidence::Low, 1.0),
        };

        SleepNeedEstimate {
            method: EstimationMethod::Performance { score_threshold: Some(threshold) },
            value_hours: stats::round_to(median / 60.0, 2),
            confidence,
            sample_size: top_minutes.len(),
            note: "Sleep duration on the top 30% of nights by combined HRV, efficiency and deep sleep."
                .to_string(),
            weight,
        }
    }

    fn estimate_by_efficiency(&self, nights: &[Night]) -> SleepNeedEstimate {
        let valid: Vec<(f64, f64)> = nights
            .iter()
            .filter_map(|n| n.efficiency.map(|e| (e, n.minutes_asleep)))
            .collect();

        match self.gated_median(&valid) {
            None => SleepNeedEstimate::insufficient(
                EstimationMethod::Efficiency { efficiency_threshold: None },
                valid.len(),
                "Insufficient data.".to_string(),
            ),
            Some((threshold, median, count)) => SleepNeedEstimate {
                method: EstimationMethod::Efficiency { efficiency_threshold: Some(threshold) },
                value_hours: stats::round_to(median / 60.0, 2),
                confidence: Confidence::Medium,
                sample_size: count,
                note: format!("Sleep duration on nights with efficiency >= {:.0}%.", threshold),
                weight: 2.0,
            },
        }
    }

    fn estimate_by_hrv(&self, nights: &[Night]) -> SleepNeedEstimate {
        let valid: Vec<(f64, f64)> = nights
            .iter()
            .filter_map(|n| n.daily_rmssd.map(|h| (h, n.minutes_asleep)))
            .collect();

        match self.gated_median(&valid) {
            None => SleepNeedEstimate::insufficient(
                EstimationMethod::HrvGated { rmssd_threshold: None },
                valid.len(),
                "Insufficient data.".to_string(),
            ),
            Some((threshold, median, count)) => SleepNeedEstimate {
                method: EstimationMethod::HrvGated { rmssd_threshold: Some(threshold) },
                value_hours: stats::round_to(median / 60.0, 2),
                // HRV correlates only weakly with duration
                confidence: Confidence::Low,
                sample_size: count,
                note: "HRV and sleep duration correlate weakly (r≈0.12). Reference only.".to_string(),
                weight: 1.0,
            },
        }
    }

    /// Median minutes of nights whose gate value reaches the top quantile
    ///
    /// Returns `(threshold, median_minutes, nights_selected)`.
    fn gated_median(&self, rows: &[(f64, f64)]) -> Option<(f64, f64, usize)> {
        let rows: Vec<(f64, f64)> = rows
            .iter()
            .copied()
            .filter(|(g, m)| g.is_finite() && m.is_finite())
            .collect();
        if rows.len() < self.config.min_gated_nights {
            return None;
        }

        let gates: Vec<f64> = rows.iter().map(|(g, _)| *g).collect();
        let threshold = stats::quantile(&gates, self.config.top_fraction_quantile)?;
        let top: Vec<f64> = rows
            .iter()
            .filter(|(g, _)| *g >= threshold)
            .map(|(_, m)| *m)
            .collect();
        let median = stats::median(&top)?;
        Some((threshold, median, top.len()))
    }

    fn estimate_by_sleep_rebound(&self, nights: &[Night]) -> SleepNeedEstimate {
        let top_percentile = self.config.rebound_top_percentile;
        let mut minutes: Vec<f64> = nights
            .iter()
            .map(|n| n.minutes_asleep)
            .filter(|m| m.is_finite())
            .collect();

        if minutes.len() < self.config.min_rebound_nights {
            return SleepNeedEstimate::insufficient(
                EstimationMethod::SleepRebound {
                    top_percentile,
                    window_median_hours: None,
                },
                minutes.len(),
                format!(
                    "Insufficient data. At least {} nights required.",
                    self.config.min_rebound_nights
                ),
            );
        }

        let window_median_hours = stats::median(&minutes).map(|m| m / 60.0);
        let n_samples = rebound_sample_count(minutes.len(), top_percentile);

        minutes.sort_by(|a, b| b.total_cmp(a));
        let value_hours = stats::mean(&minutes[..n_samples]).unwrap_or(0.0) / 60.0;

        let (confidence, weight) = match n_samples {
            n if n >= 10 => (Confidence::High, 2.5),
            n if n >= 5 => (Confidence::Medium, 1.5),
            _ => (Confidence::Low, 0.5),
        };

        let habitual = window_median_hours.unwrap_or(0.0);
        SleepNeedEstimate {
            method: EstimationMethod::SleepRebound {
                top_percentile,
                window_median_hours,
            },
            value_hours: stats::round_to(value_hours, 2),
            confidence,
            sample_size: n_samples,
            note: format!(
                "Mean of the longest {:.1}% of nights ({} nights). {:.1}h longer than the usual {:.1}h, suggesting recovery from sleep debt.",
                top_percentile,
                n_samples,
                value_hours - habitual,
                habitual
            ),
            weight,
        }
    }

    fn integrate(&self, estimates: &MethodEstimates) -> f64 {
        let (weighted_sum, total_weight) = estimates
            .iter()
            .filter(|e| e.is_usable())
            .fold((0.0, 0.0), |(sum, total), e| {
                (sum + e.value_hours * e.weight, total + e.weight)
            });

        let integrated = if total_weight > 0.0 {
            weighted_sum / total_weight
        } else {
            self.config.recommended_center_hours
        };

        integrated.clamp(
            self.config.recommended_min_hours,
            self.config.recommended_max_hours,
        )
    }

    fn assess_confidence(&self, estimates: &MethodEstimates) -> Confidence {
        if estimates.habitual.sample_size < 30 {
            Confidence::Low
        } else if estimates.habitual.confidence != Confidence::Low {
            // Low habitual confidence marks a median below the guidance range
            Confidence::High
        } else {
            Confidence::Medium
        }
    }

    fn recommendation_note(&self, integrated: f64, habitual: f64) -> String {
        let diff = integrated - habitual;
        if diff > 0.5 {
            format!(
                "Habitual sleep ({:.1}h) may be {:.1}h short of the recommendation. Try sleeping at least {}h and watch how performance changes.",
                habitual, diff, self.config.recommended_min_hours
            )
        } else if diff < -0.5 {
            "Current sleep duration is sufficient.".to_string()
        } else {
            "Current sleep duration is appropriate.".to_string()
        }
    }
}

/// Nights selected by the rebound method: `max(1, floor(n * pct / 100))`
pub fn rebound_sample_count(nights: usize, top_percentile: f64) -> usize {
    let n = (nights as f64 * top_percentile / 100.0).floor();
    (n.max(1.0) as usize).min(nights.max(1))
}

/// `(x - mean) / sample_std`; `None` when the spread is zero or undefined
fn z_normalize(values: &[f64]) -> Option<Vec<f64>> {
    let mean = stats::mean(values)?;
    let std = stats::sample_std(values)?;
    if std <= 0.0 {
        return None;
    }
    Some(values.iter().map(|v| (v - mean) / std).collect())
}
