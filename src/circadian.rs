//! Circadian rhythm of heart rate
//!
//! Intraday heart rate, with sleep and exercise removed, is averaged per
//! hour of day and fitted with a two-harmonic model
//!
//! `CR(t) = mu + A1 sin(2πt/24 + phi1) + A2 sin(2πt/12 + phi2)`
//!
//! by Levenberg-Marquardt least squares. The fitted curve gives the
//! circadian amplitude, the bathyphase (daily minimum) and the acrophase
//! (daily maximum).

use chrono::{NaiveDateTime, Timelike};
use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{ActivityPeriod, HeartRateSample, SleepRecord};
use crate::stats;

type Params = SVector<f64, 5>;
type Normal = SMatrix<f64, 5, 5>;

const CURVE_RESOLUTION: usize = 1000;
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e15;
const DAMPING_FLOOR: f64 = 1e-9;

/// Circadian fit errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Insufficient points for circadian fit: need {required}, found {found}")]
    InsufficientPoints { required: usize, found: usize },
    #[error("Circadian fit did not converge after {iterations} iterations")]
    DidNotConverge { iterations: usize },
    #[error("Normal equations are singular")]
    SingularSystem,
}

/// Circadian analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircadianConfig {
    /// Drop heart rate recorded during sleep sessions
    pub exclude_sleep: bool,

    /// Drop heart rate recorded during logged exercise
    pub exclude_activity: bool,

    /// Minimum hourly bins with data (default: 6)
    pub min_valid_hours: usize,

    /// Levenberg-Marquardt iteration limit (default: 200)
    pub max_iterations: usize,

    /// Relative change in residual or step size that ends the fit (default: 1e-10)
    pub tolerance: f64,
}

impl Default for CircadianConfig {
    fn default() -> Self {
        CircadianConfig {
            exclude_sleep: true,
            exclude_activity: true,
            min_valid_hours: 6,
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

/// Evaluate the two-harmonic model at hour `t`
pub fn two_harmonic_model(t: f64, mu: f64, a1: f64, phi1: f64, a2: f64, phi2: f64) -> f64 {
    mu + a1 * (2.0 * PI * t / 24.0 + phi1).sin() + a2 * (2.0 * PI * t / 12.0 + phi2).sin()
}

/// Fitted circadian parameters and derived measures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircadianFit {
    /// 24-hour mean (bpm)
    pub mu: f64,
    /// 24-hour harmonic amplitude (bpm)
    pub a1: f64,
    /// 24-hour harmonic phase (rad)
    pub phi1: f64,
    /// 12-hour harmonic amplitude (bpm)
    pub a2: f64,
    /// 12-hour harmonic phase (rad)
    pub phi2: f64,
    /// Circadian amplitude `sqrt(A1² + A2²)`
    pub a_cr: f64,
    /// Hour of the fitted minimum
    pub bathyphase: f64,
    /// Hour of the fitted maximum
    pub acrophase: f64,
    /// `None` when the data has no variance
    pub r_squared: Option<f64>,
    /// `None` when A1 is zero
    pub a2_a1_ratio: Option<f64>,
    /// Variance explained by the 24-hour harmonic alone (%)
    pub variance_1st_pct: Option<f64>,
    pub n_points: usize,
    pub iterations: usize,
}

impl CircadianFit {
    fn from_params(p: &Params) -> Self {
        let (mu, a1, phi1, a2, phi2) = (p[0], p[1], p[2], p[3], p[4]);
        CircadianFit {
            mu,
            a1,
            phi1,
            a2,
            phi2,
            a_cr: (a1 * a1 + a2 * a2).sqrt(),
            bathyphase: 0.0,
            acrophase: 0.0,
            r_squared: None,
            a2_a1_ratio: (a1 != 0.0).then(|| a2 / a1),
            variance_1st_pct: None,
            n_points: 0,
            iterations: 0,
        }
    }

    /// Fitted value at hour `t`
    pub fn predict(&self, t: f64) -> f64 {
        two_harmonic_model(t, self.mu, self.a1, self.phi1, self.a2, self.phi2)
    }

    /// Fitted curve sampled at `n` evenly spaced hours over [0, 24]
    pub fn curve(&self, n: usize) -> Vec<(f64, f64)> {
        stats::linspace(0.0, 24.0, n)
            .into_iter()
            .map(|t| (t, self.predict(t)))
            .collect()
    }
}

fn model(p: &Params, t: f64) -> f64 {
    two_harmonic_model(t, p[0], p[1], p[2], p[3], p[4])
}

fn jacobian_row(p: &Params, t: f64) -> Params {
    let w1 = 2.0 * PI * t / 24.0 + p[2];
    let w2 = 2.0 * PI * t / 12.0 + p[4];
    Params::new(1.0, w1.sin(), p[1] * w1.cos(), w2.sin(), p[3] * w2.cos())
}

fn sum_squared_residuals(p: &Params, points: &[(f64, f64)]) -> f64 {
    points.iter().map(|(t, y)| (y - model(p, *t)).powi(2)).sum()
}

fn solve(a: Normal, b: Params) -> Option<Params> {
    match a.cholesky() {
        Some(chol) => Some(chol.solve(&b)),
        None => a.try_inverse().map(|inv| inv * b),
    }
}

/// Fit the two-harmonic model to `(hour, value)` points
pub fn fit_circadian_points(
    points: &[(f64, f64)],
    config: &CircadianConfig,
) -> Result<CircadianFit, FitError> {
    let points: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|(t, y)| t.is_finite() && y.is_finite())
        .collect();

    let required = config.min_valid_hours.max(5);
    if points.len() < required {
        return Err(FitError::InsufficientPoints {
            required,
            found: points.len(),
        });
    }

    let ys: Vec<f64> = points.iter().map(|(_, y)| *y).collect();
    let y_mean = stats::mean(&ys).ok_or(FitError::InsufficientPoints {
        required,
        found: 0,
    })?;
    let y_max = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let y_min = ys.iter().copied().fold(f64::INFINITY, f64::min);
    let a1_init = (y_max - y_min) / 2.0;

    let mut p = Params::new(y_mean, a1_init, 0.0, a1_init / 4.0, 0.0);
    let mut sse = sum_squared_residuals(&p, &points);
    let mut lambda = LAMBDA_INIT;
    let mut iterations = 0;
    let mut converged = false;

    'outer: while iterations < config.max_iterations {
        iterations += 1;

        let mut jtj = Normal::zeros();
        let mut jtr = Params::zeros();
        for (t, y) in &points {
            let row = jacobian_row(&p, *t);
            jtj += row * row.transpose();
            jtr += row * (y - model(&p, *t));
        }

        loop {
            let mut damped = jtj;
            for i in 0..5 {
                damped[(i, i)] += lambda * jtj[(i, i)].max(DAMPING_FLOOR);
            }

            let Some(step) = solve(damped, jtr) else {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    return Err(FitError::SingularSystem);
                }
                continue;
            };

            let candidate = p + step;
            let candidate_sse = sum_squared_residuals(&candidate, &points);

            if candidate_sse.is_finite() && candidate_sse < sse {
                let reduction = sse - candidate_sse;
                let small_step = step.norm() <= config.tolerance * (p.norm() + config.tolerance);
                p = candidate;
                lambda = (lambda / 10.0).max(1e-12);

                if reduction <= config.tolerance * sse || small_step {
                    sse = candidate_sse;
                    converged = true;
                    break 'outer;
                }
                sse = candidate_sse;
                break;
            }

            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                // No descent direction left; already at the minimum
                converged = true;
                break 'outer;
            }
        }
    }

    if !converged {
        return Err(FitError::DidNotConverge { iterations });
    }

    let mut fit = CircadianFit::from_params(&p);
    fit.n_points = points.len();
    fit.iterations = iterations;

    let curve = fit.curve(CURVE_RESOLUTION);
    if let Some((t, _)) = curve.iter().min_by(|a, b| a.1.total_cmp(&b.1)) {
        fit.bathyphase = *t;
    }
    if let Some((t, _)) = curve.iter().max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.total_cmp(&a.0))) {
        fit.acrophase = *t;
    }

    let ss_total: f64 = ys.iter().map(|y| (y - y_mean).powi(2)).sum();
    if ss_total > 0.0 {
        fit.r_squared = Some(1.0 - sse / ss_total);
        let ss_first: f64 = points
            .iter()
            .map(|(t, _)| (fit.a1 * (2.0 * PI * t / 24.0 + fit.phi1).sin()).powi(2))
            .sum();
        fit.variance_1st_pct = Some(ss_first / ss_total * 100.0);
    }

    debug!(
        iterations,
        sse,
        points = fit.n_points,
        "Circadian fit converged"
    );

    Ok(fit)
}

/// Fit the model to 24 hourly means; `None` bins are skipped
pub fn fit_circadian_rhythm(
    hourly: &[Option<f64>],
    config: &CircadianConfig,
) -> Result<CircadianFit, FitError> {
    let points: Vec<(f64, f64)> = hourly
        .iter()
        .enumerate()
        .filter_map(|(hour, v)| v.map(|v| (hour as f64, v)))
        .collect();
    fit_circadian_points(&points, config)
}

fn exclude_periods(samples: &[HeartRateSample], periods: &[ActivityPeriod]) -> Vec<HeartRateSample> {
    samples
        .iter()
        .filter(|s| !periods.iter().any(|p| p.contains(s.datetime)))
        .copied()
        .collect()
}

/// Drop samples inside any sleep session (bounds inclusive)
pub fn exclude_sleep_periods(samples: &[HeartRateSample], sleep: &[SleepRecord]) -> Vec<HeartRateSample> {
    let periods: Vec<ActivityPeriod> = sleep
        .iter()
        .filter_map(|r| match (r.start_time, r.end_time) {
            (Some(start), Some(end)) => Some(ActivityPeriod { start, end }),
            _ => None,
        })
        .collect();
    exclude_periods(samples, &periods)
}

/// Drop samples inside any exercise period (bounds inclusive)
pub fn exclude_activity_periods(
    samples: &[HeartRateSample],
    activities: &[ActivityPeriod],
) -> Vec<HeartRateSample> {
    exclude_periods(samples, activities)
}

/// Mean heart rate per hour of day; `None` where an hour has no samples
pub fn prepare_hourly_data(samples: &[HeartRateSample]) -> Vec<Option<f64>> {
    let mut sums = [0.0f64; 24];
    let mut counts = [0usize; 24];
    for s in samples {
        let hour = s.datetime.hour() as usize;
        sums[hour] += s.heart_rate;
        counts[hour] += 1;
    }
    sums.iter()
        .zip(counts.iter())
        .map(|(sum, count)| (*count > 0).then(|| sum / *count as f64))
        .collect()
}

/// Mean heart rate per time-of-day bin of `interval_minutes`
///
/// Times are rounded to the nearest bin (ties to even). Returns
/// `(hour_decimal, mean)` pairs ordered by time.
pub fn prepare_binned_data(samples: &[HeartRateSample], interval_minutes: u32) -> Vec<(f64, f64)> {
    let bins_per_hour = 60.0 / f64::from(interval_minutes.max(1));
    let mut bins: BTreeMap<i64, (f64, usize)> = BTreeMap::new();

    for s in samples {
        let decimal = f64::from(s.datetime.hour()) + f64::from(s.datetime.minute()) / 60.0;
        let key = (decimal * bins_per_hour).round_ties_even() as i64;
        let entry = bins.entry(key).or_insert((0.0, 0));
        entry.0 += s.heart_rate;
        entry.1 += 1;
    }

    bins.into_iter()
        .map(|(key, (sum, count))| (key as f64 / bins_per_hour, sum / count as f64))
        .collect()
}

/// Decimal hour as HH:MM, truncating to the minute
pub fn format_time(hour: f64) -> String {
    let h = hour.trunc();
    let m = ((hour - h) * 60.0).trunc();
    format!("{:02}:{:02}", h as i64, m as i64)
}

/// Parse HH:MM back to a decimal hour
pub fn parse_time(s: &str) -> Option<f64> {
    let (h, m) = s.trim().split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    if m >= 60 {
        return None;
    }
    Some(f64::from(h) + f64::from(m) / 60.0)
}

/// R² quality band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitQuality {
    Excellent,
    Good,
    NeedsReview,
}

impl FitQuality {
    pub fn from_r_squared(r_squared: Option<f64>) -> Self {
        match r_squared {
            Some(r) if r > 0.95 => FitQuality::Excellent,
            Some(r) if r > 0.85 => FitQuality::Good,
            _ => FitQuality::NeedsReview,
        }
    }
}

impl fmt::Display for FitQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitQuality::Excellent => write!(f, "excellent"),
            FitQuality::Good => write!(f, "good"),
            FitQuality::NeedsReview => write!(f, "needs review"),
        }
    }
}

/// Fit results related to the sleep schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircadianInterpretation {
    pub avg_wake_time: Option<f64>,
    pub avg_bedtime: Option<f64>,
    /// Hours from bathyphase to mean wake time, wrapped into [0, 24)
    pub bathyphase_wake_diff: Option<f64>,
    /// Hours from acrophase to mean bedtime, wrapped into [0, 24)
    pub acrophase_bedtime_diff: Option<f64>,
    pub quality: FitQuality,
    /// A2/A1 above 1
    pub ultradian_dominant: bool,
    pub amplitude: String,
    pub bathyphase: String,
    pub acrophase: String,
    pub quality_text: String,
    pub ultradian: String,
}

/// Mean clock hour computed as mean hour plus mean minute / 60
fn mean_clock_hour(times: &[NaiveDateTime]) -> Option<f64> {
    let hours: Vec<f64> = times.iter().map(|t| f64::from(t.hour())).collect();
    let minutes: Vec<f64> = times.iter().map(|t| f64::from(t.minute())).collect();
    Some(stats::mean(&hours)? + stats::mean(&minutes)? / 60.0)
}

fn wrap_day(diff: f64) -> f64 {
    if diff < 0.0 {
        diff + 24.0
    } else {
        diff
    }
}

/// Relate the fitted phases to the sleep schedule
pub fn interpret_circadian(fit: &CircadianFit, sleep: &[SleepRecord]) -> CircadianInterpretation {
    let ends: Vec<NaiveDateTime> = sleep.iter().filter_map(|r| r.end_time).collect();
    let starts: Vec<NaiveDateTime> = sleep.iter().filter_map(|r| r.start_time).collect();
    let avg_wake_time = mean_clock_hour(&ends);
    let avg_bedtime = mean_clock_hour(&starts);

    let bathyphase_wake_diff = avg_wake_time.map(|w| wrap_day(w - fit.bathyphase));
    let acrophase_bedtime_diff = avg_bedtime.map(|b| wrap_day(b - fit.acrophase));
    let quality = FitQuality::from_r_squared(fit.r_squared);
    let ultradian_dominant = fit.a2_a1_ratio.is_some_and(|r| r > 1.0);

    let relative = |diff: Option<f64>, what: &str| match diff {
        Some(d) => format!(", about {:.1} h before {}", d, what),
        None => String::new(),
    };

    CircadianInterpretation {
        avg_wake_time,
        avg_bedtime,
        bathyphase_wake_diff,
        acrophase_bedtime_diff,
        quality,
        ultradian_dominant,
        amplitude: format!("Circadian amplitude is {:.1} bpm.", fit.a_cr),
        bathyphase: format!(
            "Heart rate bottoms out at {}{}.",
            format_time(fit.bathyphase),
            relative(bathyphase_wake_diff, "wake-up")
        ),
        acrophase: format!(
            "Heart rate peaks at {}{}.",
            format_time(fit.acrophase),
            relative(acrophase_bedtime_diff, "bedtime")
        ),
        quality_text: match fit.r_squared {
            Some(r) => format!("Model R² is {:.3} ({}).", r, quality),
            None => format!("Model R² is undefined ({}).", quality),
        },
        ultradian: match fit.a2_a1_ratio {
            Some(r) => format!(
                "Ultradian index (A2/A1) is {:.3}, {}.",
                r,
                if ultradian_dominant { "ultradian rhythm dominates" } else { "within the normal range" }
            ),
            None => "Ultradian index (A2/A1) is undefined.".to_string(),
        },
    }
}

/// Full circadian analysis output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircadianAnalysis {
    pub hourly: Vec<Option<f64>>,
    pub fit: CircadianFit,
    pub samples_used: usize,
    pub samples_excluded: usize,
}

/// Heart-rate circadian analyzer
pub struct CircadianAnalyzer {
    config: CircadianConfig,
}

impl Default for CircadianAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl CircadianAnalyzer {
    /// Create analyzer with default configuration
    pub fn new() -> Self {
        CircadianAnalyzer {
            config: CircadianConfig::default(),
        }
    }

    /// Create analyzer with custom configuration
    pub fn with_config(config: CircadianConfig) -> Self {
        CircadianAnalyzer { config }
    }

    pub fn config(&self) -> &CircadianConfig {
        &self.config
    }

    /// Exclude sleep and exercise as configured, bin by hour and fit
    pub fn analyze(
        &self,
        samples: &[HeartRateSample],
        sleep: &[SleepRecord],
        activities: &[ActivityPeriod],
    ) -> Result<CircadianAnalysis, FitError> {
        let mut awake = samples.to_vec();
        if self.config.exclude_sleep {
            awake = exclude_sleep_periods(&awake, sleep);
        }
        if self.config.exclude_activity {
            awake = exclude_activity_periods(&awake, activities);
        }

        let hourly = prepare_hourly_data(&awake);
        let fit = fit_circadian_rhythm(&hourly, &self.config)?;

        info!(
            a_cr = fit.a_cr,
            bathyphase = %format_time(fit.bathyphase),
            acrophase = %format_time(fit.acrophase),
            r_squared = ?fit.r_squared,
            "Circadian rhythm fitted"
        );

        Ok(CircadianAnalysis {
            hourly,
            fit,
            samples_used: awake.len(),
            samples_excluded: samples.len() - awake.len(),
        })
    }
}
