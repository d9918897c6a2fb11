use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::SleepRecord;
use crate::stats;

/// Sleep debt calculation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SleepDebtError {
    #[error("Insufficient data: need at least {required} nights in window, found {found}")]
    InsufficientData {
        required: usize,
        found: usize,
        end_date: Option<NaiveDate>,
    },
    #[error("Invalid date range: {0}")]
    InvalidDateRange(String),
}

/// How nights inside the window are weighted, oldest to most recent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightMethod {
    /// 0.5 for the oldest night rising evenly to 1.0 for the latest
    Linear,
    /// `exp(rate * i)` normalized so the latest night weighs 1.0
    Exponential,
    /// Every night weighs 1.0
    Uniform,
}

impl fmt::Display for WeightMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightMethod::Linear => write!(f, "linear"),
            WeightMethod::Exponential => write!(f, "exponential"),
            WeightMethod::Uniform => write!(f, "uniform"),
        }
    }
}

impl FromStr for WeightMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(WeightMethod::Linear),
            "exponential" | "exp" => Ok(WeightMethod::Exponential),
            "uniform" => Ok(WeightMethod::Uniform),
            _ => Err(format!("Invalid weight method: {}", s)),
        }
    }
}

/// Sleep debt severity bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DebtCategory {
    None,
    Low,
    Moderate,
    High,
}

impl DebtCategory {
    /// Band a debt value (hours) using the configured thresholds
    pub fn from_debt(debt_hours: f64, config: &SleepDebtConfig) -> Self {
        if debt_hours <= 0.0 {
            DebtCategory::None
        } else if debt_hours < config.low_threshold_hours {
            DebtCategory::Low
        } else if debt_hours < config.moderate_threshold_hours {
            DebtCategory::Moderate
        } else {
            DebtCategory::High
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DebtCategory::None => "No sleep debt",
            DebtCategory::Low => "Minor debt, one or two longer nights will clear it",
            DebtCategory::Moderate => "Noticeable debt, plan several earlier bedtimes",
            DebtCategory::High => "Significant debt, prioritize recovery sleep",
        }
    }
}

impl fmt::Display for DebtCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebtCategory::None => write!(f, "None"),
            DebtCategory::Low => write!(f, "Low"),
            DebtCategory::Moderate => write!(f, "Moderate"),
            DebtCategory::High => write!(f, "High"),
        }
    }
}

/// Sleep debt configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepDebtConfig {
    /// Trailing window in days, end date included (default: 14)
    pub window_days: u32,

    /// Minimum nights inside the window (default: 5)
    pub min_data_points: usize,

    /// Upper bound of the Low band in hours (default: 2.0)
    pub low_threshold_hours: f64,

    /// Upper bound of the Moderate band in hours (default: 5.0)
    pub moderate_threshold_hours: f64,

    /// Hours of debt repaid per recovery day (default: 0.3)
    pub recovery_rate_per_day: f64,

    /// Growth rate of exponential weights (default: 0.1)
    pub exponential_decay_rate: f64,

    /// Weighting used when none is requested
    pub default_weight_method: WeightMethod,
}

impl Default for SleepDebtConfig {
    fn default() -> Self {
        SleepDebtConfig {
            window_days: 14,
            min_data_points: 5,
            low_threshold_hours: 2.0,
            moderate_threshold_hours: 5.0,
            recovery_rate_per_day: 0.3,
            exponential_decay_rate: 0.1,
            default_weight_method: WeightMethod::Linear,
        }
    }
}

/// Deficit of a single night in minutes (positive = shortfall)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyDeficit {
    pub date: NaiveDate,
    pub deficit_minutes: f64,
}

/// Result of a sleep debt calculation for one reference date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepDebtResult {
    /// Last date of the window
    pub date: NaiveDate,

    /// Sleep need the deficits were measured against (hours, 1 dp)
    pub sleep_need_hours: f64,

    /// Weighted accumulated debt, never negative (hours, 2 dp)
    pub sleep_debt_hours: f64,

    pub category: DebtCategory,

    /// Mean sleep over the window (hours, 1 dp)
    pub avg_sleep_hours: f64,

    /// Nights inside the window
    pub data_points: usize,

    /// Per-night deficits in window order
    pub daily_deficits: Vec<DailyDeficit>,

    /// Days to repay the debt at the configured recovery rate
    pub recovery_days: u32,
}

/// Extra sleep per night needed to clear the debt within `recovery_days`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAdvice {
    pub extra_hours_per_night: f64,
    pub suggested_sleep_hours: f64,
    pub recovery_days: u32,
}

impl SleepDebtResult {
    /// `None` when there is no debt to recover
    pub fn recovery_advice(&self) -> Option<RecoveryAdvice> {
        if self.recovery_days == 0 {
            return None;
        }
        let extra = self.sleep_debt_hours / f64::from(self.recovery_days);
        Some(RecoveryAdvice {
            extra_hours_per_night: extra,
            suggested_sleep_hours: self.sleep_need_hours + extra,
            recovery_days: self.recovery_days,
        })
    }
}

impl fmt::Display for SleepDebtResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:.2}h debt ({}), need {:.1}h, avg {:.1}h over {} nights, recovery {} days",
            self.date,
            self.sleep_debt_hours,
            self.category,
            self.sleep_need_hours,
            self.avg_sleep_hours,
            self.data_points,
            self.recovery_days
        )
    }
}

/// One row of a debt history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtHistoryEntry {
    pub date: NaiveDate,
    pub sleep_need_hours: f64,
    pub avg_sleep_hours: f64,
    pub sleep_debt_hours: f64,
    pub category: DebtCategory,
    pub recovery_days: u32,
}

impl From<&SleepDebtResult> for DebtHistoryEntry {
    fn from(result: &SleepDebtResult) -> Self {
        DebtHistoryEntry {
            date: result.date,
            sleep_need_hours: result.sleep_need_hours,
            avg_sleep_hours: result.avg_sleep_hours,
            sleep_debt_hours: result.sleep_debt_hours,
            category: result.category,
            recovery_days: result.recovery_days,
        }
    }
}

/// Display row of a debt history table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtHistoryRow {
    pub date: NaiveDate,
    pub avg_sleep_hours: f64,
    pub sleep_debt_hours: f64,
    /// Change versus the previous row, absent on the first row
    pub debt_change: Option<f64>,
    pub category: DebtCategory,
    pub recovery_days: u32,
}

/// Add day-over-day debt change to a history
pub fn format_debt_history_table(history: &[DebtHistoryEntry]) -> Vec<DebtHistoryRow> {
    let mut previous: Option<f64> = None;
    history
        .iter()
        .map(|entry| {
            let debt_change = previous.map(|p| stats::round_to(entry.sleep_debt_hours - p, 2));
            previous = Some(entry.sleep_debt_hours);
            DebtHistoryRow {
                date: entry.date,
                avg_sleep_hours: entry.avg_sleep_hours,
                sleep_debt_hours: entry.sleep_debt_hours,
                debt_change,
                category: entry.category,
                recovery_days: entry.recovery_days,
            }
        })
        .collect()
}

/// Weighted sleep debt over a trailing window
pub struct SleepDebtCalculator {
    records: Vec<SleepRecord>,
    sleep_need_hours: f64,
    config: SleepDebtConfig,
}

impl SleepDebtCalculator {
    /// Create calculator with default configuration
    pub fn new(records: &[SleepRecord], sleep_need_hours: f64) -> Self {
        Self::with_config(records, sleep_need_hours, SleepDebtConfig::default())
    }

    /// Create calculator with custom configuration
    pub fn with_config(records: &[SleepRecord], sleep_need_hours: f64, config: SleepDebtConfig) -> Self {
        let mut records = records.to_vec();
        records.sort_by_key(|r| r.date_of_sleep);
        SleepDebtCalculator {
            records,
            sleep_need_hours,
            config,
        }
    }

    pub fn config(&self) -> &SleepDebtConfig {
        &self.config
    }

    pub fn sleep_need_hours(&self) -> f64 {
        self.sleep_need_hours
    }

    /// Per-night weights for a window of `n` nights, oldest first
    pub fn weights(&self, n: usize, method: WeightMethod) -> Vec<f64> {
        match method {
            WeightMethod::Linear => stats::linspace(0.5, 1.0, n),
            WeightMethod::Exponential => {
                let rate = self.config.exponential_decay_rate;
                let raw: Vec<f64> = (0..n).map(|i| (rate * i as f64).exp()).collect();
                let max = raw.iter().copied().fold(f64::MIN, f64::max);
                raw.into_iter().map(|w| w / max).collect()
            }
            WeightMethod::Uniform => vec![1.0; n],
        }
    }

    /// Calculate debt for the window ending at `end_date` (default: latest night)
    pub fn calculate(
        &self,
        end_date: Option<NaiveDate>,
        method: WeightMethod,
    ) -> Result<SleepDebtResult, SleepDebtError> {
        let Some(end) = end_date.or_else(|| self.records.last().map(|r| r.date_of_sleep)) else {
            return Err(SleepDebtError::InsufficientData {
                required: self.config.min_data_points,
                found: 0,
                end_date,
            });
        };

        let start = end - Duration::days(i64::from(self.config.window_days.max(1)) - 1);
        let window: Vec<&SleepRecord> = self
            .records
            .iter()
            .filter(|r| r.date_of_sleep >= start && r.date_of_sleep <= end)
            .collect();

        if window.len() < self.config.min_data_points {
            return Err(SleepDebtError::InsufficientData {
                required: self.config.min_data_points,
                found: window.len(),
                end_date: Some(end),
            });
        }

        let need_minutes = self.sleep_need_hours * 60.0;
        let daily_deficits: Vec<DailyDeficit> = window
            .iter()
            .map(|r| DailyDeficit {
                date: r.date_of_sleep,
                deficit_minutes: need_minutes - r.minutes_asleep,
            })
            .collect();

        let weights = self.weights(window.len(), method);
        let weighted_sum: f64 = daily_deficits
            .iter()
            .zip(&weights)
            .map(|(d, w)| d.deficit_minutes * w)
            .sum();

        // Surplus nights offset shortfalls, but the reported figure floors at zero
        let debt_hours = weighted_sum.max(0.0) / 60.0;
        let category = DebtCategory::from_debt(debt_hours, &self.config);
        let recovery_days = self.recovery_days(debt_hours);

        let minutes: Vec<f64> = window.iter().map(|r| r.minutes_asleep).collect();
        let avg_sleep_hours = stats::mean(&minutes).unwrap_or(0.0) / 60.0;

        debug!(
            end_date = %end,
            nights = window.len(),
            method = %method,
            debt_hours,
            "Sleep debt calculated"
        );

        Ok(SleepDebtResult {
            date: end,
            sleep_need_hours: stats::round_to(self.sleep_need_hours, 1),
            sleep_debt_hours: stats::round_to(debt_hours, 2),
            category,
            avg_sleep_hours: stats::round_to(avg_sleep_hours, 1),
            data_points: window.len(),
            daily_deficits,
            recovery_days,
        })
    }

    /// Recalculate debt for every date in `[start, end]`
    ///
    /// Dates whose window is too thin are skipped.
    pub fn get_history(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        method: WeightMethod,
    ) -> Result<Vec<DebtHistoryEntry>, SleepDebtError> {
        if start > end {
            return Err(SleepDebtError::InvalidDateRange(
                "Start date must be before end date".to_string(),
            ));
        }

        let mut history = Vec::new();
        let mut skipped = 0usize;
        for date in start.iter_days().take_while(|d| *d <= end) {
            match self.calculate(Some(date), method) {
                Ok(result) => history.push(DebtHistoryEntry::from(&result)),
                Err(SleepDebtError::InsufficientData { found, .. }) => {
                    debug!(%date, found, "Skipping date with insufficient window data");
                    skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            entries = history.len(),
            skipped,
            "Sleep debt history computed"
        );
        Ok(history)
    }

    fn recovery_days(&self, debt_hours: f64) -> u32 {
        if debt_hours <= 0.0 || self.config.recovery_rate_per_day <= 0.0 {
            return 0;
        }
        (debt_hours / self.config.recovery_rate_per_day).ceil() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nights(start: NaiveDate, hours: &[f64]) -> Vec<SleepRecord> {
        hours
            .iter()
            .enumerate()
            .map(|(i, h)| SleepRecord::new(start + Duration::days(i as i64), h * 60.0))
            .collect()
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn test_no_debt_when_sleeping_need() {
        let records = nights(start(), &[8.0; 14]);
        let calculator = SleepDebtCalculator::new(&records, 8.0);

        for method in [WeightMethod::Linear, WeightMethod::Exponential, WeightMethod::Uniform] {
            let result = calculator.calculate(None, method).unwrap();
            assert_eq!(result.sleep_debt_hours, 0.0);
            assert_eq!(result.category, DebtCategory::None);
            assert_eq!(result.recovery_days, 0);
            assert!(result.recovery_advice().is_none());
        }
    }

    #[test]
    fn test_uniform_shortfall() {
        let records = nights(start(), &[6.0; 14]);
        let calculator = SleepDebtCalculator::new(&records, 8.0);
        let result = calculator.calculate(None, WeightMethod::Uniform).unwrap();

        assert_eq!(result.sleep_debt_hours, 28.0);
        assert_eq!(result.category, DebtCategory::High);
        assert_eq!(result.recovery_days, 94);
        assert_eq!(result.avg_sleep_hours, 6.0);
        assert_eq!(result.data_points, 14);
        assert!(result.daily_deficits.iter().all(|d| d.deficit_minutes == 120.0));

        let advice = result.recovery_advice().unwrap();
        assert!((advice.extra_hours_per_night - 28.0 / 94.0).abs() < 1e-12);
        assert!((advice.suggested_sleep_hours - (8.0 + 28.0 / 94.0)).abs() < 1e-12);
    }

    #[test]
    fn test_surplus_offsets_but_never_negative() {
        // One long night cancels part of the shortfall
        let mut hours = vec![7.0; 13];
        hours.push(12.0);
        let records = nights(start(), &hours);
        let calculator = SleepDebtCalculator::new(&records, 8.0);
        let result = calculator.calculate(None, WeightMethod::Uniform).unwrap();
        // 13 * 60 - 240 = 540 minutes
        assert_eq!(result.sleep_debt_hours, 9.0);

        let records = nights(start(), &[10.0; 14]);
        let calculator = SleepDebtCalculator::new(&records, 8.0);
        let result = calculator.calculate(None, WeightMethod::Linear).unwrap();
        assert_eq!(result.sleep_debt_hours, 0.0);
        assert_eq!(result.category, DebtCategory::None);
    }

    #[test]
    fn test_insufficient_data() {
        let records = nights(start(), &[7.0; 4]);
        let calculator = SleepDebtCalculator::new(&records, 8.0);
        let err = calculator.calculate(None, WeightMethod::Linear).unwrap_err();
        assert_eq!(
            err,
            SleepDebtError::InsufficientData {
                required: 5,
                found: 4,
                end_date: Some(start() + Duration::days(3)),
            }
        );

        let empty = SleepDebtCalculator::new(&[], 8.0);
        assert!(empty.calculate(None, WeightMethod::Linear).is_err());
    }

    #[test]
    fn test_window_excludes_older_nights() {
        let records = nights(start(), &[4.0; 30]);
        let calculator = SleepDebtCalculator::new(&records, 8.0);
        let result = calculator.calculate(None, WeightMethod::Uniform).unwrap();
        assert_eq!(result.data_points, 14);
        assert_eq!(result.daily_deficits[0].date, start() + Duration::days(16));
    }

    #[test]
    fn test_weights() {
        let calculator = SleepDebtCalculator::new(&[], 8.0);
        assert_eq!(calculator.weights(3, WeightMethod::Linear), vec![0.5, 0.75, 1.0]);
        assert_eq!(calculator.weights(3, WeightMethod::Uniform), vec![1.0; 3]);

        let exp = calculator.weights(3, WeightMethod::Exponential);
        assert_eq!(exp[2], 1.0);
        assert!((exp[0] - (-0.2f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_category_bands() {
        let config = SleepDebtConfig::default();
        assert_eq!(DebtCategory::from_debt(0.0, &config), DebtCategory::None);
        assert_eq!(DebtCategory::from_debt(1.99, &config), DebtCategory::Low);
        assert_eq!(DebtCategory::from_debt(2.0, &config), DebtCategory::Moderate);
        assert_eq!(DebtCategory::from_debt(5.0, &config), DebtCategory::High);
    }

    #[test]
    fn test_history_skips_thin_windows() {
        let records = nights(start(), &[7.0; 10]);
        let calculator = SleepDebtCalculator::new(&records, 8.0);
        let history = calculator
            .get_history(start(), start() + Duration::days(9), WeightMethod::Uniform)
            .unwrap();

        // First four dates have fewer than five nights
        assert_eq!(history.len(), 6);
        assert_eq!(history[0].date, start() + Duration::days(4));
        assert_eq!(history[0].sleep_debt_hours, 5.0);

        let table = format_debt_history_table(&history);
        assert_eq!(table[0].debt_change, None);
        assert_eq!(table[1].debt_change, Some(1.0));
    }

    #[test]
    fn test_history_rejects_reversed_range() {
        let calculator = SleepDebtCalculator::new(&[], 8.0);
        assert!(calculator
            .get_history(start() + Duration::days(1), start(), WeightMethod::Linear)
            .is_err());
    }

    #[test]
    fn test_weight_method_parsing() {
        assert_eq!("Linear".parse::<WeightMethod>().unwrap(), WeightMethod::Linear);
        assert_eq!("exp".parse::<WeightMethod>().unwrap(), WeightMethod::Exponential);
        assert!("quadratic".parse::<WeightMethod>().is_err());
    }

    use proptest::prelude::*;

    fn weight_method() -> impl Strategy<Value = WeightMethod> {
        prop_oneof![
            Just(WeightMethod::Linear),
            Just(WeightMethod::Exponential),
            Just(WeightMethod::Uniform),
        ]
    }

    proptest! {
        #[test]
        fn test_debt_never_negative(
            hours in prop::collection::vec(0.0f64..14.0, 0..40),
            need in 5.0f64..10.0,
            method in weight_method()
        ) {
            let records = nights(start(), &hours);
            let calculator = SleepDebtCalculator::new(&records, need);

            match calculator.calculate(None, method) {
                Ok(result) => {
                    prop_assert!(result.sleep_debt_hours >= 0.0);
                    prop_assert!(result.data_points >= 5);
                    if result.recovery_days == 0 {
                        prop_assert_eq!(result.sleep_debt_hours, 0.0);
                    }
                }
                Err(SleepDebtError::InsufficientData { found, .. }) => {
                    prop_assert!(found < 5);
                }
                Err(e) => prop_assert!(false, "unexpected error: {}", e),
            }
        }

        #[test]
        fn test_insufficient_iff_thin_window(count in 0usize..20) {
            let records = nights(start(), &vec![7.0; count]);
            let calculator = SleepDebtCalculator::new(&records, 8.0);
            let in_window = count.min(14);
            let result = calculator.calculate(None, WeightMethod::Linear);
            prop_assert_eq!(result.is_err(), in_window < 5);
        }

        #[test]
        fn test_calculation_is_idempotent(
            hours in prop::collection::vec(3.0f64..11.0, 5..30),
            method in weight_method()
        ) {
            let records = nights(start(), &hours);
            let calculator = SleepDebtCalculator::new(&records, 8.0);
            let first = calculator.calculate(None, method).unwrap();
            let second = calculator.calculate(None, method).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
