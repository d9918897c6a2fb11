use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Confidence label attached to estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Low => write!(f, "low"),
            Confidence::Medium => write!(f, "medium"),
            Confidence::High => write!(f, "high"),
        }
    }
}

/// One sleep session as exported by the Fitbit sleep API (`sleep.csv`)
///
/// Sessions are identified by `(date_of_sleep, log_id)`. Several sessions may
/// share a date when naps are logged; `is_main_sleep` marks the primary one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepRecord {
    /// Calendar date the session is attributed to (`dateOfSleep`)
    pub date_of_sleep: NaiveDate,

    /// Fitbit log identifier (`logId`)
    pub log_id: Option<i64>,

    /// Session start (`startTime`)
    pub start_time: Option<NaiveDateTime>,

    /// Session end (`endTime`)
    pub end_time: Option<NaiveDateTime>,

    /// Minutes actually asleep (`minutesAsleep`)
    pub minutes_asleep: f64,

    /// Minutes in bed (`timeInBed`)
    pub time_in_bed: Option<f64>,

    /// Sleep efficiency in percent (`efficiency`)
    pub efficiency: Option<f64>,

    /// Deep sleep minutes (`deepMinutes`)
    pub deep_minutes: Option<f64>,

    /// Light sleep minutes (`lightMinutes`)
    pub light_minutes: Option<f64>,

    /// REM sleep minutes (`remMinutes`)
    pub rem_minutes: Option<f64>,

    /// Wake minutes within the session (`wakeMinutes`)
    pub wake_minutes: Option<f64>,

    /// Number of wake episodes (`wakeCount`)
    pub wake_count: Option<u32>,

    /// Primary-session flag (`isMainSleep`)
    pub is_main_sleep: Option<bool>,
}

impl SleepRecord {
    /// Minimal record carrying only the date and the asleep duration
    pub fn new(date_of_sleep: NaiveDate, minutes_asleep: f64) -> Self {
        Self {
            date_of_sleep,
            log_id: None,
            start_time: None,
            end_time: None,
            minutes_asleep,
            time_in_bed: None,
            efficiency: None,
            deep_minutes: None,
            light_minutes: None,
            rem_minutes: None,
            wake_minutes: None,
            wake_count: None,
            is_main_sleep: None,
        }
    }

    pub fn with_efficiency(mut self, efficiency: f64) -> Self {
        self.efficiency = Some(efficiency);
        self
    }

    pub fn with_deep_minutes(mut self, deep_minutes: f64) -> Self {
        self.deep_minutes = Some(deep_minutes);
        self
    }

    pub fn with_times(mut self, start_time: NaiveDateTime, end_time: NaiveDateTime) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    pub fn hours_asleep(&self) -> f64 {
        self.minutes_asleep / 60.0
    }

    /// Deep sleep as a percentage of time asleep
    pub fn deep_percent(&self) -> Option<f64> {
        match self.deep_minutes {
            Some(deep) if self.minutes_asleep > 0.0 => Some(deep / self.minutes_asleep * 100.0),
            _ => None,
        }
    }
}

/// Keep only primary sessions; records without the flag are kept
pub fn main_sleep_only(records: &[SleepRecord]) -> Vec<SleepRecord> {
    records
        .iter()
        .filter(|r| r.is_main_sleep.unwrap_or(true))
        .cloned()
        .collect()
}

/// Sleep stage label used in `sleep_levels.csv`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageLevel {
    Deep,
    Light,
    Rem,
    Wake,
}

impl StageLevel {
    pub fn is_nrem(&self) -> bool {
        matches!(self, StageLevel::Deep | StageLevel::Light)
    }
}

impl fmt::Display for StageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageLevel::Deep => write!(f, "deep"),
            StageLevel::Light => write!(f, "light"),
            StageLevel::Rem => write!(f, "rem"),
            StageLevel::Wake => write!(f, "wake"),
        }
    }
}

impl FromStr for StageLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deep" => Ok(StageLevel::Deep),
            "light" => Ok(StageLevel::Light),
            "rem" => Ok(StageLevel::Rem),
            "wake" => Ok(StageLevel::Wake),
            _ => Err(format!("Invalid sleep stage: {}", s)),
        }
    }
}

/// One contiguous stage interval within a session (`sleep_levels.csv` row)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSegment {
    /// Owning session log identifier
    pub log_id: Option<i64>,

    /// Date the owning session is attributed to
    pub date_of_sleep: NaiveDate,

    /// Segment start
    pub date_time: NaiveDateTime,

    /// Stage label
    pub level: StageLevel,

    /// Duration in seconds
    pub seconds: f64,

    /// Short wake (< 3 min) reported separately by the API
    pub is_short: bool,
}

impl StageSegment {
    pub fn new(date_of_sleep: NaiveDate, date_time: NaiveDateTime, level: StageLevel, seconds: f64) -> Self {
        Self {
            log_id: None,
            date_of_sleep,
            date_time,
            level,
            seconds,
            is_short: false,
        }
    }

    pub fn duration_minutes(&self) -> f64 {
        self.seconds / 60.0
    }

    pub fn end_time(&self) -> NaiveDateTime {
        self.date_time + Duration::milliseconds((self.seconds * 1000.0).round() as i64)
    }
}

/// Daily HRV summary (`hrv.csv`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvRecord {
    pub date: NaiveDate,

    /// Nightly RMSSD in milliseconds (`daily_rmssd`)
    pub daily_rmssd: Option<f64>,

    /// RMSSD during deep sleep (`deep_rmssd`)
    pub deep_rmssd: Option<f64>,
}

/// One value per date for a single physiological metric
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyMetricSample {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

impl DailyMetricSample {
    pub fn new(date: NaiveDate, value: Option<f64>) -> Self {
        Self { date, value }
    }
}

/// Intraday heart-rate reading (`heart_rate_intraday.csv`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
    pub datetime: NaiveDateTime,
    pub heart_rate: f64,
}

/// Closed interval to exclude from intraday analysis (sleep or exercise)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityPeriod {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ActivityPeriod {
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start && t <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    #[test]
    fn test_stage_level_parsing() {
        assert_eq!("deep".parse::<StageLevel>().unwrap(), StageLevel::Deep);
        assert_eq!("REM".parse::<StageLevel>().unwrap(), StageLevel::Rem);
        assert_eq!(" wake ".parse::<StageLevel>().unwrap(), StageLevel::Wake);
        assert!("restless".parse::<StageLevel>().is_err());
    }

    #[test]
    fn test_deep_percent() {
        let record = SleepRecord::new(date(1), 400.0).with_deep_minutes(80.0);
        assert_eq!(record.deep_percent(), Some(20.0));
        assert_eq!(SleepRecord::new(date(1), 400.0).deep_percent(), None);
    }

    #[test]
    fn test_main_sleep_filter() {
        let mut nap = SleepRecord::new(date(1), 45.0);
        nap.is_main_sleep = Some(false);
        let mut main = SleepRecord::new(date(1), 420.0);
        main.is_main_sleep = Some(true);
        let unflagged = SleepRecord::new(date(2), 400.0);

        let kept = main_sleep_only(&[nap, main, unflagged]);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.minutes_asleep > 100.0));
    }

    #[test]
    fn test_segment_end_time() {
        let start = date(1).and_hms_opt(23, 0, 0).unwrap();
        let seg = StageSegment::new(date(2), start, StageLevel::Light, 1800.0);
        assert_eq!(seg.duration_minutes(), 30.0);
        assert_eq!(seg.end_time(), date(1).and_hms_opt(23, 30, 0).unwrap());
    }
}
