use ::csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{cell, parse_bool, parse_date, parse_datetime, ColumnIndex, ImportError};
use crate::baseline::MetricKind;
use crate::models::{
    ActivityPeriod, DailyMetricSample, HeartRateSample, HrvRecord, SleepRecord, StageLevel,
    StageSegment,
};

pub const SLEEP_FILE: &str = "sleep.csv";
pub const SLEEP_LEVELS_FILE: &str = "sleep_levels.csv";
pub const HEART_RATE_INTRADAY_FILE: &str = "heart_rate_intraday.csv";
pub const ACTIVITY_LOGS_FILE: &str = "activity_logs.csv";

/// Open a CSV export and index its header row
fn open(path: &Path) -> Result<(::csv::Reader<File>, ColumnIndex), ImportError> {
    let file = File::open(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(file);
    let headers = reader.headers()?.clone();
    let index = ColumnIndex::new(path, &headers);
    Ok((reader, index))
}

fn float(
    index: &ColumnIndex,
    record: &StringRecord,
    column: Option<usize>,
) -> Result<Option<f64>, ImportError> {
    match cell(record, column) {
        Some(s) => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| index.parse_error(record, format!("invalid number '{}'", s))),
        None => Ok(None),
    }
}

fn date(index: &ColumnIndex, record: &StringRecord, column: usize) -> Result<chrono::NaiveDate, ImportError> {
    let raw = cell(record, Some(column)).unwrap_or("");
    parse_date(raw).ok_or_else(|| index.parse_error(record, format!("invalid date '{}'", raw)))
}

fn datetime(
    index: &ColumnIndex,
    record: &StringRecord,
    column: Option<usize>,
) -> Result<Option<chrono::NaiveDateTime>, ImportError> {
    match cell(record, column) {
        Some(s) => parse_datetime(s)
            .map(Some)
            .ok_or_else(|| index.parse_error(record, format!("invalid timestamp '{}'", s))),
        None => Ok(None),
    }
}

/// Load sleep sessions from `sleep.csv`
///
/// Rows without `minutesAsleep` are skipped. Records are ordered by date.
pub fn load_sleep(path: &Path) -> Result<Vec<SleepRecord>, ImportError> {
    let (mut reader, index) = open(path)?;
    let date_col = index.require("dateOfSleep")?;
    let asleep_col = index.require("minutesAsleep")?;
    let log_id_col = index.optional("logId");
    let start_col = index.optional("startTime");
    let end_col = index.optional("endTime");
    let in_bed_col = index.optional("timeInBed");
    let efficiency_col = index.optional("efficiency");
    let deep_col = index.optional("deepMinutes");
    let light_col = index.optional("lightMinutes");
    let rem_col = index.optional("remMinutes");
    let wake_col = index.optional("wakeMinutes");
    let wake_count_col = index.optional("wakeCount");
    let main_col = index.optional("isMainSleep");

    let mut records = Vec::new();
    let mut skipped = 0usize;

    for row in reader.records() {
        let row = row?;
        let Some(minutes_asleep) = float(&index, &row, Some(asleep_col))? else {
            skipped += 1;
            continue;
        };

        let mut record = SleepRecord::new(date(&index, &row, date_col)?, minutes_asleep);
        record.log_id = float(&index, &row, log_id_col)?.map(|v| v as i64);
        record.start_time = datetime(&index, &row, start_col)?;
        record.end_time = datetime(&index, &row, end_col)?;
        record.time_in_bed = float(&index, &row, in_bed_col)?;
        record.efficiency = float(&index, &row, efficiency_col)?;
        record.deep_minutes = float(&index, &row, deep_col)?;
        record.light_minutes = float(&index, &row, light_col)?;
        record.rem_minutes = float(&index, &row, rem_col)?;
        record.wake_minutes = float(&index, &row, wake_col)?;
        record.wake_count = float(&index, &row, wake_count_col)?.map(|v| v as u32);
        record.is_main_sleep = cell(&row, main_col).and_then(parse_bool);
        records.push(record);
    }

    records.sort_by_key(|r| (r.date_of_sleep, r.start_time));
    debug!(path = %path.display(), records = records.len(), skipped, "Loaded sleep sessions");
    Ok(records)
}

/// Load stage segments from `sleep_levels.csv`
///
/// Rows with levels outside deep/light/rem/wake (classic-mode
/// `asleep`/`restless`/`awake`) are skipped.
pub fn load_sleep_levels(path: &Path) -> Result<Vec<StageSegment>, ImportError> {
    let (mut reader, index) = open(path)?;
    let date_col = index.require("dateOfSleep")?;
    let time_col = index.require("dateTime")?;
    let level_col = index.require("level")?;
    let seconds_col = index.require("seconds")?;
    let log_id_col = index.optional("logId");
    let short_col = index.optional("isShort");

    let mut segments = Vec::new();
    let mut unknown_levels = 0usize;

    for row in reader.records() {
        let row = row?;
        let level = match cell(&row, Some(level_col)).map(str::parse::<StageLevel>) {
            Some(Ok(level)) => level,
            _ => {
                unknown_levels += 1;
                continue;
            }
        };
        let date_time = datetime(&index, &row, Some(time_col))?
            .ok_or_else(|| index.parse_error(&row, "missing dateTime".to_string()))?;
        let seconds = float(&index, &row, Some(seconds_col))?.unwrap_or(0.0);

        let mut segment = StageSegment::new(date(&index, &row, date_col)?, date_time, level, seconds);
        segment.log_id = float(&index, &row, log_id_col)?.map(|v| v as i64);
        segment.is_short = cell(&row, short_col).and_then(parse_bool).unwrap_or(false);
        segments.push(segment);
    }

    if unknown_levels > 0 {
        warn!(path = %path.display(), rows = unknown_levels, "Skipped rows with unsupported sleep levels");
    }

    segments.sort_by_key(|s| (s.date_of_sleep, s.date_time));
    debug!(path = %path.display(), segments = segments.len(), "Loaded sleep stage segments");
    Ok(segments)
}

/// Load nightly HRV from `hrv.csv` (`date`, `daily_rmssd`, `deep_rmssd`)
pub fn load_hrv(path: &Path) -> Result<Vec<HrvRecord>, ImportError> {
    let (mut reader, index) = open(path)?;
    let date_col = index.require("date")?;
    let daily_col = index.require("daily_rmssd")?;
    let deep_col = index.optional("deep_rmssd");

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        records.push(HrvRecord {
            date: date(&index, &row, date_col)?,
            daily_rmssd: float(&index, &row, Some(daily_col))?,
            deep_rmssd: float(&index, &row, deep_col)?,
        });
    }

    records.sort_by_key(|r| r.date);
    debug!(path = %path.display(), records = records.len(), "Loaded HRV records");
    Ok(records)
}

/// Load one daily value column keyed by `date`
pub fn load_daily_metric(path: &Path, column: &str) -> Result<Vec<DailyMetricSample>, ImportError> {
    let (mut reader, index) = open(path)?;
    let date_col = index.require("date")?;
    let value_col = index.require(column)?;

    let mut samples = Vec::new();
    for row in reader.records() {
        let row = row?;
        samples.push(DailyMetricSample::new(
            date(&index, &row, date_col)?,
            float(&index, &row, Some(value_col))?,
        ));
    }

    samples.sort_by_key(|s| s.date);
    debug!(path = %path.display(), column, samples = samples.len(), "Loaded daily metric");
    Ok(samples)
}

/// Load minute-level heart rate (`datetime`, `heart_rate`)
///
/// Rows with an empty heart rate are skipped.
pub fn load_heart_rate_intraday(path: &Path) -> Result<Vec<HeartRateSample>, ImportError> {
    let (mut reader, index) = open(path)?;
    let time_col = index.require("datetime")?;
    let hr_col = index.require("heart_rate")?;

    let mut samples = Vec::new();
    for row in reader.records() {
        let row = row?;
        let Some(heart_rate) = float(&index, &row, Some(hr_col))? else {
            continue;
        };
        let datetime = datetime(&index, &row, Some(time_col))?
            .ok_or_else(|| index.parse_error(&row, "missing datetime".to_string()))?;
        samples.push(HeartRateSample { datetime, heart_rate });
    }

    samples.sort_by_key(|s| s.datetime);
    debug!(path = %path.display(), samples = samples.len(), "Loaded intraday heart rate");
    Ok(samples)
}

/// Load exercise periods from `activity_logs.csv`
///
/// The end is `startTime + durationMinutes`. Rows lacking either are skipped.
pub fn load_activity_periods(path: &Path) -> Result<Vec<ActivityPeriod>, ImportError> {
    let (mut reader, index) = open(path)?;
    let start_col = index.require("startTime")?;
    let duration_col = index.require("durationMinutes")?;

    let mut periods = Vec::new();
    for row in reader.records() {
        let row = row?;
        let (Some(start), Some(minutes)) = (
            datetime(&index, &row, Some(start_col))?,
            float(&index, &row, Some(duration_col))?,
        ) else {
            continue;
        };
        let end = start + chrono::Duration::seconds((minutes * 60.0).round() as i64);
        periods.push(ActivityPeriod { start, end });
    }

    periods.sort_by_key(|p| p.start);
    debug!(path = %path.display(), periods = periods.len(), "Loaded activity periods");
    Ok(periods)
}

/// A directory holding the Fitbit CSV exports under their usual names
#[derive(Debug, Clone)]
pub struct FitbitExport {
    dir: PathBuf,
}

impl FitbitExport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    pub fn has(&self, file_name: &str) -> bool {
        self.path(file_name).is_file()
    }

    pub fn sleep(&self) -> Result<Vec<SleepRecord>, ImportError> {
        load_sleep(&self.path(SLEEP_FILE))
    }

    pub fn sleep_levels(&self) -> Result<Vec<StageSegment>, ImportError> {
        load_sleep_levels(&self.path(SLEEP_LEVELS_FILE))
    }

    /// HRV records, or `None` when the export has no `hrv.csv`
    pub fn hrv(&self) -> Result<Option<Vec<HrvRecord>>, ImportError> {
        let file = MetricKind::Hrv.file_name();
        if !self.has(file) {
            return Ok(None);
        }
        load_hrv(&self.path(file)).map(Some)
    }

    pub fn metric(&self, kind: MetricKind) -> Result<Vec<DailyMetricSample>, ImportError> {
        load_daily_metric(&self.path(kind.file_name()), kind.column())
    }

    pub fn heart_rate_intraday(&self) -> Result<Vec<HeartRateSample>, ImportError> {
        load_heart_rate_intraday(&self.path(HEART_RATE_INTRADAY_FILE))
    }

    /// Exercise periods; an export without `activity_logs.csv` has none
    pub fn activity_periods(&self) -> Result<Vec<ActivityPeriod>, ImportError> {
        if !self.has(ACTIVITY_LOGS_FILE) {
            return Ok(Vec::new());
        }
        load_activity_periods(&self.path(ACTIVITY_LOGS_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_sleep() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            SLEEP_FILE,
            "dateOfSleep,startTime,endTime,timeInBed,efficiency,minutesAsleep,logId,isMainSleep,deepMinutes\n\
             2025-01-02,2025-01-01T23:10:00.000,2025-01-02T07:00:00.000,470,92,430,111,True,80\n\
             2025-01-01,2024-12-31T23:40:00.000,2025-01-01T06:30:00.000,410,88,380,110,True,\n\
             2025-01-02,2025-01-02T14:00:00.000,2025-01-02T14:40:00.000,40,95,38,112,False,\n",
        );

        let records = load_sleep(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].date_of_sleep, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(records[0].deep_minutes, None);
        assert_eq!(records[1].minutes_asleep, 430.0);
        assert_eq!(records[1].deep_minutes, Some(80.0));
        assert_eq!(records[1].log_id, Some(111));
        assert_eq!(records[2].is_main_sleep, Some(false));
    }

    #[test]
    fn test_missing_column() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, SLEEP_FILE, "dateOfSleep,efficiency\n2025-01-01,90\n");
        let err = load_sleep(&path).unwrap_err();
        assert!(matches!(err, ImportError::MissingColumn { ref column, .. } if column == "minutesAsleep"));
    }

    #[test]
    fn test_bad_number_reports_line() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "hrv.csv", "date,daily_rmssd\n2025-01-01,40\n2025-01-02,abc\n");
        match load_hrv(&path).unwrap_err() {
            ImportError::Parse { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_sleep_levels_skips_classic_levels() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            SLEEP_LEVELS_FILE,
            "logId,dateOfSleep,dateTime,level,seconds,isShort\n\
             1,2025-01-02,2025-01-01T23:10:00.000,wake,300,False\n\
             1,2025-01-02,2025-01-01T23:15:00.000,light,1800,False\n\
             1,2025-01-02,2025-01-01T23:20:00.000,wake,60,True\n\
             2,2025-01-03,2025-01-02T23:00:00.000,restless,120,False\n",
        );

        let segments = load_sleep_levels(&path).unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1].level, StageLevel::Light);
        assert!(segments[2].is_short);
    }

    #[test]
    fn test_load_intraday_and_activities() {
        let dir = TempDir::new().unwrap();
        let hr = write_file(
            &dir,
            HEART_RATE_INTRADAY_FILE,
            "datetime,heart_rate\n2025-01-01 08:00:00,62\n2025-01-01 08:01:00,\n2025-01-01 08:02:00,64\n",
        );
        let samples = load_heart_rate_intraday(&hr).unwrap();
        assert_eq!(samples.len(), 2);

        let logs = write_file(
            &dir,
            ACTIVITY_LOGS_FILE,
            "logId,activityName,startTime,durationMinutes\n9,Run,2025-01-01T18:00:00.000+09:00,45\n",
        );
        let periods = load_activity_periods(&logs).unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!((periods[0].end - periods[0].start).num_minutes(), 45);
    }

    #[test]
    fn test_export_directory() {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "spo2.csv", "date,avg_spo2,min_spo2,max_spo2\n2025-01-01,96.5,93,99\n2025-01-02,,,\n");

        let export = FitbitExport::new(dir.path());
        let spo2 = export.metric(MetricKind::Spo2).unwrap();
        assert_eq!(spo2.len(), 2);
        assert_eq!(spo2[0].value, Some(96.5));
        assert_eq!(spo2[1].value, None);

        assert!(export.hrv().unwrap().is_none());
        assert!(export.activity_periods().unwrap().is_empty());
        assert!(matches!(export.sleep(), Err(ImportError::Io { .. })));
    }
}
