//! Loading Fitbit CSV exports
//!
//! Column names follow the Fitbit export files exactly (`dateOfSleep`,
//! `minutesAsleep`, `daily_rmssd`, ...). Loaders return typed records;
//! empty cells become `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod csv;

pub use self::csv::{
    load_activity_periods, load_daily_metric, load_heart_rate_intraday, load_hrv, load_sleep,
    load_sleep_levels, FitbitExport,
};

/// CSV import errors
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("Missing column '{column}' in {path}")]
    MissingColumn { column: String, path: PathBuf },

    #[error("{path} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: u64,
        message: String,
    },
}

/// Header name to column index lookup for one file
pub(crate) struct ColumnIndex {
    path: PathBuf,
    columns: HashMap<String, usize>,
}

impl ColumnIndex {
    pub(crate) fn new(path: &Path, headers: &::csv::StringRecord) -> Self {
        let columns = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        Self {
            path: path.to_path_buf(),
            columns,
        }
    }

    /// Index of a column the file must have
    pub(crate) fn require(&self, column: &str) -> Result<usize, ImportError> {
        self.columns
            .get(column)
            .copied()
            .ok_or_else(|| ImportError::MissingColumn {
                column: column.to_string(),
                path: self.path.clone(),
            })
    }

    /// Index of a column that may be absent
    pub(crate) fn optional(&self, column: &str) -> Option<usize> {
        self.columns.get(column).copied()
    }

    pub(crate) fn parse_error(&self, record: &::csv::StringRecord, message: String) -> ImportError {
        ImportError::Parse {
            path: self.path.clone(),
            line: record.position().map(|p| p.line()).unwrap_or(0),
            message,
        }
    }
}

/// Non-empty trimmed cell
pub(crate) fn cell<'r>(record: &'r ::csv::StringRecord, idx: Option<usize>) -> Option<&'r str> {
    idx.and_then(|i| record.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("nan"))
}

/// Parse a timestamp, dropping any UTC offset
///
/// Fitbit writes local wall-clock times such as `2025-01-01T23:10:30.000`;
/// re-exported files may carry `2025-01-01 23:10:30` instead.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    let formats = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];

    for format in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }

    // Midnight for bare dates
    parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse a calendar date, accepting a trailing time component
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    let head = s.get(..10).unwrap_or(s);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Exports spell booleans `True`/`False`
pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_datetime_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(23, 10, 30)
            .unwrap();
        assert_eq!(parse_datetime("2025-01-01T23:10:30.000"), Some(expected));
        assert_eq!(parse_datetime("2025-01-01 23:10:30"), Some(expected));
        assert_eq!(parse_datetime("2025-01-01T23:10:30+09:00"), Some(expected));
        assert_eq!(
            parse_datetime("2025-01-01"),
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn test_parse_date_and_bool() {
        assert_eq!(parse_date("2025-03-04 00:00:00"), NaiveDate::from_ymd_opt(2025, 3, 4));
        assert_eq!(parse_date("03/04/2025"), None);
        assert_eq!(parse_bool("True"), Some(true));
        assert_eq!(parse_bool("false"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
