//! Per-night timing and period summary statistics

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::{SleepRecord, StageLevel, StageSegment};
use crate::sleep_cycle::night_segments;
use crate::stats;

/// Clock times at or after this hour count as the previous evening
const EVENING_PIVOT_MINUTES: i64 = 18 * 60;

/// Wake time around the main sleep block of one night
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SleepTiming {
    pub date: NaiveDate,
    /// Leading wake segment, 0 if the night starts asleep
    pub minutes_to_fall_asleep: f64,
    /// Trailing wake segment, 0 if the night ends asleep
    pub minutes_after_wakeup: f64,
}

/// Sleep onset and wake-up latency for every night in the stage stream
///
/// Short wakes are ignored. Nights with only short wakes are skipped.
pub fn calc_sleep_timing(segments: &[StageSegment]) -> BTreeMap<NaiveDate, SleepTiming> {
    let dates: BTreeSet<NaiveDate> = segments.iter().map(|s| s.date_of_sleep).collect();

    dates
        .into_iter()
        .filter_map(|date| {
            let (_, night) = night_segments(segments, date)?;
            let first = night.first()?;
            let last = night.last()?;
            let wake_minutes = |s: &StageSegment| {
                if s.level == StageLevel::Wake {
                    s.duration_minutes()
                } else {
                    0.0
                }
            };
            Some((
                date,
                SleepTiming {
                    date,
                    minutes_to_fall_asleep: wake_minutes(*first),
                    minutes_after_wakeup: wake_minutes(*last),
                },
            ))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodInfo {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationStats {
    pub mean_hours: f64,
    pub mean_minutes: f64,
    pub min_hours: f64,
    pub max_hours: f64,
    pub std_hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Mean stage minutes and their share of mean time asleep
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageStats {
    pub deep_minutes: Option<f64>,
    pub light_minutes: Option<f64>,
    pub rem_minutes: Option<f64>,
    pub wake_minutes: Option<f64>,
    pub deep_pct: Option<f64>,
    pub light_pct: Option<f64>,
    pub rem_pct: Option<f64>,
}

/// Bedtime or wake time summary as HH:MM strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockStats {
    pub mean: String,
    pub std_minutes: Option<f64>,
    pub earliest: String,
    pub latest: String,
}

/// Sleep versus a fixed goal; negative totals mean sleep fell short
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepBalance {
    pub total_minutes: f64,
    pub total_hours: f64,
    pub daily_avg_minutes: f64,
    pub recommended_hours: f64,
    pub days_met_goal: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepTotals {
    pub time_in_bed_minutes: f64,
    pub time_in_bed_hours: f64,
    pub minutes_asleep: f64,
    pub hours_asleep: f64,
}

/// Summary statistics over a set of nights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepStats {
    pub period: PeriodInfo,
    pub duration: DurationStats,
    pub efficiency: Option<EfficiencyStats>,
    pub stages: StageStats,
    pub bedtime: Option<ClockStats>,
    pub waketime: Option<ClockStats>,
    pub balance: SleepBalance,
    pub totals: SleepTotals,
}

/// Minutes after midnight, with evening times shifted to negative values
pub fn clock_minutes(t: NaiveDateTime) -> i64 {
    let minutes = i64::from(t.hour()) * 60 + i64::from(t.minute());
    if minutes >= EVENING_PIVOT_MINUTES {
        minutes - 24 * 60
    } else {
        minutes
    }
}

/// Render pivoted clock minutes as HH:MM
pub fn clock_minutes_to_string(minutes: f64) -> String {
    let minutes = if minutes < 0.0 { minutes + 24.0 * 60.0 } else { minutes };
    let hours = ((minutes / 60.0).floor() as i64).rem_euclid(24);
    let mins = minutes.rem_euclid(60.0) as i64;
    format!("{:02}:{:02}", hours, mins)
}

fn clock_stats(times: &[NaiveDateTime]) -> Option<ClockStats> {
    let minutes: Vec<f64> = times.iter().map(|t| clock_minutes(*t) as f64).collect();
    let mean = stats::mean(&minutes)?;
    let earliest = minutes.iter().copied().fold(f64::INFINITY, f64::min);
    let latest = minutes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(ClockStats {
        mean: clock_minutes_to_string(mean),
        std_minutes: stats::sample_std(&minutes),
        earliest: clock_minutes_to_string(earliest),
        latest: clock_minutes_to_string(latest),
    })
}

fn mean_of(records: &[SleepRecord], field: impl Fn(&SleepRecord) -> Option<f64>) -> Option<f64> {
    let values: Vec<f64> = records.iter().filter_map(field).collect();
    stats::mean(&values)
}

/// Period statistics; `None` for an empty set of nights
pub fn calc_sleep_stats(records: &[SleepRecord], recommended_hours: f64) -> Option<SleepStats> {
    let start = records.iter().map(|r| r.date_of_sleep).min()?;
    let end = records.iter().map(|r| r.date_of_sleep).max()?;

    let minutes: Vec<f64> = records.iter().map(|r| r.minutes_asleep).collect();
    let hours: Vec<f64> = minutes.iter().map(|m| m / 60.0).collect();
    let mean_minutes = stats::mean(&minutes)?;

    let duration = DurationStats {
        mean_hours: mean_minutes / 60.0,
        mean_minutes,
        min_hours: hours.iter().copied().fold(f64::INFINITY, f64::min),
        max_hours: hours.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        std_hours: stats::sample_std(&hours),
    };

    let efficiencies: Vec<f64> = records.iter().filter_map(|r| r.efficiency).collect();
    let efficiency = stats::mean(&efficiencies).map(|mean| EfficiencyStats {
        mean,
        min: efficiencies.iter().copied().fold(f64::INFINITY, f64::min),
        max: efficiencies.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    });

    let mut stages = StageStats {
        deep_minutes: mean_of(records, |r| r.deep_minutes),
        light_minutes: mean_of(records, |r| r.light_minutes),
        rem_minutes: mean_of(records, |r| r.rem_minutes),
        wake_minutes: mean_of(records, |r| r.wake_minutes),
        ..StageStats::default()
    };
    if mean_minutes > 0.0 {
        let pct = |m: Option<f64>| m.map(|v| v / mean_minutes * 100.0);
        stages.deep_pct = pct(stages.deep_minutes);
        stages.light_pct = pct(stages.light_minutes);
        stages.rem_pct = pct(stages.rem_minutes);
    }

    let starts: Vec<NaiveDateTime> = records.iter().filter_map(|r| r.start_time).collect();
    let ends: Vec<NaiveDateTime> = records.iter().filter_map(|r| r.end_time).collect();

    let goal_minutes = recommended_hours * 60.0;
    let total_balance: f64 = minutes.iter().map(|m| m - goal_minutes).sum();
    let balance = SleepBalance {
        total_minutes: total_balance,
        total_hours: total_balance / 60.0,
        daily_avg_minutes: total_balance / minutes.len() as f64,
        recommended_hours,
        days_met_goal: minutes.iter().filter(|m| **m >= goal_minutes).count(),
    };

    let time_in_bed: f64 = records.iter().filter_map(|r| r.time_in_bed).sum();
    let asleep: f64 = minutes.iter().sum();

    Some(SleepStats {
        period: PeriodInfo {
            start,
            end,
            days: records.len(),
        },
        duration,
        efficiency,
        stages,
        bedtime: clock_stats(&starts),
        waketime: clock_stats(&ends),
        balance,
        totals: SleepTotals {
            time_in_bed_minutes: time_in_bed,
            time_in_bed_hours: time_in_bed / 60.0,
            minutes_asleep: asleep,
            hours_asleep: asleep / 60.0,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    #[test]
    fn test_sleep_timing_leading_and_trailing_wake() {
        let t0 = date(1).and_hms_opt(23, 0, 0).unwrap();
        let segments = vec![
            StageSegment::new(date(2), t0, StageLevel::Wake, 900.0),
            StageSegment::new(date(2), t0 + Duration::minutes(15), StageLevel::Light, 3600.0),
            StageSegment::new(date(2), t0 + Duration::minutes(75), StageLevel::Wake, 600.0),
            // Night that starts and ends asleep
            StageSegment::new(date(3), t0 + Duration::days(1), StageLevel::Light, 3600.0),
        ];

        let timing = calc_sleep_timing(&segments);
        assert_eq!(timing.len(), 2);
        assert_eq!(timing[&date(2)].minutes_to_fall_asleep, 15.0);
        assert_eq!(timing[&date(2)].minutes_after_wakeup, 10.0);
        assert_eq!(timing[&date(3)].minutes_to_fall_asleep, 0.0);
        assert_eq!(timing[&date(3)].minutes_after_wakeup, 0.0);
    }

    #[test]
    fn test_clock_pivot() {
        let evening = date(1).and_hms_opt(23, 30, 0).unwrap();
        let morning = date(2).and_hms_opt(0, 30, 0).unwrap();
        assert_eq!(clock_minutes(evening), -30);
        assert_eq!(clock_minutes(morning), 30);
        assert_eq!(clock_minutes_to_string(0.0), "00:00");
        assert_eq!(clock_minutes_to_string(-30.0), "23:30");
        assert_eq!(clock_minutes_to_string(425.5), "07:05");
    }

    #[test]
    fn test_sleep_stats() {
        let records: Vec<SleepRecord> = [(1, 23, 6.0), (2, 0, 8.0)]
            .iter()
            .map(|(d, bed_hour, hours)| {
                let bed = if *bed_hour == 23 {
                    date(*d).and_hms_opt(23, 30, 0).unwrap()
                } else {
                    date(*d + 1).and_hms_opt(0, 30, 0).unwrap()
                };
                let mut r = SleepRecord::new(date(*d + 1), hours * 60.0)
                    .with_efficiency(90.0)
                    .with_deep_minutes(60.0)
                    .with_times(bed, bed + Duration::minutes((hours * 60.0) as i64));
                r.time_in_bed = Some(hours * 60.0 + 30.0);
                r
            })
            .collect();

        let stats = calc_sleep_stats(&records, 7.0).unwrap();
        assert_eq!(stats.period.days, 2);
        assert_eq!(stats.duration.mean_hours, 7.0);
        assert_eq!(stats.duration.min_hours, 6.0);
        assert_eq!(stats.stages.deep_pct, Some(60.0 / 420.0 * 100.0));
        assert_eq!(stats.bedtime.as_ref().unwrap().mean, "00:00");
        assert_eq!(stats.bedtime.as_ref().unwrap().earliest, "23:30");
        assert_eq!(stats.balance.total_minutes, 0.0);
        assert_eq!(stats.balance.days_met_goal, 1);
        assert_eq!(stats.totals.time_in_bed_minutes, 900.0);
        assert!(stats.stages.light_minutes.is_none());
    }

    #[test]
    fn test_sleep_stats_empty() {
        assert!(calc_sleep_stats(&[], 7.0).is_none());
    }
}
