//! NREM/REM sleep cycle segmentation
//!
//! A night's stage stream is walked in time order. The first non-wake
//! segment opens cycle 1; a cycle closes once enough REM has accumulated
//! (REM blocks separated by short NREM gaps count together) or when a
//! non-REM segment pushes it past the maximum cycle length. A trailing
//! partial cycle with neither condition met is dropped.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::models::{SleepRecord, StageLevel, StageSegment};
use crate::stats;

/// Cycle detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleDetectionConfig {
    /// Accumulated REM minutes that close a cycle (default: 5.0)
    pub min_rem_duration: f64,

    /// NREM minutes after which accumulated REM starts over (default: 30.0)
    pub rem_gap_threshold: f64,

    /// Cycle length in minutes that forces a close (default: 180.0)
    pub max_cycle_length: f64,

    /// Cycles reported individually in night summaries and stats (default: 5)
    pub max_summary_cycles: usize,
}

impl Default for CycleDetectionConfig {
    fn default() -> Self {
        CycleDetectionConfig {
            min_rem_duration: 5.0,
            rem_gap_threshold: 30.0,
            max_cycle_length: 180.0,
            max_summary_cycles: 5,
        }
    }
}

/// One detected NREM→REM cycle; times are minutes from the night's first segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepCycle {
    /// 1-based position within the night
    pub cycle_num: u32,
    pub start_min: f64,
    pub end_min: f64,
    /// Minutes from cycle start to the end of its last NREM segment
    pub nrem_duration: f64,
    /// Minutes from cycle start to its first REM segment
    pub rem_latency: f64,
    pub deep_minutes: f64,
    pub light_minutes: f64,
    pub rem_minutes: f64,
    pub wake_minutes: f64,
    /// Closed by the length limit rather than by REM
    pub is_timeout: bool,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

impl SleepCycle {
    pub fn total_minutes(&self) -> f64 {
        self.end_min - self.start_min
    }

    pub fn nrem_minutes(&self) -> f64 {
        self.deep_minutes + self.light_minutes
    }

    pub fn sleep_minutes(&self) -> f64 {
        self.deep_minutes + self.light_minutes + self.rem_minutes
    }

    /// Deep sleep as a share of cycle length (%)
    pub fn deep_ratio(&self) -> f64 {
        let total = self.total_minutes();
        if total == 0.0 {
            return 0.0;
        }
        self.deep_minutes / total * 100.0
    }

    /// REM as a share of cycle length (%)
    pub fn rem_ratio(&self) -> f64 {
        let total = self.total_minutes();
        if total == 0.0 {
            return 0.0;
        }
        self.rem_minutes / total * 100.0
    }

    /// REM onset in minutes from the night's first segment, if the cycle has REM
    pub fn rem_onset(&self) -> Option<f64> {
        (self.rem_minutes > 0.0).then(|| self.start_min + self.rem_latency)
    }
}

/// Per-stage minutes accumulated inside an open cycle
#[derive(Debug, Default, Clone, Copy)]
struct StageMinutes {
    deep: f64,
    light: f64,
    rem: f64,
    wake: f64,
}

impl StageMinutes {
    fn add(&mut self, level: StageLevel, minutes: f64) {
        match level {
            StageLevel::Deep => self.deep += minutes,
            StageLevel::Light => self.light += minutes,
            StageLevel::Rem => self.rem += minutes,
            StageLevel::Wake => self.wake += minutes,
        }
    }
}

/// Night-level summary of detected cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightCycleSummary {
    pub date: NaiveDate,
    pub cycle_count: usize,
    /// Minutes from the first non-wake segment to the first deep segment
    pub deep_latency: Option<f64>,
    pub avg_cycle_length: Option<f64>,
    /// Population standard deviation of cycle lengths; 0 for a single cycle
    pub cycle_length_std: Option<f64>,
    pub first_rem_latency: Option<f64>,
    /// Mean gap between consecutive REM onsets
    pub avg_rem_interval: Option<f64>,
    /// Share of the night's deep sleep that falls in cycles 1 and 2 (%)
    pub deep_in_first_half: Option<f64>,
    /// Up to `max_summary_cycles` entries
    pub cycles: Vec<CycleSummaryEntry>,
    /// Session start as HH:MM
    pub bedtime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummaryEntry {
    pub cycle_num: u32,
    pub length: f64,
    pub deep: f64,
    pub rem: f64,
    pub timeout: bool,
    pub rem_onset: Option<f64>,
    /// Wall-clock REM onset as HH:MM
    pub rem_time: Option<String>,
}

/// Averages for one cycle position across nights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleNumberStats {
    pub n_samples: usize,
    pub avg_length: f64,
    pub avg_deep: f64,
    pub avg_light: f64,
    pub avg_rem: f64,
    pub avg_rem_latency: f64,
    pub deep_ratio: f64,
    pub rem_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCycleStats {
    pub n_samples: usize,
    pub avg_deep: f64,
    pub avg_rem: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverallCycleStats {
    pub total_samples: usize,
    pub avg_cycle_length: f64,
    pub total_dates: usize,
}

/// Cross-night cycle statistics
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CycleStats {
    pub by_cycle: BTreeMap<u32, CycleNumberStats>,
    /// Cycles 1-2
    pub early_cycles: Option<PhaseCycleStats>,
    /// Cycles 3-5
    pub late_cycles: Option<PhaseCycleStats>,
    pub overall: Option<OverallCycleStats>,
}

/// Stage segments of one night, sorted by start, plus the night's origin
///
/// The origin is the earliest segment including short wakes; the returned
/// segments exclude short wakes.
pub(crate) fn night_segments(
    segments: &[StageSegment],
    date: NaiveDate,
) -> Option<(NaiveDateTime, Vec<&StageSegment>)> {
    let mut day: Vec<&StageSegment> = segments.iter().filter(|s| s.date_of_sleep == date).collect();
    if day.is_empty() {
        return None;
    }
    day.sort_by_key(|s| s.date_time);
    let origin = day[0].date_time;
    day.retain(|s| !s.is_short);
    Some((origin, day))
}

fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / 60_000.0
}

fn offset(origin: NaiveDateTime, minutes: f64) -> NaiveDateTime {
    origin + Duration::milliseconds((minutes * 60_000.0).round() as i64)
}

fn avg(cycles: &[&SleepCycle], f: impl Fn(&SleepCycle) -> f64) -> f64 {
    cycles.iter().map(|c| f(c)).sum::<f64>() / cycles.len() as f64
}

/// Sleep cycle detector
pub struct SleepCycleDetector {
    config: CycleDetectionConfig,
}

impl Default for SleepCycleDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SleepCycleDetector {
    /// Create detector with default configuration
    pub fn new() -> Self {
        SleepCycleDetector {
            config: CycleDetectionConfig::default(),
        }
    }

    /// Create detector with custom configuration
    pub fn with_config(config: CycleDetectionConfig) -> Self {
        SleepCycleDetector { config }
    }

    pub fn config(&self) -> &CycleDetectionConfig {
        &self.config
    }

    /// Detect cycles for `date` (default: latest night in the stream)
    pub fn detect_sleep_cycles(
        &self,
        segments: &[StageSegment],
        date: Option<NaiveDate>,
    ) -> Vec<SleepCycle> {
        let Some(date) = date.or_else(|| segments.iter().map(|s| s.date_of_sleep).max()) else {
            return Vec::new();
        };
        let Some((origin, night)) = night_segments(segments, date) else {
            return Vec::new();
        };

        let cfg = &self.config;
        let mut cycles: Vec<SleepCycle> = Vec::new();
        let mut cycle_start: Option<f64> = None;
        let mut stages = StageMinutes::default();
        let mut rem_start: Option<f64> = None;
        let mut nrem_end: Option<f64> = None;

        let mut cumulative_rem = 0.0;
        let mut last_rem_end: Option<f64> = None;
        let mut nrem_since_last_rem = 0.0;

        for segment in night {
            let level = segment.level;
            let elapsed = minutes_between(origin, segment.date_time);
            let duration = segment.duration_minutes();

            if cycle_start.is_none() && level != StageLevel::Wake {
                cycle_start = Some(elapsed);
            }
            let Some(start) = cycle_start else {
                continue;
            };

            stages.add(level, duration);

            if level.is_nrem() {
                nrem_end = Some(elapsed + duration);
                if last_rem_end.is_some() {
                    nrem_since_last_rem += duration;
                }
            }

            if level == StageLevel::Rem {
                rem_start.get_or_insert(elapsed);
                if nrem_since_last_rem > cfg.rem_gap_threshold {
                    cumulative_rem = 0.0;
                }
                cumulative_rem += duration;
                last_rem_end = Some(elapsed + duration);
                nrem_since_last_rem = 0.0;
            }

            let cycle_end = elapsed + duration;
            let is_timeout = cycle_end - start > cfg.max_cycle_length && level != StageLevel::Rem;
            let rem_complete = level == StageLevel::Rem && cumulative_rem >= cfg.min_rem_duration;

            if rem_complete || is_timeout {
                cycles.push(SleepCycle {
                    cycle_num: cycles.len() as u32 + 1,
                    start_min: start,
                    end_min: cycle_end,
                    nrem_duration: nrem_end.map_or(0.0, |e| e - start),
                    rem_latency: rem_start.map_or(0.0, |r| r - start),
                    deep_minutes: stages.deep,
                    light_minutes: stages.light,
                    rem_minutes: stages.rem,
                    wake_minutes: stages.wake,
                    is_timeout,
                    start_time: offset(origin, start),
                    end_time: offset(origin, cycle_end),
                });

                cycle_start = Some(cycle_end);
                nrem_end = None;
                rem_start = None;
                stages = StageMinutes::default();
                cumulative_rem = 0.0;
                last_rem_end = None;
                nrem_since_last_rem = 0.0;
            }
        }

        debug!(
            %date,
            cycles = cycles.len(),
            timeouts = cycles.iter().filter(|c| c.is_timeout).count(),
            "Sleep cycles detected"
        );

        cycles
    }

    /// Detect cycles for each night (default: every night in the stream)
    pub fn detect_cycles_multi_day(
        &self,
        segments: &[StageSegment],
        dates: Option<&[NaiveDate]>,
    ) -> BTreeMap<NaiveDate, Vec<SleepCycle>> {
        let dates: BTreeSet<NaiveDate> = match dates {
            Some(dates) => dates.iter().copied().collect(),
            None => segments.iter().map(|s| s.date_of_sleep).collect(),
        };

        dates
            .into_iter()
            .map(|date| (date, self.detect_sleep_cycles(segments, Some(date))))
            .collect()
    }

    /// Summarize the cycles of one night
    ///
    /// `session_start` enables the wall-clock bedtime and REM times.
    pub fn summarize_night(
        &self,
        segments: &[StageSegment],
        date: NaiveDate,
        session_start: Option<NaiveDateTime>,
    ) -> NightCycleSummary {
        let cycles = self.detect_sleep_cycles(segments, Some(date));
        let deep_latency = night_segments(segments, date).and_then(|(_, night)| {
            let onset = night.iter().find(|s| s.level != StageLevel::Wake)?.date_time;
            let first_deep = night.iter().find(|s| s.level == StageLevel::Deep)?.date_time;
            Some(minutes_between(onset, first_deep))
        });

        let lengths: Vec<f64> = cycles.iter().map(|c| c.total_minutes()).collect();
        let cycle_length_std = match lengths.len() {
            0 => None,
            1 => Some(0.0),
            _ => stats::population_std(&lengths),
        };

        let rem_onsets: Vec<f64> = cycles.iter().filter_map(|c| c.rem_onset()).collect();
        let intervals: Vec<f64> = rem_onsets.windows(2).map(|w| w[1] - w[0]).collect();

        let total_deep: f64 = cycles.iter().map(|c| c.deep_minutes).sum();
        let deep_in_first_half = (total_deep > 0.0).then(|| {
            let first: f64 = cycles.iter().take(2).map(|c| c.deep_minutes).sum();
            first / total_deep * 100.0
        });

        let entries = cycles
            .iter()
            .take(self.config.max_summary_cycles)
            .map(|c| CycleSummaryEntry {
                cycle_num: c.cycle_num,
                length: c.total_minutes(),
                deep: c.deep_minutes,
                rem: c.rem_minutes,
                timeout: c.is_timeout,
                rem_onset: c.rem_onset(),
                rem_time: match (session_start, c.rem_onset()) {
                    (Some(start), Some(onset)) => Some(offset(start, onset).format("%H:%M").to_string()),
                    _ => None,
                },
            })
            .collect();

        NightCycleSummary {
            date,
            cycle_count: cycles.len(),
            deep_latency,
            avg_cycle_length: stats::mean(&lengths),
            cycle_length_std,
            first_rem_latency: cycles.first().map(|c| c.rem_latency),
            avg_rem_interval: stats::mean(&intervals),
            deep_in_first_half,
            cycles: entries,
            bedtime: session_start.map(|s| s.format("%H:%M").to_string()),
        }
    }

    /// Summaries for every night in the stream, bedtimes taken from matching sleep records
    pub fn summarize_nights(
        &self,
        segments: &[StageSegment],
        records: &[SleepRecord],
    ) -> Vec<NightCycleSummary> {
        let starts: BTreeMap<NaiveDate, NaiveDateTime> = records
            .iter()
            .filter(|r| r.is_main_sleep.unwrap_or(true))
            .filter_map(|r| r.start_time.map(|t| (r.date_of_sleep, t)))
            .collect();
        let dates: BTreeSet<NaiveDate> = segments.iter().map(|s| s.date_of_sleep).collect();

        dates
            .into_iter()
            .map(|date| self.summarize_night(segments, date, starts.get(&date).copied()))
            .collect()
    }

    /// Statistics per cycle position across nights
    ///
    /// Cycles longer than `max_cycle_length` are left out.
    pub fn calc_cycle_stats(&self, cycles_by_date: &BTreeMap<NaiveDate, Vec<SleepCycle>>) -> CycleStats {
        let mut by_num: BTreeMap<u32, Vec<&SleepCycle>> = BTreeMap::new();
        for cycle in cycles_by_date.values().flatten() {
            if cycle.total_minutes() <= self.config.max_cycle_length {
                by_num.entry(cycle.cycle_num).or_default().push(cycle);
            }
        }

        let mut result = CycleStats::default();
        for num in 1..=self.config.max_summary_cycles as u32 {
            let Some(cycles) = by_num.get(&num) else {
                continue;
            };
            result.by_cycle.insert(
                num,
                CycleNumberStats {
                    n_samples: cycles.len(),
                    avg_length: avg(cycles, |c| c.total_minutes()),
                    avg_deep: avg(cycles, |c| c.deep_minutes),
                    avg_light: avg(cycles, |c| c.light_minutes),
                    avg_rem: avg(cycles, |c| c.rem_minutes),
                    avg_rem_latency: avg(cycles, |c| c.rem_latency),
                    deep_ratio: avg(cycles, |c| c.deep_ratio()),
                    rem_ratio: avg(cycles, |c| c.rem_ratio()),
                },
            );
        }

        let phase = |nums: &[u32]| -> Option<PhaseCycleStats> {
            let cycles: Vec<&SleepCycle> = nums
                .iter()
                .filter_map(|n| by_num.get(n))
                .flatten()
                .copied()
                .collect();
            (!cycles.is_empty()).then(|| PhaseCycleStats {
                n_samples: cycles.len(),
                avg_deep: avg(&cycles, |c| c.deep_minutes),
                avg_rem: avg(&cycles, |c| c.rem_minutes),
            })
        };
        result.early_cycles = phase(&[1, 2]);
        result.late_cycles = phase(&[3, 4, 5]);

        let all: Vec<&SleepCycle> = by_num.values().flatten().copied().collect();
        if !all.is_empty() {
            result.overall = Some(OverallCycleStats {
                total_samples: all.len(),
                avg_cycle_length: avg(&all, |c| c.total_minutes()),
                total_dates: cycles_by_date.len(),
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn night() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 2, 10).unwrap()
    }

    /// Build a contiguous stage stream from (level, minutes) pairs starting at 23:00
    fn stream(date: NaiveDate, stages: &[(StageLevel, f64)]) -> Vec<StageSegment> {
        let mut t = (date - Duration::days(1)).and_hms_opt(23, 0, 0).unwrap();
        stages
            .iter()
            .map(|(level, minutes)| {
                let seg = StageSegment::new(date, t, *level, minutes * 60.0);
                t += Duration::seconds((minutes * 60.0) as i64);
                seg
            })
            .collect()
    }

    use StageLevel::{Deep, Light, Rem, Wake};

    #[test]
    fn test_two_regular_cycles() {
        let segments = stream(
            night(),
            &[
                (Wake, 10.0),
                (Light, 20.0),
                (Deep, 40.0),
                (Light, 20.0),
                (Rem, 10.0),
                (Light, 30.0),
                (Deep, 20.0),
                (Light, 20.0),
                (Rem, 20.0),
                (Light, 15.0),
            ],
        );

        let detector = SleepCycleDetector::new();
        let cycles = detector.detect_sleep_cycles(&segments, None);

        assert_eq!(cycles.len(), 2);
        let first = &cycles[0];
        assert_eq!(first.start_min, 10.0);
        assert_eq!(first.end_min, 100.0);
        assert_eq!(first.rem_latency, 80.0);
        assert_eq!(first.nrem_duration, 80.0);
        assert_eq!(first.deep_minutes, 40.0);
        assert_eq!(first.rem_minutes, 10.0);
        assert!(!first.is_timeout);
        assert_eq!(first.start_time, night().and_hms_opt(0, 0, 0).unwrap() - Duration::minutes(50));

        let second = &cycles[1];
        assert_eq!(second.cycle_num, 2);
        assert_eq!(second.start_min, 100.0);
        assert_eq!(second.end_min, 190.0);
        assert_eq!(second.total_minutes(), 90.0);
        assert!((second.rem_ratio() - 20.0 / 90.0 * 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_short_rem_blocks_accumulate_across_small_gap() {
        let segments = stream(
            night(),
            &[
                (Light, 60.0),
                (Rem, 3.0),
                (Light, 10.0),
                (Rem, 3.0),
                (Light, 10.0),
            ],
        );
        let cycles = SleepCycleDetector::new().detect_sleep_cycles(&segments, Some(night()));
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].end_min, 76.0);
        assert_eq!(cycles[0].rem_minutes, 6.0);
        assert_eq!(cycles[0].rem_latency, 60.0);
    }

    #[test]
    fn test_long_gap_resets_rem_accumulator() {
        let segments = stream(
            night(),
            &[(Light, 30.0), (Rem, 3.0), (Light, 40.0), (Rem, 3.0), (Light, 10.0)],
        );
        let cycles = SleepCycleDetector::new().detect_sleep_cycles(&segments, Some(night()));
        // Neither REM block reaches 5 minutes on its own; trailing partial cycle is dropped
        assert!(cycles.is_empty());
    }

    #[test]
    fn test_timeout_closes_cycle() {
        let segments = stream(night(), &[(Light, 100.0), (Deep, 100.0), (Light, 30.0), (Rem, 10.0)]);
        let cycles = SleepCycleDetector::new().detect_sleep_cycles(&segments, Some(night()));

        assert_eq!(cycles.len(), 2);
        assert!(cycles[0].is_timeout);
        assert_eq!(cycles[0].end_min, 200.0);
        assert_eq!(cycles[0].rem_latency, 0.0);
        assert!(!cycles[1].is_timeout);
        assert_eq!(cycles[1].start_min, 200.0);
    }

    #[test]
    fn test_short_wakes_ignored() {
        let mut segments = stream(night(), &[(Light, 60.0), (Rem, 10.0)]);
        let mut short = StageSegment::new(
            night(),
            segments[0].date_time + Duration::minutes(20),
            Wake,
            60.0,
        );
        short.is_short = true;
        segments.push(short);

        let cycles = SleepCycleDetector::new().detect_sleep_cycles(&segments, Some(night()));
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].wake_minutes, 0.0);
    }

    #[test]
    fn test_unknown_date_yields_no_cycles() {
        let segments = stream(night(), &[(Light, 60.0), (Rem, 10.0)]);
        let other = night() + Duration::days(3);
        assert!(SleepCycleDetector::new().detect_sleep_cycles(&segments, Some(other)).is_empty());
        assert!(SleepCycleDetector::new().detect_sleep_cycles(&[], None).is_empty());
    }

    #[test]
    fn test_night_summary() {
        let segments = stream(
            night(),
            &[
                (Wake, 10.0),
                (Light, 20.0),
                (Deep, 40.0),
                (Light, 20.0),
                (Rem, 10.0),
                (Light, 30.0),
                (Deep, 20.0),
                (Light, 20.0),
                (Rem, 20.0),
            ],
        );
        let bedtime = (night() - Duration::days(1)).and_hms_opt(23, 0, 0).unwrap();
        let summary = SleepCycleDetector::new().summarize_night(&segments, night(), Some(bedtime));

        assert_eq!(summary.cycle_count, 2);
        assert_eq!(summary.deep_latency, Some(20.0));
        assert_eq!(summary.avg_cycle_length, Some(90.0));
        assert_eq!(summary.cycle_length_std, Some(0.0));
        assert_eq!(summary.first_rem_latency, Some(80.0));
        // REM onsets at 90 and 170 minutes
        assert_eq!(summary.avg_rem_interval, Some(80.0));
        assert!((summary.deep_in_first_half.unwrap() - 100.0).abs() < 1e-12);
        assert_eq!(summary.bedtime.as_deref(), Some("23:00"));
        assert_eq!(summary.cycles[0].rem_time.as_deref(), Some("00:30"));
    }

    #[test]
    fn test_cycle_stats_excludes_long_cycles() {
        let detector = SleepCycleDetector::new();
        let mut by_date = BTreeMap::new();
        for offset in 0..3 {
            let date = night() + Duration::days(offset);
            let segments = stream(date, &[(Light, 60.0), (Deep, 20.0), (Rem, 10.0), (Light, 70.0), (Rem, 10.0)]);
            by_date.insert(date, detector.detect_sleep_cycles(&segments, Some(date)));
        }
        let timeout_date = night() + Duration::days(10);
        let segments = stream(timeout_date, &[(Light, 200.0)]);
        by_date.insert(timeout_date, detector.detect_sleep_cycles(&segments, Some(timeout_date)));

        let stats = detector.calc_cycle_stats(&by_date);
        let first = stats.by_cycle.get(&1).unwrap();
        assert_eq!(first.n_samples, 3);
        assert_eq!(first.avg_length, 90.0);
        assert_eq!(first.avg_deep, 20.0);
        assert_eq!(stats.early_cycles.as_ref().unwrap().n_samples, 6);
        assert!(stats.late_cycles.is_none());
        let overall = stats.overall.unwrap();
        assert_eq!(overall.total_samples, 6);
        assert_eq!(overall.total_dates, 4);
    }

    #[test]
    fn test_multi_day_keys_every_night() {
        let mut segments = stream(night(), &[(Light, 60.0), (Rem, 10.0)]);
        segments.extend(stream(night() + Duration::days(1), &[(Light, 60.0), (Rem, 10.0)]));
        let cycles = SleepCycleDetector::new().detect_cycles_multi_day(&segments, None);
        assert_eq!(cycles.len(), 2);
        assert!(cycles.values().all(|c| c.len() == 1));
    }
}
