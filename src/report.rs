//! Terminal rendering of analysis results

use colored::*;
use tabled::{settings::Style, Table, Tabled};

use crate::baseline::{BaselinePoint, MetricKind};
use crate::circadian::{format_time, CircadianAnalysis, CircadianInterpretation, FitQuality};
use crate::sleep_cycle::{CycleStats, NightCycleSummary};
use crate::sleep_debt::{format_debt_history_table, DebtCategory, DebtHistoryEntry, SleepDebtResult};
use crate::sleep_need::IntegratedSleepNeed;
use crate::sleep_stats::SleepStats;

fn opt(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", decimals, v),
        None => "-".to_string(),
    }
}

fn render<T: Tabled>(rows: Vec<T>) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

fn colored_category(category: DebtCategory) -> ColoredString {
    let label = category.to_string();
    match category {
        DebtCategory::None => label.green(),
        DebtCategory::Low => label.cyan(),
        DebtCategory::Moderate => label.yellow(),
        DebtCategory::High => label.red().bold(),
    }
}

#[derive(Tabled)]
struct EstimateRow {
    #[tabled(rename = "Method")]
    method: String,
    #[tabled(rename = "Hours")]
    hours: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Nights")]
    nights: usize,
    #[tabled(rename = "Weight")]
    weight: String,
    #[tabled(rename = "Note")]
    note: String,
}

/// Sleep need summary with the per-method breakdown
pub fn sleep_need(need: &IntegratedSleepNeed) -> String {
    let rows = need
        .estimates
        .iter()
        .map(|e| EstimateRow {
            method: e.method.to_string(),
            hours: if e.is_usable() {
                format!("{:.2}", e.value_hours)
            } else {
                "-".to_string()
            },
            confidence: e.confidence.to_string(),
            nights: e.sample_size,
            weight: format!("{:.1}", e.weight),
            note: e.note.clone(),
        })
        .collect();

    let mut out = String::new();
    out.push_str(&format!(
        "{} {:.2} h ({} confidence)\n",
        "Sleep need:".bold(),
        need.recommended_hours,
        need.confidence
    ));
    out.push_str(&format!(
        "Habitual sleep: {:.2} h, potential nightly shortfall: {:.2} h\n",
        need.habitual_hours, need.potential_debt_hours
    ));
    out.push_str(&render(rows));
    out.push('\n');
    out.push_str(&need.note);
    out
}

#[derive(Tabled)]
struct DeficitRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Deficit (min)")]
    deficit: String,
}

/// Debt result with advice and daily deficits
pub fn sleep_debt(result: &SleepDebtResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{} {:.1} h ({})\n",
        "Sleep debt:".bold(),
        result.sleep_debt_hours,
        colored_category(result.category)
    ));
    out.push_str(&format!(
        "Need {:.2} h, averaging {:.2} h over {} nights ending {}\n",
        result.sleep_need_hours, result.avg_sleep_hours, result.data_points, result.date
    ));
    out.push_str(result.category.description());
    out.push('\n');

    if let Some(advice) = result.recovery_advice() {
        out.push_str(&format!(
            "Recovery: sleep {:.1} h (+{:.1} h) for {} days\n",
            advice.suggested_sleep_hours, advice.extra_hours_per_night, advice.recovery_days
        ));
    }

    let rows = result
        .daily_deficits
        .iter()
        .map(|d| DeficitRow {
            date: d.date.to_string(),
            deficit: format!("{:+.0}", d.deficit_minutes),
        })
        .collect();
    out.push_str(&render(rows));
    out
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Avg sleep (h)")]
    avg_sleep: String,
    #[tabled(rename = "Debt (h)")]
    debt: String,
    #[tabled(rename = "Change")]
    change: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Recovery days")]
    recovery_days: u32,
}

/// Debt history table
pub fn debt_history(history: &[DebtHistoryEntry]) -> String {
    let rows = format_debt_history_table(history)
        .into_iter()
        .map(|row| HistoryRow {
            date: row.date.to_string(),
            avg_sleep: format!("{:.2}", row.avg_sleep_hours),
            debt: format!("{:.1}", row.sleep_debt_hours),
            change: match row.debt_change {
                Some(c) => format!("{:+.1}", c),
                None => "-".to_string(),
            },
            category: row.category.to_string(),
            recovery_days: row.recovery_days,
        })
        .collect();
    render(rows)
}

#[derive(Tabled)]
struct NightRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Bedtime")]
    bedtime: String,
    #[tabled(rename = "Cycles")]
    cycles: usize,
    #[tabled(rename = "Avg length")]
    avg_length: String,
    #[tabled(rename = "Deep latency")]
    deep_latency: String,
    #[tabled(rename = "1st REM")]
    first_rem: String,
    #[tabled(rename = "Deep in C1-2 (%)")]
    deep_early: String,
}

#[derive(Tabled)]
struct CycleNumberRow {
    #[tabled(rename = "Cycle")]
    cycle: u32,
    #[tabled(rename = "n")]
    n: usize,
    #[tabled(rename = "Length")]
    length: String,
    #[tabled(rename = "Deep")]
    deep: String,
    #[tabled(rename = "Light")]
    light: String,
    #[tabled(rename = "REM")]
    rem: String,
    #[tabled(rename = "REM latency")]
    rem_latency: String,
}

/// Per-night cycle summaries followed by cross-night statistics
pub fn sleep_cycles(nights: &[NightCycleSummary], stats: &CycleStats) -> String {
    let night_rows = nights
        .iter()
        .map(|n| NightRow {
            date: n.date.to_string(),
            bedtime: n.bedtime.clone().unwrap_or_else(|| "-".to_string()),
            cycles: n.cycle_count,
            avg_length: opt(n.avg_cycle_length, 0),
            deep_latency: opt(n.deep_latency, 0),
            first_rem: opt(n.first_rem_latency, 0),
            deep_early: opt(n.deep_in_first_half, 0),
        })
        .collect();

    let cycle_rows = stats
        .by_cycle
        .iter()
        .map(|(num, s)| CycleNumberRow {
            cycle: *num,
            n: s.n_samples,
            length: format!("{:.0}", s.avg_length),
            deep: format!("{:.0}", s.avg_deep),
            light: format!("{:.0}", s.avg_light),
            rem: format!("{:.0}", s.avg_rem),
            rem_latency: format!("{:.0}", s.avg_rem_latency),
        })
        .collect();

    let mut out = String::new();
    out.push_str(&render(night_rows));
    out.push('\n');
    out.push_str(&format!("{}\n", "Averages by cycle number (minutes)".bold()));
    out.push_str(&render(cycle_rows));
    out.push('\n');

    if let (Some(early), Some(late)) = (&stats.early_cycles, &stats.late_cycles) {
        out.push_str(&format!(
            "Early cycles: deep {:.0} min, REM {:.0} min | late cycles: deep {:.0} min, REM {:.0} min\n",
            early.avg_deep, early.avg_rem, late.avg_deep, late.avg_rem
        ));
    }
    if let Some(overall) = &stats.overall {
        out.push_str(&format!(
            "Average cycle {:.0} min across {} cycles on {} nights\n",
            overall.avg_cycle_length, overall.total_samples, overall.total_dates
        ));
    }
    out
}

#[derive(Tabled)]
struct ParameterRow {
    #[tabled(rename = "Parameter")]
    name: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// Fitted circadian parameters and their interpretation
pub fn circadian(analysis: &CircadianAnalysis, interpretation: &CircadianInterpretation) -> String {
    let fit = &analysis.fit;
    let rows = vec![
        ParameterRow { name: "Mean (bpm)", value: format!("{:.1}", fit.mu) },
        ParameterRow { name: "A1 (bpm)", value: format!("{:.2}", fit.a1) },
        ParameterRow { name: "A2 (bpm)", value: format!("{:.2}", fit.a2) },
        ParameterRow { name: "Amplitude (bpm)", value: format!("{:.2}", fit.a_cr) },
        ParameterRow { name: "Bathyphase", value: format_time(fit.bathyphase) },
        ParameterRow { name: "Acrophase", value: format_time(fit.acrophase) },
        ParameterRow { name: "R²", value: opt(fit.r_squared, 3) },
        ParameterRow { name: "A2/A1", value: opt(fit.a2_a1_ratio, 3) },
        ParameterRow { name: "24h variance (%)", value: opt(fit.variance_1st_pct, 1) },
        ParameterRow { name: "Hours fitted", value: fit.n_points.to_string() },
    ];

    let quality = match interpretation.quality {
        FitQuality::Excellent => interpretation.quality_text.green(),
        FitQuality::Good => interpretation.quality_text.cyan(),
        FitQuality::NeedsReview => interpretation.quality_text.yellow(),
    };

    let mut out = render(rows);
    out.push('\n');
    out.push_str(&format!(
        "{} samples used, {} excluded\n",
        analysis.samples_used, analysis.samples_excluded
    ));
    for line in [
        &interpretation.amplitude,
        &interpretation.bathyphase,
        &interpretation.acrophase,
        &interpretation.ultradian,
    ] {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&quality.to_string());
    out
}

#[derive(Tabled)]
struct BaselineRow {
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Baseline")]
    baseline: String,
    #[tabled(rename = "Deviation")]
    deviation: String,
    #[tabled(rename = "Deviation %")]
    deviation_pct: String,
    #[tabled(rename = "z")]
    z: String,
}

/// Most recent `limit` baseline points
pub fn baseline(kind: MetricKind, points: &[BaselinePoint], limit: usize) -> String {
    let start = points.len().saturating_sub(limit);
    let rows = points[start..]
        .iter()
        .map(|p| BaselineRow {
            date: p.date.to_string(),
            value: opt(p.value, 1),
            baseline: opt(p.baseline, 1),
            deviation: opt(p.deviation, 1),
            deviation_pct: opt(p.deviation_pct, 1),
            z: opt(p.z_score, 2),
        })
        .collect();
    format!("{} ({})\n{}", kind.to_string().bold(), kind.unit(), render(rows))
}

/// Period statistics block
pub fn sleep_stats(stats: &SleepStats) -> String {
    let mut rows = vec![
        ParameterRow { name: "Period", value: format!("{} to {} ({} nights)", stats.period.start, stats.period.end, stats.period.days) },
        ParameterRow { name: "Mean sleep (h)", value: format!("{:.2}", stats.duration.mean_hours) },
        ParameterRow { name: "Shortest / longest (h)", value: format!("{:.2} / {:.2}", stats.duration.min_hours, stats.duration.max_hours) },
        ParameterRow { name: "Std (h)", value: opt(stats.duration.std_hours, 2) },
    ];
    if let Some(eff) = &stats.efficiency {
        rows.push(ParameterRow { name: "Efficiency (%)", value: format!("{:.1} ({:.0}-{:.0})", eff.mean, eff.min, eff.max) });
    }
    rows.push(ParameterRow { name: "Deep (min / %)", value: format!("{} / {}", opt(stats.stages.deep_minutes, 0), opt(stats.stages.deep_pct, 1)) });
    rows.push(ParameterRow { name: "REM (min / %)", value: format!("{} / {}", opt(stats.stages.rem_minutes, 0), opt(stats.stages.rem_pct, 1)) });
    if let Some(bed) = &stats.bedtime {
        rows.push(ParameterRow { name: "Bedtime", value: format!("{} ({} to {})", bed.mean, bed.earliest, bed.latest) });
    }
    if let Some(wake) = &stats.waketime {
        rows.push(ParameterRow { name: "Wake time", value: format!("{} ({} to {})", wake.mean, wake.earliest, wake.latest) });
    }
    rows.push(ParameterRow {
        name: "Nights meeting goal",
        value: format!("{} of {} ({:.1} h goal)", stats.balance.days_met_goal, stats.period.days, stats.balance.recommended_hours),
    });
    render(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleep_debt::DebtHistoryEntry;
    use chrono::NaiveDate;

    #[test]
    fn test_opt_formatting() {
        assert_eq!(opt(Some(1.2345), 2), "1.23");
        assert_eq!(opt(None, 2), "-");
    }

    #[test]
    fn test_history_table_shows_change() {
        colored::control::set_override(false);
        let d = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let history = vec![
            DebtHistoryEntry {
                date: d,
                sleep_need_hours: 8.0,
                avg_sleep_hours: 7.0,
                sleep_debt_hours: 3.0,
                category: DebtCategory::Moderate,
                recovery_days: 10,
            },
            DebtHistoryEntry {
                date: d.succ_opt().unwrap(),
                sleep_need_hours: 8.0,
                avg_sleep_hours: 7.2,
                sleep_debt_hours: 2.5,
                category: DebtCategory::Moderate,
                recovery_days: 9,
            },
        ];
        let table = debt_history(&history);
        assert!(table.contains("2025-01-02"));
        assert!(table.contains("-0.5"));
    }
}
