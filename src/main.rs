use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use sleeprs::baseline::{calculate_baseline_metrics, MetricKind};
use sleeprs::circadian::{interpret_circadian, CircadianAnalyzer};
use sleeprs::config::AppConfig;
use sleeprs::error::SleepRsError;
use sleeprs::import::csv::{ACTIVITY_LOGS_FILE, HEART_RATE_INTRADAY_FILE, SLEEP_FILE, SLEEP_LEVELS_FILE};
use sleeprs::import::FitbitExport;
use sleeprs::logging::{init_logging, LogFormat, LogLevel};
use sleeprs::models::{main_sleep_only, SleepRecord};
use sleeprs::report;
use sleeprs::sleep_cycle::SleepCycleDetector;
use sleeprs::sleep_debt::{SleepDebtCalculator, WeightMethod};
use sleeprs::sleep_need::SleepNeedEstimator;
use sleeprs::sleep_stats::calc_sleep_stats;

/// SleepRS - Sleep Analytics CLI
///
/// Estimates personal sleep need and sleep debt, segments sleep cycles and
/// fits the circadian heart-rate rhythm from Fitbit CSV exports.
#[derive(Parser)]
#[command(name = "sleeprs")]
#[command(author = "SleepRS Contributors")]
#[command(version)]
#[command(about = "Sleep Analytics CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory with the Fitbit CSV exports (overrides the config)
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format (pretty, json, compact)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate personal sleep need
    Need {
        /// Reference date (YYYY-MM-DD, default: latest night)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Calculate sleep debt for one date
    Debt {
        /// Window end date (YYYY-MM-DD, default: latest night)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Nightly need in hours (estimated when omitted)
        #[arg(long)]
        need: Option<f64>,

        /// Night weighting (linear, exponential, uniform)
        #[arg(short, long)]
        method: Option<WeightMethod>,
    },

    /// Sleep debt for every date in a range
    History {
        /// First date (YYYY-MM-DD)
        #[arg(short, long)]
        from: NaiveDate,

        /// Last date (YYYY-MM-DD, default: latest night)
        #[arg(short, long)]
        to: Option<NaiveDate>,

        /// Nightly need in hours (estimated when omitted)
        #[arg(long)]
        need: Option<f64>,

        /// Night weighting (linear, exponential, uniform)
        #[arg(short, long)]
        method: Option<WeightMethod>,
    },

    /// Summary statistics for the recorded nights
    Stats {
        /// First date (YYYY-MM-DD)
        #[arg(short, long)]
        from: Option<NaiveDate>,

        /// Last date (YYYY-MM-DD)
        #[arg(short, long)]
        to: Option<NaiveDate>,
    },

    /// Detect NREM/REM cycles from sleep stages
    Cycles {
        /// Single night (dateOfSleep, default: all nights)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Fit the circadian heart-rate rhythm
    Circadian {
        /// Keep heart rate recorded during sleep
        #[arg(long)]
        keep_sleep: bool,

        /// Keep heart rate recorded during exercise
        #[arg(long)]
        keep_activity: bool,
    },

    /// Personal baseline and deviations for a daily metric
    Baseline {
        /// Metric (hrv, rhr, breathing_rate, spo2, temperature)
        #[arg(short, long)]
        metric: MetricKind,

        /// Number of recent days to show
        #[arg(short, long, default_value = "14")]
        limit: usize,
    },

    /// Configure application settings
    Config {
        /// List all configuration options
        #[arg(short, long)]
        list: bool,

        /// Set a configuration value (key=value)
        #[arg(short, long)]
        set: Option<String>,

        /// Get a configuration value
        #[arg(short, long)]
        get: Option<String>,

        /// Write a default configuration file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        match err.downcast_ref::<SleepRsError>() {
            Some(e) => {
                e.log();
                let marker = if e.is_insufficient_data() { "⚠".yellow() } else { "✗".red() };
                eprintln!("{} {}", marker, e.user_message());
                std::process::exit(e.exit_code());
            }
            None => {
                eprintln!("{} {:#}", "✗".red(), err);
                std::process::exit(1);
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_config_path);
    let mut config = AppConfig::load_or_default(&config_path);

    let mut log_config = config.logging.clone();
    if cli.verbose > 0 {
        log_config.level = LogLevel::from_verbosity(cli.verbose);
    }
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    init_logging(&log_config).context("Failed to initialize logging")?;

    let export = FitbitExport::new(cli.data_dir.clone().unwrap_or_else(|| config.data_dir.clone()));
    info!(data_dir = %export.dir().display(), "Using data directory");

    match cli.command {
        Commands::Need { date } => {
            let sleep = load_sleep(&export)?;
            let hrv = export.hrv().map_err(SleepRsError::from)?;
            let estimator =
                SleepNeedEstimator::with_config(&sleep, hrv.as_deref(), config.sleep_need.clone());
            let need = estimator.estimate(date);
            output(cli.json, &need, || report::sleep_need(&need))?;
        }

        Commands::Debt { date, need, method } => {
            let sleep = load_sleep(&export)?;
            let need_hours = resolve_need(&export, &sleep, need, date, &config)?;
            let calculator =
                SleepDebtCalculator::with_config(&sleep, need_hours, config.sleep_debt.clone());
            let method = method.unwrap_or(config.sleep_debt.default_weight_method);
            let result = calculator.calculate(date, method).map_err(SleepRsError::from)?;
            output(cli.json, &result, || report::sleep_debt(&result))?;
        }

        Commands::History { from, to, need, method } => {
            let sleep = load_sleep(&export)?;
            let Some(to) = to.or_else(|| sleep.last().map(|r| r.date_of_sleep)) else {
                warn!("No sleep records, nothing to report");
                return Ok(());
            };
            let need_hours = resolve_need(&export, &sleep, need, Some(to), &config)?;
            let calculator =
                SleepDebtCalculator::with_config(&sleep, need_hours, config.sleep_debt.clone());
            let method = method.unwrap_or(config.sleep_debt.default_weight_method);
            let history = calculator.get_history(from, to, method).map_err(SleepRsError::from)?;
            output(cli.json, &history, || report::debt_history(&history))?;
        }

        Commands::Stats { from, to } => {
            let sleep: Vec<SleepRecord> = load_sleep(&export)?
                .into_iter()
                .filter(|r| from.map_or(true, |f| r.date_of_sleep >= f))
                .filter(|r| to.map_or(true, |t| r.date_of_sleep <= t))
                .collect();
            match calc_sleep_stats(&sleep, config.sleep_need.recommended_center_hours) {
                Some(stats) => output(cli.json, &stats, || report::sleep_stats(&stats))?,
                None => println!("{}", "No nights in the selected range".yellow()),
            }
        }

        Commands::Cycles { date } => {
            let segments = export
                .sleep_levels()
                .map_err(|e| missing_or(e, &export, SLEEP_LEVELS_FILE))?;
            let sleep = if export.has(SLEEP_FILE) { load_sleep(&export)? } else { Vec::new() };

            let detector = SleepCycleDetector::with_config(config.cycles.clone());
            let dates: Option<Vec<NaiveDate>> = date.map(|d| vec![d]);
            let cycles = detector.detect_cycles_multi_day(&segments, dates.as_deref());
            let mut nights = detector.summarize_nights(&segments, &sleep);
            if let Some(d) = date {
                nights.retain(|n| n.date == d);
            }
            let stats = detector.calc_cycle_stats(&cycles);
            output(cli.json, &(&nights, &stats), || report::sleep_cycles(&nights, &stats))?;
        }

        Commands::Circadian { keep_sleep, keep_activity } => {
            let heart_rate = export
                .heart_rate_intraday()
                .map_err(|e| missing_or(e, &export, HEART_RATE_INTRADAY_FILE))?;
            let sleep = if export.has(SLEEP_FILE) { load_sleep(&export)? } else { Vec::new() };
            if !export.has(ACTIVITY_LOGS_FILE) {
                info!("No activity log, exercise periods are not excluded");
            }
            let activities = export.activity_periods().map_err(SleepRsError::from)?;

            let mut circadian = config.circadian.clone();
            circadian.exclude_sleep &= !keep_sleep;
            circadian.exclude_activity &= !keep_activity;

            let analysis = CircadianAnalyzer::with_config(circadian)
                .analyze(&heart_rate, &sleep, &activities)
                .map_err(SleepRsError::from)?;
            let interpretation = interpret_circadian(&analysis.fit, &sleep);
            output(cli.json, &(&analysis, &interpretation), || {
                report::circadian(&analysis, &interpretation)
            })?;
        }

        Commands::Baseline { metric, limit } => {
            let samples = export
                .metric(metric)
                .map_err(|e| missing_or(e, &export, metric.file_name()))?;
            let points = calculate_baseline_metrics(&samples, config.baseline.for_metric(metric));
            output(cli.json, &points, || report::baseline(metric, &points, limit))?;
        }

        Commands::Config { list, set, get, init } => {
            manage_config(&mut config, &config_path, list, set, get, init)?;
        }
    }

    Ok(())
}

fn output<T: serde::Serialize>(json: bool, value: &T, table: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", table());
    }
    Ok(())
}

/// An absent export file becomes `MissingDataFile`
fn missing_or(err: sleeprs::import::ImportError, export: &FitbitExport, file: &str) -> SleepRsError {
    if export.has(file) {
        SleepRsError::from(err)
    } else {
        SleepRsError::MissingDataFile { path: export.path(file) }
    }
}

fn load_sleep(export: &FitbitExport) -> Result<Vec<SleepRecord>> {
    let records = export.sleep().map_err(|e| missing_or(e, export, SLEEP_FILE))?;
    Ok(main_sleep_only(&records))
}

fn resolve_need(
    export: &FitbitExport,
    sleep: &[SleepRecord],
    need: Option<f64>,
    date: Option<NaiveDate>,
    config: &AppConfig,
) -> Result<f64> {
    if let Some(hours) = need {
        if !(hours.is_finite() && hours > 0.0) {
            return Err(SleepRsError::Validation(format!(
                "--need must be a positive number of hours, got {}",
                hours
            ))
            .into());
        }
        return Ok(hours);
    }
    let hrv = export.hrv().map_err(SleepRsError::from)?;
    let estimate = SleepNeedEstimator::with_config(sleep, hrv.as_deref(), config.sleep_need.clone())
        .estimate(date);
    info!(need_hours = estimate.recommended_hours, "Using estimated sleep need");
    Ok(estimate.recommended_hours)
}

fn manage_config(
    config: &mut AppConfig,
    path: &Path,
    list: bool,
    set: Option<String>,
    get: Option<String>,
    init: bool,
) -> Result<()> {
    if init {
        let mut fresh = AppConfig::default();
        fresh.save_to_file(path)?;
        println!("{} {}", "✓ Wrote default configuration to".green(), path.display());
    } else if list {
        for (key, value) in config.list()? {
            println!("{} = {}", key.cyan(), value);
        }
    } else if let Some(key_value) = set {
        let (key, value) = key_value
            .split_once('=')
            .with_context(|| format!("Expected key=value, got '{}'", key_value))?;
        config.set(key.trim(), value.trim())?;
        config.save_to_file(path)?;
        println!("{} {} = {}", "✓".green(), key.trim(), config.get(key.trim())?);
    } else if let Some(key) = get {
        println!("{}", config.get(&key)?);
    } else {
        println!("Config file: {}", path.display());
    }
    Ok(())
}
