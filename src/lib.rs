// Library interface for SleepRS modules
// This allows integration tests and benches to access the core functionality

pub mod baseline;
pub mod circadian;
pub mod config;
pub mod error;
pub mod import;
pub mod logging;
pub mod models;
pub mod report;
pub mod sleep_cycle;
pub mod sleep_debt;
pub mod sleep_need;
pub mod sleep_stats;
pub mod stats;

// Re-export commonly used types for convenience
pub use models::*;
pub use baseline::{calculate_baseline_metrics, BaselinePoint, BaselineWindow, BaselineWindows, MetricKind};
pub use circadian::{CircadianAnalyzer, CircadianConfig, CircadianFit, FitError};
pub use sleep_cycle::{CycleDetectionConfig, SleepCycle, SleepCycleDetector};
pub use sleep_debt::{DebtCategory, SleepDebtCalculator, SleepDebtConfig, SleepDebtError, SleepDebtResult, WeightMethod};
pub use sleep_need::{EstimationMethod, IntegratedSleepNeed, SleepNeedConfig, SleepNeedEstimate, SleepNeedEstimator};
pub use config::AppConfig;
pub use error::{SleepRsError, Result};
pub use logging::{LogConfig, LogLevel, LogFormat};
