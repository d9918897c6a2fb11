//! Unified error hierarchy for sleeprs
//!
//! Analysis modules own narrow error enums; this module folds them into a
//! single type for callers that drive several stages at once.

use std::path::PathBuf;
use thiserror::Error;

use crate::circadian::FitError;
use crate::import::ImportError;
use crate::sleep_debt::SleepDebtError;

/// Top-level error type for all sleeprs operations
#[derive(Debug, Error)]
pub enum SleepRsError {
    /// Sleep debt window lacked enough nights
    #[error("Sleep debt error: {0}")]
    SleepDebt(#[from] SleepDebtError),

    /// Circadian model fit failed
    #[error("Circadian fit error: {0}")]
    Fit(#[from] FitError),

    /// CSV loading errors
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Data file expected by a command is absent
    #[error("Data file not found: {path}")]
    MissingDataFile { path: PathBuf },
}

/// Result type alias for sleeprs operations
pub type Result<T> = std::result::Result<T, SleepRsError>;

impl SleepRsError {
    /// Whether the failure only means "skip this section"
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            SleepRsError::SleepDebt(SleepDebtError::InsufficientData { .. })
                | SleepRsError::Fit(FitError::InsufficientPoints { .. })
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SleepRsError::SleepDebt(_) => ErrorSeverity::Warning,
            SleepRsError::Fit(FitError::InsufficientPoints { .. }) => ErrorSeverity::Warning,
            SleepRsError::Fit(_) => ErrorSeverity::Error,
            SleepRsError::MissingDataFile { .. } => ErrorSeverity::Warning,
            SleepRsError::Validation(_) => ErrorSeverity::Warning,
            SleepRsError::Configuration(_) => ErrorSeverity::Error,
            _ => ErrorSeverity::Error,
        }
    }

    /// Process exit status: 2 when the data was too thin, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.is_insufficient_data() {
            2
        } else {
            1
        }
    }

    /// Emit the error through tracing at its severity
    pub fn log(&self) {
        match self.severity().to_tracing_level() {
            tracing::Level::ERROR => tracing::error!(error = %self, "Command failed"),
            tracing::Level::WARN => tracing::warn!(error = %self, "Command stopped"),
            _ => tracing::info!(error = %self, "Command stopped"),
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            SleepRsError::SleepDebt(SleepDebtError::InsufficientData { required, found, .. }) => {
                format!(
                    "Not enough nights to calculate sleep debt: need {}, found {}.",
                    required, found
                )
            }
            SleepRsError::Fit(FitError::DidNotConverge { .. }) => {
                "The circadian model did not converge. Try a longer date range.".to_string()
            }
            SleepRsError::MissingDataFile { path } => {
                format!("Could not find data file: {}", path.display())
            }
            _ => self.to_string(),
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical system error requiring immediate attention
    Critical,
    /// Error that prevents operation but system can continue
    Error,
    /// Warning that doesn't prevent operation
    Warning,
    /// Informational message
    Info,
}

impl ErrorSeverity {
    /// Convert to tracing level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            ErrorSeverity::Critical => tracing::Level::ERROR,
            ErrorSeverity::Error => tracing::Level::ERROR,
            ErrorSeverity::Warning => tracing::Level::WARN,
            ErrorSeverity::Info => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_severity() {
        let err = SleepRsError::SleepDebt(SleepDebtError::InsufficientData {
            required: 5,
            found: 2,
            end_date: None,
        });
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert!(err.is_insufficient_data());

        let err = SleepRsError::Fit(FitError::DidNotConverge { iterations: 200 });
        assert_eq!(err.severity(), ErrorSeverity::Error);
        assert!(!err.is_insufficient_data());
    }

    #[test]
    fn test_user_messages() {
        let err = SleepRsError::MissingDataFile {
            path: PathBuf::from("sleep.csv"),
        };
        assert!(err.user_message().contains("Could not find"));

        let err = SleepRsError::SleepDebt(SleepDebtError::InsufficientData {
            required: 5,
            found: 3,
            end_date: None,
        });
        assert!(err.user_message().contains("need 5, found 3"));
    }

    #[test]
    fn test_exit_codes() {
        let err = SleepRsError::Fit(FitError::InsufficientPoints { required: 6, found: 4 });
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.severity().to_tracing_level(), tracing::Level::WARN);

        let err = SleepRsError::Validation("--need must be positive".to_string());
        assert_eq!(err.exit_code(), 1);
        assert_eq!(err.severity(), ErrorSeverity::Warning);
        assert!(err.user_message().contains("--need"));
    }

    #[test]
    fn test_tracing_levels() {
        assert_eq!(ErrorSeverity::Warning.to_tracing_level(), tracing::Level::WARN);
        assert_eq!(ErrorSeverity::Critical.to_tracing_level(), tracing::Level::ERROR);
    }
}
