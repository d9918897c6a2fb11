use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::baseline::BaselineWindows;
use crate::circadian::CircadianConfig;
use crate::error::{Result, SleepRsError};
use crate::logging::LogConfig;
use crate::sleep_cycle::CycleDetectionConfig;
use crate::sleep_debt::SleepDebtConfig;
use crate::sleep_need::SleepNeedConfig;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// Directory holding the Fitbit CSV exports
    pub data_dir: PathBuf,

    /// Sleep need estimation
    pub sleep_need: SleepNeedConfig,

    /// Sleep debt calculation
    pub sleep_debt: SleepDebtConfig,

    /// Baseline windows per metric
    pub baseline: BaselineWindows,

    /// Sleep cycle detection
    pub cycles: CycleDetectionConfig,

    /// Circadian rhythm fit
    pub circadian: CircadianConfig,

    /// Logging
    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();
        ConfigMetadata {
            version: "1.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            metadata: ConfigMetadata::default(),
            data_dir: PathBuf::from("./data"),
            sleep_need: SleepNeedConfig::default(),
            sleep_debt: SleepDebtConfig::default(),
            baseline: BaselineWindows::default(),
            cycles: CycleDetectionConfig::default(),
            circadian: CircadianConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: AppConfig = toml::from_str(&content).map_err(|e| {
            SleepRsError::Configuration(format!(
                "Failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the analyses cannot run with
    pub fn validate(&self) -> Result<()> {
        let need = &self.sleep_need;
        if need.lookback_days == 0 {
            return Err(SleepRsError::Validation(
                "sleep_need.lookback_days must be at least 1".to_string(),
            ));
        }
        if !(need.recommended_min_hours <= need.recommended_center_hours
            && need.recommended_center_hours <= need.recommended_max_hours)
        {
            return Err(SleepRsError::Validation(format!(
                "sleep_need guidance must satisfy min <= center <= max, got {} <= {} <= {}",
                need.recommended_min_hours, need.recommended_center_hours, need.recommended_max_hours
            )));
        }
        if !(need.top_fraction_quantile >= 0.0 && need.top_fraction_quantile <= 1.0) {
            return Err(SleepRsError::Validation(format!(
                "sleep_need.top_fraction_quantile must be within [0, 1], got {}",
                need.top_fraction_quantile
            )));
        }
        if !(need.rebound_top_percentile > 0.0 && need.rebound_top_percentile <= 100.0) {
            return Err(SleepRsError::Validation(format!(
                "sleep_need.rebound_top_percentile must be within (0, 100], got {}",
                need.rebound_top_percentile
            )));
        }
        if self.sleep_debt.window_days == 0 {
            return Err(SleepRsError::Validation(
                "sleep_debt.window_days must be at least 1".to_string(),
            ));
        }
        if self.sleep_debt.recovery_rate_per_day <= 0.0 {
            return Err(SleepRsError::Validation(format!(
                "sleep_debt.recovery_rate_per_day must be positive, got {}",
                self.sleep_debt.recovery_rate_per_day
            )));
        }
        Ok(())
    }

    /// Save configuration to a TOML file, creating parent directories
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            SleepRsError::Configuration(format!("Failed to serialize configuration: {}", e))
        })?;
        fs::write(&path, content)?;

        debug!(path = %path.as_ref().display(), "Configuration saved");
        Ok(())
    }

    /// `~/.sleeprs/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sleeprs")
            .join("config.toml")
    }

    /// Load from `path`, falling back to defaults when it is missing or invalid
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }

        match Self::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable config file");
                Self::default()
            }
        }
    }

    fn to_value(&self) -> Result<toml::Value> {
        toml::Value::try_from(self)
            .map_err(|e| SleepRsError::Configuration(format!("Failed to serialize configuration: {}", e)))
    }

    /// All settings as dotted `key = value` pairs
    pub fn list(&self) -> Result<Vec<(String, String)>> {
        let mut entries = Vec::new();
        flatten("", &self.to_value()?, &mut entries);
        Ok(entries)
    }

    /// Value of one dotted key, e.g. `sleep_debt.window_days`
    pub fn get(&self, key: &str) -> Result<String> {
        let value = self.to_value()?;
        let mut current = &value;
        for part in key.split('.') {
            current = current
                .get(part)
                .ok_or_else(|| SleepRsError::Configuration(format!("Unknown configuration key: {}", key)))?;
        }
        Ok(display_value(current))
    }

    /// Set one dotted key from its string form
    ///
    /// The new value takes the type of the current one; the result must still
    /// deserialize into a valid configuration.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<()> {
        let mut value = self.to_value()?;
        let (parents, leaf) = match key.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, key),
        };

        let mut table = value
            .as_table_mut()
            .ok_or_else(|| SleepRsError::Configuration("Configuration root is not a table".to_string()))?;
        if let Some(parents) = parents {
            for part in parents.split('.') {
                table = table
                    .get_mut(part)
                    .and_then(toml::Value::as_table_mut)
                    .ok_or_else(|| SleepRsError::Configuration(format!("Unknown configuration key: {}", key)))?;
            }
        }

        let new_value = match table.get(leaf) {
            Some(existing) => parse_like(existing, raw)
                .ok_or_else(|| SleepRsError::Configuration(format!("Invalid value for {}: {}", key, raw)))?,
            // Unset optional fields such as logging.file_path
            None => toml::Value::String(raw.to_string()),
        };
        table.insert(leaf.to_string(), new_value);

        let updated: AppConfig = value
            .try_into()
            .map_err(|e| SleepRsError::Configuration(format!("Invalid value for {}: {}", key, e)))?;
        if updated.get(key).is_err() {
            return Err(SleepRsError::Configuration(format!("Unknown configuration key: {}", key)));
        }
        updated.validate()?;

        *self = updated;
        Ok(())
    }
}

fn parse_like(existing: &toml::Value, raw: &str) -> Option<toml::Value> {
    let raw = raw.trim();
    match existing {
        toml::Value::Integer(_) => raw.parse().ok().map(toml::Value::Integer),
        toml::Value::Float(_) => raw.parse().ok().map(toml::Value::Float),
        toml::Value::Boolean(_) => raw.parse().ok().map(toml::Value::Boolean),
        toml::Value::String(_) => Some(toml::Value::String(raw.to_string())),
        _ => None,
    }
}

fn display_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut Vec<(String, String)>) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten(&path, child, out);
            }
        }
        other => out.push((prefix.to_string(), display_value(other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleep_debt::WeightMethod;
    use tempfile::TempDir;

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();
        assert_eq!(config.sleep_debt.window_days, 14);
        assert_eq!(config.sleep_need.lookback_days, 90);
        assert_eq!(config.circadian.min_valid_hours, 6);
        assert_eq!(config.baseline.hrv.window_days, 60);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.sleep_debt.window_days = 21;
        config.data_dir = PathBuf::from("/tmp/fitbit");
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.sleep_debt.window_days, 21);
        assert_eq!(loaded.data_dir, PathBuf::from("/tmp/fitbit"));
        assert_eq!(loaded.cycles, config.cycles);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "data_dir = \"/data\"\n").unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.data_dir, PathBuf::from("/data"));
        assert_eq!(loaded.sleep_debt, SleepDebtConfig::default());
    }

    #[test]
    fn test_load_or_default_with_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "this is = = not toml").unwrap();
        assert_eq!(AppConfig::load_or_default(&path).sleep_debt.window_days, 14);
    }

    #[test]
    fn test_get_and_set() {
        let mut config = AppConfig::default();
        assert_eq!(config.get("sleep_debt.window_days").unwrap(), "14");

        config.set("sleep_debt.window_days", "10").unwrap();
        assert_eq!(config.sleep_debt.window_days, 10);

        config.set("sleep_debt.default_weight_method", "exponential").unwrap();
        assert_eq!(config.sleep_debt.default_weight_method, WeightMethod::Exponential);

        config.set("circadian.exclude_sleep", "false").unwrap();
        assert!(!config.circadian.exclude_sleep);

        assert!(config.set("sleep_debt.window_days", "many").is_err());
        assert!(config.set("sleep_debt.no_such_key", "1").is_err());
        assert!(config.get("nope").is_err());
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = AppConfig::default();

        let err = config.set("sleep_debt.window_days", "0").unwrap_err();
        assert!(matches!(err, SleepRsError::Validation(_)));
        assert_eq!(config.sleep_debt.window_days, 14);

        let err = config.set("sleep_need.recommended_min_hours", "8.5").unwrap_err();
        assert!(matches!(err, SleepRsError::Validation(_)));
        assert_eq!(err.severity(), crate::error::ErrorSeverity::Warning);
    }

    #[test]
    fn test_invalid_file_values_fall_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = AppConfig::default();
        config.sleep_need.lookback_days = 0;
        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        assert!(matches!(
            AppConfig::load_from_file(&path),
            Err(SleepRsError::Validation(_))
        ));
        assert_eq!(AppConfig::load_or_default(&path).sleep_need.lookback_days, 90);
    }

    #[test]
    fn test_list_contains_nested_keys() {
        let entries = AppConfig::default().list().unwrap();
        assert!(entries.iter().any(|(k, v)| k == "baseline.hrv.min_periods" && v == "14"));
        assert!(entries.iter().any(|(k, _)| k == "sleep_need.rebound_top_percentile"));
    }
}
