use super::types::*;
use crate::error_handling::types::ConfigError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound for `rules.auto_complete_after_hours` (100 years).
pub const MAX_AUTO_COMPLETE_HOURS: i64 = 24 * 365 * 100;

/// Upper bound for `termination.recent_activity_minutes` (100 years).
pub const MAX_RECENT_ACTIVITY_MINUTES: i64 = MAX_AUTO_COMPLETE_HOURS * 60;

/// Application configuration structure that defines all runtime parameters.
///
/// Every section is optional in the TOML file; missing values fall back to
/// their defaults.
///
/// # Examples
///
/// ```
/// use worksession::configuration::config::Config;
///
/// let config = Config::from_toml_str(r#"
///     [rules]
///     max_active_sessions = 2
///
///     [monitor]
///     policy = "auto"
/// "#).unwrap();
/// assert_eq!(config.rules.max_active_sessions, 2);
/// ```
///
/// # Fields Overview
///
/// - `database`: where sessions are persisted
/// - `rules`: similarity threshold and housekeeping limits used when deciding a switch
/// - `transitions`: whether terminal sessions may be reopened
/// - `monitor`: polling, debounce, rate limiting and the switch policy
/// - `termination`: backup, orphan handling and batch concurrency
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub rules: SwitchRules,
    pub transitions: TransitionPolicy,
    pub monitor: MonitorConfig,
    pub termination: TerminationConfig,
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(raw).map_err(|e| ConfigError::Toml(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn unit_interval(name: &str, value: f64) -> Result<(), ConfigError> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::NotInRange(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )))
            }
        }

        unit_interval("rules.similarity_threshold", self.rules.similarity_threshold)?;
        unit_interval(
            "monitor.auto_switch_threshold",
            self.monitor.auto_switch_threshold,
        )?;

        if self.rules.max_active_sessions == 0 {
            return Err(ConfigError::NotInRange(
                "rules.max_active_sessions must be at least 1".into(),
            ));
        }
        if !(0..=MAX_AUTO_COMPLETE_HOURS).contains(&self.rules.auto_complete_after_hours) {
            return Err(ConfigError::NotInRange(format!(
                "rules.auto_complete_after_hours must be within [0, {}], got {}",
                MAX_AUTO_COMPLETE_HOURS, self.rules.auto_complete_after_hours
            )));
        }
        if self.rules.candidate_lookup_limit == 0 {
            return Err(ConfigError::NotInRange(
                "rules.candidate_lookup_limit must be at least 1".into(),
            ));
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::NotInRange(
                "monitor.poll_interval_ms must be positive".into(),
            ));
        }
        if self.monitor.history_limit == 0 {
            return Err(ConfigError::NotInRange(
                "monitor.history_limit must be at least 1".into(),
            ));
        }
        if self.termination.batch_concurrency == 0 {
            return Err(ConfigError::NotInRange(
                "termination.batch_concurrency must be at least 1".into(),
            ));
        }
        if !(0..=MAX_RECENT_ACTIVITY_MINUTES).contains(&self.termination.recent_activity_minutes) {
            return Err(ConfigError::NotInRange(format!(
                "termination.recent_activity_minutes must be within [0, {}], got {}",
                MAX_RECENT_ACTIVITY_MINUTES, self.termination.recent_activity_minutes
            )));
        }
        if self
            .monitor
            .allowed_paths
            .iter()
            .chain(self.monitor.excluded_paths.iter())
            .any(|p| p.is_empty())
        {
            return Err(ConfigError::Invalid(
                "monitor path filters cannot contain empty entries".into(),
            ));
        }
        Ok(())
    }
}
