//! Orphaned timetable reconciliation configuration.
//!
//! # Example
//!
//! ```toml
//! [reconciliation]
//! environment = "production"
//! trigger_time = "02:00"
//! time_zone = "Asia/Kolkata"
//! timeout_secs = 300
//! ```
//!
//! The daily schedule is installed when `environment = "production"` or
//! `schedule_enabled = true`. Both can also be switched on from the
//! environment with `APP_ENV=production` and
//! `RECONCILIATION_SCHEDULE_ENABLED=true`.

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Environment variable naming the deployment mode.
pub const APP_ENV_VAR: &str = "APP_ENV";

/// Environment variable that force-enables the daily schedule.
pub const SCHEDULE_ENABLED_VAR: &str = "RECONCILIATION_SCHEDULE_ENABLED";

/// Reconciliation job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ReconciliationConfig {
    /// Deployment mode. `production` enables the daily schedule.
    /// Default: development
    #[serde(default)]
    pub environment: DeploymentEnvironment,

    /// Explicitly enable the daily schedule regardless of deployment mode.
    /// Default: false
    #[serde(default)]
    pub schedule_enabled: bool,

    /// Wall-clock time of the daily run, as `HH:MM`.
    /// Default: "02:00"
    #[serde(default = "default_trigger_time")]
    pub trigger_time: String,

    /// IANA time zone the trigger time is interpreted in.
    /// Default: "Asia/Kolkata"
    #[serde(default = "default_time_zone")]
    pub time_zone: String,

    /// Upper bound on a single reconciliation run, in seconds.
    /// A run that exceeds it is reported as a store failure.
    /// Default: 300
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Run one reconciliation pass when the host process starts.
    /// Default: false
    #[serde(default)]
    pub run_on_startup: bool,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            environment: DeploymentEnvironment::default(),
            schedule_enabled: false,
            trigger_time: default_trigger_time(),
            time_zone: default_time_zone(),
            timeout_secs: default_timeout_secs(),
            run_on_startup: false,
        }
    }
}

fn default_trigger_time() -> String {
    "02:00".to_string()
}

fn default_time_zone() -> String {
    "Asia/Kolkata".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

/// Deployment mode marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum DeploymentEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl std::str::FromStr for DeploymentEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(DeploymentEnvironment::Development),
            "staging" => Ok(DeploymentEnvironment::Staging),
            "production" | "prod" => Ok(DeploymentEnvironment::Production),
            other => Err(format!("Invalid deployment environment: {}", other)),
        }
    }
}

impl ReconciliationConfig {
    /// Whether the daily trigger should be installed.
    pub fn schedule_active(&self) -> bool {
        self.environment == DeploymentEnvironment::Production || self.schedule_enabled
    }

    /// Parsed trigger time.
    pub fn trigger_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.trigger_time, "%H:%M").map_err(|e| {
            ConfigError::Validation(format!(
                "reconciliation.trigger_time '{}' is not HH:MM: {}",
                self.trigger_time, e
            ))
        })
    }

    /// Parsed time zone.
    pub fn time_zone(&self) -> Result<Tz, ConfigError> {
        self.time_zone.parse::<Tz>().map_err(|e| {
            ConfigError::Validation(format!(
                "reconciliation.time_zone '{}' is not a known IANA zone: {}",
                self.time_zone, e
            ))
        })
    }

    /// Get the run timeout as a Duration.
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_secs)
    }

    /// Layer the `APP_ENV` and `RECONCILIATION_SCHEDULE_ENABLED` switches over
    /// the file values. Unset variables leave the file values alone.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(value) = std::env::var(APP_ENV_VAR) {
            self.environment = value.parse().map_err(|e: String| {
                ConfigError::Validation(format!("{}: {}", APP_ENV_VAR, e))
            })?;
        }

        if let Ok(value) = std::env::var(SCHEDULE_ENABLED_VAR) {
            self.schedule_enabled = parse_flag(&value).ok_or_else(|| {
                ConfigError::Validation(format!(
                    "{} must be true/false, got '{}'",
                    SCHEDULE_ENABLED_VAR, value
                ))
            })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.trigger_time()?;
        self.time_zone()?;
        if self.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "reconciliation.timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReconciliationConfig::default();
        assert_eq!(config.environment, DeploymentEnvironment::Development);
        assert!(!config.schedule_enabled);
        assert!(!config.schedule_active());
        assert_eq!(
            config.trigger_time().unwrap(),
            NaiveTime::from_hms_opt(2, 0, 0).unwrap()
        );
        assert_eq!(config.time_zone().unwrap(), chrono_tz::Asia::Kolkata);
        assert_eq!(config.timeout(), std::time::Duration::from_secs(300));
        assert!(!config.run_on_startup);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            environment = "production"
            schedule_enabled = false
            trigger_time = "03:30"
            time_zone = "Europe/Berlin"
            timeout_secs = 60
            run_on_startup = true
        "#;
        let config: ReconciliationConfig = toml::from_str(toml).unwrap();
        assert!(config.schedule_active());
        assert_eq!(
            config.trigger_time().unwrap(),
            NaiveTime::from_hms_opt(3, 30, 0).unwrap()
        );
        assert_eq!(config.time_zone().unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(config.timeout_secs, 60);
        assert!(config.run_on_startup);
    }

    #[test]
    fn test_either_switch_enables_schedule() {
        let mut config = ReconciliationConfig::default();
        assert!(!config.schedule_active());

        config.schedule_enabled = true;
        assert!(config.schedule_active());

        config.schedule_enabled = false;
        config.environment = DeploymentEnvironment::Production;
        assert!(config.schedule_active());

        config.environment = DeploymentEnvironment::Staging;
        assert!(!config.schedule_active());
    }

    #[test]
    fn test_invalid_trigger_time() {
        let config = ReconciliationConfig {
            trigger_time: "25:00".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ReconciliationConfig {
            trigger_time: "2am".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_time_zone() {
        let config = ReconciliationConfig {
            time_zone: "Mars/Olympus_Mons".into(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("Mars/Olympus_Mons"), "{err}");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ReconciliationConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_env_production_enables_schedule() {
        temp_env::with_vars(
            [(APP_ENV_VAR, Some("production")), (SCHEDULE_ENABLED_VAR, None)],
            || {
                let mut config = ReconciliationConfig::default();
                config.apply_env_overrides().unwrap();
                assert_eq!(config.environment, DeploymentEnvironment::Production);
                assert!(config.schedule_active());
            },
        );
    }

    #[test]
    #[serial]
    fn test_env_flag_enables_schedule() {
        temp_env::with_vars(
            [(APP_ENV_VAR, Some("development")), (SCHEDULE_ENABLED_VAR, Some("true"))],
            || {
                let mut config = ReconciliationConfig::default();
                config.apply_env_overrides().unwrap();
                assert!(config.schedule_enabled);
                assert!(config.schedule_active());
            },
        );
    }

    #[test]
    #[serial]
    fn test_env_unset_keeps_file_values() {
        temp_env::with_vars_unset([APP_ENV_VAR, SCHEDULE_ENABLED_VAR], || {
            let mut config = ReconciliationConfig {
                schedule_enabled: true,
                ..Default::default()
            };
            config.apply_env_overrides().unwrap();
            assert!(config.schedule_enabled);
            assert_eq!(config.environment, DeploymentEnvironment::Development);
        });
    }

    #[test]
    #[serial]
    fn test_env_invalid_flag_rejected() {
        temp_env::with_var(SCHEDULE_ENABLED_VAR, Some("maybe"), || {
            let mut config = ReconciliationConfig::default();
            assert!(config.apply_env_overrides().is_err());
        });
    }
}
