use anyhow::{Result, anyhow};
use chrono::Duration;
use serde::Deserialize;
use std::env;
use tracing::{info, warn};

use crate::scheduler::SchedulerConfig;

// Import logging macros
use crate::{log_system_event, log_validation};

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerSettings,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Scheduling tunables. Weights are code-level configuration; only the
/// operator-facing knobs are read from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    pub desired_retention: f64,
    pub maximum_interval_days: u32,
    pub learning_steps_minutes: Vec<i64>,
    pub relearning_steps_minutes: Vec<i64>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let config = Config {
            database: DatabaseConfig::from_env()?,
            scheduler: SchedulerSettings::from_env()?,
            server: ServerConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            desired_retention = self.scheduler.desired_retention,
            maximum_interval_days = self.scheduler.maximum_interval_days,
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !self.database.url.contains("sqlite:") {
            return Err(anyhow!("DATABASE_URL must start with 'sqlite:'"));
        }

        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        let retention = self.scheduler.desired_retention;
        if !(retention > 0.0 && retention < 1.0) {
            return Err(anyhow!(
                "DESIRED_RETENTION must be strictly between 0 and 1, got {retention}"
            ));
        }

        if self.scheduler.maximum_interval_days == 0 {
            return Err(anyhow!("MAXIMUM_INTERVAL_DAYS must be at least 1"));
        }

        for (name, steps) in [
            ("LEARNING_STEPS_MINUTES", &self.scheduler.learning_steps_minutes),
            (
                "RELEARNING_STEPS_MINUTES",
                &self.scheduler.relearning_steps_minutes,
            ),
        ] {
            if steps.is_empty() {
                return Err(anyhow!("{name} must contain at least one step"));
            }
            if steps.iter().any(|minutes| *minutes <= 0) {
                return Err(anyhow!("{name} steps must all be positive minutes"));
            }
        }

        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.logging.level.to_lowercase().as_str())
        {
            warn!(
                "Invalid log level '{}', using 'info' as fallback",
                self.logging.level
            );
        }

        log_validation!(success, "configuration", "Configuration validation completed successfully");
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:review_system.db".to_string());

        Ok(DatabaseConfig { url })
    }
}

impl SchedulerSettings {
    fn from_env() -> Result<Self> {
        let desired_retention = env::var("DESIRED_RETENTION")
            .unwrap_or_else(|_| "0.9".to_string())
            .parse::<f64>()
            .map_err(|_| anyhow!("Invalid DESIRED_RETENTION value: must be a number"))?;

        let maximum_interval_days = env::var("MAXIMUM_INTERVAL_DAYS")
            .unwrap_or_else(|_| "36500".to_string())
            .parse::<u32>()
            .map_err(|_| anyhow!("Invalid MAXIMUM_INTERVAL_DAYS value: must be a whole number"))?;

        let learning_steps_minutes = parse_steps(
            &env::var("LEARNING_STEPS_MINUTES").unwrap_or_else(|_| "10,60".to_string()),
        )
        .map_err(|e| anyhow!("Invalid LEARNING_STEPS_MINUTES: {e}"))?;

        let relearning_steps_minutes = parse_steps(
            &env::var("RELEARNING_STEPS_MINUTES").unwrap_or_else(|_| "30".to_string()),
        )
        .map_err(|e| anyhow!("Invalid RELEARNING_STEPS_MINUTES: {e}"))?;

        Ok(SchedulerSettings {
            desired_retention,
            maximum_interval_days,
            learning_steps_minutes,
            relearning_steps_minutes,
        })
    }

    /// Assemble the scheduler's configuration, keeping the default weight
    /// vector and minimum stability.
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            desired_retention: self.desired_retention,
            maximum_interval_days: f64::from(self.maximum_interval_days),
            learning_steps: self
                .learning_steps_minutes
                .iter()
                .map(|minutes| Duration::minutes(*minutes))
                .collect(),
            relearning_steps: self
                .relearning_steps_minutes
                .iter()
                .map(|minutes| Duration::minutes(*minutes))
                .collect(),
            ..SchedulerConfig::default()
        }
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "3000".to_string());

        let port = port_str.parse::<u16>().map_err(|_| {
            anyhow!("Invalid PORT value: '{}'. Must be a number between 1-65535", port_str)
        })?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }
}

impl LoggingConfig {
    fn from_env() -> Result<Self> {
        let level =
            env::var("RUST_LOG").unwrap_or_else(|_| "info,review_system=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

fn parse_steps(raw: &str) -> Result<Vec<i64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| format!("'{part}' is not a whole number of minutes"))
        })
        .collect()
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    if data.len() <= 8 {
        "*".repeat(data.len())
    } else {
        format!("{}***{}", &data[..4], &data[data.len() - 4..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "sqlite:test.db".to_string(),
            },
            scheduler: SchedulerSettings {
                desired_retention: 0.9,
                maximum_interval_days: 36500,
                learning_steps_minutes: vec![10, 60],
                relearning_steps_minutes: vec![30],
            },
            server: ServerConfig {
                port: 3000,
                host: "0.0.0.0".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file_enabled: true,
                console_enabled: true,
                log_directory: "logs".to_string(),
            },
        }
    }

    #[test]
    fn test_mask_sensitive_data() {
        assert_eq!(mask_sensitive_data("short"), "*****");
        assert_eq!(mask_sensitive_data("sqlite:review_system.db"), "sqli***m.db");
    }

    #[test]
    fn test_parse_steps() {
        assert_eq!(parse_steps("10,60"), Ok(vec![10, 60]));
        assert_eq!(parse_steps(" 30 "), Ok(vec![30]));
        assert_eq!(parse_steps("10,,60"), Ok(vec![10, 60]));
        assert!(parse_steps("ten").is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(test_config().validate().is_ok());

        let mut invalid = test_config();
        invalid.server.port = 0;
        assert!(invalid.validate().is_err());

        let mut invalid = test_config();
        invalid.scheduler.desired_retention = 1.0;
        assert!(invalid.validate().is_err());

        let mut invalid = test_config();
        invalid.scheduler.desired_retention = 0.0;
        assert!(invalid.validate().is_err());

        let mut invalid = test_config();
        invalid.scheduler.learning_steps_minutes = vec![];
        assert!(invalid.validate().is_err());

        let mut invalid = test_config();
        invalid.scheduler.relearning_steps_minutes = vec![-5];
        assert!(invalid.validate().is_err());

        let mut invalid = test_config();
        invalid.database.url = "postgres://elsewhere".to_string();
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn test_to_scheduler_config() {
        let settings = test_config().scheduler;
        let config = settings.to_scheduler_config();

        assert_eq!(config.desired_retention, 0.9);
        assert_eq!(config.maximum_interval_days, 36500.0);
        assert_eq!(
            config.learning_steps,
            vec![Duration::minutes(10), Duration::minutes(60)]
        );
        assert_eq!(config.relearning_steps, vec![Duration::minutes(30)]);
        // Weight vector comes from the scheduler defaults.
        assert_eq!(config.weights, crate::scheduler::DEFAULT_WEIGHTS);
    }

    #[test]
    fn test_scheduler_settings_defaults() {
        unsafe {
            env::remove_var("DESIRED_RETENTION");
            env::remove_var("MAXIMUM_INTERVAL_DAYS");
            env::remove_var("LEARNING_STEPS_MINUTES");
            env::remove_var("RELEARNING_STEPS_MINUTES");
        }

        let settings = SchedulerSettings::from_env().unwrap();
        assert_eq!(settings.desired_retention, 0.9);
        assert_eq!(settings.maximum_interval_days, 36500);
        assert_eq!(settings.learning_steps_minutes, vec![10, 60]);
        assert_eq!(settings.relearning_steps_minutes, vec![30]);
    }
}
