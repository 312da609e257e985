//! Configuration module for the protection engine.
//!
//! Provides configuration loading, validation, and environment variable
//! interpolation for every engine component.
//!
//! # Usage
//!
//! ```rust,ignore
//! use protection_engine::config::{Config, load_config};
//!
//! // Load from default path (config.yaml)
//! let config = load_config(None)?;
//!
//! // Load from custom path
//! let config = load_config(Some("custom/config.yaml"))?;
//!
//! // Access configuration values
//! println!("heartbeat: {}s", config.reconciliation.interval_secs);
//! ```

mod emergency;
mod engine;
mod execution;
mod logging;
mod persistence;
mod protection;
mod reconciliation;
mod retry;
mod trailing;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use emergency::EmergencyConfig;
pub use engine::{EngineConfig, PaperInstrument};
pub use execution::ExecutionConfig;
pub use logging::LoggingConfig;
pub use persistence::PersistenceConfig;
pub use protection::ProtectionConfig;
pub use reconciliation::ReconciliationConfig;
pub use retry::RetryConfig;
pub use trailing::TrailingConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Engine environment configuration.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Venue call retry configuration.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Execution coordinator configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Protection leg configuration.
    #[serde(default)]
    pub protection: ProtectionConfig,
    /// Trailing stop configuration.
    #[serde(default)]
    pub trailing: TrailingConfig,
    /// Emergency close configuration.
    #[serde(default)]
    pub emergency: EmergencyConfig,
    /// Reconciliation configuration.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Persistence configuration.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// # Arguments
///
/// * `path` - Optional path to the config file. Defaults to "config.yaml".
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or("config.yaml");

    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_string(),
        source: e,
    })?;

    let interpolated = interpolate_env_vars(&contents);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a YAML string (useful for testing).
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax.
#[allow(clippy::expect_used)] // Regex is compile-time constant; expect() is safe here
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let mut result = input.to_string();

    // Match ${VAR} or ${VAR:-default} patterns
    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    for cap in re.captures_iter(input) {
        let Some(full_match) = cap.get(0) else {
            continue;
        };
        let Some(var_match) = cap.get(1) else {
            continue;
        };
        let full_match = full_match.as_str();
        let var_name = var_match.as_str();
        let default_value = cap.get(2).map(|m| m.as_str());

        let value = match std::env::var(var_name) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.map_or_else(String::new, str::to_string),
        };

        result = result.replace(full_match, &value);
    }

    result
}

/// Validate configuration values.
#[allow(clippy::too_many_lines)]
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Engine mode
    let valid_modes = ["PAPER", "LIVE"];
    if !valid_modes.contains(&config.engine.mode.to_uppercase().as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "engine.mode must be one of: {valid_modes:?}"
        )));
    }

    for instrument in &config.engine.instruments {
        if instrument.symbol.is_empty() {
            return Err(ConfigError::ValidationError(
                "engine.instruments entries need a non-empty symbol".to_string(),
            ));
        }
        if instrument.tick_size <= Decimal::ZERO || instrument.lot_size <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(format!(
                "engine.instruments.{}: tick_size and lot_size must be positive",
                instrument.symbol
            )));
        }
        if instrument.initial_mark <= Decimal::ZERO {
            return Err(ConfigError::ValidationError(format!(
                "engine.instruments.{}: initial_mark must be positive",
                instrument.symbol
            )));
        }
    }

    // Retry bounds
    if config.retry.max_rate_limit_attempts == 0 || config.retry.max_transient_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry attempt counts must be at least 1".to_string(),
        ));
    }
    if config.retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "retry.backoff_multiplier must be at least 1.0".to_string(),
        ));
    }
    if !(0.0..1.0).contains(&config.retry.jitter_factor) {
        return Err(ConfigError::ValidationError(
            "retry.jitter_factor must be in [0.0, 1.0)".to_string(),
        ));
    }
    if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
        return Err(ConfigError::ValidationError(
            "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".to_string(),
        ));
    }
    if config.retry.call_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "retry.call_timeout_secs must be positive".to_string(),
        ));
    }

    // Protection offsets are fractions of the entry price
    let fraction = |name: &str, value: Decimal| {
        if value <= Decimal::ZERO || value >= Decimal::ONE {
            Err(ConfigError::ValidationError(format!(
                "{name} must be between 0 and 1 exclusive"
            )))
        } else {
            Ok(())
        }
    };
    fraction("protection.stop_loss_pct", config.protection.stop_loss_pct)?;
    fraction("protection.take_profit_pct", config.protection.take_profit_pct)?;
    if config.protection.size_tolerance_pct < Decimal::ZERO
        || config.protection.size_tolerance_pct >= Decimal::ONE
    {
        return Err(ConfigError::ValidationError(
            "protection.size_tolerance_pct must be in [0, 1)".to_string(),
        ));
    }

    // Trailing offsets
    fraction("trailing.arm_threshold_pct", config.trailing.arm_threshold_pct)?;
    fraction("trailing.trail_pct", config.trailing.trail_pct)?;

    // Emergency close must make at least one attempt
    if config.emergency.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "emergency.max_attempts must be at least 1".to_string(),
        ));
    }

    // Reconciliation
    if config.reconciliation.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "reconciliation.interval_secs must be positive".to_string(),
        ));
    }
    fraction("reconciliation.safe_sl_pct", config.reconciliation.safe_sl_pct)?;

    // Logging format
    let valid_formats = ["json", "pretty"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "logging.format must be one of: {valid_formats:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.engine.mode, "PAPER");
        assert_eq!(config.retry.max_rate_limit_attempts, 5);
        assert_eq!(config.execution.cooldown_secs, 300);
        assert_eq!(config.protection.stop_loss_pct, dec!(0.02));
        assert_eq!(config.trailing.trail_pct, dec!(0.01));
        assert_eq!(config.emergency.max_attempts, 3);
        assert_eq!(config.reconciliation.interval_secs, 30);
        assert_eq!(config.logging.level, "info");

        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_minimal_config() {
        let yaml = r"
engine:
  mode: PAPER
";

        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load minimal config: {e}"),
        };
        assert_eq!(config.engine.mode, "PAPER");
        assert_eq!(config.retry.initial_backoff_ms, 500); // Default value
    }

    #[test]
    fn test_env_var_with_default_when_missing() {
        // Use a variable name unlikely to exist
        let input = "mode: ${PENGINE_CONFIG_TEST_NONEXISTENT_VAR:-PAPER}";
        let result = interpolate_env_vars(input);

        // When env var doesn't exist, should use default value
        assert_eq!(result, "mode: PAPER");
    }

    #[test]
    #[expect(clippy::literal_string_with_formatting_args)] // ${...} is env var syntax, not format args
    fn test_env_var_with_default_uses_existing() {
        // PATH should always exist
        let input = "state_dir: ${PATH:-default}";
        let result = interpolate_env_vars(input);

        assert_ne!(result, "state_dir: default");
        assert!(result.starts_with("state_dir: "));
    }

    #[test]
    fn test_env_var_without_default_becomes_empty() {
        let input = "level: ${PENGINE_CONFIG_TEST_UNLIKELY_TO_EXIST}";
        let result = interpolate_env_vars(input);

        // Without default, missing env var becomes empty string
        assert_eq!(result, "level: ");
    }

    #[test]
    fn test_validation_invalid_mode() {
        let yaml = r"
engine:
  mode: BACKTEST
";

        let result = load_config_from_string(yaml);
        let Err(err) = result else {
            panic!("expected error for invalid mode");
        };
        assert!(err.to_string().contains("mode"));
    }

    #[test]
    fn test_validation_zero_emergency_attempts() {
        let yaml = r"
emergency:
  max_attempts: 0
";

        let result = load_config_from_string(yaml);
        let Err(err) = result else {
            panic!("expected error for zero attempts");
        };
        assert!(err.to_string().contains("max_attempts"));
    }

    #[test]
    fn test_validation_stop_loss_out_of_range() {
        let yaml = r#"
protection:
  stop_loss_pct: "1.5"
"#;

        let result = load_config_from_string(yaml);
        let Err(err) = result else {
            panic!("expected error for out-of-range stop_loss_pct");
        };
        assert!(err.to_string().contains("stop_loss_pct"));
    }

    #[test]
    fn test_full_config_parse() {
        let yaml = r#"
engine:
  mode: PAPER
  instruments:
    - symbol: "BTC-USDT-SWAP"
      tick_size: "0.1"
      lot_size: "0.01"
      min_size: "0.01"
      max_leverage: 20
      initial_mark: "50000"

retry:
  max_rate_limit_attempts: 4
  initial_backoff_ms: 250
  call_timeout_secs: 5

execution:
  default_leverage: 10
  cooldown_secs: 120
  max_hold_secs: 86400

protection:
  stop_loss_pct: "0.03"
  take_profit_pct: "0.06"

trailing:
  arm_threshold_pct: "0.015"
  trail_pct: "0.008"

emergency:
  max_attempts: 5
  initial_backoff_ms: 500

reconciliation:
  interval_secs: 15
  safe_sl_pct: "0.025"

persistence:
  state_dir: "/var/lib/protection-engine"

logging:
  level: "debug"
  format: "pretty"
"#;

        let config = match load_config_from_string(yaml) {
            Ok(c) => c,
            Err(e) => panic!("should load full config: {e}"),
        };

        assert_eq!(config.engine.instruments.len(), 1);
        assert_eq!(config.engine.instruments[0].max_leverage, 20);
        assert_eq!(config.retry.max_rate_limit_attempts, 4);
        assert_eq!(config.execution.default_leverage, Some(10));
        assert_eq!(config.execution.max_hold_secs, Some(86400));
        assert_eq!(config.protection.stop_loss_pct, dec!(0.03));
        assert_eq!(config.trailing.trail_pct, dec!(0.008));
        assert_eq!(config.emergency.max_attempts, 5);
        assert_eq!(config.reconciliation.interval_secs, 15);
        assert_eq!(
            config.persistence.state_dir,
            std::path::PathBuf::from("/var/lib/protection-engine")
        );
        assert_eq!(config.logging.format, "pretty");
    }
}
