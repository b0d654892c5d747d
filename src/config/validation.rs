//! Configuration errors and parsing helpers.

use std::time::Duration;

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration source.
    #[error("failed to read config source: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// The configuration source does not exist.
    #[error("config source not found: {0}")]
    Missing(String),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Longest accepted polling interval (one day).
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Parse a polling interval.
///
/// A bare integer is a number of seconds (`60`); anything else goes through
/// humantime (`30s`, `1m`, `1h30m`, `500ms`). Intervals above
/// [`MAX_INTERVAL`] are rejected.
///
/// # Examples
///
/// ```
/// use meterlog::config::parse_interval;
///
/// assert_eq!(parse_interval("60").unwrap().as_secs(), 60);
/// assert_eq!(parse_interval("2m").unwrap().as_secs(), 120);
/// assert!(parse_interval("0").unwrap().is_zero());
/// ```
pub fn parse_interval(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("interval is empty".to_string());
    }
    let interval = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if interval > MAX_INTERVAL {
        return Err(format!(
            "interval {} exceeds the maximum of {}",
            humantime::format_duration(interval),
            humantime::format_duration(MAX_INTERVAL)
        ));
    }
    Ok(interval)
}

/// Expand environment variables in a string.
/// Supports ${VAR} and ${VAR:-default} syntax.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default_value.to_string())
        })
        .into_owned()
}
