//! Application Configuration Module
//!
//! This module centralizes the configuration for the interview service.
//! It loads settings from environment variables and provides a single,
//! shareable struct that can be passed throughout the application.

use secrecy::SecretString;
use std::env;
use std::time::Duration;
use tracing::Level;

// --- Application Constants ---

/// The directory holding optional prompt overrides.
pub const PROMPTS_DIR: &str = "prompts";
/// Capacity of the input and command channels between the console and the session.
pub const CHANNEL_CAPACITY: usize = 64;

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: Option<SecretString>,
    pub gemini_model: String,
    pub gemini_base_url: Option<String>,
    pub api_url: String,
    pub question_limit: u32,
    pub request_timeout: Duration,
    pub enforce_question_limit: bool,
    pub tts_command: Option<String>,
    pub stt_command: Option<String>,
    pub tts_voice: Option<String>,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: (Optional) Key for the Gemini API. Without it interviews fail to start.
    // *   `GEMINI_MODEL`: (Optional) Defaults to "gemini-2.0-flash".
    // *   `GEMINI_BASE_URL`: (Optional) Overrides the Gemini REST endpoint.
    // *   `INTERVIEW_API_URL`: (Optional) Persistence API root. Defaults to "http://localhost:3001/api".
    // *   `QUESTION_LIMIT`: (Optional) Questions per interview. Defaults to 5.
    // *   `REQUEST_TIMEOUT_SECS`: (Optional) Per-request timeout. Defaults to 30.
    // *   `ENFORCE_QUESTION_LIMIT`: (Optional) "true" to reject answers past the limit.
    // *   `TTS_COMMAND` / `STT_COMMAND`: (Optional) Speech programs; voice is off without them.
    // *   `TTS_VOICE`: (Optional) Preferred voice name.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Treat empty variables like unset ones.
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let gemini_api_key = var("GEMINI_API_KEY").map(SecretString::from);
        let gemini_model = var("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash".to_string());
        let gemini_base_url = var("GEMINI_BASE_URL");
        let api_url =
            var("INTERVIEW_API_URL").unwrap_or_else(|| "http://localhost:3001/api".to_string());

        let question_limit = match var("QUESTION_LIMIT") {
            Some(value) => match value.trim().parse::<u32>() {
                Ok(limit) if limit > 0 => limit,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "QUESTION_LIMIT",
                        value,
                    });
                }
            },
            None => 5,
        };

        let request_timeout = match var("REQUEST_TIMEOUT_SECS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: "REQUEST_TIMEOUT_SECS",
                        value,
                    });
                }
            },
            None => Duration::from_secs(30),
        };

        let enforce_question_limit = match var("ENFORCE_QUESTION_LIMIT") {
            Some(value) => parse_flag(&value).ok_or(ConfigError::InvalidValue {
                name: "ENFORCE_QUESTION_LIMIT",
                value,
            })?,
            None => false,
        };

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gemini_api_key,
            gemini_model,
            gemini_base_url,
            api_url,
            question_limit,
            request_timeout,
            enforce_question_limit,
            tts_command: var("TTS_COMMAND"),
            stt_command: var("STT_COMMAND"),
            tts_voice: var("TTS_VOICE"),
            log_level,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = config_from(&[]).unwrap();

        assert!(config.gemini_api_key.is_none());
        assert_eq!(config.gemini_model, "gemini-2.0-flash");
        assert_eq!(config.api_url, "http://localhost:3001/api");
        assert_eq!(config.question_limit, 5);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(!config.enforce_question_limit);
        assert!(config.tts_command.is_none());
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn test_variables_override_defaults() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "secret"),
            ("GEMINI_MODEL", "gemini-1.5-pro"),
            ("QUESTION_LIMIT", "3"),
            ("REQUEST_TIMEOUT_SECS", "10"),
            ("ENFORCE_QUESTION_LIMIT", "yes"),
            ("TTS_COMMAND", "espeak-ng"),
            ("RUST_LOG", "debug"),
        ])
        .unwrap();

        assert_eq!(config.gemini_api_key.unwrap().expose_secret(), "secret");
        assert_eq!(config.gemini_model, "gemini-1.5-pro");
        assert_eq!(config.question_limit, 3);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.enforce_question_limit);
        assert_eq!(config.tts_command.as_deref(), Some("espeak-ng"));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn test_empty_api_key_is_treated_as_missing() {
        let config = config_from(&[("GEMINI_API_KEY", "  ")]).unwrap();
        assert!(config.gemini_api_key.is_none());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(matches!(
            config_from(&[("QUESTION_LIMIT", "0")]),
            Err(ConfigError::InvalidValue { name: "QUESTION_LIMIT", .. })
        ));
        assert!(matches!(
            config_from(&[("REQUEST_TIMEOUT_SECS", "soon")]),
            Err(ConfigError::InvalidValue { name: "REQUEST_TIMEOUT_SECS", .. })
        ));
        assert!(matches!(
            config_from(&[("ENFORCE_QUESTION_LIMIT", "maybe")]),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            config_from(&[("RUST_LOG", "chatty")]),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }
}
