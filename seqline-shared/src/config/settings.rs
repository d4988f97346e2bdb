//! Layered configuration: file, then environment, then validation.

use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file contents did not deserialize.
    #[error("failed to parse configuration file {path}: {message}")]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Deserializer message.
        message: String,
    },

    /// Serializing a configuration failed.
    #[error("failed to render configuration as {format}: {message}")]
    Render {
        /// Target format.
        format: ConfigFormat,
        /// Serializer message.
        message: String,
    },

    /// Extension or format name is not yaml, json or toml.
    #[error("Unsupported configuration format: {0}. Use 'yaml', 'json' or 'toml'.")]
    UnsupportedFormat(String),

    /// An environment override could not be parsed.
    #[error("Invalid {name} value: {value}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// Rejected value.
        value: String,
    },

    /// One message per failed validation rule.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// On-disk configuration formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` or `.yml`
    Yaml,
    /// `.json`
    Json,
    /// `.toml`
    Toml,
}

impl ConfigFormat {
    /// Infers the format from a file extension.
    ///
    /// # Errors
    /// Returns [`ConfigError::UnsupportedFormat`] for any other extension.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        extension.parse()
    }

    /// Default file name written by `seqline config`.
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Yaml => "config.yaml",
            Self::Json => "config.json",
            Self::Toml => "config.toml",
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl std::fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Yaml => "yaml",
            Self::Json => "json",
            Self::Toml => "toml",
        })
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Logging settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level directive, overridden by `RUST_LOG` when set.
    pub level: String,
    /// Output encoding.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Ordering and recovery tunables.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SequencingConfig {
    /// Minimum number of events requested when recovering a gap.
    pub fetch_window: usize,
    /// Upper bound on a single recovery request, however far the high-water mark runs ahead.
    pub max_fetch_window: usize,
    /// How many events before a bootstrap trigger are scanned for a transfer.
    pub bootstrap_lookback: u32,
    /// Whether newly tracked conversations check for a preceding transfer.
    pub bootstrap_enabled: bool,
}

impl Default for SequencingConfig {
    fn default() -> Self {
        Self {
            fetch_window: 9,
            max_fetch_window: 200,
            bootstrap_lookback: 20,
            bootstrap_enabled: true,
        }
    }
}

/// Remote history endpoint used to recover missing events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    /// Base URL of the conversation events API; `None` disables remote recovery.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Page size requested from the events endpoint.
    pub page_size: usize,
    /// Per-request timeout.
    pub timeout_seconds: u64,
    /// Bearer token sent with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            page_size: 100,
            timeout_seconds: 10,
            auth_token: None,
        }
    }
}

/// Top-level configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    /// Log level and encoding.
    pub logging: LoggingConfig,
    /// Ordering and recovery tunables.
    pub sequencing: SequencingConfig,
    /// Remote history endpoint.
    pub history: HistoryConfig,
}

impl Config {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Environment variables only fill values the file left at their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// variable holds an unparsable value, or the result fails validation.
    pub fn load_config(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => Self::with_defaults(),
        };

        config.apply_env_overrides()?;

        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Parses a configuration file, choosing the format by extension.
    ///
    /// # Errors
    /// Returns an error for unreadable files, unknown extensions or malformed content.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        match format {
            ConfigFormat::Yaml => serde_yml::from_str(&content).map_err(|e| parse_error(e.to_string())),
            ConfigFormat::Json => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
            ConfigFormat::Toml => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
        }
    }

    /// Serializes the configuration in the requested format.
    ///
    /// # Errors
    /// Returns [`ConfigError::Render`] if serialization fails.
    pub fn render(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        let render_error = |message: String| ConfigError::Render { format, message };
        match format {
            ConfigFormat::Yaml => serde_yml::to_string(self).map_err(|e| render_error(e.to_string())),
            ConfigFormat::Json => {
                serde_json::to_string_pretty(self).map_err(|e| render_error(e.to_string()))
            }
            ConfigFormat::Toml => toml::to_string_pretty(self).map_err(|e| render_error(e.to_string())),
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let defaults = Self::with_defaults();

        if self.logging.level == defaults.logging.level {
            if let Ok(level) = env::var("SEQLINE_LOG_LEVEL") {
                self.logging.level = level;
            }
        }
        if self.logging.format == defaults.logging.format {
            if let Ok(format) = env::var("SEQLINE_LOG_FORMAT") {
                self.logging.format = format.parse().map_err(|_| ConfigError::InvalidEnv {
                    name: "SEQLINE_LOG_FORMAT",
                    value: format,
                })?;
            }
        }
        if self.sequencing.fetch_window == defaults.sequencing.fetch_window {
            if let Ok(window) = env::var("SEQLINE_FETCH_WINDOW") {
                self.sequencing.fetch_window =
                    window.parse().map_err(|_| ConfigError::InvalidEnv {
                        name: "SEQLINE_FETCH_WINDOW",
                        value: window,
                    })?;
            }
        }
        if self.sequencing.bootstrap_lookback == defaults.sequencing.bootstrap_lookback {
            if let Ok(lookback) = env::var("SEQLINE_BOOTSTRAP_LOOKBACK") {
                self.sequencing.bootstrap_lookback =
                    lookback.parse().map_err(|_| ConfigError::InvalidEnv {
                        name: "SEQLINE_BOOTSTRAP_LOOKBACK",
                        value: lookback,
                    })?;
            }
        }
        if self.history.base_url.is_none() {
            if let Ok(url) = env::var("SEQLINE_HISTORY_URL") {
                self.history.base_url = Some(url);
            }
        }
        if self.history.auth_token.is_none() {
            if let Ok(token) = env::var("SEQLINE_HISTORY_TOKEN") {
                self.history.auth_token = Some(token);
            }
        }

        Ok(())
    }

    /// Validates the complete configuration, collecting every problem found.
    ///
    /// # Errors
    /// Returns the list of validation messages when anything is out of range.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.logging.level.parse::<LevelFilter>().is_err() {
            errors.push(format!("Invalid log level '{}'", self.logging.level));
        }

        let sequencing = &self.sequencing;
        if sequencing.fetch_window == 0 {
            errors.push("sequencing.fetch_window must be greater than 0".to_string());
        }
        if sequencing.max_fetch_window < sequencing.fetch_window {
            errors.push(format!(
                "sequencing.max_fetch_window ({}) must be at least fetch_window ({})",
                sequencing.max_fetch_window, sequencing.fetch_window
            ));
        }
        if sequencing.bootstrap_lookback == 0 {
            errors.push("sequencing.bootstrap_lookback must be greater than 0".to_string());
        }

        let history = &self.history;
        if let Some(base_url) = history.base_url.as_deref() {
            match url::Url::parse(base_url) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => {}
                Ok(url) => errors.push(format!(
                    "history.base_url must use http or https, got '{}'",
                    url.scheme()
                )),
                Err(err) => errors.push(format!("history.base_url is not a valid URL: {err}")),
            }
        }
        if history.page_size == 0 {
            errors.push("history.page_size must be greater than 0".to_string());
        }
        if history.timeout_seconds == 0 {
            errors.push("history.timeout_seconds must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn cleanup_env_vars() {
        unsafe {
            env::remove_var("SEQLINE_LOG_LEVEL");
            env::remove_var("SEQLINE_LOG_FORMAT");
            env::remove_var("SEQLINE_FETCH_WINDOW");
            env::remove_var("SEQLINE_BOOTSTRAP_LOOKBACK");
            env::remove_var("SEQLINE_HISTORY_URL");
            env::remove_var("SEQLINE_HISTORY_TOKEN");
        }
    }

    fn write_config(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_config_with_defaults() {
        cleanup_env_vars();
        let config = Config::load_config(None).unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, LogFormat::Text);
        assert_eq!(config.sequencing.fetch_window, 9);
        assert_eq!(config.sequencing.bootstrap_lookback, 20);
        assert!(config.sequencing.bootstrap_enabled);
        assert_eq!(config.history.base_url, None);
    }

    #[test]
    #[serial]
    fn test_load_config_from_yaml_file() {
        cleanup_env_vars();
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "seqline.yaml",
            r#"
logging:
  level: debug
  format: json
sequencing:
  fetch_window: 16
history:
  base_url: "https://api.example.com/v0.3"
  page_size: 50
"#,
        );

        let config = Config::load_config(Some(path)).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.sequencing.fetch_window, 16);
        assert_eq!(config.sequencing.max_fetch_window, 200);
        assert_eq!(
            config.history.base_url.as_deref(),
            Some("https://api.example.com/v0.3")
        );
        assert_eq!(config.history.page_size, 50);
        assert_eq!(config.history.timeout_seconds, 10);
    }

    #[test]
    #[serial]
    fn test_load_config_from_json_and_toml_files() {
        cleanup_env_vars();
        let dir = TempDir::new().unwrap();
        let json = write_config(
            &dir,
            "seqline.json",
            r#"{ "sequencing": { "bootstrap_enabled": false, "bootstrap_lookback": 5 } }"#,
        );
        let toml = write_config(&dir, "seqline.toml", "[logging]\nlevel = \"warn\"\n");

        let from_json = Config::load_config(Some(json)).unwrap();
        assert!(!from_json.sequencing.bootstrap_enabled);
        assert_eq!(from_json.sequencing.bootstrap_lookback, 5);

        let from_toml = Config::load_config(Some(toml)).unwrap();
        assert_eq!(from_toml.logging.level, "warn");
    }

    #[test]
    fn test_load_config_unsupported_format() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "seqline.ini", "level = info");

        let err = Config::load_config(Some(path)).unwrap_err();
        assert!(err.to_string().contains("Unsupported configuration format"));
    }

    #[test]
    fn test_load_config_nonexistent_file() {
        let err = Config::load_config(Some(PathBuf::from("/nonexistent/seqline.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_config_malformed_yaml() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "bad.yaml", "sequencing: [invalid yaml structure");

        let err = Config::load_config(Some(path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    #[serial]
    fn test_environment_variables_fill_defaults() {
        cleanup_env_vars();
        unsafe {
            env::set_var("SEQLINE_LOG_LEVEL", "trace");
            env::set_var("SEQLINE_LOG_FORMAT", "json");
            env::set_var("SEQLINE_FETCH_WINDOW", "12");
            env::set_var("SEQLINE_HISTORY_URL", "http://localhost:9000");
            env::set_var("SEQLINE_HISTORY_TOKEN", "secret");
        }

        let config = Config::load_config(None).unwrap();

        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.sequencing.fetch_window, 12);
        assert_eq!(
            config.history.base_url.as_deref(),
            Some("http://localhost:9000")
        );
        assert_eq!(config.history.auth_token.as_deref(), Some("secret"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_file_values_take_precedence_over_environment() {
        cleanup_env_vars();
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "seqline.yaml", "logging:\n  level: error\n");
        unsafe {
            env::set_var("SEQLINE_LOG_LEVEL", "debug");
        }

        let config = Config::load_config(Some(path)).unwrap();
        assert_eq!(config.logging.level, "error");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_invalid_environment_value() {
        cleanup_env_vars();
        unsafe {
            env::set_var("SEQLINE_FETCH_WINDOW", "lots");
        }

        let err = Config::load_config(None).unwrap_err();
        assert!(err.to_string().contains("Invalid SEQLINE_FETCH_WINDOW"));

        cleanup_env_vars();
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let mut config = Config::with_defaults();
        config.logging.level = "loud".into();
        config.sequencing.fetch_window = 0;
        config.sequencing.bootstrap_lookback = 0;
        config.history.base_url = Some("ftp://history.example.com".into());
        config.history.page_size = 0;

        let errors = config.validate().unwrap_err();

        assert_eq!(errors.len(), 5, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("Invalid log level")));
        assert!(errors.iter().any(|e| e.contains("http or https")));
    }

    #[test]
    fn test_validate_window_ordering() {
        let mut config = Config::with_defaults();
        config.sequencing.fetch_window = 50;
        config.sequencing.max_fetch_window = 10;

        let errors = config.validate().unwrap_err();
        assert!(errors[0].contains("max_fetch_window"));
    }

    #[test]
    fn test_render_parses_back_in_every_format() {
        let mut config = Config::with_defaults();
        config.history.base_url = Some("https://api.example.com".into());

        for format in [ConfigFormat::Yaml, ConfigFormat::Json, ConfigFormat::Toml] {
            let dir = TempDir::new().unwrap();
            let path = write_config(&dir, format.file_name(), &config.render(format).unwrap());
            assert_eq!(Config::from_file(&path).unwrap(), config, "{format}");
        }
    }
}
