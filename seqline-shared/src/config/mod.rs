//! # Configuration
//!
//! Logging, sequencing and history-fetch settings for the engine and CLI.

pub mod settings;

pub use settings::{
    Config, ConfigError, ConfigFormat, HistoryConfig, LogFormat, LoggingConfig, SequencingConfig,
};
