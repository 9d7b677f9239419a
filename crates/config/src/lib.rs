//! Configuration management for corpus chat
//!
//! Supports loading configuration from:
//! - TOML/YAML files
//! - Environment variables (CORPUS_CHAT_ prefix)
//! - Runtime overrides via the builder methods on the settings structs

pub mod settings;

pub use settings::{
    load_settings, ChatSettings, EmbeddingSettings, EmbeddingThresholds, RagSettings,
    RerankStrategy, Settings, StoreSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Unknown embedding model or dimension: {model} @ {dimensions}")]
    UnsupportedModel { model: String, dimensions: u32 },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
