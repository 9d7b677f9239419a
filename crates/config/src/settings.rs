//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Chat model configuration
    #[serde(default)]
    pub chat: ChatSettings,

    /// Embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Retrieval and reranking configuration
    #[serde(default)]
    pub rag: RagSettings,

    /// Document store configuration
    #[serde(default)]
    pub store: StoreSettings,
}

/// Chat model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSettings {
    /// Model identifier sent to the chat endpoint
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Sampling temperature. Protocol messages require 0 so that validation
    /// sees deterministic output.
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens the model may produce per reply
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Token budget used when truncating the message queue before a call
    #[serde(default = "default_history_token_budget")]
    pub history_token_budget: usize,

    /// Hard ceiling on the total prompt size; above this the call is not made
    #[serde(default = "default_prompt_token_ceiling")]
    pub prompt_token_ceiling: usize,

    /// Base URL of the OpenAI-compatible API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Per-call deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_chat_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_output_tokens() -> u32 {
    500
}

fn default_history_token_budget() -> usize {
    3500
}

fn default_prompt_token_ceiling() -> usize {
    15_000
}

fn default_api_base() -> String {
    "https://api.openai.com".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            model: default_chat_model(),
            temperature: 0.0,
            max_output_tokens: default_max_output_tokens(),
            history_token_budget: default_history_token_budget(),
            prompt_token_ceiling: default_prompt_token_ceiling(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Embedding model configuration
///
/// Similarity thresholds are model- and dimension-specific; `thresholds()`
/// refuses combinations that have not been calibrated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// Model identifier sent to the embeddings endpoint
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Requested embedding dimensions
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: u32,
}

fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1024
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

/// Cosine-distance thresholds for a calibrated embedding model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbeddingThresholds {
    /// Sections and workflow triggers are kept below this distance
    pub sections: f32,
    /// Definitions are kept below this distance
    pub definitions: f32,
}

impl EmbeddingSettings {
    /// Calibrated thresholds for the configured model and dimension
    pub fn thresholds(&self) -> Result<EmbeddingThresholds, ConfigError> {
        match (self.model.as_str(), self.dimensions) {
            // ada-002 ignores the dimensions parameter; it always emits 1536
            ("text-embedding-ada-002", _) => Ok(EmbeddingThresholds {
                sections: 0.15,
                definitions: 0.20,
            }),
            ("text-embedding-3-large", 1024) => Ok(EmbeddingThresholds {
                sections: 0.38,
                definitions: 0.45,
            }),
            ("text-embedding-3-large", 3072) => Ok(EmbeddingThresholds {
                sections: 0.40,
                definitions: 0.45,
            }),
            _ => Err(ConfigError::UnsupportedModel {
                model: self.model.clone(),
                dimensions: self.dimensions,
            }),
        }
    }

    /// The dimensions to send on the wire; `None` for models that reject it
    pub fn dimensions_param(&self) -> Option<u32> {
        if self.model == "text-embedding-ada-002" {
            None
        } else {
            Some(self.dimensions)
        }
    }
}

/// How retrieved section candidates are reordered before token capping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RerankStrategy {
    /// Keep the cosine-distance order
    #[default]
    None,
    /// Prioritize repeatedly retrieved sections
    MostCommon,
    /// Ask the LLM to shortlist candidates
    Llm,
}

/// Retrieval and reranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSettings {
    /// Rerank strategy applied after the cosine filter
    #[serde(default)]
    pub rerank: RerankStrategy,

    /// Number of section candidates kept before reranking
    #[serde(default = "default_initial_section_number_cap")]
    pub initial_section_number_cap: usize,

    /// Token budget across the materialized section texts
    #[serde(default = "default_final_token_cap")]
    pub final_token_cap: usize,

    /// When true the engine never answers from the model's own knowledge
    #[serde(default = "default_strict_rag")]
    pub strict_rag: bool,
}

fn default_initial_section_number_cap() -> usize {
    15
}

fn default_final_token_cap() -> usize {
    3500
}

fn default_strict_rag() -> bool {
    true
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            rerank: RerankStrategy::None,
            initial_section_number_cap: default_initial_section_number_cap(),
            final_token_cap: default_final_token_cap(),
            strict_rag: default_strict_rag(),
        }
    }
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Directory holding the columnar table files
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Environment variable naming the at-rest encryption key (base64,
    /// 32 bytes). Empty disables encryption.
    #[serde(default = "default_encryption_key_env")]
    pub encryption_key_env: String,
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_encryption_key_env() -> String {
    "CORPUS_CHAT_KEY".to_string()
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            encryption_key_env: default_encryption_key_env(),
        }
    }
}

/// Load settings from an optional file plus CORPUS_CHAT_ environment overrides
pub fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        builder = builder.add_source(File::from(path));
    }

    let config = builder
        .add_source(Environment::with_prefix("CORPUS_CHAT").separator("__"))
        .build()?;

    let settings: Settings = config.try_deserialize()?;
    tracing::debug!(target: "dev", model = %settings.chat.model, "settings loaded");
    Ok(settings)
}
