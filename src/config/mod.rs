// Configuration management module
// TOML settings stored in the data directory plus interactive editing

pub mod interactive;
pub mod settings;

pub use interactive::{prompt_api_key, run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, GeminiConfig, IngestConfig, OllamaConfig, ProviderKind, RetrievalConfig,
};
