//! Configuration types for Colloquy
//!
//! Configuration is loaded once at startup and validated eagerly, so a missing
//! credential surfaces as a [`ColloquyError::Configuration`] before any
//! conversation starts rather than deep inside a generation call.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conversation::TrimPolicy;
use crate::error::{ColloquyError, Result};

/// Main configuration for Colloquy
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ColloquyConfig {
    /// LLM provider configuration
    pub llm: LLMProviderConfig,

    /// Context-window trimming applied before every generation
    pub trim: TrimPolicy,

    /// Tracing project and credentials
    pub tracing: TracingConfig,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Chatbot prompt settings
    pub chat: ChatConfig,
}

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    #[default]
    Groq,
    OpenAI,
}

impl LLMProvider {
    /// Environment variable holding the provider's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            LLMProvider::Groq => "GROQ_API_KEY",
            LLMProvider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LLMProviderConfig {
    /// Provider type
    pub provider: LLMProvider,

    /// Model name (empty selects the provider default)
    pub model: String,

    /// API key (if needed, prefer env vars)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL (for custom endpoints)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Sampling temperature (0.0-2.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate per reply
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,

    /// Per-request timeout for the provider
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for LLMProviderConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::Groq,
            model: String::new(),
            api_key: None,
            base_url: None,
            temperature: None,
            max_tokens: None,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Tracing configuration
///
/// Tracing is optional: a missing API key only disables export, it never
/// fails startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Whether tracing export is requested
    pub enabled: bool,

    /// Project name recorded on every exchange span
    pub project: String,

    /// Tracing service API key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            project: "default".to_string(),
            api_key: None,
        }
    }
}

impl TracingConfig {
    /// Whether traces can actually be exported.
    pub fn export_enabled(&self) -> bool {
        self.enabled && self.api_key.is_some()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Request timeout applied to every route
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Chatbot prompt configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// System prompt template; `{language}` is filled from request parameters
    pub system_prompt: String,

    /// Language used when a request does not name one
    pub default_language: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_CHAT_SYSTEM_PROMPT.to_string(),
            default_language: "English".to_string(),
        }
    }
}

/// System prompt used by the chatbot.
pub const DEFAULT_CHAT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer all questions to the best of your ability in {language}.";

/// Builder for ColloquyConfig
pub struct ConfigBuilder {
    config: ColloquyConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: ColloquyConfig::default(),
        }
    }

    /// Set LLM configuration
    pub fn llm(mut self, config: LLMProviderConfig) -> Self {
        self.config.llm = config;
        self
    }

    /// Set trim policy
    pub fn trim(mut self, policy: TrimPolicy) -> Self {
        self.config.trim = policy;
        self
    }

    /// Set tracing configuration
    pub fn tracing(mut self, config: TracingConfig) -> Self {
        self.config.tracing = config;
        self
    }

    /// Set server configuration
    pub fn server(mut self, config: ServerConfig) -> Self {
        self.config.server = config;
        self
    }

    /// Set chatbot prompt configuration
    pub fn chat(mut self, config: ChatConfig) -> Self {
        self.config.chat = config;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ColloquyConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ColloquyConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. `.env` in the working directory or any parent
    /// 2. Default configuration
    /// 3. `~/.config/colloquy/colloquy.toml`, then `colloquy.toml`, then the
    ///    path from `COLLOQUY_CONFIG_PATH`
    /// 4. `COLLOQUY_*` environment variables (`__` separates sections)
    /// 5. Provider and tracing variables (`GROQ_API_KEY`, `OPENAI_API_KEY`,
    ///    `LANGCHAIN_API_KEY`, `LANGCHAIN_PROJECT`, `LANGCHAIN_TRACING_V2`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is invalid or the selected
    /// provider has no API key.
    pub fn load() -> Result<Self> {
        Self::load_with(None::<&Path>)
    }

    /// Like [`load`](Self::load), additionally merging `path` just before
    /// the environment. The file must exist.
    pub fn load_with(path: Option<impl AsRef<Path>>) -> Result<Self> {
        use figment::providers::{Env, Format, Serialized, Toml};

        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env file");
        }

        let mut figment = figment::Figment::from(Serialized::defaults(ColloquyConfig::default()));

        if let Some(user_config) = user_config_path() {
            figment = figment.merge(Toml::file(user_config));
        }
        figment = figment.merge(Toml::file("colloquy.toml"));

        // Check for custom config path
        if let Ok(path) = std::env::var("COLLOQUY_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        if let Some(path) = path {
            let path = path.as_ref();
            if !path.is_file() {
                return Err(ColloquyError::Configuration(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("COLLOQUY_").split("__"));

        let mut config = Self::extract(figment)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or the result
    /// fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        use figment::providers::{Format, Serialized, Toml};

        let figment = figment::Figment::from(Serialized::defaults(ColloquyConfig::default()))
            .merge(Toml::file(path.as_ref()));

        let config = Self::extract(figment)?;
        config.validate()?;
        Ok(config)
    }

    fn extract(figment: figment::Figment) -> Result<Self> {
        figment.extract().map_err(|e| {
            ColloquyError::Configuration(format!("Failed to load configuration: {}", e))
        })
    }

    /// Fill credentials and tracing identifiers from well-known variables.
    ///
    /// Values already present in the configuration win over the environment.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.llm.api_key.is_none() {
            self.llm.api_key = non_empty(self.llm.provider.api_key_var());
        }

        if self.tracing.api_key.is_none() {
            self.tracing.api_key = non_empty("LANGCHAIN_API_KEY");
        }

        if let Some(project) = non_empty("LANGCHAIN_PROJECT") {
            self.tracing.project = project;
        }

        if let Some(flag) = non_empty("LANGCHAIN_TRACING_V2") {
            self.tracing.enabled = matches!(flag.to_lowercase().as_str(), "true" | "1" | "yes");
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing provider API key, a zero
    /// port, or an invalid trim policy.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(ColloquyError::Configuration(format!(
                "{} is required for the {:?} provider",
                self.llm.provider.api_key_var(),
                self.llm.provider
            )));
        }

        if self.server.port == 0 {
            return Err(ColloquyError::Configuration(
                "server.port must be non-zero".to_string(),
            ));
        }

        if self.tracing.enabled && self.tracing.api_key.is_none() {
            tracing::warn!("Tracing requested but LANGCHAIN_API_KEY is not set; export disabled");
        }

        self.trim
            .validate()
            .map_err(|e| ColloquyError::Configuration(e.to_string()))
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("colloquy").join("colloquy.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::RequiredStartRole;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_provider_key_is_configuration_error() {
        let config = ColloquyConfig::default();
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("GROQ_API_KEY"));
    }

    #[test]
    fn test_env_overrides_fill_credentials() {
        let mut config = ColloquyConfig::default();
        config.apply_env_overrides(env(&[
            ("GROQ_API_KEY", "gsk-test"),
            ("LANGCHAIN_PROJECT", "PROJECT-02"),
            ("LANGCHAIN_TRACING_V2", "true"),
        ]));

        assert_eq!(config.llm.api_key.as_deref(), Some("gsk-test"));
        assert_eq!(config.tracing.project, "PROJECT-02");
        assert!(config.tracing.enabled);
        // Tracing without a key is allowed, it only disables export
        assert!(!config.tracing.export_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_configured_key_wins_over_env() {
        let mut config = ColloquyConfig::default();
        config.llm.api_key = Some("from-file".to_string());
        config.apply_env_overrides(env(&[("GROQ_API_KEY", "from-env")]));
        assert_eq!(config.llm.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_openai_provider_reads_openai_key() {
        let mut config = ColloquyConfig::default();
        config.llm.provider = LLMProvider::OpenAI;
        config.apply_env_overrides(env(&[("GROQ_API_KEY", "gsk"), ("OPENAI_API_KEY", "sk")]));
        assert_eq!(config.llm.api_key.as_deref(), Some("sk"));
    }

    #[test]
    fn test_invalid_trim_policy_rejected() {
        let mut config = ColloquyConfig::default();
        config.llm.api_key = Some("key".to_string());
        config.trim.max_tokens = 0;
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "groq"
model = "llama3-70b-8192"
api_key = "gsk-file"
timeout = "30s"

[trim]
max_tokens = 65
include_system = true
allow_partial_message = false
required_start_role = "user"

[server]
port = 9000
"#
        )
        .unwrap();

        let config = ColloquyConfig::from_file(file.path()).unwrap();
        assert_eq!(config.llm.model, "llama3-70b-8192");
        assert_eq!(config.llm.timeout, Duration::from_secs(30));
        assert_eq!(config.trim.max_tokens, 65);
        assert_eq!(config.trim.required_start_role, RequiredStartRole::User);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.chat.default_language, "English");
    }

    #[test]
    fn test_builder_validates() {
        let result = ConfigBuilder::new()
            .llm(LLMProviderConfig {
                api_key: Some("key".to_string()),
                ..Default::default()
            })
            .build();
        assert!(result.is_ok());

        assert!(ConfigBuilder::new().build().is_err());
    }
}
