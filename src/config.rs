use crate::error::{RelayError, Result};
use crate::providers::ProviderPreset;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub params: SamplingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Falls back to the preset's variable when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Models used when the caller does not name one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_chat_model")]
    pub default_chat_model: String,
    #[serde(default = "default_vision_model")]
    pub default_vision_model: String,
    #[serde(default = "default_transcription_model")]
    pub default_transcription_model: String,
}

/// Sampling parameters applied to every chat call.
///
/// Without a `[params]` table the built-in values apply. Inside the table a
/// missing key stays unset and is left out of provider requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Replace internal detail in 5xx bodies with a generic message.
    #[serde(default)]
    pub redact_errors: bool,
}

fn default_port() -> u16 {
    8000
}

fn default_provider_name() -> String {
    "groq".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_chat_model() -> String {
    "mixtral-8x7b-32768".to_string()
}

fn default_vision_model() -> String {
    "meta-llama/llama-4-scout-17b-16e-instruct".to_string()
}

fn default_transcription_model() -> String {
    "whisper-large-v3-turbo".to_string()
}

fn default_temperature() -> Option<f64> {
    Some(0.7)
}

fn default_max_completion_tokens() -> Option<u32> {
    Some(2048)
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            provider: ProviderConfig::default(),
            models: ModelsConfig::default(),
            params: SamplingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: None,
            api_key_env: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_chat_model: default_chat_model(),
            default_vision_model: default_vision_model(),
            default_transcription_model: default_transcription_model(),
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_completion_tokens: default_max_completion_tokens(),
        }
    }
}

impl RelayConfig {
    /// Load config from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    /// Resolve the effective base URL (config override or provider preset default)
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.provider.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let preset = ProviderPreset::from_name(&self.provider.name).ok_or_else(|| {
            RelayError::config(format!(
                "Unknown provider '{}' and no base_url configured. Known providers: {}",
                self.provider.name,
                ProviderPreset::names().join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Name of the environment variable that holds the API key.
    pub fn effective_api_key_env(&self) -> String {
        if let Some(ref env) = self.provider.api_key_env {
            return env.clone();
        }

        ProviderPreset::from_name(&self.provider.name)
            .map(|p| p.default_api_key_env.to_string())
            .unwrap_or_else(|| "API_KEY".to_string())
    }

    /// Resolve the API key from the configured environment variable
    pub fn resolve_api_key(&self) -> Result<String> {
        let env = self.effective_api_key_env();
        match std::env::var(&env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(RelayError::config(format!(
                "Environment variable '{}' not set. Set it with your provider API key.",
                env
            ))),
        }
    }

    /// Custom base URLs are assumed to expose transcription.
    pub fn supports_transcription(&self) -> bool {
        ProviderPreset::from_name(&self.provider.name)
            .map(|p| p.transcription || self.provider.base_url.is_some())
            .unwrap_or(true)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from("chat-relay.toml"));

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("chat-relay").join("config.toml"));
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("chat-relay").join("config.toml"));
        paths.push(home.join(".chat-relay.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000

[provider]
name = "openai"
api_key_env = "OPENAI_API_KEY"
timeout_secs = 30

[models]
default_chat_model = "gpt-4o-mini"

[params]
temperature = 0.2

[server]
cors_origins = ["http://localhost:3000"]
redact_errors = true
"#
        )
        .unwrap();

        let config = RelayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.provider.name, "openai");
        assert_eq!(config.provider.timeout_secs, 30);
        assert_eq!(config.models.default_chat_model, "gpt-4o-mini");
        // untouched keys keep their defaults
        assert_eq!(config.models.default_transcription_model, "whisper-large-v3-turbo");
        assert_eq!(config.params.temperature, Some(0.2));
        assert_eq!(config.params.max_completion_tokens, None);
        assert_eq!(config.server.cors_origins, vec!["http://localhost:3000"]);
        assert!(config.server.redact_errors);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let f = NamedTempFile::new().unwrap();
        let config = RelayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.provider.name, "groq");
        assert_eq!(config.effective_api_key_env(), "GROQ_API_KEY");
        assert!(!config.server.redact_errors);
        assert_eq!(config.params.temperature, Some(0.7));
        assert_eq!(config.params.max_completion_tokens, Some(2048));
    }

    #[test]
    fn test_params_table_can_unset_sampling() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "[params]\nmax_completion_tokens = 512").unwrap();
        let config = RelayConfig::load(f.path()).unwrap();
        assert_eq!(config.params.temperature, None);
        assert_eq!(config.params.max_completion_tokens, Some(512));

        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "[params]").unwrap();
        let config = RelayConfig::load(f.path()).unwrap();
        assert_eq!(config.params.temperature, None);
        assert_eq!(config.params.max_completion_tokens, None);
    }

    #[test]
    fn test_effective_base_url_from_preset() {
        let config = RelayConfig::default();
        let url = config.effective_base_url().unwrap();
        assert_eq!(url, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn test_effective_base_url_override() {
        let mut config = RelayConfig::default();
        config.provider.name = "custom".to_string();
        config.provider.base_url = Some("https://my-server.com/v1/".to_string());

        let url = config.effective_base_url().unwrap();
        assert_eq!(url, "https://my-server.com/v1");
        assert!(config.supports_transcription());
    }

    #[test]
    fn test_unknown_provider_without_base_url() {
        let mut config = RelayConfig::default();
        config.provider.name = "nowhere".to_string();

        let err = config.effective_base_url().unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("groq"));
    }

    #[test]
    fn test_resolve_api_key() {
        let mut config = RelayConfig::default();
        config.provider.api_key_env = Some("CHAT_RELAY_TEST_KEY_SET".to_string());
        std::env::set_var("CHAT_RELAY_TEST_KEY_SET", "gsk_test");
        assert_eq!(config.resolve_api_key().unwrap(), "gsk_test");

        config.provider.api_key_env = Some("CHAT_RELAY_TEST_KEY_MISSING".to_string());
        let err = config.resolve_api_key().unwrap_err();
        assert!(err.is_config());
    }
}
