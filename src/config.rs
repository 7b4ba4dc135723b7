//! Configuration types for the chat core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration for the concierge client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConciergeConfig {
    /// Generative backend settings.
    pub gateway: GatewayConfig,
    /// Text-to-speech settings.
    pub speech: SpeechConfig,
    /// Remote bot settings fragments (persona, links, FAQ).
    pub settings: SettingsSourceConfig,
    /// Local persisted state.
    pub storage: StorageConfig,
}

/// Generative backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the generative API.
    pub base_url: String,
    /// API key. Takes precedence over `api_key_env` when non-empty.
    pub api_key: String,
    /// Environment variable consulted when `api_key` is empty.
    pub api_key_env: String,
    /// Model used for streamed chat turns.
    pub chat_model: String,
    /// Model used for one-shot title synthesis.
    pub title_model: String,
    /// Model used for image synthesis.
    pub image_model: String,
    /// Connect timeout for backend requests, in seconds.
    ///
    /// Streams themselves are not bounded; only connection setup is.
    pub connect_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_owned(),
            api_key: String::new(),
            api_key_env: "CONCIERGE_API_KEY".to_owned(),
            chat_model: "gemini-2.5-flash".to_owned(),
            title_model: "gemini-2.5-flash-lite".to_owned(),
            image_model: "gemini-2.5-flash-image".to_owned(),
            connect_timeout_secs: 15,
        }
    }
}

impl GatewayConfig {
    /// Returns the API key, falling back to the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns a config error when neither source yields a non-empty key.
    pub fn resolve_api_key(&self) -> crate::error::Result<String> {
        if !self.api_key.trim().is_empty() {
            return Ok(self.api_key.trim().to_owned());
        }
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_owned()),
            _ => Err(crate::error::ConciergeError::Config(format!(
                "no API key configured (set gateway.api_key or ${})",
                self.api_key_env
            ))),
        }
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Model used by the TTS endpoint.
    pub tts_model: String,
    /// Default voice identity when the user has not chosen one.
    pub default_voice: String,
    /// Sample rate of the PCM returned by the TTS endpoint, in Hz.
    pub sample_rate: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            tts_model: "gemini-2.5-flash-preview-tts".to_owned(),
            default_voice: "Kore".to_owned(),
            sample_rate: 24_000,
        }
    }
}

/// Where the remote bot settings fragments are fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsSourceConfig {
    /// Persona / bot config document (JSON object).
    pub persona_url: Option<String>,
    /// Hotel link catalog (JSON array).
    pub links_url: Option<String>,
    /// FAQ list (JSON array).
    pub faq_url: Option<String>,
    /// Per-fragment fetch timeout in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for SettingsSourceConfig {
    fn default() -> Self {
        Self {
            persona_url: None,
            links_url: None,
            faq_url: None,
            fetch_timeout_secs: 10,
        }
    }
}

/// Local persisted state configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding persisted state. `None` = platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Returns the effective data directory.
    pub fn resolved_data_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("concierge"),
        }
    }
}

impl ConciergeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ConciergeError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ConciergeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/concierge/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("concierge").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("concierge")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/concierge-config/config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ConciergeConfig::default();
        assert!(config.gateway.base_url.starts_with("https://"));
        assert!(!config.gateway.chat_model.is_empty());
        assert!(config.speech.sample_rate > 0);
        assert!(config.settings.persona_url.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: ConciergeConfig = toml::from_str(
            r#"
            [gateway]
            chat_model = "custom-model"

            [storage]
            data_dir = "/var/lib/concierge"
            "#,
        )
        .unwrap();
        assert_eq!(config.gateway.chat_model, "custom-model");
        assert_eq!(config.gateway.api_key_env, "CONCIERGE_API_KEY");
        assert_eq!(
            config.storage.resolved_data_dir(),
            PathBuf::from("/var/lib/concierge")
        );
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = ConciergeConfig::default();
        config.settings.faq_url = Some("https://example.test/faq.json".into());
        config.save_to_file(&path).unwrap();

        let loaded = ConciergeConfig::from_file(&path).unwrap();
        assert_eq!(
            loaded.settings.faq_url.as_deref(),
            Some("https://example.test/faq.json")
        );
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(ConciergeConfig::from_file(&path).is_err());
    }

    #[test]
    fn explicit_api_key_wins() {
        let config = GatewayConfig {
            api_key: "  abc  ".into(),
            api_key_env: "CONCIERGE_TEST_UNSET_KEY".into(),
            ..GatewayConfig::default()
        };
        assert_eq!(config.resolve_api_key().unwrap(), "abc");
    }

    #[test]
    fn missing_api_key_is_config_error() {
        let config = GatewayConfig {
            api_key: String::new(),
            api_key_env: "CONCIERGE_TEST_DEFINITELY_UNSET".into(),
            ..GatewayConfig::default()
        };
        let err = config.resolve_api_key().unwrap_err();
        assert!(err.to_string().contains("CONCIERGE_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn default_config_path_ends_with_config_toml() {
        let path = ConciergeConfig::default_config_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.ends_with("config.toml"));
        assert!(path_str.contains("concierge"));
    }
}
