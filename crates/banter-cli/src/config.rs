//! Relay configuration file support
//!
//! Loads configuration from ~/.banter/config.toml. The TELEGRAM_BOT_TOKEN
//! and OPENAI_API_KEY environment variables take precedence over file
//! values, so secrets can stay out of the file entirely.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use banter_ai::RetryPolicy;
use banter_core::{ExchangeConfig, TelegramConfig, paths};

/// Starter config written by `banter init-config`.
pub const CONFIG_TEMPLATE: &str = r#"[telegram]
bot_token = ""
# polling_timeout = 30

[openai]
api_key = ""
# chat_model = "gpt-3.5-turbo"
# transcription_model = "whisper-1"
# speech_model = "tts-1"
# speech_voice = "alloy"

[relay]
# flush_interval_secs = 2
# exchange_deadline_secs = 100
# retry_base_delay_secs = 10
# retry_max_delay_secs = 300
# retry_max_attempts = 5
# temperature = 0.7

[storage]
# db_path = "/path/to/banter.db"
"#;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub openai: OpenAiSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramSection {
    pub bot_token: Option<String>,
    pub api_base: Option<String>,
    pub polling_timeout: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiSection {
    pub api_key: Option<String>,
    pub api_base: Option<String>,
    pub chat_model: Option<String>,
    pub transcription_model: Option<String>,
    pub speech_model: Option<String>,
    pub speech_voice: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelaySection {
    pub flush_interval_secs: Option<u64>,
    pub exchange_deadline_secs: Option<u64>,
    pub retry_base_delay_secs: Option<u64>,
    pub retry_max_delay_secs: Option<u64>,
    pub retry_max_attempts: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSection {
    pub db_path: Option<String>,
}

impl AppConfig {
    /// Load from an explicit path, or from ~/.banter/config.toml when none
    /// is given. A missing default file yields built-in defaults; an
    /// explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (paths::config_path()?, false),
        };

        if !path.exists() {
            if required {
                anyhow::bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Bot token: TELEGRAM_BOT_TOKEN wins over the file value.
    pub fn bot_token(&self) -> Result<String> {
        std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.telegram.bot_token.clone())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Telegram bot token is not configured; set TELEGRAM_BOT_TOKEN or [telegram] bot_token"
                )
            })
    }

    /// API key: OPENAI_API_KEY wins over the file value.
    pub fn openai_api_key(&self) -> Result<String> {
        std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.openai.api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "OpenAI API key is not configured; set OPENAI_API_KEY or [openai] api_key"
                )
            })
    }

    pub fn telegram_config(&self) -> Result<TelegramConfig> {
        let mut config = TelegramConfig::new(self.bot_token()?);
        if let Some(api_base) = &self.telegram.api_base {
            config = config.with_api_base(api_base);
        }
        if let Some(timeout) = self.telegram.polling_timeout {
            config = config.with_polling_timeout(timeout);
        }
        Ok(config)
    }

    /// Turn pipeline settings, with built-in defaults filling the gaps.
    pub fn exchange_config(&self) -> ExchangeConfig {
        let defaults = ExchangeConfig::default();
        let retry_defaults = RetryPolicy::default();
        ExchangeConfig {
            flush_interval: self
                .relay
                .flush_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.flush_interval),
            exchange_deadline: self
                .relay
                .exchange_deadline_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.exchange_deadline),
            retry: RetryPolicy {
                base_delay: self
                    .relay
                    .retry_base_delay_secs
                    .map(Duration::from_secs)
                    .unwrap_or(retry_defaults.base_delay),
                max_delay: self
                    .relay
                    .retry_max_delay_secs
                    .map(Duration::from_secs)
                    .unwrap_or(retry_defaults.max_delay),
                max_attempts: self
                    .relay
                    .retry_max_attempts
                    .unwrap_or(retry_defaults.max_attempts),
            },
            temperature: self.relay.temperature.unwrap_or(defaults.temperature),
        }
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.storage.db_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => paths::database_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[telegram]
bot_token = "123:ABC"
polling_timeout = 10

[openai]
api_key = "sk-test"
chat_model = "gpt-4"

[relay]
flush_interval_secs = 3
retry_max_attempts = 2
temperature = 0.2

[storage]
db_path = "/tmp/banter-test.db"
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.telegram.bot_token.as_deref(), Some("123:ABC"));
        assert_eq!(config.telegram.polling_timeout, Some(10));
        assert_eq!(config.openai.chat_model.as_deref(), Some("gpt-4"));
        assert_eq!(config.db_path().unwrap(), PathBuf::from("/tmp/banter-test.db"));

        let exchange = config.exchange_config();
        assert_eq!(exchange.flush_interval, Duration::from_secs(3));
        assert_eq!(exchange.exchange_deadline, Duration::from_secs(100));
        assert_eq!(exchange.retry.max_attempts, 2);
        assert_eq!(exchange.retry.base_delay, Duration::from_secs(10));
        assert_eq!(exchange.temperature, 0.2);
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[telegram]\nbot_token = \"t\"\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        let exchange = config.exchange_config();
        assert_eq!(exchange.flush_interval, Duration::from_secs(2));
        assert_eq!(exchange.retry.max_attempts, 5);
        assert_eq!(exchange.retry.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(AppConfig::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[telegram\nbot_token = ").unwrap();
        assert!(AppConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_env_token_wins_over_file() {
        let _lock = env_lock();
        let config = AppConfig {
            telegram: TelegramSection {
                bot_token: Some("file-token".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        unsafe { std::env::set_var("TELEGRAM_BOT_TOKEN", "env-token") };
        assert_eq!(config.bot_token().unwrap(), "env-token");

        unsafe { std::env::remove_var("TELEGRAM_BOT_TOKEN") };
        assert_eq!(config.bot_token().unwrap(), "file-token");
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let _lock = env_lock();
        unsafe { std::env::remove_var("TELEGRAM_BOT_TOKEN") };
        let config = AppConfig::default();
        assert!(config.bot_token().is_err());
    }

    #[test]
    fn test_template_parses() {
        let config: AppConfig = toml::from_str(CONFIG_TEMPLATE).unwrap();
        assert_eq!(config.telegram.bot_token.as_deref(), Some(""));
        assert_eq!(config.openai.api_key.as_deref(), Some(""));
    }
}
