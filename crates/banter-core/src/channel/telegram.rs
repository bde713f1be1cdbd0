//! Telegram transport.
//!
//! Talks to the Bot API over HTTPS: long-polling for inbound turns,
//! send/edit for streamed replies, multipart upload for voice notes.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::traits::{Transport, TurnStream};
use super::types::{InboundTurn, TurnContent, parse_command};
use crate::models::Language;

/// Timeout for plain API calls (seconds).
const API_TIMEOUT_SECS: u64 = 30;

const LANGUAGE_PROMPT: &str = "Please select your language";

/// Telegram transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// API host, overridable for tests.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Long-polling timeout in seconds.
    #[serde(default = "default_polling_timeout")]
    pub polling_timeout: u32,
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_polling_timeout() -> u32 {
    30
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: default_api_base(),
            polling_timeout: default_polling_timeout(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_polling_timeout(mut self, timeout: u32) -> Self {
        self.polling_timeout = timeout;
        self
    }
}

/// Bot API client implementing [`Transport`].
pub struct TelegramTransport {
    config: TelegramConfig,
    client: Client,
    polling_active: Arc<AtomicBool>,
    last_update_id: Arc<AtomicI64>,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            polling_active: Arc::new(AtomicBool::new(false)),
            last_update_id: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn with_token(bot_token: impl Into<String>) -> Self {
        Self::new(TelegramConfig::new(bot_token))
    }

    pub fn is_polling(&self) -> bool {
        self.polling_active.load(Ordering::SeqCst)
    }

    /// Stops the receive loop after the in-flight poll returns.
    pub fn stop(&self) {
        self.polling_active.store(false, Ordering::SeqCst);
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base, self.config.bot_token, method
        )
    }

    /// POST a method call and unwrap the standard response envelope.
    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(&params)
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("Telegram HTTP error: {}", error));
        }

        let body: TelegramResponse<T> = response.json().await?;
        if body.ok {
            body.result
                .ok_or_else(|| anyhow!("Telegram returned ok but no result"))
        } else {
            Err(anyhow!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            ))
        }
    }

    /// Registers the command menu so clients offer completion for it.
    pub async fn set_my_commands(&self) -> Result<()> {
        let params = serde_json::json!({
            "commands": [
                { "command": "reset", "description": "Start a new conversation" },
                { "command": "language", "description": "Choose the reply language" },
                { "command": "speech", "description": "Toggle voice replies" },
            ],
        });
        self.call::<bool>("setMyCommands", params).await?;
        Ok(())
    }

    /// Poll for updates using long-polling.
    async fn poll_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let offset = self.last_update_id.load(Ordering::SeqCst);
        let params = serde_json::json!({
            "offset": if offset > 0 { offset + 1 } else { 0 },
            "timeout": self.config.polling_timeout,
            "allowed_updates": ["message", "callback_query"],
        });

        let response = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&params)
            .timeout(Duration::from_secs(self.config.polling_timeout as u64 + 10))
            .send()
            .await?;

        let body: TelegramResponse<Vec<TelegramUpdate>> = response.json().await?;
        if !body.ok {
            return Err(anyhow!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            ));
        }

        let updates = body.result.unwrap_or_default();
        if let Some(last) = updates.last() {
            self.last_update_id.store(last.update_id, Ordering::SeqCst);
        }

        Ok(updates)
    }

    /// Map one update to a turn. Anything the relay cannot handle becomes
    /// [`TurnContent::Unsupported`]; updates without a usable payload are
    /// dropped.
    fn convert_update(update: TelegramUpdate) -> Option<InboundTurn> {
        if let Some(callback) = update.callback_query {
            let owner_id = callback
                .message
                .as_ref()
                .map(|m| m.chat.id)
                .unwrap_or(callback.from.id);
            let message_id = callback
                .message
                .as_ref()
                .map(|m| m.message_id)
                .unwrap_or_default();
            let content = match callback.data.as_deref().and_then(Language::from_label) {
                Some(language) => TurnContent::SetLanguage(language),
                None => TurnContent::Unsupported,
            };
            return Some(InboundTurn {
                owner_id,
                message_id,
                content,
            });
        }

        let message = update.message?;
        let content = if let Some(text) = message.text {
            match parse_command(&text) {
                Some(command) => TurnContent::Command(command),
                None => TurnContent::Text(text),
            }
        } else if let Some(voice) = message.voice {
            TurnContent::Voice {
                file_id: voice.file_id,
                duration_secs: voice.duration,
            }
        } else {
            TurnContent::Unsupported
        };

        Some(InboundTurn {
            owner_id: message.chat.id,
            message_id: message.message_id,
            content,
        })
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send_message(&self, owner_id: i64, text: &str, reply_to: Option<i64>) -> Result<i64> {
        let mut params = serde_json::json!({
            "chat_id": owner_id,
            "text": text,
        });
        if let Some(reply_id) = reply_to {
            params["reply_to_message_id"] = serde_json::Value::Number(reply_id.into());
        }

        let sent: TelegramMessageResponse = self.call("sendMessage", params).await?;
        Ok(sent.message_id)
    }

    async fn edit_message(&self, owner_id: i64, message_id: i64, text: &str) -> Result<()> {
        let params = serde_json::json!({
            "chat_id": owner_id,
            "message_id": message_id,
            "text": text,
        });
        self.call::<TelegramMessageResponse>("editMessageText", params)
            .await?;
        Ok(())
    }

    async fn send_voice(&self, owner_id: i64, audio: &Path, reply_to: Option<i64>) -> Result<()> {
        let bytes = fs::read(audio).await?;
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name("reply.ogg")
            .mime_str("audio/ogg")?;
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", owner_id.to_string())
            .part("voice", part);
        if let Some(reply_id) = reply_to {
            form = form.text("reply_to_message_id", reply_id.to_string());
        }

        let response = self
            .client
            .post(self.api_url("sendVoice"))
            .multipart(form)
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("Telegram HTTP error: {}", error));
        }

        let body: TelegramResponse<TelegramMessageResponse> = response.json().await?;
        if !body.ok {
            return Err(anyhow!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            ));
        }
        Ok(())
    }

    async fn send_typing(&self, owner_id: i64) -> Result<()> {
        let params = serde_json::json!({
            "chat_id": owner_id,
            "action": "typing",
        });
        self.call::<bool>("sendChatAction", params).await?;
        Ok(())
    }

    async fn prompt_language(&self, owner_id: i64) -> Result<()> {
        let buttons: Vec<Vec<serde_json::Value>> = Language::all()
            .iter()
            .map(|language| {
                vec![serde_json::json!({
                    "text": language.label(),
                    "callback_data": language.label(),
                })]
            })
            .collect();
        let params = serde_json::json!({
            "chat_id": owner_id,
            "text": LANGUAGE_PROMPT,
            "reply_markup": { "inline_keyboard": buttons },
        });
        self.call::<TelegramMessageResponse>("sendMessage", params)
            .await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<PathBuf> {
        let file: TelegramFile = self
            .call("getFile", serde_json::json!({ "file_id": file_id }))
            .await?;
        let file_path = file
            .file_path
            .ok_or_else(|| anyhow!("Telegram file has no path"))?;

        let url = format!(
            "{}/file/bot{}/{}",
            self.config.api_base, self.config.bot_token, file_path
        );
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .send()
            .await?;
        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("Telegram file download error: {}", error));
        }
        let bytes = response.bytes().await?;

        let dir = std::env::temp_dir().join("banter-media");
        fs::create_dir_all(&dir).await?;
        let extension = Path::new(&file_path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        let local_path = dir.join(format!("tg-{}{}", Uuid::new_v4(), extension));
        fs::write(&local_path, bytes).await?;

        Ok(local_path)
    }

    async fn start_receiving(&self) -> Result<TurnStream> {
        if self.config.bot_token.is_empty() {
            return Err(anyhow!("Telegram bot token is not set"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let polling_active = self.polling_active.clone();
        let last_update_id = self.last_update_id.clone();
        let config = self.config.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            polling_active.store(true, Ordering::SeqCst);
            info!("Starting Telegram polling");

            let transport = TelegramTransport {
                config,
                client,
                polling_active: polling_active.clone(),
                last_update_id,
            };

            while polling_active.load(Ordering::SeqCst) {
                match transport.poll_updates().await {
                    Ok(updates) => {
                        for update in updates {
                            let Some(turn) = Self::convert_update(update) else {
                                continue;
                            };
                            debug!(owner_id = turn.owner_id, "Received Telegram turn");
                            if tx.send(turn).is_err() {
                                warn!("Turn receiver dropped, stopping polling");
                                polling_active.store(false, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        error!("Telegram polling error: {e}");
                        // Back off on error
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }

            info!("Telegram polling stopped");
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

// Bot API payloads, trimmed to the fields the relay reads.

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessage>,
    callback_query: Option<TelegramCallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    chat: TelegramChat,
    text: Option<String>,
    voice: Option<TelegramVoice>,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramVoice {
    file_id: String,
    duration: u32,
}

#[derive(Debug, Deserialize)]
struct TelegramCallbackQuery {
    from: TelegramUser,
    data: Option<String>,
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessageResponse {
    message_id: i64,
}
