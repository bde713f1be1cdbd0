//! Speech-to-text (Whisper) and text-to-speech clients.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tokio::fs;
use tracing::debug;

use crate::error::{Result, response_to_error};
use crate::http_client::build_http_client;

/// Speech-to-text boundary
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a local audio file, with an optional ISO-639-1 language hint.
    async fn transcribe(&self, audio_path: &Path, language_hint: Option<&str>) -> Result<String>;
}

/// Text-to-speech boundary
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    /// Render text as speech and return the path of the audio file.
    async fn synthesize(&self, text: &str, language_hint: Option<&str>) -> Result<PathBuf>;
}

/// Transcription client for the OpenAI audio API
pub struct OpenAiTranscriber {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiTranscriber {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: "whisper-1".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[derive(Deserialize)]
struct TranscriptionBody {
    text: String,
}

#[async_trait]
impl SpeechToText for OpenAiTranscriber {
    async fn transcribe(&self, audio_path: &Path, language_hint: Option<&str>) -> Result<String> {
        let audio_bytes = fs::read(audio_path).await?;

        let filename = audio_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("audio")
            .to_string();

        let mut form = Form::new()
            .part(
                "file",
                Part::bytes(audio_bytes)
                    .file_name(filename)
                    .mime_str("application/octet-stream")?,
            )
            .text("model", self.model.clone());

        if let Some(language) = language_hint {
            form = form.text("language", language.to_string());
        }

        debug!("Sending transcription request for {}", audio_path.display());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_error(response).await);
        }

        let body: TranscriptionBody = response.json().await?;
        Ok(body.text)
    }
}

/// Speech synthesis client for the OpenAI audio API
pub struct OpenAiSpeechSynthesizer {
    client: Client,
    api_key: String,
    model: String,
    voice: String,
    base_url: String,
}

impl OpenAiSpeechSynthesizer {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(),
            api_key: api_key.into(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl TextToSpeech for OpenAiSpeechSynthesizer {
    async fn synthesize(&self, text: &str, _language_hint: Option<&str>) -> Result<PathBuf> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "response_format": "opus",
        });

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_to_error(response).await);
        }

        let bytes = response.bytes().await?;

        let dir = std::env::temp_dir().join("banter-media");
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("speech-{}.ogg", uuid::Uuid::new_v4()));
        fs::write(&path, &bytes).await?;

        debug!("Wrote synthesized speech to {}", path.display());
        Ok(path)
    }
}
