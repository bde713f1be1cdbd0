//! Turn dispatcher.
//!
//! Admits at most one turn per owner, routes commands, text and voice notes,
//! and reports every failure with its fixed user notice. All processing for
//! a turn, commands included, happens under the owner's session guard.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use banter_ai::{LlmError, SpeechToText, TextToSpeech};

use crate::channel::{Command, InboundTurn, Transcoder, Transport, TurnContent};
use crate::models::{Language, Message};
use crate::session::{SessionGuard, TurnRegistry};
use crate::storage::ConversationStore;
use crate::turn::error::TurnError;
use crate::turn::orchestrator::Orchestrator;

const VOICE_ACK: &str = "Processing your voice. Wait.";
const WRONG_COMMAND: &str = "wrong command";
const UNSUPPORTED: &str = "Unsupported action";
const RESET_DONE: &str = "Conversation has been reset successful";
const RESET_NOTHING: &str = "You do not have active conversation";
const LANGUAGE_CHANGED: &str = "Language has been changed";
const SPEECH_ON: &str = "Voice replies have been enabled. Now you will receive voice responses";
const SPEECH_OFF: &str = "Voice replies have been disabled. Now you will receive text responses";

/// Routes inbound turns through the session guard to the right handler.
pub struct TurnDispatcher {
    registry: Arc<dyn TurnRegistry>,
    store: Arc<dyn ConversationStore>,
    transport: Arc<dyn Transport>,
    transcriber: Arc<dyn SpeechToText>,
    synthesizer: Arc<dyn TextToSpeech>,
    transcoder: Arc<dyn Transcoder>,
    orchestrator: Orchestrator,
}

impl TurnDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn TurnRegistry>,
        store: Arc<dyn ConversationStore>,
        transport: Arc<dyn Transport>,
        transcriber: Arc<dyn SpeechToText>,
        synthesizer: Arc<dyn TextToSpeech>,
        transcoder: Arc<dyn Transcoder>,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            transcriber,
            synthesizer,
            transcoder,
            orchestrator,
        }
    }

    /// Entry point for one inbound turn.
    ///
    /// Returns once the turn is fully handled; the owner's guard is released
    /// on every path out, including panics in a handler.
    pub async fn dispatch(&self, turn: InboundTurn, cancel: CancellationToken) {
        let owner_id = turn.owner_id;
        let Some(_guard) = SessionGuard::try_acquire(self.registry.clone(), owner_id) else {
            debug!(owner_id, "Turn rejected, previous one still in flight");
            self.notify(
                owner_id,
                TurnError::AlreadyProcessing.user_message(),
                Some(turn.message_id),
            )
            .await;
            return;
        };

        if let Err(turn_error) = self.process(&turn, &cancel).await {
            error!(owner_id, "Turn failed: {turn_error}");
            if !cancel.is_cancelled() {
                self.notify(owner_id, turn_error.user_message(), Some(turn.message_id))
                    .await;
            }
        }
    }

    async fn process(&self, turn: &InboundTurn, cancel: &CancellationToken) -> Result<(), TurnError> {
        match &turn.content {
            TurnContent::Command(command) => self.handle_command(*command, turn).await,
            TurnContent::SetLanguage(language) => self.handle_language_choice(turn, *language).await,
            TurnContent::Text(text) => self.handle_text(turn, text, cancel).await,
            TurnContent::Voice { file_id, .. } => self.handle_voice(turn, file_id, cancel).await,
            TurnContent::Unsupported => {
                self.notify(turn.owner_id, UNSUPPORTED, Some(turn.message_id))
                    .await;
                Ok(())
            }
        }
    }

    async fn handle_command(&self, command: Command, turn: &InboundTurn) -> Result<(), TurnError> {
        let owner_id = turn.owner_id;
        match command {
            Command::Reset => {
                let notice = match self.store.reset(owner_id)? {
                    Some(fresh) => {
                        info!(owner_id, conversation_id = %fresh.id, "Conversation reset");
                        RESET_DONE
                    }
                    None => RESET_NOTHING,
                };
                self.notify(owner_id, notice, Some(turn.message_id)).await;
            }
            Command::Language => {
                self.transport
                    .prompt_language(owner_id)
                    .await
                    .map_err(|e| TurnError::Llm(LlmError::Transport(e.to_string())))?;
            }
            Command::Speech => {
                let mut conversation = self.store.get_or_create_active(owner_id)?;
                conversation.voice_replies = !conversation.voice_replies;
                self.store.save(&conversation)?;
                let notice = if conversation.voice_replies {
                    SPEECH_ON
                } else {
                    SPEECH_OFF
                };
                self.notify(owner_id, notice, Some(turn.message_id)).await;
            }
            Command::Unknown => {
                self.notify(owner_id, WRONG_COMMAND, Some(turn.message_id))
                    .await;
            }
        }
        Ok(())
    }

    async fn handle_language_choice(
        &self,
        turn: &InboundTurn,
        language: Language,
    ) -> Result<(), TurnError> {
        let mut conversation = self.store.get_or_create_active(turn.owner_id)?;
        conversation.language = language;
        self.store.save(&conversation)?;
        info!(
            owner_id = turn.owner_id,
            language = language.label(),
            "Language changed"
        );
        self.notify(turn.owner_id, LANGUAGE_CHANGED, None).await;
        Ok(())
    }

    async fn handle_text(
        &self,
        turn: &InboundTurn,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TurnError> {
        let mut conversation = self.store.get_or_create_active(turn.owner_id)?;
        conversation.add_message(Message::user(text));

        if let Err(error) = self.transport.send_typing(turn.owner_id).await {
            debug!(owner_id = turn.owner_id, "Typing indicator failed: {error:#}");
        }

        self.orchestrator
            .run_streaming_turn(&self.transport, &mut conversation, Some(turn.message_id), cancel)
            .await?;
        Ok(())
    }

    /// Voice pipeline: download, transcode to MP3, transcribe, then hand the
    /// text to the streaming or speaking exchange. Temp files are removed on
    /// every path.
    async fn handle_voice(
        &self,
        turn: &InboundTurn,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), TurnError> {
        let owner_id = turn.owner_id;
        self.notify(owner_id, VOICE_ACK, None).await;

        let mut conversation = self.store.get_or_create_active(owner_id)?;

        let voice_note = self
            .transport
            .download_file(file_id)
            .await
            .map_err(|e| TurnError::Llm(LlmError::Transport(e.to_string())))?;
        let _voice_cleanup = scopeguard::guard(voice_note.clone(), |path| {
            let _ = std::fs::remove_file(path);
        });

        let converted = self
            .transcoder
            .to_mp3(&voice_note)
            .await
            .map_err(|e| TurnError::Llm(LlmError::Transport(e.to_string())))?;
        let _converted_cleanup = scopeguard::guard(converted.clone(), |path| {
            let _ = std::fs::remove_file(path);
        });

        let transcription = self
            .transcriber
            .transcribe(&converted, Some(conversation.language.iso_code()))
            .await
            .map_err(|e| TurnError::Llm(LlmError::Transport(e.to_string())))?;
        debug!(owner_id, chars = transcription.len(), "Voice note transcribed");
        conversation.add_message(Message::user(transcription));

        if conversation.voice_replies {
            self.orchestrator
                .run_speaking_turn(
                    &self.transport,
                    &self.synthesizer,
                    &mut conversation,
                    Some(turn.message_id),
                    cancel,
                )
                .await?;
        } else {
            self.orchestrator
                .run_streaming_turn(&self.transport, &mut conversation, Some(turn.message_id), cancel)
                .await?;
        }
        Ok(())
    }

    async fn notify(&self, owner_id: i64, text: &str, reply_to: Option<i64>) {
        if let Err(error) = self.transport.send_message(owner_id, text, reply_to).await {
            error!(owner_id, "Failed to deliver notice: {error:#}");
        }
    }
}
