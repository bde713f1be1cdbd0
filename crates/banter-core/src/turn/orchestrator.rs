//! Streaming completion orchestrator.
//!
//! Drives one exchange with the LLM: placeholder message out, delta ingestion
//! with periodic placeholder edits, bounded retry on rate limiting, then a
//! single persist once the reply is complete. A spoken variant swaps the
//! stream for one blocking completion plus speech synthesis.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use banter_ai::{ChatBackend, ChatMessage, CompletionRequest, LlmError, RetryPolicy, TextToSpeech};

use crate::channel::Transport;
use crate::models::{Conversation, Message, MessageRole};
use crate::storage::ConversationStore;
use crate::turn::buffer::ResponseBuffer;
use crate::turn::error::TurnError;

/// Sent as soon as a turn is admitted, then progressively edited into the
/// reply.
pub const PLACEHOLDER_TEXT: &str = "...";

/// Tuning for one exchange.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Cadence of placeholder edits while a stream is running.
    pub flush_interval: Duration,
    /// Wall-clock bound for the whole exchange, retry waits included.
    pub exchange_deadline: Duration,
    pub retry: RetryPolicy,
    pub temperature: f32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(2),
            exchange_deadline: Duration::from_secs(100),
            retry: RetryPolicy::default(),
            temperature: 0.7,
        }
    }
}

/// How a turn ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// The reply was persisted; payload is the final text.
    Completed(String),
    /// The turn was abandoned. Nothing was persisted and no notice is owed.
    Cancelled,
}

/// Runs exchanges against the LLM backend on behalf of the dispatcher.
pub struct Orchestrator {
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn ConversationStore>,
    config: ExchangeConfig,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: Arc<dyn ConversationStore>,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            backend,
            store,
            config,
        }
    }

    /// Run one streaming turn.
    ///
    /// `conversation` must already contain the triggering user message; on
    /// success the assistant reply is appended and the whole record is saved
    /// exactly once. Failure persists nothing.
    pub async fn run_streaming_turn(
        &self,
        transport: &Arc<dyn Transport>,
        conversation: &mut Conversation,
        reply_to: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<ExchangeOutcome, TurnError> {
        let owner_id = conversation.owner_id;
        let placeholder_id = transport
            .send_message(owner_id, PLACEHOLDER_TEXT, reply_to)
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let buffer = Arc::new(ResponseBuffer::new());

        let streamed = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(owner_id, "Turn cancelled while streaming");
                return Ok(ExchangeOutcome::Cancelled);
            }
            attempt = tokio::time::timeout(
                self.config.exchange_deadline,
                self.drive_attempts(transport, conversation, placeholder_id, &buffer),
            ) => match attempt {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout),
            },
        };

        let final_text = streamed.map_err(TurnError::Llm)?;
        if final_text.is_empty() {
            return Err(TurnError::Llm(LlmError::Unexpected(
                "stream produced an empty reply".to_string(),
            )));
        }

        // Final flush is best effort: the reply is already complete and must
        // not be lost to one failed edit.
        if let Err(error) = transport
            .edit_message(owner_id, placeholder_id, &final_text)
            .await
        {
            warn!(owner_id, "Final flush failed: {error:#}");
        }

        conversation.add_message(Message::assistant(final_text.clone()));
        self.store.save(conversation)?;
        debug!(owner_id, chars = final_text.len(), "Turn completed");
        Ok(ExchangeOutcome::Completed(final_text))
    }

    /// Run one spoken turn: blocking completion, speech synthesis, voice note
    /// out, then the same single persist.
    pub async fn run_speaking_turn(
        &self,
        transport: &Arc<dyn Transport>,
        synthesizer: &Arc<dyn TextToSpeech>,
        conversation: &mut Conversation,
        reply_to: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<ExchangeOutcome, TurnError> {
        let owner_id = conversation.owner_id;
        let request = self.build_request(conversation);

        let completed = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(owner_id, "Turn cancelled while completing");
                return Ok(ExchangeOutcome::Cancelled);
            }
            result = tokio::time::timeout(
                self.config.exchange_deadline,
                self.complete_with_retry(owner_id, request),
            ) => match result {
                Ok(inner) => inner,
                Err(_) => Err(LlmError::Timeout),
            },
        };
        let reply = completed.map_err(TurnError::Llm)?;

        let audio = synthesizer
            .synthesize(&reply, Some(conversation.language.speech_tag()))
            .await
            .map_err(|e| TurnError::Llm(LlmError::Transport(e.to_string())))?;
        let _audio_cleanup = scopeguard::guard(audio.clone(), |path| {
            let _ = std::fs::remove_file(path);
        });

        transport
            .send_voice(owner_id, &audio, reply_to)
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        conversation.add_message(Message::assistant(reply.clone()));
        self.store.save(conversation)?;
        debug!(owner_id, chars = reply.len(), "Spoken turn completed");
        Ok(ExchangeOutcome::Completed(reply))
    }

    /// Attempt loop for the streaming path. Only rate limiting is retried;
    /// each retry waits the policy delay and starts over with an empty
    /// buffer.
    async fn drive_attempts(
        &self,
        transport: &Arc<dyn Transport>,
        conversation: &Conversation,
        placeholder_id: i64,
        buffer: &Arc<ResponseBuffer>,
    ) -> Result<String, LlmError> {
        let request = self.build_request(conversation);
        let owner_id = conversation.owner_id;
        let mut attempt: u32 = 1;

        loop {
            match self
                .stream_attempt(transport, owner_id, placeholder_id, buffer, request.clone())
                .await
            {
                Ok(()) => return Ok(buffer.take_final()),
                Err(error) => match self.config.retry.should_retry(&error, attempt) {
                    Some(delay) => {
                        warn!(
                            owner_id,
                            attempt,
                            delay_secs = delay.as_secs_f64(),
                            "Rate limited, retrying stream"
                        );
                        tokio::time::sleep(delay).await;
                        buffer.reset();
                        attempt += 1;
                    }
                    None => return Err(error),
                },
            }
        }
    }

    /// One streaming attempt: ingest deltas while a spawned flusher edits the
    /// placeholder on its own cadence. The flusher is stopped on every exit
    /// path, including drop at the deadline.
    async fn stream_attempt(
        &self,
        transport: &Arc<dyn Transport>,
        owner_id: i64,
        placeholder_id: i64,
        buffer: &Arc<ResponseBuffer>,
        request: CompletionRequest,
    ) -> Result<(), LlmError> {
        let stop_flushing = CancellationToken::new();
        let flusher = tokio::spawn(flush_periodically(
            transport.clone(),
            owner_id,
            placeholder_id,
            buffer.clone(),
            self.config.flush_interval,
            stop_flushing.clone(),
        ));
        let _stop_on_exit = stop_flushing.clone().drop_guard();

        let mut stream = self.backend.stream_chat(request);
        let mut result = Ok(());
        while let Some(item) = stream.next().await {
            match item {
                Ok(delta) => {
                    if delta.done {
                        break;
                    }
                    if let Some(text) = delta.text
                        && !text.is_empty()
                    {
                        buffer.append(&text);
                    }
                }
                Err(error) => {
                    result = Err(error);
                    break;
                }
            }
        }

        stop_flushing.cancel();
        let _ = flusher.await;
        result
    }

    async fn complete_with_retry(
        &self,
        owner_id: i64,
        request: CompletionRequest,
    ) -> Result<String, LlmError> {
        let mut attempt: u32 = 1;
        loop {
            match self.backend.complete_chat(request.clone()).await {
                Ok(reply) => return Ok(reply),
                Err(error) => match self.config.retry.should_retry(&error, attempt) {
                    Some(delay) => {
                        warn!(
                            owner_id,
                            attempt,
                            delay_secs = delay.as_secs_f64(),
                            "Rate limited, retrying completion"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(error),
                },
            }
        }
    }

    fn build_request(&self, conversation: &Conversation) -> CompletionRequest {
        let messages = conversation
            .history
            .iter()
            .map(|m| match m.role {
                MessageRole::User => ChatMessage::user(m.content.clone()),
                MessageRole::Assistant => ChatMessage::assistant(m.content.clone()),
            })
            .collect();
        CompletionRequest::new(messages).with_temperature(self.config.temperature)
    }
}

/// Edits the placeholder with the buffer's latest snapshot every
/// `every`, skipping ticks where nothing grew. Flushes are best effort.
async fn flush_periodically(
    transport: Arc<dyn Transport>,
    owner_id: i64,
    message_id: i64,
    buffer: Arc<ResponseBuffer>,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {
                let Some(snapshot) = buffer.snapshot_if_changed() else {
                    continue;
                };
                if let Err(error) = transport.edit_message(owner_id, message_id, &snapshot).await {
                    warn!(owner_id, "Periodic flush failed: {error:#}");
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock::{MockSynthesizer, ScriptedAttempt, ScriptedBackend};
    use super::*;
    use crate::channel::traits::mock::MockTransport;
    use crate::models::Language;
    use crate::storage::conversation::mock::MemoryConversationStore;
    use banter_ai::TextToSpeech;
    use std::sync::atomic::Ordering;

    struct Fixture {
        transport: Arc<MockTransport>,
        store: Arc<MemoryConversationStore>,
        backend: Arc<ScriptedBackend>,
        orchestrator: Orchestrator,
    }

    fn fixture(attempts: Vec<ScriptedAttempt>, config: ExchangeConfig) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryConversationStore::new());
        let backend = Arc::new(ScriptedBackend::new(attempts));
        let orchestrator = Orchestrator::new(backend.clone(), store.clone(), config);
        Fixture {
            transport,
            store,
            backend,
            orchestrator,
        }
    }

    fn conversation_with_prompt(owner_id: i64) -> Conversation {
        let mut conversation = Conversation::new(owner_id, Language::English, false);
        conversation.add_message(Message::user("say hello"));
        conversation
    }

    fn as_transport(transport: &Arc<MockTransport>) -> Arc<dyn Transport> {
        transport.clone()
    }

    #[tokio::test]
    async fn test_deltas_become_one_persisted_reply() {
        let fx = fixture(
            vec![ScriptedAttempt::Deltas(vec!["Hel", "lo, ", "world"])],
            ExchangeConfig::default(),
        );
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(1);
        fx.store.create(&conversation).unwrap();

        let outcome = fx
            .orchestrator
            .run_streaming_turn(&transport, &mut conversation, Some(7), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ExchangeOutcome::Completed("Hello, world".to_string()));
        assert_eq!(fx.store.save_count(), 1);

        assert_eq!(conversation.history.len(), 2);
        assert_eq!(conversation.history[1], Message::assistant("Hello, world"));

        let persisted = fx.store.get(&conversation.id).unwrap().unwrap();
        assert_eq!(persisted.history, conversation.history);

        // Placeholder first, final flush carries the whole reply.
        assert_eq!(fx.transport.sent_texts(), vec![PLACEHOLDER_TEXT]);
        assert_eq!(fx.transport.sent.lock()[0].reply_to, Some(7));
        assert_eq!(fx.transport.edit_texts().last().map(String::as_str), Some("Hello, world"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_retries_with_exponential_backoff() {
        let rate_limited = || LlmError::RateLimited {
            retry_after_secs: None,
        };
        let fx = fixture(
            vec![
                ScriptedAttempt::Error(rate_limited()),
                ScriptedAttempt::Error(rate_limited()),
                ScriptedAttempt::Error(rate_limited()),
                ScriptedAttempt::Error(rate_limited()),
                ScriptedAttempt::Deltas(vec!["recovered"]),
            ],
            ExchangeConfig {
                exchange_deadline: Duration::from_secs(1000),
                ..ExchangeConfig::default()
            },
        );
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(2);
        fx.store.create(&conversation).unwrap();

        let outcome = fx
            .orchestrator
            .run_streaming_turn(&transport, &mut conversation, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ExchangeOutcome::Completed("recovered".to_string()));
        assert_eq!(fx.backend.call_count(), 5);

        let gaps = fx.backend.call_gaps();
        assert_eq!(gaps.len(), 4);
        assert_eq!(gaps[0], Duration::from_secs(10));
        assert_eq!(gaps[1], Duration::from_secs(20));
        assert_eq!(gaps[2], Duration::from_secs(40));
        assert_eq!(gaps[3], Duration::from_secs(80));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_is_terminal() {
        let attempts = (0..5)
            .map(|_| {
                ScriptedAttempt::Error(LlmError::RateLimited {
                    retry_after_secs: None,
                })
            })
            .collect();
        let fx = fixture(
            attempts,
            ExchangeConfig {
                exchange_deadline: Duration::from_secs(1000),
                ..ExchangeConfig::default()
            },
        );
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(3);
        fx.store.create(&conversation).unwrap();

        let error = fx
            .orchestrator
            .run_streaming_turn(&transport, &mut conversation, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            TurnError::Llm(LlmError::RateLimited { .. })
        ));
        // Exactly the attempt budget, never more.
        assert_eq!(fx.backend.call_count(), 5);
        assert_eq!(fx.store.save_count(), 0);
        assert_eq!(conversation.history.len(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_on_first_attempt() {
        let fx = fixture(
            vec![ScriptedAttempt::Error(LlmError::Unauthorized)],
            ExchangeConfig::default(),
        );
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(4);
        fx.store.create(&conversation).unwrap();

        let error = fx
            .orchestrator
            .run_streaming_turn(&transport, &mut conversation, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, TurnError::Llm(LlmError::Unauthorized)));
        assert_eq!(fx.backend.call_count(), 1);
        assert_eq!(fx.store.save_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_starts_over_with_empty_buffer() {
        let fx = fixture(
            vec![
                ScriptedAttempt::DeltasThenError(
                    vec!["partial that must vanish"],
                    LlmError::RateLimited {
                        retry_after_secs: None,
                    },
                ),
                ScriptedAttempt::Deltas(vec!["clean reply"]),
            ],
            ExchangeConfig::default(),
        );
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(5);
        fx.store.create(&conversation).unwrap();

        let outcome = fx
            .orchestrator
            .run_streaming_turn(&transport, &mut conversation, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ExchangeOutcome::Completed("clean reply".to_string()));
        assert_eq!(conversation.history[1], Message::assistant("clean reply"));
        // No edit may mix text from the abandoned attempt into the retry.
        for edit in fx.transport.edit_texts() {
            assert!(!(edit.contains("vanish") && edit.contains("clean")));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_on_stalled_stream() {
        let fx = fixture(vec![ScriptedAttempt::Stall], ExchangeConfig::default());
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(6);
        fx.store.create(&conversation).unwrap();

        let started = tokio::time::Instant::now();
        let error = fx
            .orchestrator
            .run_streaming_turn(&transport, &mut conversation, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, TurnError::Llm(LlmError::Timeout)));
        assert_eq!(started.elapsed(), Duration::from_secs(100));
        assert_eq!(fx.store.save_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_covers_retry_waits() {
        // Every attempt is rate limited; the 100s deadline trips during the
        // backoff waits (10+20+40 = 70, +80 would pass 100).
        let attempts = (0..5)
            .map(|_| {
                ScriptedAttempt::Error(LlmError::RateLimited {
                    retry_after_secs: None,
                })
            })
            .collect();
        let fx = fixture(attempts, ExchangeConfig::default());
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(7);
        fx.store.create(&conversation).unwrap();

        let error = fx
            .orchestrator
            .run_streaming_turn(&transport, &mut conversation, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, TurnError::Llm(LlmError::Timeout)));
        assert_eq!(fx.backend.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_persists_nothing() {
        let fx = fixture(vec![ScriptedAttempt::Stall], ExchangeConfig::default());
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(8);
        fx.store.create(&conversation).unwrap();

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let outcome = fx
            .orchestrator
            .run_streaming_turn(&transport, &mut conversation, None, &cancel)
            .await
            .unwrap();

        assert_eq!(outcome, ExchangeOutcome::Cancelled);
        assert_eq!(fx.store.save_count(), 0);
        assert_eq!(conversation.history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_grows_monotonically() {
        let fx = fixture(
            vec![ScriptedAttempt::DeltasPaced(
                vec!["Hel", "lo, ", "world"],
                Duration::from_millis(1500),
            )],
            ExchangeConfig::default(),
        );
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(9);
        fx.store.create(&conversation).unwrap();

        fx.orchestrator
            .run_streaming_turn(&transport, &mut conversation, None, &CancellationToken::new())
            .await
            .unwrap();

        let edits = fx.transport.edit_texts();
        assert!(edits.len() >= 2, "expected periodic flushes, got {edits:?}");
        for pair in edits.windows(2) {
            assert!(pair[1].starts_with(&pair[0]));
        }
        assert_eq!(edits.last().map(String::as_str), Some("Hello, world"));
    }

    #[tokio::test]
    async fn test_failed_flushes_do_not_fail_the_turn() {
        let fx = fixture(
            vec![ScriptedAttempt::Deltas(vec!["quiet success"])],
            ExchangeConfig::default(),
        );
        fx.transport.fail_edits.store(true, Ordering::SeqCst);
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(10);
        fx.store.create(&conversation).unwrap();

        let outcome = fx
            .orchestrator
            .run_streaming_turn(&transport, &mut conversation, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ExchangeOutcome::Completed("quiet success".to_string()));
        assert_eq!(fx.store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_stream_is_unexpected() {
        let fx = fixture(vec![ScriptedAttempt::Deltas(vec![])], ExchangeConfig::default());
        let transport = as_transport(&fx.transport);
        let mut conversation = conversation_with_prompt(11);
        fx.store.create(&conversation).unwrap();

        let error = fx
            .orchestrator
            .run_streaming_turn(&transport, &mut conversation, None, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(error, TurnError::Llm(LlmError::Unexpected(_))));
        assert_eq!(fx.store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_speaking_turn_sends_voice_and_persists_once() {
        let fx = fixture(
            vec![ScriptedAttempt::Deltas(vec!["I hear you"])],
            ExchangeConfig::default(),
        );
        let transport = as_transport(&fx.transport);
        let synthesizer = Arc::new(MockSynthesizer::new());
        let as_tts: Arc<dyn TextToSpeech> = synthesizer.clone();

        let mut conversation = Conversation::new(12, Language::Ukrainian, true);
        conversation.add_message(Message::user("скажи щось"));
        fx.store.create(&conversation).unwrap();

        let outcome = fx
            .orchestrator
            .run_speaking_turn(&transport, &as_tts, &mut conversation, Some(3), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ExchangeOutcome::Completed("I hear you".to_string()));
        assert_eq!(fx.store.save_count(), 1);
        assert_eq!(fx.transport.voices.lock().len(), 1);
        assert_eq!(synthesizer.last_hint.lock().as_deref(), Some("uk-UA"));
        assert_eq!(synthesizer.last_text.lock().as_deref(), Some("I hear you"));
        assert_eq!(conversation.history[1], Message::assistant("I hear you"));

        // The synthesized file is cleaned up after sending.
        let (_, sent_path) = fx.transport.voices.lock()[0].clone();
        assert!(!sent_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speaking_turn_retries_rate_limit() {
        let fx = fixture(
            vec![
                ScriptedAttempt::Error(LlmError::RateLimited {
                    retry_after_secs: Some(3),
                }),
                ScriptedAttempt::Deltas(vec!["spoken reply"]),
            ],
            ExchangeConfig::default(),
        );
        let transport = as_transport(&fx.transport);
        let synthesizer: Arc<dyn TextToSpeech> = Arc::new(MockSynthesizer::new());

        let mut conversation = Conversation::new(13, Language::English, true);
        conversation.add_message(Message::user("speak up"));
        fx.store.create(&conversation).unwrap();

        let outcome = fx
            .orchestrator
            .run_speaking_turn(&transport, &synthesizer, &mut conversation, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ExchangeOutcome::Completed("spoken reply".to_string()));
        assert_eq!(fx.backend.call_count(), 2);
        // The server hint trumps the computed backoff.
        assert_eq!(fx.backend.call_gaps(), vec![Duration::from_secs(3)]);
    }
}
