mod cli;
mod config;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use banter_ai::{ChatBackend, OpenAiClient, OpenAiSpeechSynthesizer, OpenAiTranscriber};
use banter_core::{
    ConversationStorage, ConversationStore, FfmpegTranscoder, InMemoryTurnRegistry, Orchestrator,
    TelegramTransport, Transcoder, Transport, TurnDispatcher, TurnRegistry, paths,
};
use banter_storage::Storage;

use cli::{Cli, Commands};
use config::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::InitConfig { force } => init_config(cli.config.as_deref(), force),
        Commands::Run => run(cli.config.as_deref(), cli.log_to_file).await,
    }
}

fn init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => paths::config_path()?,
    };
    if path.exists() && !force {
        anyhow::bail!("{} already exists, pass --force to overwrite", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, config::CONFIG_TEMPLATE)?;
    println!("Wrote {}", path.display());
    Ok(())
}

/// Configure logging; the returned guard must stay alive so buffered file
/// output is flushed on exit.
fn init_logging(to_file: bool) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,banter_core=debug".into());

    if to_file {
        let log_dir = paths::logs_dir()?;
        let file_appender = tracing_appender::rolling::daily(log_dir, "banter.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(false)
            .init();
        Ok(Some(guard))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
        Ok(None)
    }
}

async fn run(config_path: Option<&Path>, log_to_file: bool) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let _log_guard = init_logging(log_to_file)?;

    info!("Starting banter relay");

    let db_path = config.db_path()?;
    let storage = Storage::new(&db_path.to_string_lossy())?;
    let store: Arc<dyn ConversationStore> = Arc::new(ConversationStorage::new(storage.get_db())?);

    let api_key = config.openai_api_key()?;

    let mut backend = OpenAiClient::new(&api_key);
    if let Some(model) = &config.openai.chat_model {
        backend = backend.with_model(model);
    }
    if let Some(base) = &config.openai.api_base {
        backend = backend.with_base_url(base);
    }
    let backend: Arc<dyn ChatBackend> = Arc::new(backend);

    let mut transcriber = OpenAiTranscriber::new(&api_key);
    if let Some(model) = &config.openai.transcription_model {
        transcriber = transcriber.with_model(model);
    }
    if let Some(base) = &config.openai.api_base {
        transcriber = transcriber.with_base_url(base);
    }

    let mut synthesizer = OpenAiSpeechSynthesizer::new(&api_key);
    if let Some(model) = &config.openai.speech_model {
        synthesizer = synthesizer.with_model(model);
    }
    if let Some(voice) = &config.openai.speech_voice {
        synthesizer = synthesizer.with_voice(voice);
    }
    if let Some(base) = &config.openai.api_base {
        synthesizer = synthesizer.with_base_url(base);
    }

    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::locate()?);

    let transport = Arc::new(TelegramTransport::new(config.telegram_config()?));
    if let Err(error) = transport.set_my_commands().await {
        warn!("Failed to register command menu: {error:#}");
    }

    let registry: Arc<dyn TurnRegistry> = Arc::new(InMemoryTurnRegistry::new());
    let orchestrator = Orchestrator::new(backend, store.clone(), config.exchange_config());
    let dispatcher = Arc::new(TurnDispatcher::new(
        registry,
        store,
        transport.clone() as Arc<dyn Transport>,
        Arc::new(transcriber),
        Arc::new(synthesizer),
        transcoder,
        orchestrator,
    ));

    let mut turns = transport.start_receiving().await?;
    info!("Relay is up, waiting for turns");

    let shutdown = CancellationToken::new();
    let mut turn_tasks = JoinSet::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            maybe_turn = turns.next() => {
                let Some(turn) = maybe_turn else {
                    warn!("Transport stream ended");
                    break;
                };
                let dispatcher = dispatcher.clone();
                let cancel = shutdown.child_token();
                turn_tasks.spawn(async move {
                    dispatcher.dispatch(turn, cancel).await;
                });
                // Reap finished turns so the set does not grow unbounded.
                while turn_tasks.try_join_next().is_some() {}
            }
        }
    }

    transport.stop();
    shutdown.cancel();

    let drain = async {
        while turn_tasks.join_next().await.is_some() {}
    };
    if tokio::time::timeout(Duration::from_secs(5), drain).await.is_err() {
        warn!("Shutdown timed out with turns still in flight");
    }

    info!("banter stopped");
    Ok(())
}
