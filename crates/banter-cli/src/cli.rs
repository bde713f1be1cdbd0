use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "banter")]
#[command(version, about = "Relay between Telegram chats and an OpenAI backend")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path (defaults to ~/.banter/config.toml)
    #[arg(long, global = true, env = "BANTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write logs to ~/.banter/logs/ instead of stdout
    #[arg(long, global = true)]
    pub log_to_file: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the relay
    Run,

    /// Write a starter config file and exit
    InitConfig {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}
