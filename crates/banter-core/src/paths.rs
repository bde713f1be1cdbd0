//! Path resolution for the banter home directory.

use anyhow::Result;
use std::path::PathBuf;

const BANTER_DIR: &str = ".banter";
const DB_FILE: &str = "banter.db";
const CONFIG_FILE: &str = "config.toml";
const LOGS_DIR: &str = "logs";

/// Environment variable to override the banter directory.
const BANTER_DIR_ENV: &str = "BANTER_DIR";

/// Resolve the banter data directory.
/// Priority: BANTER_DIR env var > ~/.banter/
pub fn resolve_banter_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(BANTER_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(BANTER_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Ensure the banter directory exists and return its path.
pub fn ensure_banter_dir() -> Result<PathBuf> {
    let dir = resolve_banter_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Database path: ~/.banter/banter.db
pub fn database_path() -> Result<PathBuf> {
    Ok(ensure_banter_dir()?.join(DB_FILE))
}

/// Config file path: ~/.banter/config.toml
pub fn config_path() -> Result<PathBuf> {
    Ok(resolve_banter_dir()?.join(CONFIG_FILE))
}

/// Logs directory: ~/.banter/logs/
pub fn logs_dir() -> Result<PathBuf> {
    let dir = resolve_banter_dir()?.join(LOGS_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
