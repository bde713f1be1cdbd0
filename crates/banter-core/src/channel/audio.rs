//! Voice note transcoding.
//!
//! Messaging transports deliver voice notes as OGG/Opus while the
//! transcription backend wants MP3. Conversion shells out to ffmpeg.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Converts a downloaded voice note into an MP3 the transcriber accepts.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Writes the converted file next to `input` and returns its path.
    async fn to_mp3(&self, input: &Path) -> Result<PathBuf>;
}

/// Runs the system ffmpeg binary.
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
}

impl FfmpegTranscoder {
    /// Locates ffmpeg on PATH. Fails at startup rather than on the first
    /// voice note.
    pub fn locate() -> Result<Self> {
        let ffmpeg = which::which("ffmpeg").context("ffmpeg not found on PATH")?;
        Ok(Self { ffmpeg })
    }

    pub fn with_binary(ffmpeg: PathBuf) -> Self {
        Self { ffmpeg }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn to_mp3(&self, input: &Path) -> Result<PathBuf> {
        let output = input.with_extension("mp3");
        let result = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg(&output)
            .output()
            .await
            .context("failed to spawn ffmpeg")?;

        if !result.status.success() {
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr)
            ));
        }

        debug!(
            input = %input.display(),
            output = %output.display(),
            "Voice note transcoded"
        );
        Ok(output)
    }
}
