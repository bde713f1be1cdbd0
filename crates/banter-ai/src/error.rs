//! Upstream failure taxonomy for the LLM boundary.
//!
//! Every raw failure signal (HTTP status, connection fault, decode fault,
//! deadline) collapses into one `LlmError` variant. Classification is total:
//! anything unclassifiable falls through to `Unexpected`.

use thiserror::Error;

/// Truncate error bodies to prevent leaking large or sensitive responses.
const MAX_ERROR_BODY: usize = 512;

/// Closed set of upstream failure kinds.
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("too many requests")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("invalid API key")]
    Unauthorized,

    #[error("token limit reached: {0}")]
    TokenLimit(String),

    #[error("request deadline exceeded")]
    Timeout,

    #[error("transport or decoding failure: {0}")]
    Transport(String),

    #[error("unexpected upstream failure: {0}")]
    Unexpected(String),
}

/// Result type alias for LLM boundary operations
pub type Result<T> = std::result::Result<T, LlmError>;

impl LlmError {
    /// Classify an upstream HTTP status plus response body.
    pub fn from_status(status: u16, body: &str, retry_after_secs: Option<u64>) -> Self {
        match status {
            429 => Self::RateLimited { retry_after_secs },
            401 => Self::Unauthorized,
            400 if has_token_limit_marker(body) => Self::TokenLimit(truncate_body(body)),
            _ => Self::Unexpected(format!("HTTP {}: {}", status, truncate_body(body))),
        }
    }

    /// Only rate limiting is worth retrying; every other kind propagates.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Server-provided retry hint in seconds, when the upstream sent one.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() || err.is_request() || err.is_body() || err.is_decode() {
            Self::Transport(err.to_string())
        } else {
            Self::Unexpected(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<std::io::Error> for LlmError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

fn has_token_limit_marker(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("token") || lower.contains("maximum context") || lower.contains("length")
}

fn truncate_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY {
        let cut = body
            .char_indices()
            .take_while(|(i, _)| *i <= MAX_ERROR_BODY)
            .last()
            .map(|(i, _)| i)
            .unwrap_or(0);
        format!("{}... [truncated]", &body[..cut])
    } else {
        body.to_string()
    }
}

/// Classify a non-success HTTP response, consuming its body.
pub async fn response_to_error(response: reqwest::Response) -> LlmError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(&response);
    let body = response.text().await.unwrap_or_default();

    LlmError::from_status(status, &body, retry_after)
}

pub fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}
