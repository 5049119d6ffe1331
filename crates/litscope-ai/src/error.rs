use std::time::Duration;

use litscope_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("LLM call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("model '{0}' is not available on the LLM server")]
    ModelUnavailable(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, AiError>;
