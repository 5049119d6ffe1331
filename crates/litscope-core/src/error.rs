use thiserror::Error;

use crate::models::PaperStatus;

/// All errors that can occur in litscope-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Paper not found: {0}")]
    PaperNotFound(String),

    #[error("No active run. Start or load a run first.")]
    NoActiveRun,

    #[error("Invalid status transition for {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: PaperStatus,
        to: PaperStatus,
    },

    #[error("Corrupt state file {path}: {message}")]
    CorruptState { path: String, message: String },

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Exit codes used by the `litscope` binary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NothingToDo = 2,
    FileSystemError = 4,
    AiError = 5,
    NetworkError = 6,
}

pub type Result<T> = std::result::Result<T, CoreError>;
