use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort a launch session.
///
/// Single bad answers never show up here: the prompt engine recovers from
/// them locally by asking again.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// Nested groups, missing or malformed schema, schema/file mismatch.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("parameter '{0}' is not defined in the pipeline schema")]
    UnknownParam(String),

    #[error("invalid pipeline parameters: {0}")]
    InvalidParams(String),

    /// Only raised once the non-interactive retry budget is used up.
    #[error("'{id}' is required but no value was given after {attempts} attempts")]
    RequiredField { id: String, attempts: usize },

    #[error("{0}")]
    RemoteProtocol(String),

    #[error("request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("launch cancelled by user")]
    Cancelled,

    #[error(
        "parameter output file already exists: {} (use --params-out to choose another path)",
        .0.display()
    )]
    OutputCollision(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LaunchError>;
