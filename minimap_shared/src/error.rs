//! Shared error type.

use thiserror::Error;

/// Errors raised by the minimap libraries.
#[derive(Error, Debug)]
pub enum MinimapError {
    #[error("reference plane '{0}' not found in scene")]
    ReferencePlaneMissing(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("malformed inbound message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    #[error("inbound message missing '{0}'")]
    MissingField(&'static str),

    #[error("invalid color '{0}'")]
    InvalidColor(String),

    #[error("session allocation failed: {0}")]
    Allocation(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type MinimapResult<T> = Result<T, MinimapError>;
