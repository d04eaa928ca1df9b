//! CLI error types and conversions

use crate::collections::CollectionError;
use crate::downloader::{EngineError, ErrorKind};
use crate::output::OutputError;
use crate::resume::ResumeError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Species list error
    #[error("species list error: {0}")]
    CollectionError(#[from] CollectionError),

    /// Engine error
    #[error("download error: {0}")]
    EngineError(#[from] EngineError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Resume error
    #[error("resume error: {0}")]
    ResumeError(#[from] ResumeError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}

impl CliError {
    /// Failure category for logs
    pub fn kind(&self) -> ErrorKind {
        match self {
            CliError::EngineError(e) => e.kind(),
            CliError::OutputError(_) => ErrorKind::Sink,
            CliError::ResumeError(_) => ErrorKind::Resume,
            CliError::CollectionError(_)
            | CliError::InvalidArgument(_)
            | CliError::ConfigurationError(_) => ErrorKind::Configuration,
        }
    }
}
