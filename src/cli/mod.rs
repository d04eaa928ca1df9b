//! CLI command implementations

pub mod download;
pub mod error;

pub use download::{Cli, OutputFormat, ResumeMode};
pub use error::CliError;
