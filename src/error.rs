//! Error taxonomy for a copy run.
//!
//! Every failure a run can produce collapses into one [`HyperError`] variant, and
//! every variant maps to exactly one signed code via [`HyperError::code`]. Internal
//! helpers keep using `anyhow` for context-rich messages; the stage that owns the
//! failure converts it here.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// A terminal run failure.
#[derive(Debug, Error)]
pub enum HyperError {
    /// The source pattern is empty or not a valid glob.
    #[error("invalid source pattern: {0}")]
    InvalidPattern(String),

    /// The output path is empty, a directory, or its parent cannot be created.
    #[error("invalid output path: {0}")]
    InvalidOutput(String),

    /// Schema declaration rejected.
    #[error("schema error: {0}")]
    Schema(String),

    /// Pipeline configuration rejected.
    #[error("config error: {0}")]
    Config(String),

    /// Directory traversal failed while expanding the source pattern.
    #[error("glob traversal error: {0}")]
    Glob(String),

    /// A field or record could not be coerced into the compiled schema.
    #[error("parse error in {}: {reason}", parse_location(path, record, column))]
    Parse {
        path: PathBuf,
        /// 1-based data record number (header excluded).
        record: u64,
        column: Option<String>,
        reason: String,
    },

    /// The container could not be created or appended to.
    #[error("writer error: {0}")]
    Writer(String),

    /// Block hand-off between workers and the writer broke down.
    #[error("channel error: {0}")]
    Channel(String),

    /// A worker hit an unrecoverable fault (panic, mid-file I/O failure).
    #[error("worker panic: {0}")]
    WorkerPanic(String),
}

fn parse_location(path: &Path, record: &u64, column: &Option<String>) -> String {
    match column {
        Some(c) => format!("{} at record {record}, column `{c}`", path.display()),
        None => format!("{} at record {record}", path.display()),
    }
}

impl HyperError {
    /// Signed result code reported at the pipeline boundary.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            HyperError::InvalidPattern(_) => -1,
            HyperError::InvalidOutput(_) => -2,
            HyperError::Schema(_) => -3,
            HyperError::Config(_) => -4,
            HyperError::Glob(_) => -5,
            HyperError::Parse { .. } => -6,
            HyperError::Writer(_) => -7,
            HyperError::Channel(_) => -10,
            HyperError::WorkerPanic(_) => -11,
        }
    }

    pub(crate) fn poisoned(what: &str) -> Self {
        HyperError::Channel(format!("{what} lock poisoned"))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, HyperError>;
