//! Error taxonomy for the ingestion core.
//!
//! [`IngestError`] is what the pipeline surfaces to the operator. Only the
//! encoding case is ever recovered from (one transcode-and-retry inside the
//! ingestion driver); everything else is fatal to the run. [`StoreError`] is
//! the narrower error of the table-store interface.

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Pipeline stage an error originated from, used to give load failures context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CreateTable,
    BulkLoad,
    Staging,
    Projection,
    Metadata,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::CreateTable => "create-table",
            Stage::BulkLoad => "bulk-load",
            Stage::Staging => "staging",
            Stage::Projection => "projection",
            Stage::Metadata => "metadata",
            Stage::Report => "report",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("dictionary error: {0}")]
    Dictionary(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error(
        "encoding error in {path:?}: {message}; normalize the file to UTF-8 manually and retry"
    )]
    Encoding { path: PathBuf, message: String },
    #[error("load error during {stage}: {source}")]
    Load {
        stage: Stage,
        #[source]
        source: StoreError,
    },
    #[error("table '{0}' not found in the destination store")]
    NotFound(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl IngestError {
    pub fn load(stage: Stage, source: StoreError) -> Self {
        IngestError::Load { stage, source }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("statement rejected: {0}")]
    Rejected(String),
    #[error("line {line}: field is not valid UTF-8")]
    InvalidUtf8 { line: u64 },
    #[error("reading {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// Whether the failure could stem from the source file's byte encoding.
    pub fn is_encoding(&self) -> bool {
        match self {
            StoreError::InvalidUtf8 { .. } => true,
            StoreError::Csv { source, .. } => matches!(source.kind(), csv::ErrorKind::Utf8 { .. }),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Rejected(err.to_string())
    }
}
