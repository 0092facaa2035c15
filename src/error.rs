//! Error types for the edition-render library.
//!
//! Every failure of an ingestion run surfaces as one [`EditionError`]. The
//! orchestrator ([`crate::process::EditionProcessor`]) catches errors at its
//! boundary, records them on the edition as a terminal `failed` status with
//! the string from [`EditionError::failure_reason`], and then returns them to
//! the caller unchanged.
//!
//! [`RasterizeReason`] splits rasterizer failures into the cases callers
//! actually branch on: the tool ran and said no, the tool ran and produced
//! nothing, or the tool never finished.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edition-render library.
#[derive(Debug, Error)]
pub enum EditionError {
    // ── Catalog state ─────────────────────────────────────────────────────
    /// No edition row with this id.
    #[error("Edition {id} not found")]
    EditionNotFound { id: i64 },

    /// Another run currently owns this edition.
    #[error("Edition {id} is already being processed.\nIf the previous run crashed, reset it with: editionctl reset {id}")]
    AlreadyProcessing { id: i64 },

    /// The edition was reset and claimed by another run while this one was in flight.
    #[error("Edition {id} was reset while this run was in flight; its results were discarded")]
    ClaimLost { id: i64 },

    // ── Input errors ──────────────────────────────────────────────────────
    /// The edition's source PDF could not be resolved under any root convention.
    #[error("Source PDF for edition {id} is missing: '{logical}' (tried {})", display_paths(.tried))]
    SourceMissing {
        id: i64,
        logical: String,
        tried: Vec<PathBuf>,
    },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// A logical path did not resolve to any existing file.
    #[error("Path '{logical}' not found (tried {})", display_paths(.tried))]
    PathNotFound {
        logical: String,
        tried: Vec<PathBuf>,
    },

    // ── Rasterizer errors ─────────────────────────────────────────────────
    /// The configured rasterizer executable does not exist.
    #[error("Rasterizer executable not found at '{path}'\nSet --rasterizer or EDITION_RASTERIZER to an installed tool (e.g. pdftoppm).")]
    RasterizerUnavailable { path: PathBuf },

    /// The rasterizer ran but did not produce a usable page set.
    #[error("Rasterization failed: {reason}")]
    RasterizeFailure { reason: RasterizeReason },

    // ── Persistence errors ────────────────────────────────────────────────
    /// A page image could not be moved into place or recorded.
    #[error("Failed to write page {page}: {detail}")]
    WriteFailure { page: u32, detail: String },

    /// A page row with this key already exists. Indicates a pipeline bug.
    #[error("Duplicate page {page} for edition {edition_id}")]
    DuplicatePage { edition_id: i64, page: u32 },

    /// Underlying SQLite error.
    #[error("Catalog error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Filesystem error outside a specific page write.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EditionError {
    /// Short reason string persisted on a failed edition.
    pub fn failure_reason(&self) -> String {
        match self {
            EditionError::SourceMissing { logical, .. } => format!("source missing: {logical}"),
            EditionError::RasterizerUnavailable { .. } => "rasterizer unavailable".to_string(),
            EditionError::RasterizeFailure { reason } => reason.to_string(),
            EditionError::WriteFailure { page, detail } => {
                format!("write failure on page {page}: {detail}")
            }
            EditionError::DuplicatePage { page, .. } => format!("duplicate page {page}"),
            EditionError::Database(e) => format!("database: {e}"),
            EditionError::Io { path, source } => format!("io: {}: {source}", path.display()),
            other => other.to_string(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EditionError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a rasterizer invocation was rejected.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RasterizeReason {
    /// Process exited with a nonzero status.
    ExitCode(i32),
    /// Process was terminated by a signal (no exit code).
    Signal,
    /// Exit status was zero but no page images were found.
    NoOutput,
    /// Process exceeded the configured deadline and was killed.
    Timeout { secs: u64 },
    /// Process could not be started.
    Spawn(String),
}

impl fmt::Display for RasterizeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RasterizeReason::ExitCode(code) => write!(f, "exit code {code}"),
            RasterizeReason::Signal => f.write_str("terminated by signal"),
            RasterizeReason::NoOutput => f.write_str("no output"),
            RasterizeReason::Timeout { secs } => write!(f, "timeout after {secs}s"),
            RasterizeReason::Spawn(detail) => write!(f, "spawn failed: {detail}"),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    let joined: Vec<String> = paths.iter().map(|p| format!("'{}'", p.display())).collect();
    joined.join(", ")
}
