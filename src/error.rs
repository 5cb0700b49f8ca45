//! Error types for preserve operations.
//!
//! Per-file failures are captured into operation results rather than
//! propagated; only manifest-level failures abort a whole run.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum PreserveError {
    /// Source vanished, or a destination was absent where one was expected.
    #[error("not found: {0}")]
    NotFound(PathBuf),

    /// Destination already present and overwrite is disabled. Treated as a
    /// skip by the orchestrator, never as a failure.
    #[error("already exists: {0}")]
    AlreadyExists(PathBuf),

    /// A computed hash did not match the expected value.
    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The manifest declares a format version this build does not read.
    #[error("unsupported manifest version {found} in {path} (supported: {supported})")]
    ManifestVersionUnsupported {
        path: PathBuf,
        found: i64,
        supported: u32,
    },

    /// The manifest file exists but cannot be parsed.
    #[error("corrupt manifest {path}: {reason}")]
    ManifestCorrupt { path: PathBuf, reason: String },

    /// Re-applying collected attributes failed. Logged and swallowed at the
    /// call site; attribute preservation is best-effort.
    #[error("failed to apply metadata to {path}: {reason}")]
    MetadataApplyFailed { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest serialization failed: {0}")]
    ManifestEncode(#[from] serde_json::Error),
}

impl PreserveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for conditions the orchestrator records as a skip rather than a
    /// failure.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

pub type Result<T> = std::result::Result<T, PreserveError>;
