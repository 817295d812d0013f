//! Error taxonomy shared by every stage of the pipeline.

use std::path::PathBuf;

/// Process exit code for a clean run.
pub const EXIT_OK: i32 = 0;
/// Process exit code for any failure (file, configuration or connection).
pub const EXIT_FAILURE: i32 = 1;
/// Process exit code when the user interrupts the run.
pub const EXIT_INTERRUPTED: i32 = 130;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Model service not found at {0}. Ensure Ollama is running and accessible.")]
    ServiceNotFound(String),

    #[error("Model service error (HTTP {status}): {body}")]
    Service { status: u16, body: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Corrupted image {path}: {reason}")]
    CorruptedImage { path: PathBuf, reason: String },

    #[error("Unsupported image format: {path} (supported: {supported})")]
    UnsupportedFormat { path: PathBuf, supported: String },

    #[error("Image too large: {path} is {size_mb:.1}MB, maximum is {max_mb:.1}MB")]
    TooLarge {
        path: PathBuf,
        size_mb: f64,
        max_mb: f64,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Destination already exists: {0}")]
    DestinationExists(PathBuf),

    #[error("Move failed: {0}")]
    MoveFailed(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Metadata write failed: {0}")]
    MetadataWrite(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl AppError {
    /// Whether the failure is worth another attempt against the model service.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Connection(_) | AppError::Timeout(_) | AppError::Service { .. }
        )
    }

    /// Errors that mean the model service cannot be reached at all.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            AppError::Connection(_) | AppError::ServiceNotFound(_) | AppError::Service { .. }
        )
    }

    /// Maps an IO error, keeping access-denied distinct from other failures.
    pub fn from_io(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            AppError::Permission(format!("{context}: {err}"))
        } else {
            AppError::MoveFailed(format!("{context}: {err}"))
        }
    }
}
