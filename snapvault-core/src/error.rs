use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("File {} exceeds size limit of {limit} bytes", .path.display())]
    SizeLimitExceeded { path: PathBuf, limit: u64 },

    #[error("Path escapes repository root: {0}")]
    PathTraversal(String),

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Failures that only affect a single file while building a snapshot.
    pub fn is_recoverable_file_error(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ),
            Error::SizeLimitExceeded { .. } | Error::PathTraversal(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        let vanished = Error::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let denied = Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        let too_big = Error::SizeLimitExceeded {
            path: PathBuf::from("big.bin"),
            limit: 10,
        };

        assert!(vanished.is_recoverable_file_error());
        assert!(denied.is_recoverable_file_error());
        assert!(too_big.is_recoverable_file_error());
        assert!(Error::PathTraversal("../x".to_string()).is_recoverable_file_error());
        assert!(!Error::SnapshotNotFound("x".to_string()).is_recoverable_file_error());
        assert!(!Error::Cancelled.is_recoverable_file_error());
    }
}
