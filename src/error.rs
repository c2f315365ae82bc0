//! Error types for the media indexer

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur while indexing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanErrorKind {
    /// Missing or invalid connection or root directory configuration
    Config,
    /// The media prober could not analyze a file
    Probe,
    /// A directory listing, stat or watch failed
    Filesystem,
    /// The index database could not be read or written
    Storage,
    /// A path could not be expressed relative to the root or as a URI
    InvalidPath,
}

/// Represents an error that occurred while indexing
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct ScanError {
    /// The kind of error
    pub kind: ScanErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// Create a new scan error
    pub fn new(kind: ScanErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Config, None, message)
    }

    /// Create a probe error
    pub fn probe(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Probe, path, message)
    }

    /// Create a filesystem error
    pub fn filesystem(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Filesystem, path, message)
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Storage, None, message)
    }

    /// Create an invalid path error
    pub fn invalid_path(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::InvalidPath, Some(path), message)
    }

    /// Whether the error must stop the process.
    ///
    /// Configuration and storage failures are fatal: the index would
    /// otherwise silently diverge from the filesystem.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ScanErrorKind::Config | ScanErrorKind::Storage)
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        Self::filesystem(None, err.to_string())
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(err: rusqlite::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<notify::Error> for ScanError {
    fn from(err: notify::Error) -> Self {
        let path = err.paths.first().cloned();
        Self::filesystem(path, err.to_string())
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<url::ParseError> for ScanError {
    fn from(err: url::ParseError) -> Self {
        Self::config(format!("Invalid database uri: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(ScanError::config("missing drivername").is_fatal());
        assert!(ScanError::storage("disk full").is_fatal());
        assert!(!ScanError::probe(None, "not a media file").is_fatal());
        assert!(!ScanError::filesystem(None, "permission denied").is_fatal());
        assert!(!ScanError::invalid_path(PathBuf::from("/elsewhere"), "outside root").is_fatal());
    }

    #[test]
    fn test_io_error_maps_to_filesystem() {
        let err: ScanError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert_eq!(err.kind, ScanErrorKind::Filesystem);
        assert!(err.message.contains("denied"));
    }

    #[test]
    fn test_display_includes_kind_and_path() {
        let err = ScanError::probe(Some(PathBuf::from("/media/bad.mp4")), "truncated moov atom");
        let text = err.to_string();
        assert!(text.starts_with("Probe: truncated moov atom"));
        assert!(text.contains("bad.mp4"));
    }
}
