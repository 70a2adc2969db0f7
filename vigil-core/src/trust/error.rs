//! Integrity error types with clear, actionable messages

use std::path::PathBuf;
use thiserror::Error;

/// Failure to compute a digest for a single file.
///
/// Both variants mean "cannot verify", which callers must keep distinct
/// from a verified digest mismatch.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {path}")]
    NotFound { path: PathBuf },

    #[error("File could not be read: {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FileError {
    pub(crate) fn from_io(path: &std::path::Path, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            FileError::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            FileError::Unreadable {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn path(&self) -> &std::path::Path {
        match self {
            FileError::NotFound { path } | FileError::Unreadable { path, .. } => path,
        }
    }
}

/// Integrity manifest errors
#[derive(Error, Debug)]
pub enum TrustError {
    /// No manifest is deployed (development mode)
    #[error("No integrity manifest found at {path} (development mode)")]
    ManifestMissing { path: PathBuf },

    /// Manifest signature does not match its file list
    #[error("SECURITY ALERT: Integrity manifest has been tampered with!\n\nThe manifest signature does not match its file list.\nAnyone holding the signing secret can produce a manifest, so treat this as a possible intrusion.\n\nRecommended actions:\n1. Check for unauthorized access to the deployment\n2. Redeploy the release build and its manifest")]
    ManifestTampered,

    /// Failed to read the manifest
    #[error("Failed to read integrity manifest from {path}")]
    ManifestReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse the manifest
    #[error("Failed to parse integrity manifest (corrupted or invalid format)")]
    ManifestParseError {
        #[source]
        source: serde_json::Error,
    },

    /// Failed to write the manifest
    #[error("Failed to write integrity manifest to {path}")]
    ManifestWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TrustError {
    /// Log tamper-class errors on the security target
    pub fn log_if_security_critical(&self) {
        match self {
            TrustError::ManifestTampered | TrustError::ManifestParseError { .. } => {
                tracing::error!(target: "security", "INTEGRITY VIOLATION: {}", self);
            }
            _ => {}
        }
    }
}
