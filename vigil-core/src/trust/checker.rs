//! Integrity checking - compares deployed files against the signed manifest
//!
//! The checker never raises on integrity problems. Every outcome, including
//! "no manifest deployed", is a report the caller decides how to act on.

use crate::trust::error::TrustError;
use crate::trust::hasher::digest;
use crate::trust::manifest::IntegrityManifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Outcome classification of an integrity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityStatus {
    /// Signature valid and every listed file matches
    Verified,
    /// Signature valid but some files differ or are gone
    FilesModified,
    /// The manifest itself fails signature verification or cannot be parsed
    ManifestTampered,
    /// No manifest deployed; nothing can be said either way
    Unverifiable,
}

/// Result of a full integrity check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub status: IntegrityStatus,
    pub reason: String,
    pub version: String,
    pub modified_files: Vec<String>,
    pub missing_files: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl IntegrityReport {
    /// `Some(true)` when verified, `Some(false)` when tampered/modified, `None` when unverifiable
    pub fn valid(&self) -> Option<bool> {
        match self.status {
            IntegrityStatus::Verified => Some(true),
            IntegrityStatus::FilesModified | IntegrityStatus::ManifestTampered => Some(false),
            IntegrityStatus::Unverifiable => None,
        }
    }

    pub fn is_tampered(&self) -> bool {
        self.valid() == Some(false)
    }

    fn new(status: IntegrityStatus, reason: impl Into<String>, version: impl Into<String>) -> Self {
        IntegrityReport {
            status,
            reason: reason.into(),
            version: version.into(),
            modified_files: Vec::new(),
            missing_files: Vec::new(),
            checked_at: Utc::now(),
        }
    }
}

/// Integrity checker - holds the signing secret and the deployment root
#[derive(Debug, Clone)]
pub struct IntegrityChecker {
    /// Root that manifest paths are relative to
    root: PathBuf,

    /// Secret used to verify the manifest signature
    secret: String,
}

impl IntegrityChecker {
    pub fn new(root: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        IntegrityChecker {
            root: root.into(),
            secret: secret.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check the deployment against an already-loaded manifest
    #[instrument(skip(self, manifest), fields(version = %manifest.version, files = manifest.len()))]
    pub fn check(&self, manifest: &IntegrityManifest) -> IntegrityReport {
        // Signature first: a forged manifest makes every per-file answer meaningless
        if !manifest.verify_signature(&self.secret) {
            TrustError::ManifestTampered.log_if_security_critical();
            return IntegrityReport::new(
                IntegrityStatus::ManifestTampered,
                "Manifest signature invalid - integrity file was tampered with",
                manifest.version.clone(),
            );
        }

        let mut modified_files = Vec::new();
        let mut missing_files = Vec::new();

        for (path, expected) in &manifest.files {
            match digest(&self.root.join(path)) {
                Ok(current) => {
                    if current != *expected {
                        let expected_short: String = expected.chars().take(16).collect();
                        warn!(target: "security", "Modified file: {} (expected {}..., found {}...)", path, expected_short, current.short());
                        modified_files.push(path.clone());
                    } else {
                        debug!("Verified: {}", path);
                    }
                }
                Err(e) => {
                    warn!(target: "security", "Cannot verify {}: {}", path, e);
                    missing_files.push(path.clone());
                }
            }
        }

        if modified_files.is_empty() && missing_files.is_empty() {
            info!("All {} files verified", manifest.len());
            return IntegrityReport::new(
                IntegrityStatus::Verified,
                "All files verified",
                manifest.version.clone(),
            );
        }

        let mut reason = Vec::new();
        if !modified_files.is_empty() {
            reason.push(format!("Modified: {}", modified_files.join(", ")));
        }
        if !missing_files.is_empty() {
            reason.push(format!("Missing: {}", missing_files.join(", ")));
        }

        IntegrityReport {
            status: IntegrityStatus::FilesModified,
            reason: reason.join(" | "),
            version: manifest.version.clone(),
            modified_files,
            missing_files,
            checked_at: Utc::now(),
        }
    }

    /// Load a manifest from disk and check it.
    ///
    /// An absent manifest is reported as unverifiable (development mode);
    /// an unreadable or unparseable one is treated as tampered.
    pub fn check_file(&self, manifest_path: &Path) -> IntegrityReport {
        match IntegrityManifest::load(manifest_path) {
            Ok(manifest) => self.check(&manifest),
            Err(TrustError::ManifestMissing { .. }) => {
                info!(
                    "No integrity manifest at {} - running unverified",
                    manifest_path.display()
                );
                IntegrityReport::new(
                    IntegrityStatus::Unverifiable,
                    "No integrity manifest found (development mode)",
                    crate::DEV_VERSION,
                )
            }
            Err(e) => {
                e.log_if_security_critical();
                IntegrityReport::new(
                    IntegrityStatus::ManifestTampered,
                    format!("Integrity manifest unreadable: {e}"),
                    "unknown",
                )
            }
        }
    }
}
