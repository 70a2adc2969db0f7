//! Vigil Trust System - code integrity verification for deployed files
//!
//! The release build hashes every critical file into a signed manifest; at
//! runtime the checker compares the deployment against it.
//!
//! Design Principles:
//! - Never conflate "cannot verify" with "invalid"
//! - Manifest tampering is reported separately from file modification
//! - The signature is a salted SHA-256: whoever holds the secret can sign

pub mod checker;
pub mod error;
pub mod hasher;
pub mod manifest;

pub use checker::{IntegrityChecker, IntegrityReport, IntegrityStatus};
pub use error::{FileError, TrustError};
pub use hasher::Digest;
pub use manifest::IntegrityManifest;

/// Files monitored when no explicit list is configured
pub const DEFAULT_CRITICAL_FILES: &[&str] = &[
    "app.py",
    "database.py",
    "database_postgres.py",
    "db_config.py",
    "form_management_system.py",
];
