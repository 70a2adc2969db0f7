//! Integrity manifest structure
//!
//! The manifest is the release-time source of truth for what the deployed
//! files should hash to. It is produced once by the release build, shipped
//! alongside the code and never mutated at runtime.

use crate::trust::error::{FileError, TrustError};
use crate::trust::hasher::{digest, sign_files};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// The signed manifest file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityManifest {
    /// Release version this manifest was generated for
    pub version: String,

    /// When the release build produced the manifest (ISO 8601; older tooling omits the offset)
    pub generated_at: String,

    /// Relative path -> lowercase hex SHA-256
    pub files: BTreeMap<String, String>,

    /// `sha256_hex(canonical(files) ++ secret)`
    #[serde(default)]
    pub signature: String,
}

/// A manifest together with the paths that could not be hashed while building it
#[derive(Debug)]
pub struct BuiltManifest {
    pub manifest: IntegrityManifest,
    pub skipped: Vec<String>,
}

impl IntegrityManifest {
    /// Hash every path under `root` and sign the resulting file map.
    ///
    /// Missing or unreadable files are skipped and reported, never fatal.
    pub fn build<S: AsRef<str>>(
        root: &Path,
        paths: &[S],
        secret: &str,
        version: &str,
    ) -> BuiltManifest {
        let mut files = BTreeMap::new();
        let mut skipped = Vec::new();

        info!("Generating integrity manifest for version {}", version);

        for path in paths {
            let relative = path.as_ref();
            match digest(&root.join(relative)) {
                Ok(file_digest) => {
                    debug!("  {}: {}...", relative, file_digest.short());
                    files.insert(relative.to_string(), file_digest.into_string());
                }
                Err(FileError::NotFound { .. }) => {
                    warn!("  {}: NOT FOUND, skipped", relative);
                    skipped.push(relative.to_string());
                }
                Err(e) => {
                    warn!("  {}: {}, skipped", relative, e);
                    skipped.push(relative.to_string());
                }
            }
        }

        let signature = sign_files(&files, secret);

        BuiltManifest {
            manifest: IntegrityManifest {
                version: version.to_string(),
                generated_at: Utc::now().to_rfc3339(),
                files,
                signature,
            },
            skipped,
        }
    }

    /// Recompute the signature and compare.
    ///
    /// A `false` here means the manifest itself was altered, not the files it lists.
    pub fn verify_signature(&self, secret: &str) -> bool {
        sign_files(&self.files, secret) == self.signature
    }

    /// Load manifest from disk
    pub fn load(manifest_path: &Path) -> Result<Self, TrustError> {
        if !manifest_path.exists() {
            return Err(TrustError::ManifestMissing {
                path: manifest_path.to_path_buf(),
            });
        }

        let content =
            std::fs::read_to_string(manifest_path).map_err(|e| TrustError::ManifestReadError {
                path: manifest_path.to_path_buf(),
                source: e,
            })?;

        serde_json::from_str(&content).map_err(|e| TrustError::ManifestParseError { source: e })
    }

    /// Save manifest to disk as pretty-printed JSON
    pub fn save(&self, manifest_path: &Path) -> Result<(), TrustError> {
        let json_content = serde_json::to_string_pretty(self)
            .map_err(|e| TrustError::ManifestParseError { source: e })?;

        if let Some(parent) = manifest_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| TrustError::ManifestWriteError {
                    path: manifest_path.to_path_buf(),
                    source: e,
                })?;
            }
        }

        std::fs::write(manifest_path, json_content).map_err(|e| TrustError::ManifestWriteError {
            path: manifest_path.to_path_buf(),
            source: e,
        })
    }

    /// Number of files covered by the manifest
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Read the deployed version from a manifest, falling back to a dev marker
pub fn app_version(manifest_path: &Path) -> String {
    IntegrityManifest::load(manifest_path)
        .map(|m| m.version)
        .unwrap_or_else(|_| crate::DEV_VERSION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const SECRET: &str = "test-secret";

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("app.py"), "print('app')").unwrap();
        std::fs::write(dir.path().join("database.py"), "print('db')").unwrap();
        dir
    }

    #[test]
    fn test_build_skips_missing_files() {
        let dir = project();
        let built = IntegrityManifest::build(
            dir.path(),
            &["app.py", "database.py", "missing.py"],
            SECRET,
            "2.1.0",
        );

        assert_eq!(built.manifest.len(), 2);
        assert_eq!(built.skipped, vec!["missing.py".to_string()]);
        assert_eq!(built.manifest.version, "2.1.0");
        assert!(built.manifest.verify_signature(SECRET));
    }

    #[test]
    fn test_signature_independent_of_input_order() {
        let dir = project();
        let a = IntegrityManifest::build(dir.path(), &["app.py", "database.py"], SECRET, "1");
        let b = IntegrityManifest::build(dir.path(), &["database.py", "app.py"], SECRET, "1");

        assert_eq!(a.manifest.signature, b.manifest.signature);
    }

    #[test]
    fn test_changed_entry_invalidates_whole_manifest() {
        let dir = project();
        let mut manifest =
            IntegrityManifest::build(dir.path(), &["app.py", "database.py"], SECRET, "1").manifest;

        manifest
            .files
            .insert("app.py".to_string(), "0".repeat(64));

        assert!(!manifest.verify_signature(SECRET));
    }

    #[test]
    fn test_wrong_secret_fails_verification() {
        let dir = project();
        let manifest = IntegrityManifest::build(dir.path(), &["app.py"], SECRET, "1").manifest;

        assert!(!manifest.verify_signature("not-the-secret"));
    }

    #[test]
    fn test_verifies_manifest_from_release_tooling() {
        // Shape written by the release build: sorted keys, ", " and ": " separators.
        let mut files = BTreeMap::new();
        files.insert("app.py".to_string(), "aa".to_string());
        files.insert("db_config.py".to_string(), "bb".to_string());
        let expected = crate::trust::hasher::digest_bytes(
            format!(r#"{{"app.py": "aa", "db_config.py": "bb"}}{SECRET}"#).as_bytes(),
        );

        let manifest = IntegrityManifest {
            version: "1.0.0".to_string(),
            generated_at: "2024-05-01T10:00:00.000000".to_string(),
            files,
            signature: expected.into_string(),
        };

        assert!(manifest.verify_signature(SECRET));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = project();
        let path = dir.path().join("release").join("integrity_manifest.json");
        let manifest = IntegrityManifest::build(dir.path(), &["app.py"], SECRET, "3.0.0").manifest;

        manifest.save(&path).unwrap();
        let loaded = IntegrityManifest::load(&path).unwrap();

        assert_eq!(loaded, manifest);
        assert_eq!(app_version(&path), "3.0.0");
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let result = IntegrityManifest::load(&dir.path().join("integrity_manifest.json"));

        assert!(matches!(result, Err(TrustError::ManifestMissing { .. })));
        assert_eq!(
            app_version(&dir.path().join("integrity_manifest.json")),
            crate::DEV_VERSION
        );
    }

    #[test]
    fn test_load_corrupt_manifest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("integrity_manifest.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            IntegrityManifest::load(&path),
            Err(TrustError::ManifestParseError { .. })
        ));
    }
}
