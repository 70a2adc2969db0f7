//! Vigil configuration
//!
//! ## Configuration Sources (in precedence order)
//!
//! 1. CLI flags (applied by the binary)
//! 2. `VIGIL_*` / `DATABASE_URL` environment variables
//! 3. An optional JSON config file
//! 4. Built-in defaults
//!
//! The built-in secrets are development placeholders. [`VigilConfig::insecure_defaults`]
//! lists every setting still at such a value so startup can warn about it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_AUTHORITY_URL: &str = "http://127.0.0.1:8700";
pub const DEFAULT_SIGNING_SECRET: &str = "vigil-dev-secret-change-in-production";
pub const DEFAULT_LICENSE_SALT: &str = "vigil-secret-salt-change-this";
pub const NO_LICENSE_KEY: &str = "none";

/// Files watched by the security monitor when nothing else is configured
pub const DEFAULT_MONITORED_FILES: &[&str] = &[
    "app.py",
    "database.py",
    "database_postgres.py",
    "db_config.py",
    "form_management_system.py",
    "security_monitoring.py",
    "alert_system.py",
];

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VigilConfig {
    /// Base URL of the remote licensing/monitoring authority
    #[serde(default = "default_authority_url")]
    pub authority_url: String,

    /// License key presented to the authority (`none` when unset)
    #[serde(default = "default_license_key")]
    pub license_key: String,

    /// Secret mixed into the manifest signature
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,

    /// Salt for license key generation (vendor side)
    #[serde(default = "default_license_salt")]
    pub license_salt: String,

    /// Where the installation id is persisted; `<data_dir>/installation_id.txt` if unset
    #[serde(default)]
    pub installation_id_file: Option<PathBuf>,

    /// Directory for logs, caches and the default SQLite store
    #[serde(default = "default_dir")]
    pub data_dir: PathBuf,

    /// Root that manifest and monitored paths are relative to
    #[serde(default = "default_dir")]
    pub deploy_root: PathBuf,

    /// Manifest location; `<deploy_root>/integrity_manifest.json` if unset
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    /// SQL store URL; a SQLite file under `data_dir` if unset
    #[serde(default)]
    pub database_url: Option<String>,

    /// Authority request timeout in seconds (clamped by the client)
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Files the release manifest covers
    #[serde(default = "default_manifest_files")]
    pub manifest_files: Vec<String>,

    /// Files the security monitor baselines and re-checks
    #[serde(default = "default_monitored_files")]
    pub monitored_files: Vec<String>,

    /// Disable the authority client entirely
    #[serde(default)]
    pub offline: bool,
}

impl Default for VigilConfig {
    fn default() -> Self {
        Self {
            authority_url: default_authority_url(),
            license_key: default_license_key(),
            signing_secret: default_signing_secret(),
            license_salt: default_license_salt(),
            installation_id_file: None,
            data_dir: default_dir(),
            deploy_root: default_dir(),
            manifest: None,
            database_url: None,
            timeout_seconds: default_timeout(),
            manifest_files: default_manifest_files(),
            monitored_files: default_monitored_files(),
            offline: false,
        }
    }
}

fn default_authority_url() -> String {
    DEFAULT_AUTHORITY_URL.to_string()
}

fn default_license_key() -> String {
    NO_LICENSE_KEY.to_string()
}

fn default_signing_secret() -> String {
    DEFAULT_SIGNING_SECRET.to_string()
}

fn default_license_salt() -> String {
    DEFAULT_LICENSE_SALT.to_string()
}

fn default_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_timeout() -> u64 {
    10
}

fn default_manifest_files() -> Vec<String> {
    crate::trust::DEFAULT_CRITICAL_FILES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_monitored_files() -> Vec<String> {
    DEFAULT_MONITORED_FILES.iter().map(|s| s.to_string()).collect()
}

impl VigilConfig {
    /// Load configuration: defaults, then the optional JSON file, then the environment
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Parse a JSON config file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("VIGIL_AUTHORITY_URL") {
            self.authority_url = v;
        }
        if let Some(v) = var("VIGIL_LICENSE_KEY") {
            self.license_key = v;
        }
        if let Some(v) = var("VIGIL_SIGNING_SECRET") {
            self.signing_secret = v;
        }
        if let Some(v) = var("VIGIL_LICENSE_SALT") {
            self.license_salt = v;
        }
        if let Some(v) = var("VIGIL_INSTALLATION_ID_FILE") {
            self.installation_id_file = Some(PathBuf::from(v));
        }
        if let Some(v) = var("VIGIL_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = var("VIGIL_DEPLOY_ROOT") {
            self.deploy_root = PathBuf::from(v);
        }
        if let Some(v) = var("VIGIL_MANIFEST") {
            self.manifest = Some(PathBuf::from(v));
        }
        if let Some(v) = var("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = var("VIGIL_TIMEOUT_SECS") {
            match v.trim().parse::<u64>() {
                Ok(secs) => self.timeout_seconds = secs,
                Err(_) => warn!("Ignoring VIGIL_TIMEOUT_SECS={:?}: not a whole number", v),
            }
        }
        if let Some(v) = var("VIGIL_MONITORED_FILES") {
            let files: Vec<String> = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !files.is_empty() {
                self.monitored_files = files;
            }
        }
        if let Some(v) = var("VIGIL_OFFLINE") {
            self.offline = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn installation_id_path(&self) -> PathBuf {
        self.installation_id_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("installation_id.txt"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.manifest
            .clone()
            .unwrap_or_else(|| self.deploy_root.join("integrity_manifest.json"))
    }

    pub fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!("sqlite://{}?mode=rwc", self.data_dir.join("vigil.db").display())
        })
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("audit_log.jsonl")
    }

    pub fn alert_log_path(&self) -> PathBuf {
        self.data_dir.join("security_alerts.jsonl")
    }

    pub fn last_validation_path(&self) -> PathBuf {
        self.data_dir.join("last_validation.json")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Settings still at a development placeholder, by environment variable name
    pub fn insecure_defaults(&self) -> Vec<&'static str> {
        let mut insecure = Vec::new();
        if self.signing_secret == DEFAULT_SIGNING_SECRET {
            insecure.push("VIGIL_SIGNING_SECRET");
        }
        if self.license_salt == DEFAULT_LICENSE_SALT {
            insecure.push("VIGIL_LICENSE_SALT");
        }
        if self.license_key == NO_LICENSE_KEY {
            insecure.push("VIGIL_LICENSE_KEY");
        }
        if !self.offline && self.authority_url.starts_with("http://") {
            insecure.push("VIGIL_AUTHORITY_URL");
        }
        insecure
    }

    /// Emit one warning per insecure default
    pub fn warn_insecure_defaults(&self) {
        for name in self.insecure_defaults() {
            warn!(target: "security", "{} is using an insecure development default", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = VigilConfig::default();
        assert_eq!(config.authority_url, "http://127.0.0.1:8700");
        assert_eq!(config.license_key, "none");
        assert_eq!(config.timeout_seconds, 10);
        assert_eq!(
            config.manifest_path(),
            PathBuf::from("./integrity_manifest.json")
        );
        assert_eq!(config.database_url(), "sqlite://./vigil.db?mode=rwc");
        assert_eq!(config.monitored_files.len(), 7);
        assert_eq!(config.manifest_files.len(), 5);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vigil.json");
        std::fs::write(
            &path,
            r#"{"authority_url": "https://authority.example", "timeout_seconds": 7}"#,
        )
        .unwrap();

        let config = VigilConfig::from_file(&path).unwrap();
        assert_eq!(config.authority_url, "https://authority.example");
        assert_eq!(config.timeout_seconds, 7);
        assert_eq!(config.signing_secret, DEFAULT_SIGNING_SECRET);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vigil.json");
        std::fs::write(&path, "{ nope").unwrap();

        let err = VigilConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("VIGIL_LICENSE_KEY", "VGL-DEMO"),
            ("VIGIL_DATA_DIR", "/var/lib/vigil"),
            ("VIGIL_MONITORED_FILES", "a.py, b.py,,"),
            ("VIGIL_OFFLINE", "true"),
            ("VIGIL_TIMEOUT_SECS", "6"),
        ]);
        let mut config = VigilConfig::default();
        config.apply_env_with(|k| vars.get(k).cloned());

        assert_eq!(config.license_key, "VGL-DEMO");
        assert_eq!(
            config.audit_log_path(),
            PathBuf::from("/var/lib/vigil/audit_log.jsonl")
        );
        assert_eq!(
            config.installation_id_path(),
            PathBuf::from("/var/lib/vigil/installation_id.txt")
        );
        assert_eq!(config.monitored_files, vec!["a.py", "b.py"]);
        assert!(config.offline);
        assert_eq!(config.timeout_seconds, 6);
    }

    #[test]
    fn test_bad_timeout_is_ignored() {
        let vars = env(&[("VIGIL_TIMEOUT_SECS", "soon")]);
        let mut config = VigilConfig::default();
        config.apply_env_with(|k| vars.get(k).cloned());
        assert_eq!(config.timeout_seconds, 10);
    }

    #[test]
    fn test_insecure_defaults_reported() {
        let config = VigilConfig::default();
        assert_eq!(
            config.insecure_defaults(),
            vec![
                "VIGIL_SIGNING_SECRET",
                "VIGIL_LICENSE_SALT",
                "VIGIL_LICENSE_KEY",
                "VIGIL_AUTHORITY_URL"
            ]
        );

        let hardened = VigilConfig {
            signing_secret: "s".into(),
            license_salt: "t".into(),
            license_key: "VGL-1".into(),
            authority_url: "https://authority.example".into(),
            ..Default::default()
        };
        assert!(hardened.insecure_defaults().is_empty());
    }
}
