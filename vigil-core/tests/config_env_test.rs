//! Configuration layering against the real process environment

use pretty_assertions::assert_eq;
use serial_test::serial;
use std::path::PathBuf;
use tempfile::TempDir;
use vigil_core::config::{VigilConfig, DEFAULT_MONITORED_FILES};

const VARS: &[&str] = &[
    "VIGIL_AUTHORITY_URL",
    "VIGIL_LICENSE_KEY",
    "VIGIL_DATA_DIR",
    "VIGIL_TIMEOUT_SECS",
    "VIGIL_MONITORED_FILES",
    "VIGIL_OFFLINE",
    "DATABASE_URL",
];

fn clear_env() {
    for var in VARS {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("vigil.json");
    std::fs::write(
        &file,
        r#"{"authority_url": "https://file.example", "timeout_seconds": 7}"#,
    )
    .unwrap();

    std::env::set_var("VIGIL_AUTHORITY_URL", "https://env.example");
    std::env::set_var("VIGIL_DATA_DIR", "/var/lib/vigil");
    std::env::set_var("VIGIL_MONITORED_FILES", "app.py, wsgi.py,,");

    let config = VigilConfig::load(Some(&file)).unwrap();
    clear_env();

    assert_eq!(config.authority_url, "https://env.example");
    assert_eq!(config.timeout_seconds, 7);
    assert_eq!(config.data_dir, PathBuf::from("/var/lib/vigil"));
    assert_eq!(config.monitored_files, vec!["app.py", "wsgi.py"]);
    assert_eq!(
        config.database_url(),
        "sqlite:///var/lib/vigil/vigil.db?mode=rwc"
    );
}

#[test]
#[serial]
fn test_defaults_without_environment() {
    clear_env();
    let config = VigilConfig::load(None).unwrap();

    assert_eq!(config.monitored_files.len(), DEFAULT_MONITORED_FILES.len());
    assert!(!config.offline);
    assert_eq!(
        config.insecure_defaults(),
        vec![
            "VIGIL_SIGNING_SECRET",
            "VIGIL_LICENSE_SALT",
            "VIGIL_LICENSE_KEY",
            "VIGIL_AUTHORITY_URL",
        ]
    );
}

#[test]
#[serial]
fn test_offline_flag_and_bad_timeout() {
    clear_env();
    std::env::set_var("VIGIL_OFFLINE", "TRUE");
    std::env::set_var("VIGIL_TIMEOUT_SECS", "soon");
    std::env::set_var("DATABASE_URL", "postgres://vigil@db/vigil");

    let config = VigilConfig::load(None).unwrap();
    clear_env();

    assert!(config.offline);
    assert_eq!(config.timeout_seconds, 10);
    assert_eq!(config.database_url(), "postgres://vigil@db/vigil");
    assert!(!config.insecure_defaults().contains(&"VIGIL_AUTHORITY_URL"));
}

#[test]
#[serial]
fn test_missing_config_file_is_an_error() {
    clear_env();
    let err = VigilConfig::load(Some(std::path::Path::new("/nonexistent/vigil.json"))).unwrap_err();
    assert!(err.to_string().contains("Failed to read config file"));
}
