//! Installation identity - an opaque id persisted on first run

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Read the installation id at `path`, creating and persisting a fresh UUID v4 if absent
pub fn load_or_create(path: &Path) -> Result<String> {
    if path.exists() {
        let existing = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read installation id from {}", path.display()))?;
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    std::fs::write(path, &id)
        .with_context(|| format!("Failed to persist installation id to {}", path.display()))?;

    info!("Generated new installation id {}", id);
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_id_is_stable_across_calls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("installation_id.txt");

        let first = load_or_create(&path).unwrap();
        let second = load_or_create(&path).unwrap();

        assert_eq!(first, second);
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_blank_file_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("installation_id.txt");
        std::fs::write(&path, "  \n").unwrap();

        let id = load_or_create(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), id);
    }
}
