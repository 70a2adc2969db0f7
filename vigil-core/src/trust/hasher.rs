//! Content digests for the integrity system
//!
//! Uses SHA-256 for file content hashing. The manifest "signature" is a
//! salted SHA-256 over the canonical file map: anyone holding the secret can
//! produce a valid manifest, which is the intended trust level.

use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::error::FileError;

/// Read size used when streaming files through the hasher
const CHUNK_SIZE: usize = 8192;

/// Lowercase hex SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// First characters of the digest, for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(16)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for Digest {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<String> for Digest {
    fn eq(&self, other: &String) -> bool {
        &self.0 == other
    }
}

/// Hash a file's contents, streaming it in fixed-size chunks
pub fn digest(path: &Path) -> Result<Digest, FileError> {
    let mut file = std::fs::File::open(path).map_err(|e| FileError::from_io(path, e))?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| FileError::from_io(path, e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(Digest(hex::encode(hasher.finalize())))
}

/// Hash a file on the blocking pool (for async contexts)
pub async fn digest_async(path: &Path) -> Result<Digest, FileError> {
    let owned: PathBuf = path.to_path_buf();
    match tokio::task::spawn_blocking(move || digest(&owned)).await {
        Ok(result) => result,
        Err(join_error) => Err(FileError::Unreadable {
            path: path.to_path_buf(),
            source: std::io::Error::other(join_error.to_string()),
        }),
    }
}

/// Hash an in-memory buffer
pub fn digest_bytes(content: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(content);
    Digest(hex::encode(hasher.finalize()))
}

/// Canonical serialization of a file map.
///
/// Keys are sorted (BTreeMap order) and members are separated the way the
/// release tooling writes them: `{"a": "x", "b": "y"}`.
pub fn canonical_files(files: &BTreeMap<String, String>) -> String {
    let mut out = String::from("{");
    for (i, (path, file_digest)) in files.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&json_string(path));
        out.push_str(": ");
        out.push_str(&json_string(file_digest));
    }
    out.push('}');
    out
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Compute the manifest signature: `sha256_hex(canonical(files) ++ secret)`
pub fn sign_files(files: &BTreeMap<String, String>, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_files(files).as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
