//! Append-only log storage
//!
//! A [`LogStore`] holds one stream of JSON records. The only implementation,
//! [`JsonlStore`], keeps one record per line in a UTF-8 file. Each append is
//! a single `write_all` of a full line taken under the store lock, so
//! concurrent writers never interleave partial lines. Lines that do not parse
//! are skipped by readers and carried through rewrites unchanged.

use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Log store I/O failed for {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize log record")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    #[error("Log store task failed")]
    Task {
        #[source]
        source: tokio::task::JoinError,
    },
}

/// One append-only stream of JSON records
pub trait LogStore: Send + Sync {
    /// Durably append one record
    fn append(&self, record: &Value) -> Result<(), StoreError>;

    /// Every readable record in append order; corrupt lines are skipped
    fn scan(&self) -> Result<Vec<Value>, StoreError>;

    /// Edit every readable record in place and atomically replace the stream
    /// under the store lock. Unreadable lines are written back as they were.
    fn rewrite(&self, edit: &mut dyn FnMut(&mut Value)) -> Result<(), StoreError>;
}

/// Append on the blocking pool so async callers never block on file I/O
pub async fn append_async(store: Arc<dyn LogStore>, record: Value) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || store.append(&record))
        .await
        .map_err(|e| StoreError::Task { source: e })?
}

/// One stored line
enum Line {
    Record(Value),
    Corrupt(String),
}

/// Newline-delimited JSON file
pub struct JsonlStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // A panic mid-append cannot leave a partial line behind, so a poisoned lock is still usable
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_lines(&self) -> Result<Vec<Line>, StoreError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        let mut lines = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| self.io_error(e))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line) {
                Ok(record) => lines.push(Line::Record(record)),
                Err(_) => lines.push(Line::Corrupt(line)),
            }
        }
        Ok(lines)
    }

    fn read_all(&self) -> Result<Vec<Value>, StoreError> {
        let mut records = Vec::new();
        let mut corrupt = 0usize;
        for line in self.read_lines()? {
            match line {
                Line::Record(record) => records.push(record),
                Line::Corrupt(_) => corrupt += 1,
            }
        }

        if corrupt > 0 {
            warn!(
                "Skipped {} corrupt line(s) in {}",
                corrupt,
                self.path.display()
            );
        }
        Ok(records)
    }

    fn ensure_parent(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }
        Ok(())
    }
}

fn encode_line(record: &Value) -> Result<String, StoreError> {
    let mut line =
        serde_json::to_string(record).map_err(|e| StoreError::Serialize { source: e })?;
    line.push('\n');
    Ok(line)
}

impl LogStore for JsonlStore {
    fn append(&self, record: &Value) -> Result<(), StoreError> {
        let line = encode_line(record)?;
        let _guard = self.guard();

        self.ensure_parent()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| self.io_error(e))
    }

    fn scan(&self) -> Result<Vec<Value>, StoreError> {
        let _guard = self.guard();
        self.read_all()
    }

    fn rewrite(&self, edit: &mut dyn FnMut(&mut Value)) -> Result<(), StoreError> {
        let _guard = self.guard();

        let mut content = String::new();
        for line in self.read_lines()? {
            match line {
                Line::Record(mut record) => {
                    edit(&mut record);
                    content.push_str(&encode_line(&record)?);
                }
                Line::Corrupt(raw) => {
                    content.push_str(&raw);
                    content.push('\n');
                }
            }
        }

        self.ensure_parent()?;
        let tmp = self.path.with_extension("jsonl.tmp");
        std::fs::write(&tmp, content).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}
