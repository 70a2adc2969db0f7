//! SQL store for the security monitor
//!
//! Statements are written once with `?` markers and rendered per dialect by
//! [`DatabaseKind::sql`]. Timestamps are TEXT in fixed-width RFC 3339 UTC,
//! computed in Rust, so window comparisons are plain string comparisons on
//! both SQLite and PostgreSQL.

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Unsupported database URL '{url}' (expected sqlite:// or postgres://)")]
    UnsupportedDatabase { url: String },

    #[error("Security store query failed")]
    Database(#[from] sqlx::Error),

    #[error("Stored value could not be interpreted: {0}")]
    Corrupt(String),
}

/// SQL dialect spoken by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseKind {
    Sqlite,
    Postgres,
}

impl DatabaseKind {
    pub fn from_url(url: &str) -> Result<Self, MonitorError> {
        let scheme = url.split(':').next().unwrap_or_default().to_ascii_lowercase();
        match scheme.as_str() {
            "sqlite" => Ok(DatabaseKind::Sqlite),
            "postgres" | "postgresql" => Ok(DatabaseKind::Postgres),
            _ => Err(MonitorError::UnsupportedDatabase {
                url: url.to_string(),
            }),
        }
    }

    /// Primary key column definition
    pub fn auto_increment(&self) -> &'static str {
        match self {
            DatabaseKind::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            DatabaseKind::Postgres => "BIGSERIAL PRIMARY KEY",
        }
    }

    /// Render a `?`-marked statement in this dialect's placeholder style
    pub fn sql(&self, template: &str) -> String {
        match self {
            DatabaseKind::Sqlite => template.to_string(),
            DatabaseKind::Postgres => {
                let mut out = String::with_capacity(template.len() + 8);
                let mut n = 0;
                for ch in template.chars() {
                    if ch == '?' {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
        }
    }

    /// Table definitions, in creation order
    pub fn schema(&self) -> Vec<String> {
        let pk = self.auto_increment();
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS file_integrity (
                    id {pk},
                    file_path TEXT NOT NULL UNIQUE,
                    file_hash TEXT NOT NULL,
                    file_size BIGINT,
                    last_checked TEXT,
                    status TEXT NOT NULL DEFAULT 'verified',
                    modified_date TEXT
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS login_attempts (
                    id {pk},
                    timestamp TEXT NOT NULL,
                    username TEXT NOT NULL,
                    ip_address TEXT,
                    user_agent TEXT,
                    success BIGINT NOT NULL DEFAULT 0,
                    failure_reason TEXT,
                    session_id TEXT
                )"
            ),
            "CREATE INDEX IF NOT EXISTS idx_login_attempts_user_time \
             ON login_attempts (username, timestamp)"
                .to_string(),
            format!(
                "CREATE TABLE IF NOT EXISTS system_changes (
                    id {pk},
                    timestamp TEXT NOT NULL,
                    change_type TEXT NOT NULL,
                    file_path TEXT,
                    changed_by TEXT,
                    change_description TEXT,
                    old_hash TEXT,
                    new_hash TEXT,
                    severity TEXT NOT NULL DEFAULT 'info'
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS database_activity (
                    id {pk},
                    timestamp TEXT NOT NULL,
                    username TEXT NOT NULL,
                    operation TEXT NOT NULL,
                    table_name TEXT NOT NULL,
                    record_id BIGINT,
                    changes TEXT,
                    ip_address TEXT
                )"
            ),
        ]
    }
}

/// Connection pool plus the dialect it speaks
#[derive(Debug, Clone)]
pub struct SecurityStore {
    pool: AnyPool,
    kind: DatabaseKind,
}

impl SecurityStore {
    /// Connect and make sure every table exists
    pub async fn connect(url: &str) -> Result<Self, MonitorError> {
        let kind = DatabaseKind::from_url(url)?;
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(match kind {
                DatabaseKind::Sqlite => 1,
                DatabaseKind::Postgres => 5,
            })
            .connect(url)
            .await?;

        let store = Self { pool, kind };
        store.init().await?;
        info!("Security store ready ({:?})", kind);
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), MonitorError> {
        for statement in self.kind.schema() {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        debug!("Security tables initialized");
        Ok(())
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn kind(&self) -> DatabaseKind {
        self.kind
    }

    pub fn sql(&self, template: &str) -> String {
        self.kind.sql(template)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
