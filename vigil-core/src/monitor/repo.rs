//! Repositories for the security monitor tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::any::AnyRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;

use super::db::{MonitorError, SecurityStore};

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Verified,
    Modified,
    NewFile,
    Missing,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Verified => "verified",
            FileStatus::Modified => "modified",
            FileStatus::NewFile => "new_file",
            FileStatus::Missing => "missing",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "verified" => Ok(FileStatus::Verified),
            "modified" => Ok(FileStatus::Modified),
            "new_file" => Ok(FileStatus::NewFile),
            "missing" => Ok(FileStatus::Missing),
            other => Err(MonitorError::Corrupt(format!("file status '{other}'"))),
        }
    }
}

/// Baseline for one monitored path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileIntegrityRecord {
    pub path: String,
    pub last_known_digest: String,
    pub size: i64,
    pub status: FileStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub modified_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub timestamp: DateTime<Utc>,
    pub username: String,
    pub ip_address: Option<String>,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

impl LoginAttempt {
    pub fn success(username: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            username: username.into(),
            ip_address: None,
            success: true,
            failure_reason: None,
            user_agent: None,
            session_id: None,
        }
    }

    pub fn failure(username: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            failure_reason: Some(reason.into()),
            ..Self::success(username)
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn from_ip(mut self, ip_address: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemChange {
    pub timestamp: DateTime<Utc>,
    pub change_type: String,
    pub file_path: Option<String>,
    pub change_description: String,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
    pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseActivity {
    pub timestamp: DateTime<Utc>,
    pub username: String,
    pub operation: String,
    pub table_name: String,
    pub record_id: Option<i64>,
    pub changes: String,
    pub ip_address: Option<String>,
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, MonitorError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| MonitorError::Corrupt(format!("timestamp '{raw}'")))
}

fn ts(row: &AnyRow, column: &str) -> Result<DateTime<Utc>, MonitorError> {
    parse_ts(&row.try_get::<String, _>(column)?)
}

fn opt_ts(row: &AnyRow, column: &str) -> Result<Option<DateTime<Utc>>, MonitorError> {
    row.try_get::<Option<String>, _>(column)?
        .as_deref()
        .map(parse_ts)
        .transpose()
}

// ---------------------------------------------------------------------------
// FileIntegrityRepo
// ---------------------------------------------------------------------------

const FILE_COLUMNS: &str = "file_path, file_hash, file_size, status, last_checked, modified_date";

pub struct FileIntegrityRepo;

impl FileIntegrityRepo {
    fn from_row(row: &AnyRow) -> Result<FileIntegrityRecord, MonitorError> {
        Ok(FileIntegrityRecord {
            path: row.try_get("file_path")?,
            last_known_digest: row.try_get("file_hash")?,
            size: row.try_get::<Option<i64>, _>("file_size")?.unwrap_or(0),
            status: row.try_get::<String, _>("status")?.parse()?,
            last_checked: opt_ts(row, "last_checked")?,
            modified_date: row.try_get("modified_date")?,
        })
    }

    pub async fn find(
        store: &SecurityStore,
        path: &str,
    ) -> Result<Option<FileIntegrityRecord>, MonitorError> {
        let query = store.sql(&format!(
            "SELECT {FILE_COLUMNS} FROM file_integrity WHERE file_path = ?"
        ));
        sqlx::query(&query)
            .bind(path)
            .fetch_optional(store.pool())
            .await?
            .as_ref()
            .map(Self::from_row)
            .transpose()
    }

    pub async fn insert(
        store: &SecurityStore,
        record: &FileIntegrityRecord,
    ) -> Result<(), MonitorError> {
        let query = store.sql(&format!(
            "INSERT INTO file_integrity ({FILE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?)"
        ));
        sqlx::query(&query)
            .bind(&record.path)
            .bind(&record.last_known_digest)
            .bind(record.size)
            .bind(record.status.as_str())
            .bind(record.last_checked.map(crate::rfc3339))
            .bind(&record.modified_date)
            .execute(store.pool())
            .await?;
        Ok(())
    }

    /// Overwrite every column of an existing record
    pub async fn update(
        store: &SecurityStore,
        record: &FileIntegrityRecord,
    ) -> Result<(), MonitorError> {
        let query = store.sql(
            "UPDATE file_integrity \
             SET file_hash = ?, file_size = ?, status = ?, last_checked = ?, modified_date = ? \
             WHERE file_path = ?",
        );
        sqlx::query(&query)
            .bind(&record.last_known_digest)
            .bind(record.size)
            .bind(record.status.as_str())
            .bind(record.last_checked.map(crate::rfc3339))
            .bind(&record.modified_date)
            .bind(&record.path)
            .execute(store.pool())
            .await?;
        Ok(())
    }

    /// Insert or replace the baseline for a path
    pub async fn upsert(
        store: &SecurityStore,
        record: &FileIntegrityRecord,
    ) -> Result<(), MonitorError> {
        if Self::find(store, &record.path).await?.is_some() {
            Self::update(store, record).await
        } else {
            Self::insert(store, record).await
        }
    }

    pub async fn mark(
        store: &SecurityStore,
        path: &str,
        status: FileStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<(), MonitorError> {
        let query =
            store.sql("UPDATE file_integrity SET status = ?, last_checked = ? WHERE file_path = ?");
        sqlx::query(&query)
            .bind(status.as_str())
            .bind(crate::rfc3339(checked_at))
            .bind(path)
            .execute(store.pool())
            .await?;
        Ok(())
    }

    pub async fn list(store: &SecurityStore) -> Result<Vec<FileIntegrityRecord>, MonitorError> {
        let query = format!("SELECT {FILE_COLUMNS} FROM file_integrity ORDER BY file_path");
        sqlx::query(&query)
            .fetch_all(store.pool())
            .await?
            .iter()
            .map(Self::from_row)
            .collect()
    }

    pub async fn count_by_status(
        store: &SecurityStore,
        status: FileStatus,
    ) -> Result<i64, MonitorError> {
        let query = store.sql("SELECT COUNT(*) FROM file_integrity WHERE status = ?");
        Ok(sqlx::query_scalar::<_, i64>(&query)
            .bind(status.as_str())
            .fetch_one(store.pool())
            .await?)
    }
}

// ---------------------------------------------------------------------------
// LoginAttemptRepo
// ---------------------------------------------------------------------------

const LOGIN_COLUMNS: &str =
    "timestamp, username, ip_address, user_agent, success, failure_reason, session_id";

pub struct LoginAttemptRepo;

impl LoginAttemptRepo {
    fn from_row(row: &AnyRow) -> Result<LoginAttempt, MonitorError> {
        Ok(LoginAttempt {
            timestamp: ts(row, "timestamp")?,
            username: row.try_get("username")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            success: row.try_get::<i64, _>("success")? != 0,
            failure_reason: row.try_get("failure_reason")?,
            session_id: row.try_get("session_id")?,
        })
    }

    pub async fn insert(store: &SecurityStore, attempt: &LoginAttempt) -> Result<(), MonitorError> {
        let query = store.sql(&format!(
            "INSERT INTO login_attempts ({LOGIN_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ));
        sqlx::query(&query)
            .bind(crate::rfc3339(attempt.timestamp))
            .bind(&attempt.username)
            .bind(&attempt.ip_address)
            .bind(&attempt.user_agent)
            .bind(i64::from(attempt.success))
            .bind(&attempt.failure_reason)
            .bind(&attempt.session_id)
            .execute(store.pool())
            .await?;
        Ok(())
    }

    /// Failed attempts for `username` with `since < timestamp <= until`
    pub async fn count_failures(
        store: &SecurityStore,
        username: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<i64, MonitorError> {
        let query = store.sql(
            "SELECT COUNT(*) FROM login_attempts \
             WHERE username = ? AND success = 0 AND timestamp > ? AND timestamp <= ?",
        );
        Ok(sqlx::query_scalar::<_, i64>(&query)
            .bind(username)
            .bind(crate::rfc3339(since))
            .bind(crate::rfc3339(until))
            .fetch_one(store.pool())
            .await?)
    }

    pub async fn count_since(
        store: &SecurityStore,
        success: bool,
        since: DateTime<Utc>,
    ) -> Result<i64, MonitorError> {
        let query =
            store.sql("SELECT COUNT(*) FROM login_attempts WHERE success = ? AND timestamp > ?");
        Ok(sqlx::query_scalar::<_, i64>(&query)
            .bind(i64::from(success))
            .bind(crate::rfc3339(since))
            .fetch_one(store.pool())
            .await?)
    }

    pub async fn recent(store: &SecurityStore, limit: i64) -> Result<Vec<LoginAttempt>, MonitorError> {
        let query = store.sql(&format!(
            "SELECT {LOGIN_COLUMNS} FROM login_attempts ORDER BY timestamp DESC, id DESC LIMIT ?"
        ));
        sqlx::query(&query)
            .bind(limit)
            .fetch_all(store.pool())
            .await?
            .iter()
            .map(Self::from_row)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// SystemChangeRepo
// ---------------------------------------------------------------------------

const CHANGE_COLUMNS: &str =
    "timestamp, change_type, file_path, change_description, old_hash, new_hash, severity";

pub struct SystemChangeRepo;

impl SystemChangeRepo {
    fn from_row(row: &AnyRow) -> Result<SystemChange, MonitorError> {
        Ok(SystemChange {
            timestamp: ts(row, "timestamp")?,
            change_type: row.try_get("change_type")?,
            file_path: row.try_get("file_path")?,
            change_description: row
                .try_get::<Option<String>, _>("change_description")?
                .unwrap_or_default(),
            old_hash: row.try_get("old_hash")?,
            new_hash: row.try_get("new_hash")?,
            severity: row.try_get("severity")?,
        })
    }

    pub async fn insert(store: &SecurityStore, change: &SystemChange) -> Result<(), MonitorError> {
        let query = store.sql(&format!(
            "INSERT INTO system_changes ({CHANGE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ));
        sqlx::query(&query)
            .bind(crate::rfc3339(change.timestamp))
            .bind(&change.change_type)
            .bind(&change.file_path)
            .bind(&change.change_description)
            .bind(&change.old_hash)
            .bind(&change.new_hash)
            .bind(&change.severity)
            .execute(store.pool())
            .await?;
        Ok(())
    }

    pub async fn recent(store: &SecurityStore, limit: i64) -> Result<Vec<SystemChange>, MonitorError> {
        let query = store.sql(&format!(
            "SELECT {CHANGE_COLUMNS} FROM system_changes ORDER BY timestamp DESC, id DESC LIMIT ?"
        ));
        sqlx::query(&query)
            .bind(limit)
            .fetch_all(store.pool())
            .await?
            .iter()
            .map(Self::from_row)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// DatabaseActivityRepo
// ---------------------------------------------------------------------------

const ACTIVITY_COLUMNS: &str =
    "timestamp, username, operation, table_name, record_id, changes, ip_address";

pub struct DatabaseActivityRepo;

impl DatabaseActivityRepo {
    fn from_row(row: &AnyRow) -> Result<DatabaseActivity, MonitorError> {
        Ok(DatabaseActivity {
            timestamp: ts(row, "timestamp")?,
            username: row.try_get("username")?,
            operation: row.try_get("operation")?,
            table_name: row.try_get("table_name")?,
            record_id: row.try_get("record_id")?,
            changes: row.try_get::<Option<String>, _>("changes")?.unwrap_or_default(),
            ip_address: row.try_get("ip_address")?,
        })
    }

    pub async fn insert(
        store: &SecurityStore,
        activity: &DatabaseActivity,
    ) -> Result<(), MonitorError> {
        let query = store.sql(&format!(
            "INSERT INTO database_activity ({ACTIVITY_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ));
        sqlx::query(&query)
            .bind(crate::rfc3339(activity.timestamp))
            .bind(&activity.username)
            .bind(&activity.operation)
            .bind(&activity.table_name)
            .bind(activity.record_id)
            .bind(&activity.changes)
            .bind(&activity.ip_address)
            .execute(store.pool())
            .await?;
        Ok(())
    }

    pub async fn count_since(
        store: &SecurityStore,
        since: DateTime<Utc>,
    ) -> Result<i64, MonitorError> {
        let query = store.sql("SELECT COUNT(*) FROM database_activity WHERE timestamp > ?");
        Ok(sqlx::query_scalar::<_, i64>(&query)
            .bind(crate::rfc3339(since))
            .fetch_one(store.pool())
            .await?)
    }

    pub async fn recent(
        store: &SecurityStore,
        limit: i64,
    ) -> Result<Vec<DatabaseActivity>, MonitorError> {
        let query = store.sql(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM database_activity ORDER BY timestamp DESC, id DESC LIMIT ?"
        ));
        sqlx::query(&query)
            .bind(limit)
            .fetch_all(store.pool())
            .await?
            .iter()
            .map(Self::from_row)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> SecurityStore {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("vigil.db").display());
        SecurityStore::connect(&url).await.unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_file_status_strings() {
        for status in [
            FileStatus::Verified,
            FileStatus::Modified,
            FileStatus::NewFile,
            FileStatus::Missing,
        ] {
            assert_eq!(status.as_str().parse::<FileStatus>().unwrap(), status);
        }
        assert!("gone".parse::<FileStatus>().is_err());
    }

    #[tokio::test]
    async fn test_file_record_upsert() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let mut record = FileIntegrityRecord {
            path: "app.py".into(),
            last_known_digest: "aa".into(),
            size: 10,
            status: FileStatus::Verified,
            last_checked: Some(t0()),
            modified_date: Some("2026-02-01 07:00:00".into()),
        };
        FileIntegrityRepo::upsert(&store, &record).await.unwrap();
        record.last_known_digest = "bb".into();
        FileIntegrityRepo::upsert(&store, &record).await.unwrap();

        let all = FileIntegrityRepo::list(&store).await.unwrap();
        assert_eq!(all, vec![record]);

        FileIntegrityRepo::mark(&store, "app.py", FileStatus::Missing, t0())
            .await
            .unwrap();
        assert_eq!(
            FileIntegrityRepo::count_by_status(&store, FileStatus::Missing)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_failure_window_counts() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        for minutes in [0, 10, 45] {
            let attempt = LoginAttempt::failure("ana", "bad password").at(t0() + Duration::minutes(minutes));
            LoginAttemptRepo::insert(&store, &attempt).await.unwrap();
        }
        LoginAttemptRepo::insert(&store, &LoginAttempt::success("ana").at(t0()))
            .await
            .unwrap();

        let until = t0() + Duration::minutes(45);
        let count = LoginAttemptRepo::count_failures(&store, "ana", until - Duration::minutes(30), until)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let all = LoginAttemptRepo::count_failures(&store, "ana", t0() - Duration::minutes(1), until)
            .await
            .unwrap();
        assert_eq!(all, 3);

        let recent = LoginAttemptRepo::recent(&store, 2).await.unwrap();
        assert_eq!(recent[0].timestamp, until);
        assert_eq!(recent[0].failure_reason.as_deref(), Some("bad password"));
    }

    #[tokio::test]
    async fn test_activity_and_changes_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).await;

        let activity = DatabaseActivity {
            timestamp: t0(),
            username: "ana".into(),
            operation: "UPDATE".into(),
            table_name: "inspections".into(),
            record_id: Some(42),
            changes: "score 80 -> 85".into(),
            ip_address: None,
        };
        DatabaseActivityRepo::insert(&store, &activity).await.unwrap();
        assert_eq!(
            DatabaseActivityRepo::recent(&store, 10).await.unwrap(),
            vec![activity]
        );
        assert_eq!(
            DatabaseActivityRepo::count_since(&store, t0() - Duration::hours(1))
                .await
                .unwrap(),
            1
        );

        let change = SystemChange {
            timestamp: t0(),
            change_type: "file_modification".into(),
            file_path: Some("app.py".into()),
            change_description: "File app.py has been modified".into(),
            old_hash: Some("aa".into()),
            new_hash: Some("bb".into()),
            severity: "high".into(),
        };
        SystemChangeRepo::insert(&store, &change).await.unwrap();
        assert_eq!(SystemChangeRepo::recent(&store, 5).await.unwrap(), vec![change]);
    }
}
