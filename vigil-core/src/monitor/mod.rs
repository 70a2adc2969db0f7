//! Security monitor - file baselining, login tracking and brute-force detection
//!
//! Check cycles and baselining are single-flight per monitor. Login recording
//! is serialized separately so the insert and the window count observe the
//! same state. A username stays in the brute-force set from the alert until
//! a failure is counted below the threshold again, so a sustained attack
//! raises one alert.

pub mod db;
pub mod repo;

pub use db::{DatabaseKind, MonitorError, SecurityStore};
pub use repo::{
    DatabaseActivity, FileIntegrityRecord, FileStatus, LoginAttempt, SystemChange,
};

use crate::audit::{Alert, AlertLog};
use crate::trust::hasher::digest_async;
use chrono::{DateTime, Duration, Utc};
use repo::{DatabaseActivityRepo, FileIntegrityRepo, LoginAttemptRepo, SystemChangeRepo};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub const BRUTE_FORCE_THRESHOLD: i64 = 5;
pub const BRUTE_FORCE_WINDOW_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Missing,
    NewFile,
    Modified,
}

/// One finding from a check cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub file: String,
    pub kind: ViolationKind,
    pub message: String,
    pub old_hash: Option<String>,
    pub new_hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityOverview {
    pub files_verified: i64,
    pub files_modified: i64,
    pub logins_successful_24h: i64,
    pub logins_failed_24h: i64,
    pub db_operations_24h: i64,
    pub unacknowledged_alerts: usize,
}

/// A file as currently found on disk
struct Observation {
    digest: String,
    size: i64,
    modified_date: Option<String>,
}

pub struct SecurityMonitor {
    store: SecurityStore,
    root: PathBuf,
    files: Vec<String>,
    alerts: Arc<AlertLog>,
    cycle: Mutex<()>,
    /// Usernames whose failures are at or above the threshold and already alerted
    logins: Mutex<HashSet<String>>,
}

impl SecurityMonitor {
    pub fn new(
        store: SecurityStore,
        root: impl Into<PathBuf>,
        files: Vec<String>,
        alerts: Arc<AlertLog>,
    ) -> Self {
        Self {
            store,
            root: root.into(),
            files,
            alerts,
            cycle: Mutex::new(()),
            logins: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &SecurityStore {
        &self.store
    }

    pub fn monitored_files(&self) -> &[String] {
        &self.files
    }

    async fn observe(&self, relative: &str) -> Option<Observation> {
        let path = self.root.join(relative);
        let digest = match digest_async(&path).await {
            Ok(digest) => digest.into_string(),
            Err(e) => {
                debug!("Cannot hash {}: {}", relative, e);
                return None;
            }
        };
        let metadata = tokio::fs::metadata(&path).await.ok();
        Some(Observation {
            digest,
            size: metadata
                .as_ref()
                .map(|m| i64::try_from(m.len()).unwrap_or(i64::MAX))
                .unwrap_or(0),
            modified_date: metadata.as_ref().and_then(modified_date),
        })
    }

    /// Record the current state of every monitored file as verified
    #[instrument(skip(self), fields(files = self.files.len()))]
    pub async fn baseline(&self) -> Result<usize, MonitorError> {
        let _cycle = self.cycle.lock().await;
        let now = Utc::now();
        let mut baselined = 0;

        for file in &self.files {
            let Some(observed) = self.observe(file).await else {
                warn!("Not baselining {}: file not found", file);
                continue;
            };
            FileIntegrityRepo::upsert(
                &self.store,
                &FileIntegrityRecord {
                    path: file.clone(),
                    last_known_digest: observed.digest,
                    size: observed.size,
                    status: FileStatus::Verified,
                    last_checked: Some(now),
                    modified_date: observed.modified_date,
                },
            )
            .await?;
            baselined += 1;
        }

        info!("Baselined {} of {} monitored files", baselined, self.files.len());
        Ok(baselined)
    }

    /// Compare every monitored file against its baseline
    #[instrument(skip(self), fields(files = self.files.len()))]
    pub async fn check_cycle(&self) -> Result<Vec<Violation>, MonitorError> {
        let _cycle = self.cycle.lock().await;
        let now = Utc::now();
        let mut violations = Vec::new();

        for file in &self.files {
            let baseline = FileIntegrityRepo::find(&self.store, file).await?;

            let Some(observed) = self.observe(file).await else {
                if baseline.is_some() {
                    FileIntegrityRepo::mark(&self.store, file, FileStatus::Missing, now).await?;
                }
                warn!(target: "security", "Monitored file missing: {}", file);
                violations.push(Violation {
                    file: file.clone(),
                    kind: ViolationKind::Missing,
                    message: "File not found".to_string(),
                    old_hash: baseline.map(|b| b.last_known_digest),
                    new_hash: None,
                });
                continue;
            };

            let Some(baseline) = baseline else {
                FileIntegrityRepo::insert(
                    &self.store,
                    &FileIntegrityRecord {
                        path: file.clone(),
                        last_known_digest: observed.digest.clone(),
                        size: observed.size,
                        status: FileStatus::NewFile,
                        last_checked: Some(now),
                        modified_date: observed.modified_date,
                    },
                )
                .await?;
                violations.push(Violation {
                    file: file.clone(),
                    kind: ViolationKind::NewFile,
                    message: "New file detected (not in baseline)".to_string(),
                    old_hash: None,
                    new_hash: Some(observed.digest),
                });
                continue;
            };

            if observed.digest == baseline.last_known_digest {
                FileIntegrityRepo::mark(&self.store, file, FileStatus::Verified, now).await?;
                continue;
            }

            violations.push(self.record_tampering(file, baseline, observed, now).await?);
        }

        if violations.is_empty() {
            debug!("Check cycle clean");
        } else {
            warn!(target: "security", "Check cycle found {} violation(s)", violations.len());
        }
        Ok(violations)
    }

    async fn record_tampering(
        &self,
        file: &str,
        baseline: FileIntegrityRecord,
        observed: Observation,
        now: DateTime<Utc>,
    ) -> Result<Violation, MonitorError> {
        let modified_date = observed
            .modified_date
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        FileIntegrityRepo::update(
            &self.store,
            &FileIntegrityRecord {
                path: file.to_string(),
                last_known_digest: observed.digest.clone(),
                size: observed.size,
                status: FileStatus::Modified,
                last_checked: Some(now),
                modified_date: observed.modified_date,
            },
        )
        .await?;

        SystemChangeRepo::insert(
            &self.store,
            &SystemChange {
                timestamp: now,
                change_type: "file_modification".to_string(),
                file_path: Some(file.to_string()),
                change_description: format!("File {file} has been modified"),
                old_hash: Some(baseline.last_known_digest.clone()),
                new_hash: Some(observed.digest.clone()),
                severity: "high".to_string(),
            },
        )
        .await?;

        self.alerts
            .file_tampering(
                file,
                &baseline.last_known_digest,
                &observed.digest,
                &modified_date,
            )
            .await;

        Ok(Violation {
            file: file.to_string(),
            kind: ViolationKind::Modified,
            message: format!("File hash mismatch (modified on {modified_date})"),
            old_hash: Some(baseline.last_known_digest),
            new_hash: Some(observed.digest),
        })
    }

    /// Append a login attempt and run brute-force detection.
    ///
    /// Returns the alert when this attempt brings the username's failures in
    /// the trailing window up to the threshold. No further alert is raised for
    /// that username until its window count drops below the threshold.
    pub async fn record_login_attempt(
        &self,
        attempt: &LoginAttempt,
    ) -> Result<Option<Alert>, MonitorError> {
        let mut alerted = self.logins.lock().await;

        LoginAttemptRepo::insert(&self.store, attempt).await?;
        if attempt.success {
            return Ok(None);
        }

        let since = attempt.timestamp - Duration::minutes(BRUTE_FORCE_WINDOW_MINUTES);
        let failed = LoginAttemptRepo::count_failures(
            &self.store,
            &attempt.username,
            since,
            attempt.timestamp,
        )
        .await?;
        debug!(
            "{} failed login(s) for {} in the last {} minutes",
            failed, attempt.username, BRUTE_FORCE_WINDOW_MINUTES
        );

        if failed < BRUTE_FORCE_THRESHOLD {
            alerted.remove(&attempt.username);
            return Ok(None);
        }
        if alerted.insert(attempt.username.clone()) {
            return Ok(Some(
                self.alerts
                    .brute_force_attempt(&attempt.username, failed)
                    .await,
            ));
        }
        Ok(None)
    }

    pub async fn log_database_activity(
        &self,
        activity: &DatabaseActivity,
    ) -> Result<(), MonitorError> {
        DatabaseActivityRepo::insert(&self.store, activity).await
    }

    pub async fn overview(&self) -> Result<SecurityOverview, MonitorError> {
        self.overview_at(Utc::now()).await
    }

    pub async fn overview_at(&self, now: DateTime<Utc>) -> Result<SecurityOverview, MonitorError> {
        let day_ago = now - Duration::hours(24);
        Ok(SecurityOverview {
            files_verified: FileIntegrityRepo::count_by_status(&self.store, FileStatus::Verified)
                .await?,
            files_modified: FileIntegrityRepo::count_by_status(&self.store, FileStatus::Modified)
                .await?,
            logins_successful_24h: LoginAttemptRepo::count_since(&self.store, true, day_ago)
                .await?,
            logins_failed_24h: LoginAttemptRepo::count_since(&self.store, false, day_ago).await?,
            db_operations_24h: DatabaseActivityRepo::count_since(&self.store, day_ago).await?,
            unacknowledged_alerts: self.alerts.unacknowledged_count(),
        })
    }

    pub async fn recent_login_attempts(&self, limit: i64) -> Result<Vec<LoginAttempt>, MonitorError> {
        LoginAttemptRepo::recent(&self.store, limit).await
    }

    pub async fn system_changes(&self, limit: i64) -> Result<Vec<SystemChange>, MonitorError> {
        SystemChangeRepo::recent(&self.store, limit).await
    }

    pub async fn database_activity(
        &self,
        limit: i64,
    ) -> Result<Vec<DatabaseActivity>, MonitorError> {
        DatabaseActivityRepo::recent(&self.store, limit).await
    }

    pub async fn file_records(&self) -> Result<Vec<FileIntegrityRecord>, MonitorError> {
        FileIntegrityRepo::list(&self.store).await
    }

    /// Run check cycles on a timer until the returned handle is aborted
    pub fn spawn_periodic(self: Arc<Self>, interval: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match self.check_cycle().await {
                    Ok(violations) if !violations.is_empty() => {
                        warn!(target: "security", "Periodic check: {} violation(s)", violations.len());
                    }
                    Ok(_) => {}
                    Err(e) => error!("Periodic integrity check failed: {}", e),
                }
            }
        })
    }
}

fn modified_date(metadata: &std::fs::Metadata) -> Option<String> {
    metadata
        .modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
}
