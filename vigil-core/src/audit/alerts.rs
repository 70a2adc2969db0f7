//! Security alerts - a second append-only stream with an acknowledgement lifecycle
//!
//! Alerts are persisted locally, logged on the `security` tracing target and
//! forwarded to `/api/alerts`. A forwarding failure becomes a local
//! `alert_send_failed` alert, which is itself never forwarded.

use crate::authority::{Authority, Endpoint};
use crate::store::{append_async, LogStore, StoreError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const ALERT_SEND_FAILED: &str = "alert_send_failed";

/// Alert severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!(
                "unknown severity '{other}' (expected info, warning or critical)"
            )),
        }
    }
}

/// A security alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub installation_id: String,
    pub alert_type: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Value,
    #[serde(default)]
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acknowledged_at: Option<String>,
}

fn default_severity() -> Severity {
    Severity::Info
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} - {}",
            self.severity.to_string().to_uppercase(),
            self.alert_type,
            self.message
        )
    }
}

/// Result of [`AlertLog::acknowledge`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acknowledged,
    AlreadyAcknowledged,
    NotFound,
}

/// Filter for [`AlertLog::read`]
#[derive(Debug, Clone)]
pub struct AlertQuery {
    pub limit: usize,
    pub severity: Option<Severity>,
    pub acknowledged: Option<bool>,
}

impl Default for AlertQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            severity: None,
            acknowledged: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertStats {
    pub total: usize,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
    pub unacknowledged: usize,
    pub by_type: BTreeMap<String, usize>,
    pub latest: Option<String>,
}

/// The alert stream plus its forwarding client
pub struct AlertLog {
    store: Arc<dyn LogStore>,
    authority: Arc<dyn Authority>,
    installation_id: String,
}

impl AlertLog {
    pub fn new(
        store: Arc<dyn LogStore>,
        authority: Arc<dyn Authority>,
        installation_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            authority,
            installation_id: installation_id.into(),
        }
    }

    fn build(&self, alert_type: &str, severity: Severity, message: String, details: Value) -> Alert {
        Alert {
            id: Uuid::new_v4().to_string(),
            timestamp: crate::rfc3339(Utc::now()),
            installation_id: self.installation_id.clone(),
            alert_type: alert_type.to_string(),
            severity,
            message,
            details,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    /// Persist, log and forward a new alert
    pub async fn raise(
        &self,
        alert_type: &str,
        severity: Severity,
        message: impl Into<String>,
        details: Value,
    ) -> Alert {
        let alert = self.build(alert_type, severity, message.into(), details);
        self.persist(&alert).await;

        if alert.alert_type != ALERT_SEND_FAILED {
            self.forward(&alert).await;
        }
        alert
    }

    async fn persist(&self, alert: &Alert) {
        let result = match serde_json::to_value(alert) {
            Ok(value) => append_async(Arc::clone(&self.store), value).await,
            Err(e) => Err(StoreError::Serialize { source: e }),
        };
        if let Err(e) = result {
            error!(target: "security", "Failed to write local alert: {}", e);
        }

        match alert.severity {
            Severity::Critical => error!(target: "security", alert_id = %alert.id, details = %alert.details, "SECURITY ALERT {}", alert),
            Severity::Warning => warn!(target: "security", alert_id = %alert.id, details = %alert.details, "SECURITY ALERT {}", alert),
            Severity::Info => info!(target: "security", alert_id = %alert.id, details = %alert.details, "SECURITY ALERT {}", alert),
        }
    }

    async fn forward(&self, alert: &Alert) {
        let payload = match serde_json::to_value(alert) {
            Ok(value) => value,
            Err(e) => {
                warn!("Cannot serialize alert for forwarding: {}", e);
                return;
            }
        };

        if let Err(e) = self.authority.send(Endpoint::Alerts, &payload).await {
            let failure = self.build(
                ALERT_SEND_FAILED,
                Severity::Warning,
                format!("Failed to send alert to server: {e}"),
                json!({"alert_id": alert.id, "alert_type": alert.alert_type}),
            );
            self.persist(&failure).await;
        }
    }

    fn alerts(&self) -> Result<Vec<Alert>, StoreError> {
        Ok(self
            .store
            .scan()?
            .into_iter()
            .filter_map(|record| serde_json::from_value(record).ok())
            .collect())
    }

    /// The most recent `limit` matching alerts, newest first
    pub fn read(&self, query: &AlertQuery) -> Result<Vec<Alert>, StoreError> {
        let mut matching: Vec<Alert> = self
            .alerts()?
            .into_iter()
            .filter(|a| query.severity.map_or(true, |s| a.severity == s))
            .filter(|a| query.acknowledged.map_or(true, |ack| a.acknowledged == ack))
            .collect();

        let skip = matching.len().saturating_sub(query.limit);
        matching.drain(..skip);
        matching.reverse();
        Ok(matching)
    }

    /// Mark an alert acknowledged. The transition happens at most once.
    pub fn acknowledge(&self, id: &str, by: &str) -> Result<AckOutcome, StoreError> {
        let mut outcome = AckOutcome::NotFound;
        let acknowledged_at = crate::rfc3339(Utc::now());

        self.store.rewrite(&mut |record| {
            if outcome != AckOutcome::NotFound
                || record.get("id").and_then(Value::as_str) != Some(id)
            {
                return;
            }

            if record.get("acknowledged").and_then(Value::as_bool) == Some(true) {
                outcome = AckOutcome::AlreadyAcknowledged;
                return;
            }

            if let Some(fields) = record.as_object_mut() {
                fields.insert("acknowledged".into(), json!(true));
                fields.insert("acknowledged_by".into(), json!(by));
                fields.insert("acknowledged_at".into(), json!(acknowledged_at));
                outcome = AckOutcome::Acknowledged;
            }
        })?;

        if outcome == AckOutcome::Acknowledged {
            info!(target: "security", "Alert {} acknowledged by {}", id, by);
        }
        Ok(outcome)
    }

    pub fn stats(&self) -> Result<AlertStats, StoreError> {
        let mut stats = AlertStats::default();

        for alert in self.alerts()? {
            stats.total += 1;
            match alert.severity {
                Severity::Critical => stats.critical += 1,
                Severity::Warning => stats.warning += 1,
                Severity::Info => stats.info += 1,
            }
            if !alert.acknowledged {
                stats.unacknowledged += 1;
            }
            *stats.by_type.entry(alert.alert_type).or_default() += 1;
            stats.latest = Some(alert.timestamp);
        }

        Ok(stats)
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.stats().map(|s| s.unacknowledged).unwrap_or(0)
    }

    // Predefined alerts

    pub async fn code_tampered(&self, modified_files: &[String]) -> Alert {
        self.raise(
            "code_tampered",
            Severity::Critical,
            format!(
                "Code integrity check failed - {} file(s) modified",
                modified_files.len()
            ),
            json!({
                "modified_files": modified_files,
                "action_required": "Investigate unauthorized modifications immediately",
            }),
        )
        .await
    }

    pub async fn unauthorized_login(&self, username: &str, ip_address: Option<&str>) -> Alert {
        self.raise(
            "unauthorized_login",
            Severity::Warning,
            format!("Failed login attempt for user: {username}"),
            json!({
                "username": username,
                "ip_address": ip_address,
                "action_required": "Monitor for repeated attempts",
            }),
        )
        .await
    }

    pub async fn support_access_enabled(&self, admin_user: &str, duration_hours: u32) -> Alert {
        self.raise(
            "support_access_enabled",
            Severity::Info,
            format!("Support access enabled by {admin_user} for {duration_hours} hours"),
            json!({"admin_user": admin_user, "duration_hours": duration_hours}),
        )
        .await
    }

    pub async fn license_invalid(&self, reason: &str) -> Alert {
        self.raise(
            "license_invalid",
            Severity::Critical,
            "License validation failed - System may be running without authorization",
            json!({
                "reason": reason,
                "action_required": "Verify license key with your vendor",
            }),
        )
        .await
    }

    pub async fn data_export(&self, user: &str, record_count: u64) -> Alert {
        self.raise(
            "data_export",
            Severity::Warning,
            format!("User {user} exported {record_count} records"),
            json!({"user": user, "record_count": record_count}),
        )
        .await
    }

    pub async fn file_tampering(
        &self,
        file_path: &str,
        old_hash: &str,
        new_hash: &str,
        modified_date: &str,
    ) -> Alert {
        self.raise(
            "file_tampering",
            Severity::Critical,
            format!("Critical file {file_path} has been modified. Last modified: {modified_date}"),
            json!({
                "file_path": file_path,
                "old_hash": old_hash,
                "new_hash": new_hash,
                "modified_date": modified_date,
            }),
        )
        .await
    }

    pub async fn brute_force_attempt(&self, username: &str, failed_count: i64) -> Alert {
        self.raise(
            "brute_force_attempt",
            Severity::Warning,
            format!(
                "User {username} has {failed_count} failed login attempts in the last 30 minutes"
            ),
            json!({"username": username, "failed_count": failed_count}),
        )
        .await
    }
}
