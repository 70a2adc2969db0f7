//! Audit trail - append-only record of security-relevant actions
//!
//! Entries are written locally first and only then forwarded (redacted) to
//! the authority. Forwarding is best effort: one attempt, bounded by the
//! client timeout, with a local `audit_send_failed` entry on failure.

pub mod alerts;
pub mod redact;

pub use alerts::{AckOutcome, Alert, AlertLog, AlertQuery, AlertStats, Severity};

use crate::authority::{Authority, Endpoint};
use crate::store::{append_async, LogStore, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const AUDIT_SEND_FAILED: &str = "audit_send_failed";

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub installation_id: String,
    #[serde(default)]
    pub action_type: String,
    /// Who performed the action (stored as `user`)
    #[serde(default, rename = "user")]
    pub actor: String,
    #[serde(default)]
    pub details: Value,
    /// Never forwarded to the authority
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub local_only: bool,
}

impl AuditEntry {
    pub fn new(action_type: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            timestamp: crate::rfc3339(chrono::Utc::now()),
            installation_id: String::new(),
            action_type: action_type.into(),
            actor: actor.into(),
            details: json!({}),
            local_only: false,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn local_only(mut self) -> Self {
        self.local_only = true;
        self
    }
}

/// Filter for [`AuditTrail::query`]
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub limit: usize,
    pub action_type: Option<String>,
    pub actor: Option<String>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            action_type: None,
            actor: None,
        }
    }
}

impl AuditQuery {
    fn matches(&self, entry: &AuditEntry) -> bool {
        self.action_type
            .as_deref()
            .map_or(true, |t| entry.action_type == t)
            && self.actor.as_deref().map_or(true, |a| entry.actor == a)
    }
}

/// Aggregate counts over the whole audit stream
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditStats {
    pub total: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_actor: BTreeMap<String, usize>,
    pub first_ts: Option<String>,
    pub last_ts: Option<String>,
}

/// The audit stream plus its forwarding client
pub struct AuditTrail {
    store: Arc<dyn LogStore>,
    authority: Arc<dyn Authority>,
    installation_id: String,
}

impl AuditTrail {
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

    /// Append locally, then forward unless the entry is local-only.
    ///
    /// Never fails: a local write failure is logged, a forwarding failure is
    /// recorded as an `audit_send_failed` entry.
    pub async fn record(&self, mut entry: AuditEntry) -> AuditEntry {
        if entry.installation_id.is_empty() {
            entry.installation_id = self.installation_id.clone();
        }

        self.append(&entry).await;

        if !entry.local_only {
            self.forward(&entry).await;
        }
        entry
    }

    /// Shorthand for `record(AuditEntry::new(..).with_details(..))`
    pub async fn log(&self, action_type: &str, actor: &str, details: Value) -> AuditEntry {
        self.record(AuditEntry::new(action_type, actor).with_details(details))
            .await
    }

    /// Send a redacted copy to the authority; failures are recorded locally, never raised
    pub async fn forward(&self, entry: &AuditEntry) {
        let payload = match serde_json::to_value(entry) {
            Ok(mut value) => {
                if let Some(details) = value.get_mut("details") {
                    redact::redact(details);
                }
                value
            }
            Err(e) => {
                warn!("Cannot serialize audit entry for forwarding: {}", e);
                return;
            }
        };

        match self.authority.send(Endpoint::Audit, &payload).await {
            Ok(()) => debug!("Forwarded audit entry {}", entry.action_type),
            Err(e) => {
                warn!("Audit forwarding failed: {}", e);
                let mut failure = AuditEntry::new(AUDIT_SEND_FAILED, "system")
                    .with_details(json!({
                        "error": e.to_string(),
                        "action_type": entry.action_type,
                    }))
                    .local_only();
                failure.installation_id = self.installation_id.clone();
                self.append(&failure).await;
            }
        }
    }

    async fn append(&self, entry: &AuditEntry) {
        let result = match serde_json::to_value(entry) {
            Ok(value) => append_async(Arc::clone(&self.store), value).await,
            Err(e) => Err(StoreError::Serialize { source: e }),
        };
        if let Err(e) = result {
            error!(target: "security", "Failed to write local audit log: {}", e);
        }
    }

    fn entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self
            .store
            .scan()?
            .into_iter()
            .filter_map(|record| serde_json::from_value(record).ok())
            .collect())
    }

    /// The most recent `limit` matching entries, newest first
    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEntry>, StoreError> {
        let mut matching: Vec<AuditEntry> = self
            .entries()?
            .into_iter()
            .filter(|entry| query.matches(entry))
            .collect();

        let skip = matching.len().saturating_sub(query.limit);
        matching.drain(..skip);
        matching.reverse();
        Ok(matching)
    }

    /// Totals by type and actor plus first/last timestamps, in one scan
    pub fn stats(&self) -> Result<AuditStats, StoreError> {
        let mut stats = AuditStats::default();

        for entry in self.entries()? {
            stats.total += 1;
            *stats.by_type.entry(or_unknown(&entry.action_type)).or_default() += 1;
            *stats.by_actor.entry(or_unknown(&entry.actor)).or_default() += 1;

            if stats.first_ts.is_none() {
                stats.first_ts = Some(entry.timestamp.clone());
            }
            stats.last_ts = Some(entry.timestamp);
        }

        Ok(stats)
    }

    pub async fn user_login(&self, username: &str, success: bool, ip_address: Option<&str>) {
        self.log(
            "user_login",
            username,
            json!({"success": success, "ip_address": ip_address}),
        )
        .await;
    }

    /// Records `support_access_<action>`
    pub async fn support_access(&self, action: &str, user: &str, details: Value) {
        self.log(&format!("support_access_{action}"), user, details)
            .await;
    }

    pub async fn inspection_created(
        &self,
        user: &str,
        inspection_id: i64,
        form_type: &str,
        establishment: &str,
    ) {
        self.log(
            "inspection_created",
            user,
            json!({
                "inspection_id": inspection_id,
                "form_type": form_type,
                "establishment": establishment,
            }),
        )
        .await;
    }

    pub async fn form_modified(&self, user: &str, form_type: &str, change_description: &str) {
        self.log(
            "form_modified",
            user,
            json!({"form_type": form_type, "changes": change_description}),
        )
        .await;
    }

    pub async fn user_created(&self, admin_user: &str, new_username: &str, role: &str) {
        self.log(
            "user_created",
            admin_user,
            json!({"new_user": new_username, "role": role}),
        )
        .await;
    }
}

fn or_unknown(value: &str) -> String {
    if value.is_empty() {
        "unknown".to_string()
    } else {
        value.to_string()
    }
}
