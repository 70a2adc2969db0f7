//! Time-boxed emergency access for support personnel
//!
//! One grant slot per manager. Granting replaces any previous code; revoking
//! or expiry clears it. Grants live in process memory only, so a restart
//! revokes them.

use crate::audit::AuditTrail;
use crate::authority::{Authority, Endpoint};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const CODE_PREFIX: &str = "VGL";
const CODE_GROUPS: usize = 4;
const MASK_VISIBLE: usize = 12;
/// Longest grant; longer requests are clamped to one week
pub const MAX_GRANT_HOURS: u32 = 24 * 7;

/// The active grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportAccessGrant {
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub granted_by: String,
    #[serde(default)]
    pub duration_hours: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportValidation {
    pub valid: bool,
    pub reason: String,
    pub hours_remaining: Option<f64>,
}

impl SupportValidation {
    fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: reason.into(),
            hours_remaining: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportStatus {
    pub enabled: bool,
    pub expired: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: Option<String>,
    pub hours_remaining: Option<f64>,
}

/// `VGL-####-####-####-####` from the OS random source
pub fn generate_code() -> String {
    let mut rng = OsRng;
    let groups: Vec<String> = (0..CODE_GROUPS)
        .map(|_| format!("{:04}", rng.gen_range(0..10_000u32)))
        .collect();
    format!("{CODE_PREFIX}-{}", groups.join("-"))
}

/// Partially masked form safe to write to logs
pub fn mask_code(code: &str) -> String {
    let visible: String = code.chars().take(MASK_VISIBLE).collect();
    format!("{visible}****")
}

fn hours_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

pub struct SupportAccessManager {
    slot: Mutex<Option<SupportAccessGrant>>,
    audit: Arc<AuditTrail>,
    authority: Arc<dyn Authority>,
    installation_id: String,
}

impl SupportAccessManager {
    pub fn new(
        audit: Arc<AuditTrail>,
        authority: Arc<dyn Authority>,
        installation_id: impl Into<String>,
    ) -> Self {
        Self {
            slot: Mutex::new(None),
            audit,
            authority,
            installation_id: installation_id.into(),
        }
    }

    /// Issue a new code, replacing any active one.
    ///
    /// `duration_hours` is clamped to [`MAX_GRANT_HOURS`].
    pub async fn grant(&self, admin_user: &str, duration_hours: u32) -> SupportAccessGrant {
        if duration_hours > MAX_GRANT_HOURS {
            warn!(
                "Support access of {} hours requested, granting {}",
                duration_hours, MAX_GRANT_HOURS
            );
        }
        let duration_hours = duration_hours.min(MAX_GRANT_HOURS);
        let grant = SupportAccessGrant {
            code: generate_code(),
            expires_at: Utc::now() + Duration::hours(i64::from(duration_hours)),
            granted_by: admin_user.to_string(),
            duration_hours,
        };

        {
            let mut slot = self.slot.lock().await;
            *slot = Some(grant.clone());
        }

        info!(target: "security", "Support access enabled by {} until {}", admin_user, grant.expires_at);

        self.audit
            .support_access(
                "enabled",
                admin_user,
                json!({
                    "code": mask_code(&grant.code),
                    "expires": crate::rfc3339(grant.expires_at),
                    "duration_hours": duration_hours,
                }),
            )
            .await;

        let notice = json!({
            "installation_id": self.installation_id,
            "code": grant.code,
            "expires": crate::rfc3339(grant.expires_at),
            "enabled_by": admin_user,
        });
        if let Err(e) = self
            .authority
            .send(Endpoint::SupportAccessGranted, &notice)
            .await
        {
            warn!("Failed to notify authority of support access: {}", e);
        }

        grant
    }

    pub async fn validate(&self, code: &str) -> SupportValidation {
        self.validate_at(code, Utc::now()).await
    }

    /// Check a presented code as of `now`
    pub async fn validate_at(&self, code: &str, now: DateTime<Utc>) -> SupportValidation {
        let active = self.slot.lock().await.clone();

        let Some(grant) = active else {
            return SupportValidation::rejected("No support access code active");
        };

        if code != grant.code {
            warn!(target: "security", "Invalid support access code presented");
            self.audit
                .support_access(
                    "invalid_attempt",
                    "unknown",
                    json!({"attempted_code": mask_code(code)}),
                )
                .await;
            return SupportValidation::rejected("Invalid support code");
        }

        if now > grant.expires_at {
            return SupportValidation::rejected(format!(
                "Support code expired at {}",
                crate::rfc3339(grant.expires_at)
            ));
        }

        SupportValidation {
            valid: true,
            reason: "Valid support code".to_string(),
            hours_remaining: Some(hours_between(now, grant.expires_at)),
        }
    }

    /// Clear the slot immediately
    pub async fn revoke(&self, user: &str) {
        let previous = self.slot.lock().await.take();

        if let Some(grant) = previous {
            info!(target: "security", "Support access disabled by {}", user);
            self.audit
                .support_access(
                    "disabled",
                    user,
                    json!({"code_was": mask_code(&grant.code)}),
                )
                .await;
        }
    }

    pub async fn status(&self) -> SupportStatus {
        self.status_at(Utc::now()).await
    }

    pub async fn status_at(&self, now: DateTime<Utc>) -> SupportStatus {
        match self.slot.lock().await.as_ref() {
            None => SupportStatus {
                enabled: false,
                expired: false,
                expires_at: None,
                granted_by: None,
                hours_remaining: None,
            },
            Some(grant) => {
                let expired = now > grant.expires_at;
                SupportStatus {
                    enabled: !expired,
                    expired,
                    expires_at: Some(grant.expires_at),
                    granted_by: Some(grant.granted_by.clone()),
                    hours_remaining: (!expired).then(|| hours_between(now, grant.expires_at)),
                }
            }
        }
    }

    /// Drop an expired grant; returns whether one was cleared
    pub async fn cleanup_expired(&self) -> bool {
        self.cleanup_expired_at(Utc::now()).await
    }

    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>) -> bool {
        let expired = {
            let mut slot = self.slot.lock().await;
            let is_expired = slot.as_ref().is_some_and(|grant| now > grant.expires_at);
            if is_expired {
                slot.take()
            } else {
                None
            }
        };

        match expired {
            Some(grant) => {
                info!(target: "security", "Support access code expired, cleaning up");
                self.audit
                    .support_access(
                        "expired",
                        "system",
                        json!({"code_was": mask_code(&grant.code)}),
                    )
                    .await;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditQuery;
    use crate::authority::MockAuthority;
    use crate::store::JsonlStore;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn manager(dir: &TempDir, authority: Arc<MockAuthority>) -> (SupportAccessManager, Arc<AuditTrail>) {
        let store = Arc::new(JsonlStore::new(dir.path().join("audit_log.jsonl")));
        let audit = Arc::new(AuditTrail::new(store, authority.clone(), "install-1"));
        (
            SupportAccessManager::new(Arc::clone(&audit), authority, "install-1"),
            audit,
        )
    }

    fn actions(audit: &AuditTrail) -> Vec<String> {
        let mut entries = audit.query(&AuditQuery::default()).unwrap();
        entries.reverse();
        entries.into_iter().map(|e| e.action_type).collect()
    }

    #[test]
    fn test_code_format() {
        let code = generate_code();
        let parts: Vec<&str> = code.split('-').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "VGL");
        assert!(parts[1..]
            .iter()
            .all(|p| p.len() == 4 && p.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn test_mask_code() {
        assert_eq!(mask_code("VGL-1234-5678-9012-3456"), "VGL-1234-567****");
        assert_eq!(mask_code("short"), "short****");
    }

    #[tokio::test]
    async fn test_no_grant() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, Arc::new(MockAuthority::default()));

        let result = manager.validate("VGL-0000-0000-0000-0000").await;
        assert_eq!(result.reason, "No support access code active");
        assert!(!manager.status().await.enabled);
    }

    #[tokio::test]
    async fn test_oversized_grant_is_clamped() {
        let dir = TempDir::new().unwrap();
        let (manager, audit) = manager(&dir, Arc::new(MockAuthority::default()));

        let before = Utc::now();
        let grant = manager.grant("admin", u32::MAX).await;

        assert_eq!(grant.duration_hours, MAX_GRANT_HOURS);
        assert!(grant.expires_at <= Utc::now() + Duration::hours(i64::from(MAX_GRANT_HOURS)));
        assert!(grant.expires_at >= before + Duration::hours(i64::from(MAX_GRANT_HOURS)));
        assert!(manager.validate(&grant.code).await.valid);

        let entries = audit.query(&AuditQuery::default()).unwrap();
        assert_eq!(entries[0].details["duration_hours"], MAX_GRANT_HOURS);
    }

    #[tokio::test]
    async fn test_grant_validate_and_notify() {
        let dir = TempDir::new().unwrap();
        let authority = Arc::new(MockAuthority::default());
        let (manager, audit) = manager(&dir, Arc::clone(&authority));

        let grant = manager.grant("admin", 4).await;
        let result = manager.validate(&grant.code).await;

        assert!(result.valid);
        let hours = result.hours_remaining.unwrap();
        assert!(hours > 3.9 && hours <= 4.0);

        let notices = authority.sent_to(Endpoint::SupportAccessGranted);
        assert_eq!(notices[0]["code"], grant.code.as_str());

        let entries = audit.query(&AuditQuery::default()).unwrap();
        assert_eq!(entries[0].action_type, "support_access_enabled");
        assert_eq!(entries[0].details["code"], mask_code(&grant.code).as_str());
    }

    #[tokio::test]
    async fn test_wrong_code_is_audited() {
        let dir = TempDir::new().unwrap();
        let (manager, audit) = manager(&dir, Arc::new(MockAuthority::default()));
        manager.grant("admin", 1).await;

        let result = manager.validate("VGL-9999-9999-9999-9999").await;

        assert_eq!(result.reason, "Invalid support code");
        assert_eq!(
            actions(&audit),
            vec!["support_access_enabled", "support_access_invalid_attempt"]
        );
    }

    #[tokio::test]
    async fn test_expired_code() {
        let dir = TempDir::new().unwrap();
        let (manager, _) = manager(&dir, Arc::new(MockAuthority::default()));
        let grant = manager.grant("admin", 2).await;

        let later = grant.expires_at + Duration::seconds(1);
        let result = manager.validate_at(&grant.code, later).await;

        assert!(!result.valid);
        assert!(result.reason.starts_with("Support code expired at "));

        let status = manager.status_at(later).await;
        assert!(status.expired);
        assert!(!status.enabled);
        assert_eq!(status.hours_remaining, None);
    }

    #[tokio::test]
    async fn test_regrant_replaces_and_revoke_clears() {
        let dir = TempDir::new().unwrap();
        let (manager, audit) = manager(&dir, Arc::new(MockAuthority::default()));

        let first = manager.grant("admin", 4).await;
        let second = manager.grant("admin", 4).await;
        assert_ne!(first.code, second.code);
        assert!(!manager.validate(&first.code).await.valid);
        assert!(manager.validate(&second.code).await.valid);

        manager.revoke("admin").await;
        assert_eq!(
            manager.validate(&second.code).await.reason,
            "No support access code active"
        );
        assert_eq!(actions(&audit).last().map(String::as_str), Some("support_access_disabled"));
    }

    #[tokio::test]
    async fn test_cleanup_expired_only_clears_expired() {
        let dir = TempDir::new().unwrap();
        let (manager, audit) = manager(&dir, Arc::new(MockAuthority::default()));
        let grant = manager.grant("admin", 1).await;

        assert!(!manager.cleanup_expired().await);
        assert!(
            manager
                .cleanup_expired_at(grant.expires_at + Duration::minutes(1))
                .await
        );
        assert!(!manager.status().await.enabled);
        assert_eq!(actions(&audit).last().map(String::as_str), Some("support_access_expired"));
    }
}
