//! Control plane - wires every component together for an application boundary
//!
//! The host application owns one [`ControlPlane`] and calls into it at
//! startup, on every login, and from its admin surfaces. All components share
//! a single installation id, authority client and pair of log stores.

use crate::audit::{Alert, AlertLog, AuditTrail};
use crate::authority::{Authority, Endpoint, HttpAuthority, OfflineAuthority};
use crate::config::VigilConfig;
use crate::license::{LicenseOutcome, LicenseValidator};
use crate::monitor::{LoginAttempt, SecurityMonitor, SecurityStore};
use crate::store::JsonlStore;
use crate::support::{SupportAccessGrant, SupportAccessManager, SupportStatus, SupportValidation};
use crate::trust::{manifest, IntegrityChecker, IntegrityReport};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// What startup found
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupReport {
    pub installation_id: String,
    pub app_version: String,
    pub integrity: IntegrityReport,
    pub license: LicenseOutcome,
    pub insecure_defaults: Vec<String>,
}

impl StartupReport {
    /// Integrity not known-bad and license accepted
    pub fn healthy(&self) -> bool {
        !self.integrity.is_tampered() && self.license.is_valid()
    }
}

pub struct ControlPlane {
    config: VigilConfig,
    installation_id: String,
    app_version: String,
    authority: Arc<dyn Authority>,
    audit: Arc<AuditTrail>,
    alerts: Arc<AlertLog>,
    license: LicenseValidator,
    support: SupportAccessManager,
    checker: IntegrityChecker,
    monitor: Option<Arc<SecurityMonitor>>,
}

impl ControlPlane {
    /// Build from configuration, choosing the HTTP or offline authority client
    pub fn new(config: VigilConfig) -> Result<Self> {
        let installation_id = crate::identity::load_or_create(&config.installation_id_path())?;

        let authority: Arc<dyn Authority> = if config.offline {
            info!("Offline mode: authority client disabled");
            Arc::new(OfflineAuthority)
        } else {
            Arc::new(HttpAuthority::new(
                &config.authority_url,
                &config.license_key,
                &installation_id,
                config.timeout_seconds,
            )?)
        };

        Ok(Self::assemble(config, installation_id, authority))
    }

    /// Build around an existing authority client
    pub fn with_authority(config: VigilConfig, authority: Arc<dyn Authority>) -> Result<Self> {
        let installation_id = crate::identity::load_or_create(&config.installation_id_path())?;
        Ok(Self::assemble(config, installation_id, authority))
    }

    fn assemble(config: VigilConfig, installation_id: String, authority: Arc<dyn Authority>) -> Self {
        let audit = Arc::new(AuditTrail::new(
            Arc::new(JsonlStore::new(config.audit_log_path())),
            Arc::clone(&authority),
            installation_id.clone(),
        ));
        let alerts = Arc::new(AlertLog::new(
            Arc::new(JsonlStore::new(config.alert_log_path())),
            Arc::clone(&authority),
            installation_id.clone(),
        ));
        let app_version = manifest::app_version(&config.manifest_path());
        let license = LicenseValidator::new(
            Arc::clone(&authority),
            config.last_validation_path(),
            installation_id.clone(),
            app_version.clone(),
        );
        let support = SupportAccessManager::new(
            Arc::clone(&audit),
            Arc::clone(&authority),
            installation_id.clone(),
        );
        let checker = IntegrityChecker::new(&config.deploy_root, config.signing_secret.clone());

        Self {
            config,
            installation_id,
            app_version,
            authority,
            audit,
            alerts,
            license,
            support,
            checker,
            monitor: None,
        }
    }

    /// Connect the SQL store and enable the security monitor
    pub async fn attach_monitor(&mut self) -> Result<Arc<SecurityMonitor>> {
        let url = self.config.database_url();
        let store = SecurityStore::connect(&url)
            .await
            .context("Failed to open security store")?;
        let monitor = Arc::new(SecurityMonitor::new(
            store,
            &self.config.deploy_root,
            self.config.monitored_files.clone(),
            Arc::clone(&self.alerts),
        ));
        self.monitor = Some(Arc::clone(&monitor));
        Ok(monitor)
    }

    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn alerts(&self) -> &Arc<AlertLog> {
        &self.alerts
    }

    pub fn license(&self) -> &LicenseValidator {
        &self.license
    }

    pub fn monitor(&self) -> Option<&Arc<SecurityMonitor>> {
        self.monitor.as_ref()
    }

    /// Integrity check, license validation and the startup telemetry ping
    #[instrument(skip(self), fields(installation_id = %self.installation_id))]
    pub async fn startup(&self) -> StartupReport {
        self.config.warn_insecure_defaults();

        let integrity = self.check_integrity().await;
        let license = self.validate_license().await;

        self.send_telemetry(
            "startup",
            json!({
                "integrity": integrity.status,
                "license_valid": license.is_valid(),
                "license_status": license.status.to_string(),
            }),
        )
        .await;

        StartupReport {
            installation_id: self.installation_id.clone(),
            app_version: self.app_version.clone(),
            integrity,
            license,
            insecure_defaults: self
                .config
                .insecure_defaults()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Check the deployment against its manifest and report the result
    pub async fn check_integrity(&self) -> IntegrityReport {
        let report = self.checker.check_file(&self.config.manifest_path());

        let payload = json!({
            "installation_id": self.installation_id,
            "license_key": self.config.license_key,
            "integrity_result": report,
            "timestamp": crate::rfc3339(Utc::now()),
        });
        if let Err(e) = self.authority.send(Endpoint::IntegrityReport, &payload).await {
            warn!("Integrity report failed: {}", e);
        }

        if report.is_tampered() {
            let mut files = report.modified_files.clone();
            files.extend(report.missing_files.iter().cloned());
            if files.is_empty() {
                files.push(self.config.manifest_path().display().to_string());
            }
            self.alerts.code_tampered(&files).await;
        }
        report
    }

    /// Validate the configured license key, alerting when it is rejected
    pub async fn validate_license(&self) -> LicenseOutcome {
        let outcome = self.license.validate(&self.config.license_key).await;
        if !outcome.is_valid() {
            self.alerts.license_invalid(&outcome.message).await;
        }
        outcome
    }

    pub async fn send_telemetry(&self, event: &str, data: serde_json::Value) {
        let payload = json!({
            "installation_id": self.installation_id,
            "event": event,
            "data": data,
            "timestamp": crate::rfc3339(Utc::now()),
            "app_version": self.app_version,
        });
        if let Err(e) = self.authority.send(Endpoint::Telemetry, &payload).await {
            warn!("Telemetry send failed: {}", e);
        }
    }

    /// Login hook: audit the attempt and run brute-force detection.
    ///
    /// Returns the brute-force alert when this attempt raised one.
    pub async fn on_login(&self, attempt: LoginAttempt) -> Result<Option<Alert>> {
        self.audit
            .user_login(&attempt.username, attempt.success, attempt.ip_address.as_deref())
            .await;

        match &self.monitor {
            Some(monitor) => monitor
                .record_login_attempt(&attempt)
                .await
                .context("Failed to record login attempt"),
            None => Ok(None),
        }
    }

    /// Access to a resource the user is not permitted to reach
    pub async fn unauthorized_access(&self, username: &str, ip_address: Option<&str>) -> Alert {
        self.alerts.unauthorized_login(username, ip_address).await
    }

    pub async fn grant_support_access(&self, admin_user: &str, hours: u32) -> SupportAccessGrant {
        let grant = self.support.grant(admin_user, hours).await;
        self.alerts
            .support_access_enabled(admin_user, grant.duration_hours)
            .await;
        grant
    }

    pub async fn validate_support_code(&self, code: &str) -> SupportValidation {
        self.support.cleanup_expired().await;
        self.support.validate(code).await
    }

    pub async fn revoke_support_access(&self, user: &str) {
        self.support.revoke(user).await;
    }

    pub async fn support_status(&self) -> SupportStatus {
        self.support.status().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AlertQuery;
    use crate::authority::{LicenseResponse, MockAuthority};
    use crate::trust::{IntegrityManifest, IntegrityStatus};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> VigilConfig {
        VigilConfig {
            data_dir: dir.path().join("data"),
            deploy_root: dir.path().join("app"),
            license_key: "VGL-DEMO-2024-TEST".into(),
            signing_secret: "plane-secret".into(),
            ..Default::default()
        }
    }

    fn deploy(dir: &TempDir, config: &VigilConfig) {
        let root = dir.path().join("app");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("app.py"), "app").unwrap();
        IntegrityManifest::build(&root, &["app.py"], &config.signing_secret, "3.1.0")
            .manifest
            .save(&config.manifest_path())
            .unwrap();
    }

    #[tokio::test]
    async fn test_startup_clean_deployment() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        deploy(&dir, &config);
        let authority = Arc::new(MockAuthority::answering(LicenseResponse {
            valid: true,
            institution_name: Some("Demo Institution".into()),
            message: None,
        }));

        let plane = ControlPlane::with_authority(config, authority.clone()).unwrap();
        let report = plane.startup().await;

        assert!(report.healthy());
        assert_eq!(report.app_version, "3.1.0");
        assert_eq!(report.integrity.status, IntegrityStatus::Verified);
        assert_eq!(authority.sent_to(Endpoint::IntegrityReport).len(), 1);

        let telemetry = authority.sent_to(Endpoint::Telemetry);
        assert_eq!(telemetry[0]["event"], "startup");
        assert_eq!(telemetry[0]["app_version"], "3.1.0");
        assert!(plane.alerts().read(&AlertQuery::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_startup_tampered_raises_alert() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        deploy(&dir, &config);
        std::fs::write(dir.path().join("app").join("app.py"), "patched").unwrap();

        let plane =
            ControlPlane::with_authority(config, Arc::new(MockAuthority::unreachable())).unwrap();
        let report = plane.startup().await;

        assert!(!report.healthy());
        let alerts = plane.alerts().read(&AlertQuery::default()).unwrap();
        assert!(alerts.iter().any(|a| a.alert_type == "code_tampered"));
        // Demo key still validates locally while the authority is down
        assert!(report.license.is_valid());
    }

    #[tokio::test]
    async fn test_invalid_license_alerts() {
        let dir = TempDir::new().unwrap();
        let config = VigilConfig {
            license_key: "VGL-NOPE".into(),
            ..config(&dir)
        };

        let plane =
            ControlPlane::with_authority(config, Arc::new(MockAuthority::unreachable())).unwrap();
        let outcome = plane.validate_license().await;

        assert!(!outcome.is_valid());
        let alerts = plane.alerts().read(&AlertQuery::default()).unwrap();
        assert!(alerts.iter().any(|a| a.alert_type == "license_invalid"));
    }

    #[tokio::test]
    async fn test_login_hook_detects_brute_force() {
        let dir = TempDir::new().unwrap();
        let mut plane =
            ControlPlane::with_authority(config(&dir), Arc::new(MockAuthority::default())).unwrap();
        plane.attach_monitor().await.unwrap();

        let mut raised = 0;
        for _ in 0..6 {
            let attempt = LoginAttempt::failure("ana", "bad password").from_ip("10.0.0.9");
            if plane.on_login(attempt).await.unwrap().is_some() {
                raised += 1;
            }
        }
        assert_eq!(raised, 1);
        assert_eq!(plane.audit().stats().unwrap().total, 6);
    }

    #[tokio::test]
    async fn test_support_access_round_trip() {
        let dir = TempDir::new().unwrap();
        let plane =
            ControlPlane::with_authority(config(&dir), Arc::new(MockAuthority::default())).unwrap();

        let grant = plane.grant_support_access("admin", 2).await;
        assert!(plane.validate_support_code(&grant.code).await.valid);
        assert!(plane.support_status().await.enabled);

        plane.revoke_support_access("admin").await;
        assert!(!plane.validate_support_code(&grant.code).await.valid);
    }
}
