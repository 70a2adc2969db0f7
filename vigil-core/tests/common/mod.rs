//! Shared helpers for the vigil-core integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, Once};
use vigil_core::authority::{
    Authority, AuthorityError, Endpoint, LicenseRequest, LicenseResponse,
};
use vigil_core::config::VigilConfig;

static INIT: Once = Once::new();

/// Initialize logging for tests (only once per test run)
pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Authority stand-in that records every request it receives
#[derive(Default)]
pub struct RecordingAuthority {
    /// License answer; `None` behaves like a refused connection
    pub license: Mutex<Option<LicenseResponse>>,
    pub reachable: bool,
    pub license_calls: Mutex<Vec<LicenseRequest>>,
    pub sent: Mutex<Vec<(Endpoint, Value)>>,
}

impl RecordingAuthority {
    pub fn online() -> Self {
        Self {
            reachable: true,
            ..Default::default()
        }
    }

    pub fn accepting(institution: &str) -> Self {
        let authority = Self::online();
        *authority.license.lock().unwrap() = Some(LicenseResponse {
            valid: true,
            institution_name: Some(institution.to_string()),
            message: None,
        });
        authority
    }

    pub fn offline() -> Self {
        Self::default()
    }

    pub fn sent_to(&self, endpoint: Endpoint) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn license_call_count(&self) -> usize {
        self.license_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Authority for RecordingAuthority {
    async fn validate_license(
        &self,
        request: &LicenseRequest,
    ) -> Result<LicenseResponse, AuthorityError> {
        self.license_calls.lock().unwrap().push(request.clone());
        if !self.reachable {
            return Err(AuthorityError::Offline);
        }
        self.license
            .lock()
            .unwrap()
            .clone()
            .ok_or(AuthorityError::Status {
                endpoint: Endpoint::LicenseValidate,
                status: 503,
            })
    }

    async fn send(&self, endpoint: Endpoint, payload: &Value) -> Result<(), AuthorityError> {
        if !self.reachable {
            return Err(AuthorityError::Offline);
        }
        self.sent.lock().unwrap().push((endpoint, payload.clone()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Config rooted in a scratch directory, with an `app/` deploy root
pub fn scratch_config(dir: &Path) -> VigilConfig {
    std::fs::create_dir_all(dir.join("app")).unwrap();
    VigilConfig {
        data_dir: dir.join("data"),
        deploy_root: dir.join("app"),
        signing_secret: "integration-secret".to_string(),
        monitored_files: vec!["app.py".to_string(), "db_config.py".to_string()],
        ..Default::default()
    }
}

pub fn write_app_file(dir: &Path, name: &str, content: &str) {
    std::fs::create_dir_all(dir.join("app")).unwrap();
    std::fs::write(dir.join("app").join(name), content).unwrap();
}
