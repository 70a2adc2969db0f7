//! Built-in license reference table used when the authority is unreachable

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidityKind {
    Demo,
    Production,
}

/// Immutable reference data for one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseRecord {
    pub key: &'static str,
    pub institution: &'static str,
    pub kind: ValidityKind,
    /// Last valid day; the key expires at the start of it (UTC)
    pub expires_at: Option<NaiveDate>,
}

impl LicenseRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at.and_then(|d| d.and_hms_opt(0, 0, 0)) {
            Some(cutoff) => now > cutoff.and_utc(),
            None => false,
        }
    }
}

static LICENSES: Lazy<HashMap<&'static str, LicenseRecord>> = Lazy::new(|| {
    let records = [
        LicenseRecord {
            key: "VGL-DEMO-2024-TEST",
            institution: "Demo Institution",
            kind: ValidityKind::Demo,
            expires_at: None,
        },
        LicenseRecord {
            key: "VGL-KINGSTON-2024-PROD",
            institution: "Kingston Health Department",
            kind: ValidityKind::Production,
            expires_at: NaiveDate::from_ymd_opt(2025, 12, 31),
        },
        LicenseRecord {
            key: "VGL-STJAMES-2024-PROD",
            institution: "St. James Health Department",
            kind: ValidityKind::Production,
            expires_at: NaiveDate::from_ymd_opt(2025, 12, 31),
        },
    ];
    records.into_iter().map(|r| (r.key, r)).collect()
});

pub fn lookup(key: &str) -> Option<&'static LicenseRecord> {
    LICENSES.get(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_demo_key_never_expires() {
        let demo = lookup("VGL-DEMO-2024-TEST").unwrap();
        assert_eq!(demo.kind, ValidityKind::Demo);
        assert!(!demo.is_expired(Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_production_expiry_boundary() {
        let prod = lookup("VGL-KINGSTON-2024-PROD").unwrap();
        assert!(!prod.is_expired(Utc.with_ymd_and_hms(2025, 12, 30, 23, 59, 59).unwrap()));
        assert!(!prod.is_expired(Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 0).unwrap()));
        assert!(prod.is_expired(Utc.with_ymd_and_hms(2025, 12, 31, 0, 0, 1).unwrap()));
    }

    #[test]
    fn test_unknown_key() {
        assert!(lookup("VGL-NOPE").is_none());
    }
}
