//! Vendor-side license key generation

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::trust::hasher::digest_bytes;

pub const KEY_PREFIX: &str = "VGL";
pub const DEFAULT_EXPIRY: &str = "2025-12-31";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedLicense {
    pub license_key: String,
    pub institution: String,
    pub expires: String,
    pub generated_at: String,
}

/// `VGL-XXXX-XXXX-XXXX` from the first 12 uppercase hex chars of
/// `sha256("<institution>:<expiry>:<salt>")`
pub fn generate_license_key(institution: &str, expiry: &str, salt: &str) -> GeneratedLicense {
    let hash = digest_bytes(format!("{institution}:{expiry}:{salt}").as_bytes())
        .into_string()
        .to_uppercase();

    GeneratedLicense {
        license_key: format!(
            "{KEY_PREFIX}-{}-{}-{}",
            &hash[0..4],
            &hash[4..8],
            &hash[8..12]
        ),
        institution: institution.to_string(),
        expires: expiry.to_string(),
        generated_at: crate::rfc3339(Utc::now()),
    }
}
