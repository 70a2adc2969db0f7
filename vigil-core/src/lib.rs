//! Vigil trust & integrity control plane library exports

pub mod audit;
pub mod authority;
pub mod config;
pub mod identity;
pub mod license;
pub mod monitor;
pub mod plane;
pub mod store;
pub mod support;
pub mod trust;

/// Version reported when no integrity manifest is deployed
pub const DEV_VERSION: &str = "1.0.0-dev";

/// Render a timestamp the way every Vigil log and table stores it.
///
/// Fixed-width UTC with microseconds, so lexical order is time order.
pub fn rfc3339(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
