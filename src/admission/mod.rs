//! Admission check
//!
//! A deployment may only start after a single blocking admission check
//! succeeds. The production check is `LicenseValidator`, an HTTP license
//! verification with a 24 h local cache.

mod license;

use serde::{Deserialize, Serialize};

pub use license::{interpret_response, LicenseValidator, DEFAULT_VERIFY_URL};

/// Days of validity below which a warning is shown
pub const EXPIRY_WARNING_DAYS: i64 = 30;

/// Remaining-day values above this denote a perpetual license
pub const PERPETUAL_DAYS: i64 = 365_000;

/// License metadata returned by a successful check
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LicenseInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    /// 0 inactive, 1 active, 2 expired, 3 disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

impl LicenseInfo {
    pub fn is_perpetual(&self) -> bool {
        self.remaining_days.is_some_and(|d| d > PERPETUAL_DAYS)
    }

    /// Valid but within the warning window
    pub fn expires_soon(&self) -> bool {
        self.remaining_days
            .is_some_and(|d| d > 0 && d <= EXPIRY_WARNING_DAYS)
    }

    /// Human form of the remaining validity
    pub fn remaining_text(&self) -> String {
        match self.remaining_days {
            _ if self.is_perpetual() => "perpetual".to_string(),
            Some(days) => format!("{} days", days),
            None => "-".to_string(),
        }
    }
}

/// Admission errors
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("no license key configured")]
    MissingKey,

    #[error("license rejected: {message}")]
    Rejected {
        message: String,
        info: Option<LicenseInfo>,
    },

    #[error("license server unreachable: {0}")]
    Network(String),

    #[error("license server returned HTTP {0}")]
    Http(u16),

    #[error("invalid license server response: {0}")]
    InvalidResponse(String),
}

/// A blocking admission check
pub trait AdmissionCheck {
    /// Validate, bypassing any cache when `force_refresh` is set
    fn validate(&self, force_refresh: bool) -> Result<LicenseInfo, AdmissionError>;
}

impl<F> AdmissionCheck for F
where
    F: Fn(bool) -> Result<LicenseInfo, AdmissionError>,
{
    fn validate(&self, force_refresh: bool) -> Result<LicenseInfo, AdmissionError> {
        self(force_refresh)
    }
}
