//! HTTP license verification with a local result cache

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{AdmissionCheck, AdmissionError, LicenseInfo};

/// Production verification endpoint
pub const DEFAULT_VERIFY_URL: &str = "https://a.app.hbsjzhyyy.com/license/license/verify";

/// Request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum age of a cached success
const CACHE_VALIDITY_HOURS: i64 = 24;

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    code: Option<i64>,
    message: Option<String>,
    data: Option<LicenseInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// SHA-256 of the license key
    key_digest: String,
    cached_time: DateTime<Utc>,
    data: LicenseInfo,
}

/// Decide admission from a verification response body
///
/// Success requires `code == 0`, `data.status == 1` and `data.valid`.
pub fn interpret_response(body: &str) -> Result<LicenseInfo, AdmissionError> {
    let response: VerifyResponse =
        serde_json::from_str(body).map_err(|e| AdmissionError::InvalidResponse(e.to_string()))?;

    if response.code != Some(0) {
        return Err(AdmissionError::Rejected {
            message: response
                .message
                .unwrap_or_else(|| "license verification failed".to_string()),
            info: None,
        });
    }

    let Some(data) = response.data else {
        return Err(AdmissionError::Rejected {
            message: "license data is empty".to_string(),
            info: None,
        });
    };

    if data.status != Some(1) {
        return Err(AdmissionError::Rejected {
            message: format!(
                "license status is {}",
                data.status_text.as_deref().unwrap_or("unknown")
            ),
            info: Some(data),
        });
    }

    if data.valid != Some(true) {
        return Err(AdmissionError::Rejected {
            message: "license is not valid".to_string(),
            info: Some(data),
        });
    }

    Ok(data)
}

/// Validates a license key against the verification endpoint
#[derive(Debug, Clone)]
pub struct LicenseValidator {
    key: String,
    url: String,
    timeout: Duration,
    cache_path: Option<PathBuf>,
}

impl LicenseValidator {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            url: DEFAULT_VERIFY_URL.to_string(),
            timeout: REQUEST_TIMEOUT,
            cache_path: dirs::home_dir().map(|h| h.join(".remote_deploy_cache").join("license_cache.json")),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Override the cache location; `None` disables caching
    pub fn with_cache_path(mut self, path: Option<PathBuf>) -> Self {
        self.cache_path = path;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn key_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn load_cache(&self) -> Option<LicenseInfo> {
        let path = self.cache_path.as_ref()?;
        let contents = fs::read_to_string(path).ok()?;
        let entry: CacheEntry = serde_json::from_str(&contents).ok()?;

        if entry.key_digest != self.key_digest() {
            return None;
        }
        let age = Utc::now().signed_duration_since(entry.cached_time);
        if age < chrono::Duration::zero() || age > chrono::Duration::hours(CACHE_VALIDITY_HOURS) {
            return None;
        }
        Some(entry.data)
    }

    fn save_cache(&self, data: &LicenseInfo) {
        let Some(path) = &self.cache_path else { return };
        let entry = CacheEntry {
            key_digest: self.key_digest(),
            cached_time: Utc::now(),
            data: data.clone(),
        };

        let result = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| {
                let json = serde_json::to_string_pretty(&entry).map_err(std::io::Error::other)?;
                fs::write(path, json)
            });
        if let Err(e) = result {
            tracing::debug!(error = %e, "could not write license cache");
        }
    }

    fn fetch(&self) -> Result<LicenseInfo, AdmissionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| AdmissionError::Network(e.to_string()))?;

        let response = client
            .get(&self.url)
            .query(&[("license_code", self.key.as_str())])
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    AdmissionError::Network(format!("request timed out after {}s", self.timeout.as_secs()))
                } else if e.is_connect() {
                    AdmissionError::Network("cannot connect to the license server".to_string())
                } else {
                    AdmissionError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() != 200 {
            return Err(AdmissionError::Http(status.as_u16()));
        }

        let body = response
            .text()
            .map_err(|e| AdmissionError::InvalidResponse(e.to_string()))?;
        interpret_response(&body)
    }
}

impl AdmissionCheck for LicenseValidator {
    fn validate(&self, force_refresh: bool) -> Result<LicenseInfo, AdmissionError> {
        if self.key.trim().is_empty() {
            return Err(AdmissionError::MissingKey);
        }

        if !force_refresh {
            if let Some(cached) = self.load_cache() {
                tracing::info!("using cached license verification");
                return Ok(cached);
            }
        }

        tracing::info!("verifying license key");
        let info = self.fetch()?;
        self.save_cache(&info);

        if info.expires_soon() {
            tracing::warn!(
                remaining_days = info.remaining_days.unwrap_or_default(),
                "license expires soon, renew it in time"
            );
        }
        Ok(info)
    }
}
