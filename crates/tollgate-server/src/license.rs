//! License loading: turns the configured [`LicenseSource`] into the expiry
//! the entitlement oracle is built from.
//!
//! A license file is a small TOML document:
//!
//! ```toml
//! expires_at = "2026-12-31T23:59:59Z"
//! licensee = "Example Corp"   # optional
//! ```
//!
//! Failing to read or parse a license file is not fatal. The relay starts
//! without entitlement and denies every connection. A malformed inline
//! expiry is an operator typo and aborts startup instead.

use crate::config::LicenseSource;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tollgate_core::{parse_expiry, ExpiryOracle, GateError, GateResult};
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
struct LicenseFile {
    expires_at: String,
    #[serde(default)]
    licensee: Option<String>,
}

/// Entitlement data resolved at startup. Immutable afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct License {
    pub expiry: Option<DateTime<Utc>>,
    pub licensee: Option<String>,
}

impl License {
    pub fn resolve(source: &LicenseSource) -> GateResult<Self> {
        match source {
            LicenseSource::Inline(at) => Ok(Self {
                expiry: Some(parse_expiry(at)?),
                licensee: None,
            }),
            LicenseSource::File(path) => match Self::read_file(path) {
                Ok(license) => Ok(license),
                Err(e) => {
                    error!(
                        path = %path.display(),
                        error = %e,
                        "unusable license file, all connections will be rejected"
                    );
                    Ok(Self::default())
                }
            },
            LicenseSource::None => {
                warn!("no license configured, all connections will be rejected");
                Ok(Self::default())
            }
        }
    }

    fn read_file(path: &Path) -> GateResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::License(format!("cannot read {}: {e}", path.display())))?;
        let file: LicenseFile = toml::from_str(&content)
            .map_err(|e| GateError::License(format!("cannot parse {}: {e}", path.display())))?;
        Ok(Self {
            expiry: Some(parse_expiry(&file.expires_at)?),
            licensee: file.licensee,
        })
    }

    pub fn oracle(&self) -> ExpiryOracle {
        ExpiryOracle::from(self.expiry)
    }

    /// Log the entitlement state as seen at `now`.
    pub fn log_status(&self, now: DateTime<Utc>) {
        let licensee = self.licensee.as_deref().unwrap_or("-");
        match (self.expiry, self.oracle().remaining(now)) {
            (Some(expiry), Some(remaining)) => info!(
                %expiry,
                licensee,
                days_remaining = remaining.num_days(),
                "license valid"
            ),
            (Some(expiry), None) => warn!(
                %expiry,
                licensee,
                "license has expired, all connections will be rejected"
            ),
            (None, _) => {}
        }
    }
}
