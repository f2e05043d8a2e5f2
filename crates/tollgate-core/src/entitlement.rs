//! Entitlement oracle: answers "is access permitted right now?".
//!
//! The oracle is a read-only capability handed to the admission gate at
//! construction time. The shipped [`ExpiryOracle`] compares the current
//! instant against a fixed expiry; any `Fn(DateTime<Utc>) -> bool` closure
//! works as well.

use crate::error::{GateError, GateResult};
use chrono::{DateTime, Utc};

/// Capability deciding whether service is currently permitted.
///
/// Implementations must be pure and constant time: no I/O, no locking,
/// no interior mutation. Anything that cannot produce a positive answer
/// must answer `false`.
pub trait EntitlementOracle: Send + Sync {
    fn is_permitted(&self, now: DateTime<Utc>) -> bool;
}

impl<F> EntitlementOracle for F
where
    F: Fn(DateTime<Utc>) -> bool + Send + Sync,
{
    fn is_permitted(&self, now: DateTime<Utc>) -> bool {
        self(now)
    }
}

/// Permits access up to and including a fixed expiry instant.
///
/// An oracle without an expiry (no license data) denies everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryOracle {
    expiry: Option<DateTime<Utc>>,
}

impl ExpiryOracle {
    pub fn new(expiry: DateTime<Utc>) -> Self {
        Self {
            expiry: Some(expiry),
        }
    }

    /// Oracle for a process started without entitlement data.
    pub fn unlicensed() -> Self {
        Self { expiry: None }
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// Time left until expiry, or `None` once expired or when unlicensed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.expiry
            .filter(|expiry| now <= *expiry)
            .map(|expiry| expiry - now)
    }
}

impl From<Option<DateTime<Utc>>> for ExpiryOracle {
    fn from(expiry: Option<DateTime<Utc>>) -> Self {
        Self { expiry }
    }
}

impl EntitlementOracle for ExpiryOracle {
    fn is_permitted(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry, Some(expiry) if now <= expiry)
    }
}

/// Parse an RFC 3339 timestamp (e.g. `2026-12-31T23:59:59Z`) into UTC.
pub fn parse_expiry(s: &str) -> GateResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GateError::InvalidExpiry(format!("{s:?}: {e}")))
}
