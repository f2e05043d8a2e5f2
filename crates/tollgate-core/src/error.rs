use std::time::Duration;
use thiserror::Error;

/// Errors produced by the relay core.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("backend connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("invalid expiry: {0}")]
    InvalidExpiry(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("license error: {0}")]
    License(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GateResult<T> = Result<T, GateError>;
