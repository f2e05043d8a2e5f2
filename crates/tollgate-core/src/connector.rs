//! Backend connector: opens one fresh outbound connection per call.
//!
//! There is no pooling and no retry here. Every admitted session gets its own
//! backend connection, and a failed dial is reported to the caller once.

use crate::error::{GateError, GateResult};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

/// Dials the fixed backend endpoint.
pub trait BackendConnector: Send + Sync {
    /// Transport produced by a successful dial.
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Open exactly one new connection to the backend.
    fn connect(&self) -> impl Future<Output = GateResult<Self::Stream>> + Send;

    /// Human-readable backend address, for logs.
    fn endpoint(&self) -> &str;
}

/// TCP connector for a fixed `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    /// Upper bound on a single dial; `None` leaves it to the OS.
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: None,
        }
    }

    pub fn with_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl BackendConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> GateResult<TcpStream> {
        let dial = TcpStream::connect(&self.addr);
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, dial)
                .await
                .map_err(|_| GateError::ConnectTimeout {
                    addr: self.addr.clone(),
                    timeout: limit,
                })?,
            None => dial.await,
        }
        .map_err(|source| GateError::Connect {
            addr: self.addr.clone(),
            source,
        })?;

        // Relayed protocols are often chatty request/response; don't batch.
        let _ = stream.set_nodelay(true);
        debug!(backend = %self.addr, "backend connection established");
        Ok(stream)
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}
