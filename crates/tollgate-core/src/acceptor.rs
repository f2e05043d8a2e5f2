//! TCP acceptor: binds the public endpoint and hands each accepted
//! connection to the admission gate in its own task.

use crate::admission::AdmissionGate;
use crate::connector::BackendConnector;
use crate::error::{GateError, GateResult};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) cannot
/// spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Bound listening socket.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Acceptor {
    /// Bind the listen address. Failure here is fatal to the process.
    pub async fn bind(addr: &str) -> GateResult<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| GateError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "relay listener started");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept forever. Each connection is admitted in a spawned task so one
    /// connection's lifecycle never delays the next accept. Accept errors are
    /// logged and skipped.
    pub async fn run<K>(self, gate: Arc<AdmissionGate<K>>)
    where
        K: BackendConnector + 'static,
    {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "connection accepted");
                    let _ = stream.set_nodelay(true);
                    let gate = gate.clone();
                    tokio::spawn(async move {
                        gate.admit(stream, peer).await;
                    });
                }
                Err(e) => on_accept_error(&e).await,
            }
        }
    }
}

async fn on_accept_error(e: &std::io::Error) {
    warn!(error = %e, "failed to accept connection");
    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
}
