//! Connection admission gate.
//!
//! For every accepted client the gate asks the entitlement oracle first.
//! A denied client is closed without the backend ever being contacted. A
//! permitted client gets a fresh backend connection and a [`RelaySession`].

use crate::connector::BackendConnector;
use crate::entitlement::EntitlementOracle;
use crate::limiter::SessionLimiter;
use crate::relay::{RelaySession, SessionSummary};
use chrono::Utc;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Upper bound on delivering the rejection message to a denied client.
const REJECT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a client was turned away before any backend dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The oracle reported no current entitlement.
    NotEntitled,
    /// The configured session cap is reached.
    SessionLimit,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NotEntitled => f.write_str("license expired or missing"),
            DenyReason::SessionLimit => f.write_str("session limit reached"),
        }
    }
}

/// Outcome of admitting one client connection.
#[derive(Debug)]
pub enum Admission {
    Denied(DenyReason),
    /// Permitted, but the backend dial failed.
    BackendUnavailable,
    Relayed(SessionSummary),
}

/// Decides per connection whether to relay, and runs the relay if so.
pub struct AdmissionGate<K> {
    oracle: Arc<dyn EntitlementOracle>,
    connector: K,
    limiter: SessionLimiter,
    /// Written to a denied client before the close, when set.
    reject_message: Option<Vec<u8>>,
    idle_timeout: Option<Duration>,
    next_session_id: AtomicU64,
}

impl<K: BackendConnector> AdmissionGate<K> {
    /// Create a gate with no session cap, no rejection message and no idle
    /// timeout.
    pub fn new(oracle: Arc<dyn EntitlementOracle>, connector: K) -> Self {
        Self {
            oracle,
            connector,
            limiter: SessionLimiter::unlimited(),
            reject_message: None,
            idle_timeout: None,
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn with_limiter(mut self, limiter: SessionLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_reject_message(mut self, message: Option<Vec<u8>>) -> Self {
        self.reject_message = message.filter(|m| !m.is_empty());
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn limiter(&self) -> &SessionLimiter {
        &self.limiter
    }

    /// Admit one client connection and, if permitted, relay it to the backend
    /// until the session ends. Nothing is read from the client before the
    /// decision, and nothing here is retried.
    pub async fn admit<S>(&self, mut client: S, peer: SocketAddr) -> Admission
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if !self.oracle.is_permitted(Utc::now()) {
            warn!(
                peer = %peer,
                reason = %DenyReason::NotEntitled,
                "connection rejected"
            );
            self.reject(&mut client).await;
            return Admission::Denied(DenyReason::NotEntitled);
        }

        let Some(guard) = self.limiter.try_acquire() else {
            warn!(
                peer = %peer,
                reason = %DenyReason::SessionLimit,
                max_sessions = ?self.limiter.max_sessions(),
                "connection rejected"
            );
            self.reject(&mut client).await;
            return Admission::Denied(DenyReason::SessionLimit);
        };

        let backend = match self.connector.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(
                    peer = %peer,
                    backend = %self.connector.endpoint(),
                    error = %e,
                    "failed to connect to backend"
                );
                let _ = client.shutdown().await;
                return Admission::BackendUnavailable;
            }
        };

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        info!(
            session_id = id,
            peer = %peer,
            backend = %self.connector.endpoint(),
            active = self.limiter.active(),
            "license valid, relaying connection"
        );

        let summary = RelaySession::new(id, client, backend)
            .with_idle_timeout(self.idle_timeout)
            .run()
            .await;
        drop(guard);

        info!(
            session_id = id,
            peer = %peer,
            end = ?summary.end,
            sent = summary.bytes_client_to_backend,
            received = summary.bytes_backend_to_client,
            duration_ms = summary.duration.as_millis() as u64,
            "connection closed"
        );
        Admission::Relayed(summary)
    }

    /// Close a denied client, writing the rejection message first if one is
    /// configured. A client that does not drain the message within
    /// [`REJECT_WRITE_TIMEOUT`] is closed regardless.
    async fn reject<S>(&self, client: &mut S)
    where
        S: AsyncWrite + Unpin,
    {
        if let Some(message) = &self.reject_message {
            match tokio::time::timeout(REJECT_WRITE_TIMEOUT, client.write_all(message)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "could not deliver rejection message"),
                Err(_) => debug!("rejection message not drained in time, closing"),
            }
        }
        let _ = client.shutdown().await;
    }
}
