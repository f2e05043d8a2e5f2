//! Relay session: moves bytes unmodified between a client and a backend.
//!
//! A session owns both transports. It splits each one into read and write
//! halves and spawns two copy loops:
//!
//! ```text
//!   client ──read──▶ [client→backend] ──write──▶ backend
//!   client ◀─write── [backend→client] ◀──read─── backend
//! ```
//!
//! Termination is first-closer-wins. As soon as either loop returns (EOF,
//! read error or write error), the session moves to `Closing`, signals both
//! loops to cancel, and joins the one still running. Each loop selects every
//! read and write against its cancel channel, so a loop parked on a dead peer
//! unblocks immediately. The transports close when the last split half drops,
//! which happens once both loops have actually returned.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

/// Copy buffer per direction.
const COPY_BUF_SIZE: usize = 8192;

/// Direction of a copy loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client->backend"),
            Direction::BackendToClient => f.write_str("backend->client"),
        }
    }
}

/// Lifecycle of a relay session. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Established,
    Relaying,
    Closing,
    Closed,
}

/// Why a copy loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEnd {
    /// The source reached end-of-stream.
    Eof,
    ReadFailed(std::io::ErrorKind),
    WriteFailed(std::io::ErrorKind),
    /// The session closed this loop after the other one finished.
    Cancelled,
    /// The loop task panicked or was aborted.
    Aborted,
}

/// Why the session as a whole ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// A copy loop finished first.
    Closed { first: Direction, cause: LoopEnd },
    /// Neither direction moved a byte within the idle timeout.
    IdleTimeout,
}

/// Outcome of a finished session, for logging.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub id: u64,
    pub end: SessionEnd,
    pub bytes_client_to_backend: u64,
    pub bytes_backend_to_client: u64,
    pub duration: Duration,
}

/// Result of one copy loop.
#[derive(Debug)]
struct LoopReport {
    end: LoopEnd,
    bytes: u64,
}

/// Millisecond timestamp of the last byte moved in either direction.
#[derive(Debug, Clone)]
struct Activity {
    started: Instant,
    last_ms: Arc<AtomicU64>,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let now = self.started.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::Relaxed)))
    }
}

/// One client/backend pairing and its two copy loops.
pub struct RelaySession<C, B> {
    id: u64,
    client: C,
    backend: B,
    idle_timeout: Option<Duration>,
    state_tx: watch::Sender<SessionState>,
}

impl<C, B> RelaySession<C, B>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Pair a client transport with a freshly dialed backend transport.
    pub fn new(id: u64, client: C, backend: B) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Established);
        Self {
            id,
            client,
            backend,
            idle_timeout: None,
            state_tx,
        }
    }

    /// End the session when neither direction moves a byte for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Watch the session's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Relay until either direction ends, then tear both transports down.
    ///
    /// Returns only after both copy loops have exited and both transports
    /// have been dropped.
    pub async fn run(self) -> SessionSummary {
        let Self {
            id,
            client,
            backend,
            idle_timeout,
            state_tx,
        } = self;
        let started = Instant::now();
        let activity = Activity::new();

        let (client_rd, client_wr) = tokio::io::split(client);
        let (backend_rd, backend_wr) = tokio::io::split(backend);

        let (up_cancel_tx, up_cancel_rx) = mpsc::channel::<()>(1);
        let (down_cancel_tx, down_cancel_rx) = mpsc::channel::<()>(1);

        advance(&state_tx, id, SessionState::Relaying);

        let mut upstream: JoinHandle<LoopReport> = tokio::spawn(copy_loop(
            id,
            Direction::ClientToBackend,
            client_rd,
            backend_wr,
            up_cancel_rx,
            activity.clone(),
        ));
        let mut downstream: JoinHandle<LoopReport> = tokio::spawn(copy_loop(
            id,
            Direction::BackendToClient,
            backend_rd,
            client_wr,
            down_cancel_rx,
            activity.clone(),
        ));

        // Decide on the first completion signal; release only after both joins.
        enum First {
            Up(LoopReport),
            Down(LoopReport),
            Idle,
        }
        let first = tokio::select! {
            res = &mut upstream => First::Up(report_of(id, Direction::ClientToBackend, res)),
            res = &mut downstream => First::Down(report_of(id, Direction::BackendToClient, res)),
            _ = idle_expired(&activity, idle_timeout) => First::Idle,
        };

        advance(&state_tx, id, SessionState::Closing);
        let _ = up_cancel_tx.try_send(());
        let _ = down_cancel_tx.try_send(());

        let (end, up, down) = match first {
            First::Up(up) => {
                let down = report_of(id, Direction::BackendToClient, downstream.await);
                let end = SessionEnd::Closed {
                    first: Direction::ClientToBackend,
                    cause: up.end.clone(),
                };
                (end, up, down)
            }
            First::Down(down) => {
                let up = report_of(id, Direction::ClientToBackend, upstream.await);
                let end = SessionEnd::Closed {
                    first: Direction::BackendToClient,
                    cause: down.end.clone(),
                };
                (end, up, down)
            }
            First::Idle => {
                debug!(session_id = id, timeout = ?idle_timeout, "session idle, closing");
                let up = report_of(id, Direction::ClientToBackend, upstream.await);
                let down = report_of(id, Direction::BackendToClient, downstream.await);
                (SessionEnd::IdleTimeout, up, down)
            }
        };

        advance(&state_tx, id, SessionState::Closed);

        SessionSummary {
            id,
            end,
            bytes_client_to_backend: up.bytes,
            bytes_backend_to_client: down.bytes,
            duration: started.elapsed(),
        }
    }
}

fn advance(state_tx: &watch::Sender<SessionState>, id: u64, next: SessionState) {
    state_tx.send_if_modified(|state| {
        if next > *state {
            debug!(session_id = id, from = ?state, to = ?next, "session state");
            *state = next;
            true
        } else {
            false
        }
    });
}

fn report_of(id: u64, direction: Direction, res: Result<LoopReport, JoinError>) -> LoopReport {
    res.unwrap_or_else(|e| {
        warn!(session_id = id, %direction, error = %e, "copy loop aborted");
        LoopReport {
            end: LoopEnd::Aborted,
            bytes: 0,
        }
    })
}

/// Resolves once the session has been idle for `timeout`; never without one.
async fn idle_expired(activity: &Activity, timeout: Option<Duration>) {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };
    let check_every = (timeout / 4).max(Duration::from_millis(10));
    let mut interval = tokio::time::interval(check_every);
    loop {
        interval.tick().await;
        if activity.idle_for() >= timeout {
            return;
        }
    }
}

/// Copy `reader` into `writer` until EOF, an I/O error, or cancellation.
///
/// Each chunk is fully written before the next read. On exit the write half
/// is shut down on a best-effort basis, so an already-closed peer is fine.
async fn copy_loop<R, W>(
    id: u64,
    direction: Direction,
    mut reader: R,
    mut writer: W,
    mut cancel_rx: mpsc::Receiver<()>,
    activity: Activity,
) -> LoopReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut bytes: u64 = 0;

    let end = loop {
        let n = tokio::select! {
            _ = cancel_rx.recv() => break LoopEnd::Cancelled,
            result = reader.read(&mut buf) => match result {
                Ok(0) => break LoopEnd::Eof,
                Ok(n) => n,
                Err(e) => {
                    debug!(session_id = id, %direction, error = %e, "read failed");
                    break LoopEnd::ReadFailed(e.kind());
                }
            },
        };
        activity.touch();

        tokio::select! {
            _ = cancel_rx.recv() => break LoopEnd::Cancelled,
            result = writer.write_all(&buf[..n]) => {
                if let Err(e) = result {
                    debug!(session_id = id, %direction, error = %e, "write failed");
                    break LoopEnd::WriteFailed(e.kind());
                }
            }
        }
        bytes += n as u64;
        activity.touch();
    };

    let _ = writer.shutdown().await;
    debug!(session_id = id, %direction, ?end, bytes, "copy loop ended");
    LoopReport { end, bytes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};
    use tokio::time::timeout;

    const PROMPT: Duration = Duration::from_secs(2);

    /// Returns (session, client_peer, backend_peer): the test drives the
    /// peers while the session owns the opposite ends.
    fn session() -> (RelaySession<DuplexStream, DuplexStream>, DuplexStream, DuplexStream) {
        let (client, client_peer) = duplex(64 * 1024);
        let (backend, backend_peer) = duplex(64 * 1024);
        (RelaySession::new(1, client, backend), client_peer, backend_peer)
    }

    #[tokio::test]
    async fn test_relays_both_directions_unmodified() {
        let (session, mut client_peer, mut backend_peer) = session();
        let task = tokio::spawn(session.run());

        let request: Vec<u8> = (0..=255u8).cycle().take(20_000).collect();
        client_peer.write_all(&request).await.unwrap();
        let mut got = vec![0u8; request.len()];
        backend_peer.read_exact(&mut got).await.unwrap();
        assert_eq!(got, request);

        backend_peer.write_all(b"\x00\x01response\xff").await.unwrap();
        let mut got = [0u8; 11];
        client_peer.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"\x00\x01response\xff");

        drop(client_peer);
        let summary = timeout(PROMPT, task).await.unwrap().unwrap();
        assert_eq!(summary.bytes_client_to_backend, 20_000);
        assert_eq!(summary.bytes_backend_to_client, 11);
        assert_eq!(
            summary.end,
            SessionEnd::Closed {
                first: Direction::ClientToBackend,
                cause: LoopEnd::Eof
            }
        );
    }

    #[tokio::test]
    async fn test_backend_close_closes_client_promptly() {
        let (session, mut client_peer, backend_peer) = session();
        let task = tokio::spawn(session.run());

        client_peer.write_all(b"still talking").await.unwrap();
        drop(backend_peer);

        // The client side must observe EOF rather than hang.
        let mut buf = [0u8; 16];
        let n = timeout(PROMPT, client_peer.read(&mut buf))
            .await
            .expect("client was not closed")
            .unwrap();
        assert_eq!(n, 0);

        let summary = timeout(PROMPT, task).await.unwrap().unwrap();
        assert!(matches!(
            summary.end,
            SessionEnd::Closed {
                first: Direction::BackendToClient,
                ..
            } | SessionEnd::Closed {
                first: Direction::ClientToBackend,
                cause: LoopEnd::WriteFailed(_)
            }
        ));
    }

    #[tokio::test]
    async fn test_client_close_closes_backend() {
        let (session, client_peer, mut backend_peer) = session();
        let task = tokio::spawn(session.run());

        drop(client_peer);
        let mut buf = [0u8; 16];
        let n = timeout(PROMPT, backend_peer.read(&mut buf))
            .await
            .expect("backend was not closed")
            .unwrap();
        assert_eq!(n, 0);
        timeout(PROMPT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stalled_writer_is_cancelled() {
        // A tiny pipe the client never drains: backend->client blocks in write.
        let (client, client_peer) = duplex(16);
        let (backend, mut backend_peer) = duplex(64 * 1024);
        let task = tokio::spawn(RelaySession::new(7, client, backend).run());

        backend_peer.write_all(&[0x42; 4096]).await.unwrap();
        // Client half-closes its sending side: client->backend hits EOF first.
        let (_client_rd, mut client_wr) = tokio::io::split(client_peer);
        client_wr.shutdown().await.unwrap();

        let summary = timeout(PROMPT, task)
            .await
            .expect("session hung on a stalled write")
            .unwrap();
        assert_eq!(
            summary.end,
            SessionEnd::Closed {
                first: Direction::ClientToBackend,
                cause: LoopEnd::Eof
            }
        );
        assert!(summary.bytes_backend_to_client < 4096);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let (session, client_peer, _backend_peer) = session();
        let states = session.subscribe();
        assert_eq!(*states.borrow(), SessionState::Established);

        let task = tokio::spawn(session.run());
        drop(client_peer);
        timeout(PROMPT, task).await.unwrap().unwrap();

        assert_eq!(*states.borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_idle_timeout_ends_session() {
        let (session, mut client_peer, mut backend_peer) = session();
        let session = session.with_idle_timeout(Some(Duration::from_millis(100)));
        let task = tokio::spawn(session.run());

        client_peer.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        backend_peer.read_exact(&mut buf).await.unwrap();

        let summary = timeout(PROMPT, task).await.unwrap().unwrap();
        assert_eq!(summary.end, SessionEnd::IdleTimeout);
        assert_eq!(summary.bytes_client_to_backend, 2);

        let n = client_peer.read(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_no_idle_timeout_by_default() {
        let (session, client_peer, _backend_peer) = session();
        let task = tokio::spawn(session.run());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!task.is_finished());
        drop(client_peer);
        timeout(PROMPT, task).await.unwrap().unwrap();
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::ClientToBackend.to_string(), "client->backend");
        assert_eq!(Direction::BackendToClient.to_string(), "backend->client");
    }
}
