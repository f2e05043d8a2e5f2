//! tollgate-core: the entitlement-gated Layer-4 relay.
//!
//! Provides the entitlement oracle, backend connector, relay session,
//! admission gate, session limiter and the TCP acceptor that ties them
//! together. Bootstrap concerns (config, CLI, logging setup) live in
//! `tollgate-server`.

pub mod acceptor;
pub mod admission;
pub mod connector;
pub mod entitlement;
pub mod error;
pub mod limiter;
pub mod relay;

// Re-export commonly used items at crate root.
pub use acceptor::Acceptor;
pub use admission::{Admission, AdmissionGate, DenyReason};
pub use connector::{BackendConnector, TcpConnector};
pub use entitlement::{parse_expiry, EntitlementOracle, ExpiryOracle};
pub use error::{GateError, GateResult};
pub use limiter::{SessionGuard, SessionLimiter};
pub use relay::{Direction, LoopEnd, RelaySession, SessionEnd, SessionState, SessionSummary};
