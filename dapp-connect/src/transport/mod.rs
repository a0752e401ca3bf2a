//! Relay transport contract.
//!
//! The relay client owns pairing, encryption and session persistence. This
//! crate only talks to it through [`RelayClient`]:
//!
//! ```text
//! ┌──────────────────┐   TransportEvent    ┌──────────────────┐
//! │   RelayClient    │ ──────────────────▶ │   Event Router   │
//! │ (relay, crypto,  │                     └────────┬─────────┘
//! │  session store)  │ ◀── approve/reject ──────────┤
//! │                  │ ◀── respond ─────────────────┤
//! │                  │ ◀── disconnect/update ── Session Registry
//! └──────────────────┘
//! ```
//!
//! [`mem::MemoryRelay`] is an in-process implementation for tests and local
//! development.

pub mod mem;
mod types;

pub use types::{
    AppMetadata, Permissions, Proposal, Proposer, Reason, RequestEvent, Session, SessionResponse,
    SessionState, SessionStatus, Topic, TransportEvent,
};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{config::RelayConfig, jsonrpc::JsonRpcResponse};

/// Errors reported by the relay client
#[derive(Debug, Error)]
pub enum RelayError {
    /// No live session on this topic
    #[error("no session for topic {0}")]
    SessionNotFound(Topic),

    /// The event stream was already handed out
    #[error("event stream already taken")]
    EventsTaken,

    /// Connecting to the relay failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Pairing URI could not be used
    #[error("invalid pairing uri: {0}")]
    InvalidUri(String),

    /// Relay-specific failure
    #[error("relay error: {0}")]
    Relay(String),
}

/// Operations the core consumes from the relay client.
///
/// Mutating calls are relay round-trips. `sessions` and `session` read the
/// client's local, authoritative session store.
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Hand out the event stream. Only the first call succeeds.
    fn take_events(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, RelayError>;

    /// Pair with a dapp from a scanned URI
    async fn pair(&self, uri: &str) -> Result<(), RelayError>;

    /// Approve a proposal, settling a new session
    async fn approve(
        &self,
        proposal: &Proposal,
        response: SessionResponse,
    ) -> Result<Session, RelayError>;

    async fn reject(&self, proposal: &Proposal, reason: Reason) -> Result<(), RelayError>;

    /// Answer a request on a session
    async fn respond(&self, topic: &str, response: JsonRpcResponse) -> Result<(), RelayError>;

    async fn disconnect(&self, topic: &str, reason: Reason) -> Result<(), RelayError>;

    /// Replace the session's account state
    async fn update(&self, topic: &str, state: SessionState) -> Result<(), RelayError>;

    /// Replace the session's granted permissions
    async fn upgrade(&self, topic: &str, permissions: Permissions) -> Result<(), RelayError>;

    /// All live sessions, in registration order
    fn sessions(&self) -> Vec<Session>;

    fn session(&self, topic: &str) -> Option<Session>;
}

/// Creates relay clients
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, config: &RelayConfig) -> Result<Arc<dyn RelayClient>, RelayError>;
}
