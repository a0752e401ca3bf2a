//! Wire types shared with the relay client.

use serde::{Deserialize, Serialize};

use crate::jsonrpc::JsonRpcRequest;

/// Opaque session or pairing identifier owned by the transport
pub type Topic = String;

/// Self-description a wallet or dapp attaches to proposals and sessions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub icons: Vec<String>,
}

impl AppMetadata {
    pub fn icon(&self) -> Option<&str> {
        self.icons.first().map(String::as_str)
    }
}

/// Chains and methods requested by, or granted to, a dapp
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Protocol chain ids, e.g. `eip155:1`
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
}

/// The dapp side of a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposer {
    pub public_key: String,
    pub metadata: AppMetadata,
}

/// A dapp's request to establish a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Pairing topic the proposal arrived on
    pub topic: Topic,
    pub proposer: Proposer,
    pub permissions: Permissions,
}

impl Proposal {
    /// The chain the wallet binds the session to. Only the first requested
    /// chain is honoured.
    pub fn requested_chain(&self) -> Option<&str> {
        self.permissions.chains.first().map(String::as_str)
    }
}

/// Mutable session state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Encoded `address@chain` accounts; the first one is active
    pub accounts: Vec<String>,
}

/// What the wallet sends back when approving a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub metadata: AppMetadata,
    pub state: SessionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Proposed,
    Settled,
    Disconnected,
}

/// A settled relationship with one dapp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub topic: Topic,
    pub peer: AppMetadata,
    pub permissions: Permissions,
    pub state: SessionState,
    pub status: SessionStatus,
}

impl Session {
    pub fn account(&self) -> Option<&str> {
        self.state.accounts.first().map(String::as_str)
    }
}

/// Reason attached to reject and disconnect calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: i64,
    pub message: String,
}

impl Reason {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn user_disconnected() -> Self {
        Self::new(400, "User disconnected")
    }

    pub fn user_rejected() -> Self {
        Self::new(5000, "User rejected")
    }

    pub fn unsupported_chain(chain: &str) -> Self {
        Self::new(5100, format!("{} is not supported", chain))
    }
}

/// An RPC request arriving on a settled session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub topic: Topic,
    pub request: JsonRpcRequest,
    /// Target chain, when the dapp names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<String>,
}

/// Events emitted by the relay client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum TransportEvent {
    Proposal(Proposal),
    SessionCreated(Session),
    Request(RequestEvent),
    SessionDeleted { topic: Topic, reason: Reason },
}

impl TransportEvent {
    pub fn topic(&self) -> &str {
        match self {
            TransportEvent::Proposal(proposal) => &proposal.topic,
            TransportEvent::SessionCreated(session) => &session.topic,
            TransportEvent::Request(request) => &request.topic,
            TransportEvent::SessionDeleted { topic, .. } => topic,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransportEvent::Proposal(_) => "proposal",
            TransportEvent::SessionCreated(_) => "session_created",
            TransportEvent::Request(_) => "request",
            TransportEvent::SessionDeleted { .. } => "session_deleted",
        }
    }
}
