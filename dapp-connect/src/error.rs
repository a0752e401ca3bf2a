//! Error taxonomy for the session layer.

use thiserror::Error;

use crate::{
    account::DecodeError,
    approval::{ApprovalError, TicketId},
    chain::ChainError,
    rpc::RpcPassthroughError,
    transport::RelayError,
};

#[derive(Debug, Error)]
pub enum WalletConnectError {
    /// Proposal or upgrade named a chain outside the allow-list
    #[error("chain not supported: {0}")]
    UnsupportedChain(String),

    /// Session is missing or already closed. Disconnect callers treat this as
    /// already satisfied.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("malformed account: {0}")]
    Decode(#[from] DecodeError),

    #[error("malformed chain id: {0}")]
    Chain(#[from] ChainError),

    #[error("rpc passthrough failed: {0}")]
    RpcPassthrough(#[from] RpcPassthroughError),

    /// Signing requested on a watch-only wallet
    #[error("wallet is read-only")]
    ReadOnlyWallet,

    /// Approval ticket was cancelled or timed out
    #[error("approval cancelled")]
    ApprovalCancelled,

    /// Decision for a ticket that was already resolved or cancelled
    #[error("{0} is not pending")]
    TicketNotPending(TicketId),

    #[error(transparent)]
    Relay(RelayError),

    /// An event handler panicked
    #[error("event handler panicked")]
    HandlerPanicked,
}

impl From<RelayError> for WalletConnectError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::SessionNotFound(topic) => WalletConnectError::SessionNotFound(topic),
            other => WalletConnectError::Relay(other),
        }
    }
}

impl From<ApprovalError> for WalletConnectError {
    fn from(err: ApprovalError) -> Self {
        match err {
            ApprovalError::NotPending(id) => WalletConnectError::TicketNotPending(id),
            ApprovalError::Cancelled(_) => WalletConnectError::ApprovalCancelled,
        }
    }
}

impl WalletConnectError {
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, WalletConnectError::SessionNotFound(_))
    }
}

pub type Result<T, E = WalletConnectError> = std::result::Result<T, E>;
